//! Management API
//!
//! Read-only status plus start/stop/refresh for conditional controllers.
//! Conditionals themselves are edited in the database; `refresh` tells a
//! running controller to pick the new settings up.

use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use common::{AppError, HealthStatus, ServiceStatus, SuccessResponse};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::info;
use verdant_conditional::{ConditionalError, ControllerManager, ControllerStatus};

/// Shared handler state
pub struct AppState {
    pub manager: Arc<ControllerManager>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(manager: Arc<ControllerManager>) -> Arc<Self> {
        Arc::new(Self {
            manager,
            started_at: Instant::now(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub rule_id: String,
    pub message: String,
}

pub fn create_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/conditionals", get(list_conditionals))
        .route("/api/conditionals/{id}", get(get_conditional))
        .route("/api/conditionals/{id}/refresh", post(refresh_conditional))
        .route("/api/conditionals/{id}/start", post(start_conditional))
        .route("/api/conditionals/{id}/stop", post(stop_conditional))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn map_error(err: ConditionalError) -> AppError {
    match err {
        ConditionalError::NotFound(id) => AppError::not_found(format!("Conditional not found: {id}")),
        ConditionalError::InvalidDefinition(msg) => AppError::bad_request(msg),
        other => AppError::internal_error(other.to_string()),
    }
}

fn status_or_404(state: &AppState, id: &str) -> Result<ControllerStatus, AppError> {
    state
        .manager
        .status(id)
        .ok_or_else(|| AppError::not_found(format!("Conditional not found: {id}")))
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<SuccessResponse<HealthStatus>> {
    let statuses = state.manager.list();
    let status = if statuses.iter().all(|s| s.healthy) {
        ServiceStatus::Healthy
    } else {
        ServiceStatus::Degraded
    };

    Json(SuccessResponse::new(HealthStatus {
        status,
        service: "condsrv".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now(),
    }))
}

async fn list_conditionals(
    State(state): State<Arc<AppState>>,
) -> Json<SuccessResponse<Vec<ControllerStatus>>> {
    Json(SuccessResponse::new(state.manager.list()))
}

async fn get_conditional(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse<ControllerStatus>>, AppError> {
    Ok(Json(SuccessResponse::new(status_or_404(&state, &id)?)))
}

async fn refresh_conditional(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse<RefreshResponse>>, AppError> {
    let message = state.manager.refresh(&id).await.map_err(map_error)?;
    info!("Conditional {} refreshed via API", id);
    Ok(Json(SuccessResponse::new(RefreshResponse { rule_id: id, message })))
}

async fn start_conditional(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse<ControllerStatus>>, AppError> {
    state.manager.start(&id).await.map_err(map_error)?;
    info!("Conditional {} started via API", id);
    Ok(Json(SuccessResponse::new(status_or_404(&state, &id)?)))
}

async fn stop_conditional(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse<ControllerStatus>>, AppError> {
    state.manager.stop(&id).await.map_err(map_error)?;
    info!("Conditional {} stopped via API", id);
    Ok(Json(SuccessResponse::new(status_or_404(&state, &id)?)))
}

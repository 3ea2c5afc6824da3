//! Service wiring: database-backed stores, GPIO and dispatch into a manager

use crate::adapters::{JournalDispatcher, SysfsGpio};
use crate::config::CondsrvConfig;
use anyhow::{Context, Result};
use common::resolve_setting;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use verdant_conditional::{
    init_schema, load_sample_interval, ActionDispatcher, ConditionResolver, ControllerContext,
    ControllerManager, SqliteMeasurementCatalog, SqliteMeasurementStore, SqliteRuleStore,
    ThrottledDispatcher,
};

/// Overrides the sampling cadence (seconds) when the database has none
pub const SAMPLE_INTERVAL_ENV: &str = "VERDANT_SAMPLE_INTERVAL_SECS";

/// Sampling cadence: `misc` table > environment > config file
pub async fn resolve_sample_interval(config: &CondsrvConfig, pool: &SqlitePool) -> Result<Duration> {
    let db_value = load_sample_interval(pool)
        .await
        .context("Failed to read sampling cadence")?;
    let configured = config.controller.sample_interval().as_secs_f64();

    let resolved = resolve_setting(
        "conditional sample interval",
        db_value,
        SAMPLE_INTERVAL_ENV,
        configured,
        |secs| secs.is_finite() && *secs > 0.0,
    );
    Ok(Duration::from_secs_f64(resolved.value))
}

/// Build the controller context from config and an open pool
pub async fn build_context(
    config: &CondsrvConfig,
    pool: SqlitePool,
    inputs: Arc<dyn verdant_conditional::DigitalInput>,
) -> Result<ControllerContext> {
    init_schema(&pool).await.context("Failed to initialize schema")?;

    let sample_interval = resolve_sample_interval(config, &pool).await?;
    let resolver = ConditionResolver::new(
        Arc::new(SqliteMeasurementCatalog::new(pool.clone())),
        Arc::new(SqliteMeasurementStore::new(pool.clone())),
        inputs,
    )
    .with_timeout(config.controller.resolver_timeout());

    let dispatcher: Arc<dyn ActionDispatcher> = Arc::new(ThrottledDispatcher::new(
        Arc::new(JournalDispatcher::new(pool.clone())),
        config.notification.hourly_max,
    ));

    let mut ctx = ControllerContext::new(Arc::new(SqliteRuleStore::new(pool)), resolver, dispatcher)
        .with_sample_interval(sample_interval);
    if let Some(dir) = &config.logging.dir {
        ctx = ctx.with_journal_root(dir);
    }

    info!(
        "Controller context: cadence {:?}, resolver timeout {:?}, {} notifications/hour",
        sample_interval,
        config.controller.resolver_timeout(),
        config.notification.hourly_max
    );
    Ok(ctx)
}

/// Manager using sysfs GPIO for edge inputs
pub async fn build_manager(config: &CondsrvConfig, pool: SqlitePool) -> Result<Arc<ControllerManager>> {
    let inputs = Arc::new(SysfsGpio::new(&config.gpio.sysfs_root));
    let ctx = build_context(config, pool, inputs).await?;
    Ok(Arc::new(ControllerManager::new(ctx)))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_sample_interval_from_config() {
        let pool = memory_pool().await;
        let mut config = CondsrvConfig::default();
        config.controller.sample_interval_ms = 2000;
        let interval = resolve_sample_interval(&config, &pool).await.unwrap();
        assert_eq!(interval, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_sample_interval_from_database() {
        let pool = memory_pool().await;
        sqlx::query("INSERT INTO misc (id, sample_rate_controller_conditional) VALUES (1, 0.5)")
            .execute(&pool)
            .await
            .unwrap();
        let interval = resolve_sample_interval(&CondsrvConfig::default(), &pool)
            .await
            .unwrap();
        assert_eq!(interval, Duration::from_millis(500));
    }
}

//! Verdant basic library
//!
//! Building blocks shared by the Verdant services:
//! - logging bootstrap
//! - DB > ENV > config setting resolution
//! - SQLite connection setup
//! - graceful shutdown signals
//! - HTTP response envelopes

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub mod api_types;
pub mod config_loader;
pub mod logging;
pub mod shutdown;

pub use api_types::{ErrorInfo, ErrorResponse, HealthStatus, ServiceStatus, SuccessResponse};
#[cfg(feature = "axum")]
pub use api_types::AppError;
pub use config_loader::resolve_setting;
pub use logging::LogConfig;
pub use shutdown::wait_for_shutdown;

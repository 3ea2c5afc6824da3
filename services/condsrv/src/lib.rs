//! condsrv - Verdant conditional controller service
//!
//! Hosts one controller per stored conditional, backed by the shared SQLite
//! database and sysfs GPIO, with a small HTTP management API.

pub mod adapters;
pub mod api;
pub mod app;
pub mod config;

pub use adapters::{JournalDispatcher, SysfsGpio};
pub use api::{create_routes, AppState};
pub use app::{build_context, build_manager};
pub use config::CondsrvConfig;

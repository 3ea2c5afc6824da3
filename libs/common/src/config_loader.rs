//! Layered setting resolution
//!
//! Runtime settings that may live in the shared database (for example the
//! conditional sampling cadence) are resolved with priority DB > ENV > fallback,
//! where the fallback is whatever the service config file provided.

use std::fmt::{self, Display};
use std::str::FromStr;
use tracing::{info, warn};

/// Where a resolved setting came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Database,
    Environment,
    Fallback,
}

impl Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConfigSource::Database => "database",
            ConfigSource::Environment => "environment",
            ConfigSource::Fallback => "config",
        };
        f.write_str(name)
    }
}

/// A setting value and its origin
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    pub value: T,
    pub source: ConfigSource,
}

/// Resolve a setting with priority DB > ENV > fallback
///
/// `accept` filters out unusable values (for example a non-positive interval);
/// a rejected candidate falls through to the next source with a warning.
pub fn resolve_setting<T, F>(
    name: &str,
    db_value: Option<T>,
    env_var: &str,
    fallback: T,
    accept: F,
) -> Resolved<T>
where
    T: FromStr + Display + Clone,
    T::Err: Display,
    F: Fn(&T) -> bool,
{
    if let Some(val) = db_value {
        if accept(&val) {
            info!("Using {} from database: {}", name, val);
            return Resolved {
                value: val,
                source: ConfigSource::Database,
            };
        }
        warn!("Ignoring invalid {} from database: {}", name, val);
    }

    if let Ok(env_str) = std::env::var(env_var) {
        match env_str.trim().parse::<T>() {
            Ok(val) if accept(&val) => {
                info!("Using {} from {}: {}", name, env_var, val);
                return Resolved {
                    value: val,
                    source: ConfigSource::Environment,
                };
            },
            Ok(val) => warn!("Ignoring invalid {} from {}: {}", name, env_var, val),
            Err(e) => warn!("Failed to parse {} from {}: {}", name, env_var, e),
        }
    }

    info!("Using configured {}: {}", name, fallback);
    Resolved {
        value: fallback,
        source: ConfigSource::Fallback,
    }
}

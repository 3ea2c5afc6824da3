//! Service configuration
//!
//! Layered with figment: built-in defaults, then an optional YAML/TOML/JSON
//! file, then `CONDSRV_` environment variables (nested keys joined by `__`,
//! e.g. `CONDSRV_API__PORT=7000`).

use anyhow::{bail, Context, Result};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_API_PORT: u16 = 6010;
pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 250;
pub const DEFAULT_RESOLVER_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_HOURLY_MAX: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/verdant.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Process-wide sampling cadence
    pub sample_interval_ms: u64,
    /// Bound on each measurement or pin lookup
    pub resolver_timeout_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: DEFAULT_SAMPLE_INTERVAL_MS,
            resolver_timeout_ms: DEFAULT_RESOLVER_TIMEOUT_MS,
        }
    }
}

impl ControllerConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn resolver_timeout(&self) -> Duration {
        Duration::from_millis(self.resolver_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Triggers per conditional per hour, 0 disables dispatch
    pub hourly_max: u32,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            hourly_max: DEFAULT_HOURLY_MAX,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_API_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpioConfig {
    pub sysfs_root: PathBuf,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys/class/gpio"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Daily log files and per-conditional journals go here
    pub dir: Option<PathBuf>,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CondsrvConfig {
    pub database: DatabaseConfig,
    pub controller: ControllerConfig,
    pub notification: NotificationConfig,
    pub api: ApiConfig,
    pub gpio: GpioConfig,
    pub logging: LoggingConfig,
}

impl CondsrvConfig {
    /// Defaults, then `path` if given, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(CondsrvConfig::default()));

        if let Some(path) = path {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
            figment = match path.extension().and_then(|s| s.to_str()) {
                Some("yaml") | Some("yml") => figment.merge(Yaml::file(path)),
                Some("toml") => figment.merge(Toml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                other => bail!("Unsupported config file format: {:?}", other),
            };
        }

        Self::extract(figment.merge(Env::prefixed("CONDSRV_").split("__")))
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: CondsrvConfig = figment
            .extract()
            .context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.controller.sample_interval_ms == 0 {
            bail!("controller.sample_interval_ms must be positive");
        }
        if self.controller.resolver_timeout_ms == 0 {
            bail!("controller.resolver_timeout_ms must be positive");
        }
        if self.api.port == 0 {
            bail!("api.port cannot be 0");
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}

//! Daemon-side adapters: sysfs GPIO input and the trigger dispatcher

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::path::PathBuf;
use tracing::{error, info};
use verdant_conditional::{record_trigger, short_id, ActionDispatcher, ConditionalError, DigitalInput};

/// Digital input backed by the sysfs GPIO interface
///
/// Reads `<root>/gpio<pin>/value`. The pin must already be exported.
#[derive(Debug, Clone)]
pub struct SysfsGpio {
    root: PathBuf,
}

impl SysfsGpio {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn value_path(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{pin}")).join("value")
    }
}

#[async_trait]
impl DigitalInput for SysfsGpio {
    async fn read(&self, pin: u32) -> verdant_conditional::Result<bool> {
        let path = self.value_path(pin);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ConditionalError::Input(format!("{}: {}", path.display(), e)))?;
        match raw.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(ConditionalError::Input(format!(
                "unexpected value {:?} in {}",
                other,
                path.display()
            ))),
        }
    }
}

/// Logs each trigger and appends it to `conditional_trigger_log`
///
/// The insert runs on a spawned task so the controller is never blocked.
#[derive(Clone)]
pub struct JournalDispatcher {
    pool: SqlitePool,
}

impl JournalDispatcher {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl ActionDispatcher for JournalDispatcher {
    fn dispatch(&self, rule_id: &str, message: &str) {
        info!("Conditional {}: triggered\n{}", short_id(rule_id), message);

        let pool = self.pool.clone();
        let rule_id = rule_id.to_string();
        let message = message.to_string();
        tokio::spawn(async move {
            if let Err(e) = record_trigger(&pool, &rule_id, &message).await {
                error!(
                    "Conditional {}: failed to record trigger: {}",
                    short_id(&rule_id),
                    e
                );
            }
        });
    }
}

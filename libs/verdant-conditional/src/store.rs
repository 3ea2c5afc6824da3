//! Rule definition store contract

use crate::error::Result;
use crate::types::RuleDefinition;
use async_trait::async_trait;

/// Read-only lookup of persisted conditionals
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Latest definition with its sub-conditions, `None` when it no longer exists
    async fn load(&self, rule_id: &str) -> Result<Option<RuleDefinition>>;

    /// Ids of every stored conditional
    async fn list_ids(&self) -> Result<Vec<String>>;
}

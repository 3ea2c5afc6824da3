//! Controller manager - arena of conditional controllers keyed by rule id

use crate::controller::{ConditionalController, ControllerContext, ControllerStatus};
use crate::error::{ConditionalError, Result};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub struct ControllerManager {
    ctx: ControllerContext,
    controllers: DashMap<String, Arc<ConditionalController>>,
}

impl ControllerManager {
    pub fn new(ctx: ControllerContext) -> Self {
        Self {
            ctx,
            controllers: DashMap::new(),
        }
    }

    /// Load every stored conditional and start the activated ones
    ///
    /// Returns the number of controllers started. A conditional that fails to
    /// load is logged and skipped.
    pub async fn start_all(&self) -> Result<usize> {
        let ids = self.ctx.store.list_ids().await?;
        let mut started = 0;

        for id in ids {
            let controller = match self.get_or_load(&id).await {
                Ok(controller) => controller,
                Err(e) => {
                    warn!("Conditional {}: skipped at startup: {}", id, e);
                    continue;
                },
            };
            if controller.definition().activated {
                controller.start();
                started += 1;
            }
        }

        info!(
            "Started {} of {} conditional controllers",
            started,
            self.controllers.len()
        );
        Ok(started)
    }

    /// Start one controller, loading it from the store if needed
    pub async fn start(&self, rule_id: &str) -> Result<()> {
        let controller = self.get_or_load(rule_id).await?;
        controller.start();
        Ok(())
    }

    pub async fn stop(&self, rule_id: &str) -> Result<()> {
        let controller = self
            .get(rule_id)
            .ok_or_else(|| ConditionalError::NotFound(rule_id.to_string()))?;
        controller.stop().await;
        Ok(())
    }

    /// Refresh a controller's settings from the store
    ///
    /// A conditional present in the store but not yet managed is loaded and,
    /// if activated, started.
    pub async fn refresh(&self, rule_id: &str) -> Result<String> {
        if let Some(controller) = self.get(rule_id) {
            return controller.refresh().await;
        }

        let controller = self.get_or_load(rule_id).await?;
        if controller.definition().activated {
            controller.start();
        }
        Ok(crate::controller::REFRESH_MESSAGE.to_string())
    }

    pub fn status(&self, rule_id: &str) -> Option<ControllerStatus> {
        self.get(rule_id).map(|c| c.status())
    }

    /// Status of every managed controller, ordered by rule id
    pub fn list(&self) -> Vec<ControllerStatus> {
        let mut statuses: Vec<ControllerStatus> =
            self.controllers.iter().map(|entry| entry.value().status()).collect();
        statuses.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));
        statuses
    }

    pub async fn stop_all(&self) {
        let controllers: Vec<Arc<ConditionalController>> = self
            .controllers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for controller in controllers {
            controller.stop().await;
        }
        info!("All conditional controllers stopped");
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    fn get(&self, rule_id: &str) -> Option<Arc<ConditionalController>> {
        self.controllers.get(rule_id).map(|entry| entry.value().clone())
    }

    async fn get_or_load(&self, rule_id: &str) -> Result<Arc<ConditionalController>> {
        if let Some(controller) = self.get(rule_id) {
            return Ok(controller);
        }
        let controller = Arc::new(ConditionalController::load(rule_id, self.ctx.clone()).await?);
        Ok(self
            .controllers
            .entry(rule_id.to_string())
            .or_insert(controller)
            .value()
            .clone())
    }
}

//! Sub-condition resolution
//!
//! Data sources are abstracted behind async traits so the controller can run
//! against SQLite and sysfs in the daemon and in-memory doubles in tests.
//! Every call crosses a timeout; a timed-out lookup is treated like a missing
//! value, never as a fatal error.

use crate::error::{ConditionalError, Result};
use crate::types::{
    ConditionKind, Measurement, MeasurementInfo, MeasurementQuery, MeasurementReference,
    ResolvedCondition, ResolvedValue, RuleDefinition,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Default bound on a single resolver call
pub const DEFAULT_RESOLVER_TIMEOUT: Duration = Duration::from_secs(5);

/// Device measurement metadata lookup
#[async_trait]
pub trait MeasurementCatalog: Send + Sync {
    /// Concrete channel/unit/measurement for a device measurement id
    async fn describe(&self, measurement_id: &str) -> Result<Option<MeasurementInfo>>;
}

/// Time-series lookup of the latest value
#[async_trait]
pub trait MeasurementResolver: Send + Sync {
    /// Latest sample matching the query, or `None` when there is no fresh data
    async fn query(&self, query: &MeasurementQuery) -> Result<Option<Measurement>>;
}

/// Digital input capability
#[async_trait]
pub trait DigitalInput: Send + Sync {
    async fn read(&self, pin: u32) -> Result<bool>;
}

/// Resolves every sub-condition of a rule into a value
#[derive(Clone)]
pub struct ConditionResolver {
    catalog: Arc<dyn MeasurementCatalog>,
    measurements: Arc<dyn MeasurementResolver>,
    inputs: Arc<dyn DigitalInput>,
    call_timeout: Duration,
}

impl ConditionResolver {
    pub fn new(
        catalog: Arc<dyn MeasurementCatalog>,
        measurements: Arc<dyn MeasurementResolver>,
        inputs: Arc<dyn DigitalInput>,
    ) -> Self {
        Self {
            catalog,
            measurements,
            inputs,
            call_timeout: DEFAULT_RESOLVER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Resolve all sub-conditions in declaration order
    ///
    /// Missing data and failed pin reads yield sentinel values. An unresolvable
    /// measurement reference returns [`ConditionalError::Resolution`] and the
    /// caller must abandon the pass.
    pub async fn resolve(&self, rule: &RuleDefinition) -> Result<Vec<ResolvedCondition>> {
        let mut resolved = Vec::with_capacity(rule.conditions.len());

        for condition in &rule.conditions {
            let value = match &condition.kind {
                ConditionKind::Measurement {
                    reference,
                    max_age_secs,
                } => self.resolve_measurement(rule, reference, *max_age_secs).await?,
                ConditionKind::Edge { pin: Some(pin) } => self.resolve_edge(rule, *pin).await,
                ConditionKind::Edge { pin: None } => {
                    warn!(
                        "Conditional {}: condition {} has no GPIO pin configured",
                        rule.short_id(),
                        condition.placeholder()
                    );
                    ResolvedValue::Unavailable
                },
            };
            debug!(
                "Conditional {}: condition {} = {}",
                rule.short_id(),
                condition.placeholder(),
                value
            );
            resolved.push(ResolvedCondition {
                condition_id: condition.id.clone(),
                value,
            });
        }

        Ok(resolved)
    }

    async fn resolve_measurement(
        &self,
        rule: &RuleDefinition,
        reference: &str,
        max_age_secs: Option<u64>,
    ) -> Result<ResolvedValue> {
        let reference = MeasurementReference::parse(reference)?;
        let info = self.describe(&reference.measurement_id).await?;

        let query = MeasurementQuery {
            device_id: reference.device_id,
            unit: info.unit,
            measurement: info.measurement,
            channel: info.channel,
            max_age: max_age_secs.filter(|s| *s > 0).map(Duration::from_secs),
        };

        match timeout(self.call_timeout, self.measurements.query(&query)).await {
            Ok(Ok(Some(sample))) => Ok(ResolvedValue::Number(sample.value)),
            Ok(Ok(None)) => {
                warn!(
                    "Conditional {}: no data for {} ({}, channel {}) on device {}",
                    rule.short_id(),
                    query.measurement,
                    query.unit,
                    query.channel,
                    query.device_id
                );
                Ok(ResolvedValue::NoData)
            },
            Ok(Err(e)) => {
                warn!(
                    "Conditional {}: measurement query failed for device {}: {}",
                    rule.short_id(),
                    query.device_id,
                    e
                );
                Ok(ResolvedValue::NoData)
            },
            Err(_) => {
                warn!(
                    "Conditional {}: measurement query timed out after {:?} for device {}",
                    rule.short_id(),
                    self.call_timeout,
                    query.device_id
                );
                Ok(ResolvedValue::NoData)
            },
        }
    }

    async fn describe(&self, measurement_id: &str) -> Result<MeasurementInfo> {
        let info = match timeout(self.call_timeout, self.catalog.describe(measurement_id)).await {
            Ok(Ok(info)) => info,
            Ok(Err(e)) => {
                return Err(ConditionalError::Resolution(format!(
                    "Could not look up measurement ID {}: {}",
                    measurement_id, e
                )))
            },
            Err(_) => {
                return Err(ConditionalError::Resolution(format!(
                    "Measurement lookup timed out for measurement ID {}",
                    measurement_id
                )))
            },
        };

        match info {
            Some(info) if !info.measurement.is_empty() => Ok(info),
            _ => Err(ConditionalError::Resolution(format!(
                "Could not determine measurement from measurement ID: {}",
                measurement_id
            ))),
        }
    }

    async fn resolve_edge(&self, rule: &RuleDefinition, pin: u32) -> ResolvedValue {
        match timeout(self.call_timeout, self.inputs.read(pin)).await {
            Ok(Ok(state)) => ResolvedValue::Bool(state),
            Ok(Err(e)) => {
                warn!(
                    "Conditional {}: exception reading GPIO pin {}: {}",
                    rule.short_id(),
                    pin,
                    e
                );
                ResolvedValue::Unavailable
            },
            Err(_) => {
                warn!(
                    "Conditional {}: GPIO pin {} read timed out",
                    rule.short_id(),
                    pin
                );
                ResolvedValue::Unavailable
            },
        }
    }
}

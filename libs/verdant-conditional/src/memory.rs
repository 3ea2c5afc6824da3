//! In-memory implementations of the data source traits
//!
//! Used by tests and by `condsrv check`-style tooling that runs without a
//! database or GPIO hardware.

use crate::dispatch::ActionDispatcher;
use crate::error::{ConditionalError, Result};
use crate::resolver::{DigitalInput, MeasurementCatalog, MeasurementResolver};
use crate::store::RuleStore;
use crate::types::{Measurement, MeasurementInfo, MeasurementQuery, RuleDefinition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;

/// Rule store backed by a map
#[derive(Default)]
pub struct MemoryRuleStore {
    rules: RwLock<HashMap<String, RuleDefinition>>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a definition
    pub fn upsert(&self, rule: RuleDefinition) {
        self.rules.write().insert(rule.id.clone(), rule);
    }

    pub fn remove(&self, rule_id: &str) -> Option<RuleDefinition> {
        self.rules.write().remove(rule_id)
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn load(&self, rule_id: &str) -> Result<Option<RuleDefinition>> {
        Ok(self.rules.read().get(rule_id).cloned())
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.rules.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// Device measurement metadata keyed by measurement id
#[derive(Default)]
pub struct MemoryMeasurementCatalog {
    entries: RwLock<HashMap<String, MeasurementInfo>>,
}

impl MemoryMeasurementCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, measurement_id: &str, channel: i64, unit: &str, measurement: &str) {
        self.entries.write().insert(
            measurement_id.to_string(),
            MeasurementInfo {
                channel,
                unit: unit.to_string(),
                measurement: measurement.to_string(),
            },
        );
    }
}

#[async_trait]
impl MeasurementCatalog for MemoryMeasurementCatalog {
    async fn describe(&self, measurement_id: &str) -> Result<Option<MeasurementInfo>> {
        Ok(self.entries.read().get(measurement_id).cloned())
    }
}

#[derive(Debug, Clone)]
struct Sample {
    device_id: String,
    unit: String,
    measurement: String,
    channel: i64,
    value: f64,
    timestamp: DateTime<Utc>,
}

/// Time-series store holding samples in insertion order
#[derive(Default)]
pub struct MemoryMeasurementStore {
    samples: RwLock<Vec<Sample>>,
}

impl MemoryMeasurementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sample timestamped now
    pub fn record(&self, device_id: &str, unit: &str, measurement: &str, channel: i64, value: f64) {
        self.record_at(device_id, unit, measurement, channel, value, Utc::now());
    }

    pub fn record_at(
        &self,
        device_id: &str,
        unit: &str,
        measurement: &str,
        channel: i64,
        value: f64,
        timestamp: DateTime<Utc>,
    ) {
        self.samples.write().push(Sample {
            device_id: device_id.to_string(),
            unit: unit.to_string(),
            measurement: measurement.to_string(),
            channel,
            value,
            timestamp,
        });
    }

    pub fn clear(&self) {
        self.samples.write().clear();
    }
}

#[async_trait]
impl MeasurementResolver for MemoryMeasurementStore {
    async fn query(&self, query: &MeasurementQuery) -> Result<Option<Measurement>> {
        let oldest = query
            .max_age
            .and_then(|age| chrono::Duration::from_std(age).ok())
            .map(|age| Utc::now() - age);

        let samples = self.samples.read();
        let latest = samples
            .iter()
            .filter(|s| {
                s.device_id == query.device_id
                    && s.unit == query.unit
                    && s.measurement == query.measurement
                    && s.channel == query.channel
            })
            .filter(|s| oldest.map_or(true, |oldest| s.timestamp >= oldest))
            .max_by_key(|s| s.timestamp);

        Ok(latest.map(|s| Measurement {
            value: s.value,
            timestamp: s.timestamp,
        }))
    }
}

/// Digital inputs with settable pin states
#[derive(Default)]
pub struct MemoryDigitalInput {
    pins: RwLock<HashMap<u32, Option<bool>>>,
}

impl MemoryDigitalInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, pin: u32, state: bool) {
        self.pins.write().insert(pin, Some(state));
    }

    /// Make reads of `pin` fail
    pub fn fail(&self, pin: u32) {
        self.pins.write().insert(pin, None);
    }
}

#[async_trait]
impl DigitalInput for MemoryDigitalInput {
    async fn read(&self, pin: u32) -> Result<bool> {
        match self.pins.read().get(&pin) {
            Some(Some(state)) => Ok(*state),
            Some(None) => Err(ConditionalError::Input(format!("pin {} read failed", pin))),
            None => Err(ConditionalError::Input(format!("pin {} not configured", pin))),
        }
    }
}

/// Dispatcher that records every call
#[derive(Default)]
pub struct RecordingDispatcher {
    calls: Mutex<Vec<(String, String)>>,
    resets: Mutex<Vec<String>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.calls.lock().len()
    }

    /// `(rule_id, message)` pairs in dispatch order
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }

    pub fn resets(&self) -> Vec<String> {
        self.resets.lock().clone()
    }
}

impl ActionDispatcher for RecordingDispatcher {
    fn dispatch(&self, rule_id: &str, message: &str) {
        self.calls
            .lock()
            .push((rule_id.to_string(), message.to_string()));
    }

    fn reset(&self, rule_id: &str) {
        self.resets.lock().push(rule_id.to_string());
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::time::Duration;

    fn query(max_age: Option<Duration>) -> MeasurementQuery {
        MeasurementQuery {
            device_id: "dev1".to_string(),
            unit: "C".to_string(),
            measurement: "temperature".to_string(),
            channel: 0,
            max_age,
        }
    }

    #[tokio::test]
    async fn test_latest_sample_wins() {
        let store = MemoryMeasurementStore::new();
        let now = Utc::now();
        store.record_at("dev1", "C", "temperature", 0, 20.0, now - chrono::Duration::seconds(30));
        store.record_at("dev1", "C", "temperature", 0, 22.0, now - chrono::Duration::seconds(5));
        store.record_at("dev1", "C", "temperature", 1, 99.0, now);

        let sample = store.query(&query(None)).await.unwrap().unwrap();
        assert_eq!(sample.value, 22.0);
    }

    #[tokio::test]
    async fn test_max_age_filters_stale_samples() {
        let store = MemoryMeasurementStore::new();
        store.record_at(
            "dev1",
            "C",
            "temperature",
            0,
            20.0,
            Utc::now() - chrono::Duration::seconds(600),
        );

        assert!(store
            .query(&query(Some(Duration::from_secs(60))))
            .await
            .unwrap()
            .is_none());
        assert!(store.query(&query(None)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rule_store_lists_sorted() {
        let store = MemoryRuleStore::new();
        for id in ["b", "a"] {
            store.upsert(RuleDefinition {
                id: id.to_string(),
                name: id.to_string(),
                expression: "true".to_string(),
                period_secs: 1.0,
                start_offset_secs: 0.0,
                refractory_secs: 0.0,
                activated: true,
                conditions: Vec::new(),
            });
        }
        assert_eq!(store.list_ids().await.unwrap(), vec!["a", "b"]);
        assert!(store.remove("a").is_some());
        assert!(store.load("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unconfigured_pin_errors() {
        let inputs = MemoryDigitalInput::new();
        assert!(inputs.read(3).await.is_err());
        inputs.set(3, true);
        assert!(inputs.read(3).await.unwrap());
    }
}

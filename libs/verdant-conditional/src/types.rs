//! Conditional data model
//!
//! A [`RuleDefinition`] is immutable once loaded; a reload replaces it wholesale.

use crate::error::{ConditionalError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use verdant_expr::Value;

/// First segment of a unique id, e.g. `3f2a` for `3f2a-88c1-...`
///
/// Used as the log prefix for a conditional and as the placeholder token for
/// its sub-conditions.
pub fn short_id(unique_id: &str) -> &str {
    unique_id.split('-').next().unwrap_or(unique_id)
}

/// Upper bound for period, start offset and refractory window (100 years)
pub const MAX_RULE_DURATION: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Persisted conditional rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    /// Unique id (typically a UUID)
    pub id: String,
    pub name: String,
    /// Boolean expression template over `{short_id}` placeholders
    pub expression: String,
    /// Seconds between evaluations
    pub period_secs: f64,
    /// Seconds to wait after load before the first evaluation
    #[serde(default)]
    pub start_offset_secs: f64,
    /// Minimum seconds between triggers, 0 disables the gate
    #[serde(default)]
    pub refractory_secs: f64,
    #[serde(default = "default_activated")]
    pub activated: bool,
    /// Sub-conditions in declaration order
    #[serde(default)]
    pub conditions: Vec<SubCondition>,
}

fn default_activated() -> bool {
    true
}

impl RuleDefinition {
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }

    pub fn period(&self) -> Duration {
        secs_to_duration(self.period_secs)
    }

    pub fn start_offset(&self) -> Duration {
        secs_to_duration(self.start_offset_secs)
    }

    pub fn refractory(&self) -> Duration {
        secs_to_duration(self.refractory_secs)
    }

    /// Placeholder tokens provided by the sub-conditions
    pub fn placeholder_ids(&self) -> Vec<&str> {
        self.conditions.iter().map(|c| c.placeholder()).collect()
    }

    /// Check the timing fields and that every placeholder in the template
    /// names a sub-condition
    pub fn validate(&self) -> Result<()> {
        for (field, secs) in [
            ("period", self.period_secs),
            ("start offset", self.start_offset_secs),
            ("refractory", self.refractory_secs),
        ] {
            if !secs.is_finite() || secs < 0.0 {
                return Err(ConditionalError::InvalidDefinition(format!(
                    "{} must be a non-negative number of seconds, got {}",
                    field, secs
                )));
            }
        }
        verdant_expr::check_placeholders(&self.expression, &self.placeholder_ids())?;
        Ok(())
    }
}

/// Negative and NaN values clamp to zero, large values to [`MAX_RULE_DURATION`]
fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs)
        .unwrap_or(MAX_RULE_DURATION)
        .min(MAX_RULE_DURATION)
}

/// One atomic input of a conditional
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubCondition {
    pub id: String,
    #[serde(flatten)]
    pub kind: ConditionKind,
}

impl SubCondition {
    pub fn measurement(id: impl Into<String>, reference: impl Into<String>, max_age_secs: Option<u64>) -> Self {
        Self {
            id: id.into(),
            kind: ConditionKind::Measurement {
                reference: reference.into(),
                max_age_secs,
            },
        }
    }

    pub fn edge(id: impl Into<String>, pin: u32) -> Self {
        Self {
            id: id.into(),
            kind: ConditionKind::Edge { pin: Some(pin) },
        }
    }

    /// Token substituted for `{token}` in the expression template
    pub fn placeholder(&self) -> &str {
        short_id(&self.id)
    }
}

/// Sub-condition kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "condition_type", rename_all = "snake_case")]
pub enum ConditionKind {
    /// Latest time-series value of a device measurement
    Measurement {
        /// `"<device_id>,<measurement_id>"`
        reference: String,
        /// Freshness bound, `None` or 0 means unbounded
        max_age_secs: Option<u64>,
    },
    /// Digital input pin state, `None` when the stored pin is missing or invalid
    Edge {
        #[serde(default)]
        pin: Option<u32>,
    },
}

/// Parsed `"<device_id>,<measurement_id>"` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementReference {
    pub device_id: String,
    pub measurement_id: String,
}

impl MeasurementReference {
    pub fn parse(reference: &str) -> Result<Self> {
        let mut parts = reference.split(',').map(str::trim);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(device_id), Some(measurement_id), None)
                if !device_id.is_empty() && !measurement_id.is_empty() =>
            {
                Ok(Self {
                    device_id: device_id.to_string(),
                    measurement_id: measurement_id.to_string(),
                })
            },
            _ => Err(ConditionalError::Resolution(format!(
                "malformed measurement reference '{}'",
                reference
            ))),
        }
    }
}

/// Concrete channel, unit and measurement name of a device measurement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementInfo {
    pub channel: i64,
    pub unit: String,
    pub measurement: String,
}

/// Arguments of a time-series lookup
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementQuery {
    pub device_id: String,
    pub unit: String,
    pub measurement: String,
    pub channel: i64,
    /// `None` means no freshness bound
    pub max_age: Option<Duration>,
}

/// A stored measurement sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Value of a sub-condition for one evaluation pass
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ResolvedValue {
    Number(f64),
    Bool(bool),
    /// Measurement lookup returned nothing, rendered as `unknown`
    NoData,
    /// Digital read failed, rendered as `false`
    Unavailable,
}

impl fmt::Display for ResolvedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedValue::Number(n) => write!(f, "{}", Value::Number(*n)),
            ResolvedValue::Bool(b) => write!(f, "{}", b),
            ResolvedValue::NoData => write!(f, "{}", Value::Unknown),
            ResolvedValue::Unavailable => f.write_str("false"),
        }
    }
}

/// Resolved value tagged with its originating sub-condition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedCondition {
    pub condition_id: String,
    pub value: ResolvedValue,
}

impl ResolvedCondition {
    pub fn placeholder(&self) -> &str {
        short_id(&self.condition_id)
    }
}

/// Tri-state result of an evaluation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "error", rename_all = "snake_case")]
pub enum Outcome {
    True,
    False,
    Error(String),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::True => f.write_str("true"),
            Outcome::False => f.write_str("false"),
            Outcome::Error(e) => write!(f, "error: {}", e),
        }
    }
}

/// Outcome plus the rendered expression for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationResult {
    pub outcome: Outcome,
    pub rendered: String,
}

impl EvaluationResult {
    pub fn is_true(&self) -> bool {
        self.outcome == Outcome::True
    }
}

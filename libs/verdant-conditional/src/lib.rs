//! verdant-conditional - Conditional controller for Verdant
//!
//! Periodically evaluates user-defined conditionals over live measurements and
//! digital inputs, and hands a trigger message to the action layer when a
//! conditional is true.
//!
//! # Architecture
//!
//! ```text
//! ControllerManager (DashMap arena, one entry per conditional)
//!   └── ConditionalController (tokio task per conditional)
//!         ├── RuntimeSchedule   drift-free next-fire + RefractoryGate
//!         ├── ConditionResolver MeasurementCatalog / MeasurementResolver / DigitalInput
//!         ├── evaluator         substitution + verdant-expr evaluation
//!         └── ActionDispatcher  fire-and-forget, optionally throttled
//! ```

pub mod controller;
pub mod dispatch;
pub mod error;
pub mod evaluator;
pub mod journal;
pub mod manager;
pub mod memory;
pub mod refractory;
pub mod repository;
pub mod resolver;
pub mod schedule;
pub mod store;
pub mod types;

// Re-exports for convenience
pub use controller::{
    ConditionalController, ControllerContext, ControllerState, ControllerStatus,
    DEFAULT_SAMPLE_INTERVAL, REFRESH_MESSAGE,
};
pub use dispatch::{ActionDispatcher, NotificationThrottle, ThrottledDispatcher};
pub use error::{ConditionalError, Result};
pub use evaluator::{evaluate_condition, render, trigger_message};
pub use journal::EvaluationJournal;
pub use manager::ControllerManager;
pub use refractory::RefractoryGate;
pub use repository::{
    init_schema, list_conditionals, load_sample_interval, record_trigger, SqliteMeasurementCatalog,
    SqliteMeasurementStore, SqliteRuleStore,
};
pub use resolver::{ConditionResolver, DigitalInput, MeasurementCatalog, MeasurementResolver};
pub use schedule::{RuntimeSchedule, TickDecision};
pub use store::RuleStore;
pub use types::{
    short_id, ConditionKind, EvaluationResult, MAX_RULE_DURATION, Measurement, MeasurementInfo, MeasurementQuery,
    Outcome, ResolvedCondition, ResolvedValue, RuleDefinition, SubCondition,
};

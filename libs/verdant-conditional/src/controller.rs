//! Conditional controller - one worker task per conditional
//!
//! The worker ticks on the process-wide sampling cadence. On each tick it
//! checks whether the conditional is activated and due, consults the
//! refractory gate, resolves sub-conditions, evaluates the statement and
//! dispatches the trigger message when it is true.
//!
//! Reconfiguration goes through [`ConditionalController::refresh`]: the new
//! definition is handed to the worker over its command channel and swapped in
//! between ticks, so a pass never observes a half-updated definition.

use crate::dispatch::ActionDispatcher;
use crate::error::{ConditionalError, Result};
use crate::evaluator::{evaluate_condition, trigger_message};
use crate::journal::EvaluationJournal;
use crate::resolver::ConditionResolver;
use crate::schedule::{RuntimeSchedule, TickDecision};
use crate::store::RuleStore;
use crate::types::{short_id, EvaluationResult, Outcome, ResolvedCondition, RuleDefinition};
use chrono::Local;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Default sampling cadence shared by all controllers
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(250);

/// Status message returned by a successful refresh
pub const REFRESH_MESSAGE: &str = "Conditional settings successfully refreshed";

/// Lifecycle state of a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerState {
    Stopped,
    Running,
    /// Swapping in a refreshed definition
    Paused,
    Stopping,
}

/// Observable snapshot of a controller
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub rule_id: String,
    pub name: String,
    pub state: ControllerState,
    pub activated: bool,
    pub healthy: bool,
    /// `None` when the worker is not running
    pub next_fire_in_ms: Option<u64>,
    pub refractory_remaining_ms: u64,
    pub evaluations: u64,
    pub triggers: u64,
    pub last_result: Option<Outcome>,
}

#[derive(Debug)]
struct StatusCell {
    name: String,
    state: ControllerState,
    activated: bool,
    healthy: bool,
    next_fire: Option<Instant>,
    refractory_clear: Option<Instant>,
    evaluations: u64,
    triggers: u64,
    last_result: Option<Outcome>,
}

impl StatusCell {
    fn new(rule: &RuleDefinition) -> Self {
        Self {
            name: rule.name.clone(),
            state: ControllerState::Stopped,
            activated: rule.activated,
            healthy: true,
            next_fire: None,
            refractory_clear: None,
            evaluations: 0,
            triggers: 0,
            last_result: None,
        }
    }

    fn publish_schedule(&mut self, schedule: &RuntimeSchedule) {
        self.next_fire = Some(schedule.next_fire());
        self.refractory_clear = Some(schedule.refractory_clear_at());
    }
}

/// Collaborators shared by every controller of a process
#[derive(Clone)]
pub struct ControllerContext {
    pub store: Arc<dyn RuleStore>,
    pub resolver: ConditionResolver,
    pub dispatcher: Arc<dyn ActionDispatcher>,
    /// Sampling cadence, read once when a controller is built
    pub sample_interval: Duration,
    /// Root directory for evaluation journals, disabled when `None`
    pub journal_root: Option<PathBuf>,
}

impl ControllerContext {
    pub fn new(
        store: Arc<dyn RuleStore>,
        resolver: ConditionResolver,
        dispatcher: Arc<dyn ActionDispatcher>,
    ) -> Self {
        Self {
            store,
            resolver,
            dispatcher,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            journal_root: None,
        }
    }

    pub fn with_sample_interval(mut self, sample_interval: Duration) -> Self {
        self.sample_interval = sample_interval;
        self
    }

    pub fn with_journal_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.journal_root = Some(root.into());
        self
    }
}

enum Command {
    Refresh {
        rule: Arc<RuleDefinition>,
        ack: oneshot::Sender<()>,
    },
}

struct WorkerHandle {
    cancel: CancellationToken,
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

/// Controller owning the schedule and worker of a single conditional
pub struct ConditionalController {
    rule_id: String,
    ctx: ControllerContext,
    sample_interval: Duration,
    journal: Option<Arc<EvaluationJournal>>,
    definition: Mutex<Arc<RuleDefinition>>,
    status: Arc<RwLock<StatusCell>>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl ConditionalController {
    /// Load the definition from the store and build a stopped controller
    pub async fn load(rule_id: &str, ctx: ControllerContext) -> Result<Self> {
        let rule = ctx
            .store
            .load(rule_id)
            .await?
            .ok_or_else(|| ConditionalError::NotFound(rule_id.to_string()))?;
        Ok(Self::new(rule, ctx))
    }

    /// Build a stopped controller from an already loaded definition
    pub fn new(rule: RuleDefinition, ctx: ControllerContext) -> Self {
        warn_on_invalid(&rule);
        let journal = ctx
            .journal_root
            .as_deref()
            .map(|root| Arc::new(EvaluationJournal::new(root, &rule.id)));

        Self {
            rule_id: rule.id.clone(),
            // zero would make the ticker panic
            sample_interval: ctx.sample_interval.max(Duration::from_millis(1)),
            journal,
            status: Arc::new(RwLock::new(StatusCell::new(&rule))),
            definition: Mutex::new(Arc::new(rule)),
            worker: Mutex::new(None),
            ctx,
        }
    }

    pub fn rule_id(&self) -> &str {
        &self.rule_id
    }

    /// Current settings snapshot
    pub fn definition(&self) -> Arc<RuleDefinition> {
        self.definition.lock().clone()
    }

    /// Spawn the worker task; a no-op when already running
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            warn!("Conditional {}: already running", short_id(&self.rule_id));
            return;
        }

        let started = Instant::now();
        let rule = self.definition();
        let schedule = RuntimeSchedule::new(&rule, started);
        {
            let mut status = self.status.write();
            status.state = ControllerState::Running;
            status.healthy = true;
            status.publish_schedule(&schedule);
        }

        let cancel = CancellationToken::new();
        let (commands, receiver) = mpsc::channel(8);
        let runner = Worker {
            rule,
            schedule,
            resolver: self.ctx.resolver.clone(),
            dispatcher: self.ctx.dispatcher.clone(),
            journal: self.journal.clone(),
            status: self.status.clone(),
        };
        let span = info_span!("conditional", id = %short_id(&self.rule_id));
        let task = tokio::spawn(
            runner
                .run(self.sample_interval, cancel.clone(), receiver)
                .instrument(span),
        );

        *worker = Some(WorkerHandle {
            cancel,
            commands,
            task,
        });
        info!(
            "Conditional {}: Activated in {:.1} ms",
            short_id(&self.rule_id),
            started.elapsed().as_secs_f64() * 1000.0
        );
    }

    /// Stop the worker, letting an in-flight pass finish; idempotent
    pub async fn stop(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };

        let started = Instant::now();
        self.status.write().state = ControllerState::Stopping;
        handle.cancel.cancel();
        if let Err(e) = handle.task.await {
            error!(
                "Conditional {}: worker ended abnormally: {}",
                short_id(&self.rule_id),
                e
            );
        }

        {
            let mut status = self.status.write();
            status.state = ControllerState::Stopped;
            status.next_fire = None;
        }
        info!(
            "Conditional {}: Deactivated in {:.1} ms",
            short_id(&self.rule_id),
            started.elapsed().as_secs_f64() * 1000.0
        );
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self.status.read().state,
            ControllerState::Running | ControllerState::Paused
        )
    }

    /// Reload the definition from the store and swap it in
    ///
    /// When the worker is running the swap happens between two ticks and the
    /// runtime schedule is rebuilt from the new definition. If the conditional
    /// no longer exists the previous snapshot stays active.
    pub async fn refresh(&self) -> Result<String> {
        let short = short_id(&self.rule_id).to_string();
        let Some(rule) = self.ctx.store.load(&self.rule_id).await? else {
            warn!("Conditional {}: not found, keeping current settings", short);
            return Err(ConditionalError::NotFound(self.rule_id.clone()));
        };
        warn_on_invalid(&rule);
        info!("Conditional {}: Refreshing conditional settings", short);

        let rule = Arc::new(rule);
        let commands = self.worker.lock().as_ref().map(|w| w.commands.clone());
        let mut swapped = false;

        if let Some(commands) = commands {
            let (ack, acked) = oneshot::channel();
            let sent = commands
                .send(Command::Refresh {
                    rule: rule.clone(),
                    ack,
                })
                .await;
            swapped = sent.is_ok() && acked.await.is_ok();
            if !swapped {
                debug!("Conditional {}: worker stopped during refresh", short);
            }
        }

        if !swapped {
            self.ctx.dispatcher.reset(&self.rule_id);
            let mut status = self.status.write();
            status.name = rule.name.clone();
            status.activated = rule.activated;
        }
        *self.definition.lock() = rule;

        Ok(REFRESH_MESSAGE.to_string())
    }

    pub fn status(&self) -> ControllerStatus {
        let now = Instant::now();
        let status = self.status.read();
        let running = matches!(
            status.state,
            ControllerState::Running | ControllerState::Paused
        );

        ControllerStatus {
            rule_id: self.rule_id.clone(),
            name: status.name.clone(),
            state: status.state,
            activated: status.activated,
            healthy: status.healthy,
            next_fire_in_ms: status
                .next_fire
                .filter(|_| running)
                .map(|t| duration_ms(t.saturating_duration_since(now))),
            refractory_remaining_ms: status
                .refractory_clear
                .map(|t| duration_ms(t.saturating_duration_since(now)))
                .unwrap_or(0),
            evaluations: status.evaluations,
            triggers: status.triggers,
            last_result: status.last_result.clone(),
        }
    }
}

impl Drop for ConditionalController {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.get_mut().take() {
            handle.cancel.cancel();
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}

fn warn_on_invalid(rule: &RuleDefinition) {
    if let Err(e) = rule.validate() {
        warn!("Conditional {}: {}", rule.short_id(), e);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// State exclusively owned by the worker task
struct Worker {
    rule: Arc<RuleDefinition>,
    schedule: RuntimeSchedule,
    resolver: ConditionResolver,
    dispatcher: Arc<dyn ActionDispatcher>,
    journal: Option<Arc<EvaluationJournal>>,
    status: Arc<RwLock<StatusCell>>,
}

impl Worker {
    async fn run(
        mut self,
        sample_interval: Duration,
        cancel: CancellationToken,
        mut commands: mpsc::Receiver<Command>,
    ) {
        let mut ticker = interval(sample_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(command) = commands.recv() => self.handle(command),
                _ = ticker.tick() => self.tick().await,
            }
        }
        debug!("Conditional {}: worker exited", self.rule.short_id());
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Refresh { rule, ack } => {
                self.status.write().state = ControllerState::Paused;

                self.schedule = RuntimeSchedule::new(&rule, Instant::now());
                self.rule = rule;
                self.dispatcher.reset(&self.rule.id);

                {
                    let mut status = self.status.write();
                    status.name = self.rule.name.clone();
                    status.activated = self.rule.activated;
                    status.publish_schedule(&self.schedule);
                    status.state = ControllerState::Running;
                }
                // the caller may have given up waiting
                let _ = ack.send(());
            },
        }
    }

    async fn tick(&mut self) {
        if !self.rule.activated {
            return;
        }

        let now = Instant::now();
        match self.schedule.on_tick(now) {
            TickDecision::NotDue => return,
            TickDecision::Suppressed => {
                debug!(
                    "Conditional {}: due but in refractory period for {:?}",
                    self.rule.short_id(),
                    self.schedule.refractory_remaining(now)
                );
            },
            TickDecision::Evaluate => self.evaluate(now).await,
        }

        self.status.write().publish_schedule(&self.schedule);
    }

    async fn evaluate(&mut self, now: Instant) {
        let short = self.rule.short_id().to_string();
        let pass = AssertUnwindSafe(self.pass()).catch_unwind().await;

        match pass {
            Ok(Ok((values, result))) => {
                if let Some(journal) = &self.journal {
                    journal.record(&values, &result);
                }
                if result.is_true() {
                    self.schedule.record_trigger(now);
                }
                {
                    let mut status = self.status.write();
                    status.healthy = true;
                    status.evaluations += 1;
                    if result.is_true() {
                        status.triggers += 1;
                    }
                    status.last_result = Some(result.outcome.clone());
                }
                self.conclude(&short, result);
            },
            Ok(Err(ConditionalError::Resolution(reason))) => {
                error!("Conditional {}: {}", short, reason);
                if let Some(journal) = &self.journal {
                    journal.record_abort(&reason);
                }
                self.status.write().last_result = Some(Outcome::Error(reason));
            },
            Ok(Err(e)) => {
                error!("Conditional {}: evaluation pass failed: {}", short, e);
                self.mark_unhealthy(e.to_string());
            },
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Conditional {}: evaluation pass panicked: {}", short, message);
                self.mark_unhealthy(message);
            },
        }
    }

    /// Resolve sub-conditions and evaluate the statement
    async fn pass(&self) -> Result<(Vec<ResolvedCondition>, EvaluationResult)> {
        let values = self.resolver.resolve(&self.rule).await?;
        let result = evaluate_condition(&self.rule.expression, &values);
        Ok((values, result))
    }

    fn conclude(&self, short: &str, result: EvaluationResult) {
        match result.outcome {
            Outcome::True => {
                let message = trigger_message(
                    Local::now(),
                    &self.rule.id,
                    &self.rule.name,
                    &self.rule.expression,
                    &result.rendered,
                );
                info!("Conditional {}: triggered: {}", short, result.rendered);
                let dispatcher = self.dispatcher.clone();
                let rule_id = self.rule.id.clone();
                let dispatched = std::panic::catch_unwind(AssertUnwindSafe(move || {
                    dispatcher.dispatch(&rule_id, &message)
                }));
                if dispatched.is_err() {
                    error!("Conditional {}: action dispatcher panicked", short);
                }
            },
            Outcome::False => {
                debug!("Conditional {}: false: {}", short, result.rendered);
            },
            Outcome::Error(e) => {
                error!(
                    "Conditional {}: Error evaluating conditional statement: {}. \
                     Replaced Conditional Statement: '{}'",
                    short, e, result.rendered
                );
            },
        }
    }

    fn mark_unhealthy(&self, reason: String) {
        let mut status = self.status.write();
        status.healthy = false;
        status.last_result = Some(Outcome::Error(reason));
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::memory::{
        MemoryDigitalInput, MemoryMeasurementCatalog, MemoryMeasurementStore, MemoryRuleStore,
        RecordingDispatcher,
    };

    fn rule(id: &str, expression: &str) -> RuleDefinition {
        RuleDefinition {
            id: id.to_string(),
            name: "test".to_string(),
            expression: expression.to_string(),
            period_secs: 1.0,
            start_offset_secs: 0.0,
            refractory_secs: 0.0,
            activated: true,
            conditions: Vec::new(),
        }
    }

    fn context(store: Arc<MemoryRuleStore>, dispatcher: Arc<RecordingDispatcher>) -> ControllerContext {
        let resolver = ConditionResolver::new(
            Arc::new(MemoryMeasurementCatalog::new()),
            Arc::new(MemoryMeasurementStore::new()),
            Arc::new(MemoryDigitalInput::new()),
        );
        ControllerContext::new(store, resolver, dispatcher)
    }

    #[tokio::test]
    async fn test_load_unknown_rule() {
        let store = Arc::new(MemoryRuleStore::new());
        let ctx = context(store, Arc::new(RecordingDispatcher::new()));
        let result = ConditionalController::load("missing", ctx).await;
        assert!(matches!(result, Err(ConditionalError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop_lifecycle() {
        let store = Arc::new(MemoryRuleStore::new());
        store.upsert(rule("r1-a", "true"));
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let controller = ConditionalController::load("r1-a", context(store, dispatcher))
            .await
            .unwrap();

        assert!(!controller.is_running());
        assert_eq!(controller.status().state, ControllerState::Stopped);

        controller.start();
        controller.start();
        assert!(controller.is_running());
        assert!(controller.status().next_fire_in_ms.is_some());

        controller.stop().await;
        controller.stop().await;
        assert!(!controller.is_running());
        let status = controller.status();
        assert_eq!(status.state, ControllerState::Stopped);
        assert_eq!(status.next_fire_in_ms, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_when_stopped_replaces_snapshot() {
        let store = Arc::new(MemoryRuleStore::new());
        store.upsert(rule("r1-a", "true"));
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let controller = ConditionalController::load("r1-a", context(store.clone(), dispatcher.clone()))
            .await
            .unwrap();

        let mut updated = rule("r1-a", "false");
        updated.name = "renamed".to_string();
        store.upsert(updated);

        assert_eq!(controller.refresh().await.unwrap(), REFRESH_MESSAGE);
        assert_eq!(controller.definition().expression, "false");
        assert_eq!(controller.status().name, "renamed");
        assert_eq!(dispatcher.resets(), vec!["r1-a".to_string()]);
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }

    #[tokio::test(start_paused = true)]
    #[tracing_test::traced_test]
    async fn test_unknown_measurement_reference_aborts_tick() {
        let store = Arc::new(MemoryRuleStore::new());
        let mut definition = rule("r4-a", "{c1} > 20");
        definition.period_secs = 3600.0;
        definition.conditions = vec![crate::types::SubCondition::measurement(
            "c1-x",
            "dev1,no-such-measurement",
            None,
        )];
        store.upsert(definition);
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let controller = ConditionalController::load("r4-a", context(store, dispatcher.clone()))
            .await
            .unwrap();

        controller.start();
        tokio::time::sleep(Duration::from_secs(2)).await;
        controller.stop().await;

        assert_eq!(dispatcher.count(), 0);
        let status = controller.status();
        assert_eq!(status.evaluations, 0);
        assert!(status.healthy);
        assert!(logs_contain(
            "Could not determine measurement from measurement ID: no-such-measurement"
        ));
        logs_assert(|lines: &[&str]| {
            let errors = lines.iter().filter(|line| line.contains("ERROR")).count();
            if errors == 1 {
                Ok(())
            } else {
                Err(format!("expected one error entry, found {}", errors))
            }
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_refractory_triggers_once_and_keeps_running() {
        let store = Arc::new(MemoryRuleStore::new());
        let mut definition = rule("r6-a", "true");
        definition.refractory_secs = 1e19;
        store.upsert(definition);
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let controller = ConditionalController::load("r6-a", context(store, dispatcher.clone()))
            .await
            .unwrap();

        controller.start();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let status = controller.status();
        assert!(controller.is_running());
        assert!(status.healthy);
        assert_eq!(status.evaluations, 1);
        assert_eq!(status.triggers, 1);
        assert!(status.refractory_remaining_ms > 3_600_000);
        assert_eq!(dispatcher.count(), 1);
        controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_start_offset_never_fires() {
        let store = Arc::new(MemoryRuleStore::new());
        let mut definition = rule("r7-a", "true");
        definition.start_offset_secs = 1e19;
        store.upsert(definition);
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let controller = ConditionalController::load("r7-a", context(store, dispatcher.clone()))
            .await
            .unwrap();

        controller.start();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let status = controller.status();
        assert!(controller.is_running());
        assert!(status.healthy);
        assert!(status.next_fire_in_ms.unwrap() > 3_600_000);
        assert_eq!(status.evaluations, 0);
        assert_eq!(dispatcher.count(), 0);
        controller.stop().await;
    }

    struct FlakyInput {
        reads: std::sync::atomic::AtomicU32,
    }

    #[async_trait::async_trait]
    impl crate::resolver::DigitalInput for FlakyInput {
        async fn read(&self, _pin: u32) -> Result<bool> {
            let n = self
                .reads
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n == 0 {
                panic!("gpio driver fault");
            }
            Ok(true)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_pass_marks_unhealthy_and_recovers() {
        let store = Arc::new(MemoryRuleStore::new());
        let mut definition = rule("r5-a", "{e1}");
        definition.period_secs = 10.0;
        definition.conditions = vec![crate::types::SubCondition::edge("e1-x", 4)];
        store.upsert(definition);

        let dispatcher = Arc::new(RecordingDispatcher::new());
        let resolver = ConditionResolver::new(
            Arc::new(MemoryMeasurementCatalog::new()),
            Arc::new(MemoryMeasurementStore::new()),
            Arc::new(FlakyInput {
                reads: std::sync::atomic::AtomicU32::new(0),
            }),
        );
        let ctx = ControllerContext::new(store, resolver, dispatcher.clone());
        let controller = ConditionalController::load("r5-a", ctx).await.unwrap();

        controller.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let status = controller.status();
        assert!(!status.healthy);
        assert!(controller.is_running());
        assert_eq!(
            status.last_result,
            Some(Outcome::Error("gpio driver fault".to_string()))
        );
        assert_eq!(dispatcher.count(), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        let status = controller.status();
        assert!(status.healthy);
        assert_eq!(status.triggers, 1);
        assert_eq!(dispatcher.count(), 1);
        controller.stop().await;
    }
}

//! Run and stage execution contexts.

use super::identity::RunIdentity;
use super::store::{StateDelta, StateStore, StateView};
use crate::cancellation::CancellationToken;
use crate::config::AgentflowConfig;
use crate::events::{EventSink, NoOpEventSink};
use crate::pipeline::RunJournal;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Behaviour shared by run and stage contexts.
pub trait ExecutionContext: Send + Sync {
    /// Returns the run id.
    fn run_id(&self) -> Uuid;

    /// Tries to emit an event, enriched with the context's identifiers.
    fn try_emit_event(&self, event_type: &str, data: Option<serde_json::Value>);

    /// Checks if the run is cancelled.
    fn is_cancelled(&self) -> bool;
}

/// Everything one run shares across its stages.
pub struct RunContext {
    identity: RunIdentity,
    store: Arc<StateStore>,
    token: Arc<CancellationToken>,
    event_sink: Arc<dyn EventSink>,
    config: AgentflowConfig,
    journal: RunJournal,
}

impl RunContext {
    /// Creates a run context over a store with default settings.
    #[must_use]
    pub fn new(identity: RunIdentity, store: Arc<StateStore>) -> Self {
        Self {
            identity,
            store,
            token: Arc::new(CancellationToken::new()),
            event_sink: Arc::new(NoOpEventSink),
            config: AgentflowConfig::default(),
            journal: RunJournal::new(),
        }
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: AgentflowConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Shares an externally owned cancellation token.
    #[must_use]
    pub fn with_cancellation_token(mut self, token: Arc<CancellationToken>) -> Self {
        self.token = token;
        self
    }

    /// Returns the run identity.
    #[must_use]
    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    /// Returns the state store.
    #[must_use]
    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Returns the cancellation token.
    #[must_use]
    pub fn cancellation_token(&self) -> &Arc<CancellationToken> {
        &self.token
    }

    /// Returns the event sink.
    #[must_use]
    pub fn event_sink(&self) -> &Arc<dyn EventSink> {
        &self.event_sink
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &AgentflowConfig {
        &self.config
    }

    /// Returns the journal of stage records, failures and loop exits.
    #[must_use]
    pub fn journal(&self) -> &RunJournal {
        &self.journal
    }

    /// Requests cancellation of the run.
    pub fn cancel(&self, reason: impl Into<String>) {
        self.token.cancel(reason);
    }
}

impl ExecutionContext for RunContext {
    fn run_id(&self) -> Uuid {
        self.identity.run_id
    }

    fn try_emit_event(&self, event_type: &str, data: Option<serde_json::Value>) {
        let mut enriched = data.unwrap_or_else(|| serde_json::json!({}));
        if let serde_json::Value::Object(ref mut map) = enriched {
            map.insert("run_id".to_string(), serde_json::json!(self.identity.run_id_str()));
        }
        self.event_sink.try_emit(event_type, Some(enriched));
    }

    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("identity", &self.identity)
            .field("keys", &self.store.len())
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Writes and signals a stage records while it runs.
///
/// The orchestrator applies them to the store once the stage has returned
/// successfully; a failed stage's actions are discarded.
#[derive(Debug, Default)]
pub struct StageActions {
    delta: Mutex<StateDelta>,
    escalate: AtomicBool,
}

impl StageActions {
    /// Creates empty actions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers a state write.
    pub fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        self.delta.lock().set(key, value);
    }

    /// Signals the enclosing retry loop to exit after this stage.
    pub fn escalate(&self) {
        self.escalate.store(true, Ordering::SeqCst);
    }

    /// Returns true if the stage escalated.
    #[must_use]
    pub fn escalated(&self) -> bool {
        self.escalate.load(Ordering::SeqCst)
    }

    /// Returns a copy of the buffered writes.
    #[must_use]
    pub fn pending(&self) -> StateDelta {
        self.delta.lock().clone()
    }

    /// Takes the buffered writes.
    #[must_use]
    pub fn take_delta(&self) -> StateDelta {
        std::mem::take(&mut *self.delta.lock())
    }
}

/// The context for a single stage execution.
pub struct StageContext {
    run: Arc<RunContext>,
    stage_name: String,
    actions: StageActions,
    loop_iteration: Option<u32>,
}

impl StageContext {
    /// Creates a new stage context.
    #[must_use]
    pub fn new(run: Arc<RunContext>, stage_name: impl Into<String>) -> Self {
        Self {
            run,
            stage_name: stage_name.into(),
            actions: StageActions::new(),
            loop_iteration: None,
        }
    }

    /// Marks the context as running inside a retry loop pass (0-based).
    #[must_use]
    pub fn in_loop_pass(mut self, iteration: Option<u32>) -> Self {
        self.loop_iteration = iteration;
        self
    }

    /// Returns the stage name.
    #[must_use]
    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    /// Returns a read-only view of the state store.
    #[must_use]
    pub fn state(&self) -> StateView<'_> {
        self.run.store().view()
    }

    /// Returns the stage's actions.
    #[must_use]
    pub fn actions(&self) -> &StageActions {
        &self.actions
    }

    /// Returns true if the stage runs inside a retry loop pass.
    #[must_use]
    pub fn is_within_loop(&self) -> bool {
        self.loop_iteration.is_some()
    }

    /// Returns the enclosing retry loop's current pass, if any.
    #[must_use]
    pub fn loop_iteration(&self) -> Option<u32> {
        self.loop_iteration
    }

    /// Returns the run context.
    #[must_use]
    pub fn run(&self) -> &Arc<RunContext> {
        &self.run
    }

    /// Returns the run configuration.
    #[must_use]
    pub fn config(&self) -> &AgentflowConfig {
        self.run.config()
    }

    /// Returns the per-call timeout.
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        self.run.config().call_timeout()
    }

    /// Returns the principal of the run.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.run.identity().user_id
    }

    /// Returns the cancellation token.
    #[must_use]
    pub fn cancellation_token(&self) -> &Arc<CancellationToken> {
        self.run.cancellation_token()
    }
}

impl ExecutionContext for StageContext {
    fn run_id(&self) -> Uuid {
        self.run.run_id()
    }

    fn try_emit_event(&self, event_type: &str, data: Option<serde_json::Value>) {
        let mut enriched = data.unwrap_or_else(|| serde_json::json!({}));
        if let serde_json::Value::Object(ref mut map) = enriched {
            map.entry("stage".to_string())
                .or_insert_with(|| serde_json::json!(&self.stage_name));
        }
        self.run.try_emit_event(event_type, Some(enriched));
    }

    fn is_cancelled(&self) -> bool {
        self.run.is_cancelled()
    }
}

impl std::fmt::Debug for StageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("stage_name", &self.stage_name)
            .field("loop_iteration", &self.loop_iteration)
            .finish_non_exhaustive()
    }
}

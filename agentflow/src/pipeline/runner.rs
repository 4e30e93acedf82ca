//! Top-level pipeline runs and their reports.

use super::executor::run_stage;
use super::failures::FailureRecord;
use super::retry_loop::{ExitReason, LoopOutcome};
use crate::cancellation::CancellationToken;
use crate::config::AgentflowConfig;
use crate::context::{ExecutionContext, RunContext, RunIdentity, StateScope, StateStore};
use crate::core::{StageOutput, StageStatus};
use crate::errors::{ConfigurationError, PersistenceError, StageError};
use crate::events::{event_types, EventSink, NoOpEventSink};
use crate::observability::SpanTimer;
use crate::session::{load_or_create, save_run, SessionStore};
use crate::stages::{Stage, StageRecord};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every stage completed.
    Completed,
    /// The run finished, but some stage or item failed recoverably.
    Degraded,
    /// A non-recoverable stage error stopped the run.
    Halted,
    /// The run was cancelled.
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Degraded => write!(f, "degraded"),
            Self::Halted => write!(f, "halted"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The report every run terminates with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// The run id.
    pub run_id: Uuid,
    /// The principal the run ran for.
    pub user_id: String,
    /// Name of the top-level stage.
    pub pipeline: String,
    /// How the run ended.
    pub status: RunStatus,
    /// Exit reason of the last retry loop that finished, if any.
    pub exit_reason: Option<ExitReason>,
    /// Every retry loop exit, in order.
    pub loops: Vec<LoopOutcome>,
    /// Stage records in completion order.
    pub stages: Vec<StageRecord>,
    /// Stage and item failures.
    pub failures: Vec<FailureRecord>,
    /// Session-scoped state after the run.
    pub outputs: BTreeMap<String, Value>,
    /// The error that halted or cancelled the run.
    pub error: Option<HashMap<String, Value>>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: f64,
}

impl RunReport {
    fn from_run(
        run: &RunContext,
        pipeline: &str,
        result: &Result<StageOutput, StageError>,
        duration_ms: f64,
    ) -> Self {
        let journal = run.journal();
        let stages = journal.records();
        let failures = journal.failures().failures();
        let loops = journal.loop_exits();

        let status = match result {
            Err(e) if e.is_cancelled() => RunStatus::Cancelled,
            Err(_) => RunStatus::Halted,
            Ok(output)
                if output.degraded
                    || !failures.is_empty()
                    || stages.iter().any(|r| r.status == StageStatus::Degraded) =>
            {
                RunStatus::Degraded
            }
            Ok(_) => RunStatus::Completed,
        };

        Self {
            run_id: run.identity().run_id,
            user_id: run.identity().user_id.clone(),
            pipeline: pipeline.to_string(),
            status,
            exit_reason: loops.last().map(|l| l.exit_reason),
            loops,
            stages,
            failures,
            outputs: run.store().scope_entries(StateScope::Session),
            error: result.as_ref().err().map(StageError::to_dict),
            duration_ms,
        }
    }

    /// Returns true if the run reached its end, degraded or not.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self.status, RunStatus::Completed | RunStatus::Degraded)
    }

    /// Returns a session output.
    #[must_use]
    pub fn output(&self, key: &str) -> Option<&Value> {
        self.outputs.get(key)
    }

    /// Returns the records of one stage, one per execution.
    #[must_use]
    pub fn stage_records(&self, stage: &str) -> Vec<&StageRecord> {
        self.stages.iter().filter(|r| r.stage == stage).collect()
    }

    /// Serializes the report for the presentation layer.
    ///
    /// # Errors
    ///
    /// Returns an error if a stored value cannot be serialized.
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Runs a top-level stage against a state store and always returns a report.
#[derive(Clone)]
pub struct PipelineRunner {
    pipeline: Arc<dyn Stage>,
    config: AgentflowConfig,
    event_sink: Arc<dyn EventSink>,
}

impl fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineRunner")
            .field("pipeline", &self.pipeline.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PipelineRunner {
    /// Creates a runner. The configuration is validated once, here.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if the configuration is invalid.
    pub fn new(pipeline: Arc<dyn Stage>, config: AgentflowConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self {
            pipeline,
            config,
            event_sink: Arc::new(NoOpEventSink),
        })
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &AgentflowConfig {
        &self.config
    }

    /// Runs the pipeline.
    pub async fn run(&self, identity: RunIdentity, store: Arc<StateStore>) -> RunReport {
        self.run_with_token(identity, store, Arc::new(CancellationToken::new()))
            .await
    }

    /// Runs the pipeline under an externally owned cancellation token.
    ///
    /// The temporary scope is cleared when the run ends, whatever the outcome.
    pub async fn run_with_token(
        &self,
        identity: RunIdentity,
        store: Arc<StateStore>,
        token: Arc<CancellationToken>,
    ) -> RunReport {
        let timer = SpanTimer::start(self.pipeline.name());
        let run = Arc::new(
            RunContext::new(identity, store)
                .with_config(self.config.clone())
                .with_event_sink(Arc::clone(&self.event_sink))
                .with_cancellation_token(token),
        );

        let span = info_span!("run", run_id = %run.identity().run_id, pipeline = %self.pipeline.name());
        let result = run_stage(self.pipeline.as_ref(), &run, None)
            .instrument(span)
            .await;

        let cleared = run.store().clear_scope(StateScope::Temp);
        let report = RunReport::from_run(&run, timer.name(), &result, timer.elapsed_ms());

        match report.status {
            RunStatus::Completed | RunStatus::Degraded => info!(
                run_id = %report.run_id,
                status = %report.status,
                stages = report.stages.len(),
                failures = report.failures.len(),
                temp_keys_cleared = cleared,
                duration_ms = report.duration_ms,
                "Run finished"
            ),
            RunStatus::Halted | RunStatus::Cancelled => warn!(
                run_id = %report.run_id,
                status = %report.status,
                error = ?report.error,
                duration_ms = report.duration_ms,
                "Run stopped early"
            ),
        }
        run.try_emit_event(
            event_types::RUN_COMPLETED,
            Some(json!({ "status": report.status, "duration_ms": report.duration_ms })),
        );

        report
    }

    /// Loads a run's state, runs the pipeline and saves the persistent scopes.
    ///
    /// # Errors
    ///
    /// Returns a [`PersistenceError`] if loading or saving fails. Stage
    /// failures are reported in the [`RunReport`].
    pub async fn run_session(
        &self,
        sessions: &dyn SessionStore,
        identity: RunIdentity,
    ) -> Result<RunReport, PersistenceError> {
        let store = Arc::new(load_or_create(sessions, &identity).await?);
        let report = self.run(identity.clone(), Arc::clone(&store)).await;
        save_run(sessions, &identity, &store).await?;
        Ok(report)
    }
}

//! Run lifecycle events.
//!
//! Stage and loop lifecycle transitions are emitted as named events through
//! the [`EventSink`] held by the run context, in addition to ordinary
//! `tracing` diagnostics.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Names of the events emitted by the orchestrator.
pub mod event_types {
    /// A stage is about to execute.
    pub const STAGE_STARTED: &str = "stage.started";
    /// A stage completed successfully.
    pub const STAGE_COMPLETED: &str = "stage.completed";
    /// A stage failed recoverably and produced its degraded output.
    pub const STAGE_DEGRADED: &str = "stage.degraded";
    /// A stage failed and halted its pipeline.
    pub const STAGE_FAILED: &str = "stage.failed";
    /// A fan-out batch joined.
    pub const BATCH_COMPLETED: &str = "batch.completed";
    /// A retry loop finished one pass.
    pub const LOOP_ITERATION: &str = "loop.iteration";
    /// A retry loop reached a terminal state.
    pub const LOOP_EXITED: &str = "loop.exited";
    /// A run finished and produced its report.
    pub const RUN_COMPLETED: &str = "run.completed";
}

//! # Agentflow
//!
//! A stateful multi-stage workflow orchestrator for a single in-process run.
//!
//! Agentflow runs named stages against a shared, scoped state store and
//! provides:
//!
//! - **Scoped state**: `temp:`, `user:` and `app:` prefixes select the scope
//!   of a key; everything else lives for the run
//! - **Sequential pipelines**: stages run in order, each seeing the writes of
//!   the ones before it
//! - **Fan-out/fan-in**: a batch of items is processed concurrently and
//!   failures stay isolated to their item
//! - **Consolidation**: weighted scoring, ranking and bucketing of results
//! - **Retry loops**: a bounded loop that any stage can end early by
//!   escalating, followed by a synthesis stage that runs exactly once
//! - **Run reports**: every run ends with a report, never a panic
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use agentflow::prelude::*;
//!
//! let pipeline = PipelineBuilder::new("review")
//!     .stage(Arc::new(CallStage::new("analyze", "analysis", analyzer).with_inputs(&["code"])))
//!     .stage(Arc::new(RetryLoop::new("fix_loop", fix_body, synthesis, 3)?))
//!     .build()?;
//!
//! let runner = PipelineRunner::new(Arc::new(pipeline), AgentflowConfig::default())?;
//! let report = runner.run(RunIdentity::new("alice"), Arc::new(StateStore::new())).await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod consolidate;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod fanout;
pub mod items;
pub mod observability;
pub mod pipeline;
pub mod session;
pub mod stages;
pub mod testing;
pub mod workflows;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{AgentflowConfig, LoggingConfig, ScoringConfig};
    pub use crate::consolidate::{
        Bucket, BucketThresholds, ConsolidateStage, Consolidation, Consolidator, ScoreWeights,
        Scored,
    };
    pub use crate::context::{
        ExecutionContext, RunContext, RunIdentity, StageActions, StageContext, StateScope,
        StateSnapshot, StateStore, ESCALATE_KEY,
    };
    pub use crate::core::{StageKind, StageOutput, StageStatus};
    pub use crate::errors::{
        AgentflowError, ConfigurationError, ContractErrorInfo, ExternalCallError,
        PersistenceError, StageError, ValidationError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::fanout::{FanOutConfig, FanOutCoordinator, FanOutStage, PairedCall};
    pub use crate::items::{format_batch, FormattedBatch, Item};
    pub use crate::observability::init_tracing;
    pub use crate::pipeline::{
        ExitReason, PipelineBuilder, PipelineRunner, RetryLoop, RunReport, RunStatus,
        SequentialPipeline,
    };
    pub use crate::session::{InMemorySessionStore, SessionStore};
    pub use crate::stages::{stage_fn, CallStage, FnStage, Stage, StageFunction};
    pub use std::sync::Arc;
}

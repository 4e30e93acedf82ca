//! Pipeline orchestration.
//!
//! - [`run_stage`] folds one stage's result into the run's state store
//! - [`SequentialPipeline`] runs nested stages in order
//! - [`RetryLoop`] repeats a body until escalation or its pass cap, then
//!   synthesizes once
//! - [`PipelineRunner`] runs a top-level stage and produces a [`RunReport`]

mod builder;
mod executor;
mod failures;
mod journal;
mod retry_loop;
mod runner;
mod sequential;


pub use builder::PipelineBuilder;
pub use executor::run_stage;
pub use failures::{FailureCollector, FailureRecord};
pub use journal::RunJournal;
pub use retry_loop::{ExitReason, LoopOutcome, LoopState, RetryLoop};
pub use runner::{PipelineRunner, RunReport, RunStatus};
pub use sequential::{run_stages, SequenceOutcome, SequentialPipeline};

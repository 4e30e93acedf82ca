//! Testing utilities for agentflow pipelines.
//!
//! This module provides:
//! - Mock stages and mock stage functions
//! - Assertions over stage outputs and run reports
//! - Run fixtures with an in-memory event sink

mod assertions;
mod fixtures;
mod functions;
mod mocks;

pub use assertions::{
    assert_output_degraded, assert_output_ok, assert_run_status, assert_stage_statuses,
};
pub use fixtures::TestRun;
pub use functions::MockFunction;
pub use mocks::{EscalatingStage, FailingStage, RecordingStage, ScriptedStage, SlowStage};

//! Test assertions for stage outputs and run reports.

use crate::core::{StageOutput, StageStatus};
use crate::pipeline::{RunReport, RunStatus};

/// Asserts that the output is not degraded.
pub fn assert_output_ok(output: &StageOutput) {
    assert!(
        !output.degraded,
        "Expected a regular output, got degraded: {:?}",
        output.metadata_value("error")
    );
}

/// Asserts that the output is degraded.
pub fn assert_output_degraded(output: &StageOutput) {
    assert!(output.degraded, "Expected a degraded output, got {:?}", output.value);
}

/// Asserts the status of a run.
pub fn assert_run_status(report: &RunReport, expected: RunStatus) {
    assert_eq!(
        report.status, expected,
        "Expected run status {expected}, got {} (error: {:?})",
        report.status, report.error
    );
}

/// Asserts the statuses of every execution of a stage, in order.
pub fn assert_stage_statuses(report: &RunReport, stage: &str, expected: &[StageStatus]) {
    let actual: Vec<StageStatus> = report.stage_records(stage).iter().map(|r| r.status).collect();
    assert_eq!(
        actual, expected,
        "Unexpected statuses for stage '{stage}'"
    );
}

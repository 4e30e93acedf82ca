//! Per-run journal of stage records, failures and loop exits.

use super::failures::FailureCollector;
use super::retry_loop::LoopOutcome;
use crate::stages::StageRecord;
use parking_lot::Mutex;

/// What happened during one run, in order.
#[derive(Debug, Default)]
pub struct RunJournal {
    records: Mutex<Vec<StageRecord>>,
    failures: FailureCollector,
    loop_exits: Mutex<Vec<LoopOutcome>>,
}

impl RunJournal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage record.
    pub fn record(&self, record: StageRecord) {
        self.records.lock().push(record);
    }

    /// Returns the stage records in completion order.
    #[must_use]
    pub fn records(&self) -> Vec<StageRecord> {
        self.records.lock().clone()
    }

    /// Returns the failure collector.
    #[must_use]
    pub fn failures(&self) -> &FailureCollector {
        &self.failures
    }

    /// Records how a retry loop exited.
    pub fn record_loop_exit(&self, outcome: LoopOutcome) {
        self.loop_exits.lock().push(outcome);
    }

    /// Returns the loop exits in order.
    #[must_use]
    pub fn loop_exits(&self) -> Vec<LoopOutcome> {
        self.loop_exits.lock().clone()
    }
}

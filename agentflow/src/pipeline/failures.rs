//! Collection of stage and item failures during a run.

use crate::errors::StageError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Record of one failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Stage the failure happened in.
    pub stage: String,
    /// Batch index of the failing item, for fan-out failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_index: Option<usize>,
    /// Error message.
    pub error: String,
    /// Error type name.
    pub error_type: String,
    /// Whether the error is recoverable.
    pub recoverable: bool,
    /// When the failure was recorded.
    pub timestamp: DateTime<Utc>,
}

impl FailureRecord {
    /// Creates a record for a stage error.
    #[must_use]
    pub fn from_error(stage: impl Into<String>, item_index: Option<usize>, error: &StageError) -> Self {
        Self {
            stage: stage.into(),
            item_index,
            error: error.to_string(),
            error_type: error.error_type().to_string(),
            recoverable: error.is_recoverable(),
            timestamp: Utc::now(),
        }
    }
}

/// Thread-safe collector of failures.
#[derive(Debug, Default)]
pub struct FailureCollector {
    records: Mutex<Vec<FailureRecord>>,
}

impl FailureCollector {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure of a whole stage.
    pub fn record_stage(&self, stage: &str, error: &StageError) {
        self.records.lock().push(FailureRecord::from_error(stage, None, error));
    }

    /// Records a failure of one fan-out item.
    pub fn record_item(&self, stage: &str, index: usize, error: &StageError) {
        self.records
            .lock()
            .push(FailureRecord::from_error(stage, Some(index), error));
    }

    /// Returns all failures in recording order.
    #[must_use]
    pub fn failures(&self) -> Vec<FailureRecord> {
        self.records.lock().clone()
    }

    /// Returns the failures of one stage.
    #[must_use]
    pub fn for_stage(&self, stage: &str) -> Vec<FailureRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.stage == stage)
            .cloned()
            .collect()
    }

    /// Returns the number of failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if nothing failed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ExternalCallError, ValidationError};
    use std::time::Duration;

    #[test]
    fn test_collects_stage_and_item_failures() {
        let collector = FailureCollector::new();
        collector.record_item("validate", 4, &ExternalCallError::timeout("validate", Duration::from_secs(1)).into());
        collector.record_stage("report", &StageError::fatal("report", "boom"));

        let failures = collector.failures();
        assert_eq!(collector.len(), 2);
        assert_eq!(failures[0].item_index, Some(4));
        assert!(failures[0].recoverable);
        assert_eq!(failures[1].error_type, "FatalStageError");
        assert!(!failures[1].recoverable);
    }

    #[test]
    fn test_for_stage() {
        let collector = FailureCollector::new();
        assert!(collector.is_empty());
        collector.record_item("format", 0, &ValidationError::new("no name").into());
        collector.record_item("validate", 1, &ValidationError::new("bad").into());

        assert_eq!(collector.for_stage("format").len(), 1);
        assert!(collector.for_stage("report").is_empty());
    }
}

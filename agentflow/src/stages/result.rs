//! Stage results and execution records.

use crate::core::{StageKind, StageStatus};
use crate::errors::StageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one unit of work: a value or the error that replaced it.
#[derive(Debug, Clone)]
pub enum StageResult<T> {
    /// The work produced a value.
    Success(T),
    /// The work failed.
    Failure(StageError),
}

impl<T> StageResult<T> {
    /// Returns true for a success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns the value, dropping a failure.
    pub fn success(self) -> Option<T> {
        match self {
            Self::Success(value) => Some(value),
            Self::Failure(_) => None,
        }
    }

    /// Returns the error of a failure.
    #[must_use]
    pub fn failure(&self) -> Option<&StageError> {
        match self {
            Self::Success(_) => None,
            Self::Failure(error) => Some(error),
        }
    }

    /// Converts into a standard `Result`.
    pub fn into_result(self) -> Result<T, StageError> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure(error) => Err(error),
        }
    }
}

impl<T> From<Result<T, StageError>> for StageResult<T> {
    fn from(result: Result<T, StageError>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(error) => Self::Failure(error),
        }
    }
}

/// Record of one stage execution, kept in the run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Stage name.
    pub stage: String,
    /// Stage kind.
    pub kind: StageKind,
    /// How the execution ended.
    pub status: StageStatus,
    /// Retry loop pass the stage ran in, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    /// When the stage started.
    pub started_at: DateTime<Utc>,
    /// When the stage ended.
    pub ended_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: f64,
    /// Error message if the stage degraded or failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageRecord {
    /// Creates a record for a finished stage.
    #[must_use]
    pub fn new(
        stage: impl Into<String>,
        kind: StageKind,
        status: StageStatus,
        started_at: DateTime<Utc>,
    ) -> Self {
        let ended_at = Utc::now();
        #[allow(clippy::cast_precision_loss)]
        let duration_ms = (ended_at - started_at).num_microseconds().unwrap_or(0) as f64 / 1000.0;
        Self {
            stage: stage.into(),
            kind,
            status,
            iteration: None,
            started_at,
            ended_at,
            duration_ms,
            error: None,
        }
    }

    /// Sets the loop iteration.
    #[must_use]
    pub fn with_iteration(mut self, iteration: Option<u32>) -> Self {
        self.iteration = iteration;
        self
    }

    /// Sets the error message.
    #[must_use]
    pub fn with_error(mut self, error: &StageError) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ValidationError;

    #[test]
    fn test_stage_result_conversions() {
        let ok: StageResult<u32> = Ok(3).into();
        assert!(ok.is_success());
        assert_eq!(ok.success(), Some(3));

        let failed: StageResult<u32> = Err(ValidationError::new("bad").into()).into();
        assert!(!failed.is_success());
        assert!(failed.failure().is_some());
        assert!(failed.into_result().is_err());
    }

    #[test]
    fn test_stage_record() {
        let record = StageRecord::new("fix", StageKind::Work, StageStatus::Degraded, Utc::now())
            .with_iteration(Some(1))
            .with_error(&StageError::fatal("fix", "boom"));

        assert_eq!(record.iteration, Some(1));
        assert!(record.duration_ms >= 0.0);
        assert!(record.error.unwrap().contains("boom"));
    }
}

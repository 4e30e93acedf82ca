//! Stage status and kind enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The role a stage plays in a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// A single unit of work, usually delegating to a collaborator.
    #[default]
    Work,
    /// A fan-out over a batch of items.
    FanOut,
    /// Ranks and buckets a batch of analysis records.
    Consolidate,
    /// An ordered list of nested stages.
    Sequence,
    /// A bounded retry loop with a synthesis stage.
    Loop,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Work => write!(f, "work"),
            Self::FanOut => write!(f, "fan_out"),
            Self::Consolidate => write!(f, "consolidate"),
            Self::Sequence => write!(f, "sequence"),
            Self::Loop => write!(f, "loop"),
        }
    }
}

impl StageKind {
    /// Returns true for kinds that only orchestrate nested stages.
    #[must_use]
    pub fn is_composite(self) -> bool {
        matches!(self, Self::Sequence | Self::Loop)
    }
}

/// How a stage execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage completed successfully.
    Ok,
    /// Stage failed recoverably and produced its degraded output.
    Degraded,
    /// Stage failed and halted the pipeline.
    Failed,
    /// Stage was cancelled.
    Cancelled,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Degraded => write!(f, "degraded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl StageStatus {
    /// Returns true if the pipeline may continue after this status.
    #[must_use]
    pub fn allows_continuation(&self) -> bool {
        matches!(self, Self::Ok | Self::Degraded)
    }

    /// Returns true if the status indicates failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled)
    }
}

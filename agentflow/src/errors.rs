//! Error types for the agentflow orchestrator.
//!
//! The taxonomy separates errors by how they propagate:
//!
//! - [`ConfigurationError`] is fatal and only ever raised while constructing
//!   components, never while a run is in flight.
//! - [`ValidationError`] marks a malformed item; the item is dropped from its
//!   batch and the batch carries on.
//! - [`ExternalCallError`] is a timeout or failure of an opaque collaborator
//!   call. It is recoverable: the item or stage degrades instead of aborting.
//! - [`StageError`] is what a stage returns; it wraps the above plus the
//!   non-recoverable `Fatal` and `Cancelled` cases.
//! - [`PersistenceError`] is returned by the session persistence boundary.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// The umbrella error type for agentflow operations.
#[derive(Debug, Error)]
pub enum AgentflowError {
    /// A component was misconfigured.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// A stage failed.
    #[error("{0}")]
    Stage(#[from] StageError),

    /// The persistence boundary failed.
    #[error("{0}")]
    Persistence(#[from] PersistenceError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "CONFIG-001-WEIGHTS").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("code".to_string(), serde_json::json!(self.code));
        map.insert("summary".to_string(), serde_json::json!(self.summary));
        if let Some(ref hint) = self.fix_hint {
            map.insert("fix_hint".to_string(), serde_json::json!(hint));
        }
        if !self.context.is_empty() {
            map.insert("context".to_string(), serde_json::json!(self.context));
        }
        map
    }
}

/// Error raised when a component is constructed with an invalid configuration.
#[derive(Debug, Clone, Error)]
#[error("Configuration error: {message}")]
pub struct ConfigurationError {
    /// The error message.
    pub message: String,
    /// The offending field, if one can be named.
    pub field: Option<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl ConfigurationError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: None,
            error_info: None,
        }
    }

    /// Sets the offending field.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!("ConfigurationError"));
        map.insert("message".to_string(), serde_json::json!(self.message));
        if let Some(ref field) = self.field {
            map.insert("field".to_string(), serde_json::json!(field));
        }
        if let Some(ref info) = self.error_info {
            let info_map: serde_json::Map<String, serde_json::Value> =
                info.to_dict().into_iter().collect();
            map.insert("error_info".to_string(), serde_json::Value::Object(info_map));
        }
        map
    }
}

/// Error raised when an item is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid item{}: {reason}", item.as_ref().map(|i| format!(" '{i}'")).unwrap_or_default())]
pub struct ValidationError {
    /// Identity of the offending item, when it has one.
    pub item: Option<String>,
    /// Why the item was rejected.
    pub reason: String,
}

impl ValidationError {
    /// Creates a validation error without an item identity.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            item: None,
            reason: reason.into(),
        }
    }

    /// Creates a validation error for a named item.
    #[must_use]
    pub fn for_item(item: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            item: Some(item.into()),
            reason: reason.into(),
        }
    }
}

/// Failure of an opaque collaborator call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExternalCallError {
    /// The call did not complete within its timeout.
    #[error("Call '{call}' timed out after {timeout_ms}ms")]
    Timeout {
        /// The call that timed out.
        call: String,
        /// The timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// The collaborator reported a failure.
    #[error("Call '{call}' failed: {reason}")]
    Failed {
        /// The failing call.
        call: String,
        /// The reason for failure.
        reason: String,
    },

    /// The collaborator answered with a payload that could not be used.
    #[error("Call '{call}' returned a malformed payload: {reason}")]
    Malformed {
        /// The call that returned the payload.
        call: String,
        /// What was wrong with it.
        reason: String,
    },
}

impl ExternalCallError {
    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(call: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            call: call.into(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Creates a failed-call error.
    #[must_use]
    pub fn failed(call: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            call: call.into(),
            reason: reason.into(),
        }
    }

    /// Creates a malformed-payload error.
    #[must_use]
    pub fn malformed(call: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            call: call.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this is a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Error returned by a stage.
#[derive(Debug, Clone, Error)]
pub enum StageError {
    /// The stage rejected malformed input.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// The stage's external call failed or timed out.
    #[error("{0}")]
    ExternalCall(#[from] ExternalCallError),

    /// The stage failed in a way the pipeline cannot recover from.
    #[error("Stage '{stage}' failed: {message}")]
    Fatal {
        /// The failing stage.
        stage: String,
        /// The failure message.
        message: String,
    },

    /// The run was cancelled while the stage was pending or in flight.
    #[error("Stage '{stage}' cancelled: {reason}")]
    Cancelled {
        /// The stage that observed the cancellation.
        stage: String,
        /// The cancellation reason.
        reason: String,
    },
}

impl StageError {
    /// Creates a fatal stage error.
    #[must_use]
    pub fn fatal(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fatal {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Cancelled {
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the pipeline may continue with a degraded output.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::ExternalCall(_))
    }

    /// Returns true if this error was caused by cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns the taxonomy name of the error.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::ExternalCall(_) => "ExternalCallError",
            Self::Fatal { .. } => "FatalStageError",
            Self::Cancelled { .. } => "Cancelled",
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(self.error_type()));
        map.insert("recoverable".to_string(), serde_json::json!(self.is_recoverable()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// Errors from the session persistence boundary.
#[derive(Debug, Clone, Error)]
pub enum PersistenceError {
    /// No persisted run exists for the id.
    #[error("Run not found: {run_id}")]
    NotFound {
        /// The requested run id.
        run_id: String,
    },

    /// Persisted state could not be encoded or decoded.
    #[error("Persisted state is unreadable: {0}")]
    Serialization(String),

    /// The backing store reported a failure.
    #[error("Session backend error: {0}")]
    Backend(String),
}

impl PersistenceError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(run_id: impl ToString) -> Self {
        Self::NotFound {
            run_id: run_id.to_string(),
        }
    }

    /// Returns true if the run was not found.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Error codes used in [`ContractErrorInfo`] for configuration failures.
pub struct ConfigurationCodes;

impl ConfigurationCodes {
    /// Scoring weights do not sum to 1.0.
    pub const WEIGHTS: &'static str = "CONFIG-001-WEIGHTS";
    /// Bucket thresholds are out of range or inverted.
    pub const THRESHOLDS: &'static str = "CONFIG-002-THRESHOLDS";
    /// A limit (timeout, iterations, concurrency) is zero.
    pub const LIMITS: &'static str = "CONFIG-003-LIMITS";
    /// A pipeline was built without stages.
    pub const EMPTY: &'static str = "CONFIG-004-EMPTY";
    /// Two stages in one pipeline share a name.
    pub const DUPLICATE: &'static str = "CONFIG-005-DUPLICATE";
    /// The log level is not recognised.
    pub const LOGGING: &'static str = "CONFIG-006-LOGGING";

    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn suggestion(code: &str) -> Option<&'static str> {
        match code {
            Self::WEIGHTS => Some("Adjust the weights so that they add up to exactly 1.0."),
            Self::THRESHOLDS => {
                Some("Keep both thresholds in [0, 1] with the high threshold above the medium one.")
            }
            Self::LIMITS => Some("Timeouts, iteration caps and concurrency caps must be positive."),
            Self::EMPTY => Some("Add at least one stage to the pipeline before building."),
            Self::DUPLICATE => Some("Give every stage in a pipeline a unique name."),
            Self::LOGGING => Some("Use one of DEBUG, INFO, WARNING, ERROR or CRITICAL."),
            _ => None,
        }
    }
}

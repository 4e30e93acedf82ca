//! Stage output type with factory methods.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The value a stage produced.
///
/// The orchestrator stores `value` under the stage's output key. A degraded
/// output is the stand-in a stage produces after a recoverable failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StageOutput {
    /// The output value.
    #[serde(default)]
    pub value: serde_json::Value,

    /// Whether this output replaces a failed computation.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,

    /// Additional metadata (iteration counts, exit reasons, batch sizes).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl StageOutput {
    /// Creates a successful output.
    #[must_use]
    pub fn ok(value: serde_json::Value) -> Self {
        Self {
            value,
            degraded: false,
            metadata: HashMap::new(),
        }
    }

    /// Creates a successful output with a null value.
    #[must_use]
    pub fn empty() -> Self {
        Self::ok(serde_json::Value::Null)
    }

    /// Creates a degraded output.
    #[must_use]
    pub fn degraded(value: serde_json::Value) -> Self {
        Self {
            value,
            degraded: true,
            metadata: HashMap::new(),
        }
    }

    /// Serializes a typed value into a successful output.
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::ok(serde_json::to_value(value)?))
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Gets a metadata entry.
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ok_output() {
        let output = StageOutput::ok(json!({"count": 3}));
        assert!(!output.degraded);
        assert_eq!(output.value["count"], 3);
    }

    #[test]
    fn test_degraded_output() {
        let output = StageOutput::degraded(json!([])).with_metadata("reason", json!("timeout"));
        assert!(output.degraded);
        assert_eq!(output.metadata_value("reason"), Some(&json!("timeout")));
    }

    #[test]
    fn test_serialization_skips_defaults() {
        let json = serde_json::to_string(&StageOutput::ok(json!(1))).unwrap();
        assert_eq!(json, r#"{"value":1}"#);
    }
}

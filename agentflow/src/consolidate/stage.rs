//! A stage that consolidates a state-held batch of analyzed records.

use super::consolidator::{Consolidation, Consolidator};
use crate::context::StageContext;
use crate::core::{StageKind, StageOutput};
use crate::errors::{StageError, ValidationError};
use crate::stages::Stage;
use async_trait::async_trait;
use serde_json::Value;

/// Scores, ranks and buckets the records found under `input_key`.
///
/// An absent input is an empty batch.
#[derive(Debug, Clone)]
pub struct ConsolidateStage {
    name: String,
    input_key: String,
    output_key: String,
    consolidator: Consolidator,
}

impl ConsolidateStage {
    /// Creates a consolidation stage with the given consolidator.
    pub fn new(
        name: impl Into<String>,
        input_key: impl Into<String>,
        output_key: impl Into<String>,
        consolidator: Consolidator,
    ) -> Self {
        Self {
            name: name.into(),
            input_key: input_key.into(),
            output_key: output_key.into(),
            consolidator,
        }
    }

    /// Returns the consolidator.
    #[must_use]
    pub fn consolidator(&self) -> &Consolidator {
        &self.consolidator
    }
}

#[async_trait]
impl Stage for ConsolidateStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Consolidate
    }

    fn output_key(&self) -> Option<&str> {
        Some(&self.output_key)
    }

    fn degraded_output(&self, _error: &StageError) -> Value {
        serde_json::to_value(Consolidation::<Value>::empty()).unwrap_or(Value::Null)
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let records = match ctx.state().get_opt(&self.input_key) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(records)) => records,
            Some(other) => {
                return Err(ValidationError::new(format!(
                    "'{}' holds {} instead of a list of records",
                    self.input_key,
                    json_kind(&other)
                ))
                .into())
            }
        };

        let consolidation = self.consolidator.consolidate(records);
        let counts = consolidation.counts;
        let value = serde_json::to_value(&consolidation)
            .map_err(|e| StageError::fatal(&self.name, format!("unserializable consolidation: {e}")))?;

        Ok(StageOutput::ok(value)
            .with_metadata("total_valid", serde_json::json!(counts.total_valid))
            .with_metadata("high", serde_json::json!(counts.high)))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

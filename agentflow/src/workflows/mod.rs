//! Reference pipelines assembled from the orchestrator's building blocks.
//!
//! Each workflow takes its collaborators (the calls that decide what a stage
//! computes) and returns a validated pipeline ready for a
//! [`PipelineRunner`](crate::pipeline::PipelineRunner).
//!
//! - [`leads`]: lead discovery, paired analysis and prioritized report
//! - [`patterns`]: company discovery, validation and pattern synthesis
//! - [`code_fix`]: code review followed by a bounded fix loop

pub mod code_fix;
pub mod leads;
pub mod patterns;

use crate::context::StageContext;
use crate::errors::{ExternalCallError, StageError, ValidationError};
use crate::items::{optional_str, required_str, Item};
use crate::stages::StageFunction;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;

/// A collaborator call exchanging JSON payloads.
pub type Collaborator = Arc<dyn StageFunction<Value, Value>>;

/// Adapts a [`Collaborator`] to typed input by serializing it first.
pub struct JsonCall<I> {
    inner: Collaborator,
    _input: PhantomData<fn(I)>,
}

impl<I> JsonCall<I> {
    /// Wraps a collaborator.
    #[must_use]
    pub fn new(inner: Collaborator) -> Self {
        Self {
            inner,
            _input: PhantomData,
        }
    }
}

impl<I> Debug for JsonCall<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonCall").field("inner", &self.inner.name()).finish()
    }
}

#[async_trait]
impl<I> StageFunction<I, Value> for JsonCall<I>
where
    I: Serialize + Send + 'static,
{
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn call(&self, input: I) -> Result<Value, StageError> {
        let payload = serde_json::to_value(&input)
            .map_err(|e| ExternalCallError::malformed(self.inner.name(), format!("unserializable input: {e}")))?;
        self.inner.call(payload).await
    }
}

/// A company as discovered by a search collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    /// Company name; its identity.
    pub name: String,
    /// Industry, or empty.
    #[serde(default)]
    pub industry: String,
    /// Country, or empty.
    #[serde(default)]
    pub country: String,
    /// Website, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    /// Free-text description, or empty.
    #[serde(default)]
    pub description: String,
    /// Why the company is considered successful, when reported.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub success_factors: Vec<String>,
}

impl Item for Company {
    fn identity(&self) -> &str {
        &self.name
    }
}

/// Parses a raw search record into a [`Company`].
///
/// # Errors
///
/// Returns a [`ValidationError`] if the record has no name.
pub fn parse_company(record: &Value) -> Result<Company, ValidationError> {
    let name = required_str(record, "name")?.to_string();
    let website = Some(optional_str(record, "website")).filter(|w| !w.is_empty());
    let success_factors = record
        .get("success_factors")
        .and_then(Value::as_array)
        .map(|factors| {
            factors
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(Company {
        name,
        industry: optional_str(record, "industry"),
        country: optional_str(record, "country"),
        website,
        description: optional_str(record, "description"),
        success_factors,
    })
}

/// Reads a JSON array from state. An absent or null key is an empty batch.
pub(crate) fn batch_from_state(ctx: &StageContext, key: &str) -> Result<Vec<Value>, StageError> {
    match ctx.state().get_opt(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(records)) => Ok(records),
        Some(_) => Err(ValidationError::new(format!("'{key}' does not hold a list of records")).into()),
    }
}

/// Reads a numeric field, accepting integers and floats.
pub(crate) fn number(value: &Value, field: &str) -> Option<f64> {
    value.get(field).and_then(Value::as_f64)
}

/// Deserializes a collaborator answer, mapping shape errors to a malformed
/// payload.
pub(crate) fn parse_answer<T: serde::de::DeserializeOwned>(
    call: &str,
    value: Value,
) -> Result<T, StageError> {
    serde_json::from_value(value).map_err(|e| ExternalCallError::malformed(call, e.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::stage_fn;
    use serde_json::json;

    #[derive(Serialize)]
    struct Probe {
        name: String,
    }

    #[tokio::test]
    async fn test_json_call_serializes_input() {
        let echo: Collaborator = stage_fn("echo", |v: Value| async move { Ok::<_, StageError>(v) });
        let call = JsonCall::<Probe>::new(echo);

        let out = call.call(Probe { name: "Acme".into() }).await.unwrap();

        assert_eq!(out, json!({"name": "Acme"}));
        assert_eq!(call.name(), "echo");
    }

    #[test]
    fn test_parse_company_reads_optional_fields() {
        let company = parse_company(&json!({
            "name": " Acme ",
            "industry": "Logistics",
            "website": "",
            "success_factors": ["network effects", 3]
        }))
        .unwrap();

        assert_eq!(company.name, "Acme");
        assert_eq!(company.industry, "Logistics");
        assert_eq!(company.website, None);
        assert_eq!(company.success_factors, vec!["network effects"]);
        assert!(parse_company(&json!({"industry": "Retail"})).is_err());
    }

    #[test]
    fn test_parse_answer_malformed() {
        let err = parse_answer::<Probe2>("synth", json!({"other": 1})).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[derive(Debug, serde::Deserialize)]
    #[allow(dead_code)]
    struct Probe2 {
        name: String,
    }
}

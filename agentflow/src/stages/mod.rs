//! Stage trait and implementations.
//!
//! Stages are the units of work of a pipeline. A stage reads what it needs
//! from the state store, records writes on its [`StageActions`], and returns
//! a value the orchestrator stores under its output key.
//!
//! [`StageActions`]: crate::context::StageActions

mod external;
mod result;

pub use external::{call_with_timeout, stage_fn, CallStage, FnCall, StageFunction};
pub use result::{StageRecord, StageResult};

use crate::context::StageContext;
use crate::core::{StageKind, StageOutput};
use crate::errors::StageError;
use async_trait::async_trait;
use std::fmt::Debug;

/// Trait for pipeline stages.
///
/// Sequences, fan-outs and retry loops implement this trait too, so any of
/// them can be nested where a stage is expected.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Returns the kind of the stage.
    fn kind(&self) -> StageKind {
        StageKind::Work
    }

    /// Returns the session key the stage's output is stored under, if any.
    fn output_key(&self) -> Option<&str> {
        None
    }

    /// Returns the value stored in place of the output after a recoverable
    /// failure.
    fn degraded_output(&self, _error: &StageError) -> serde_json::Value {
        serde_json::Value::Null
    }

    /// Executes the stage.
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError>;
}

/// A stage backed by a synchronous closure.
pub struct FnStage<F>
where
    F: Fn(&StageContext) -> Result<StageOutput, StageError> + Send + Sync,
{
    name: String,
    output_key: Option<String>,
    degraded: serde_json::Value,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&StageContext) -> Result<StageOutput, StageError> + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            output_key: None,
            degraded: serde_json::Value::Null,
            func,
        }
    }

    /// Stores the output under the given key.
    #[must_use]
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    /// Sets the degraded output.
    #[must_use]
    pub fn with_degraded_output(mut self, value: serde_json::Value) -> Self {
        self.degraded = value;
        self
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&StageContext) -> Result<StageOutput, StageError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage")
            .field("name", &self.name)
            .field("output_key", &self.output_key)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&StageContext) -> Result<StageOutput, StageError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn output_key(&self) -> Option<&str> {
        self.output_key.as_deref()
    }

    fn degraded_output(&self, _error: &StageError) -> serde_json::Value {
        self.degraded.clone()
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        (self.func)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RunContext, RunIdentity, StateStore};
    use crate::errors::ValidationError;
    use serde_json::json;
    use std::sync::Arc;

    fn test_stage_context(store: StateStore) -> StageContext {
        let run = Arc::new(RunContext::new(RunIdentity::new("tester"), Arc::new(store)));
        StageContext::new(run, "test")
    }

    #[tokio::test]
    async fn test_fn_stage_reads_state_and_records_writes() {
        let stage = FnStage::new("double", |ctx| {
            let n = ctx.state().get_as::<i64>("n", 0);
            ctx.actions().set("temp:seen", json!(true));
            Ok(StageOutput::ok(json!(n * 2)))
        })
        .with_output_key("doubled");

        let ctx = test_stage_context(StateStore::from_entries([("n", json!(21))]));
        let output = stage.execute(&ctx).await.unwrap();

        assert_eq!(stage.name(), "double");
        assert_eq!(stage.output_key(), Some("doubled"));
        assert_eq!(stage.kind(), StageKind::Work);
        assert_eq!(output.value, json!(42));
        assert_eq!(ctx.actions().pending().get("temp:seen"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_fn_stage_degraded_output() {
        let stage = FnStage::new("report", |_ctx| Err(ValidationError::new("nothing to report").into()))
            .with_degraded_output(json!({"leads": []}));

        let ctx = test_stage_context(StateStore::new());
        let err = stage.execute(&ctx).await.unwrap_err();

        assert!(err.is_recoverable());
        assert_eq!(stage.degraded_output(&err), json!({"leads": []}));
    }
}

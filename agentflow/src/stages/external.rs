//! The external call boundary.
//!
//! Stage logic that lives outside the orchestrator (a model call, a scoring
//! service) is modelled as a [`StageFunction`]: structured input in,
//! structured output or a typed failure out. Calls are always awaited with a
//! timeout and never retried here.

use super::Stage;
use crate::context::StageContext;
use crate::core::StageOutput;
use crate::errors::{ExternalCallError, StageError};
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// An opaque collaborator call.
#[async_trait]
pub trait StageFunction<I, O>: Send + Sync
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Returns the name used in logs and timeout errors.
    fn name(&self) -> &str;

    /// Performs the call.
    async fn call(&self, input: I) -> Result<O, StageError>;
}

/// Awaits a collaborator call, failing with [`ExternalCallError::Timeout`]
/// if it does not finish in time.
pub async fn call_with_timeout<I, O, F>(function: &F, input: I, timeout: Duration) -> Result<O, StageError>
where
    I: Send + 'static,
    O: Send + 'static,
    F: StageFunction<I, O> + ?Sized,
{
    if let Ok(result) = tokio::time::timeout(timeout, function.call(input)).await {
        result
    } else {
        warn!(call = function.name(), timeout = ?timeout, "External call timed out");
        Err(ExternalCallError::timeout(function.name(), timeout).into())
    }
}

/// A [`StageFunction`] backed by an async closure.
pub struct FnCall<F> {
    name: String,
    func: F,
}

impl<F> FnCall<F> {
    /// Wraps a closure.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnCall<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCall").field("name", &self.name).finish_non_exhaustive()
    }
}

#[async_trait]
impl<I, O, F, Fut> StageFunction<I, O> for FnCall<F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, StageError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, input: I) -> Result<O, StageError> {
        (self.func)(input).await
    }
}

/// Wraps an async closure as a shareable [`StageFunction`].
pub fn stage_fn<I, O, F, Fut>(name: impl Into<String>, func: F) -> Arc<dyn StageFunction<I, O>>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, StageError>> + Send + 'static,
{
    Arc::new(FnCall::new(name, func))
}

/// A stage that hands selected state keys to a collaborator and stores the
/// answer.
///
/// The collaborator receives a JSON object mapping each input key to its
/// current value (null when absent).
pub struct CallStage {
    name: String,
    input_keys: Vec<String>,
    output_key: String,
    function: Arc<dyn StageFunction<serde_json::Value, serde_json::Value>>,
    degraded: serde_json::Value,
}

impl CallStage {
    /// Creates a call stage writing to `output_key`.
    pub fn new(
        name: impl Into<String>,
        output_key: impl Into<String>,
        function: Arc<dyn StageFunction<serde_json::Value, serde_json::Value>>,
    ) -> Self {
        Self {
            name: name.into(),
            input_keys: Vec::new(),
            output_key: output_key.into(),
            function,
            degraded: serde_json::Value::Null,
        }
    }

    /// Adds state keys passed to the collaborator.
    #[must_use]
    pub fn with_inputs(mut self, keys: &[&str]) -> Self {
        self.input_keys.extend(keys.iter().map(|k| (*k).to_string()));
        self
    }

    /// Sets the degraded output.
    #[must_use]
    pub fn with_degraded_output(mut self, value: serde_json::Value) -> Self {
        self.degraded = value;
        self
    }
}

impl Debug for CallStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallStage")
            .field("name", &self.name)
            .field("input_keys", &self.input_keys)
            .field("output_key", &self.output_key)
            .field("function", &self.function.name())
            .finish()
    }
}

#[async_trait]
impl Stage for CallStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_key(&self) -> Option<&str> {
        Some(&self.output_key)
    }

    fn degraded_output(&self, _error: &StageError) -> serde_json::Value {
        self.degraded.clone()
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let state = ctx.state();
        let input: serde_json::Map<String, serde_json::Value> = self
            .input_keys
            .iter()
            .map(|key| (key.clone(), state.get(key, serde_json::Value::Null)))
            .collect();

        debug!(stage = %self.name, call = self.function.name(), "Calling collaborator");
        let value = call_with_timeout(
            self.function.as_ref(),
            serde_json::Value::Object(input),
            ctx.call_timeout(),
        )
        .await?;
        Ok(StageOutput::ok(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentflowConfig;
    use crate::context::{RunContext, RunIdentity, StateStore};
    use serde_json::json;

    #[tokio::test]
    async fn test_call_with_timeout_passes_result_through() {
        let double = stage_fn("double", |n: u32| async move { Ok::<_, StageError>(n * 2) });
        let out = call_with_timeout(double.as_ref(), 21, Duration::from_secs(1)).await.unwrap();
        assert_eq!(out, 42);
    }

    #[tokio::test]
    async fn test_call_with_timeout_times_out() {
        let slow = stage_fn("slow", |n: u32| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, StageError>(n)
        });

        let err = call_with_timeout(slow.as_ref(), 1, Duration::from_millis(20))
            .await
            .unwrap_err();

        assert!(err.is_recoverable());
        assert!(matches!(
            err,
            StageError::ExternalCall(ExternalCallError::Timeout { ref call, timeout_ms: 20 }) if call == "slow"
        ));
    }

    #[tokio::test]
    async fn test_call_stage_builds_input_from_state() {
        let echo = stage_fn("echo", |input: serde_json::Value| async move {
            Ok::<_, StageError>(input)
        });
        let stage = CallStage::new("review", "review_result", echo).with_inputs(&["code", "missing"]);

        let store = Arc::new(StateStore::from_entries([("code", json!("print(1)"))]));
        let run = Arc::new(
            RunContext::new(RunIdentity::new("u"), store)
                .with_config(AgentflowConfig::default().with_call_timeout(Duration::from_secs(1))),
        );
        let ctx = StageContext::new(run, "review");

        let output = stage.execute(&ctx).await.unwrap();
        assert_eq!(output.value, json!({"code": "print(1)", "missing": null}));
        assert_eq!(stage.output_key(), Some("review_result"));
    }
}

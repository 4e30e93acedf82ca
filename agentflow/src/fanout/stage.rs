//! A stage that fans a state-held batch out to a stage function.

use super::coordinator::{FanOutConfig, FanOutCoordinator};
use crate::context::{ExecutionContext, StageContext};
use crate::core::{StageKind, StageOutput};
use crate::errors::{StageError, ValidationError};
use crate::events::event_types;
use crate::stages::{Stage, StageFunction};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::Arc;

/// Reads a batch of items from `input_key`, runs the function over each item
/// concurrently and stores the successes under `output_key`.
///
/// Failed items are recorded in the run's failure journal. A missing input
/// key is an empty batch.
pub struct FanOutStage<I, O> {
    name: String,
    input_key: String,
    output_key: String,
    function: Arc<dyn StageFunction<I, O>>,
    config: Option<FanOutConfig>,
}

impl<I, O> FanOutStage<I, O> {
    /// Creates a fan-out stage.
    pub fn new(
        name: impl Into<String>,
        input_key: impl Into<String>,
        output_key: impl Into<String>,
        function: Arc<dyn StageFunction<I, O>>,
    ) -> Self {
        Self {
            name: name.into(),
            input_key: input_key.into(),
            output_key: output_key.into(),
            function,
            config: None,
        }
    }

    /// Overrides the run configuration's timeout and concurrency cap.
    #[must_use]
    pub fn with_config(mut self, config: FanOutConfig) -> Self {
        self.config = Some(config);
        self
    }
}

impl<I, O> Debug for FanOutStage<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanOutStage")
            .field("name", &self.name)
            .field("input_key", &self.input_key)
            .field("output_key", &self.output_key)
            .field("function", &self.function.name())
            .finish()
    }
}

#[async_trait]
impl<I, O> Stage for FanOutStage<I, O>
where
    I: DeserializeOwned + Send + Sync + 'static,
    O: Serialize + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::FanOut
    }

    fn output_key(&self) -> Option<&str> {
        Some(&self.output_key)
    }

    fn degraded_output(&self, _error: &StageError) -> serde_json::Value {
        serde_json::json!([])
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let items: Vec<I> = ctx
            .state()
            .try_get_as(&self.input_key)
            .map_err(|e| {
                ValidationError::new(format!("'{}' does not hold a batch of items: {e}", self.input_key))
            })?
            .unwrap_or_default();

        let config = self
            .config
            .unwrap_or_else(|| FanOutConfig::from(ctx.config()));
        let coordinator = FanOutCoordinator::new(&self.name, config)
            .with_cancellation(Arc::clone(ctx.cancellation_token()));

        let outcome = coordinator
            .run_batch_detailed(items, Arc::clone(&self.function))
            .await?;

        let failures = outcome.failures();
        for failure in &failures {
            ctx.run()
                .journal()
                .failures()
                .record_item(&self.name, failure.index, &failure.error);
        }

        let total = outcome.len();
        let duration_ms = outcome.duration.as_secs_f64() * 1000.0;
        ctx.try_emit_event(
            event_types::BATCH_COMPLETED,
            Some(serde_json::json!({
                "total": total,
                "succeeded": total - failures.len(),
                "failed": failures.len(),
                "duration_ms": duration_ms,
            })),
        );

        let successes = outcome.into_successes();
        let value = serde_json::to_value(&successes)
            .map_err(|e| StageError::fatal(&self.name, format!("unserializable batch output: {e}")))?;

        Ok(StageOutput::ok(value)
            .with_metadata("total", serde_json::json!(total))
            .with_metadata("failed", serde_json::json!(failures.len())))
    }
}

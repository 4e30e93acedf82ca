//! Mock stages for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;

use crate::context::StageContext;
use crate::core::StageOutput;
use crate::errors::StageError;
use crate::stages::Stage;

/// A stage that returns queued results in order, then repeats a fallback.
#[derive(Debug)]
pub struct ScriptedStage {
    name: String,
    output_key: Option<String>,
    script: Mutex<VecDeque<Result<Value, StageError>>>,
    fallback: Value,
    calls: Mutex<usize>,
}

impl ScriptedStage {
    /// Creates a scripted stage whose fallback output is `null`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output_key: None,
            script: Mutex::new(VecDeque::new()),
            fallback: Value::Null,
            calls: Mutex::new(0),
        }
    }

    /// Stores outputs under `key`.
    #[must_use]
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    /// Queues a result.
    #[must_use]
    pub fn then(self, result: Result<Value, StageError>) -> Self {
        self.script.lock().push_back(result);
        self
    }

    /// Sets the output returned once the script is exhausted.
    #[must_use]
    pub fn with_fallback(mut self, value: Value) -> Self {
        self.fallback = value;
        self
    }

    /// Returns the number of executions.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_key(&self) -> Option<&str> {
        self.output_key.as_deref()
    }

    async fn execute(&self, _ctx: &StageContext) -> Result<StageOutput, StageError> {
        *self.calls.lock() += 1;
        let next = self.script.lock().pop_front();
        match next {
            Some(result) => result.map(StageOutput::ok),
            None => Ok(StageOutput::ok(self.fallback.clone())),
        }
    }
}

/// A stage that records the loop pass of every execution.
#[derive(Debug)]
pub struct RecordingStage {
    name: String,
    iterations: Mutex<Vec<Option<u32>>>,
}

impl RecordingStage {
    /// Creates a recording stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            iterations: Mutex::new(Vec::new()),
        }
    }

    /// Returns the number of executions.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.iterations.lock().len()
    }

    /// Returns the loop pass of each execution.
    #[must_use]
    pub fn iterations(&self) -> Vec<Option<u32>> {
        self.iterations.lock().clone()
    }
}

#[async_trait]
impl Stage for RecordingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        self.iterations.lock().push(ctx.loop_iteration());
        Ok(StageOutput::empty())
    }
}

/// A stage that always fails with the given error.
#[derive(Debug)]
pub struct FailingStage {
    name: String,
    error: StageError,
    output_key: Option<String>,
    degraded: Value,
}

impl FailingStage {
    /// Creates a stage failing with `error`.
    #[must_use]
    pub fn new(name: impl Into<String>, error: StageError) -> Self {
        Self {
            name: name.into(),
            error,
            output_key: None,
            degraded: Value::Null,
        }
    }

    /// Creates a stage failing non-recoverably.
    #[must_use]
    pub fn fatal(name: impl Into<String>, message: impl Into<String>) -> Self {
        let name = name.into();
        let error = StageError::fatal(&name, message);
        Self::new(name, error)
    }

    /// Stores the degraded output under `key` after a recoverable failure.
    #[must_use]
    pub fn with_degraded_output(mut self, key: impl Into<String>, value: Value) -> Self {
        self.output_key = Some(key.into());
        self.degraded = value;
        self
    }
}

#[async_trait]
impl Stage for FailingStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_key(&self) -> Option<&str> {
        self.output_key.as_deref()
    }

    fn degraded_output(&self, _error: &StageError) -> Value {
        self.degraded.clone()
    }

    async fn execute(&self, _ctx: &StageContext) -> Result<StageOutput, StageError> {
        Err(self.error.clone())
    }
}

/// A stage that sleeps before succeeding.
#[derive(Debug)]
pub struct SlowStage {
    name: String,
    delay: Duration,
}

impl SlowStage {
    /// Creates a slow stage.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
        }
    }
}

#[async_trait]
impl Stage for SlowStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> Result<StageOutput, StageError> {
        tokio::time::sleep(self.delay).await;
        Ok(StageOutput::empty())
    }
}

/// A stage that escalates on a chosen loop pass (0-based).
#[derive(Debug)]
pub struct EscalatingStage {
    name: String,
    on_iteration: Option<u32>,
    calls: Mutex<usize>,
}

impl EscalatingStage {
    /// Escalates on pass `iteration`.
    #[must_use]
    pub fn on_iteration(name: impl Into<String>, iteration: u32) -> Self {
        Self {
            name: name.into(),
            on_iteration: Some(iteration),
            calls: Mutex::new(0),
        }
    }

    /// Never escalates.
    #[must_use]
    pub fn never(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            on_iteration: None,
            calls: Mutex::new(0),
        }
    }

    /// Returns the number of executions.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl Stage for EscalatingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        *self.calls.lock() += 1;
        if self.on_iteration.is_some() && ctx.loop_iteration() == self.on_iteration {
            ctx.actions().escalate();
        }
        Ok(StageOutput::empty())
    }
}

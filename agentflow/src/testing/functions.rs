//! Mock stage functions.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;

use crate::errors::{ExternalCallError, StageError};
use crate::stages::StageFunction;

/// A collaborator stand-in that answers with a function of its input.
///
/// Inputs listed as failing are answered with
/// [`ExternalCallError::Failed`]; the answer is delayed by `latency`.
pub struct MockFunction {
    name: String,
    respond: Box<dyn Fn(&Value) -> Value + Send + Sync>,
    failing: HashSet<String>,
    latency: Duration,
    calls: Mutex<Vec<Value>>,
}

impl MockFunction {
    /// Creates a mock answering with `respond(input)`.
    pub fn new<F>(name: impl Into<String>, respond: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            respond: Box::new(respond),
            failing: HashSet::new(),
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Creates a mock that echoes its input.
    #[must_use]
    pub fn echo(name: impl Into<String>) -> Self {
        Self::new(name, Value::clone)
    }

    /// Fails for inputs whose `name` field equals `name`.
    #[must_use]
    pub fn failing_for(mut self, name: impl Into<String>) -> Self {
        self.failing.insert(name.into());
        self
    }

    /// Delays every answer.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Returns every input received, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().clone()
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl std::fmt::Debug for MockFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockFunction")
            .field("name", &self.name)
            .field("failing", &self.failing)
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StageFunction<Value, Value> for MockFunction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, input: Value) -> Result<Value, StageError> {
        self.calls.lock().push(input.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let key = input.get("name").and_then(Value::as_str).unwrap_or_default();
        if self.failing.contains(key) {
            return Err(ExternalCallError::failed(&self.name, format!("scripted failure for '{key}'")).into());
        }
        Ok((self.respond)(&input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_function_fails_for_listed_names() {
        let mock = MockFunction::echo("validate").failing_for("Initech");

        assert_eq!(mock.call(json!({"name": "Acme"})).await.unwrap(), json!({"name": "Acme"}));
        assert!(mock.call(json!({"name": "Initech"})).await.unwrap_err().is_recoverable());
        assert_eq!(mock.call_count(), 2);
    }
}

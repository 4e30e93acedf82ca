//! Bounded retry loop with an escalate exit and a synthesis stage.

use super::executor::run_stage;
use super::sequential::run_stages;
use crate::config::AgentflowConfig;
use crate::context::{ExecutionContext, StageContext, ESCALATE_KEY};
use crate::core::{StageKind, StageOutput};
use crate::errors::{ConfigurationCodes, ConfigurationError, ContractErrorInfo, StageError};
use crate::events::event_types;
use crate::stages::Stage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Why a retry loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// A stage in the body raised the escalate signal.
    Escalated,
    /// The pass cap was reached.
    MaxIterations,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Escalated => write!(f, "escalated"),
            Self::MaxIterations => write!(f, "max_iterations"),
        }
    }
}

/// Retry loop state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// About to run the pass with this 0-based index.
    Running(u32),
    /// The loop is done.
    Exited(ExitReason),
}

impl LoopState {
    /// The state a loop starts in.
    #[must_use]
    pub fn initial() -> Self {
        Self::Running(0)
    }

    /// Transitions after a completed pass.
    ///
    /// Escalation wins over the cap. An exited state stays exited.
    #[must_use]
    pub fn advance(self, escalated: bool, max_iterations: u32) -> Self {
        match self {
            Self::Running(_) if escalated => Self::Exited(ExitReason::Escalated),
            Self::Running(iteration) if iteration + 1 >= max_iterations => {
                Self::Exited(ExitReason::MaxIterations)
            }
            Self::Running(iteration) => Self::Running(iteration + 1),
            exited @ Self::Exited(_) => exited,
        }
    }

    /// Returns true once the loop has exited.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Exited(_))
    }
}

/// How one retry loop execution ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopOutcome {
    /// Name of the loop.
    pub loop_name: String,
    /// Passes completed.
    pub iterations: u32,
    /// Why the loop stopped.
    pub exit_reason: ExitReason,
}

/// Runs a body of stages up to `max_iterations` times, then a synthesis stage
/// exactly once.
///
/// Any body stage may escalate to end the loop after the current pass. The
/// escalate flag is reset when the loop starts and consumed when it exits, so
/// an enclosing loop only sees escalations raised by its own stages.
#[derive(Debug, Clone)]
pub struct RetryLoop {
    name: String,
    body: Vec<Arc<dyn Stage>>,
    synthesis: Arc<dyn Stage>,
    max_iterations: u32,
    output_key: Option<String>,
}

impl RetryLoop {
    /// Creates a retry loop.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if the body is empty or
    /// `max_iterations` is zero.
    pub fn new(
        name: impl Into<String>,
        body: Vec<Arc<dyn Stage>>,
        synthesis: Arc<dyn Stage>,
        max_iterations: u32,
    ) -> Result<Self, ConfigurationError> {
        let name = name.into();
        if max_iterations == 0 {
            return Err(ConfigurationError::new(format!("Loop '{name}' allows no iterations"))
                .with_field("max_iterations")
                .with_error_info(ContractErrorInfo::new(
                    ConfigurationCodes::LIMITS,
                    "max_iterations must be at least 1",
                )));
        }
        if body.is_empty() {
            return Err(ConfigurationError::new(format!("Loop '{name}' has an empty body"))
                .with_field("body")
                .with_error_info(ContractErrorInfo::new(
                    ConfigurationCodes::EMPTY,
                    "A retry loop needs at least one body stage",
                )));
        }

        Ok(Self {
            name,
            body,
            synthesis,
            max_iterations,
            output_key: None,
        })
    }

    /// Creates a retry loop capped by the configured `max_iterations`.
    ///
    /// # Errors
    ///
    /// See [`RetryLoop::new`].
    pub fn from_config(
        name: impl Into<String>,
        body: Vec<Arc<dyn Stage>>,
        synthesis: Arc<dyn Stage>,
        config: &AgentflowConfig,
    ) -> Result<Self, ConfigurationError> {
        Self::new(name, body, synthesis, config.max_iterations)
    }

    /// Stores the loop summary under `key`.
    #[must_use]
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    /// Returns the pass cap.
    #[must_use]
    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }
}

#[async_trait]
impl Stage for RetryLoop {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Loop
    }

    fn output_key(&self) -> Option<&str> {
        self.output_key.as_deref()
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let run = ctx.run();
        run.store().set(ESCALATE_KEY, json!(false));

        let mut state = LoopState::initial();
        let mut iterations = 0;
        let mut degraded = false;
        let exit_reason = loop {
            let iteration = match state {
                LoopState::Exited(reason) => break reason,
                LoopState::Running(iteration) => iteration,
            };
            if run.is_cancelled() {
                return Err(StageError::cancelled(
                    &self.name,
                    run.cancellation_token().reason_or_default(),
                ));
            }

            let pass = run_stages(&self.body, run, Some(iteration)).await?;
            iterations = iteration + 1;
            degraded |= pass.degraded;
            info!(
                loop_name = %self.name,
                iteration,
                escalated = pass.escalated,
                "Retry loop pass completed"
            );
            ctx.try_emit_event(
                event_types::LOOP_ITERATION,
                Some(json!({ "iteration": iteration, "escalated": pass.escalated })),
            );
            state = state.advance(pass.escalated, self.max_iterations);
        };

        if exit_reason == ExitReason::Escalated {
            run.store().set(ESCALATE_KEY, json!(false));
        }

        info!(loop_name = %self.name, iterations, exit_reason = %exit_reason, "Retry loop exited");
        ctx.try_emit_event(
            event_types::LOOP_EXITED,
            Some(json!({ "iterations": iterations, "exit_reason": exit_reason })),
        );
        run.journal().record_loop_exit(LoopOutcome {
            loop_name: self.name.clone(),
            iterations,
            exit_reason,
        });

        let synthesis = run_stage(self.synthesis.as_ref(), run, None).await?;
        let value = json!({
            "iterations": iterations,
            "exit_reason": exit_reason,
            "synthesis": synthesis.value,
        });

        Ok(if degraded || synthesis.degraded {
            StageOutput::degraded(value)
        } else {
            StageOutput::ok(value)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageOutput;
    use crate::stages::FnStage;

    fn noop(name: &str) -> Arc<dyn Stage> {
        Arc::new(FnStage::new(name, |_| Ok(StageOutput::empty())))
    }

    #[test]
    fn test_state_machine_runs_to_cap() {
        let mut state = LoopState::initial();
        let mut passes = 0;
        while !state.is_terminal() {
            passes += 1;
            state = state.advance(false, 3);
        }
        assert_eq!(passes, 3);
        assert_eq!(state, LoopState::Exited(ExitReason::MaxIterations));
    }

    #[test]
    fn test_escalation_exits_immediately() {
        assert_eq!(
            LoopState::initial().advance(true, 3),
            LoopState::Exited(ExitReason::Escalated)
        );
        assert_eq!(
            LoopState::Running(2).advance(true, 3),
            LoopState::Exited(ExitReason::Escalated)
        );
    }

    #[test]
    fn test_exited_state_is_absorbing() {
        let exited = LoopState::Exited(ExitReason::Escalated);
        assert_eq!(exited.advance(false, 3), exited);
    }

    #[test]
    fn test_single_iteration_cap() {
        assert_eq!(
            LoopState::initial().advance(false, 1),
            LoopState::Exited(ExitReason::MaxIterations)
        );
    }

    #[test]
    fn test_new_rejects_zero_iterations() {
        let err = RetryLoop::new("fix_loop", vec![noop("fix")], noop("synthesis"), 0).unwrap_err();
        assert_eq!(err.code(), Some(ConfigurationCodes::LIMITS));
    }

    #[test]
    fn test_new_rejects_empty_body() {
        let err = RetryLoop::new("fix_loop", vec![], noop("synthesis"), 3).unwrap_err();
        assert_eq!(err.code(), Some(ConfigurationCodes::EMPTY));
    }

    #[test]
    fn test_exit_reason_serializes_snake_case() {
        assert_eq!(serde_json::to_value(ExitReason::MaxIterations).unwrap(), json!("max_iterations"));
        assert_eq!(ExitReason::Escalated.to_string(), "escalated");
    }
}

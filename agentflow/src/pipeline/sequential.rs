//! Ordered execution of nested stages.

use super::executor::run_stage;
use crate::context::{RunContext, StageContext, ESCALATE_KEY};
use crate::core::{StageKind, StageOutput};
use crate::errors::StageError;
use crate::stages::Stage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// What a pass over a stage list achieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceOutcome {
    /// Stages that ran to an ok or degraded result.
    pub completed: usize,
    /// True if any completed stage was degraded.
    pub degraded: bool,
    /// True if the pass stopped on an escalation.
    pub escalated: bool,
}

/// Runs `stages` one after another against the run's store.
///
/// Stage N's writes are visible to stage N+1. Inside a retry loop pass the
/// list stops after the first stage that leaves the escalate flag set. The
/// first non-recoverable error is returned and the remaining stages are
/// skipped.
pub async fn run_stages(
    stages: &[Arc<dyn Stage>],
    run: &Arc<RunContext>,
    iteration: Option<u32>,
) -> Result<SequenceOutcome, StageError> {
    let mut outcome = SequenceOutcome::default();

    for stage in stages {
        let output = run_stage(stage.as_ref(), run, iteration).await?;
        outcome.completed += 1;
        outcome.degraded |= output.degraded;

        if iteration.is_some() && run.store().get_as::<bool>(ESCALATE_KEY, false) {
            debug!(stage = stage.name(), iteration = ?iteration, "Escalation ends the pass");
            outcome.escalated = true;
            break;
        }
    }

    Ok(outcome)
}

/// A named, ordered list of stages that is itself a stage.
#[derive(Debug, Clone)]
pub struct SequentialPipeline {
    name: String,
    stages: Vec<Arc<dyn Stage>>,
}

impl SequentialPipeline {
    pub(crate) fn new(name: String, stages: Vec<Arc<dyn Stage>>) -> Self {
        Self { name, stages }
    }

    /// Returns the stages in execution order.
    #[must_use]
    pub fn stages(&self) -> &[Arc<dyn Stage>] {
        &self.stages
    }

    /// Returns the stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the pipeline has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[async_trait]
impl Stage for SequentialPipeline {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Sequence
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let outcome = run_stages(&self.stages, ctx.run(), ctx.loop_iteration()).await?;
        let value = serde_json::to_value(outcome)
            .map_err(|e| StageError::fatal(&self.name, format!("unserializable outcome: {e}")))?;
        Ok(if outcome.degraded {
            StageOutput::degraded(value)
        } else {
            StageOutput::ok(value)
        })
    }
}

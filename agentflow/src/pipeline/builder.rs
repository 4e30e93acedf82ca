//! Pipeline builder with validation.

use super::sequential::SequentialPipeline;
use crate::errors::{ConfigurationCodes, ConfigurationError, ContractErrorInfo};
use crate::stages::Stage;
use std::collections::HashSet;
use std::sync::Arc;

/// Builder for creating validated sequential pipelines.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    stages: Vec<Arc<dyn Stage>>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Appends a stage.
    #[must_use]
    pub fn stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Appends several stages in order.
    #[must_use]
    pub fn stages<I>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Stage>>,
    {
        self.stages.extend(stages);
        self
    }

    /// Returns the number of stages added so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if no stage was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if the pipeline has no stages or two
    /// stages share a name.
    pub fn build(self) -> Result<SequentialPipeline, ConfigurationError> {
        if self.stages.is_empty() {
            return Err(ConfigurationError::new(format!("Pipeline '{}' has no stages", self.name))
                .with_field("stages")
                .with_error_info(
                    ContractErrorInfo::new(ConfigurationCodes::EMPTY, "Empty pipeline")
                        .with_fix_hint("Add at least one stage before calling build()."),
                ));
        }

        if let Some(duplicate) = first_duplicate(&self.stages) {
            return Err(ConfigurationError::new(format!(
                "Pipeline '{}' contains stage '{duplicate}' more than once",
                self.name
            ))
            .with_field("stages")
            .with_error_info(
                ContractErrorInfo::new(
                    ConfigurationCodes::DUPLICATE,
                    format!("Duplicate stage name '{duplicate}'"),
                )
                .with_fix_hint("Give every stage in a pipeline a unique name.")
                .with_context_entry("pipeline", self.name.clone()),
            ));
        }

        Ok(SequentialPipeline::new(self.name, self.stages))
    }
}

fn first_duplicate(stages: &[Arc<dyn Stage>]) -> Option<String> {
    let mut seen = HashSet::new();
    stages
        .iter()
        .map(|s| s.name())
        .find(|name| !seen.insert(*name))
        .map(str::to_string)
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
    fn test_build_keeps_order() {
        let pipeline = PipelineBuilder::new("review")
            .stage(noop("analyze"))
            .stages([noop("style"), noop("test")])
            .build()
            .unwrap();

        assert_eq!(pipeline.stage_names(), vec!["analyze", "style", "test"]);
        assert_eq!(pipeline.name(), "review");
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        let err = PipelineBuilder::new("empty").build().unwrap_err();
        assert_eq!(err.code(), Some(ConfigurationCodes::EMPTY));
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let err = PipelineBuilder::new("dup")
            .stage(noop("fix"))
            .stage(noop("fix"))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), Some(ConfigurationCodes::DUPLICATE));
    }
}

//! Pattern discovery: find successful companies, validate each one, and
//! synthesize the patterns shared by the valid ones.

use super::{batch_from_state, number, parse_answer, parse_company, Collaborator, Company};
use crate::consolidate::{BucketThresholds, Consolidator, ScoreWeights, Scored};
use crate::context::StageContext;
use crate::core::StageOutput;
use crate::errors::{ConfigurationError, ExternalCallError, StageError, ValidationError};
use crate::fanout::FanOutStage;
use crate::items::format_batch;
use crate::pipeline::{PipelineBuilder, SequentialPipeline};
use crate::stages::{call_with_timeout, stage_fn, CallStage, FnStage, Stage, StageFunction};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// State keys used by the pattern workflow.
pub mod keys {
    /// What kind of companies to research.
    pub const RESEARCH_INTENT: &str = "research_intent";
    /// Raw search results.
    pub const RAW_COMPANIES: &str = "raw_companies";
    /// De-duplicated companies.
    pub const FORMATTED_COMPANIES: &str = "formatted_companies";
    /// One validation per surviving company.
    pub const COMPANY_VALIDATIONS: &str = "company_validations";
    /// Valid/invalid split with the validation rate.
    pub const RESEARCH_SUMMARY: &str = "research_summary";
    /// The final pattern report.
    pub const PATTERN_REPORT: &str = "pattern_report";
}

/// Confidence reported when no synthesis took place.
pub const NO_CONFIDENCE: &str = "N/A";

/// The validation of one company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyValidation {
    /// The validated company.
    pub company: Company,
    /// Whether the company qualifies.
    pub is_valid: bool,
    /// Validation confidence in [0, 1].
    pub validation_score: f64,
    /// Why the company was rejected, if it was.
    #[serde(default)]
    pub rejection_reasons: Vec<String>,
    /// Free-form details from the validator.
    #[serde(default)]
    pub validation_details: Value,
}

impl CompanyValidation {
    /// Reads a validator answer for `company`.
    ///
    /// # Errors
    ///
    /// Returns [`ExternalCallError::Malformed`] if the answer lacks
    /// `is_valid` or `validation_score`.
    pub fn from_answer(call: &str, company: Company, answer: &Value) -> Result<Self, StageError> {
        let is_valid = answer
            .get("is_valid")
            .and_then(Value::as_bool)
            .ok_or_else(|| ExternalCallError::malformed(call, "missing 'is_valid'"))?;
        let validation_score = number(answer, "validation_score")
            .ok_or_else(|| ExternalCallError::malformed(call, "missing 'validation_score'"))?;
        let rejection_reasons = answer
            .get("rejection_reasons")
            .and_then(Value::as_array)
            .map(|reasons| reasons.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();

        Ok(Self {
            company,
            is_valid,
            validation_score,
            rejection_reasons,
            validation_details: answer.get("validation_details").cloned().unwrap_or(Value::Null),
        })
    }
}

impl Scored for CompanyValidation {
    fn sub_score(&self, name: &str) -> Option<f64> {
        (name == "validation_score").then_some(self.validation_score)
    }

    fn is_valid(&self) -> bool {
        self.is_valid
    }
}

/// A company that failed validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedCompany {
    /// Company name.
    pub name: String,
    /// Why it was rejected.
    pub reasons: Vec<String>,
}

/// Valid and invalid companies of a research batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchSummary {
    /// Valid companies, best validated first.
    pub valid_companies: Vec<Company>,
    /// Rejected companies, in batch order.
    pub invalid_companies: Vec<RejectedCompany>,
    /// Number of validations considered.
    pub total_analyzed: usize,
    /// Valid / analyzed, 0 when nothing was analyzed.
    pub validation_rate: f64,
    /// Company name to validation score.
    pub validation_scores: BTreeMap<String, f64>,
}

impl ResearchSummary {
    /// Splits a batch of validations, ranking the valid companies with
    /// `consolidator`.
    #[must_use]
    pub fn from_validations(validations: Vec<CompanyValidation>, consolidator: &Consolidator) -> Self {
        let validation_scores = validations
            .iter()
            .map(|v| (v.company.name.clone(), v.validation_score))
            .collect();
        let invalid_companies = validations
            .iter()
            .filter(|v| !v.is_valid)
            .map(|v| RejectedCompany {
                name: v.company.name.clone(),
                reasons: v.rejection_reasons.clone(),
            })
            .collect();

        let consolidation = consolidator.consolidate(validations);
        Self {
            valid_companies: consolidation.all.into_iter().map(|r| r.record.company).collect(),
            invalid_companies,
            total_analyzed: consolidation.counts.total_analyzed,
            validation_rate: consolidation.counts.validation_rate,
            validation_scores,
        }
    }
}

/// Ranks company validations by their validation score alone.
///
/// # Errors
///
/// Returns a [`ConfigurationError`] if the weights do not validate.
pub fn validation_consolidator() -> Result<Consolidator, ConfigurationError> {
    Ok(Consolidator::new(
        ScoreWeights::new([("validation_score", 1.0)])?,
        BucketThresholds::default(),
    ))
}

/// The pattern report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternReport {
    /// Discovered patterns, as written by the synthesis collaborator.
    pub patterns: Vec<Value>,
    /// Number of valid companies the patterns were drawn from.
    pub total_companies_analyzed: usize,
    /// How the analysis was done.
    pub analysis_methodology: String,
    /// Confidence in the patterns.
    pub confidence_level: String,
}

impl PatternReport {
    /// A report without patterns.
    #[must_use]
    pub fn empty(methodology: impl Into<String>) -> Self {
        Self {
            patterns: Vec::new(),
            total_companies_analyzed: 0,
            analysis_methodology: methodology.into(),
            confidence_level: NO_CONFIDENCE.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SynthesisAnswer {
    patterns: Vec<Value>,
    #[serde(default)]
    analysis_methodology: String,
    #[serde(default)]
    confidence_level: String,
}

/// Synthesizes patterns from the valid companies of the research summary.
pub struct SynthesizePatternsStage {
    synthesizer: Collaborator,
}

impl SynthesizePatternsStage {
    /// Creates the stage around the synthesis collaborator.
    #[must_use]
    pub fn new(synthesizer: Collaborator) -> Self {
        Self { synthesizer }
    }
}

impl fmt::Debug for SynthesizePatternsStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynthesizePatternsStage")
            .field("synthesizer", &self.synthesizer.name())
            .finish()
    }
}

#[async_trait]
impl Stage for SynthesizePatternsStage {
    fn name(&self) -> &str {
        "synthesize_patterns"
    }

    fn output_key(&self) -> Option<&str> {
        Some(keys::PATTERN_REPORT)
    }

    fn degraded_output(&self, error: &StageError) -> Value {
        serde_json::to_value(PatternReport::empty(format!("Pattern synthesis unavailable: {error}")))
            .unwrap_or(Value::Null)
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        if batch_from_state(ctx, keys::FORMATTED_COMPANIES)?.is_empty() {
            return report_output(&PatternReport::empty("No companies found"));
        }

        let summary: Option<ResearchSummary> = ctx
            .state()
            .try_get_as(keys::RESEARCH_SUMMARY)
            .map_err(|e| ValidationError::new(format!("unreadable research summary: {e}")))?;
        let Some(summary) = summary.filter(|s| !s.valid_companies.is_empty()) else {
            debug!("No valid companies to synthesize");
            return report_output(&PatternReport::empty("No valid companies to analyze"));
        };

        let request = json!({
            "companies": summary.valid_companies,
            "validation_scores": summary.validation_scores,
        });
        let answer = call_with_timeout(self.synthesizer.as_ref(), request, ctx.call_timeout()).await?;
        let synthesis: SynthesisAnswer = parse_answer(self.synthesizer.name(), answer)?;

        report_output(&PatternReport {
            patterns: synthesis.patterns,
            total_companies_analyzed: summary.valid_companies.len(),
            analysis_methodology: synthesis.analysis_methodology,
            confidence_level: synthesis.confidence_level,
        })
    }
}

fn report_output(report: &PatternReport) -> Result<StageOutput, StageError> {
    StageOutput::from_serializable(report)
        .map(|out| out.with_metadata("patterns", json!(report.patterns.len())))
        .map_err(|e| StageError::fatal("synthesize_patterns", format!("unserializable report: {e}")))
}

fn format_companies_stage(ctx: &StageContext) -> Result<StageOutput, StageError> {
    let raw = batch_from_state(ctx, keys::RAW_COMPANIES)?;
    let batch = format_batch(&raw, parse_company);

    debug!(
        companies = batch.len(),
        rejected = batch.rejected.len(),
        duplicates = batch.duplicates,
        "Formatted companies"
    );
    let value = serde_json::to_value(&batch.items)
        .map_err(|e| StageError::fatal("format_companies", format!("unserializable companies: {e}")))?;
    Ok(StageOutput::ok(value).with_metadata("rejected", json!(batch.rejected.len())))
}

fn consolidate_research_stage(ctx: &StageContext, consolidator: &Consolidator) -> Result<StageOutput, StageError> {
    let validations: Vec<CompanyValidation> = ctx
        .state()
        .try_get_as(keys::COMPANY_VALIDATIONS)
        .map_err(|e| ValidationError::new(format!("unreadable validations: {e}")))?
        .unwrap_or_default();

    let summary = ResearchSummary::from_validations(validations, consolidator);
    StageOutput::from_serializable(&summary)
        .map(|out| out.with_metadata("validation_rate", json!(summary.validation_rate)))
        .map_err(|e| StageError::fatal("consolidate_research", format!("unserializable summary: {e}")))
}

/// The collaborators of the pattern workflow.
#[derive(Clone)]
pub struct PatternCollaborators {
    /// Searches for companies; receives `{research_intent}`.
    pub find_companies: Collaborator,
    /// Validates one company.
    pub validate: Collaborator,
    /// Synthesizes patterns from the valid companies.
    pub synthesize: Collaborator,
}

impl fmt::Debug for PatternCollaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternCollaborators")
            .field("find_companies", &self.find_companies.name())
            .field("validate", &self.validate.name())
            .field("synthesize", &self.synthesize.name())
            .finish()
    }
}

/// Builds the pattern discovery pipeline.
///
/// # Errors
///
/// Returns a [`ConfigurationError`] if the pipeline cannot be assembled.
pub fn pipeline(collaborators: PatternCollaborators) -> Result<SequentialPipeline, ConfigurationError> {
    let consolidator = validation_consolidator()?;
    let validator = collaborators.validate;
    let validate: Arc<dyn StageFunction<Company, CompanyValidation>> =
        stage_fn("validate_company", move |company: Company| {
            let validator = Arc::clone(&validator);
            async move {
                let payload = serde_json::to_value(&company)
                    .map_err(|e| ExternalCallError::malformed(validator.name(), e.to_string()))?;
                let answer = validator.call(payload).await?;
                CompanyValidation::from_answer(validator.name(), company, &answer)
            }
        });

    PipelineBuilder::new("pattern_discovery")
        .stage(Arc::new(
            CallStage::new("find_companies", keys::RAW_COMPANIES, collaborators.find_companies)
                .with_inputs(&[keys::RESEARCH_INTENT])
                .with_degraded_output(json!([])),
        ))
        .stage(Arc::new(
            FnStage::new("format_companies", format_companies_stage)
                .with_output_key(keys::FORMATTED_COMPANIES)
                .with_degraded_output(json!([])),
        ))
        .stage(Arc::new(FanOutStage::new(
            "validate_companies",
            keys::FORMATTED_COMPANIES,
            keys::COMPANY_VALIDATIONS,
            validate,
        )))
        .stage(Arc::new(
            FnStage::new("consolidate_research", move |ctx: &StageContext| {
                consolidate_research_stage(ctx, &consolidator)
            })
            .with_output_key(keys::RESEARCH_SUMMARY),
        ))
        .stage(Arc::new(SynthesizePatternsStage::new(collaborators.synthesize)))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentflowConfig;
    use crate::context::{RunIdentity, StateStore};
    use crate::pipeline::{PipelineRunner, RunReport, RunStatus};
    use crate::testing::{assert_run_status, MockFunction};
    use crate::workflows::leads::{self, LeadCollaborators, LeadReport};
    use pretty_assertions::assert_eq;

    fn company(name: &str) -> Company {
        parse_company(&json!({ "name": name })).unwrap()
    }

    fn validation(name: &str, valid: bool, score: f64) -> CompanyValidation {
        CompanyValidation {
            company: company(name),
            is_valid: valid,
            validation_score: score,
            rejection_reasons: if valid { vec![] } else { vec!["dormant".into()] },
            validation_details: Value::Null,
        }
    }

    #[test]
    fn test_research_summary_splits_and_ranks() {
        let summary = ResearchSummary::from_validations(
            vec![
                validation("Acme", true, 0.6),
                validation("Dormant Inc", false, 0.2),
                validation("Globex", true, 0.9),
                validation("Initech", true, 0.7),
            ],
            &validation_consolidator().unwrap(),
        );

        let names: Vec<&str> = summary.valid_companies.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Globex", "Initech", "Acme"]);
        assert_eq!(summary.invalid_companies[0].reasons, vec!["dormant"]);
        assert_eq!(summary.total_analyzed, 4);
        assert!((summary.validation_rate - 0.75).abs() < 1e-9);
        assert_eq!(summary.validation_scores.len(), 4);
    }

    #[test]
    fn test_empty_research_summary() {
        let summary = ResearchSummary::from_validations(vec![], &validation_consolidator().unwrap());
        assert!(summary.valid_companies.is_empty());
        assert_eq!(summary.validation_rate, 0.0);
    }

    #[test]
    fn test_validation_consolidator_weighs_only_validation_score() {
        let consolidator = validation_consolidator().unwrap();
        let consolidation = consolidator.consolidate(vec![validation("Acme", true, 0.42)]);
        assert!((consolidation.all[0].priority_score - 0.42).abs() < 1e-9);
    }

    #[test]
    fn test_validation_requires_flag() {
        let err = CompanyValidation::from_answer("validate", company("Acme"), &json!({"validation_score": 1}))
            .unwrap_err();
        assert!(err.is_recoverable());
    }

    fn collaborators(validate: MockFunction) -> (PatternCollaborators, Arc<MockFunction>) {
        let synthesize = Arc::new(MockFunction::new("synthesize_patterns", |input| {
            let count = input["companies"].as_array().map_or(0, Vec::len);
            json!({
                "patterns": [{"pattern_id": "p1", "companies": count}, {"pattern_id": "p2"}],
                "analysis_methodology": "cross-company comparison",
                "confidence_level": "medium"
            })
        }));
        let collaborators = PatternCollaborators {
            find_companies: Arc::new(MockFunction::new("find_companies", |_| {
                json!([{"name": "Acme"}, {"name": "Globex"}, {"name": "acme"}, {"name": "Dormant Inc"}])
            })),
            validate: Arc::new(validate),
            synthesize: synthesize.clone(),
        };
        (collaborators, synthesize)
    }

    fn validator() -> MockFunction {
        MockFunction::new("validate_company", |company| {
            let valid = company["name"] != "Dormant Inc";
            json!({"is_valid": valid, "validation_score": if valid { 0.8 } else { 0.1 }})
        })
    }

    async fn run(collaborators: PatternCollaborators, store: Arc<StateStore>) -> RunReport {
        let runner = PipelineRunner::new(Arc::new(pipeline(collaborators).unwrap()), AgentflowConfig::default())
            .unwrap();
        runner.run(RunIdentity::new("analyst"), store).await
    }

    #[tokio::test]
    async fn test_pattern_pipeline_end_to_end() {
        let (collaborators, synthesize) = collaborators(validator());

        let report = run(collaborators, Arc::new(StateStore::new())).await;

        assert_run_status(&report, RunStatus::Completed);
        assert_eq!(synthesize.call_count(), 1);
        let pattern_report: PatternReport =
            serde_json::from_value(report.output(keys::PATTERN_REPORT).unwrap().clone()).unwrap();
        assert_eq!(pattern_report.total_companies_analyzed, 2);
        assert_eq!(pattern_report.patterns.len(), 2);
        assert_eq!(pattern_report.confidence_level, "medium");

        let summary = report.output(keys::RESEARCH_SUMMARY).unwrap();
        assert_eq!(summary["total_analyzed"], json!(3));
    }

    #[tokio::test]
    async fn test_no_valid_companies_skips_synthesis() {
        let reject_all = MockFunction::new("validate_company", |_| json!({"is_valid": false, "validation_score": 0.0}));
        let (collaborators, synthesize) = collaborators(reject_all);

        let report = run(collaborators, Arc::new(StateStore::new())).await;

        assert_run_status(&report, RunStatus::Completed);
        assert_eq!(synthesize.call_count(), 0);
        assert_eq!(
            report.output(keys::PATTERN_REPORT).unwrap(),
            &serde_json::to_value(PatternReport::empty("No valid companies to analyze")).unwrap()
        );
    }

    #[tokio::test]
    async fn test_patterns_feed_lead_generation() {
        let (collaborators, _) = collaborators(validator());
        let store = Arc::new(StateStore::new());
        run(collaborators, Arc::clone(&store)).await;

        let lead_collaborators = LeadCollaborators {
            find_leads: Arc::new(MockFunction::new("find_leads", |_| json!([{"name": "Hooli"}]))),
            validate: Arc::new(MockFunction::new("validate_lead", |_| {
                json!({"is_valid": true, "validation_score": 1.0})
            })),
            analyze_signals: Arc::new(MockFunction::new("analyze_signals", |_| {
                json!({"recommendation_score": 1.0})
            })),
            compile_report: Arc::new(MockFunction::new("write_report", |_| {
                json!({"executive_summary": "One lead."})
            })),
        };
        let config = AgentflowConfig::default();
        let runner = PipelineRunner::new(
            Arc::new(leads::pipeline(lead_collaborators, &config).unwrap()),
            config,
        )
        .unwrap();
        let report = runner.run(RunIdentity::new("analyst"), store).await;

        assert_run_status(&report, RunStatus::Completed);
        let formatted = report.output(leads::keys::FORMATTED_LEADS).unwrap();
        assert_eq!(formatted[0]["matching_patterns"], json!(["p1", "p2"]));
        assert_eq!(formatted[0]["match_score"], json!(1.0));
        let lead_report: LeadReport =
            serde_json::from_value(report.output(leads::keys::LEAD_REPORT).unwrap().clone()).unwrap();
        assert_eq!(lead_report.total_leads_found, 1);
    }
}

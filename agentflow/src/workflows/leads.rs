//! Lead generation: find leads matching known patterns, analyze each lead
//! twice in parallel, rank them and compile a prioritized report.

use super::{batch_from_state, number, parse_answer, parse_company, Collaborator, Company, JsonCall};
use crate::config::AgentflowConfig;
use crate::consolidate::{ConsolidateStage, Consolidation, Consolidator, RankedRecord};
use crate::context::StageContext;
use crate::core::StageOutput;
use crate::errors::{ConfigurationError, ExternalCallError, StageError, ValidationError};
use crate::fanout::{FanOutStage, PairedCall};
use crate::items::{format_batch, FormattedBatch, Item};
use crate::pipeline::{PipelineBuilder, SequentialPipeline};
use crate::stages::{call_with_timeout, CallStage, FnStage, Stage, StageFunction};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// State keys used by the lead workflow.
pub mod keys {
    /// Pattern report the leads are matched against.
    pub const PATTERN_REPORT: &str = "pattern_report";
    /// Raw search results.
    pub const RAW_LEADS: &str = "raw_leads";
    /// De-duplicated, scored leads.
    pub const FORMATTED_LEADS: &str = "formatted_leads";
    /// One analysis per surviving lead.
    pub const LEAD_ANALYSES: &str = "lead_analyses";
    /// Ranked and bucketed analyses.
    pub const CONSOLIDATED_LEADS: &str = "consolidated_leads";
    /// The final report.
    pub const LEAD_REPORT: &str = "lead_report";
}

/// Discovery source recorded on every formatted lead.
pub const DISCOVERY_SOURCE: &str = "pattern_based_search";

/// Match score used when no patterns are known.
pub const UNKNOWN_PATTERN_MATCH_SCORE: f64 = 0.5;

/// A company that matched one or more known patterns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    /// The company.
    #[serde(flatten)]
    pub company: Company,
    /// Fraction of known patterns the lead matches.
    pub match_score: f64,
    /// Ids of the matching patterns.
    pub matching_patterns: Vec<String>,
    /// Where the lead came from.
    pub discovery_source: String,
}

impl Item for Lead {
    fn identity(&self) -> &str {
        &self.company.name
    }
}

/// Extracts the pattern ids of a pattern report, stringified.
#[must_use]
pub fn known_pattern_ids(report: &Value) -> Vec<String> {
    report
        .get("patterns")
        .and_then(Value::as_array)
        .map(|patterns| {
            patterns
                .iter()
                .filter_map(|p| p.get("pattern_id").or_else(|| p.get("id")))
                .filter_map(id_string)
                .collect()
        })
        .unwrap_or_default()
}

fn id_string(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parses a raw search record into a lead.
///
/// A record without `matching_pattern_ids` is assumed to match the first two
/// known patterns.
///
/// # Errors
///
/// Returns a [`ValidationError`] if the record has no name.
pub fn parse_lead(record: &Value, pattern_ids: &[String]) -> Result<Lead, ValidationError> {
    let company = parse_company(record)?;
    let matching_patterns: Vec<String> = match record.get("matching_pattern_ids").and_then(Value::as_array) {
        Some(ids) => ids.iter().filter_map(id_string).collect(),
        None => pattern_ids.iter().take(2).cloned().collect(),
    };

    #[allow(clippy::cast_precision_loss)]
    let match_score = if pattern_ids.is_empty() {
        UNKNOWN_PATTERN_MATCH_SCORE
    } else {
        (matching_patterns.len() as f64 / pattern_ids.len() as f64).min(1.0)
    };

    Ok(Lead {
        company,
        match_score,
        matching_patterns,
        discovery_source: DISCOVERY_SOURCE.to_string(),
    })
}

/// Formats raw search records into de-duplicated leads.
pub fn format_leads(raw: &[Value], pattern_ids: &[String]) -> FormattedBatch<Lead> {
    format_batch(raw, |record| parse_lead(record, pattern_ids))
}

/// The joined result of validating a lead and analyzing its signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadAnalysis {
    /// Company name.
    pub name: String,
    /// The analyzed lead.
    pub lead: Lead,
    /// Whether validation accepted the lead.
    pub is_valid: bool,
    /// Validation confidence in [0, 1].
    pub validation_score: f64,
    /// Pattern match score in [0, 1].
    pub match_score: f64,
    /// Signal-based recommendation score in [0, 1].
    pub recommendation_score: f64,
    /// Full validation answer.
    pub validation: Value,
    /// Full signal analysis answer.
    pub signals: Value,
}

/// Joins a lead with its validation and signal analysis.
///
/// # Errors
///
/// Returns [`ExternalCallError::Malformed`] if either answer lacks its score.
pub fn combine_analysis(lead: Lead, validation: Value, signals: Value) -> Result<LeadAnalysis, StageError> {
    let is_valid = validation
        .get("is_valid")
        .and_then(Value::as_bool)
        .ok_or_else(|| ExternalCallError::malformed("validate_lead", "missing 'is_valid'"))?;
    let validation_score = number(&validation, "validation_score")
        .ok_or_else(|| ExternalCallError::malformed("validate_lead", "missing 'validation_score'"))?;
    let recommendation_score = number(&signals, "recommendation_score")
        .ok_or_else(|| ExternalCallError::malformed("analyze_signals", "missing 'recommendation_score'"))?;

    Ok(LeadAnalysis {
        name: lead.company.name.clone(),
        match_score: lead.match_score,
        lead,
        is_valid,
        validation_score,
        recommendation_score,
        validation,
        signals,
    })
}

/// One prioritized lead in a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrioritizedLead {
    /// Company name.
    pub name: String,
    /// Industry.
    pub industry: String,
    /// Country.
    pub country: String,
    /// Weighted priority score.
    pub priority_score: f64,
    /// Ids of the matching patterns.
    pub matching_patterns: Vec<String>,
}

impl From<&RankedRecord<LeadAnalysis>> for PrioritizedLead {
    fn from(ranked: &RankedRecord<LeadAnalysis>) -> Self {
        let company = &ranked.record.lead.company;
        Self {
            name: company.name.clone(),
            industry: company.industry.clone(),
            country: company.country.clone(),
            priority_score: ranked.priority_score,
            matching_patterns: ranked.record.lead.matching_patterns.clone(),
        }
    }
}

/// The narrative part of a report, written by the report collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportNarrative {
    /// Executive summary.
    pub executive_summary: String,
    /// How the leads relate to the patterns.
    #[serde(default)]
    pub pattern_match_analysis: String,
    /// Recommended next steps.
    #[serde(default)]
    pub recommendations: Vec<String>,
    /// Notes on how the report was produced.
    #[serde(default)]
    pub methodology_notes: String,
}

/// The final lead report. Counts and buckets always come from consolidation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadReport {
    /// Executive summary.
    pub executive_summary: String,
    /// Number of valid leads.
    pub total_leads_found: usize,
    /// High-priority leads, best first.
    pub high_priority_leads: Vec<PrioritizedLead>,
    /// Medium-priority leads, best first.
    pub medium_priority_leads: Vec<PrioritizedLead>,
    /// How the leads relate to the patterns.
    pub pattern_match_analysis: String,
    /// Recommended next steps.
    pub recommendations: Vec<String>,
    /// Notes on how the report was produced.
    pub methodology_notes: String,
}

impl LeadReport {
    /// The report for a search that produced no leads.
    #[must_use]
    pub fn no_leads() -> Self {
        Self::empty(
            "No leads found matching the patterns.",
            "No leads to analyze",
        )
    }

    /// The report used when compilation failed.
    #[must_use]
    pub fn unavailable(error: &StageError) -> Self {
        Self::empty(
            "The lead report could not be compiled.",
            &format!("Report unavailable: {error}"),
        )
    }

    fn empty(summary: &str, notes: &str) -> Self {
        Self {
            executive_summary: summary.to_string(),
            total_leads_found: 0,
            high_priority_leads: Vec::new(),
            medium_priority_leads: Vec::new(),
            pattern_match_analysis: String::new(),
            recommendations: Vec::new(),
            methodology_notes: notes.to_string(),
        }
    }

    /// Builds a report from a consolidation and the collaborator's narrative.
    #[must_use]
    pub fn compile(consolidation: &Consolidation<LeadAnalysis>, narrative: ReportNarrative) -> Self {
        Self {
            executive_summary: narrative.executive_summary,
            total_leads_found: consolidation.counts.total_valid,
            high_priority_leads: consolidation.high.iter().map(PrioritizedLead::from).collect(),
            medium_priority_leads: consolidation.medium.iter().map(PrioritizedLead::from).collect(),
            pattern_match_analysis: narrative.pattern_match_analysis,
            recommendations: narrative.recommendations,
            methodology_notes: narrative.methodology_notes,
        }
    }
}

/// Compiles the lead report from the consolidated analyses.
///
/// An empty lead list short-circuits to [`LeadReport::no_leads`] without
/// calling the collaborator.
pub struct CompileReportStage {
    writer: Collaborator,
}

impl CompileReportStage {
    /// Creates the stage around the narrative collaborator.
    #[must_use]
    pub fn new(writer: Collaborator) -> Self {
        Self { writer }
    }
}

impl fmt::Debug for CompileReportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompileReportStage")
            .field("writer", &self.writer.name())
            .finish()
    }
}

#[async_trait]
impl Stage for CompileReportStage {
    fn name(&self) -> &str {
        "compile_report"
    }

    fn output_key(&self) -> Option<&str> {
        Some(keys::LEAD_REPORT)
    }

    fn degraded_output(&self, error: &StageError) -> Value {
        serde_json::to_value(LeadReport::unavailable(error)).unwrap_or(Value::Null)
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let state = ctx.state();
        if batch_from_state(ctx, keys::FORMATTED_LEADS)?.is_empty() {
            debug!("No leads to report on");
            return report_output(&LeadReport::no_leads(), self.name());
        }

        let consolidation: Consolidation<LeadAnalysis> = state
            .try_get_as(keys::CONSOLIDATED_LEADS)
            .map_err(|e| ValidationError::new(format!("unreadable consolidation: {e}")))?
            .unwrap_or_else(Consolidation::empty);

        let request = json!({
            "counts": consolidation.counts,
            "high_priority": lead_names(&consolidation.high),
            "medium_priority": lead_names(&consolidation.medium),
            "pattern_report": state.get(keys::PATTERN_REPORT, Value::Null),
        });

        let answer = call_with_timeout(self.writer.as_ref(), request, ctx.call_timeout()).await?;
        let narrative: ReportNarrative = parse_answer(self.writer.name(), answer)?;
        report_output(&LeadReport::compile(&consolidation, narrative), self.name())
    }
}

fn lead_names(ranked: &[RankedRecord<LeadAnalysis>]) -> Vec<String> {
    ranked.iter().map(|r| r.record.name.clone()).collect()
}

fn report_output(report: &LeadReport, stage: &str) -> Result<StageOutput, StageError> {
    StageOutput::from_serializable(report)
        .map(|out| out.with_metadata("total_leads_found", json!(report.total_leads_found)))
        .map_err(|e| StageError::fatal(stage, format!("unserializable report: {e}")))
}

fn format_leads_stage(ctx: &StageContext) -> Result<StageOutput, StageError> {
    let raw = batch_from_state(ctx, keys::RAW_LEADS)?;
    let pattern_ids = known_pattern_ids(&ctx.state().get(keys::PATTERN_REPORT, Value::Null));
    let batch = format_leads(&raw, &pattern_ids);

    debug!(
        leads = batch.len(),
        rejected = batch.rejected.len(),
        duplicates = batch.duplicates,
        "Formatted leads"
    );
    let value = serde_json::to_value(&batch.items)
        .map_err(|e| StageError::fatal("format_leads", format!("unserializable leads: {e}")))?;
    Ok(StageOutput::ok(value)
        .with_metadata("rejected", json!(batch.rejected.len()))
        .with_metadata("duplicates", json!(batch.duplicates)))
}

/// The collaborators of the lead workflow.
#[derive(Clone)]
pub struct LeadCollaborators {
    /// Searches for leads; receives `{pattern_report}`.
    pub find_leads: Collaborator,
    /// Validates one lead.
    pub validate: Collaborator,
    /// Analyzes the signals of one lead.
    pub analyze_signals: Collaborator,
    /// Writes the report narrative.
    pub compile_report: Collaborator,
}

impl fmt::Debug for LeadCollaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeadCollaborators")
            .field("find_leads", &self.find_leads.name())
            .field("validate", &self.validate.name())
            .field("analyze_signals", &self.analyze_signals.name())
            .field("compile_report", &self.compile_report.name())
            .finish()
    }
}

/// Builds the lead generation pipeline.
///
/// # Errors
///
/// Returns a [`ConfigurationError`] if the scoring configuration is invalid.
pub fn pipeline(
    collaborators: LeadCollaborators,
    config: &AgentflowConfig,
) -> Result<SequentialPipeline, ConfigurationError> {
    let consolidator = Consolidator::from_config(&config.scoring)?;

    let validate: Arc<dyn StageFunction<Lead, Value>> = Arc::new(JsonCall::new(collaborators.validate));
    let signals: Arc<dyn StageFunction<Lead, Value>> =
        Arc::new(JsonCall::new(collaborators.analyze_signals));
    let analyze: Arc<dyn StageFunction<Lead, LeadAnalysis>> = Arc::new(PairedCall::new(
        "validate_and_analyze",
        validate,
        signals,
        combine_analysis,
    ));

    PipelineBuilder::new("lead_generation")
        .stage(Arc::new(
            CallStage::new("find_leads", keys::RAW_LEADS, collaborators.find_leads)
                .with_inputs(&[keys::PATTERN_REPORT])
                .with_degraded_output(json!([])),
        ))
        .stage(Arc::new(
            FnStage::new("format_leads", format_leads_stage)
                .with_output_key(keys::FORMATTED_LEADS)
                .with_degraded_output(json!([])),
        ))
        .stage(Arc::new(FanOutStage::new(
            "analyze_leads",
            keys::FORMATTED_LEADS,
            keys::LEAD_ANALYSES,
            analyze,
        )))
        .stage(Arc::new(ConsolidateStage::new(
            "consolidate_leads",
            keys::LEAD_ANALYSES,
            keys::CONSOLIDATED_LEADS,
            consolidator,
        )))
        .stage(Arc::new(CompileReportStage::new(collaborators.compile_report)))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RunIdentity, StateStore};
    use crate::pipeline::{PipelineRunner, RunStatus};
    use crate::testing::{assert_run_status, MockFunction};
    use pretty_assertions::assert_eq;

    fn pattern_report() -> Value {
        json!({"patterns": [{"pattern_id": "p1"}, {"pattern_id": 2}, {"id": "p3"}, {"pattern_id": null}]})
    }

    #[test]
    fn test_known_pattern_ids() {
        assert_eq!(known_pattern_ids(&pattern_report()), vec!["p1", "2", "p3"]);
        assert!(known_pattern_ids(&Value::Null).is_empty());
    }

    #[test]
    fn test_match_score() {
        let ids: Vec<String> = vec!["p1".into(), "p2".into(), "p3".into(), "p4".into()];

        let defaulted = parse_lead(&json!({"name": "Acme"}), &ids).unwrap();
        assert_eq!(defaulted.matching_patterns, vec!["p1", "p2"]);
        assert!((defaulted.match_score - 0.5).abs() < 1e-9);

        let explicit = parse_lead(&json!({"name": "Acme", "matching_pattern_ids": ["p1"]}), &ids).unwrap();
        assert!((explicit.match_score - 0.25).abs() < 1e-9);

        let unknown = parse_lead(&json!({"name": "Acme"}), &[]).unwrap();
        assert!(unknown.matching_patterns.is_empty());
        assert!((unknown.match_score - UNKNOWN_PATTERN_MATCH_SCORE).abs() < 1e-9);
        assert_eq!(unknown.discovery_source, DISCOVERY_SOURCE);
    }

    #[test]
    fn test_format_leads_dedupes() {
        let raw = vec![json!({"name": "Acme"}), json!({"name": "acme "}), json!({"name": ""})];
        let batch = format_leads(&raw, &[]);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.duplicates, 1);
        assert_eq!(batch.rejected.len(), 1);
    }

    #[test]
    fn test_combine_requires_scores() {
        let lead = parse_lead(&json!({"name": "Acme"}), &[]).unwrap();
        let err = combine_analysis(lead, json!({"is_valid": true}), json!({"recommendation_score": 0.5}))
            .unwrap_err();
        assert!(err.is_recoverable());
    }

    struct Fixture {
        find: Arc<MockFunction>,
        validate: Arc<MockFunction>,
        signals: Arc<MockFunction>,
        report: Arc<MockFunction>,
    }

    impl Fixture {
        fn new(leads: Value) -> Self {
            Self {
                find: Arc::new(MockFunction::new("find_leads", move |_| leads.clone())),
                validate: Arc::new(MockFunction::new("validate_lead", |lead| {
                    let valid = lead["name"] != "Shell Co";
                    json!({"is_valid": valid, "validation_score": if valid { 0.9 } else { 0.1 }})
                })),
                signals: Arc::new(MockFunction::new("analyze_signals", |lead| {
                    let score = if lead["name"] == "Acme" { 1.0 } else { 0.2 };
                    json!({"recommendation_score": score, "detected_signals": ["hiring"]})
                })),
                report: Arc::new(MockFunction::new("write_report", |_| {
                    json!({
                        "executive_summary": "Two strong leads.",
                        "recommendations": ["Call Acme"],
                        "total_leads_found": 99
                    })
                })),
            }
        }

        fn collaborators(&self) -> LeadCollaborators {
            LeadCollaborators {
                find_leads: self.find.clone(),
                validate: self.validate.clone(),
                analyze_signals: self.signals.clone(),
                compile_report: self.report.clone(),
            }
        }

        async fn run(&self) -> crate::pipeline::RunReport {
            let config = AgentflowConfig::default();
            let pipeline = pipeline(self.collaborators(), &config).unwrap();
            let runner = PipelineRunner::new(Arc::new(pipeline), config).unwrap();
            let store = Arc::new(StateStore::from_entries([(keys::PATTERN_REPORT, pattern_report())]));
            runner.run(RunIdentity::new("analyst"), store).await
        }
    }

    #[tokio::test]
    async fn test_lead_pipeline_end_to_end() {
        let fixture = Fixture::new(json!([
            {"name": "Acme", "industry": "Logistics", "matching_pattern_ids": ["p1", "2", "p3"]},
            {"name": "ACME"},
            {"name": "Globex"},
            {"name": "Shell Co"}
        ]));

        let report = fixture.run().await;

        assert_run_status(&report, RunStatus::Completed);
        assert_eq!(fixture.validate.call_count(), 3);
        assert_eq!(fixture.signals.call_count(), 3);

        let lead_report: LeadReport =
            serde_json::from_value(report.output(keys::LEAD_REPORT).unwrap().clone()).unwrap();
        assert_eq!(lead_report.executive_summary, "Two strong leads.");
        assert_eq!(lead_report.total_leads_found, 2);
        assert_eq!(lead_report.high_priority_leads.len(), 1);
        assert_eq!(lead_report.high_priority_leads[0].name, "Acme");
        assert_eq!(lead_report.medium_priority_leads.len(), 1);
        assert_eq!(lead_report.medium_priority_leads[0].name, "Globex");
        assert_eq!(lead_report.recommendations, vec!["Call Acme"]);
    }

    #[tokio::test]
    async fn test_no_leads_short_circuits_report() {
        let fixture = Fixture::new(json!([]));

        let report = fixture.run().await;

        assert_run_status(&report, RunStatus::Completed);
        assert_eq!(fixture.validate.call_count(), 0);
        assert_eq!(fixture.report.call_count(), 0);
        assert_eq!(
            report.output(keys::LEAD_REPORT).unwrap(),
            &serde_json::to_value(LeadReport::no_leads()).unwrap()
        );
    }

    #[tokio::test]
    async fn test_report_failure_degrades_to_empty_report() {
        let mut fixture = Fixture::new(json!([{"name": "Acme"}]));
        fixture.report = Arc::new(MockFunction::new("write_report", |_| json!({"summary": "wrong shape"})));

        let report = fixture.run().await;

        assert_run_status(&report, RunStatus::Degraded);
        let lead_report = report.output(keys::LEAD_REPORT).unwrap();
        assert_eq!(lead_report["total_leads_found"], json!(0));
        assert!(lead_report["methodology_notes"]
            .as_str()
            .unwrap()
            .starts_with("Report unavailable"));
    }

    #[tokio::test]
    async fn test_failed_analysis_drops_only_that_lead() {
        let mut fixture = Fixture::new(json!([{"name": "Acme"}, {"name": "Globex"}]));
        fixture.signals = Arc::new(
            MockFunction::new("analyze_signals", |_| json!({"recommendation_score": 0.9})).failing_for("Globex"),
        );

        let report = fixture.run().await;

        assert_run_status(&report, RunStatus::Degraded);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage, "analyze_leads");
        assert_eq!(report.output(keys::LEAD_ANALYSES).unwrap().as_array().unwrap().len(), 1);
    }
}

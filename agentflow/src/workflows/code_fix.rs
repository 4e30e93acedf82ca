//! Code review followed by a bounded fix loop.
//!
//! The review sequence analyzes, style-checks and tests the submitted code,
//! updates the grading counters and looks up the principal's past feedback
//! before writing new feedback. The fix loop proposes fixes, re-tests
//! and re-checks them, and compiles a fix report each pass; a SUCCESSFUL
//! report escalates out of the loop. A fix summary is written exactly once.

use super::{number, Collaborator};
use crate::config::AgentflowConfig;
use crate::context::StageContext;
use crate::core::StageOutput;
use crate::errors::{ConfigurationError, StageError};
use crate::pipeline::{PipelineBuilder, RetryLoop, SequentialPipeline};
use crate::stages::{CallStage, FnStage, Stage};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// State keys used by the code-fix workflow.
pub mod keys {
    /// The submitted code.
    pub const CODE_TO_REVIEW: &str = "code_to_review";
    /// Structural analysis of the code.
    pub const CODE_ANALYSIS: &str = "code_analysis";
    /// Style checker answer; carries a numeric `score`.
    pub const STYLE_CHECK: &str = "style_check";
    /// Style score of the submission.
    pub const STYLE_SCORE: &str = "style_score";
    /// Test runner answer for the submission.
    pub const TEST_EXECUTION_SUMMARY: &str = "test_execution_summary";
    /// Counters written after the review.
    pub const GRADING_PROGRESS: &str = "grading_progress";
    /// Number of gradings of this run.
    pub const GRADING_ATTEMPTS: &str = "grading_attempts";
    /// When this run was last graded.
    pub const LAST_GRADING_TIME: &str = "last_grading_time";
    /// Style score change since the principal's previous submission.
    pub const SCORE_IMPROVEMENT: &str = "score_improvement";
    /// Feedback from earlier submissions, as read from the principal's cache.
    pub const PAST_FEEDBACK: &str = "past_feedback";
    /// Review feedback.
    pub const FINAL_FEEDBACK: &str = "final_feedback";
    /// Proposed fixes.
    pub const CODE_FIXES: &str = "code_fixes";
    /// Test runner answer for the fixed code.
    pub const FIX_TEST_EXECUTION_SUMMARY: &str = "fix_test_execution_summary";
    /// Style checker answer for the fixed code.
    pub const FIXED_STYLE_CHECK: &str = "fixed_style_check";
    /// Style score of the fixed code.
    pub const FIXED_STYLE_SCORE: &str = "fixed_style_score";
    /// The latest fix report.
    pub const FIX_REPORT: &str = "fix_report";
    /// Status of the latest fix report.
    pub const FIX_STATUS: &str = "fix_status";
    /// Summary of the fix loop, written once.
    pub const FIX_SUMMARY: &str = "fix_summary";
    /// Iterations and exit reason of the fix loop.
    pub const FIX_LOOP: &str = "fix_loop";
    /// Submissions by the principal across runs.
    pub const USER_TOTAL_SUBMISSIONS: &str = "user:total_submissions";
    /// The principal's latest style score.
    pub const USER_LAST_STYLE_SCORE: &str = "user:last_style_score";
    /// The principal's latest test pass rate.
    pub const USER_LAST_TEST_PASS_RATE: &str = "user:last_test_pass_rate";
    /// When the principal last submitted code.
    pub const USER_LAST_SUBMISSION_TIME: &str = "user:last_submission_time";
    /// Cached feedback history of the principal.
    pub const USER_PAST_FEEDBACK_CACHE: &str = "user:past_feedback_cache";
    /// When the current run started processing.
    pub const PROCESSING_TIMESTAMP: &str = "temp:processing_timestamp";
}

/// Style score a fix must reach to be SUCCESSFUL.
pub const PERFECT_STYLE_SCORE: f64 = 100.0;

/// Pass rate and completeness of a test run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    /// Passed tests, as a percentage.
    pub pass_rate: f64,
    /// True if tests ran and none failed.
    pub all_pass: bool,
}

/// Reads a test runner answer.
///
/// Accepts an explicit `pass_rate` (with an optional `failed` count), a
/// nested `test_summary` with `total_tests_run`/`tests_passed`, or flat
/// `passed`/`total` counts. Returns `None` for anything else.
#[must_use]
pub fn test_outcome(summary: &Value) -> Option<TestOutcome> {
    if let Some(pass_rate) = number(summary, "pass_rate") {
        let all_pass = match number(summary, "failed") {
            Some(failed) => failed <= 0.0,
            None => pass_rate >= 100.0,
        };
        return Some(TestOutcome { pass_rate, all_pass });
    }

    let (passed, total) = match summary.get("test_summary") {
        Some(nested) => (number(nested, "tests_passed")?, number(nested, "total_tests_run")?),
        None => (number(summary, "passed")?, number(summary, "total")?),
    };
    if total <= 0.0 {
        return Some(TestOutcome {
            pass_rate: 0.0,
            all_pass: false,
        });
    }
    Some(TestOutcome {
        pass_rate: passed / total * 100.0,
        all_pass: passed >= total,
    })
}

/// Outcome of one fix attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FixStatus {
    /// Every test passes and the style is perfect.
    Successful,
    /// Tests or style improved.
    Partial,
    /// Nothing improved.
    Failed,
}

impl fmt::Display for FixStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Successful => write!(f, "SUCCESSFUL"),
            Self::Partial => write!(f, "PARTIAL"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Improvement of the fixed code over the submission.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Improvements {
    /// Pass-rate change, in percentage points.
    pub tests: f64,
    /// Style score change.
    pub style: f64,
}

/// The report compiled after every fix attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixReport {
    /// Overall status.
    pub status: FixStatus,
    /// Pass rate of the submission.
    pub original_pass_rate: f64,
    /// Pass rate of the fixed code.
    pub fixed_pass_rate: f64,
    /// Whether every test of the fixed code passes.
    pub all_tests_pass: bool,
    /// Style score of the submission.
    pub original_style_score: f64,
    /// Style score of the fixed code.
    pub fixed_style_score: f64,
    /// What improved.
    pub improvements: Improvements,
    /// One-line summary.
    pub summary: String,
}

impl FixReport {
    /// Compares the fixed code with the submission.
    #[must_use]
    pub fn compile(
        original: Option<TestOutcome>,
        fixed: Option<TestOutcome>,
        original_style_score: f64,
        fixed_style_score: f64,
    ) -> Self {
        let original_pass_rate = original.map_or(0.0, |o| o.pass_rate);
        let fixed_pass_rate = fixed.map_or(0.0, |o| o.pass_rate);
        let all_tests_pass = fixed.is_some_and(|o| o.all_pass);
        let improvements = Improvements {
            tests: fixed_pass_rate - original_pass_rate,
            style: fixed_style_score - original_style_score,
        };

        let status = if all_tests_pass && fixed_style_score >= PERFECT_STYLE_SCORE {
            FixStatus::Successful
        } else if improvements.tests > 0.0 || improvements.style > 0.0 {
            FixStatus::Partial
        } else {
            FixStatus::Failed
        };

        Self {
            status,
            original_pass_rate,
            fixed_pass_rate,
            all_tests_pass,
            original_style_score,
            fixed_style_score,
            improvements,
            summary: format!(
                "{status}: tests {original_pass_rate:.1}% -> {fixed_pass_rate:.1}%, style {original_style_score:.1} -> {fixed_style_score:.1}"
            ),
        }
    }
}

/// Counters written after each review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingProgress {
    /// Gradings of this run.
    pub grading_attempts: u64,
    /// Submissions by the principal.
    pub total_submissions: u64,
    /// Style score of this submission.
    pub style_score: f64,
    /// Change since the principal's previous submission; a first
    /// submission is compared against 0.
    pub score_improvement: f64,
    /// Pass rate of this submission, if the tests reported one.
    pub test_pass_rate: Option<f64>,
}

fn style_score(ctx: &StageContext, key: &str) -> f64 {
    number(&ctx.state().get(key, Value::Null), "score").unwrap_or(0.0)
}

fn update_progress_stage(ctx: &StageContext) -> Result<StageOutput, StageError> {
    let state = ctx.state();
    let style = style_score(ctx, keys::STYLE_CHECK);
    let previous_style = state.get_as(keys::USER_LAST_STYLE_SCORE, 0.0);
    let tests = test_outcome(&state.get(keys::TEST_EXECUTION_SUMMARY, Value::Null));
    let progress = GradingProgress {
        grading_attempts: state.get_as(keys::GRADING_ATTEMPTS, 0_u64) + 1,
        total_submissions: state.get_as(keys::USER_TOTAL_SUBMISSIONS, 0_u64) + 1,
        style_score: style,
        score_improvement: style - previous_style,
        test_pass_rate: tests.map(|t| t.pass_rate),
    };

    let now = Utc::now().to_rfc3339();
    let actions = ctx.actions();
    actions.set(keys::PROCESSING_TIMESTAMP, json!(now));
    actions.set(keys::LAST_GRADING_TIME, json!(now));
    actions.set(keys::GRADING_ATTEMPTS, json!(progress.grading_attempts));
    actions.set(keys::USER_TOTAL_SUBMISSIONS, json!(progress.total_submissions));
    actions.set(keys::USER_LAST_SUBMISSION_TIME, json!(now));
    actions.set(keys::STYLE_SCORE, json!(style));
    actions.set(keys::USER_LAST_STYLE_SCORE, json!(style));
    actions.set(keys::SCORE_IMPROVEMENT, json!(progress.score_improvement));
    if let Some(rate) = progress.test_pass_rate {
        actions.set(keys::USER_LAST_TEST_PASS_RATE, json!(rate));
    }

    StageOutput::from_serializable(&progress)
        .map_err(|e| StageError::fatal("update_progress", format!("unserializable progress: {e}")))
}

fn search_past_feedback_stage(ctx: &StageContext) -> Result<StageOutput, StageError> {
    let past = match ctx.state().get(keys::USER_PAST_FEEDBACK_CACHE, json!([])) {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    };
    let found = !past.is_empty();
    debug!(count = past.len(), "Loaded past feedback");
    Ok(StageOutput::ok(Value::Array(past)).with_metadata("feedback_found", json!(found)))
}

fn validate_fix_stage(ctx: &StageContext) -> Result<StageOutput, StageError> {
    let state = ctx.state();
    let report = FixReport::compile(
        test_outcome(&state.get(keys::TEST_EXECUTION_SUMMARY, Value::Null)),
        test_outcome(&state.get(keys::FIX_TEST_EXECUTION_SUMMARY, Value::Null)),
        state.get_as(keys::STYLE_SCORE, 0.0),
        style_score(ctx, keys::FIXED_STYLE_CHECK),
    );

    info!(
        status = %report.status,
        iteration = ?ctx.loop_iteration(),
        fixed_pass_rate = report.fixed_pass_rate,
        fixed_style_score = report.fixed_style_score,
        "Fix attempt validated"
    );
    let actions = ctx.actions();
    actions.set(keys::FIX_STATUS, json!(report.status));
    actions.set(keys::FIXED_STYLE_SCORE, json!(report.fixed_style_score));
    if report.status == FixStatus::Successful {
        actions.escalate();
    }

    StageOutput::from_serializable(&report)
        .map(|out| out.with_metadata("status", json!(report.status)))
        .map_err(|e| StageError::fatal("validate_fix", format!("unserializable fix report: {e}")))
}

/// The collaborators of the code-fix workflow.
#[derive(Clone)]
pub struct CodeFixCollaborators {
    /// Analyzes the structure of the code.
    pub analyze_code: Collaborator,
    /// Checks style; answers with a numeric `score` out of 100.
    pub check_style: Collaborator,
    /// Runs the tests; answers with pass counts or a pass rate.
    pub run_tests: Collaborator,
    /// Writes review feedback.
    pub synthesize_feedback: Collaborator,
    /// Proposes fixed code.
    pub fix_code: Collaborator,
    /// Writes the fix summary.
    pub synthesize_fix: Collaborator,
}

impl fmt::Debug for CodeFixCollaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeFixCollaborators")
            .field("analyze_code", &self.analyze_code.name())
            .field("check_style", &self.check_style.name())
            .field("run_tests", &self.run_tests.name())
            .field("synthesize_feedback", &self.synthesize_feedback.name())
            .field("fix_code", &self.fix_code.name())
            .field("synthesize_fix", &self.synthesize_fix.name())
            .finish()
    }
}

/// Builds the review sequence.
///
/// # Errors
///
/// Returns a [`ConfigurationError`] if the sequence cannot be assembled.
pub fn review_pipeline(collaborators: &CodeFixCollaborators) -> Result<SequentialPipeline, ConfigurationError> {
    PipelineBuilder::new("code_review")
        .stage(Arc::new(
            CallStage::new("analyze_code", keys::CODE_ANALYSIS, Arc::clone(&collaborators.analyze_code))
                .with_inputs(&[keys::CODE_TO_REVIEW]),
        ))
        .stage(Arc::new(
            CallStage::new("check_style", keys::STYLE_CHECK, Arc::clone(&collaborators.check_style))
                .with_inputs(&[keys::CODE_TO_REVIEW])
                .with_degraded_output(json!({ "score": 0 })),
        ))
        .stage(Arc::new(
            CallStage::new("run_tests", keys::TEST_EXECUTION_SUMMARY, Arc::clone(&collaborators.run_tests))
                .with_inputs(&[keys::CODE_TO_REVIEW]),
        ))
        .stage(Arc::new(
            FnStage::new("update_progress", update_progress_stage).with_output_key(keys::GRADING_PROGRESS),
        ))
        .stage(Arc::new(
            FnStage::new("search_past_feedback", search_past_feedback_stage)
                .with_output_key(keys::PAST_FEEDBACK)
                .with_degraded_output(json!([])),
        ))
        .stage(Arc::new(
            CallStage::new(
                "synthesize_feedback",
                keys::FINAL_FEEDBACK,
                Arc::clone(&collaborators.synthesize_feedback),
            )
            .with_inputs(&[
                keys::CODE_ANALYSIS,
                keys::STYLE_SCORE,
                keys::TEST_EXECUTION_SUMMARY,
                keys::SCORE_IMPROVEMENT,
                keys::PAST_FEEDBACK,
            ]),
        ))
        .build()
}

/// Builds the fix loop: fix, re-test, re-check style, validate; then
/// summarize once.
///
/// # Errors
///
/// Returns a [`ConfigurationError`] if `max_iterations` is zero.
pub fn fix_loop(
    collaborators: &CodeFixCollaborators,
    config: &AgentflowConfig,
) -> Result<RetryLoop, ConfigurationError> {
    let body: Vec<Arc<dyn Stage>> = vec![
        Arc::new(
            CallStage::new("fix_code", keys::CODE_FIXES, Arc::clone(&collaborators.fix_code)).with_inputs(&[
                keys::CODE_TO_REVIEW,
                keys::CODE_ANALYSIS,
                keys::STYLE_SCORE,
                keys::TEST_EXECUTION_SUMMARY,
                keys::FIX_REPORT,
            ]),
        ),
        Arc::new(
            CallStage::new(
                "run_fix_tests",
                keys::FIX_TEST_EXECUTION_SUMMARY,
                Arc::clone(&collaborators.run_tests),
            )
            .with_inputs(&[keys::CODE_FIXES]),
        ),
        Arc::new(
            CallStage::new(
                "check_fixed_style",
                keys::FIXED_STYLE_CHECK,
                Arc::clone(&collaborators.check_style),
            )
            .with_inputs(&[keys::CODE_FIXES])
            .with_degraded_output(json!({ "score": 0 })),
        ),
        Arc::new(FnStage::new("validate_fix", validate_fix_stage).with_output_key(keys::FIX_REPORT)),
    ];
    let synthesis = Arc::new(
        CallStage::new("synthesize_fix", keys::FIX_SUMMARY, Arc::clone(&collaborators.synthesize_fix))
            .with_inputs(&[keys::FIX_REPORT, keys::CODE_FIXES, keys::FIX_STATUS])
            .with_degraded_output(json!({ "summary": "Fix summary unavailable" })),
    );

    Ok(RetryLoop::from_config("fix_attempt_loop", body, synthesis, config)?.with_output_key(keys::FIX_LOOP))
}

/// Builds the full review-then-fix pipeline.
///
/// # Errors
///
/// Returns a [`ConfigurationError`] if either part cannot be assembled.
pub fn pipeline(
    collaborators: &CodeFixCollaborators,
    config: &AgentflowConfig,
) -> Result<SequentialPipeline, ConfigurationError> {
    PipelineBuilder::new("code_review_assistant")
        .stage(Arc::new(review_pipeline(collaborators)?))
        .stage(Arc::new(fix_loop(collaborators, config)?))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RunIdentity, StateStore};
    use crate::pipeline::{ExitReason, PipelineRunner, RunReport, RunStatus};
    use crate::session::{load_or_create, save_run, InMemorySessionStore, SessionStore};
    use crate::testing::{assert_run_status, MockFunction};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_outcome_formats() {
        let explicit = test_outcome(&json!({"pass_rate": 80.0, "failed": 1})).unwrap();
        assert_eq!(explicit, TestOutcome { pass_rate: 80.0, all_pass: false });

        let nested = test_outcome(&json!({"test_summary": {"total_tests_run": 4, "tests_passed": 4}})).unwrap();
        assert_eq!(nested, TestOutcome { pass_rate: 100.0, all_pass: true });

        let flat = test_outcome(&json!({"passed": 1, "total": 4})).unwrap();
        assert!((flat.pass_rate - 25.0).abs() < 1e-9);

        let empty = test_outcome(&json!({"passed": 0, "total": 0})).unwrap();
        assert!(!empty.all_pass);

        assert_eq!(test_outcome(&json!({"status": "ok"})), None);
    }

    fn outcome(pass_rate: f64) -> Option<TestOutcome> {
        Some(TestOutcome {
            pass_rate,
            all_pass: pass_rate >= 100.0,
        })
    }

    #[test]
    fn test_fix_status() {
        assert_eq!(FixReport::compile(outcome(50.0), outcome(100.0), 70.0, 100.0).status, FixStatus::Successful);
        assert_eq!(FixReport::compile(outcome(50.0), outcome(100.0), 70.0, 90.0).status, FixStatus::Partial);
        assert_eq!(FixReport::compile(outcome(50.0), outcome(50.0), 70.0, 80.0).status, FixStatus::Partial);
        assert_eq!(FixReport::compile(outcome(50.0), outcome(40.0), 70.0, 70.0).status, FixStatus::Failed);
        assert_eq!(FixReport::compile(None, None, 0.0, 0.0).status, FixStatus::Failed);
    }

    #[test]
    fn test_fix_report_fields() {
        let report = FixReport::compile(outcome(50.0), outcome(75.0), 60.0, 90.0);
        assert_eq!(report.improvements, Improvements { tests: 25.0, style: 30.0 });
        assert_eq!(report.summary, "PARTIAL: tests 50.0% -> 75.0%, style 60.0 -> 90.0");
        assert_eq!(serde_json::to_value(report.status).unwrap(), json!("PARTIAL"));
    }

    /// The test runner reports the submission at 50%, then the fixes pass
    /// once `fixed_after` fix runs have happened.
    fn collaborators(fixed_after: usize) -> (CodeFixCollaborators, Arc<MockFunction>, Arc<MockFunction>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let run_tests = Arc::new(MockFunction::new("run_tests", move |input| {
            if input.get(keys::CODE_FIXES).is_none() {
                return json!({"passed": 2, "total": 4, "failed": 2});
            }
            if runs.fetch_add(1, Ordering::SeqCst) + 1 >= fixed_after {
                json!({"passed": 4, "total": 4})
            } else {
                json!({"passed": 3, "total": 4})
            }
        }));
        let check_style = Arc::new(MockFunction::new("check_style", |input| {
            if input.get(keys::CODE_FIXES).is_some() {
                json!({"score": 100})
            } else {
                json!({"score": 72})
            }
        }));
        let fix_code = Arc::new(MockFunction::new("fix_code", |_| json!({"code": "fixed"})));
        let synthesize_fix = Arc::new(MockFunction::new("synthesize_fix", |input| {
            json!({"summary": format!("status {}", input[keys::FIX_STATUS])})
        }));

        let collaborators = CodeFixCollaborators {
            analyze_code: Arc::new(MockFunction::new("analyze_code", |_| json!({"functions": 3}))),
            check_style,
            run_tests,
            synthesize_feedback: Arc::new(MockFunction::new("synthesize_feedback", |_| {
                json!({"feedback": "ok"})
            })),
            fix_code: fix_code.clone(),
            synthesize_fix: synthesize_fix.clone(),
        };
        (collaborators, fix_code, synthesize_fix)
    }

    fn runner(collaborators: &CodeFixCollaborators) -> PipelineRunner {
        let config = AgentflowConfig::default();
        PipelineRunner::new(Arc::new(pipeline(collaborators, &config).unwrap()), config).unwrap()
    }

    async fn review(collaborators: &CodeFixCollaborators) -> RunReport {
        let store = Arc::new(StateStore::from_entries([(keys::CODE_TO_REVIEW, json!("def f(): pass"))]));
        runner(collaborators).run(RunIdentity::new("student"), store).await
    }

    #[tokio::test]
    async fn test_successful_fix_escalates() {
        let (collaborators, fix_code, synthesize_fix) = collaborators(2);

        let report = review(&collaborators).await;

        assert_run_status(&report, RunStatus::Completed);
        assert_eq!(report.exit_reason, Some(ExitReason::Escalated));
        assert_eq!(report.loops[0].iterations, 2);
        assert_eq!(fix_code.call_count(), 2);
        assert_eq!(synthesize_fix.call_count(), 1);
        assert_eq!(report.output(keys::FIX_STATUS), Some(&json!("SUCCESSFUL")));
        assert_eq!(report.output(keys::FIX_SUMMARY), Some(&json!({"summary": "status \"SUCCESSFUL\""})));
        assert_eq!(report.output(keys::FIX_LOOP).unwrap()["exit_reason"], json!("escalated"));
    }

    #[tokio::test]
    async fn test_fix_loop_stops_at_cap() {
        let (collaborators, fix_code, synthesize_fix) = collaborators(usize::MAX);

        let report = review(&collaborators).await;

        assert_eq!(report.exit_reason, Some(ExitReason::MaxIterations));
        assert_eq!(fix_code.call_count(), 3);
        assert_eq!(synthesize_fix.call_count(), 1);
        assert_eq!(report.output(keys::FIX_STATUS), Some(&json!("PARTIAL")));
        assert_eq!(report.stage_records("validate_fix").len(), 3);
    }

    #[tokio::test]
    async fn test_review_updates_progress_counters() {
        let (collaborators, _, _) = collaborators(1);

        let report = review(&collaborators).await;

        assert_eq!(report.output(keys::GRADING_ATTEMPTS), Some(&json!(1)));
        assert_eq!(report.output(keys::STYLE_SCORE), Some(&json!(72.0)));
        assert_eq!(report.output(keys::SCORE_IMPROVEMENT), Some(&json!(72.0)));
        assert_eq!(report.output(keys::PAST_FEEDBACK), Some(&json!([])));
        assert!(report.output(keys::LAST_GRADING_TIME).is_some());
        assert!(report.output(keys::PROCESSING_TIMESTAMP).is_none());
    }

    #[tokio::test]
    async fn test_counters_persist_across_submissions() {
        let (collaborators, _, _) = collaborators(1);
        let sessions = InMemorySessionStore::new();
        let runner = runner(&collaborators);

        for _ in 0..2 {
            let identity = RunIdentity::new("student");
            let store = load_or_create(&sessions, &identity).await.unwrap();
            store.set(keys::CODE_TO_REVIEW, json!("x = 1"));
            save_run(&sessions, &identity, &store).await.unwrap();
            let report = runner.run_session(&sessions, identity).await.unwrap();
            assert_eq!(report.output(keys::GRADING_ATTEMPTS), Some(&json!(1)));
        }

        let shared = sessions.load_shared("student").await.unwrap();
        assert_eq!(shared.user.get(keys::USER_TOTAL_SUBMISSIONS), Some(&json!(2)));
        assert!(shared.user.get(keys::USER_LAST_SUBMISSION_TIME).is_some());
        assert_eq!(shared.user.get(keys::USER_LAST_STYLE_SCORE), Some(&json!(72.0)));
        assert_eq!(shared.user.get(keys::USER_LAST_TEST_PASS_RATE), Some(&json!(50.0)));
    }

    #[tokio::test]
    async fn test_cached_feedback_reaches_synthesis_across_sessions() {
        let (mut collaborators, _, _) = collaborators(1);
        let feedback_inputs = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let recorded = Arc::clone(&feedback_inputs);
        collaborators.synthesize_feedback = Arc::new(MockFunction::new("synthesize_feedback", move |input| {
            recorded.lock().push(input[keys::PAST_FEEDBACK].clone());
            json!({"feedback": "ok"})
        }));
        let sessions = InMemorySessionStore::new();
        let runner = runner(&collaborators);
        let cache = json!(["watch line length", "name tests clearly"]);

        for submission in 0..2 {
            let identity = RunIdentity::new("student");
            let store = load_or_create(&sessions, &identity).await.unwrap();
            if submission == 0 {
                store.set(keys::USER_PAST_FEEDBACK_CACHE, cache.clone());
            }
            store.set(keys::CODE_TO_REVIEW, json!("x = 1"));
            save_run(&sessions, &identity, &store).await.unwrap();
            let report = runner.run_session(&sessions, identity).await.unwrap();
            assert_eq!(report.output(keys::PAST_FEEDBACK), Some(&cache));
        }

        assert_eq!(*feedback_inputs.lock(), vec![cache.clone(), cache.clone()]);
        let shared = sessions.load_shared("student").await.unwrap();
        assert_eq!(shared.user.get(keys::USER_PAST_FEEDBACK_CACHE), Some(&cache));
        assert!(shared.user.get(keys::USER_LAST_SUBMISSION_TIME).is_some());
    }

    #[tokio::test]
    async fn test_score_improvement_against_previous_submission() {
        let (collaborators, _, _) = collaborators(1);
        let store = Arc::new(StateStore::from_entries([
            (keys::CODE_TO_REVIEW, json!("x = 1")),
            (keys::USER_LAST_STYLE_SCORE, json!(80.0)),
        ]));

        let report = runner(&collaborators).run(RunIdentity::new("student"), store).await;

        assert_eq!(report.output(keys::SCORE_IMPROVEMENT), Some(&json!(-8.0)));
        assert_eq!(report.output(keys::GRADING_PROGRESS).unwrap()["score_improvement"], json!(-8.0));
    }
}

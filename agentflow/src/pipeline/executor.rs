//! Execution of a single stage against the run's state store.

use crate::context::{ExecutionContext, RunContext, StageContext, ESCALATE_KEY};
use crate::core::{StageKind, StageOutput, StageStatus};
use crate::errors::{ExternalCallError, StageError};
use crate::events::event_types;
use crate::stages::{Stage, StageRecord};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info_span, warn, Instrument};

/// Runs one stage and folds its result into the run.
///
/// On success the stage's buffered writes are applied, an escalation sets the
/// session `escalate` flag and the output is stored under the stage's output
/// key. A recoverable error stores the stage's degraded output instead and
/// returns it as a degraded [`StageOutput`]. Anything else is returned as an
/// error after being journaled; the stage's writes are discarded.
pub async fn run_stage(
    stage: &dyn Stage,
    run: &Arc<RunContext>,
    iteration: Option<u32>,
) -> Result<StageOutput, StageError> {
    let name = stage.name().to_string();
    let kind = stage.kind();

    if run.is_cancelled() {
        let err = StageError::cancelled(&name, run.cancellation_token().reason_or_default());
        run.journal().record(
            StageRecord::new(&name, kind, StageStatus::Cancelled, Utc::now())
                .with_iteration(iteration)
                .with_error(&err),
        );
        return Err(err);
    }

    let ctx = StageContext::new(Arc::clone(run), &name).in_loop_pass(iteration);
    let started_at = Utc::now();
    ctx.try_emit_event(
        event_types::STAGE_STARTED,
        Some(json!({ "kind": kind, "iteration": iteration })),
    );

    let span = info_span!("stage", stage = %name, kind = %kind, iteration = ?iteration);
    let result = execute_guarded(stage, &ctx, kind).instrument(span).await;

    match result {
        Ok(output) => {
            let store = run.store();
            store.apply(ctx.actions().take_delta());
            if ctx.actions().escalated() {
                debug!(stage = %name, iteration = ?iteration, "Stage escalated");
                store.set(ESCALATE_KEY, json!(true));
            }
            if let Some(key) = stage.output_key() {
                store.set(key, output.value.clone());
            }

            let status = if output.degraded {
                StageStatus::Degraded
            } else {
                StageStatus::Ok
            };
            let record = StageRecord::new(&name, kind, status, started_at).with_iteration(iteration);
            debug!(stage = %name, status = %status, duration_ms = record.duration_ms, "Stage completed");
            ctx.try_emit_event(
                event_types::STAGE_COMPLETED,
                Some(json!({ "status": status, "duration_ms": record.duration_ms })),
            );
            run.journal().record(record);
            Ok(output)
        }
        Err(err) if err.is_recoverable() => {
            let degraded = stage.degraded_output(&err);
            if let Some(key) = stage.output_key() {
                run.store().set(key, degraded.clone());
            }
            if !kind.is_composite() {
                run.journal().failures().record_stage(&name, &err);
            }

            let record = StageRecord::new(&name, kind, StageStatus::Degraded, started_at)
                .with_iteration(iteration)
                .with_error(&err);
            warn!(stage = %name, error = %err, "Stage degraded");
            ctx.try_emit_event(
                event_types::STAGE_DEGRADED,
                Some(json!({ "error": err.to_dict(), "duration_ms": record.duration_ms })),
            );
            run.journal().record(record);
            Ok(StageOutput::degraded(degraded).with_metadata("error", json!(err.to_string())))
        }
        Err(err) => {
            let status = if err.is_cancelled() {
                StageStatus::Cancelled
            } else {
                StageStatus::Failed
            };
            if !kind.is_composite() && !err.is_cancelled() {
                run.journal().failures().record_stage(&name, &err);
            }

            let record = StageRecord::new(&name, kind, status, started_at)
                .with_iteration(iteration)
                .with_error(&err);
            if err.is_cancelled() {
                warn!(stage = %name, error = %err, "Stage cancelled");
            } else {
                error!(stage = %name, error = %err, "Stage failed");
            }
            ctx.try_emit_event(
                event_types::STAGE_FAILED,
                Some(json!({ "status": status, "error": err.to_dict() })),
            );
            run.journal().record(record);
            Err(err)
        }
    }
}

/// Executes a stage, bounding leaf stages by the stage timeout and run
/// cancellation. Composite stages check cancellation between their children.
async fn execute_guarded(
    stage: &dyn Stage,
    ctx: &StageContext,
    kind: StageKind,
) -> Result<StageOutput, StageError> {
    if kind.is_composite() {
        return stage.execute(ctx).await;
    }

    let token = Arc::clone(ctx.cancellation_token());
    let timeout = ctx.config().stage_timeout();
    let work = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, stage.execute(ctx))
                .await
                .unwrap_or_else(|_| Err(ExternalCallError::timeout(stage.name(), limit).into())),
            None => stage.execute(ctx).await,
        }
    };

    tokio::select! {
        biased;
        () = token.cancelled() => Err(StageError::cancelled(stage.name(), token.reason_or_default())),
        result = work => result,
    }
}

//! Structured observability hooks for pipeline run lifecycle events.
//!
//! This module provides:
//! - A run-scoped tracing span via `run_span`
//! - Emission functions for key lifecycle events: run start/finish, stage
//!   start/finish/skip, gate evaluation, tag publication and deployment
//!
//! Events are emitted at `info!` level with an `event` field naming them.
//! For JSON output, initialise tracing with `json = true`.

use tracing::info;

/// Span that scopes every event of one run.
///
/// Attach it to the run future with `tracing::Instrument` so the future
/// stays `Send`:
///
/// ```ignore
/// pipeline_future.instrument(run_span("run-12345")).await
/// ```
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("gatehouse.run", run_id = %run_id)
}

/// Emit event: run started.
pub fn emit_run_started(run_id: &str, pipeline: &str, trigger: &str, git_ref: &str) {
    info!(
        event = "run.started",
        run_id = %run_id,
        pipeline = %pipeline,
        trigger = %trigger,
        git_ref = %git_ref,
    );
}

/// Emit event: run reached its terminal state.
pub fn emit_run_finished(run_id: &str, state: &str, duration_ms: u64, soft_failed: usize) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        state = %state,
        duration_ms = duration_ms,
        soft_failed = soft_failed,
    );
}

pub fn emit_stage_started(run_id: &str, stage: &str) {
    info!(event = "stage.started", run_id = %run_id, stage = %stage);
}

pub fn emit_stage_finished(run_id: &str, stage: &str, state: &str, findings: usize) {
    info!(
        event = "stage.finished",
        run_id = %run_id,
        stage = %stage,
        state = %state,
        findings = findings,
    );
}

pub fn emit_stage_skipped(run_id: &str, stage: &str, reason: &str) {
    info!(event = "stage.skipped", run_id = %run_id, stage = %stage, reason = %reason);
}

/// Emit event: gate evaluation completed for a stage.
pub fn emit_gate_evaluated(
    run_id: &str,
    stage: &str,
    outcome: &str,
    blocking: usize,
    warnings: usize,
) {
    info!(
        event = "gate.evaluated",
        run_id = %run_id,
        stage = %stage,
        outcome = %outcome,
        blocking = blocking,
        warnings = warnings,
    );
}

pub fn emit_tag_published(run_id: &str, tag: &str) {
    info!(event = "tag.published", run_id = %run_id, tag = %tag);
}

pub fn emit_deploy_issued(deployment_id: &str, environment: &str, tag: &str) {
    info!(
        event = "deploy.issued",
        deployment_id = %deployment_id,
        environment = %environment,
        tag = %tag,
    );
}

/// Emit event: the tag ledger rejected or failed a write (warning level).
pub fn emit_publish_error(run_id: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "tag.publish_error", run_id = %run_id, error = %error);
}

//! Gated pipeline orchestration.
//!
//! A [`Pipeline`] ties one run together: it derives the run's tag, schedules
//! the stage graph, and records the tag in the [`TagStore`] only when the run
//! SUCCEEDED and its artifact stage got through its gate.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, Instrument};

use gatehouse_core::obs;
use gatehouse_core::reporting::REPORT_SCHEMA_VERSION;
use gatehouse_core::{
    Artifact, ArtifactTagger, PipelineRun, RunReport, RunState, StageGraph, Trigger,
};
use gatehouse_state::TagStore;

use crate::cancel::CancelToken;
use crate::error::{PipelineError, PipelineResult};
use crate::executor::StageExecutor;
use crate::scheduler::{Scheduler, SchedulerOptions};
use crate::stage::RunContext;

/// Per-invocation knobs that are not part of the definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Image repository exposed to stages as `GATEHOUSE_REGISTRY`.
    pub registry: Option<String>,
    /// Build sequence number used in the tag. Starts at 1.
    pub build_seq: u32,
    /// Overrides the definition's `max_parallel` when set.
    pub max_parallel: Option<usize>,
    /// Overrides the definition's `default_timeout_secs` when set.
    pub default_timeout: Option<Duration>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            registry: None,
            build_seq: 1,
            max_parallel: None,
            default_timeout: None,
        }
    }
}

pub struct Pipeline {
    graph: Arc<StageGraph>,
    executor: Arc<dyn StageExecutor>,
    store: Arc<dyn TagStore>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        graph: StageGraph,
        executor: Arc<dyn StageExecutor>,
        store: Arc<dyn TagStore>,
    ) -> Self {
        Self {
            graph: Arc::new(graph),
            executor,
            store,
            options: PipelineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    /// Run the pipeline once for `trigger` with a fresh run id.
    pub async fn run(&self, trigger: Trigger) -> PipelineResult<RunReport> {
        self.run_with(PipelineRun::new(trigger), CancelToken::never())
            .await
    }

    /// Run the pipeline for an existing run identity, honouring `cancel`.
    ///
    /// Stage failures are reported in the returned [`RunReport`]. An `Err` means
    /// the run was refused up front, or its tag could not be published; in the
    /// latter case [`PipelineError::report`] still carries the FAILED report.
    pub async fn run_with(
        &self,
        run: PipelineRun,
        cancel: CancelToken,
    ) -> PipelineResult<RunReport> {
        run.trigger.validate()?;
        let span = obs::run_span(run.run_id.as_str());
        self.execute(run, cancel).instrument(span).await
    }

    fn scheduler_options(&self) -> SchedulerOptions {
        let defaults = SchedulerOptions::from_graph(&self.graph);
        SchedulerOptions {
            max_parallel: self
                .options
                .max_parallel
                .filter(|&n| n > 0)
                .or(defaults.max_parallel),
            default_timeout: self.options.default_timeout.or(defaults.default_timeout),
        }
    }

    async fn execute(&self, run: PipelineRun, cancel: CancelToken) -> PipelineResult<RunReport> {
        let run_id = run.run_id.to_string();
        obs::emit_run_started(
            &run_id,
            self.graph.name(),
            run.trigger.kind.as_str(),
            &run.trigger.git_ref,
        );

        let mut ctx = RunContext::new(run.clone());
        ctx = match ArtifactTagger::for_run(&run).tag(&run.run_id, self.options.build_seq) {
            Ok(tag) => ctx.with_tag(tag),
            Err(e) => ctx.with_tagging_error(e.to_string()),
        };
        if let Some(registry) = &self.options.registry {
            ctx = ctx.with_registry(registry.clone());
        }

        let scheduler = Scheduler::new(Arc::clone(&self.graph), Arc::clone(&self.executor))
            .with_options(self.scheduler_options());
        let outcome = scheduler.run(&ctx, cancel).await?;

        let mut report = RunReport {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            pipeline: self.graph.name().to_string(),
            definition_digest: self.graph.digest(),
            run,
            state: outcome.state,
            tag: ctx.tag.clone(),
            artifact: None,
            stages: outcome.stages,
            started_at: outcome.started_at,
            finished_at: outcome.finished_at,
        };

        if let Some(tag) = self.publishable_tag(&report) {
            match self.store.put(&report.run.run_id, &tag).await {
                Ok(record) => {
                    obs::emit_tag_published(&run_id, &record.tag);
                    report.artifact = Some(Artifact {
                        tag: record.tag,
                        run_id: record.run_id,
                        created_at: record.created_at,
                    });
                }
                Err(source) => {
                    obs::emit_publish_error(&run_id, &source);
                    report.state = RunState::Failed;
                    report.finished_at = Utc::now();
                    self.finish(&report);
                    return Err(PipelineError::Publish {
                        run_id,
                        report: Box::new(report),
                        source,
                    });
                }
            }
        }

        self.finish(&report);
        Ok(report)
    }

    /// The tag to record, if the run earned one.
    fn publishable_tag(&self, report: &RunReport) -> Option<String> {
        if report.state != RunState::Succeeded {
            return None;
        }
        let artifact_stage = self.graph.artifact_stage()?;
        let state = report.state_of(artifact_stage)?;
        if !state.unlocks_dependents() {
            return None;
        }
        report.tag.clone()
    }

    fn finish(&self, report: &RunReport) {
        let run_id = report.run.run_id.as_str();
        obs::emit_run_finished(
            run_id,
            &report.state.to_string(),
            report.duration_ms(),
            report.soft_failed().len(),
        );
        info!(
            run_id = %run_id,
            state = %report.state,
            artifact = ?report.artifact.as_ref().map(|a| a.tag.as_str()),
            "Pipeline run finished"
        );
    }
}

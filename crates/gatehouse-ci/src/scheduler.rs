//! Stage graph scheduler.
//!
//! Drives one run of a validated [`StageGraph`]. A stage is dispatched as soon
//! as every predecessor has PASSED or SOFT_FAILED, so independent stages run
//! concurrently. A stage with any predecessor in HARD_FAILED, SKIPPED or
//! ABORTED is skipped without running, which propagates down the graph.
//!
//! Stage failures never surface as errors here. Timeouts and executor panics
//! become HARD_FAILED stages carrying a CRITICAL finding.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, warn};

use gatehouse_core::obs;
use gatehouse_core::{
    evaluate_gate, Finding, GateOutcome, RunState, StageDefinition, StageExecution, StageGraph,
    StageState,
};

use crate::cancel::CancelToken;
use crate::error::{PipelineError, PipelineResult};
use crate::executor::{StageExecutor, StageOutput};
use crate::stage::RunContext;

/// Run-wide scheduling limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Most stages executing at once. `None` means unbounded.
    pub max_parallel: Option<usize>,
    /// Timeout for stages that do not set their own.
    pub default_timeout: Option<Duration>,
}

impl SchedulerOptions {
    pub fn from_graph(graph: &StageGraph) -> Self {
        let definition = graph.definition();
        Self {
            max_parallel: definition.max_parallel.filter(|&n| n > 0),
            default_timeout: definition.default_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Every stage of one run in a terminal state.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleOutcome {
    pub state: RunState,
    /// Stage executions in dependency order.
    pub stages: Vec<StageExecution>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ScheduleOutcome {
    pub fn stage(&self, name: &str) -> Option<&StageExecution> {
        self.stages.iter().find(|s| s.stage == name)
    }
}

enum StageRun {
    Completed(StageOutput),
    TimedOut(Duration),
    Crashed(String),
}

/// Aborts the wrapped task when dropped, so a timed out or cancelled stage
/// does not keep running in the background.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn crash_message(err: JoinError) -> String {
    if err.is_cancelled() {
        return "executor task was cancelled".to_string();
    }
    let payload = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else {
        "executor panicked".to_string()
    }
}

pub struct Scheduler {
    graph: Arc<StageGraph>,
    executor: Arc<dyn StageExecutor>,
    options: SchedulerOptions,
}

impl Scheduler {
    pub fn new(graph: Arc<StageGraph>, executor: Arc<dyn StageExecutor>) -> Self {
        let options = SchedulerOptions::from_graph(&graph);
        Self {
            graph,
            executor,
            options,
        }
    }

    pub fn with_options(mut self, options: SchedulerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> SchedulerOptions {
        self.options
    }

    /// Execute every stage of the graph for the run in `ctx`.
    ///
    /// Returns once every stage is terminal. After `cancel` fires no stage is
    /// started, running stages are aborted and the run ends ABORTED.
    pub async fn run(
        &self,
        ctx: &RunContext,
        mut cancel: CancelToken,
    ) -> PipelineResult<ScheduleOutcome> {
        let started_at = Utc::now();
        let mut run = ActiveRun::new(self, ctx);
        let mut cancelled = false;

        loop {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            run.advance()?;
            if run.tasks.is_empty() {
                break;
            }
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                joined = run.tasks.join_next() => joined,
            };
            if let Some(joined) = joined {
                let (name, outcome) = joined.map_err(|e| PipelineError::Join(e.to_string()))?;
                run.complete(&name, outcome)?;
            }
        }

        if cancelled {
            run.abort_all().await?;
        }

        let state = if cancelled {
            RunState::Aborted
        } else if run
            .stages
            .iter()
            .any(|s| s.state == StageState::HardFailed)
        {
            RunState::Failed
        } else {
            RunState::Succeeded
        };

        Ok(ScheduleOutcome {
            state,
            stages: run.stages,
            started_at,
            finished_at: Utc::now(),
        })
    }
}

/// Mutable state of one scheduled run.
struct ActiveRun<'a> {
    scheduler: &'a Scheduler,
    ctx: &'a RunContext,
    run_id: String,
    stages: Vec<StageExecution>,
    index: HashMap<String, usize>,
    /// Findings pulled in through `gate_inputs`, keyed by the running stage.
    inherited: HashMap<String, Vec<Finding>>,
    tasks: JoinSet<(String, StageRun)>,
}

impl<'a> ActiveRun<'a> {
    fn new(scheduler: &'a Scheduler, ctx: &'a RunContext) -> Self {
        let stages: Vec<StageExecution> = scheduler
            .graph
            .topological_order()
            .into_iter()
            .map(|def| StageExecution::pending(def.name.clone()))
            .collect();
        let index = stages
            .iter()
            .enumerate()
            .map(|(i, s)| (s.stage.clone(), i))
            .collect();
        Self {
            scheduler,
            ctx,
            run_id: ctx.run.run_id.to_string(),
            stages,
            index,
            inherited: HashMap::new(),
            tasks: JoinSet::new(),
        }
    }

    fn state_of(&self, name: &str) -> StageState {
        self.index
            .get(name)
            .map(|&i| self.stages[i].state)
            .unwrap_or(StageState::Pending)
    }

    /// Skip, reject or dispatch every pending stage whose predecessors allow
    /// it, until nothing more changes.
    fn advance(&mut self) -> PipelineResult<()> {
        let scheduler = self.scheduler;
        loop {
            let mut progressed = false;
            for def in scheduler.graph.topological_order() {
                let i = self.index[&def.name];
                if self.stages[i].state != StageState::Pending {
                    continue;
                }

                let preds = scheduler.graph.predecessors(&def.name);
                if let Some(blocker) = preds
                    .iter()
                    .find(|p| self.state_of(p).blocks_dependents())
                {
                    let note = format!("predecessor {blocker} {}", self.state_of(blocker));
                    self.stages[i].skip(note.clone())?;
                    obs::emit_stage_skipped(&self.run_id, &def.name, &note);
                    progressed = true;
                    continue;
                }
                if !preds.iter().all(|p| self.state_of(p).unlocks_dependents()) {
                    continue;
                }

                if scheduler.graph.artifact_stage() == Some(def.name.as_str())
                    && self.ctx.tag.is_none()
                {
                    let reason = self
                        .ctx
                        .tagging_error
                        .clone()
                        .unwrap_or_else(|| "no tag computed for run".to_string());
                    let finding = Finding::critical(format!("cannot tag artifact: {reason}"))
                        .with_source(def.name.clone());
                    self.stages[i].reject(vec![finding], reason)?;
                    obs::emit_stage_finished(&self.run_id, &def.name, "HARD_FAILED", 1);
                    progressed = true;
                    continue;
                }

                let inherited = self.gate_input_findings(def);
                if !inherited.is_empty() {
                    let verdict = evaluate_gate(&inherited, &def.effective_policy());
                    if verdict.outcome == GateOutcome::HardFailed {
                        obs::emit_gate_evaluated(
                            &self.run_id,
                            &def.name,
                            "HARD_FAILED",
                            verdict.blocking.len(),
                            verdict.warnings.len(),
                        );
                        let note = format!(
                            "promotion gate blocked by {} finding(s) from {}",
                            verdict.blocking.len(),
                            def.gate_inputs.join(", ")
                        );
                        let count = inherited.len();
                        self.stages[i].reject(inherited, note)?;
                        obs::emit_stage_finished(&self.run_id, &def.name, "HARD_FAILED", count);
                        progressed = true;
                        continue;
                    }
                }

                if let Some(limit) = scheduler.options.max_parallel {
                    if self.tasks.len() >= limit {
                        continue;
                    }
                }

                self.stages[i].start()?;
                obs::emit_stage_started(&self.run_id, &def.name);
                self.inherited.insert(def.name.clone(), inherited);
                self.spawn(def);
                progressed = true;
            }
            if !progressed {
                return Ok(());
            }
        }
    }

    fn gate_input_findings(&self, def: &StageDefinition) -> Vec<Finding> {
        def.gate_inputs
            .iter()
            .filter_map(|input| self.index.get(input))
            .flat_map(|&j| self.stages[j].findings.iter().cloned())
            .collect()
    }

    fn spawn(&mut self, def: &StageDefinition) {
        let name = def.name.clone();
        let stage = def.clone();
        let env = self.ctx.stage_env(&def.name);
        let executor = Arc::clone(&self.scheduler.executor);
        let limit = def
            .timeout_secs
            .map(Duration::from_secs)
            .or(self.scheduler.options.default_timeout);

        debug!(run_id = %self.run_id, stage = %name, timeout = ?limit, "Dispatching stage");
        self.tasks.spawn(async move {
            let mut handle = AbortOnDrop(tokio::spawn(async move {
                executor.execute(&stage, &env).await
            }));
            let joined = match limit {
                Some(limit) => match tokio::time::timeout(limit, &mut handle.0).await {
                    Ok(joined) => joined,
                    Err(_) => return (name, StageRun::TimedOut(limit)),
                },
                None => (&mut handle.0).await,
            };
            let outcome = match joined {
                Ok(output) => StageRun::Completed(output),
                Err(e) => StageRun::Crashed(crash_message(e)),
            };
            (name, outcome)
        });
    }

    fn complete(&mut self, name: &str, outcome: StageRun) -> PipelineResult<()> {
        let Some(def) = self.scheduler.graph.stage(name) else {
            return Err(PipelineError::Join(format!("task finished for unknown stage {name}")));
        };
        let i = self.index[name];
        let mut findings = self.inherited.remove(name).unwrap_or_default();

        let note = match outcome {
            StageRun::Completed(output) => {
                findings.extend(output.findings.into_iter().map(|f| {
                    if f.source.is_none() {
                        f.with_source(name)
                    } else {
                        f
                    }
                }));
                let verdict = evaluate_gate(&findings, &def.effective_policy());
                obs::emit_gate_evaluated(
                    &self.run_id,
                    name,
                    &verdict.outcome.to_string(),
                    verdict.blocking.len(),
                    verdict.warnings.len(),
                );
                self.stages[i].finish(verdict.outcome, findings)?;
                None
            }
            StageRun::TimedOut(limit) => {
                warn!(run_id = %self.run_id, stage = %name, "Stage timed out");
                findings.push(
                    Finding::critical(format!("stage timed out after {}s", limit.as_secs()))
                        .with_source(name),
                );
                self.stages[i].finish(GateOutcome::HardFailed, findings)?;
                Some("timed out".to_string())
            }
            StageRun::Crashed(message) => {
                warn!(run_id = %self.run_id, stage = %name, error = %message, "Stage executor crashed");
                findings.push(
                    Finding::critical(format!("executor crashed: {message}")).with_source(name),
                );
                self.stages[i].finish(GateOutcome::HardFailed, findings)?;
                Some("executor crashed".to_string())
            }
        };

        let exec = &mut self.stages[i];
        if note.is_some() {
            exec.note = note;
        }
        obs::emit_stage_finished(
            &self.run_id,
            name,
            &exec.state.to_string(),
            exec.findings.len(),
        );
        Ok(())
    }

    async fn abort_all(&mut self) -> PipelineResult<()> {
        self.tasks.abort_all();
        while self.tasks.join_next().await.is_some() {}
        for exec in &mut self.stages {
            if !exec.state.is_terminal() {
                let was_running = exec.state == StageState::Running;
                exec.abort()?;
                if was_running {
                    obs::emit_stage_finished(&self.run_id, &exec.stage, "ABORTED", 0);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancel_pair;
    use crate::executor::{Script, ScriptedExecutor};
    use gatehouse_core::{
        GatePolicy, PipelineDefinition, PipelineRun, RunId, Severity, Trigger,
    };

    fn ctx() -> RunContext {
        RunContext::new(PipelineRun::with_id(RunId::from("run-1"), Trigger::push("main")))
            .with_tag("push-b1-run-1")
    }

    fn scheduler(def: PipelineDefinition, exec: Arc<ScriptedExecutor>) -> Scheduler {
        let graph = StageGraph::new(def).unwrap();
        Scheduler::new(Arc::new(graph), exec)
    }

    fn diamond() -> PipelineDefinition {
        PipelineDefinition::new(
            "diamond",
            vec![
                StageDefinition::new("build"),
                StageDefinition::new("lint").needs(["build"]),
                StageDefinition::new("scan")
                    .needs(["build"])
                    .with_policy(GatePolicy::from_threshold("CRITICAL").unwrap()),
                StageDefinition::new("push").needs(["lint", "scan"]),
            ],
        )
    }

    #[tokio::test]
    async fn test_all_pass() {
        let exec = Arc::new(ScriptedExecutor::new());
        let out = scheduler(diamond(), exec.clone())
            .run(&ctx(), CancelToken::never())
            .await
            .unwrap();
        assert_eq!(out.state, RunState::Succeeded);
        assert!(out.stages.iter().all(|s| s.state == StageState::Passed));
        assert_eq!(exec.started().len(), 4);
        assert_eq!(exec.started()[0], "build");
        assert_eq!(exec.started()[3], "push");
    }

    #[tokio::test]
    async fn test_hard_failure_skips_dependents() {
        let exec = Arc::new(ScriptedExecutor::new().with(
            "scan",
            Script::findings(vec![Finding::critical("CVE-1")]),
        ));
        let out = scheduler(diamond(), exec.clone())
            .run(&ctx(), CancelToken::never())
            .await
            .unwrap();
        assert_eq!(out.state, RunState::Failed);
        assert_eq!(out.stage("scan").unwrap().state, StageState::HardFailed);
        assert_eq!(out.stage("lint").unwrap().state, StageState::Passed);
        let push = out.stage("push").unwrap();
        assert_eq!(push.state, StageState::Skipped);
        assert!(push.note.as_deref().unwrap().contains("scan"));
        assert!(!exec.started().contains(&"push".to_string()));
    }

    #[tokio::test]
    async fn test_findings_get_stage_source() {
        let exec = Arc::new(ScriptedExecutor::new().with(
            "lint",
            Script::findings(vec![Finding::new(Severity::Low, "style")]),
        ));
        let out = scheduler(diamond(), exec)
            .run(&ctx(), CancelToken::never())
            .await
            .unwrap();
        let lint = out.stage("lint").unwrap();
        assert_eq!(lint.state, StageState::SoftFailed);
        assert_eq!(lint.findings[0].source.as_deref(), Some("lint"));
        assert_eq!(out.state, RunState::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_hard_fails() {
        let def = PipelineDefinition::new(
            "slow",
            vec![StageDefinition::new("wait").with_timeout_secs(1)],
        );
        let exec = Arc::new(
            ScriptedExecutor::new().with("wait", Script::pass().with_delay(Duration::from_secs(30))),
        );
        let out = scheduler(def, exec)
            .run(&ctx(), CancelToken::never())
            .await
            .unwrap();
        let wait = out.stage("wait").unwrap();
        assert_eq!(wait.state, StageState::HardFailed);
        assert_eq!(wait.note.as_deref(), Some("timed out"));
        assert_eq!(wait.findings[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_cancel_before_start_aborts_everything() {
        let (handle, token) = cancel_pair();
        handle.cancel();
        let exec = Arc::new(ScriptedExecutor::new());
        let out = scheduler(diamond(), exec.clone())
            .run(&ctx(), token)
            .await
            .unwrap();
        assert_eq!(out.state, RunState::Aborted);
        assert!(out.stages.iter().all(|s| s.state == StageState::Aborted));
        assert!(exec.started().is_empty());
    }

    #[test]
    fn test_options_from_definition() {
        let mut def = diamond();
        def.max_parallel = Some(0);
        def.default_timeout_secs = Some(90);
        let graph = StageGraph::new(def).unwrap();
        let opts = SchedulerOptions::from_graph(&graph);
        assert_eq!(opts.max_parallel, None);
        assert_eq!(opts.default_timeout, Some(Duration::from_secs(90)));
    }
}

//! Stage executor seam.
//!
//! The scheduler hands each runnable stage to a [`StageExecutor`] and gets
//! findings back. Tool failures are reported as findings, never as errors,
//! so the gate policy stays the single judge of a stage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use gatehouse_core::{Finding, StageDefinition};

use crate::stage::StageEnv;

/// What a stage produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOutput {
    pub findings: Vec<Finding>,
    /// `None` when no process ran or it was killed by a signal.
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

impl StageOutput {
    pub fn with_findings(findings: Vec<Finding>) -> Self {
        Self {
            findings,
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn execute(&self, stage: &StageDefinition, env: &StageEnv) -> StageOutput;
}

// ---------------------------------------------------------------------------
// ScriptedExecutor (testing)
// ---------------------------------------------------------------------------

/// Canned behaviour for one stage.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub findings: Vec<Finding>,
    pub delay: Option<Duration>,
    pub panics: bool,
}

impl Script {
    pub fn pass() -> Self {
        Self::default()
    }

    pub fn findings(findings: Vec<Finding>) -> Self {
        Self {
            findings,
            ..Self::default()
        }
    }

    pub fn panicking() -> Self {
        Self {
            panics: true,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEvent {
    Started(String),
    Finished(String),
}

/// Executor that replays scripted findings and records what ran.
///
/// Stages without a script pass with no findings.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    scripts: HashMap<String, Script>,
    log: Mutex<Vec<ExecutionEvent>>,
    envs: Mutex<HashMap<String, StageEnv>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, stage: impl Into<String>, script: Script) -> Self {
        self.scripts.insert(stage.into(), script);
        self
    }

    pub fn log(&self) -> Vec<ExecutionEvent> {
        self.log.lock().unwrap().clone()
    }

    /// Stages that started, in start order.
    pub fn started(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|e| match e {
                ExecutionEvent::Started(s) => Some(s),
                ExecutionEvent::Finished(_) => None,
            })
            .collect()
    }

    pub fn finished(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|e| match e {
                ExecutionEvent::Finished(s) => Some(s),
                ExecutionEvent::Started(_) => None,
            })
            .collect()
    }

    /// Highest number of stages observed executing at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn env_for(&self, stage: &str) -> Option<StageEnv> {
        self.envs.lock().unwrap().get(stage).cloned()
    }
}

#[async_trait]
impl StageExecutor for ScriptedExecutor {
    async fn execute(&self, stage: &StageDefinition, env: &StageEnv) -> StageOutput {
        let script = self.scripts.get(&stage.name).cloned().unwrap_or_default();
        self.log
            .lock()
            .unwrap()
            .push(ExecutionEvent::Started(stage.name.clone()));
        self.envs
            .lock()
            .unwrap()
            .insert(stage.name.clone(), env.clone());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
        if script.panics {
            panic!("scripted panic in stage {}", stage.name);
        }

        self.log
            .lock()
            .unwrap()
            .push(ExecutionEvent::Finished(stage.name.clone()));
        StageOutput {
            findings: script.findings,
            exit_code: Some(0),
            duration_ms: script.delay.map(|d| d.as_millis() as u64).unwrap_or(0),
        }
    }
}

//! Pipeline runs, triggers and per-stage execution records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gatehouse_state::RunId;

use super::error::{GatehouseError, Result};
use super::finding::Finding;
use crate::gate::GateOutcome;

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// How a run was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerKind {
    Manual,
    PullRequest,
    Push,
}

impl TriggerKind {
    /// Leading component of every tag produced for this kind of run.
    pub fn tag_prefix(&self) -> &'static str {
        match self {
            TriggerKind::Manual => "manual",
            TriggerKind::PullRequest => "pr",
            TriggerKind::Push => "push",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Manual => "manual",
            TriggerKind::PullRequest => "pull-request",
            TriggerKind::Push => "push",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerKind {
    type Err = GatehouseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "manual" => Ok(TriggerKind::Manual),
            "pull-request" | "pull_request" | "pr" => Ok(TriggerKind::PullRequest),
            "push" => Ok(TriggerKind::Push),
            other => Err(GatehouseError::InvalidTrigger(format!(
                "unknown trigger kind {other:?}"
            ))),
        }
    }
}

/// Trigger kind plus the git ref it targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub kind: TriggerKind,
    /// Branch for manual and push runs, ref (e.g. `refs/pull/7/merge`) for PRs.
    pub git_ref: String,
}

impl Trigger {
    pub fn new(kind: TriggerKind, git_ref: impl Into<String>) -> Self {
        Self {
            kind,
            git_ref: git_ref.into(),
        }
    }

    pub fn manual(branch: impl Into<String>) -> Self {
        Self::new(TriggerKind::Manual, branch)
    }

    pub fn pull_request(git_ref: impl Into<String>) -> Self {
        Self::new(TriggerKind::PullRequest, git_ref)
    }

    pub fn push(branch: impl Into<String>) -> Self {
        Self::new(TriggerKind::Push, branch)
    }

    /// Every trigger must name what it builds.
    pub fn validate(&self) -> Result<()> {
        if self.git_ref.trim().is_empty() {
            let what = match self.kind {
                TriggerKind::PullRequest => "ref",
                _ => "branch",
            };
            return Err(GatehouseError::InvalidTrigger(format!(
                "{} trigger requires a {what}",
                self.kind
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PipelineRun
// ---------------------------------------------------------------------------

/// One invocation of a pipeline. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: RunId,
    pub trigger: Trigger,
    pub created_at: DateTime<Utc>,
}

impl PipelineRun {
    /// New run with a fresh UUID v4 run id.
    pub fn new(trigger: Trigger) -> Self {
        Self::with_id(RunId::new(), trigger)
    }

    pub fn with_id(run_id: RunId, trigger: Trigger) -> Self {
        Self {
            run_id,
            trigger,
            created_at: Utc::now(),
        }
    }
}

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Succeeded,
    Failed,
    Aborted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Succeeded => f.write_str("SUCCEEDED"),
            RunState::Failed => f.write_str("FAILED"),
            RunState::Aborted => f.write_str("ABORTED"),
        }
    }
}

// ---------------------------------------------------------------------------
// StageExecution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageState {
    Pending,
    Running,
    Passed,
    SoftFailed,
    HardFailed,
    Skipped,
    Aborted,
}

impl StageState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StageState::Pending | StageState::Running)
    }

    /// Dependents may start once every predecessor is in one of these states.
    pub fn unlocks_dependents(&self) -> bool {
        matches!(self, StageState::Passed | StageState::SoftFailed)
    }

    /// Dependents of a stage in one of these states are skipped.
    pub fn blocks_dependents(&self) -> bool {
        matches!(
            self,
            StageState::HardFailed | StageState::Skipped | StageState::Aborted
        )
    }
}

impl From<GateOutcome> for StageState {
    fn from(outcome: GateOutcome) -> Self {
        match outcome {
            GateOutcome::Passed => StageState::Passed,
            GateOutcome::SoftFailed => StageState::SoftFailed,
            GateOutcome::HardFailed => StageState::HardFailed,
        }
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageState::Pending => "PENDING",
            StageState::Running => "RUNNING",
            StageState::Passed => "PASSED",
            StageState::SoftFailed => "SOFT_FAILED",
            StageState::HardFailed => "HARD_FAILED",
            StageState::Skipped => "SKIPPED",
            StageState::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

/// State of one stage within one run.
///
/// Moves `Pending -> Running -> {Passed, SoftFailed, HardFailed}`, or from
/// `Pending` straight to `Skipped`/`HardFailed`, or to `Aborted` from either
/// non-terminal state. A terminal execution never changes again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageExecution {
    pub stage: String,
    pub state: StageState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<Finding>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Why the stage ended the way it did, when that is not obvious from findings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl StageExecution {
    pub fn pending(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            state: StageState::Pending,
            findings: Vec::new(),
            started_at: None,
            finished_at: None,
            note: None,
        }
    }

    fn transition(&mut self, allowed_from: &[StageState], to: StageState) -> Result<()> {
        if !allowed_from.contains(&self.state) {
            return Err(GatehouseError::InvalidTransition {
                stage: self.stage.clone(),
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        self.state = to;
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(&[StageState::Pending], StageState::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Record the gate classification of a running stage.
    pub fn finish(&mut self, outcome: GateOutcome, findings: Vec<Finding>) -> Result<()> {
        self.transition(&[StageState::Running], outcome.into())?;
        self.findings = findings;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Fail a stage before it ever runs.
    pub fn reject(&mut self, findings: Vec<Finding>, note: impl Into<String>) -> Result<()> {
        self.transition(&[StageState::Pending], StageState::HardFailed)?;
        let now = Utc::now();
        self.started_at = Some(now);
        self.finished_at = Some(now);
        self.findings = findings;
        self.note = Some(note.into());
        Ok(())
    }

    pub fn skip(&mut self, note: impl Into<String>) -> Result<()> {
        self.transition(&[StageState::Pending], StageState::Skipped)?;
        self.note = Some(note.into());
        Ok(())
    }

    pub fn abort(&mut self) -> Result<()> {
        self.transition(
            &[StageState::Pending, StageState::Running],
            StageState::Aborted,
        )?;
        if self.started_at.is_some() {
            self.finished_at = Some(Utc::now());
        }
        self.note = Some("run cancelled".to_string());
        Ok(())
    }

    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Artifact
// ---------------------------------------------------------------------------

/// The deployable output of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub tag: String,
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
}

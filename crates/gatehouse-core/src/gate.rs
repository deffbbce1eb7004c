//! Security gate evaluator.
//!
//! Classifies a stage's findings against its [`GatePolicy`]: any finding whose
//! action is `Block` hard-fails the stage, otherwise any `Warn` soft-fails it,
//! otherwise it passes. Evaluation is pure and independent of finding order.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::finding::Finding;
use crate::domain::policy::{GateAction, GatePolicy};

/// Classification of a stage's findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateOutcome {
    Passed,
    SoftFailed,
    HardFailed,
}

impl fmt::Display for GateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateOutcome::Passed => f.write_str("PASSED"),
            GateOutcome::SoftFailed => f.write_str("SOFT_FAILED"),
            GateOutcome::HardFailed => f.write_str("HARD_FAILED"),
        }
    }
}

/// Outcome plus the findings responsible for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub outcome: GateOutcome,
    pub blocking: Vec<Finding>,
    pub warnings: Vec<Finding>,
}

impl GateVerdict {
    pub fn passed(&self) -> bool {
        self.outcome != GateOutcome::HardFailed
    }
}

/// Classify `findings` under `policy`.
pub fn evaluate(findings: &[Finding], policy: &GatePolicy) -> GateOutcome {
    let strongest = findings
        .iter()
        .map(|f| policy.action_for(f.severity))
        .max()
        .unwrap_or(GateAction::Ignore);
    match strongest {
        GateAction::Block => GateOutcome::HardFailed,
        GateAction::Warn => GateOutcome::SoftFailed,
        GateAction::Ignore => GateOutcome::Passed,
    }
}

/// Classify `findings` and keep the blocking and warning findings for reporting.
pub fn evaluate_gate(findings: &[Finding], policy: &GatePolicy) -> GateVerdict {
    let mut blocking = Vec::new();
    let mut warnings = Vec::new();
    for finding in findings {
        match policy.action_for(finding.severity) {
            GateAction::Block => blocking.push(finding.clone()),
            GateAction::Warn => warnings.push(finding.clone()),
            GateAction::Ignore => {}
        }
    }
    let outcome = if !blocking.is_empty() {
        GateOutcome::HardFailed
    } else if !warnings.is_empty() {
        GateOutcome::SoftFailed
    } else {
        GateOutcome::Passed
    };
    GateVerdict {
        outcome,
        blocking,
        warnings,
    }
}

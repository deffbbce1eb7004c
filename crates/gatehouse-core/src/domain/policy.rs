//! Per-stage gate policy: what each severity means for promotion.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::DefinitionError;
use super::finding::Severity;

/// What a finding of a given severity does to the stage.
///
/// Ordered by strength: `Ignore < Warn < Block`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateAction {
    Ignore,
    Warn,
    Block,
}

impl fmt::Display for GateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateAction::Ignore => f.write_str("ignore"),
            GateAction::Warn => f.write_str("warn"),
            GateAction::Block => f.write_str("block"),
        }
    }
}

fn default_action() -> GateAction {
    GateAction::Warn
}

/// Severity to action mapping with a fallback for unmapped severities.
///
/// The default policy is advisory: every finding warns and nothing blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatePolicy {
    #[serde(default)]
    pub actions: BTreeMap<Severity, GateAction>,
    #[serde(default = "default_action")]
    pub default: GateAction,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self::advisory()
    }
}

impl GatePolicy {
    /// Policy used by stages that declare none.
    pub fn advisory() -> Self {
        Self {
            actions: BTreeMap::new(),
            default: GateAction::Warn,
        }
    }

    /// Build a policy from a comma-separated severity list such as
    /// `"CRITICAL,HIGH"`: listed severities block, everything else warns.
    pub fn from_threshold(threshold: &str) -> Result<Self, DefinitionError> {
        let mut policy = Self::advisory();
        for label in threshold.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let severity: Severity =
                label
                    .parse()
                    .map_err(|reason: String| DefinitionError::InvalidThreshold {
                        threshold: threshold.to_string(),
                        reason,
                    })?;
            policy.actions.insert(severity, GateAction::Block);
        }
        if policy.actions.is_empty() {
            return Err(DefinitionError::InvalidThreshold {
                threshold: threshold.to_string(),
                reason: "no severities listed".to_string(),
            });
        }
        Ok(policy)
    }

    pub fn with_action(mut self, severity: Severity, action: GateAction) -> Self {
        self.actions.insert(severity, action);
        self
    }

    pub fn with_default(mut self, action: GateAction) -> Self {
        self.default = action;
        self
    }

    /// Action applied to a finding of `severity`.
    pub fn action_for(&self, severity: Severity) -> GateAction {
        self.actions.get(&severity).copied().unwrap_or(self.default)
    }

    /// True when some severity can block; otherwise the policy is advisory.
    pub fn is_gate(&self) -> bool {
        self.default == GateAction::Block || self.actions.values().any(|a| *a == GateAction::Block)
    }

    /// Severities that block under this policy, lowest first.
    pub fn blocking_severities(&self) -> Vec<Severity> {
        Severity::ALL
            .into_iter()
            .filter(|s| self.action_for(*s) == GateAction::Block)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advisory_never_blocks() {
        let policy = GatePolicy::advisory();
        assert!(!policy.is_gate());
        for severity in Severity::ALL {
            assert_eq!(policy.action_for(severity), GateAction::Warn);
        }
    }

    #[test]
    fn test_from_threshold() {
        let policy = GatePolicy::from_threshold("critical, HIGH").unwrap();
        assert!(policy.is_gate());
        assert_eq!(policy.action_for(Severity::Critical), GateAction::Block);
        assert_eq!(policy.action_for(Severity::High), GateAction::Block);
        assert_eq!(policy.action_for(Severity::Medium), GateAction::Warn);
        assert_eq!(
            policy.blocking_severities(),
            vec![Severity::High, Severity::Critical]
        );
    }

    #[test]
    fn test_from_threshold_rejects_garbage() {
        assert!(matches!(
            GatePolicy::from_threshold("CRITICAL,SEVERE"),
            Err(DefinitionError::InvalidThreshold { .. })
        ));
        assert!(GatePolicy::from_threshold(" , ").is_err());
    }

    #[test]
    fn test_deserialize_from_toml() {
        let policy: GatePolicy = toml::from_str(
            r#"
            default = "ignore"
            [actions]
            CRITICAL = "block"
            medium = "warn"
            "#,
        )
        .unwrap();
        assert_eq!(policy.default, GateAction::Ignore);
        assert_eq!(policy.action_for(Severity::Critical), GateAction::Block);
        assert_eq!(policy.action_for(Severity::Medium), GateAction::Warn);
        assert_eq!(policy.action_for(Severity::Low), GateAction::Ignore);
    }

    #[test]
    fn test_missing_default_is_warn() {
        let policy: GatePolicy = serde_json::from_str(r#"{"actions":{"HIGH":"block"}}"#).unwrap();
        assert_eq!(policy.default, GateAction::Warn);
    }
}

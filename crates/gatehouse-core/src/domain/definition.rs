//! Static pipeline definitions loaded from TOML or JSON.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::DefinitionError;
use super::policy::GatePolicy;

/// How a stage reports findings on stdout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingsFormat {
    /// The stage emits no findings; only its exit status matters.
    #[default]
    None,
    /// A JSON array of `{severity, description}` objects.
    Json,
    /// Trivy's `--format json` report.
    Trivy,
}

/// One stage of the pipeline. Static across runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub name: String,

    /// Predecessors that must reach PASSED or SOFT_FAILED first.
    #[serde(default)]
    pub needs: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<GatePolicy>,

    /// Shorthand for a blocking policy, e.g. `"CRITICAL,HIGH"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<String>,

    /// Predecessors whose findings this stage re-evaluates under its own policy.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gate_inputs: Vec<String>,

    /// Program and arguments. An empty command is a no-op stage.
    #[serde(default)]
    pub command: Vec<String>,

    #[serde(default)]
    pub findings: FindingsFormat,

    /// Treat a non-zero exit as success and rely on the findings alone.
    #[serde(default)]
    pub ignore_exit_code: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl StageDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            needs: Vec::new(),
            policy: None,
            threshold: None,
            gate_inputs: Vec::new(),
            command: Vec::new(),
            findings: FindingsFormat::None,
            ignore_exit_code: false,
            timeout_secs: None,
            env: BTreeMap::new(),
        }
    }

    pub fn needs<I, S>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.needs = stages.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_policy(mut self, policy: GatePolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_gate_inputs<I, S>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.gate_inputs = stages.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_command<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = argv.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_findings(mut self, format: FindingsFormat) -> Self {
        self.findings = format;
        self
    }

    pub fn ignoring_exit_code(mut self) -> Self {
        self.ignore_exit_code = true;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// The policy this stage is judged by; advisory when none is declared.
    pub fn effective_policy(&self) -> GatePolicy {
        self.policy.clone().unwrap_or_default()
    }

    /// Fold the `threshold` shorthand into `policy`.
    fn resolve_threshold(&mut self) -> Result<(), DefinitionError> {
        if let Some(threshold) = self.threshold.take() {
            if self.policy.is_some() {
                return Err(DefinitionError::ConflictingPolicy(self.name.clone()));
            }
            self.policy = Some(GatePolicy::from_threshold(&threshold)?);
        }
        Ok(())
    }
}

/// A complete pipeline: named stages plus run-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,

    /// Stage whose success makes the run's tag an artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_stage: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_timeout_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<usize>,

    #[serde(default)]
    pub stages: Vec<StageDefinition>,
}

impl PipelineDefinition {
    pub fn new(name: impl Into<String>, stages: Vec<StageDefinition>) -> Self {
        Self {
            name: name.into(),
            artifact_stage: None,
            default_timeout_secs: None,
            max_parallel: None,
            stages,
        }
    }

    pub fn with_artifact_stage(mut self, stage: impl Into<String>) -> Self {
        self.artifact_stage = Some(stage.into());
        self
    }

    pub fn from_toml_str(input: &str) -> Result<Self, DefinitionError> {
        let mut def: Self =
            toml::from_str(input).map_err(|e| DefinitionError::Parse(e.to_string()))?;
        def.normalize()?;
        Ok(def)
    }

    pub fn from_json_str(input: &str) -> Result<Self, DefinitionError> {
        let mut def: Self =
            serde_json::from_str(input).map_err(|e| DefinitionError::Parse(e.to_string()))?;
        def.normalize()?;
        Ok(def)
    }

    /// Load a definition, choosing the parser by file extension.
    pub fn from_path(path: &Path) -> Result<Self, DefinitionError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let contents = std::fs::read_to_string(path)?;
        match ext.as_str() {
            "toml" => Self::from_toml_str(&contents),
            "json" => Self::from_json_str(&contents),
            other => Err(DefinitionError::UnsupportedFormat(format!(
                "{} (expected .toml or .json, got {other:?})",
                path.display()
            ))),
        }
    }

    /// Replace per-stage policies with threshold overrides keyed by stage.
    ///
    /// Keys are matched case-insensitively with `-` and `_` treated alike, so
    /// `GATEHOUSE_GATE_IMAGE_SCAN` reaches a stage named `image-scan`.
    /// Returns the names of the stages that were overridden.
    pub fn apply_gate_overrides(
        &mut self,
        overrides: &BTreeMap<String, String>,
    ) -> Result<Vec<String>, DefinitionError> {
        let mut applied = Vec::new();
        for (key, threshold) in overrides {
            let wanted = override_key(key);
            if let Some(stage) = self
                .stages
                .iter_mut()
                .find(|s| override_key(&s.name) == wanted)
            {
                stage.policy = Some(GatePolicy::from_threshold(threshold)?);
                applied.push(stage.name.clone());
            }
        }
        Ok(applied)
    }

    pub fn stage(&self, name: &str) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.name == name)
    }

    fn normalize(&mut self) -> Result<(), DefinitionError> {
        for stage in &mut self.stages {
            stage.resolve_threshold()?;
        }
        Ok(())
    }
}

pub(crate) fn override_key(name: &str) -> String {
    name.to_ascii_uppercase().replace('-', "_")
}

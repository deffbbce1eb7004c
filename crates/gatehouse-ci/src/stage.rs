//! Run context handed to stage executors.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use gatehouse_core::PipelineRun;

pub const ENV_RUN_ID: &str = "GATEHOUSE_RUN_ID";
pub const ENV_TAG: &str = "GATEHOUSE_TAG";
pub const ENV_TRIGGER: &str = "GATEHOUSE_TRIGGER";
pub const ENV_REF: &str = "GATEHOUSE_REF";
pub const ENV_STAGE: &str = "GATEHOUSE_STAGE";
pub const ENV_REGISTRY: &str = "GATEHOUSE_REGISTRY";

fn placeholder() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Z][A-Z0-9_]*)\}").expect("placeholder pattern compiles")
    })
}

/// Everything a stage may know about the run it belongs to.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run: PipelineRun,
    /// Tag computed for this run, if tagging succeeded.
    pub tag: Option<String>,
    /// Why no tag could be computed.
    pub tagging_error: Option<String>,
    pub registry: Option<String>,
}

impl RunContext {
    pub fn new(run: PipelineRun) -> Self {
        Self {
            run,
            tag: None,
            tagging_error: None,
            registry: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_tagging_error(mut self, error: impl Into<String>) -> Self {
        self.tag = None;
        self.tagging_error = Some(error.into());
        self
    }

    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = Some(registry.into());
        self
    }

    /// Environment for the named stage.
    pub fn stage_env(&self, stage: &str) -> StageEnv {
        let mut vars = BTreeMap::new();
        vars.insert(ENV_RUN_ID.to_string(), self.run.run_id.to_string());
        vars.insert(ENV_TRIGGER.to_string(), self.run.trigger.kind.to_string());
        vars.insert(ENV_REF.to_string(), self.run.trigger.git_ref.clone());
        vars.insert(ENV_STAGE.to_string(), stage.to_string());
        if let Some(tag) = &self.tag {
            vars.insert(ENV_TAG.to_string(), tag.clone());
        }
        if let Some(registry) = &self.registry {
            vars.insert(ENV_REGISTRY.to_string(), registry.clone());
        }
        StageEnv { vars }
    }
}

/// `GATEHOUSE_*` variables for one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageEnv {
    vars: BTreeMap<String, String>,
}

impl StageEnv {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn stage(&self) -> &str {
        self.get(ENV_STAGE).unwrap_or_default()
    }

    /// Replace `${VAR}` with the value of `VAR`. Unknown variables become empty.
    pub fn expand(&self, arg: &str) -> String {
        placeholder()
            .replace_all(arg, |caps: &Captures| {
                self.vars.get(&caps[1]).cloned().unwrap_or_default()
            })
            .into_owned()
    }

    pub fn expand_all(&self, argv: &[String]) -> Vec<String> {
        argv.iter().map(|a| self.expand(a)).collect()
    }
}

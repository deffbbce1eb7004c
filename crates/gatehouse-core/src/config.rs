//! Environment-driven configuration.
//!
//! Every setting comes from a `GATEHOUSE_*` variable; the CLI layers its own
//! flags on top.

use std::collections::BTreeMap;

use gatehouse_state::StateBackend;

use crate::domain::error::{GatehouseError, Result};

pub const ENV_REGISTRY: &str = "GATEHOUSE_REGISTRY";
pub const ENV_CREDENTIALS_REF: &str = "GATEHOUSE_CREDENTIALS_REF";
pub const ENV_ENVIRONMENT: &str = "GATEHOUSE_ENVIRONMENT";
pub const ENV_STATE_BACKEND: &str = "GATEHOUSE_STATE_BACKEND";
/// Prefix of per-stage threshold overrides, e.g. `GATEHOUSE_GATE_SCAN=CRITICAL,HIGH`.
pub const ENV_GATE_PREFIX: &str = "GATEHOUSE_GATE_";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatehouseConfig {
    /// Image repository the artifact is pushed to, e.g. `registry.example.com/team/app`.
    pub registry: Option<String>,
    /// Name of the secret holding registry credentials. Never the secret itself.
    pub credentials_ref: Option<String>,
    /// Default deployment environment.
    pub environment: Option<String>,
    pub state_backend: StateBackend,
    /// Stage name (upper-cased, `_` for `-`) to severity threshold.
    pub gate_thresholds: BTreeMap<String, String>,
}

impl GatehouseConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Build configuration from an explicit set of variables.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref().trim());
            if value.is_empty() {
                continue;
            }
            match key {
                ENV_REGISTRY => config.registry = Some(value.to_string()),
                ENV_CREDENTIALS_REF => config.credentials_ref = Some(value.to_string()),
                ENV_ENVIRONMENT => config.environment = Some(value.to_string()),
                ENV_STATE_BACKEND => {
                    config.state_backend = StateBackend::parse(value).map_err(|e| {
                        GatehouseError::Config(format!("{ENV_STATE_BACKEND}: {e}"))
                    })?;
                }
                _ => {
                    if let Some(stage) = key.strip_prefix(ENV_GATE_PREFIX) {
                        if !stage.is_empty() {
                            config
                                .gate_thresholds
                                .insert(stage.to_string(), value.to_string());
                        }
                    }
                }
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatehouseConfig::from_vars(Vec::<(String, String)>::new()).unwrap();
        assert!(config.registry.is_none());
        assert_eq!(config.state_backend, StateBackend::default());
        assert!(config.gate_thresholds.is_empty());
    }

    #[test]
    fn test_reads_gatehouse_vars() {
        let config = GatehouseConfig::from_vars([
            ("GATEHOUSE_REGISTRY", "registry.example.com/team/app"),
            ("GATEHOUSE_CREDENTIALS_REF", "kv/registry-push"),
            ("GATEHOUSE_ENVIRONMENT", "staging"),
            ("GATEHOUSE_STATE_BACKEND", "mem://"),
            ("GATEHOUSE_GATE_IMAGE_SCAN", "CRITICAL,HIGH"),
            ("GATEHOUSE_GATE_", "ignored"),
            ("HOME", "/root"),
        ])
        .unwrap();

        assert_eq!(
            config.registry.as_deref(),
            Some("registry.example.com/team/app")
        );
        assert_eq!(config.credentials_ref.as_deref(), Some("kv/registry-push"));
        assert_eq!(config.environment.as_deref(), Some("staging"));
        assert_eq!(config.state_backend, StateBackend::Surreal("mem://".into()));
        assert_eq!(config.gate_thresholds.len(), 1);
        assert_eq!(config.gate_thresholds["IMAGE_SCAN"], "CRITICAL,HIGH");
    }

    #[test]
    fn test_empty_values_are_unset() {
        let config = GatehouseConfig::from_vars([("GATEHOUSE_REGISTRY", "  ")]).unwrap();
        assert!(config.registry.is_none());
    }

    #[test]
    fn test_bad_backend_is_config_error() {
        let err = GatehouseConfig::from_vars([("GATEHOUSE_STATE_BACKEND", "ftp://nope")])
            .unwrap_err();
        assert!(matches!(err, GatehouseError::Config(_)));
    }
}

//! Domain-level error taxonomy for Gatehouse.

use gatehouse_state::StorageError;

/// Errors detected while loading or validating a pipeline definition.
///
/// All of these are fatal at load time; a definition that produces one never runs.
#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("pipeline definition has no stages")]
    Empty,

    #[error("duplicate stage name: {0}")]
    DuplicateStage(String),

    #[error("invalid stage name: {0:?}")]
    InvalidStageName(String),

    #[error("stage {stage} needs unknown stage {dependency}")]
    UnknownDependency { stage: String, dependency: String },

    #[error("cyclic dependency between stages: [{}]", stages.join(" -> "))]
    CyclicDependency { stages: Vec<String> },

    #[error("stage {stage} gates on {input}, which is not one of its predecessors")]
    InvalidGateInput { stage: String, input: String },

    #[error("artifact stage {0} is not defined")]
    UnknownArtifactStage(String),

    #[error("stage {0} sets both `policy` and `threshold`")]
    ConflictingPolicy(String),

    #[error("invalid severity threshold {threshold:?}: {reason}")]
    InvalidThreshold { threshold: String, reason: String },

    #[error("failed to parse pipeline definition: {0}")]
    Parse(String),

    #[error("unsupported definition format: {0}")]
    UnsupportedFormat(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced by the artifact tagger.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaggingError {
    #[error("run id must not be empty")]
    EmptyRunId,

    #[error("malformed run id: {0:?}")]
    MalformedRunId(String),

    #[error("build sequence numbers start at 1")]
    ZeroBuildSequence,

    #[error("tag would be {len} characters; the limit is {max}")]
    TooLong { len: usize, max: usize },
}

/// Gatehouse domain errors.
#[derive(Debug, thiserror::Error)]
pub enum GatehouseError {
    #[error("invalid pipeline definition: {0}")]
    Definition(#[from] DefinitionError),

    #[error("tagging failed: {0}")]
    Tagging(#[from] TaggingError),

    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),

    #[error("stage {stage}: illegal transition {from} -> {to}")]
    InvalidTransition {
        stage: String,
        from: String,
        to: String,
    },

    #[error("unknown tag: {0} (no gated run recorded it)")]
    UnknownTag(String),

    #[error("invalid deployment environment: {0:?}")]
    InvalidEnvironment(String),

    #[error("deployment failed: {0}")]
    Deploy(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for Gatehouse domain operations.
pub type Result<T> = std::result::Result<T, GatehouseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display_lists_stages() {
        let err = DefinitionError::CyclicDependency {
            stages: vec!["a".to_string(), "b".to_string(), "a".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "cyclic dependency between stages: [a -> b -> a]"
        );
    }

    #[test]
    fn test_unknown_tag_display() {
        let err = GatehouseError::UnknownTag("push-b1-x".to_string());
        assert!(err.to_string().contains("push-b1-x"));
    }

    #[test]
    fn test_storage_error_wraps() {
        let err: GatehouseError = StorageError::NotFound {
            run_id: "r".to_string(),
        }
        .into();
        assert!(err.to_string().contains("storage error"));
    }
}

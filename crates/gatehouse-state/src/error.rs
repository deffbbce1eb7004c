//! Error types for gatehouse-state

use thiserror::Error;

/// Errors produced by tag ledger backends.
#[derive(Error, Debug)]
pub enum StorageError {
    /// A tag was already recorded for this run. The ledger is append-only.
    #[error("duplicate tag: run {run_id} already has tag {existing}")]
    DuplicateTag { run_id: String, existing: String },

    /// No tag has been recorded for this run.
    #[error("no tag recorded for run: {run_id}")]
    NotFound { run_id: String },

    /// The tag value is already bound to a different run.
    #[error("tag {tag} is already bound to run {run_id}")]
    TagInUse { tag: String, run_id: String },

    /// Run identifier rejected by the store.
    #[error("invalid run id: {run_id:?}")]
    InvalidRunId { run_id: String },

    /// Unsupported or malformed backend location.
    #[error("invalid state backend: {0}")]
    InvalidBackend(String),

    /// Connection to the backing database failed.
    #[error("database connection failed: {0}")]
    Connection(String),

    /// Backend-specific failure (query, schema setup, ...).
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A persisted record could not be decoded.
    #[error("corrupt ledger record at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_tag_display() {
        let err = StorageError::DuplicateTag {
            run_id: "run-1".to_string(),
            existing: "push-b1-run-1".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("run-1"));
        assert!(msg.contains("push-b1-run-1"));
    }

    #[test]
    fn test_not_found_display() {
        let err = StorageError::NotFound {
            run_id: "abc".to_string(),
        };
        assert!(err.to_string().contains("no tag recorded"));
    }
}

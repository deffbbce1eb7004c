//! Storage trait definitions for Gatehouse
//!
//! - `RunId`: identity of one pipeline run
//! - `TagRecord`: durable representation of an artifact tag
//! - `TagStore`: append-only ledger mapping run identity to artifact tag
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// Unique identifier for a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random RunId
    pub fn new() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        RunId(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// TagStore: append-only tag ledger
// ---------------------------------------------------------------------------

/// A persisted artifact tag (`{run_id, tag, created_at}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRecord {
    pub run_id: RunId,
    pub tag: String,
    pub created_at: DateTime<Utc>,
}

impl TagRecord {
    pub fn new(run_id: RunId, tag: impl Into<String>) -> Self {
        Self {
            run_id,
            tag: tag.into(),
            created_at: Utc::now(),
        }
    }
}

/// Append-only artifact tag ledger.
///
/// Guarantees:
/// - `put` writes at most one tag per run id; a second `put` for the same run
///   fails with `StorageError::DuplicateTag` and leaves the first record intact.
/// - Once `put` returns `Ok`, the record survives process restart (for the
///   durable backends; `fakes::MemoryTagStore` is test-only).
/// - There is no update or delete operation.
#[async_trait]
pub trait TagStore: Send + Sync {
    /// Record the tag for a run.
    async fn put(&self, run_id: &RunId, tag: &str) -> StorageResult<TagRecord>;

    /// Fetch the tag for a run. Returns `StorageError::NotFound` if absent.
    async fn get(&self, run_id: &RunId) -> StorageResult<TagRecord>;

    /// Look up the record holding `tag`, if any.
    async fn find_by_tag(&self, tag: &str) -> StorageResult<Option<TagRecord>>;

    /// All records, oldest first.
    async fn list(&self) -> StorageResult<Vec<TagRecord>>;
}

pub(crate) fn validate_put(run_id: &RunId, tag: &str) -> StorageResult<()> {
    if run_id.0.trim().is_empty() || tag.trim().is_empty() {
        return Err(StorageError::InvalidRunId {
            run_id: run_id.0.clone(),
        });
    }
    Ok(())
}

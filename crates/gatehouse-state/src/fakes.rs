//! In-memory fakes for storage traits (testing only)
//!
//! `MemoryTagStore` satisfies the `TagStore` contract without durability.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

/// In-memory tag ledger backed by an insertion-ordered `Vec<TagRecord>`.
#[derive(Debug, Default)]
pub struct MemoryTagStore {
    records: Mutex<Vec<TagRecord>>,
}

impl MemoryTagStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records written so far.
    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TagStore for MemoryTagStore {
    async fn put(&self, run_id: &RunId, tag: &str) -> StorageResult<TagRecord> {
        validate_put(run_id, tag)?;
        let mut records = self.records.lock().unwrap();
        if let Some(existing) = records.iter().find(|r| &r.run_id == run_id) {
            return Err(StorageError::DuplicateTag {
                run_id: run_id.0.clone(),
                existing: existing.tag.clone(),
            });
        }
        if let Some(holder) = records.iter().find(|r| r.tag == tag) {
            return Err(StorageError::TagInUse {
                tag: tag.to_string(),
                run_id: holder.run_id.0.clone(),
            });
        }
        let record = TagRecord::new(run_id.clone(), tag);
        records.push(record.clone());
        Ok(record)
    }

    async fn get(&self, run_id: &RunId) -> StorageResult<TagRecord> {
        let records = self.records.lock().unwrap();
        records
            .iter()
            .find(|r| &r.run_id == run_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                run_id: run_id.0.clone(),
            })
    }

    async fn find_by_tag(&self, tag: &str) -> StorageResult<Option<TagRecord>> {
        let records = self.records.lock().unwrap();
        Ok(records.iter().find(|r| r.tag == tag).cloned())
    }

    async fn list(&self) -> StorageResult<Vec<TagRecord>> {
        Ok(self.records.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// UnavailableTagStore
// ---------------------------------------------------------------------------

/// A store whose every operation fails with a backend error.
///
/// Stands in for an unreachable database when exercising error propagation.
#[derive(Debug, Default)]
pub struct UnavailableTagStore;

#[async_trait]
impl TagStore for UnavailableTagStore {
    async fn put(&self, _run_id: &RunId, _tag: &str) -> StorageResult<TagRecord> {
        Err(StorageError::Connection("tag store unreachable".to_string()))
    }

    async fn get(&self, _run_id: &RunId) -> StorageResult<TagRecord> {
        Err(StorageError::Connection("tag store unreachable".to_string()))
    }

    async fn find_by_tag(&self, _tag: &str) -> StorageResult<Option<TagRecord>> {
        Err(StorageError::Connection("tag store unreachable".to_string()))
    }

    async fn list(&self) -> StorageResult<Vec<TagRecord>> {
        Err(StorageError::Connection("tag store unreachable".to_string()))
    }
}

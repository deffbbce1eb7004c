//! SurrealDB-backed TagStore implementation
//!
//! Durable when connected to `surrealkv://<path>` or a remote server.
//! Uniqueness of `run_id` and `tag` is enforced by unique indexes in addition
//! to the pre-insert lookup, so two writers racing on the same run cannot both
//! succeed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::sql::Datetime as SurrealDatetime;
use surrealdb::Surreal;
use tracing::{debug, instrument};

use crate::error::StorageError;
use crate::handle::{self, CloudConfig};
use crate::storage_traits::{validate_put, RunId, StorageResult, TagRecord, TagStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbTagRecord {
    run_id: String,
    tag: String,
    created_at: SurrealDatetime,
}

impl DbTagRecord {
    fn into_tag_record(self) -> TagRecord {
        TagRecord {
            run_id: RunId(self.run_id),
            tag: self.tag,
            created_at: DateTime::<Utc>::from(self.created_at),
        }
    }
}

/// SurrealDB-backed implementation of [`TagStore`].
#[derive(Clone)]
pub struct SurrealTagStore {
    db: Surreal<Any>,
}

impl SurrealTagStore {
    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> StorageResult<Self> {
        Self::connect("mem://").await
    }

    /// Connect to `url` (`mem://`, `surrealkv://<path>`, `ws://host:port`).
    pub async fn connect(url: &str) -> StorageResult<Self> {
        let db = handle::connect(url).await?;
        Ok(Self { db })
    }

    /// Connect with credentials.
    pub async fn connect_cloud(config: &CloudConfig) -> StorageResult<Self> {
        let db = handle::connect_cloud(config).await?;
        Ok(Self { db })
    }

    /// Create from environment variables.
    ///
    /// `SURREALDB_ENDPOINT` (+ credentials) wins, then `SURREALDB_URL`, then a
    /// local `surrealkv://.gatehouse/db`.
    pub async fn from_env() -> StorageResult<Self> {
        if let Some(config) = CloudConfig::from_env() {
            return Self::connect_cloud(&config).await;
        }
        if let Ok(url) = std::env::var("SURREALDB_URL") {
            return Self::connect(&url).await;
        }
        Self::connect("surrealkv://.gatehouse/db").await
    }

    async fn select_where(&self, field: &'static str, value: &str) -> StorageResult<Option<TagRecord>> {
        let sql = format!("SELECT * FROM tags WHERE {field} = $value LIMIT 1");
        let mut res = self
            .db
            .query(sql)
            .bind(("value", value.to_string()))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<DbTagRecord> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(rows.into_iter().next().map(DbTagRecord::into_tag_record))
    }
}

#[async_trait]
impl TagStore for SurrealTagStore {
    #[instrument(skip(self), fields(run_id = %run_id))]
    async fn put(&self, run_id: &RunId, tag: &str) -> StorageResult<TagRecord> {
        validate_put(run_id, tag)?;

        if let Some(existing) = self.select_where("run_id", &run_id.0).await? {
            return Err(StorageError::DuplicateTag {
                run_id: run_id.0.clone(),
                existing: existing.tag,
            });
        }
        if let Some(holder) = self.select_where("tag", tag).await? {
            return Err(StorageError::TagInUse {
                tag: tag.to_string(),
                run_id: holder.run_id.0,
            });
        }

        let record = DbTagRecord {
            run_id: run_id.0.clone(),
            tag: tag.to_string(),
            created_at: SurrealDatetime::from(Utc::now()),
        };

        let created: Option<DbTagRecord> = self
            .db
            .create("tags")
            .content(record)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        debug!(tag = %tag, "Tag recorded");
        created
            .map(DbTagRecord::into_tag_record)
            .ok_or_else(|| StorageError::Backend("failed to create tag record".to_string()))
    }

    async fn get(&self, run_id: &RunId) -> StorageResult<TagRecord> {
        self.select_where("run_id", &run_id.0)
            .await?
            .ok_or_else(|| StorageError::NotFound {
                run_id: run_id.0.clone(),
            })
    }

    async fn find_by_tag(&self, tag: &str) -> StorageResult<Option<TagRecord>> {
        self.select_where("tag", tag).await
    }

    async fn list(&self) -> StorageResult<Vec<TagRecord>> {
        let mut res = self
            .db
            .query("SELECT * FROM tags ORDER BY created_at ASC")
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<DbTagRecord> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(rows.into_iter().map(DbTagRecord::into_tag_record).collect())
    }
}

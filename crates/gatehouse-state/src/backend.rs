//! Backend selection from a location string.
//!
//! | location               | store                          |
//! |------------------------|--------------------------------|
//! | `fs://<dir>` or a path | [`FsTagStore`]                 |
//! | `surrealkv://<dir>`    | [`SurrealTagStore`] (embedded) |
//! | `ws://…`, `wss://…`    | [`SurrealTagStore`] (remote)   |
//! | `mem://`               | [`SurrealTagStore`] (volatile) |

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

use crate::error::StorageError;
use crate::fs_ledger::FsTagStore;
use crate::handle::CloudConfig;
use crate::storage_traits::{StorageResult, TagStore};
use crate::surreal_tag_store::SurrealTagStore;

/// Where the tag ledger lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateBackend {
    Fs(PathBuf),
    Surreal(String),
}

impl StateBackend {
    /// Parse a backend location.
    pub fn parse(location: &str) -> StorageResult<Self> {
        let location = location.trim();
        if location.is_empty() {
            return Err(StorageError::InvalidBackend("empty location".to_string()));
        }
        if let Some(path) = location.strip_prefix("fs://") {
            if path.is_empty() {
                return Err(StorageError::InvalidBackend(location.to_string()));
            }
            return Ok(StateBackend::Fs(PathBuf::from(path)));
        }
        for scheme in ["surrealkv://", "mem://", "ws://", "wss://"] {
            if location.starts_with(scheme) {
                return Ok(StateBackend::Surreal(location.to_string()));
            }
        }
        if location.contains("://") {
            return Err(StorageError::InvalidBackend(location.to_string()));
        }
        Ok(StateBackend::Fs(PathBuf::from(location)))
    }

    /// Whether acknowledged writes survive a process restart.
    pub fn is_durable(&self) -> bool {
        !matches!(self, StateBackend::Surreal(url) if url.starts_with("mem://"))
    }

    /// Open the store.
    ///
    /// Remote SurrealDB endpoints use credentials from `SURREALDB_*` when present.
    pub async fn open(&self) -> StorageResult<Arc<dyn TagStore>> {
        if !self.is_durable() {
            warn!(backend = %self, "Tag ledger is not durable; tags are lost on exit");
        }
        match self {
            StateBackend::Fs(path) => Ok(Arc::new(FsTagStore::open(path)?)),
            StateBackend::Surreal(url) if url.starts_with("ws") => {
                match CloudConfig::from_env() {
                    Some(config) if config.endpoint == *url => {
                        Ok(Arc::new(SurrealTagStore::connect_cloud(&config).await?))
                    }
                    _ => Ok(Arc::new(SurrealTagStore::connect(url).await?)),
                }
            }
            StateBackend::Surreal(url) => Ok(Arc::new(SurrealTagStore::connect(url).await?)),
        }
    }
}

impl Default for StateBackend {
    fn default() -> Self {
        StateBackend::Fs(PathBuf::from(".gatehouse/tags"))
    }
}

impl fmt::Display for StateBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateBackend::Fs(path) => write!(f, "fs://{}", path.display()),
            StateBackend::Surreal(url) => f.write_str(url),
        }
    }
}

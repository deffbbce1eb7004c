//! Gatehouse State: append-only artifact tag ledger
//!
//! This crate is the persistence layer of Gatehouse. It records, once per
//! pipeline run, the tag of the artifact that run produced, and serves those
//! records to the deployment trigger.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: durability and write-once integrity.
//!
//! ## Key Components
//!
//! - `TagStore`: the ledger contract (`put` / `get` / `find_by_tag` / `list`)
//! - `FsTagStore`: JSON-lines ledger file with fsync'd appends
//! - `SurrealTagStore`: SurrealDB table with unique indexes
//! - `StateBackend`: picks an implementation from a location string

pub mod backend;
mod error;
pub mod fakes;
pub mod fs_ledger;
pub mod handle;
mod migrations;
pub mod storage_traits;
pub mod surreal_tag_store;

pub use backend::StateBackend;
pub use error::StorageError;
pub use fs_ledger::FsTagStore;
pub use handle::CloudConfig;
pub use storage_traits::{RunId, StorageResult, TagRecord, TagStore};
pub use surreal_tag_store::SurrealTagStore;

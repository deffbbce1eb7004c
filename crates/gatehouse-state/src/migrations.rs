//! SurrealDB schema for the tag ledger.
//!
//! Safe to run on every connection; all definitions use `IF NOT EXISTS`.

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::StorageResult;

/// Initialize the `tags` table.
///
/// Schema:
/// ```text
/// TABLE tags {
///   run_id:      STRING   (unique)
///   tag:         STRING   (unique)
///   created_at:  DATETIME (indexed)
/// }
/// ```
///
/// Records are never updated or deleted; the table permissions deny both.
pub async fn init_schema(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing tag ledger schema");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS tags SCHEMAFULL
            PERMISSIONS
                FOR select, create FULL
                FOR update, delete NONE;

        DEFINE FIELD IF NOT EXISTS run_id ON TABLE tags TYPE string;
        DEFINE FIELD IF NOT EXISTS tag ON TABLE tags TYPE string;
        DEFINE FIELD IF NOT EXISTS created_at ON TABLE tags TYPE datetime;

        DEFINE INDEX IF NOT EXISTS idx_tags_run_id ON TABLE tags COLUMNS run_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_tags_tag ON TABLE tags COLUMNS tag UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_tags_created_at ON TABLE tags COLUMNS created_at;
    "#;

    db.query(sql)
        .await
        .map_err(|e| StorageError::Backend(format!("schema setup failed: {e}")))?
        .check()
        .map_err(|e| StorageError::Backend(format!("schema setup failed: {e}")))?;

    Ok(())
}

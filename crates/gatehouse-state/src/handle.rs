//! SurrealDB connection handling.
//!
//! Supports in-memory (`mem://`), embedded durable (`surrealkv://<path>`) and
//! remote (`ws://`, `wss://`) connections. Remote endpoints may require
//! credentials, supplied through [`CloudConfig`].

use std::collections::BTreeMap;

use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tracing::{info, instrument};

use crate::error::StorageError;
use crate::migrations;
use crate::storage_traits::StorageResult;

/// Default namespace for Gatehouse tables.
pub const DEFAULT_NAMESPACE: &str = "gatehouse";
/// Default database name.
pub const DEFAULT_DATABASE: &str = "main";

pub const ENV_ENDPOINT: &str = "SURREALDB_ENDPOINT";
pub const ENV_USERNAME: &str = "SURREALDB_USERNAME";
pub const ENV_PASSWORD: &str = "SURREALDB_PASSWORD";
pub const ENV_NAMESPACE: &str = "SURREALDB_NAMESPACE";
pub const ENV_DATABASE: &str = "SURREALDB_DATABASE";
pub const ENV_ROOT: &str = "SURREALDB_ROOT";

/// Credentials for a remote ledger endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudConfig {
    /// e.g. `wss://ledger.example.com`
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub namespace: String,
    pub database: String,
    /// Sign in as a root user instead of a database user.
    pub is_root: bool,
}

impl CloudConfig {
    /// Read `SURREALDB_*` credentials from the process environment.
    pub fn from_env() -> Option<Self> {
        Self::from_vars(std::env::vars())
    }

    /// `None` unless endpoint, username and password are all present.
    pub fn from_vars<I, K, V>(vars: I) -> Option<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let vars: BTreeMap<String, String> = vars
            .into_iter()
            .filter(|(k, _)| k.as_ref().starts_with("SURREALDB_"))
            .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().trim().to_string()))
            .filter(|(_, v)| !v.is_empty())
            .collect();
        let get = |key: &str| vars.get(key).cloned();

        Some(Self {
            endpoint: get(ENV_ENDPOINT)?,
            username: get(ENV_USERNAME)?,
            password: get(ENV_PASSWORD)?,
            namespace: get(ENV_NAMESPACE).unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            database: get(ENV_DATABASE).unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
            is_root: get(ENV_ROOT).is_some_and(|v| v.eq_ignore_ascii_case("true")),
        })
    }
}

async fn select_and_migrate(db: &Surreal<Any>, namespace: &str, database: &str) -> StorageResult<()> {
    db.use_ns(namespace)
        .use_db(database)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;
    migrations::init_schema(db).await
}

/// Connect to `url` without authentication, select the default namespace and
/// initialise the schema.
#[instrument]
pub async fn connect(url: &str) -> StorageResult<Surreal<Any>> {
    if let Some(path) = url.strip_prefix("surrealkv://") {
        std::fs::create_dir_all(path).map_err(|e| {
            StorageError::Connection(format!("failed to create database directory {path}: {e}"))
        })?;
    }

    let db = surrealdb::engine::any::connect(url)
        .await
        .map_err(|e| StorageError::Connection(format!("failed to connect to {url}: {e}")))?;

    select_and_migrate(&db, DEFAULT_NAMESPACE, DEFAULT_DATABASE).await?;
    info!(url = %url, "Tag ledger connected");
    Ok(db)
}

/// Connect with credentials from a [`CloudConfig`].
#[instrument(skip(config), fields(endpoint = %config.endpoint, namespace = %config.namespace, database = %config.database))]
pub async fn connect_cloud(config: &CloudConfig) -> StorageResult<Surreal<Any>> {
    let db = surrealdb::engine::any::connect(&config.endpoint)
        .await
        .map_err(|e| {
            StorageError::Connection(format!("failed to connect to {}: {}", config.endpoint, e))
        })?;

    if config.is_root {
        db.signin(Root {
            username: &config.username,
            password: &config.password,
        })
        .await
        .map_err(|e| StorageError::Connection(format!("root authentication failed: {e}")))?;
    } else {
        db.signin(Database {
            namespace: &config.namespace,
            database: &config.database,
            username: &config.username,
            password: &config.password,
        })
        .await
        .map_err(|e| StorageError::Connection(format!("database authentication failed: {e}")))?;
    }

    select_and_migrate(&db, &config.namespace, &config.database).await?;
    info!(root = config.is_root, "Tag ledger connected with credentials");
    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_need_endpoint_user_and_password() {
        assert!(CloudConfig::from_vars([(ENV_ENDPOINT, "wss://db")]).is_none());
        assert!(CloudConfig::from_vars([
            (ENV_ENDPOINT, "wss://db"),
            (ENV_USERNAME, "ci"),
            (ENV_PASSWORD, " "),
        ])
        .is_none());
    }

    #[test]
    fn test_credentials_defaults() {
        let config = CloudConfig::from_vars([
            (ENV_ENDPOINT, "wss://db"),
            (ENV_USERNAME, "ci"),
            (ENV_PASSWORD, "secret"),
            (ENV_ROOT, "TRUE"),
            ("PATH", "/usr/bin"),
        ])
        .unwrap();
        assert_eq!(config.namespace, DEFAULT_NAMESPACE);
        assert_eq!(config.database, DEFAULT_DATABASE);
        assert!(config.is_root);
    }
}

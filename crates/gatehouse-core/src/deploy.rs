//! Deployment trigger.
//!
//! Resolves a tag against the tag ledger and hands it, with an environment
//! name, to a [`Deployer`]. Only tags recorded by a gated run are deployable.
//! The trigger does not wait for the rollout to become healthy.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use gatehouse_state::{RunId, StorageError, TagStore};

use crate::domain::error::{GatehouseError, Result};
use crate::obs;

/// What the deployer is asked to roll out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployRequest {
    pub deployment_id: String,
    pub environment: String,
    pub tag: String,
    pub run_id: RunId,
}

/// External collaborator that applies a deployment.
///
/// Implementations must be idempotent: applying the same request twice leaves
/// the target in the same state as applying it once.
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn apply(&self, request: &DeployRequest) -> Result<()>;
}

/// Reference to an issued deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentHandle {
    /// Stable for a given `(environment, tag)` pair.
    pub deployment_id: String,
    pub environment: String,
    pub tag: String,
    pub run_id: RunId,
    pub issued_at: DateTime<Utc>,
}

/// Deterministic deployment id: hex SHA-256 of `environment NUL tag`.
pub fn deployment_id(environment: &str, tag: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(environment.as_bytes());
    hasher.update([0u8]);
    hasher.update(tag.as_bytes());
    hex::encode(hasher.finalize())
}

fn validate_environment(environment: &str) -> Result<()> {
    let ok = !environment.is_empty()
        && environment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !ok {
        return Err(GatehouseError::InvalidEnvironment(environment.to_string()));
    }
    Ok(())
}

pub struct DeploymentTrigger {
    store: Arc<dyn TagStore>,
    deployer: Arc<dyn Deployer>,
}

impl DeploymentTrigger {
    pub fn new(store: Arc<dyn TagStore>, deployer: Arc<dyn Deployer>) -> Self {
        Self { store, deployer }
    }

    /// Deploy `tag` to `environment`.
    ///
    /// Fails with [`GatehouseError::UnknownTag`] unless a run recorded `tag`.
    pub async fn deploy(&self, environment: &str, tag: &str) -> Result<DeploymentHandle> {
        validate_environment(environment)?;
        let record = self
            .store
            .find_by_tag(tag)
            .await?
            .ok_or_else(|| GatehouseError::UnknownTag(tag.to_string()))?;

        let request = DeployRequest {
            deployment_id: deployment_id(environment, tag),
            environment: environment.to_string(),
            tag: record.tag.clone(),
            run_id: record.run_id.clone(),
        };
        self.deployer.apply(&request).await?;
        obs::emit_deploy_issued(&request.deployment_id, environment, tag);

        Ok(DeploymentHandle {
            deployment_id: request.deployment_id,
            environment: request.environment,
            tag: request.tag,
            run_id: request.run_id,
            issued_at: Utc::now(),
        })
    }

    /// Deploy whatever tag `run_id` produced.
    pub async fn deploy_run(&self, environment: &str, run_id: &RunId) -> Result<DeploymentHandle> {
        let record = match self.store.get(run_id).await {
            Ok(record) => record,
            Err(StorageError::NotFound { .. }) => {
                return Err(GatehouseError::UnknownTag(format!(
                    "run {run_id} has no recorded tag"
                )))
            }
            Err(e) => return Err(e.into()),
        };
        self.deploy(environment, &record.tag).await
    }
}

//! Deployer implementations.
//!
//! - [`HelmDeployer`]: `helm upgrade --install`, idempotent by construction
//! - [`RecordingDeployer`]: records requests in memory (testing)

use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::deploy::{DeployRequest, Deployer};
use crate::domain::error::{GatehouseError, Result};

/// Rolls out an image tag with Helm.
#[derive(Debug, Clone)]
pub struct HelmDeployer {
    pub helm_bin: String,
    pub release: String,
    pub chart: String,
    /// Kubernetes namespace; defaults to the environment name.
    pub namespace: Option<String>,
    /// Image repository passed as `image.repository`.
    pub repository: Option<String>,
    pub timeout: Duration,
}

impl HelmDeployer {
    pub fn new(release: impl Into<String>, chart: impl Into<String>) -> Self {
        Self {
            helm_bin: "helm".to_string(),
            release: release.into(),
            chart: chart.into(),
            namespace: None,
            repository: None,
            timeout: Duration::from_secs(300),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }

    pub fn with_helm_bin(mut self, bin: impl Into<String>) -> Self {
        self.helm_bin = bin.into();
        self
    }

    /// Arguments passed to `helm` for `request`.
    pub fn command_args(&self, request: &DeployRequest) -> Vec<String> {
        let namespace = self
            .namespace
            .clone()
            .unwrap_or_else(|| request.environment.clone());
        let mut args = vec![
            "upgrade".to_string(),
            "--install".to_string(),
            self.release.clone(),
            self.chart.clone(),
            "--namespace".to_string(),
            namespace,
            "--create-namespace".to_string(),
        ];
        if let Some(repo) = &self.repository {
            args.push("--set".to_string());
            args.push(format!("image.repository={repo}"));
        }
        args.push("--set".to_string());
        args.push(format!("image.tag={}", request.tag));
        args.push("--set-string".to_string());
        args.push(format!("podAnnotations.gatehouse/run-id={}", request.run_id));
        args
    }
}

#[async_trait]
impl Deployer for HelmDeployer {
    async fn apply(&self, request: &DeployRequest) -> Result<()> {
        let args = self.command_args(request);
        debug!(helm = %self.helm_bin, ?args, "Invoking helm");

        let child = Command::new(&self.helm_bin)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GatehouseError::Deploy(format!("failed to spawn {}: {e}", self.helm_bin)))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                GatehouseError::Deploy(format!(
                    "helm timed out after {} seconds",
                    self.timeout.as_secs()
                ))
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GatehouseError::Deploy(format!(
                "helm exited with {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// In-memory deployer that records every request.
#[derive(Debug, Default)]
pub struct RecordingDeployer {
    requests: Mutex<Vec<DeployRequest>>,
}

impl RecordingDeployer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<DeployRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Deployer for RecordingDeployer {
    async fn apply(&self, request: &DeployRequest) -> Result<()> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(())
    }
}

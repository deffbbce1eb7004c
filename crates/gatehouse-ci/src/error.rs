//! Errors returned by pipeline execution.
//!
//! Stage failures are not errors; they are stage states in the run report.
//! These variants cover what keeps a run from completing or being recorded.

use gatehouse_core::{DefinitionError, GatehouseError, RunReport};
use gatehouse_state::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid pipeline definition: {0}")]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Core(#[from] GatehouseError),

    #[error("stage task failed: {0}")]
    Join(String),

    /// The run finished but its tag could not be recorded. `report` carries the
    /// full run with state FAILED.
    #[error("failed to publish tag for run {run_id}: {source}")]
    Publish {
        run_id: String,
        report: Box<RunReport>,
        source: StorageError,
    },
}

impl PipelineError {
    /// The run report, when the run got far enough to produce one.
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            PipelineError::Publish { report, .. } => Some(report),
            _ => None,
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

//! Domain models for Gatehouse.
//!
//! Canonical definitions for the core entities:
//! - `Finding` / `Severity`: what scanners report
//! - `GatePolicy`: how a stage judges its findings
//! - `PipelineDefinition` / `StageDefinition`: the static stage graph
//! - `PipelineRun` / `StageExecution`: one invocation and its per-stage state

pub mod definition;
pub mod error;
pub mod finding;
pub mod policy;
pub mod run;

pub use definition::{FindingsFormat, PipelineDefinition, StageDefinition};
pub use error::{DefinitionError, GatehouseError, Result, TaggingError};
pub use finding::{Finding, Severity};
pub use policy::{GateAction, GatePolicy};
pub use run::{
    Artifact, PipelineRun, RunState, StageExecution, StageState, Trigger, TriggerKind,
};

//! Gatehouse Core Library
//!
//! Gate policy evaluation, artifact tagging, stage graph validation and the
//! deployment trigger. Pipeline execution lives in `gatehouse-ci`.

pub mod config;
pub mod deploy;
pub mod deploy_runner;
pub mod domain;
pub mod gate;
pub mod graph;
pub mod obs;
pub mod reporting;
pub mod tagger;
pub mod telemetry;

pub use domain::{
    Artifact, DefinitionError, Finding, FindingsFormat, GateAction, GatePolicy, GatehouseError,
    PipelineDefinition, PipelineRun, Result, RunState, Severity, StageDefinition, StageExecution,
    StageState, TaggingError, Trigger, TriggerKind,
};

pub use config::GatehouseConfig;
pub use deploy::{deployment_id, DeployRequest, Deployer, DeploymentHandle, DeploymentTrigger};
pub use deploy_runner::{HelmDeployer, RecordingDeployer};
pub use gate::{evaluate, evaluate_gate, GateOutcome, GateVerdict};
pub use graph::StageGraph;
pub use reporting::{
    read_run_report_json, render_run_summary_md, write_run_report_json, RunReport,
};
pub use tagger::{parse_tag, ArtifactTagger, ImageRef, ParsedTag, MAX_TAG_LEN};
pub use telemetry::init_tracing;

pub use gatehouse_state::{RunId, StateBackend, StorageError, TagRecord, TagStore};

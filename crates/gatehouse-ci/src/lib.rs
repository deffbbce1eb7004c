//! Gatehouse CI: gated pipeline execution
//!
//! Runs a validated stage graph for one pipeline run:
//! - Dispatches stages concurrently once their predecessors pass their gates
//! - Skips everything downstream of a hard failure
//! - Applies timeouts and cancellation to running stages
//! - Records the run's artifact tag when the run succeeds

pub mod cancel;
pub mod error;
pub mod executor;
pub mod findings;
pub mod pipeline;
pub mod runner;
pub mod scheduler;
pub mod stage;

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use error::{PipelineError, PipelineResult};
pub use executor::{ExecutionEvent, Script, ScriptedExecutor, StageExecutor, StageOutput};
pub use findings::{parse_findings, FindingsParseError};
pub use pipeline::{Pipeline, PipelineOptions};
pub use runner::CommandExecutor;
pub use scheduler::{ScheduleOutcome, Scheduler, SchedulerOptions};
pub use stage::{RunContext, StageEnv};

//! Stage orchestrator for running pipeline stages over projects.
//!
//! The orchestrator is the single authority for what runs next:
//! - **Batch stages**: invoked once per run on the calling task
//! - **Per-project stages**: every eligible project is dispatched, in id order,
//!   to a bounded pool of workers, and each outcome is recorded on its project
//!
//! A project is never run twice by the same stage at the same time, and one
//! project's failure never aborts the rest of the run.

mod config;
mod executor;
mod runner;
mod stop;
mod types;

pub use config::OrchestratorConfig;
pub use executor::{BoundedExecutor, ExecutionReport, PoolStatus};
pub use runner::Orchestrator;
pub use stop::StopSignal;
pub use types::{
    InFlightProject, OrchestratorError, PipelineStatus, ProjectOutcome, ProjectReport,
    RunRequest, RunSummary,
};

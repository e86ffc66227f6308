pub mod config;
pub mod metrics;
pub mod orchestrator;
pub mod project;
pub mod stage;
pub mod testing;

pub use config::{
    load_config, load_config_from_str, load_config_or_default, validate_config, Config,
    ConfigError, DatabaseConfig, LogFormat, LoggingConfig,
};
pub use orchestrator::{
    Orchestrator, OrchestratorConfig, OrchestratorError, PipelineStatus, ProjectOutcome,
    RunRequest, RunSummary, StopSignal,
};
pub use project::{
    FieldValue, Project, ProjectId, ProjectList, ProjectStore, SqliteProjectStore, StoreError,
};
pub use stage::{
    BatchStage, ProjectStage, RegistryError, StageError, StageKind, StageRegistry, StageResult,
};

//! Error types for the stage module.

use thiserror::Error;

use crate::project::StoreError;

/// Errors a stage implementation may return from an invocation.
///
/// For a per-project stage the message ends up as one entry in the
/// project's `errors`; for a batch stage it is reported in the run summary.
#[derive(Debug, Error)]
pub enum StageError {
    /// The stage's own access to the project store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Any other failure raised by stage logic.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StageError {
    /// Build an error from a plain message.
    pub fn message(message: impl Into<String>) -> Self {
        StageError::Other(anyhow::anyhow!(message.into()))
    }
}

/// Errors raised while building or querying the stage registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The requested stage is not registered.
    #[error("unknown stage '{name}' (valid stages: {})", .valid.join(", "))]
    UnknownStage { name: String, valid: Vec<String> },

    /// A stage was registered with an empty name.
    #[error("stage name must not be empty")]
    EmptyName,

    /// The same name was registered twice.
    #[error("stage '{0}' is registered more than once")]
    DuplicateStage(String),

    /// A per-project stage names a prerequisite that is not registered.
    #[error("stage '{stage}' requires unknown prerequisite '{prerequisite}'")]
    UnknownPrerequisite { stage: String, prerequisite: String },

    /// A stage names itself as its prerequisite.
    #[error("stage '{0}' cannot be its own prerequisite")]
    SelfPrerequisite(String),

    /// Prerequisites form a loop.
    #[error("prerequisite cycle: {}", .0.join(" -> "))]
    PrerequisiteCycle(Vec<String>),
}

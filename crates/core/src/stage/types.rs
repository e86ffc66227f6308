//! Types exchanged between the orchestrator and stage implementations.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::orchestrator::StopSignal;
use crate::project::{FieldMap, FieldValue, ProjectId, ProjectStore};

/// How a stage is invoked.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Invoked once per run with a limit; creates projects itself.
    Batch,
    /// Invoked once per eligible project.
    PerProject,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Batch => f.write_str("batch"),
            StageKind::PerProject => f.write_str("per-project"),
        }
    }
}

/// Context handed to every per-project invocation.
///
/// Carries the identifiers a stage needs for its own log lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageContext {
    /// Name of the stage being run.
    pub stage: String,
    /// Project being processed.
    pub project_id: ProjectId,
}

impl StageContext {
    pub fn new(stage: impl Into<String>, project_id: ProjectId) -> Self {
        Self {
            stage: stage.into(),
            project_id,
        }
    }
}

/// Context handed to a batch invocation.
#[derive(Clone)]
pub struct BatchContext {
    /// Name of the stage being run. Projects the stage completes get this status.
    pub stage: String,
    /// Maximum number of projects to create (`None` = unbounded).
    pub limit: Option<usize>,
    /// Store the stage creates projects in.
    pub store: Arc<dyn ProjectStore>,
    /// Set when the operator asked the run to stop.
    pub stop: StopSignal,
}

impl fmt::Debug for BatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchContext")
            .field("stage", &self.stage)
            .field("limit", &self.limit)
            .field("stop_requested", &self.stop.is_stop_requested())
            .finish_non_exhaustive()
    }
}

/// Result of a batch invocation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Number of projects the stage processed.
    pub processed: usize,
}

impl BatchOutcome {
    pub fn processed(processed: usize) -> Self {
        Self { processed }
    }
}

/// Outcome of running one stage against one project.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageResult {
    /// Whether the stage completed for this project.
    pub success: bool,
    /// Messages recorded on failure.
    pub errors: Vec<String>,
    /// Informational messages, recorded whatever the outcome.
    pub warnings: Vec<String>,
    /// Fields written together with the new status on success.
    pub field_updates: FieldMap,
}

impl StageResult {
    /// A successful result with no payload.
    pub fn success() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    /// A failed result carrying one error.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            errors: vec![error.into()],
            ..Default::default()
        }
    }

    /// Add an error message.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.errors.push(error.into());
        self
    }

    /// Add a warning message.
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// Set a field to write on success.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.field_updates.insert(key.into(), value.into());
        self
    }
}

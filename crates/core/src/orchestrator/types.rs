//! Types for the stage orchestrator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::project::{ProjectId, StatusCount, StoreError};
use crate::stage::{RegistryError, StageKind};

/// Errors that abort a whole run.
///
/// Everything that goes wrong for a single project is recorded on that
/// project instead and reported through [`RunSummary`].
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The requested stage is not registered.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A run was requested with zero workers.
    #[error("invalid concurrency {0}: at least one worker is required")]
    InvalidConcurrency(usize),

    /// The eligible set could not be read.
    #[error("project store error: {0}")]
    Store(#[from] StoreError),
}

impl OrchestratorError {
    /// True for errors caused by the request or the registry rather than storage.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Registry(_) | OrchestratorError::InvalidConcurrency(_)
        )
    }
}

/// A request to run one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Stage to run.
    pub stage: String,
    /// Maximum number of projects (`None` = unlimited).
    pub limit: Option<usize>,
    /// Worker count; falls back to the configured `max_workers`.
    pub concurrency: Option<usize>,
    /// Only projects with `id >= min_id`.
    pub min_id: Option<ProjectId>,
    /// 1-origin table row to start from. Ignored when `min_id` is set.
    pub start_row: Option<usize>,
}

impl RunRequest {
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            limit: None,
            concurrency: None,
            min_id: None,
            start_row: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn with_min_id(mut self, min_id: ProjectId) -> Self {
        self.min_id = Some(min_id);
        self
    }

    pub fn with_start_row(mut self, start_row: usize) -> Self {
        self.start_row = Some(start_row);
        self
    }
}

/// What happened to one dispatched project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProjectOutcome {
    /// Status advanced to the stage.
    Succeeded,
    /// The stage reported failure; errors were recorded.
    Failed,
    /// The stage returned an error or panicked, or the success could not be
    /// stored; one error was recorded.
    Errored,
    /// Nothing was recorded; the project stays eligible.
    Skipped { reason: String },
}

impl ProjectOutcome {
    /// Label used in metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            ProjectOutcome::Succeeded => "succeeded",
            ProjectOutcome::Failed => "failed",
            ProjectOutcome::Errored => "errored",
            ProjectOutcome::Skipped { .. } => "skipped",
        }
    }
}

/// Outcome of one project in a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectReport {
    pub project_id: ProjectId,
    #[serde(flatten)]
    pub outcome: ProjectOutcome,
}

/// Summary of one orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSummary {
    /// Stage that was run.
    pub stage: String,
    /// How the stage was invoked.
    pub kind: StageKind,
    /// Projects found eligible.
    pub eligible: usize,
    /// Projects handed to a worker.
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errored: usize,
    pub skipped: usize,
    /// Eligible projects left untouched because a stop was requested.
    pub not_dispatched: usize,
    /// For batch stages, the count the stage reported. For per-project
    /// stages, the number of projects whose outcome was recorded.
    pub processed: usize,
    /// Whether the run ended early because of a stop request.
    pub stopped: bool,
    /// Warnings returned by stages that could not be written.
    #[serde(default)]
    pub unrecorded_warnings: usize,
    /// Error returned by a batch stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_error: Option<String>,
    /// Wall-clock duration of the run.
    pub duration_ms: u64,
    /// Per-project outcomes, by id.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub projects: Vec<ProjectReport>,
}

impl RunSummary {
    pub fn new(stage: impl Into<String>, kind: StageKind) -> Self {
        Self {
            stage: stage.into(),
            kind,
            eligible: 0,
            dispatched: 0,
            succeeded: 0,
            failed: 0,
            errored: 0,
            skipped: 0,
            not_dispatched: 0,
            processed: 0,
            stopped: false,
            unrecorded_warnings: 0,
            batch_error: None,
            duration_ms: 0,
            projects: Vec::new(),
        }
    }

    /// Count one project outcome.
    pub fn record(&mut self, project_id: ProjectId, outcome: ProjectOutcome) {
        match outcome {
            ProjectOutcome::Succeeded => self.succeeded += 1,
            ProjectOutcome::Failed => self.failed += 1,
            ProjectOutcome::Errored => self.errored += 1,
            ProjectOutcome::Skipped { .. } => self.skipped += 1,
        }
        if !matches!(outcome, ProjectOutcome::Skipped { .. }) {
            self.processed += 1;
        }
        self.projects.push(ProjectReport {
            project_id,
            outcome,
        });
    }

    /// Outcome recorded for a project in this run.
    pub fn outcome_of(&self, project_id: ProjectId) -> Option<&ProjectOutcome> {
        self.projects
            .iter()
            .find(|r| r.project_id == project_id)
            .map(|r| &r.outcome)
    }
}

/// A project currently being processed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct InFlightProject {
    pub stage: String,
    pub project_id: ProjectId,
}

/// Current status of the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStatus {
    /// Runs currently executing on this orchestrator.
    pub active_runs: usize,
    /// Projects currently being processed, by stage.
    pub in_flight: Vec<InFlightProject>,
    /// Project counts per status.
    pub counts: Vec<StatusCount>,
    /// Total projects in the store.
    pub total_projects: u64,
    /// Projects carrying at least one error.
    pub blocked_projects: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_record_counts() {
        let mut summary = RunSummary::new("collector", StageKind::PerProject);
        summary.record(1, ProjectOutcome::Succeeded);
        summary.record(2, ProjectOutcome::Failed);
        summary.record(3, ProjectOutcome::Errored);
        summary.record(
            4,
            ProjectOutcome::Skipped {
                reason: "already running".to_string(),
            },
        );

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.errored, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.outcome_of(2), Some(&ProjectOutcome::Failed));
        assert_eq!(summary.outcome_of(9), None);
    }

    #[test]
    fn test_summary_serialization() {
        let mut summary = RunSummary::new("collector", StageKind::PerProject);
        summary.record(7, ProjectOutcome::Succeeded);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["kind"], "per_project");
        assert_eq!(json["projects"][0]["project_id"], 7);
        assert_eq!(json["projects"][0]["outcome"], "succeeded");
        assert!(json.get("batch_error").is_none());

        let parsed: RunSummary = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, summary);
    }

    #[test]
    fn test_error_classification() {
        let err = OrchestratorError::InvalidConcurrency(0);
        assert!(err.is_configuration_error());
        assert_eq!(
            err.to_string(),
            "invalid concurrency 0: at least one worker is required"
        );

        let err = OrchestratorError::Store(StoreError::Database("disk I/O error".to_string()));
        assert!(!err.is_configuration_error());
    }
}

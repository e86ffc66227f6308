//! Testing utilities and test doubles for stages and stores.
//!
//! This module provides scripted stage implementations and a store wrapper
//! with failure injection, allowing orchestrator tests without real stage
//! logic.
//!
//! # Example
//!
//! ```rust,ignore
//! use drp_core::testing::{MockProjectStage, fixtures};
//!
//! let store = Arc::new(SqliteProjectStore::in_memory()?);
//! fixtures::seed(store.as_ref(), &["sourcing", "sourcing"]);
//!
//! let stage = MockProjectStage::new();
//! stage.set_error(2, "connection reset").await;
//!
//! // Register the stage and run the orchestrator...
//! ```

mod flaky_store;
mod mock_batch_stage;
mod mock_project_stage;

pub use flaky_store::FlakyStore;
pub use mock_batch_stage::{MockBatchStage, SOURCE_URL_FIELD};
pub use mock_project_stage::{MockProjectStage, RecordedInvocation};

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::project::{
        CreateProjectRequest, Project, ProjectList, ProjectStore, ProjectUpdate, StoreError,
    };

    /// Create a project and set its status.
    pub fn project_with_status(
        store: &dyn ProjectStore,
        status: &str,
    ) -> Result<Project, StoreError> {
        let project = store.create(CreateProjectRequest::new().with_field(
            "source_url",
            format!("https://data.example.gov/seed/{}", status),
        ))?;
        store.update(project.id, ProjectUpdate::new().with_status(status))
    }

    /// Create one project per status, in order. Returns the created projects.
    pub fn seed(store: &dyn ProjectStore, statuses: &[&str]) -> Result<Vec<Project>, StoreError> {
        statuses
            .iter()
            .map(|status| project_with_status(store, status))
            .collect()
    }

    /// Create a project with a status and one recorded error.
    pub fn blocked_project(
        store: &dyn ProjectStore,
        status: &str,
        error: &str,
    ) -> Result<Project, StoreError> {
        let project = project_with_status(store, status)?;
        store.append_to_list(project.id, ProjectList::Errors, error)?;
        store
            .get(project.id)?
            .ok_or(StoreError::NotFound(project.id))
    }
}

//! Project storage trait and types.

use thiserror::Error;

use crate::project::{FieldMap, FieldValue, Project, ProjectId, ProjectList, StatusCount};

/// Error type for project store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Project not found.
    #[error("Project not found: {0}")]
    NotFound(ProjectId),
    /// The request itself is malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// Database error (I/O, lock timeout, constraint violation).
    #[error("Database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Request to create a new project.
#[derive(Debug, Clone, Default)]
pub struct CreateProjectRequest {
    /// Initial stage-defined fields (e.g. the source URL).
    pub fields: FieldMap,
}

impl CreateProjectRequest {
    /// Create an empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an initial field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// Changes merged into a project in one atomic write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectUpdate {
    /// New status. `None` leaves the status untouched.
    pub status: Option<String>,
    /// Fields to insert or overwrite. Keys not named here are kept.
    pub fields: FieldMap,
}

impl ProjectUpdate {
    /// Create an empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the status.
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Set one field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Merge a batch of fields.
    pub fn with_fields(mut self, fields: FieldMap) -> Self {
        self.fields.extend(fields);
        self
    }

    /// True when applying this update would change nothing.
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.fields.is_empty()
    }
}

/// Query for projects eligible to enter a stage.
///
/// Matches projects whose status equals `prerequisite` and whose error list
/// is empty, ordered by id ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibleQuery {
    /// Status the project must currently have.
    pub prerequisite: String,
    /// Maximum number of projects to return (`None` = unlimited).
    pub limit: Option<usize>,
    /// Only projects with `id >= min_id`. Takes precedence over `start_row`.
    pub min_id: Option<ProjectId>,
    /// 1-origin row of the whole table (ordered by id) to start from.
    pub start_row: Option<usize>,
}

impl EligibleQuery {
    /// Create a query for the given prerequisite status.
    pub fn new(prerequisite: impl Into<String>) -> Self {
        Self {
            prerequisite: prerequisite.into(),
            limit: None,
            min_id: None,
            start_row: None,
        }
    }

    /// Set limit.
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Only return projects with id >= `min_id`.
    pub fn with_min_id(mut self, min_id: Option<ProjectId>) -> Self {
        self.min_id = min_id;
        self
    }

    /// Skip table rows before this 1-origin position.
    pub fn with_start_row(mut self, start_row: Option<usize>) -> Self {
        self.start_row = start_row;
        self
    }
}

/// Filter for listing projects.
#[derive(Debug, Clone)]
pub struct ProjectFilter {
    /// Filter by status.
    pub status: Option<String>,
    /// Only projects that carry errors.
    pub blocked_only: bool,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl Default for ProjectFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            status: None,
            blocked_only: false,
            limit: 100,
            offset: 0,
        }
    }

    /// Filter by status.
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Only projects with at least one error.
    pub fn blocked_only(mut self) -> Self {
        self.blocked_only = true;
        self
    }

    /// Set limit.
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// Set offset.
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for project storage backends.
///
/// Every mutating method is atomic for the project it touches: concurrent
/// callers never observe a half-applied write, and concurrent appends to the
/// same list never lose an entry.
pub trait ProjectStore: Send + Sync {
    /// Insert a new project with no status, errors or warnings.
    fn create(&self, request: CreateProjectRequest) -> Result<Project, StoreError>;

    /// Get a project by id.
    fn get(&self, id: ProjectId) -> Result<Option<Project>, StoreError>;

    /// Merge status and field changes into a project as a single write.
    fn update(&self, id: ProjectId, update: ProjectUpdate) -> Result<Project, StoreError>;

    /// Append one entry to the project's errors or warnings.
    fn append_to_list(&self, id: ProjectId, list: ProjectList, text: &str)
        -> Result<(), StoreError>;

    /// List projects eligible to enter a stage, oldest first.
    fn list_eligible(&self, query: &EligibleQuery) -> Result<Vec<Project>, StoreError>;

    /// List projects matching the filter, ordered by id.
    fn list(&self, filter: &ProjectFilter) -> Result<Vec<Project>, StoreError>;

    /// Whether any project has `key` set to `value`.
    fn exists_with_field(&self, key: &str, value: &FieldValue) -> Result<bool, StoreError>;

    /// Count projects per status.
    fn status_counts(&self) -> Result<Vec<StatusCount>, StoreError>;

    /// Administrative: empty one of the project's lists.
    fn clear_list(&self, id: ProjectId, list: ProjectList) -> Result<Project, StoreError>;

    /// Administrative: permanently delete a project.
    /// Returns the deleted project.
    fn delete(&self, id: ProjectId) -> Result<Project, StoreError>;

    /// Administrative: delete every project and restart id assignment.
    /// Returns the number of deleted projects.
    fn clear_all(&self) -> Result<usize, StoreError>;
}

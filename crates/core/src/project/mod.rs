//! Project records and their persistent store.

mod entries;
mod sqlite_store;
mod store;
mod types;

pub use entries::EMPTY_MESSAGE;
pub use sqlite_store::{SqliteProjectStore, DEFAULT_BUSY_TIMEOUT};
pub use store::{
    CreateProjectRequest, EligibleQuery, ProjectFilter, ProjectStore, ProjectUpdate, StoreError,
};
pub use types::{FieldMap, FieldValue, Project, ProjectId, ProjectList, StatusCount};

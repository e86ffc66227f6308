//! Project store wrapper with failure injection.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::project::{
    CreateProjectRequest, EligibleQuery, FieldValue, Project, ProjectFilter, ProjectId,
    ProjectList, ProjectStore, ProjectUpdate, StatusCount, StoreError,
};

/// Store wrapper that fails chosen operations on demand.
///
/// Every call is forwarded to the wrapped store unless the matching failure
/// switch is on, in which case it returns `StoreError::Database` without
/// touching the inner store.
pub struct FlakyStore {
    inner: Arc<dyn ProjectStore>,
    fail_updates: AtomicBool,
    fail_error_appends: AtomicBool,
    fail_warning_appends: AtomicBool,
    fail_list_eligible: AtomicBool,
    update_calls: AtomicUsize,
    append_calls: AtomicUsize,
}

impl FlakyStore {
    /// Wrap a store with every failure switch off.
    pub fn new(inner: Arc<dyn ProjectStore>) -> Self {
        Self {
            inner,
            fail_updates: AtomicBool::new(false),
            fail_error_appends: AtomicBool::new(false),
            fail_warning_appends: AtomicBool::new(false),
            fail_list_eligible: AtomicBool::new(false),
            update_calls: AtomicUsize::new(0),
            append_calls: AtomicUsize::new(0),
        }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &Arc<dyn ProjectStore> {
        &self.inner
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_error_appends(&self, fail: bool) {
        self.fail_error_appends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_warning_appends(&self, fail: bool) {
        self.fail_warning_appends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_list_eligible(&self, fail: bool) {
        self.fail_list_eligible.store(fail, Ordering::SeqCst);
    }

    /// Number of `update` calls, including failed ones.
    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    /// Number of `append_to_list` calls, including failed ones.
    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }

    fn injected(operation: &str) -> StoreError {
        StoreError::Database(format!("injected failure: {}", operation))
    }
}

impl ProjectStore for FlakyStore {
    fn create(&self, request: CreateProjectRequest) -> Result<Project, StoreError> {
        self.inner.create(request)
    }

    fn get(&self, id: ProjectId) -> Result<Option<Project>, StoreError> {
        self.inner.get(id)
    }

    fn update(&self, id: ProjectId, update: ProjectUpdate) -> Result<Project, StoreError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(Self::injected("update"));
        }
        self.inner.update(id, update)
    }

    fn append_to_list(
        &self,
        id: ProjectId,
        list: ProjectList,
        text: &str,
    ) -> Result<(), StoreError> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        let fail = match list {
            ProjectList::Errors => &self.fail_error_appends,
            ProjectList::Warnings => &self.fail_warning_appends,
        };
        if fail.load(Ordering::SeqCst) {
            return Err(Self::injected("append_to_list"));
        }
        self.inner.append_to_list(id, list, text)
    }

    fn list_eligible(&self, query: &EligibleQuery) -> Result<Vec<Project>, StoreError> {
        if self.fail_list_eligible.load(Ordering::SeqCst) {
            return Err(Self::injected("list_eligible"));
        }
        self.inner.list_eligible(query)
    }

    fn list(&self, filter: &ProjectFilter) -> Result<Vec<Project>, StoreError> {
        self.inner.list(filter)
    }

    fn exists_with_field(&self, key: &str, value: &FieldValue) -> Result<bool, StoreError> {
        self.inner.exists_with_field(key, value)
    }

    fn status_counts(&self) -> Result<Vec<StatusCount>, StoreError> {
        self.inner.status_counts()
    }

    fn clear_list(&self, id: ProjectId, list: ProjectList) -> Result<Project, StoreError> {
        self.inner.clear_list(id, list)
    }

    fn delete(&self, id: ProjectId) -> Result<Project, StoreError> {
        self.inner.delete(id)
    }

    fn clear_all(&self) -> Result<usize, StoreError> {
        self.inner.clear_all()
    }
}

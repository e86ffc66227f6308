//! Mock batch stage for testing.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::project::{CreateProjectRequest, FieldValue, ProjectUpdate};
use crate::stage::{BatchContext, BatchOutcome, BatchStage, StageError};

/// Field the mock stores each created project's source under.
pub const SOURCE_URL_FIELD: &str = "source_url";

/// Mock implementation of the BatchStage trait.
///
/// Each invocation creates up to `creating(n)` projects (fewer when the run
/// has a smaller limit or a stop is requested), gives each a unique
/// `source_url` and sets its status to the stage name, the way a real
/// entry stage would.
#[derive(Debug, Clone, Default)]
pub struct MockBatchStage {
    /// Limits the stage was invoked with.
    invocations: Arc<RwLock<Vec<Option<usize>>>>,
    /// If set, the next invocation will fail with this message.
    next_error: Arc<RwLock<Option<String>>>,
    /// Projects to create per invocation.
    to_create: usize,
    /// Source counter shared across invocations.
    next_source: Arc<AtomicUsize>,
}

impl MockBatchStage {
    /// Create a mock stage that creates nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create up to `count` projects per invocation.
    pub fn creating(mut self, count: usize) -> Self {
        self.to_create = count;
        self
    }

    /// Configure the next invocation to fail.
    pub async fn set_next_error(&self, message: impl Into<String>) {
        *self.next_error.write().await = Some(message.into());
    }

    /// Limits passed to each invocation.
    pub async fn recorded_limits(&self) -> Vec<Option<usize>> {
        self.invocations.read().await.clone()
    }

    /// Get the number of invocations.
    pub async fn invocation_count(&self) -> usize {
        self.invocations.read().await.len()
    }
}

#[async_trait]
impl BatchStage for MockBatchStage {
    async fn run_batch(&self, ctx: BatchContext) -> Result<BatchOutcome, StageError> {
        self.invocations.write().await.push(ctx.limit);

        if let Some(message) = self.next_error.write().await.take() {
            return Err(StageError::message(message));
        }

        let target = ctx.limit.map_or(self.to_create, |l| l.min(self.to_create));
        let mut processed = 0;
        while processed < target {
            if ctx.stop.is_stop_requested() {
                break;
            }

            let n = self.next_source.fetch_add(1, Ordering::Relaxed) + 1;
            let url = FieldValue::from(format!("https://data.example.gov/dataset/{}", n));
            if ctx.store.exists_with_field(SOURCE_URL_FIELD, &url)? {
                continue;
            }

            let project = ctx
                .store
                .create(CreateProjectRequest::new().with_field(SOURCE_URL_FIELD, url))?;
            ctx.store.update(
                project.id,
                ProjectUpdate::new().with_status(ctx.stage.as_str()),
            )?;
            processed += 1;
        }

        Ok(BatchOutcome::processed(processed))
    }
}

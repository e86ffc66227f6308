//! Built-in stage that does nothing.

use async_trait::async_trait;
use tracing::info;

use super::error::StageError;
use super::traits::BatchStage;
use super::types::{BatchContext, BatchOutcome};

/// Name under which [`NoopStage`] is usually registered.
pub const NOOP_STAGE: &str = "noop";

/// Batch stage that creates nothing and reports zero processed projects.
///
/// Useful for checking that configuration, store and logging are wired up.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStage;

#[async_trait]
impl BatchStage for NoopStage {
    async fn run_batch(&self, ctx: BatchContext) -> Result<BatchOutcome, StageError> {
        info!(stage = %ctx.stage, limit = ?ctx.limit, "Noop stage invoked");
        Ok(BatchOutcome::processed(0))
    }
}

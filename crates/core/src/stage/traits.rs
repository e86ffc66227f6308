//! Trait definitions for stage implementations.

use async_trait::async_trait;

use super::error::StageError;
use super::types::{BatchContext, BatchOutcome, StageContext, StageResult};
use crate::project::Project;

/// A stage with no prerequisite, run once per orchestrator run.
///
/// It creates projects itself and sets each one's status to `ctx.stage` when
/// it finishes with that project.
#[async_trait]
pub trait BatchStage: Send + Sync {
    async fn run_batch(&self, ctx: BatchContext) -> Result<BatchOutcome, StageError>;
}

/// A stage run once per eligible project.
///
/// Receives the full current record. Implementations must not query the
/// store for eligibility and must not set the project's status; the
/// orchestrator records the returned [`StageResult`].
#[async_trait]
pub trait ProjectStage: Send + Sync {
    async fn run_one(
        &self,
        ctx: &StageContext,
        project: Project,
    ) -> Result<StageResult, StageError>;
}

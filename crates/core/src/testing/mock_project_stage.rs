//! Mock per-project stage for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::project::{Project, ProjectId};
use crate::stage::{ProjectStage, StageContext, StageError, StageResult};

/// A recorded invocation for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedInvocation {
    /// Stage name from the context.
    pub stage: String,
    /// The record the stage received.
    pub project: Project,
}

/// What the mock does for one project.
#[derive(Debug, Clone)]
enum Script {
    Result(StageResult),
    Error(String),
    Panic(String),
}

/// Mock implementation of the ProjectStage trait.
///
/// Provides controllable behavior for testing:
/// - Track invocations and completion order
/// - Script a result, an error or a panic per project id
/// - Delay individual projects
///
/// Projects without a script succeed with an empty result. Clones share
/// state, so a test can keep a handle after registering the stage.
///
/// # Example
///
/// ```rust,ignore
/// use drp_core::testing::MockProjectStage;
///
/// let stage = MockProjectStage::new();
/// stage.set_result(1, StageResult::failure("bad url")).await;
/// stage.set_delay(2, Duration::from_secs(5)).await;
///
/// // Register and run...
///
/// assert_eq!(stage.invocation_count().await, 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockProjectStage {
    /// Recorded invocations, in start order.
    invocations: Arc<RwLock<Vec<RecordedInvocation>>>,
    /// Project ids in the order their invocation returned.
    completions: Arc<RwLock<Vec<ProjectId>>>,
    /// Scripted behavior per project.
    scripts: Arc<RwLock<HashMap<ProjectId, Script>>>,
    /// Simulated duration per project.
    delays: Arc<RwLock<HashMap<ProjectId, Duration>>>,
}

impl MockProjectStage {
    /// Create a new mock stage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `result` for project `id`.
    pub async fn set_result(&self, id: ProjectId, result: StageResult) {
        self.scripts.write().await.insert(id, Script::Result(result));
    }

    /// Return an error for project `id`.
    pub async fn set_error(&self, id: ProjectId, message: impl Into<String>) {
        self.scripts
            .write()
            .await
            .insert(id, Script::Error(message.into()));
    }

    /// Panic while processing project `id`.
    pub async fn set_panic(&self, id: ProjectId, message: impl Into<String>) {
        self.scripts
            .write()
            .await
            .insert(id, Script::Panic(message.into()));
    }

    /// Sleep for `delay` before answering for project `id`.
    pub async fn set_delay(&self, id: ProjectId, delay: Duration) {
        self.delays.write().await.insert(id, delay);
    }

    /// Get all recorded invocations.
    pub async fn invocations(&self) -> Vec<RecordedInvocation> {
        self.invocations.read().await.clone()
    }

    /// Get the number of invocations.
    pub async fn invocation_count(&self) -> usize {
        self.invocations.read().await.len()
    }

    /// Ids of the invoked projects, in start order.
    pub async fn invoked_ids(&self) -> Vec<ProjectId> {
        self.invocations
            .read()
            .await
            .iter()
            .map(|i| i.project.id)
            .collect()
    }

    /// Ids of the projects whose invocation returned, in completion order.
    /// Panicking invocations are not included.
    pub async fn completed_ids(&self) -> Vec<ProjectId> {
        self.completions.read().await.clone()
    }
}

#[async_trait]
impl ProjectStage for MockProjectStage {
    async fn run_one(
        &self,
        ctx: &StageContext,
        project: Project,
    ) -> Result<StageResult, StageError> {
        let id = project.id;
        self.invocations.write().await.push(RecordedInvocation {
            stage: ctx.stage.clone(),
            project,
        });

        let delay = self.delays.read().await.get(&id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let script = self.scripts.read().await.get(&id).cloned();
        let result = match script {
            None => Ok(StageResult::success()),
            Some(Script::Result(result)) => Ok(result),
            Some(Script::Error(message)) => Err(StageError::message(message)),
            Some(Script::Panic(message)) => panic!("{}", message),
        };

        self.completions.write().await.push(id);
        result
    }
}

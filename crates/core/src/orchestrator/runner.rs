//! Stage orchestrator implementation.
//!
//! Resolves a stage, computes the eligible set, dispatches projects through
//! the bounded executor and records each outcome in the project store.

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::FutureExt;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::metrics;
use crate::project::{
    EligibleQuery, Project, ProjectId, ProjectList, ProjectStore, ProjectUpdate, StoreError,
};
use crate::stage::{
    BatchContext, BatchStage, ProjectStage, StageContext, StageHandler, StageKind,
    StageRegistry, StageResult,
};

use super::config::OrchestratorConfig;
use super::executor::BoundedExecutor;
use super::stop::StopSignal;
use super::types::{
    InFlightProject, OrchestratorError, PipelineStatus, ProjectOutcome, RunRequest, RunSummary,
};

type InFlightSet = Arc<Mutex<HashSet<(String, ProjectId)>>>;

/// The pipeline orchestrator.
///
/// The only component that sets a project's status for per-project stages.
pub struct Orchestrator {
    config: OrchestratorConfig,
    store: Arc<dyn ProjectStore>,
    registry: Arc<StageRegistry>,
    stop: StopSignal,

    // Runtime state
    in_flight: InFlightSet,
    active_runs: Arc<AtomicUsize>,
}

impl Orchestrator {
    /// Create a new orchestrator.
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn ProjectStore>,
        registry: StageRegistry,
    ) -> Self {
        let mut stop = StopSignal::new();
        if let Some(ref path) = config.stop_file {
            stop = stop.with_stop_file(path);
        }

        Self {
            config,
            store,
            registry: Arc::new(registry),
            stop,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            active_runs: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn ProjectStore> {
        &self.store
    }

    /// Signal shared with every run of this orchestrator.
    ///
    /// A request stops the runs in progress (or the next run, when none is
    /// active) and is cleared once the last active run ends.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Run one stage.
    ///
    /// Fails only for configuration errors or when the eligible set cannot be
    /// read; per-project problems are recorded on the project and counted in
    /// the returned summary.
    pub async fn run(&self, request: RunRequest) -> Result<RunSummary, OrchestratorError> {
        let concurrency = request.concurrency.unwrap_or(self.config.max_workers);
        if concurrency == 0 {
            return Err(OrchestratorError::InvalidConcurrency(concurrency));
        }
        let definition = self.registry.resolve(&request.stage)?.clone();

        let started = Instant::now();
        let _run = ActiveRun::start(&self.active_runs, &self.stop);
        metrics::STAGE_RUNS
            .with_label_values(&[definition.name()])
            .inc();

        let mut summary = match definition.handler() {
            StageHandler::Batch(stage) => {
                self.run_batch(definition.name(), Arc::clone(stage), &request)
                    .await
            }
            StageHandler::PerProject {
                prerequisite,
                stage,
            } => {
                self.run_per_project(
                    definition.name(),
                    prerequisite,
                    Arc::clone(stage),
                    &request,
                    concurrency,
                )
                .await?
            }
        };

        summary.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            stage = %summary.stage,
            eligible = summary.eligible,
            succeeded = summary.succeeded,
            failed = summary.failed,
            errored = summary.errored,
            skipped = summary.skipped,
            not_dispatched = summary.not_dispatched,
            processed = summary.processed,
            unrecorded_warnings = summary.unrecorded_warnings,
            duration_ms = summary.duration_ms,
            "Stage run finished"
        );
        Ok(summary)
    }

    /// Batch stages run on the calling task, once.
    async fn run_batch(
        &self,
        name: &str,
        stage: Arc<dyn BatchStage>,
        request: &RunRequest,
    ) -> RunSummary {
        info!(stage = %name, limit = ?request.limit, "Running batch stage");

        let mut summary = RunSummary::new(name, StageKind::Batch);
        let ctx = BatchContext {
            stage: name.to_string(),
            limit: request.limit,
            store: Arc::clone(&self.store),
            stop: self.stop.clone(),
        };

        let timer = metrics::STAGE_INVOCATION_DURATION
            .with_label_values(&[name])
            .start_timer();
        let result = AssertUnwindSafe(stage.run_batch(ctx)).catch_unwind().await;
        timer.observe_duration();

        match result {
            Ok(Ok(outcome)) => summary.processed = outcome.processed,
            Ok(Err(e)) => {
                error!(stage = %name, error = %e, "Batch stage failed");
                summary.batch_error = Some(e.to_string());
            }
            Err(panic) => {
                let message = format!("stage panicked: {}", panic_message(panic.as_ref()));
                error!(stage = %name, error = %message, "Batch stage failed");
                summary.batch_error = Some(message);
            }
        }
        summary.stopped = self.stop.is_stop_requested();
        summary
    }

    async fn run_per_project(
        &self,
        name: &str,
        prerequisite: &str,
        stage: Arc<dyn ProjectStage>,
        request: &RunRequest,
        concurrency: usize,
    ) -> Result<RunSummary, OrchestratorError> {
        let query = EligibleQuery::new(prerequisite)
            .with_limit(request.limit)
            .with_min_id(request.min_id)
            .with_start_row(request.start_row);
        let eligible = self.store.list_eligible(&query).map_err(|e| {
            error!(stage = %name, error = %e, "Failed to list eligible projects");
            e
        })?;

        let mut summary = RunSummary::new(name, StageKind::PerProject);
        summary.eligible = eligible.len();
        if eligible.is_empty() {
            info!(stage = %name, prerequisite = %prerequisite, "No eligible projects");
            return Ok(summary);
        }

        info!(
            stage = %name,
            prerequisite = %prerequisite,
            eligible = eligible.len(),
            workers = concurrency,
            "Running per-project stage"
        );

        let executor = BoundedExecutor::new(concurrency);
        let report = executor
            .execute(eligible, &self.stop, |project| {
                ProjectTask {
                    stage_name: name.to_string(),
                    stage: Arc::clone(&stage),
                    store: Arc::clone(&self.store),
                    in_flight: Arc::clone(&self.in_flight),
                }
                .run(project)
            })
            .await;

        summary.dispatched = report.outputs.len() + report.panicked;
        summary.not_dispatched = report.not_dispatched;
        summary.stopped = report.stopped;
        summary.errored += report.panicked;

        let mut outputs = report.outputs;
        outputs.sort_by_key(|o| o.project_id);
        for output in outputs {
            summary.unrecorded_warnings += output.unrecorded_warnings;
            summary.record(output.project_id, output.outcome);
        }

        Ok(summary)
    }

    /// Current pipeline status.
    pub fn status(&self) -> Result<PipelineStatus, OrchestratorError> {
        let counts = self.store.status_counts()?;
        let total_projects: u64 = counts.iter().map(|c| c.total()).sum();
        let blocked_projects: u64 = counts.iter().map(|c| c.blocked).sum();

        let mut in_flight: Vec<InFlightProject> = lock_in_flight(&self.in_flight)
            .iter()
            .map(|(stage, project_id)| InFlightProject {
                stage: stage.clone(),
                project_id: *project_id,
            })
            .collect();
        in_flight.sort();

        Ok(PipelineStatus {
            active_runs: self.active_runs.load(Ordering::Relaxed),
            in_flight,
            counts,
            total_projects,
            blocked_projects,
        })
    }
}

/// Counts a run as active for as long as it is alive.
///
/// When the last active run ends, a pending stop request is cleared so the
/// next run dispatches again.
struct ActiveRun<'a> {
    counter: &'a AtomicUsize,
    stop: &'a StopSignal,
}

impl<'a> ActiveRun<'a> {
    fn start(counter: &'a AtomicUsize, stop: &'a StopSignal) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self { counter, stop }
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        if self.counter.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.stop.reset();
        }
    }
}

fn lock_in_flight(
    in_flight: &InFlightSet,
) -> std::sync::MutexGuard<'_, HashSet<(String, ProjectId)>> {
    // The set holds plain keys; a poisoned guard is still consistent.
    in_flight.lock().unwrap_or_else(|e| e.into_inner())
}

/// Exclusive right to run one stage on one project.
struct InFlightClaim {
    set: InFlightSet,
    key: (String, ProjectId),
}

impl InFlightClaim {
    fn acquire(set: &InFlightSet, stage: &str, id: ProjectId) -> Option<Self> {
        let key = (stage.to_string(), id);
        if !lock_in_flight(set).insert(key.clone()) {
            return None;
        }
        Some(Self {
            set: Arc::clone(set),
            key,
        })
    }
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        lock_in_flight(&self.set).remove(&self.key);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// What one project's trip through a stage produced.
struct TaskOutput {
    project_id: ProjectId,
    outcome: ProjectOutcome,
    /// Warnings the stage returned that could not be written.
    unrecorded_warnings: usize,
}

/// One project's trip through a stage: invoke, then reconcile.
struct ProjectTask {
    stage_name: String,
    stage: Arc<dyn ProjectStage>,
    store: Arc<dyn ProjectStore>,
    in_flight: InFlightSet,
}

impl ProjectTask {
    async fn run(self, project: Project) -> TaskOutput {
        let id = project.id;
        let span = info_span!("stage_invocation", stage = %self.stage_name, project_id = id);

        let (outcome, unrecorded_warnings) = async move {
            let Some(_claim) = InFlightClaim::acquire(&self.in_flight, &self.stage_name, id)
            else {
                warn!("Project is already running in this stage, skipping");
                let outcome = ProjectOutcome::Skipped {
                    reason: "already running".to_string(),
                };
                return (outcome, 0);
            };

            debug!("Invoking stage");
            let ctx = StageContext::new(self.stage_name.clone(), id);
            let timer = metrics::STAGE_INVOCATION_DURATION
                .with_label_values(&[self.stage_name.as_str()])
                .start_timer();
            let invocation = AssertUnwindSafe(self.stage.run_one(&ctx, project))
                .catch_unwind()
                .await;
            timer.observe_duration();

            let (outcome, unrecorded) = match invocation {
                Ok(Ok(result)) if result.success => self.record_success(id, result),
                Ok(Ok(result)) => {
                    self.record_failure(id, result.errors, result.warnings, ProjectOutcome::Failed)
                }
                Ok(Err(e)) => {
                    self.record_failure(id, vec![e.to_string()], vec![], ProjectOutcome::Errored)
                }
                Err(panic) => {
                    let message = format!("stage panicked: {}", panic_message(panic.as_ref()));
                    self.record_failure(id, vec![message], vec![], ProjectOutcome::Errored)
                }
            };

            metrics::PROJECT_OUTCOMES
                .with_label_values(&[self.stage_name.as_str(), outcome.label()])
                .inc();
            (outcome, unrecorded)
        }
        .instrument(span)
        .await;

        TaskOutput {
            project_id: id,
            outcome,
            unrecorded_warnings,
        }
    }

    /// Status and field updates land in one write; warnings follow.
    fn record_success(&self, id: ProjectId, result: StageResult) -> (ProjectOutcome, usize) {
        if !result.errors.is_empty() {
            warn!(
                errors = ?result.errors,
                "Stage reported success with errors; the errors are not recorded"
            );
        }

        let update = ProjectUpdate::new()
            .with_status(self.stage_name.as_str())
            .with_fields(result.field_updates);

        if let Err(e) = self.store.update(id, update) {
            error!(error = %e, "Failed to record stage success");
            return (self.record_outcome_failure(id, &e), result.warnings.len());
        }

        let unrecorded = self.record_warnings(id, &result.warnings);
        info!(
            warnings = result.warnings.len(),
            unrecorded_warnings = unrecorded,
            "Project completed stage"
        );
        (ProjectOutcome::Succeeded, unrecorded)
    }

    /// Append warnings, returning how many could not be written.
    fn record_warnings(&self, id: ProjectId, warnings: &[String]) -> usize {
        let mut unrecorded = 0;
        for warning in warnings {
            if let Err(e) = self
                .store
                .append_to_list(id, ProjectList::Warnings, warning)
            {
                error!(error = %e, "Failed to record warning");
                unrecorded += 1;
            }
        }
        unrecorded
    }

    /// The stage succeeded but its result could not be stored.
    fn record_outcome_failure(&self, id: ProjectId, cause: &StoreError) -> ProjectOutcome {
        let message = format!(
            "failed to record stage '{}' result: {}",
            self.stage_name, cause
        );
        match self.store.append_to_list(id, ProjectList::Errors, &message) {
            Ok(()) => ProjectOutcome::Errored,
            Err(e) => {
                error!(error = %e, "Failed to record the error; project left unchanged");
                ProjectOutcome::Skipped {
                    reason: format!("storage failure: {}", cause),
                }
            }
        }
    }

    fn record_failure(
        &self,
        id: ProjectId,
        errors: Vec<String>,
        warnings: Vec<String>,
        outcome: ProjectOutcome,
    ) -> (ProjectOutcome, usize) {
        let errors = if errors.is_empty() {
            vec![format!(
                "stage '{}' reported failure without a message",
                self.stage_name
            )]
        } else {
            errors
        };
        warn!(errors = ?errors, outcome = outcome.label(), "Project failed stage");

        let mut recorded = 0usize;
        let mut last_error = None;
        for message in &errors {
            match self.store.append_to_list(id, ProjectList::Errors, message) {
                Ok(()) => recorded += 1,
                Err(e) => {
                    error!(error = %e, "Failed to record error");
                    last_error = Some(e);
                }
            }
        }
        let unrecorded = self.record_warnings(id, &warnings);

        if recorded == 0 {
            let cause = last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no error recorded".to_string());
            let outcome = ProjectOutcome::Skipped {
                reason: format!("storage failure: {}", cause),
            };
            return (outcome, unrecorded);
        }
        (outcome, unrecorded)
    }
}

//! Prometheus metrics for the orchestration core.
//!
//! Metrics are process-wide statics; register them with [`all_metrics`].

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Orchestrator Metrics
// =============================================================================

/// Orchestrator runs started, by stage.
pub static STAGE_RUNS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("drp_stage_runs_total", "Total orchestrator runs started"),
        &["stage"],
    )
    .unwrap()
});

/// Per-project outcomes, by stage.
pub static PROJECT_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "drp_project_outcomes_total",
            "Total per-project stage outcomes",
        ),
        &["stage", "outcome"], // "succeeded", "failed", "errored", "skipped"
    )
    .unwrap()
});

/// Duration of one stage invocation (one project, or one batch call).
pub static STAGE_INVOCATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "drp_stage_invocation_duration_seconds",
            "Duration of stage invocations",
        )
        .buckets(vec![
            0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 1800.0, 3600.0,
        ]),
        &["stage"],
    )
    .unwrap()
});

// =============================================================================
// Executor Metrics
// =============================================================================

/// Worker tasks currently running a project.
pub static WORKERS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "drp_workers_active",
        "Number of workers currently running a stage invocation",
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(STAGE_RUNS.clone()),
        Box::new(PROJECT_OUTCOMES.clone()),
        Box::new(STAGE_INVOCATION_DURATION.clone()),
        Box::new(WORKERS_ACTIVE.clone()),
    ]
}

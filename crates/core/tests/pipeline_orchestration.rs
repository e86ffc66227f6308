//! Pipeline orchestration integration tests.
//!
//! These tests drive the orchestrator against a file-backed SQLite store:
//! sourcing -> collector -> uploader

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use drp_core::{
    orchestrator::StopSignal,
    project::{EligibleQuery, ProjectList, ProjectUpdate},
    stage::{NoopStage, NOOP_STAGE},
    testing::{fixtures, FlakyStore, MockBatchStage, MockProjectStage},
    Orchestrator, OrchestratorConfig, OrchestratorError, ProjectOutcome, ProjectStore,
    RegistryError, RunRequest, SqliteProjectStore, StageKind, StageRegistry, StageResult,
};

/// Test helper holding a store on disk and the stage doubles.
struct TestHarness {
    store: Arc<SqliteProjectStore>,
    sourcing: MockBatchStage,
    collector: MockProjectStage,
    uploader: MockProjectStage,
    temp_dir: TempDir,
}

impl TestHarness {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("pipeline.db");
        let store =
            Arc::new(SqliteProjectStore::new(&db_path).expect("Failed to create project store"));

        Self {
            store,
            sourcing: MockBatchStage::new().creating(10),
            collector: MockProjectStage::new(),
            uploader: MockProjectStage::new(),
            temp_dir,
        }
    }

    fn registry(&self) -> StageRegistry {
        StageRegistry::builder()
            .batch(NOOP_STAGE, NoopStage)
            .batch("sourcing", self.sourcing.clone())
            .per_project("collector", "sourcing", self.collector.clone())
            .per_project("uploader", "collector", self.uploader.clone())
            .build()
            .expect("Failed to build registry")
    }

    fn orchestrator(&self) -> Orchestrator {
        self.orchestrator_with(OrchestratorConfig::default())
    }

    fn orchestrator_with(&self, config: OrchestratorConfig) -> Orchestrator {
        Orchestrator::new(config, self.store.clone(), self.registry())
    }

    fn seed(&self, statuses: &[&str]) -> Vec<i64> {
        fixtures::seed(self.store.as_ref(), statuses)
            .expect("Failed to seed projects")
            .into_iter()
            .map(|p| p.id)
            .collect()
    }
}

// ============================================================================
// Stage kinds
// ============================================================================

#[tokio::test]
async fn test_entry_stage_creates_projects_up_to_limit() {
    let harness = TestHarness::new();
    let orchestrator = harness.orchestrator();

    let summary = orchestrator
        .run(RunRequest::new("sourcing").with_limit(1))
        .await
        .unwrap();

    assert_eq!(summary.kind, StageKind::Batch);
    assert_eq!(summary.processed, 1);
    assert!(summary.batch_error.is_none());
    assert_eq!(harness.sourcing.recorded_limits().await, vec![Some(1)]);

    let project = harness.store.get(1).unwrap().expect("project 1 exists");
    assert_eq!(project.status.as_deref(), Some("sourcing"));
    assert!(harness.store.get(2).unwrap().is_none());
}

#[tokio::test]
async fn test_success_advances_status_and_records_warnings() {
    let harness = TestHarness::new();
    let ids = harness.seed(&["sourcing"]);
    harness
        .collector
        .set_result(
            ids[0],
            StageResult::success()
                .with_warning("partial data")
                .with_field("row_count", 1200i64),
        )
        .await;

    let summary = harness
        .orchestrator()
        .run(RunRequest::new("collector"))
        .await
        .unwrap();

    assert_eq!(summary.eligible, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.outcome_of(ids[0]), Some(&ProjectOutcome::Succeeded));

    let project = harness.store.get(ids[0]).unwrap().unwrap();
    assert_eq!(project.status.as_deref(), Some("collector"));
    assert_eq!(project.warnings, vec!["partial data".to_string()]);
    assert!(project.errors.is_empty());
    assert_eq!(project.field("row_count"), Some(&1200i64.into()));
}

#[tokio::test]
async fn test_projects_with_errors_are_not_eligible() {
    let harness = TestHarness::new();
    let clean = harness.seed(&["sourcing"])[0];
    let blocked = fixtures::blocked_project(harness.store.as_ref(), "sourcing", "bad url")
        .unwrap()
        .id;

    let summary = harness
        .orchestrator()
        .run(RunRequest::new("collector"))
        .await
        .unwrap();

    assert_eq!(summary.eligible, 1);
    assert_eq!(harness.collector.invoked_ids().await, vec![clean]);
    assert!(summary.outcome_of(blocked).is_none());

    let project = harness.store.get(blocked).unwrap().unwrap();
    assert_eq!(project.status.as_deref(), Some("sourcing"));
    assert_eq!(project.errors, vec!["bad url".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_project_does_not_block_others() {
    let harness = TestHarness::new();
    let ids = harness.seed(&["sourcing", "sourcing"]);
    harness
        .collector
        .set_delay(ids[0], Duration::from_secs(5))
        .await;

    let orchestrator = Arc::new(harness.orchestrator());
    let run = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            orchestrator
                .run(RunRequest::new("collector").with_concurrency(2))
                .await
        })
    };

    // Project 2 must land while project 1 is still sleeping.
    let mut committed = false;
    for _ in 0..40 {
        let project = harness.store.get(ids[1]).unwrap().unwrap();
        if project.status.as_deref() == Some("collector") {
            committed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(committed, "project 2 was not committed while project 1 ran");
    assert!(!run.is_finished());
    assert_eq!(
        harness
            .store
            .get(ids[0])
            .unwrap()
            .unwrap()
            .status
            .as_deref(),
        Some("sourcing")
    );

    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.succeeded, 2);
    assert_eq!(harness.collector.completed_ids().await, vec![ids[1], ids[0]]);
}

// ============================================================================
// Isolation and reconciliation
// ============================================================================

#[tokio::test]
async fn test_failures_are_isolated_per_project() {
    let harness = TestHarness::new();
    let ids = harness.seed(&["sourcing", "sourcing", "sourcing", "sourcing"]);
    harness
        .collector
        .set_result(
            ids[0],
            StageResult::failure("portal returned 404").with_warning("retried twice"),
        )
        .await;
    harness.collector.set_error(ids[1], "connection reset").await;
    harness.collector.set_panic(ids[2], "index out of range").await;

    let summary = harness
        .orchestrator()
        .run(RunRequest::new("collector").with_concurrency(2))
        .await
        .unwrap();

    assert_eq!(summary.eligible, 4);
    assert_eq!(summary.dispatched, 4);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.errored, 2);
    assert_eq!(summary.processed, 4);

    let failed = harness.store.get(ids[0]).unwrap().unwrap();
    assert_eq!(failed.status.as_deref(), Some("sourcing"));
    assert_eq!(failed.errors, vec!["portal returned 404".to_string()]);
    assert_eq!(failed.warnings, vec!["retried twice".to_string()]);

    let errored = harness.store.get(ids[1]).unwrap().unwrap();
    assert_eq!(errored.status.as_deref(), Some("sourcing"));
    assert_eq!(errored.errors.len(), 1);
    assert!(errored.errors[0].contains("connection reset"));

    let panicked = harness.store.get(ids[2]).unwrap().unwrap();
    assert_eq!(panicked.status.as_deref(), Some("sourcing"));
    assert_eq!(panicked.errors.len(), 1);
    assert!(panicked.errors[0].contains("index out of range"));

    let succeeded = harness.store.get(ids[3]).unwrap().unwrap();
    assert_eq!(succeeded.status.as_deref(), Some("collector"));
    assert!(succeeded.errors.is_empty());
}

#[tokio::test]
async fn test_appends_preserve_existing_entries_in_order() {
    let harness = TestHarness::new();
    let id = harness.seed(&["sourcing"])[0];
    harness
        .store
        .append_to_list(id, ProjectList::Warnings, "checksum missing")
        .unwrap();
    harness
        .collector
        .set_result(
            id,
            StageResult::success()
                .with_warning("partial data")
                .with_warning("line one\nline two"),
        )
        .await;

    harness
        .orchestrator()
        .run(RunRequest::new("collector"))
        .await
        .unwrap();

    let project = harness.store.get(id).unwrap().unwrap();
    assert_eq!(
        project.warnings,
        vec![
            "checksum missing".to_string(),
            "partial data".to_string(),
            "line one\nline two".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_failed_update_leaves_status_and_fields_untouched() {
    let harness = TestHarness::new();
    let id = harness.seed(&["sourcing"])[0];
    let flaky = Arc::new(FlakyStore::new(harness.store.clone()));
    flaky.fail_updates(true);
    harness
        .collector
        .set_result(id, StageResult::success().with_field("title", "Rainfall 2019"))
        .await;

    let orchestrator =
        Orchestrator::new(OrchestratorConfig::default(), flaky.clone(), harness.registry());
    let summary = orchestrator
        .run(RunRequest::new("collector"))
        .await
        .unwrap();

    assert_eq!(summary.errored, 1);
    assert_eq!(flaky.update_calls(), 1);

    let project = harness.store.get(id).unwrap().unwrap();
    assert_eq!(project.status.as_deref(), Some("sourcing"));
    assert!(project.field("title").is_none());
    assert_eq!(project.errors.len(), 1);
    assert!(project.errors[0].contains("failed to record stage 'collector' result"));
}

#[tokio::test]
async fn test_unstorable_field_only_blocks_its_project() {
    let harness = TestHarness::new();
    let ids = harness.seed(&["sourcing", "sourcing"]);
    harness
        .collector
        .set_result(ids[0], StageResult::success().with_field("ratio", f64::NAN))
        .await;
    harness
        .collector
        .set_result(ids[1], StageResult::success().with_field("ratio", 0.25))
        .await;
    let orchestrator = harness.orchestrator();

    let collected = orchestrator
        .run(RunRequest::new("collector"))
        .await
        .unwrap();
    assert_eq!(collected.errored, 1);
    assert_eq!(collected.succeeded, 1);

    let rejected = harness.store.get(ids[0]).unwrap().unwrap();
    assert_eq!(rejected.status.as_deref(), Some("sourcing"));
    assert!(rejected.field("ratio").is_none());
    assert_eq!(rejected.errors.len(), 1);
    assert!(rejected.errors[0].contains("ratio"));

    let uploaded = orchestrator
        .run(RunRequest::new("uploader"))
        .await
        .unwrap();
    assert_eq!(uploaded.eligible, 1);
    assert_eq!(uploaded.succeeded, 1);
    assert_eq!(harness.uploader.invoked_ids().await, vec![ids[1]]);
}

#[tokio::test]
async fn test_unwritable_warnings_are_counted() {
    let harness = TestHarness::new();
    let id = harness.seed(&["sourcing"])[0];
    let flaky = Arc::new(FlakyStore::new(harness.store.clone()));
    flaky.fail_warning_appends(true);
    harness
        .collector
        .set_result(
            id,
            StageResult::success()
                .with_warning("partial data")
                .with_warning("slow portal"),
        )
        .await;

    let orchestrator =
        Orchestrator::new(OrchestratorConfig::default(), flaky.clone(), harness.registry());
    let summary = orchestrator
        .run(RunRequest::new("collector"))
        .await
        .unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.unrecorded_warnings, 2);

    let project = harness.store.get(id).unwrap().unwrap();
    assert_eq!(project.status.as_deref(), Some("collector"));
    assert!(project.warnings.is_empty());
}

#[tokio::test]
async fn test_unrecordable_failure_is_skipped() {
    let harness = TestHarness::new();
    let id = harness.seed(&["sourcing"])[0];
    let flaky = Arc::new(FlakyStore::new(harness.store.clone()));
    flaky.fail_error_appends(true);
    harness.collector.set_error(id, "timeout").await;

    let orchestrator =
        Orchestrator::new(OrchestratorConfig::default(), flaky.clone(), harness.registry());
    let summary = orchestrator
        .run(RunRequest::new("collector"))
        .await
        .unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.processed, 0);
    assert!(matches!(
        summary.outcome_of(id),
        Some(ProjectOutcome::Skipped { .. })
    ));

    let project = harness.store.get(id).unwrap().unwrap();
    assert_eq!(project.status.as_deref(), Some("sourcing"));
    assert!(project.errors.is_empty());
}

#[tokio::test]
async fn test_unreadable_eligible_set_escalates() {
    let harness = TestHarness::new();
    harness.seed(&["sourcing"]);
    let flaky = Arc::new(FlakyStore::new(harness.store.clone()));
    flaky.fail_list_eligible(true);

    let orchestrator =
        Orchestrator::new(OrchestratorConfig::default(), flaky.clone(), harness.registry());
    let err = orchestrator
        .run(RunRequest::new("collector"))
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::Store(_)));
    assert!(!err.is_configuration_error());
    assert_eq!(harness.collector.invocation_count().await, 0);
}

// ============================================================================
// Run control
// ============================================================================

#[tokio::test]
async fn test_unknown_stage_does_no_work() {
    let harness = TestHarness::new();
    harness.seed(&["sourcing"]);

    let err = harness
        .orchestrator()
        .run(RunRequest::new("colector"))
        .await
        .unwrap_err();

    match err {
        OrchestratorError::Registry(RegistryError::UnknownStage { name, valid }) => {
            assert_eq!(name, "colector");
            assert!(valid.contains(&"collector".to_string()));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(harness.collector.invocation_count().await, 0);
    assert_eq!(harness.sourcing.invocation_count().await, 0);
}

#[tokio::test]
async fn test_second_run_finds_nothing_to_do() {
    let harness = TestHarness::new();
    harness.seed(&["sourcing", "sourcing", "sourcing"]);
    let orchestrator = harness.orchestrator();

    let first = orchestrator
        .run(RunRequest::new("collector"))
        .await
        .unwrap();
    assert_eq!(first.succeeded, 3);

    let second = orchestrator
        .run(RunRequest::new("collector"))
        .await
        .unwrap();
    assert_eq!(second.eligible, 0);
    assert_eq!(second.dispatched, 0);
    assert_eq!(harness.collector.invocation_count().await, 3);
}

#[tokio::test]
async fn test_limit_and_min_id_narrow_the_eligible_set() {
    let harness = TestHarness::new();
    let ids = harness.seed(&["sourcing", "sourcing", "sourcing", "sourcing", "sourcing"]);

    let summary = harness
        .orchestrator()
        .run(RunRequest::new("collector").with_min_id(ids[2]).with_limit(2))
        .await
        .unwrap();

    assert_eq!(summary.eligible, 2);
    assert_eq!(harness.collector.invoked_ids().await, vec![ids[2], ids[3]]);
}

#[tokio::test]
async fn test_start_row_skips_leading_projects() {
    let harness = TestHarness::new();
    let ids = harness.seed(&["sourcing", "collector", "sourcing", "sourcing"]);

    let summary = harness
        .orchestrator()
        .run(RunRequest::new("collector").with_start_row(3))
        .await
        .unwrap();

    assert_eq!(summary.eligible, 2);
    assert_eq!(harness.collector.invoked_ids().await, vec![ids[2], ids[3]]);
}

#[tokio::test]
async fn test_stop_request_leaves_remaining_projects_untouched() {
    let harness = TestHarness::new();
    let ids = harness.seed(&["sourcing", "sourcing", "sourcing"]);
    harness
        .collector
        .set_delay(ids[0], Duration::from_millis(300))
        .await;

    let orchestrator = Arc::new(harness.orchestrator());
    let stop: StopSignal = orchestrator.stop_signal();
    let run = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.run(RunRequest::new("collector")).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    stop.request_stop();

    let summary = run.await.unwrap().unwrap();
    assert!(summary.stopped);
    assert_eq!(summary.dispatched, 1);
    assert_eq!(summary.not_dispatched, 2);
    assert_eq!(summary.succeeded, 1);

    let first = harness.store.get(ids[0]).unwrap().unwrap();
    assert_eq!(first.status.as_deref(), Some("collector"));
    for id in &ids[1..] {
        let project = harness.store.get(*id).unwrap().unwrap();
        assert_eq!(project.status.as_deref(), Some("sourcing"));
        assert!(project.errors.is_empty());
    }

    // The request ended with the run; the next run picks up the rest.
    let resumed = orchestrator
        .run(RunRequest::new("collector"))
        .await
        .unwrap();
    assert!(!resumed.stopped);
    assert_eq!(resumed.dispatched, 2);
    assert_eq!(resumed.succeeded, 2);
}

#[tokio::test]
async fn test_stop_file_prevents_dispatch() {
    let harness = TestHarness::new();
    harness.seed(&["sourcing", "sourcing"]);
    let stop_file = harness.temp_dir.path().join("drp.stop");
    std::fs::write(&stop_file, b"").unwrap();

    let orchestrator = harness.orchestrator_with(OrchestratorConfig {
        max_workers: 2,
        stop_file: Some(stop_file),
    });
    let summary = orchestrator
        .run(RunRequest::new("collector"))
        .await
        .unwrap();

    assert!(summary.stopped);
    assert_eq!(summary.eligible, 2);
    assert_eq!(summary.dispatched, 0);
    assert_eq!(summary.not_dispatched, 2);
    assert_eq!(harness.collector.invocation_count().await, 0);
}

#[tokio::test]
async fn test_overlapping_runs_skip_in_flight_projects() {
    let harness = TestHarness::new();
    let id = harness.seed(&["sourcing"])[0];
    harness
        .collector
        .set_delay(id, Duration::from_millis(300))
        .await;

    let orchestrator = Arc::new(harness.orchestrator());
    let first = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.run(RunRequest::new("collector")).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let status = orchestrator.status().unwrap();
    assert_eq!(status.active_runs, 1);
    assert_eq!(status.in_flight.len(), 1);
    assert_eq!(status.in_flight[0].project_id, id);

    let second = orchestrator
        .run(RunRequest::new("collector"))
        .await
        .unwrap();
    assert_eq!(second.skipped, 1);
    assert!(matches!(
        second.outcome_of(id),
        Some(ProjectOutcome::Skipped { .. })
    ));

    let first = first.await.unwrap().unwrap();
    assert_eq!(first.succeeded, 1);
    assert_eq!(harness.collector.invocation_count().await, 1);
    assert!(orchestrator.status().unwrap().in_flight.is_empty());
}

// ============================================================================
// Full pipeline
// ============================================================================

#[tokio::test]
async fn test_projects_flow_through_every_stage() {
    let harness = TestHarness::new();
    let orchestrator = harness.orchestrator();

    let sourced = orchestrator
        .run(RunRequest::new("sourcing").with_limit(3))
        .await
        .unwrap();
    assert_eq!(sourced.processed, 3);

    let created = harness
        .store
        .list_eligible(&EligibleQuery::new("sourcing"))
        .unwrap();
    assert_eq!(created.len(), 3);
    harness.collector.set_error(created[1].id, "portal down").await;

    let collected = orchestrator
        .run(RunRequest::new("collector").with_concurrency(3))
        .await
        .unwrap();
    assert_eq!(collected.succeeded, 2);
    assert_eq!(collected.errored, 1);

    let uploaded = orchestrator
        .run(RunRequest::new("uploader"))
        .await
        .unwrap();
    assert_eq!(uploaded.eligible, 2);
    assert_eq!(uploaded.succeeded, 2);

    let status = orchestrator.status().unwrap();
    assert_eq!(status.total_projects, 3);
    assert_eq!(status.blocked_projects, 1);

    // Operator clears the error; the project becomes eligible again.
    harness
        .store
        .clear_list(created[1].id, ProjectList::Errors)
        .unwrap();
    let collector = MockProjectStage::new();
    let registry = StageRegistry::builder()
        .batch("sourcing", MockBatchStage::new())
        .per_project("collector", "sourcing", collector.clone())
        .build()
        .unwrap();
    let retry = Orchestrator::new(
        OrchestratorConfig::default(),
        harness.store.clone(),
        registry,
    );
    let summary = retry.run(RunRequest::new("collector")).await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(collector.invoked_ids().await, vec![created[1].id]);
}

#[tokio::test]
async fn test_eligible_set_matches_status_and_clean_errors() {
    let harness = TestHarness::new();
    let statuses = [
        "sourcing", "collector", "sourcing", "uploader", "sourcing", "sourcing",
    ];
    let ids = harness.seed(&statuses);
    harness
        .store
        .append_to_list(ids[2], ProjectList::Errors, "no files")
        .unwrap();
    harness
        .store
        .update(ids[5], ProjectUpdate::new().with_status("collector"))
        .unwrap();

    let eligible = harness
        .store
        .list_eligible(&EligibleQuery::new("sourcing"))
        .unwrap();
    let eligible_ids: Vec<i64> = eligible.iter().map(|p| p.id).collect();
    assert_eq!(eligible_ids, vec![ids[0], ids[4]]);

    for project in harness.store.list(&Default::default()).unwrap() {
        let expected = eligible_ids.contains(&project.id);
        assert_eq!(project.is_eligible_for("sourcing"), expected);
    }
}

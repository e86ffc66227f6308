//! Subcommand handlers.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use tokio::signal;
use tracing::{info, warn};

use drp_core::{
    stage::StageDefinition, Orchestrator, PipelineStatus, Project, ProjectId, ProjectList,
    ProjectStore, RunRequest, RunSummary, StageRegistry, StoreError,
};

use crate::metrics;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Stage to run.
    pub stage: String,

    /// Maximum number of projects to process (0 means no limit).
    #[arg(short = 'n', long)]
    pub num_rows: Option<usize>,

    /// Concurrent per-project invocations. Defaults to the configured value.
    #[arg(short = 'w', long)]
    pub max_workers: Option<usize>,

    /// Skip projects before this 1-based row of the table.
    #[arg(long)]
    pub start_row: Option<usize>,

    /// Only process projects with an id at or above this one.
    #[arg(long)]
    pub start_id: Option<ProjectId>,

    /// Print the summary as JSON.
    #[arg(long)]
    pub json: bool,

    /// Write Prometheus metrics to this file after the run.
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,
}

impl RunArgs {
    fn request(&self) -> RunRequest {
        RunRequest {
            stage: self.stage.clone(),
            limit: self.num_rows.filter(|n| *n > 0),
            concurrency: self.max_workers,
            min_id: self.start_id,
            start_row: self.start_row,
        }
    }
}

/// Run one stage; Ctrl-C stops dispatching and lets in-flight projects finish.
pub async fn run_stage(orchestrator: &Orchestrator, args: RunArgs) -> Result<()> {
    let stop = orchestrator.stop_signal();
    let interrupt = tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, waiting for in-flight projects");
            stop.request_stop();
        }
    });

    let result = orchestrator.run(args.request()).await;
    interrupt.abort();
    let summary = result?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to encode summary")?
        );
    } else {
        print_summary(&summary);
    }

    if let Some(ref path) = args.metrics_file {
        metrics::write_metrics_file(path)?;
        info!("Metrics written to {:?}", path);
    }

    if let Some(ref error) = summary.batch_error {
        bail!("stage '{}' failed: {}", summary.stage, error);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("stage:          {} ({})", summary.stage, summary.kind);
    if summary.kind == drp_core::StageKind::Batch {
        println!("processed:      {}", summary.processed);
    } else {
        println!("eligible:       {}", summary.eligible);
        println!("dispatched:     {}", summary.dispatched);
        println!("succeeded:      {}", summary.succeeded);
        println!("failed:         {}", summary.failed);
        println!("errored:        {}", summary.errored);
        println!("skipped:        {}", summary.skipped);
        println!("not dispatched: {}", summary.not_dispatched);
        if summary.unrecorded_warnings > 0 {
            println!("lost warnings:  {}", summary.unrecorded_warnings);
        }
    }
    if summary.stopped {
        println!("stopped:        yes");
    }
    println!("duration:       {} ms", summary.duration_ms);
}

pub fn list_stages(registry: &StageRegistry) {
    for definition in registry.stages() {
        println!("{}", describe_stage(definition));
    }
}

fn describe_stage(definition: &StageDefinition) -> String {
    match definition.prerequisite() {
        Some(prerequisite) => format!(
            "{:<20} {:<12} after {}",
            definition.name(),
            definition.kind().to_string(),
            prerequisite
        ),
        None => format!(
            "{:<20} {}",
            definition.name(),
            definition.kind().to_string()
        ),
    }
}

pub fn show_status(orchestrator: &Orchestrator, json: bool) -> Result<()> {
    let status = orchestrator.status()?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&status).context("Failed to encode status")?
        );
    } else {
        print!("{}", format_status(&status));
    }
    Ok(())
}

fn format_status(status: &PipelineStatus) -> String {
    let mut out = format!("{:<24} {:>8} {:>8}\n", "STATUS", "CLEAN", "BLOCKED");
    for count in &status.counts {
        out.push_str(&format!(
            "{:<24} {:>8} {:>8}\n",
            count.status.as_deref().unwrap_or("(none)"),
            count.clean,
            count.blocked
        ));
    }
    out.push_str(&format!(
        "{} projects, {} blocked\n",
        status.total_projects, status.blocked_projects
    ));
    out
}

pub fn show_project(store: &dyn ProjectStore, id: ProjectId, json: bool) -> Result<()> {
    let project = store.get(id)?.ok_or(StoreError::NotFound(id))?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&project).context("Failed to encode project")?
        );
    } else {
        print!("{}", format_project(&project));
    }
    Ok(())
}

fn format_project(project: &Project) -> String {
    let mut out = format!("project {}\n", project.id);
    out.push_str(&format!(
        "  status:   {}\n",
        project.status.as_deref().unwrap_or("(none)")
    ));
    out.push_str(&format!("  created:  {}\n", project.created_at.to_rfc3339()));
    out.push_str(&format!("  updated:  {}\n", project.updated_at.to_rfc3339()));

    for list in [ProjectList::Errors, ProjectList::Warnings] {
        let entries = project.list(list);
        if entries.is_empty() {
            out.push_str(&format!("  {}: none\n", list));
            continue;
        }
        out.push_str(&format!("  {}:\n", list));
        for entry in entries {
            out.push_str(&format!("    - {}\n", entry.replace('\n', "\n      ")));
        }
    }

    if !project.fields.is_empty() {
        out.push_str("  fields:\n");
        for (key, value) in &project.fields {
            out.push_str(&format!("    {} = {} ({})\n", key, value, value.kind()));
        }
    }
    out
}

pub fn clear_errors(store: &dyn ProjectStore, id: ProjectId) -> Result<()> {
    let before = store.get(id)?.ok_or(StoreError::NotFound(id))?;
    store.clear_list(id, ProjectList::Errors)?;
    info!(project_id = id, cleared = before.errors.len(), "Errors cleared");
    println!(
        "cleared {} error(s) from project {}",
        before.errors.len(),
        id
    );
    Ok(())
}

pub fn reset(store: &dyn ProjectStore, confirmed: bool) -> Result<()> {
    if !confirmed {
        bail!("refusing to delete every project without --yes");
    }
    let removed = store.clear_all()?;
    warn!(removed, "All projects deleted");
    println!("deleted {} project(s)", removed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use drp_core::project::{CreateProjectRequest, ProjectUpdate};
    use drp_core::testing::fixtures;
    use drp_core::SqliteProjectStore;

    #[test]
    fn test_zero_rows_means_unlimited() {
        let args = RunArgs {
            stage: "collector".to_string(),
            num_rows: Some(0),
            max_workers: None,
            start_row: None,
            start_id: None,
            json: false,
            metrics_file: None,
        };
        assert_eq!(args.request().limit, None);
    }

    #[test]
    fn test_format_project_lists_messages_and_fields() {
        let store = SqliteProjectStore::in_memory().unwrap();
        let project = store
            .create(CreateProjectRequest::new().with_field("title", "Rainfall 2019"))
            .unwrap();
        store
            .update(project.id, ProjectUpdate::new().with_status("collector"))
            .unwrap();
        store
            .append_to_list(project.id, ProjectList::Errors, "bad url")
            .unwrap();
        let project = store.get(project.id).unwrap().unwrap();

        let text = format_project(&project);
        assert!(text.contains("status:   collector"));
        assert!(text.contains("- bad url"));
        assert!(text.contains("warnings: none"));
        assert!(text.contains("title = Rainfall 2019 (text)"));
    }

    #[test]
    fn test_clear_errors_and_reset() {
        let store = SqliteProjectStore::in_memory().unwrap();
        let blocked = fixtures::blocked_project(&store, "sourcing", "timeout").unwrap();

        clear_errors(&store, blocked.id).unwrap();
        assert!(store.get(blocked.id).unwrap().unwrap().errors.is_empty());

        assert!(reset(&store, false).is_err());
        assert!(store.get(blocked.id).unwrap().is_some());

        reset(&store, true).unwrap();
        assert!(store.get(blocked.id).unwrap().is_none());
    }

    #[test]
    fn test_show_missing_project_fails() {
        let store = SqliteProjectStore::in_memory().unwrap();
        assert!(show_project(&store, 42, false).is_err());
    }
}

//! Execution inspection and cleanup: `status`, `report`, `export`, `reset`.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use super::DEFAULT_EXECUTION_ID;

fn state_dir(project_dir: &Path) -> std::path::PathBuf {
    storyforge::init::get_state_dir(project_dir)
}

pub fn cmd_status(project_dir: &Path, execution_id: Option<&str>) -> Result<()> {
    use storyforge::checkpoint::{list_executions, load_checkpoint};
    use storyforge::init::is_initialized;
    use storyforge::story::StoryStatus;

    println!();
    println!("Storyforge Status");
    println!("=================");
    println!();

    if !is_initialized(project_dir) {
        println!("Project: Not initialized");
        println!();
        println!("Run 'storyforge init' to initialize the project.");
        println!();
        return Ok(());
    }
    println!("Project: Initialized");

    let state_dir = state_dir(project_dir);
    let ids = match execution_id {
        Some(id) => vec![id.to_string()],
        None => list_executions(&state_dir)?,
    };
    if ids.is_empty() {
        println!("Executions: none (run 'storyforge run')");
        println!();
        return Ok(());
    }

    for id in ids {
        let Some(checkpoint) = load_checkpoint(&state_dir, &id)? else {
            println!("Execution {}: not found", style(&id).yellow());
            continue;
        };
        let latest = checkpoint.latest_records();
        let accepted = latest
            .values()
            .filter(|r| r.status == StoryStatus::Accepted)
            .count();
        let failed = latest
            .values()
            .filter(|r| r.status == StoryStatus::Failed)
            .count();

        println!();
        println!(
            "Execution {} ({})",
            style(&checkpoint.execution_id).bold(),
            checkpoint.status
        );
        println!("  Accepted stories: {}", accepted);
        println!("  Failed stories:   {}", failed);
        println!("  Files:            {}", checkpoint.manifest.len());
        if let Some(last) = &checkpoint.last_completed_story {
            println!("  Last completed:   {}", last);
        }
        if let Some(story) = &checkpoint.in_flight {
            println!(
                "  Interrupted:      {} (re-runs on the next 'storyforge run')",
                style(story).yellow()
            );
        }
        println!(
            "  Updated:          {}",
            checkpoint.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    println!();
    Ok(())
}

pub fn cmd_report(project_dir: &Path, execution_id: Option<&str>, json: bool) -> Result<()> {
    use storyforge::checkpoint::execution_dir;
    use storyforge::report::ExecutionReport;
    use storyforge::story::StoryStatus;
    use storyforge::ui::format_duration;

    let id = execution_id.unwrap_or(DEFAULT_EXECUTION_ID);
    let path = execution_dir(&state_dir(project_dir), id).join("report.json");
    if !path.exists() {
        anyhow::bail!("No report for execution '{}'. Run 'storyforge run' first.", id);
    }
    let report = ExecutionReport::load(&path)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    println!(
        "Execution {}: {} ({}, {})",
        style(&report.execution_id).bold(),
        report.outcome,
        report.status,
        format_duration(report.duration)
    );
    println!();
    for story in &report.stories {
        let status = match story.status {
            StoryStatus::Accepted => style(story.status.to_string()).green(),
            StoryStatus::Failed => style(story.status.to_string()).red(),
            _ => style(story.status.to_string()).dim(),
        };
        let resumed = if story.resumed { " (earlier run)" } else { "" };
        println!(
            "  {:<12} {:<10} {} attempts{}  {}",
            story.story_id, status, story.attempts, resumed, story.title
        );
        if let Some(reason) = &story.reason {
            println!("      {}", style(reason).dim());
        }
        for finding in &story.findings {
            println!("      - {}", finding);
        }
    }
    println!();
    println!("{}", report.summary());
    println!("{} files in the accepted manifest", report.manifest.len());
    println!();
    Ok(())
}

/// Write an execution's accepted files into `output`, reading contents from its blobs.
pub fn cmd_export(project_dir: &Path, execution_id: Option<&str>, output: &Path) -> Result<()> {
    use storyforge::build::checked_relative;
    use storyforge::checkpoint::{BlobStore, execution_dir, load_checkpoint};

    let state_dir = state_dir(project_dir);
    let id = execution_id.unwrap_or(DEFAULT_EXECUTION_ID);
    let checkpoint = load_checkpoint(&state_dir, id)?
        .with_context(|| format!("Execution '{}' not found", id))?;
    let blobs = BlobStore::new(execution_dir(&state_dir, id).join("blobs"));

    let mut written = 0usize;
    for entry in &checkpoint.manifest {
        let relative = checked_relative(&entry.path)?;
        let content = blobs.get(&entry.content_hash)?.with_context(|| {
            format!(
                "Blob for {} is missing or corrupt; re-run 'storyforge run' to repair",
                entry.path
            )
        })?;
        let target = output.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        std::fs::write(&target, content)
            .with_context(|| format!("Failed to write file: {}", target.display()))?;
        written += 1;
    }

    println!(
        "Exported {} files from execution {} to {}",
        written,
        id,
        output.display()
    );
    Ok(())
}

pub fn cmd_reset(project_dir: &Path, execution_id: Option<&str>, force: bool) -> Result<()> {
    use storyforge::checkpoint::{list_executions, remove_execution};

    let state_dir = state_dir(project_dir);
    let ids = match execution_id {
        Some(id) => vec![id.to_string()],
        None => list_executions(&state_dir)?,
    };

    if ids.is_empty() {
        println!("Nothing to reset");
        return Ok(());
    }

    if !force {
        println!("This will delete all state of: {}", ids.join(", "));
        println!("Re-run with --force to confirm.");
        return Ok(());
    }

    for id in &ids {
        if remove_execution(&state_dir, id)? {
            println!("Removed execution {}", id);
        } else {
            println!("Execution {} not found", id);
        }
    }
    println!("Reset complete");
    Ok(())
}

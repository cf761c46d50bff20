//! Story execution: `storyforge run`.

use anyhow::{Context, Result};
use console::style;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::Instrument;

use super::super::Cli;
use storyforge::engine::FailurePolicy;

/// Flags of `storyforge run`.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub execution_id: Option<String>,
    pub stories: Option<PathBuf>,
    pub policy: Option<FailurePolicy>,
    pub max_stories: Option<usize>,
    pub retry_failed: bool,
    pub template_only: bool,
    pub ui: String,
}

pub fn check_run_prerequisites(project_dir: &Path) -> Result<()> {
    use storyforge::init::is_initialized;

    if !is_initialized(project_dir) {
        anyhow::bail!("Project not initialized. Run 'storyforge init' first.");
    }
    Ok(())
}

pub async fn cmd_run(cli: &Cli, project_dir: PathBuf, options: RunOptions) -> Result<()> {
    use storyforge::config::Config;
    use storyforge::engine::{EngineInput, StoryEngine};
    use storyforge::generate::{CodeGenerator, CommandGenerator, StrategyRouter, TemplateGenerator};
    use storyforge::story::{StoriesFile, StoryStatus, index_components};
    use storyforge::strategy::GenerationStrategy;
    use storyforge::ui::{EngineUI, UiMode, format_duration};

    check_run_prerequisites(&project_dir)?;

    let mut config = Config::new(project_dir, cli.verbose)?;
    config.ensure_directories()?;
    let stories_file = config.stories_file(options.stories.as_deref())?;
    let file = StoriesFile::load(&stories_file)?;

    // CLI flags override file and environment
    {
        let settings = config.settings_mut();
        if let Some(policy) = options.policy {
            settings.execution.failure_policy = policy;
        }
        if options.max_stories.is_some() {
            settings.execution.max_stories_per_invocation = options.max_stories;
        }
        if options.retry_failed {
            settings.execution.retry_failed = true;
        }
        if options.template_only {
            settings.strategy.force = Some(GenerationStrategy::Template);
        }
    }
    let settings = config.settings().clone();
    for warning in settings.validate() {
        eprintln!("{} {}", style("warning:").yellow().bold(), warning);
    }

    let template: Arc<dyn CodeGenerator> =
        Arc::new(TemplateGenerator::new(index_components(&file.components)));
    let generative: Option<Arc<dyn CodeGenerator>> = match &settings.generator.command {
        Some(command) if !options.template_only => Some(Arc::new(
            CommandGenerator::new(command.clone(), &config.project_dir)
                .with_env(settings.generator.env.clone()),
        )),
        _ => None,
    };
    let generator: Arc<dyn CodeGenerator> = Arc::new(StrategyRouter::new(template, generative));

    let input = EngineInput {
        execution_id: options
            .execution_id
            .clone()
            .unwrap_or_else(|| super::DEFAULT_EXECUTION_ID.to_string()),
        stories: file.stories,
        components: file.components,
    };

    let cancel = Arc::new(AtomicBool::new(false));
    let ctrl_c_flag = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling after the current story...");
            ctrl_c_flag.store(true, Ordering::SeqCst);
        }
    });

    let (tx, mut rx) = mpsc::channel(100);
    let ui = EngineUI::new(UiMode::parse(&options.ui), cli.verbose);
    let ui_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            ui.handle_event(&event);
        }
    });

    let result = {
        let engine = StoryEngine::new(&config.state_dir, generator)
            .with_strategy_policy(settings.strategy.clone())
            .with_validation_policy(settings.validation.clone())
            .with_build_policy(settings.build.clone())
            .with_fix_loop_policy(settings.fix_loop.clone())
            .with_execution_policy(settings.execution.clone())
            .with_event_channel(tx);
        // Every log line of this invocation carries its id
        let span = tracing::info_span!(
            "invocation",
            id = %uuid::Uuid::new_v4(),
            execution_id = %input.execution_id
        );
        engine.execute(&input, &cancel).instrument(span).await
    };
    ctrl_c.abort();
    ui_task.await.ok();

    let report = result.with_context(|| format!("Execution '{}' failed", input.execution_id))?;

    println!();
    println!(
        "Execution {} {} in {}",
        style(&report.execution_id).bold(),
        report.outcome,
        format_duration(report.duration)
    );
    println!("  {}", report.summary());
    println!(
        "  Report: {}",
        config
            .state_dir
            .join("executions")
            .join(&report.execution_id)
            .join("report.json")
            .display()
    );

    let failed = report.count(StoryStatus::Failed);
    if failed > 0 {
        anyhow::bail!("{} of {} stories failed", failed, report.stories.len());
    }
    Ok(())
}

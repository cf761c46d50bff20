use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use storyforge::engine::FailurePolicy;

mod cmd;

/// Environment variable holding the log filter.
const LOG_ENV: &str = "STORYFORGE_LOG";

#[derive(Parser)]
#[command(name = "storyforge")]
#[command(version, about = "Turn prioritized user stories into a validated codebase, one story at a time")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new storyforge project
    Init,
    /// Execute stories in dependency order, resuming an earlier execution
    Run {
        /// Idempotency key: re-running with the same id resumes
        #[arg(long)]
        execution_id: Option<String>,

        /// Path to the stories file (JSON or YAML)
        #[arg(long)]
        stories: Option<PathBuf>,

        /// What to do when a story fails: halt, continue
        #[arg(long)]
        policy: Option<FailurePolicy>,

        /// Suspend after this many stories
        #[arg(long)]
        max_stories: Option<usize>,

        /// Re-run stories that failed in an earlier invocation
        #[arg(long)]
        retry_failed: bool,

        /// Use the template strategy for every story
        #[arg(long)]
        template_only: bool,

        /// UI output mode: full, minimal, json
        #[arg(long, default_value = "full")]
        ui: String,
    },
    /// Show the execution order and strategy of each story
    Order {
        #[arg(long)]
        stories: Option<PathBuf>,
    },
    /// Show checkpoint status of executions
    Status {
        #[arg(long)]
        execution_id: Option<String>,
    },
    /// Show the report of an execution
    Report {
        #[arg(long)]
        execution_id: Option<String>,

        /// Print the raw JSON report
        #[arg(long)]
        json: bool,
    },
    /// Write the accepted files of an execution into a directory
    Export {
        output: PathBuf,

        #[arg(long)]
        execution_id: Option<String>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Delete execution state
    Reset {
        #[arg(long)]
        execution_id: Option<String>,

        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default storyforge.toml file
    Init,
}

/// Console logs go to stderr; when the project is initialized, logs are also
/// appended to `.storyforge/logs/storyforge.log`.
fn init_tracing(project_dir: &Path, verbose: bool, json: bool) -> Result<Option<WorkerGuard>> {
    let level = if verbose { "debug" } else { "warn" };
    let filter = || EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level));

    let console = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(filter())
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(filter())
            .boxed()
    };

    let log_dir = storyforge::init::get_state_dir(project_dir).join("logs");
    let (file_layer, guard) = if log_dir.is_dir() {
        let appender = tracing_appender::rolling::never(&log_dir, "storyforge.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .with_filter(EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")));
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    dotenvy::from_path(project_dir.join(".env")).ok();
    let _log_guard = init_tracing(&project_dir, cli.verbose, cli.log_json)?;

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Run {
            execution_id,
            stories,
            policy,
            max_stories,
            retry_failed,
            template_only,
            ui,
        } => {
            let options = cmd::RunOptions {
                execution_id: execution_id.clone(),
                stories: stories.clone(),
                policy: *policy,
                max_stories: *max_stories,
                retry_failed: *retry_failed,
                template_only: *template_only,
                ui: ui.clone(),
            };
            cmd::cmd_run(&cli, project_dir, options).await?;
        }
        Commands::Order { stories } => cmd::cmd_order(&cli, project_dir, stories.as_deref())?,
        Commands::Status { execution_id } => {
            cmd::cmd_status(&project_dir, execution_id.as_deref())?
        }
        Commands::Report { execution_id, json } => {
            cmd::cmd_report(&project_dir, execution_id.as_deref(), *json)?
        }
        Commands::Export {
            output,
            execution_id,
        } => cmd::cmd_export(&project_dir, execution_id.as_deref(), output)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
        Commands::Reset {
            execution_id,
            force,
        } => cmd::cmd_reset(&project_dir, execution_id.as_deref(), *force)?,
    }

    Ok(())
}

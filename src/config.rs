use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};

use crate::storyforge_config::{CONFIG_FILE, StoryforgeToml};

/// Name of the state directory under the project root.
pub const STATE_DIR: &str = ".storyforge";

const STORIES_FILE_NAMES: &[&str] = &["stories.json", "stories.yaml", "stories.yml"];

/// Runtime configuration for storyforge.
///
/// Resolves the project layout and loads `storyforge.toml` with environment
/// overrides applied.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub state_dir: PathBuf,
    pub log_dir: PathBuf,
    pub config_path: PathBuf,
    pub verbose: bool,
    settings: StoryforgeToml,
}

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let state_dir = project_dir.join(STATE_DIR);
        let log_dir = state_dir.join("logs");
        let config_path = state_dir.join(CONFIG_FILE);

        let mut settings = StoryforgeToml::load_or_default(&state_dir)?;
        settings.apply_env();

        Ok(Self {
            project_dir,
            state_dir,
            log_dir,
            config_path,
            verbose,
            settings,
        })
    }

    /// The loaded `storyforge.toml`, environment overrides included.
    pub fn settings(&self) -> &StoryforgeToml {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut StoryforgeToml {
        &mut self.settings
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.state_dir).context("Failed to create state directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        std::fs::create_dir_all(self.state_dir.join("executions"))
            .context("Failed to create executions directory")?;
        Ok(())
    }

    /// Locate the stories file.
    ///
    /// Order: explicit path, `[project] stories_file`, `.storyforge/stories.*`,
    /// then `stories.*` at the project root.
    pub fn stories_file(&self, explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return path
                .canonicalize()
                .with_context(|| format!("Failed to resolve stories file: {}", path.display()));
        }

        if let Some(configured) = &self.settings.project.stories_file {
            let path = self.project_dir.join(configured);
            if path.exists() {
                return Ok(path);
            }
            return Err(anyhow!(
                "Stories file from storyforge.toml not found: {}",
                path.display()
            ));
        }

        for dir in [&self.state_dir, &self.project_dir] {
            for name in STORIES_FILE_NAMES {
                let candidate = dir.join(name);
                if candidate.exists() {
                    return Ok(candidate);
                }
            }
        }

        Err(anyhow!(
            "No stories file found. Create .storyforge/stories.json or pass --stories"
        ))
    }
}

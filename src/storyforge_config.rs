//! Configuration file for storyforge: `.storyforge/storyforge.toml`.
//!
//! Layered configuration: file, then environment, then CLI flags. Every field has a
//! default, so a missing file means defaults.
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! name = "todo-app"
//! stories_file = "stories.yaml"
//!
//! [strategy]
//! effort_threshold = 8
//! criteria_threshold = 5
//! component_threshold = 4
//! complexity_keywords = ["real-time", "websocket", "algorithm"]
//!
//! [strategy.overrides]
//! US-7 = "generative"
//!
//! [fix_loop]
//! max_fix_attempts = 2
//! generator_timeout_secs = 300
//! story_budget_secs = 1800
//!
//! [validation]
//! type_severity = "warning"
//! shared_paths = ["package.json"]
//!
//! [build]
//! command = "npm run build"
//! timeout_secs = 120
//!
//! [build.env]
//! CI = "true"
//!
//! [generator]
//! command = "claude --print"
//!
//! [execution]
//! failure_policy = "continue"
//! max_stories_per_invocation = 5
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::build::BuildPolicy;
use crate::engine::ExecutionPolicy;
use crate::fixloop::FixLoopPolicy;
use crate::strategy::StrategyPolicy;
use crate::validate::ValidationPolicy;

pub const CONFIG_FILE: &str = "storyforge.toml";

/// Environment variable overriding `[generator] command`.
pub const GENERATOR_CMD_ENV: &str = "STORYFORGE_GENERATOR_CMD";
/// Environment variable overriding `[build] command`.
pub const BUILD_CMD_ENV: &str = "STORYFORGE_BUILD_CMD";

/// Project-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name (optional, defaults to directory name)
    #[serde(default)]
    pub name: Option<String>,
    /// Stories file relative to the project directory
    #[serde(default)]
    pub stories_file: Option<String>,
}

/// Generative backend configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratorSection {
    /// Shell command fed the prompt on stdin. Without one, generative stories
    /// fall back to templates.
    #[serde(default)]
    pub command: Option<String>,
    /// Extra environment for the generator command.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// The complete storyforge.toml configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoryforgeToml {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub strategy: StrategyPolicy,
    #[serde(default)]
    pub fix_loop: FixLoopPolicy,
    #[serde(default)]
    pub validation: ValidationPolicy,
    #[serde(default)]
    pub build: BuildPolicy,
    #[serde(default)]
    pub generator: GeneratorSection,
    #[serde(default)]
    pub execution: ExecutionPolicy,
}

impl StoryforgeToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse storyforge.toml")
    }

    /// Load `storyforge.toml` from the state directory, or defaults when absent.
    pub fn load_or_default(state_dir: &Path) -> Result<Self> {
        let config_path = state_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize storyforge.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(cmd) = lookup(GENERATOR_CMD_ENV).filter(|c| !c.trim().is_empty()) {
            self.generator.command = Some(cmd);
        }
        if let Some(cmd) = lookup(BUILD_CMD_ENV).filter(|c| !c.trim().is_empty()) {
            self.build.command = Some(cmd);
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.fix_loop.generator_timeout_secs == 0 {
            warnings.push("fix_loop.generator_timeout_secs is 0: every generator call will time out".to_string());
        }
        if self.fix_loop.story_budget_secs == 0 {
            warnings.push("fix_loop.story_budget_secs is 0: every story will fail".to_string());
        } else if self.fix_loop.story_budget_secs < self.fix_loop.generator_timeout_secs {
            warnings.push(format!(
                "fix_loop.story_budget_secs ({}) is shorter than generator_timeout_secs ({})",
                self.fix_loop.story_budget_secs, self.fix_loop.generator_timeout_secs
            ));
        }
        if self.build.command.is_some() && self.build.timeout_secs == 0 {
            warnings.push("build.timeout_secs is 0: every build will time out".to_string());
        }
        if self.build.command.as_deref().is_some_and(|c| c.trim().is_empty()) {
            warnings.push("build.command is empty".to_string());
        }
        if self.generator.command.as_deref().is_some_and(|c| c.trim().is_empty()) {
            warnings.push("generator.command is empty".to_string());
        }

        for pattern in &self.validation.shared_paths {
            if let Err(e) = glob::Pattern::new(pattern) {
                warnings.push(format!("Invalid shared path pattern '{}': {}", pattern, e));
            }
        }
        if self.strategy.complexity_keywords.iter().any(|k| k.trim().is_empty()) {
            warnings.push("strategy.complexity_keywords contains an empty keyword".to_string());
        }
        if self.execution.max_stories_per_invocation == Some(0) {
            warnings.push(
                "execution.max_stories_per_invocation is 0: runs will suspend immediately".to_string(),
            );
        }

        warnings
    }
}

//! Code generation contract and adapters.
//!
//! The engine only knows the [`CodeGenerator`] trait:
//! `generate(story, components, strategy, prior files, diagnostics?) -> files | GenerationError`.
//!
//! - [`TemplateGenerator`]: deterministic rendering from component specs
//! - [`CommandGenerator`]: an external command (e.g. an LLM CLI) fed a prompt on stdin
//! - [`StrategyRouter`]: dispatches a request to the backend for its strategy

mod command;
mod parse;
mod prompt;
mod router;
mod template;

pub use command::CommandGenerator;
pub use parse::parse_file_blocks;
pub use prompt::build_prompt;
pub use router::StrategyRouter;
pub use template::TemplateGenerator;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::errors::GenerationError;
use crate::manifest::{FileManifest, content_hash, normalize_path};
use crate::story::{ComponentSpec, UserStory};
use crate::strategy::GenerationStrategy;
use crate::validate::Finding;

/// A candidate file produced by one generation attempt.
///
/// Regeneration produces a new `GeneratedFile`; existing ones are never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFile {
    pub path: String,
    pub content: String,
    pub content_hash: String,
    pub story_id: String,
    pub strategy: GenerationStrategy,
}

impl GeneratedFile {
    pub fn new(path: &str, content: &str, story_id: &str, strategy: GenerationStrategy) -> Self {
        Self {
            path: normalize_path(path),
            content: content.to_string(),
            content_hash: content_hash(content),
            story_id: story_id.to_string(),
            strategy,
        }
    }
}

/// Error context from a failed attempt, passed back to the generator on retry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Attempt (1-based) that produced these diagnostics.
    pub attempt: u32,
    pub findings: Vec<Finding>,
    pub build_errors: Vec<String>,
    pub generator_error: Option<String>,
    /// The previous attempt hit a generator or build timeout.
    pub timed_out: bool,
    pub hint: Option<String>,
}

impl Diagnostics {
    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
            && self.build_errors.is_empty()
            && self.generator_error.is_none()
            && !self.timed_out
    }

    /// Plain-text rendering used in prompts and reports.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Attempt {} failed.", self.attempt);
        if let Some(err) = &self.generator_error {
            let _ = writeln!(out, "Generator error: {}", err);
        }
        if !self.findings.is_empty() {
            let _ = writeln!(out, "Validation findings:");
            for finding in &self.findings {
                let _ = writeln!(out, "- {}", finding);
            }
        }
        if !self.build_errors.is_empty() {
            let _ = writeln!(out, "Build errors:");
            for line in &self.build_errors {
                let _ = writeln!(out, "- {}", line);
            }
        }
        if self.timed_out {
            let _ = writeln!(out, "The previous attempt timed out.");
        }
        if let Some(hint) = &self.hint {
            let _ = writeln!(out, "Hint: {}", hint);
        }
        out
    }
}

/// Everything a generator sees for one call.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub story: &'a UserStory,
    pub components: &'a [ComponentSpec],
    pub strategy: GenerationStrategy,
    pub prior_files: &'a FileManifest,
    /// Populated only on fix attempts.
    pub diagnostics: Option<&'a Diagnostics>,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// Capability interface for producing a story's candidate files.
///
/// Implementations may be slow or fail; the caller applies the deadline.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(
        &self,
        request: &GenerationRequest<'_>,
    ) -> Result<Vec<GeneratedFile>, GenerationError>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

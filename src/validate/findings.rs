//! Validation findings and per-attempt results.
//!
//! ## Types
//!
//! - [`Severity`]: blocking findings fail a story, warnings never do
//! - [`FindingCategory`]: which check produced the finding
//! - [`Finding`]: one issue with file and optional line
//! - [`ValidationResult`]: ordered findings plus the pass/fail verdict
//!
//! ```
//! use storyforge::validate::{Finding, FindingCategory, Severity, ValidationResult};
//!
//! let finding = Finding::blocking(FindingCategory::Import, "src/app.ts", "Cannot resolve './missing'")
//!     .with_line(3);
//! let result = ValidationResult::from_findings("S1", vec![finding]);
//! assert!(!result.passed);
//! assert_eq!(result.blocking().count(), 1);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Blocking,
    Warning,
}

impl Severity {
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Blocking)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocking => write!(f, "blocking"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "blocking" | "error" => Ok(Self::Blocking),
            "warning" | "warn" => Ok(Self::Warning),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

/// The check that produced a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum FindingCategory {
    Syntax,
    Import,
    Export,
    Conflict,
    Type,
    Dependency,
    /// Build toolchain error, reported in story outcomes.
    Build,
    /// Generator failure or timeout before any file was produced.
    Generator,
}

impl fmt::Display for FindingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Syntax => "syntax",
            Self::Import => "import",
            Self::Export => "export",
            Self::Conflict => "conflict",
            Self::Type => "type",
            Self::Dependency => "dependency",
            Self::Build => "build",
            Self::Generator => "generator",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub category: FindingCategory,
    pub message: String,
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl Finding {
    pub fn new(
        severity: Severity,
        category: FindingCategory,
        file: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            message: message.into(),
            file: file.into(),
            line: None,
        }
    }

    pub fn blocking(
        category: FindingCategory,
        file: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(Severity::Blocking, category, file, message)
    }

    pub fn warning(
        category: FindingCategory,
        file: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(Severity::Warning, category, file, message)
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    /// `file:line` or just `file`.
    pub fn location(&self) -> String {
        match self.line {
            Some(line) => format!("{}:{}", self.file, line),
            None => self.file.clone(),
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}/{}] {}: {}",
            self.severity,
            self.category,
            self.location(),
            self.message
        )
    }
}

/// Outcome of validating one attempt's candidate files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub story_id: String,
    pub findings: Vec<Finding>,
    /// True only when there are zero blocking findings.
    pub passed: bool,
}

impl ValidationResult {
    pub fn from_findings(story_id: &str, findings: Vec<Finding>) -> Self {
        let passed = !findings.iter().any(|f| f.severity.is_blocking());
        Self {
            story_id: story_id.to_string(),
            findings,
            passed,
        }
    }

    pub fn pass(story_id: &str) -> Self {
        Self::from_findings(story_id, Vec::new())
    }

    pub fn blocking(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.severity.is_blocking())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| !f.severity.is_blocking())
    }

    pub fn has_category(&self, category: FindingCategory) -> bool {
        self.findings.iter().any(|f| f.category == category)
    }
}

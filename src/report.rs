//! Execution reports: per-story outcomes plus the accepted file manifest.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::checkpoint::{ExecutionStatus, StoryRecord};
use crate::fixloop::AttemptRecord;
use crate::manifest::{AcceptedFile, FileManifest, ManifestEntry};
use crate::story::StoryStatus;
use crate::strategy::GenerationStrategy;
use crate::util::duration_serde;
use crate::validate::Finding;

/// How an engine invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every story reached a terminal status.
    Completed,
    /// A story failed under the halt policy.
    Halted,
    /// The per-invocation story limit was reached; resume to continue.
    Suspended,
    /// Cancelled between stories; resume to continue.
    Cancelled,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::Halted => "halted",
            Self::Suspended => "suspended",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryReport {
    pub story_id: String,
    pub title: String,
    pub status: StoryStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<GenerationStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_reason: Option<String>,
    /// Findings of the deciding attempt (warnings only, for accepted stories).
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Every attempt made in this invocation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<AttemptRecord>,
    /// Outcome carried over from an earlier invocation.
    #[serde(default)]
    pub resumed: bool,
}

impl StoryReport {
    pub fn pending(story_id: &str, title: &str) -> Self {
        Self {
            story_id: story_id.to_string(),
            title: title.to_string(),
            status: StoryStatus::Pending,
            attempts: 0,
            strategy: None,
            strategy_reason: None,
            findings: Vec::new(),
            reason: None,
            history: Vec::new(),
            resumed: false,
        }
    }

    /// Report for a story committed in an earlier invocation.
    pub fn from_record(title: &str, record: &StoryRecord) -> Self {
        Self {
            status: record.status,
            attempts: record.attempts,
            findings: record.last_findings.clone(),
            reason: record.reason.clone(),
            resumed: true,
            ..Self::pending(&record.story_id, title)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub outcome: RunOutcome,
    /// Stories in execution order.
    pub stories: Vec<StoryReport>,
    pub manifest: Vec<ManifestEntry>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl ExecutionReport {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read report: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse report: {}", path.display()))
    }

    pub fn story(&self, story_id: &str) -> Option<&StoryReport> {
        self.stories.iter().find(|s| s.story_id == story_id)
    }

    pub fn count(&self, status: StoryStatus) -> usize {
        self.stories.iter().filter(|s| s.status == status).count()
    }

    /// One-line summary, e.g. `3 accepted, 1 failed, 2 pending`.
    pub fn summary(&self) -> String {
        format!(
            "{} accepted, {} failed, {} pending",
            self.count(StoryStatus::Accepted),
            self.count(StoryStatus::Failed),
            self.count(StoryStatus::Pending) + self.count(StoryStatus::InProgress),
        )
    }
}

/// Accepted files with content, as handed to downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputManifest {
    pub execution_id: String,
    pub files: Vec<AcceptedFile>,
}

impl OutputManifest {
    pub fn new(execution_id: &str, files: &FileManifest) -> Self {
        Self {
            execution_id: execution_id.to_string(),
            files: files.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::FindingCategory;

    fn report() -> ExecutionReport {
        let mut failed = StoryReport::pending("S2", "Second");
        failed.status = StoryStatus::Failed;
        failed.attempts = 3;
        failed.findings = vec![Finding::blocking(FindingCategory::Import, "src/a.ts", "x")];
        let mut accepted = StoryReport::pending("S1", "First");
        accepted.status = StoryStatus::Accepted;
        accepted.attempts = 1;

        ExecutionReport {
            execution_id: "exec".into(),
            status: ExecutionStatus::Failed,
            outcome: RunOutcome::Completed,
            stories: vec![accepted, failed, StoryReport::pending("S3", "Third")],
            manifest: Vec::new(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            duration: Duration::from_secs(2),
        }
    }

    #[test]
    fn test_summary_counts() {
        let report = report();
        assert_eq!(report.summary(), "1 accepted, 1 failed, 1 pending");
        assert_eq!(report.story("S2").unwrap().attempts, 3);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let report = report();
        std::fs::write(&path, serde_json::to_string_pretty(&report).unwrap()).unwrap();
        let loaded = ExecutionReport::load(&path).unwrap();
        assert_eq!(loaded.story("S2").unwrap().findings.len(), 1);
        assert_eq!(loaded.outcome, RunOutcome::Completed);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["duration"], 2000);
        assert!(json["stories"][0].get("history").is_none());
    }

    #[test]
    fn test_from_record_marks_resumed() {
        let record = StoryRecord {
            story_id: "S1".into(),
            status: StoryStatus::Accepted,
            attempts: 2,
            files: Vec::new(),
            last_findings: Vec::new(),
            reason: None,
            committed_at: Utc::now(),
        };
        let report = StoryReport::from_record("First", &record);
        assert!(report.resumed);
        assert_eq!(report.attempts, 2);
        assert_eq!(report.status, StoryStatus::Accepted);
    }
}

//! Checkpoint manager: the sole owner of an execution's durable state.
//!
//! Layout under `<state_dir>/executions/<execution_id>/`:
//!
//! ```text
//! checkpoint.json   ExecutionCheckpoint, replaced atomically on every change
//! blobs/<sha256>    accepted file contents, written before the record naming them
//! report.json       last execution report
//! manifest.json     accepted files with content, for downstream consumers
//! workspace/        isolated build workspace
//! .lock             held exclusively while a run owns the execution
//! ```
//!
//! Story records are append-only. The accepted manifest is rebuilt by replaying
//! accepted records in commit order, so the last writer under story order wins.

mod blobs;

pub use blobs::BlobStore;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::build::BuildResult;
use crate::errors::CheckpointError;
use crate::generate::GeneratedFile;
use crate::manifest::{AcceptedFile, FileManifest, ManifestEntry};
use crate::story::StoryStatus;
use crate::validate::{Finding, ValidationResult};

const CHECKPOINT_FILE: &str = "checkpoint.json";
const CHECKPOINT_VERSION: u32 = 1;

/// Cumulative status of an execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Completed => write!(f, "completed"),
            ExecutionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Committed outcome of one story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryRecord {
    pub story_id: String,
    pub status: StoryStatus,
    pub attempts: u32,
    /// Files this story contributed, empty unless accepted.
    #[serde(default)]
    pub files: Vec<ManifestEntry>,
    #[serde(default)]
    pub last_findings: Vec<Finding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub committed_at: DateTime<Utc>,
}

/// The persisted record of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionCheckpoint {
    pub execution_id: String,
    pub format_version: u32,
    /// Incremented by every commit.
    pub version: u64,
    pub last_completed_story: Option<String>,
    pub stories: Vec<StoryRecord>,
    pub manifest: Vec<ManifestEntry>,
    pub status: ExecutionStatus,
    /// Story that started but has not been committed yet.
    #[serde(default)]
    pub in_flight: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionCheckpoint {
    fn new(execution_id: &str) -> Self {
        let now = Utc::now();
        Self {
            execution_id: execution_id.to_string(),
            format_version: CHECKPOINT_VERSION,
            version: 0,
            last_completed_story: None,
            stories: Vec::new(),
            manifest: Vec::new(),
            status: ExecutionStatus::Running,
            in_flight: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Latest record per story.
    pub fn latest_records(&self) -> HashMap<&str, &StoryRecord> {
        let mut latest = HashMap::new();
        for record in &self.stories {
            latest.insert(record.story_id.as_str(), record);
        }
        latest
    }

    /// Ids of accepted stories.
    pub fn accepted_ids(&self) -> HashSet<String> {
        self.stories
            .iter()
            .filter(|r| r.status == StoryStatus::Accepted)
            .map(|r| r.story_id.clone())
            .collect()
    }

    /// Manifest entries from replaying accepted records in order.
    fn replay_manifest(&self) -> Vec<ManifestEntry> {
        let mut by_path: std::collections::BTreeMap<String, ManifestEntry> = Default::default();
        for record in self.stories.iter().filter(|r| r.status == StoryStatus::Accepted) {
            for entry in &record.files {
                by_path.insert(entry.path.clone(), entry.clone());
            }
        }
        by_path.into_values().collect()
    }
}

/// What `resume` found.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResumeState {
    /// Accepted stories with intact files.
    pub accepted: HashSet<String>,
    /// Stories whose records were dropped because their files were not durable.
    pub rolled_back: Vec<String>,
    /// Story that was running when the previous process stopped.
    pub interrupted: Option<String>,
}

/// Evidence required to accept a story.
#[derive(Debug, Clone, Copy)]
pub struct Acceptance<'a> {
    pub validation: &'a ValidationResult,
    pub build: &'a BuildResult,
    pub integration: &'a ValidationResult,
}

impl Acceptance<'_> {
    fn rejection(&self) -> Option<&'static str> {
        if !self.validation.passed {
            Some("validation did not pass")
        } else if !self.build.success {
            Some("build did not pass")
        } else if !self.integration.passed {
            Some("integration validation did not pass")
        } else {
            None
        }
    }
}

/// Validate an execution id: non-empty, `[A-Za-z0-9._-]`, not `.` or `..`.
pub fn validate_execution_id(id: &str) -> Result<(), CheckpointError> {
    let valid = !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(CheckpointError::InvalidExecutionId(id.to_string()))
    }
}

pub fn execution_dir(state_dir: &Path, execution_id: &str) -> PathBuf {
    state_dir.join("executions").join(execution_id)
}

/// Ids of every execution with a checkpoint, sorted.
pub fn list_executions(state_dir: &Path) -> Result<Vec<String>, CheckpointError> {
    let dir = state_dir.join("executions");
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(CheckpointError::Io { path: dir, source }),
    };
    let mut ids: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().join(CHECKPOINT_FILE).exists())
        .filter_map(|e| e.file_name().to_str().map(String::from))
        .collect();
    ids.sort();
    Ok(ids)
}

/// Read a checkpoint without taking the execution lock.
pub fn load_checkpoint(
    state_dir: &Path,
    execution_id: &str,
) -> Result<Option<ExecutionCheckpoint>, CheckpointError> {
    validate_execution_id(execution_id)?;
    read_checkpoint(&execution_dir(state_dir, execution_id).join(CHECKPOINT_FILE))
}

fn read_checkpoint(path: &Path) -> Result<Option<ExecutionCheckpoint>, CheckpointError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(CheckpointError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| CheckpointError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// Write a file via a synced temp file in the same directory and an atomic rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CheckpointError> {
    let io_err = |source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    };
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(io_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(io_err)?;
    tmp.write_all(bytes).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

fn acquire_lock(dir: &Path, execution_id: &str) -> Result<File, CheckpointError> {
    let path = dir.join(".lock");
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .map_err(|source| CheckpointError::Io {
            path: path.clone(),
            source,
        })?;
    file.try_lock_exclusive()
        .map_err(|_| CheckpointError::ExecutionLocked {
            execution_id: execution_id.to_string(),
        })?;
    Ok(file)
}

/// Delete an execution's state. Fails if a run holds it.
pub fn remove_execution(state_dir: &Path, execution_id: &str) -> Result<bool, CheckpointError> {
    validate_execution_id(execution_id)?;
    let dir = execution_dir(state_dir, execution_id);
    if !dir.exists() {
        return Ok(false);
    }
    let lock = acquire_lock(&dir, execution_id)?;
    fs::remove_dir_all(&dir).map_err(|source| CheckpointError::Io {
        path: dir.clone(),
        source,
    })?;
    drop(lock);
    Ok(true)
}

/// Owns one execution's checkpoint for the duration of a run.
pub struct CheckpointManager {
    dir: PathBuf,
    blobs: BlobStore,
    checkpoint: ExecutionCheckpoint,
    files: FileManifest,
    _lock: File,
}

impl std::fmt::Debug for CheckpointManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointManager")
            .field("dir", &self.dir)
            .field("version", &self.checkpoint.version)
            .finish()
    }
}

impl CheckpointManager {
    /// Open (or create) an execution and take its lock.
    ///
    /// Call [`resume`](Self::resume) before using the accepted state.
    pub fn open(state_dir: &Path, execution_id: &str) -> Result<Self, CheckpointError> {
        validate_execution_id(execution_id)?;
        let dir = execution_dir(state_dir, execution_id);
        fs::create_dir_all(&dir).map_err(|source| CheckpointError::Io {
            path: dir.clone(),
            source,
        })?;
        let lock = acquire_lock(&dir, execution_id)?;

        let checkpoint = read_checkpoint(&dir.join(CHECKPOINT_FILE))?
            .unwrap_or_else(|| ExecutionCheckpoint::new(execution_id));

        Ok(Self {
            blobs: BlobStore::new(dir.join("blobs")),
            dir,
            checkpoint,
            files: FileManifest::new(),
            _lock: lock,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.dir.join("workspace")
    }

    pub fn checkpoint(&self) -> &ExecutionCheckpoint {
        &self.checkpoint
    }

    /// The accepted files, read-only to everything but this manager.
    pub fn files(&self) -> &FileManifest {
        &self.files
    }

    /// Verify the accepted state and load it.
    ///
    /// Accepted records are checked in commit order. From the first record whose files
    /// are missing or corrupt, that record and every later one are rolled back, and
    /// those stories run again.
    pub fn resume(&mut self) -> Result<ResumeState, CheckpointError> {
        let mut state = ResumeState {
            interrupted: self.checkpoint.in_flight.take(),
            ..Default::default()
        };
        if let Some(story_id) = &state.interrupted {
            warn!(
                execution_id = %self.checkpoint.execution_id,
                story_id = %story_id,
                "Story was interrupted before its checkpoint was written; it will run again"
            );
        }

        let mut files = FileManifest::new();
        let mut keep = self.checkpoint.stories.len();
        'records: for (index, record) in self.checkpoint.stories.iter().enumerate() {
            if record.status != StoryStatus::Accepted {
                continue;
            }
            for entry in &record.files {
                match self.blobs.get(&entry.content_hash)? {
                    Some(content) => files.insert(AcceptedFile {
                        path: entry.path.clone(),
                        content,
                        content_hash: entry.content_hash.clone(),
                        story_id: entry.story_id.clone(),
                    }),
                    None => {
                        warn!(
                            story_id = %record.story_id,
                            path = %entry.path,
                            "Accepted file is not durable, rolling back"
                        );
                        keep = index;
                        break 'records;
                    }
                }
            }
        }

        let touched = keep < self.checkpoint.stories.len() || state.interrupted.is_some();
        if keep < self.checkpoint.stories.len() {
            for record in self.checkpoint.stories.drain(keep..) {
                if !state.rolled_back.contains(&record.story_id) {
                    state.rolled_back.push(record.story_id);
                }
            }
            // Files replayed from records after the cut are gone with them
            files = self.replay_files()?;
            self.checkpoint.last_completed_story =
                self.checkpoint.stories.last().map(|r| r.story_id.clone());
            self.checkpoint.manifest = self.checkpoint.replay_manifest();
            self.checkpoint.status = ExecutionStatus::Running;
        }

        self.files = files;
        state.accepted = self.checkpoint.accepted_ids();
        if touched {
            self.persist()?;
        }

        info!(
            execution_id = %self.checkpoint.execution_id,
            accepted = state.accepted.len(),
            rolled_back = state.rolled_back.len(),
            files = self.files.len(),
            "Checkpoint resumed"
        );
        Ok(state)
    }

    fn replay_files(&self) -> Result<FileManifest, CheckpointError> {
        let mut files = FileManifest::new();
        for entry in self.checkpoint.replay_manifest() {
            if let Some(content) = self.blobs.get(&entry.content_hash)? {
                files.insert(AcceptedFile {
                    path: entry.path,
                    content,
                    content_hash: entry.content_hash,
                    story_id: entry.story_id,
                });
            }
        }
        Ok(files)
    }

    /// Record that a story started.
    pub fn mark_in_flight(&mut self, story_id: &str) -> Result<(), CheckpointError> {
        self.checkpoint.in_flight = Some(story_id.to_string());
        self.persist()
    }

    /// Commit an accepted story: blobs first, then the record.
    pub fn commit_accepted(
        &mut self,
        story_id: &str,
        attempts: u32,
        files: &[GeneratedFile],
        evidence: Acceptance<'_>,
    ) -> Result<(), CheckpointError> {
        if let Some(reason) = evidence.rejection() {
            return Err(CheckpointError::AcceptanceRejected {
                story: story_id.to_string(),
                reason: reason.to_string(),
            });
        }

        let mut entries = Vec::with_capacity(files.len());
        for file in files {
            let hash = self.blobs.put(&file.content)?;
            entries.push(ManifestEntry {
                path: file.path.clone(),
                content_hash: hash,
                story_id: story_id.to_string(),
            });
        }

        let warnings: Vec<Finding> = evidence
            .validation
            .warnings()
            .chain(evidence.integration.warnings())
            .cloned()
            .collect();

        self.append(StoryRecord {
            story_id: story_id.to_string(),
            status: StoryStatus::Accepted,
            attempts,
            files: entries,
            last_findings: warnings,
            reason: None,
            committed_at: Utc::now(),
        })?;
        for file in files {
            self.files.insert(AcceptedFile::from(file));
        }
        Ok(())
    }

    /// Commit a failed story. Its files never enter the manifest.
    pub fn commit_failed(
        &mut self,
        story_id: &str,
        attempts: u32,
        last_findings: Vec<Finding>,
        reason: impl Into<String>,
    ) -> Result<(), CheckpointError> {
        self.append(StoryRecord {
            story_id: story_id.to_string(),
            status: StoryStatus::Failed,
            attempts,
            files: Vec::new(),
            last_findings,
            reason: Some(reason.into()),
            committed_at: Utc::now(),
        })
    }

    fn append(&mut self, record: StoryRecord) -> Result<(), CheckpointError> {
        debug!(
            execution_id = %self.checkpoint.execution_id,
            story_id = %record.story_id,
            status = %record.status,
            "Committing story"
        );
        self.checkpoint.last_completed_story = Some(record.story_id.clone());
        if self.checkpoint.in_flight.as_deref() == Some(record.story_id.as_str()) {
            self.checkpoint.in_flight = None;
        }
        self.checkpoint.stories.push(record);
        self.checkpoint.manifest = self.checkpoint.replay_manifest();
        self.checkpoint.version += 1;
        self.persist()
    }

    pub fn set_status(&mut self, status: ExecutionStatus) -> Result<(), CheckpointError> {
        if self.checkpoint.status == status && self.checkpoint.in_flight.is_none() {
            return Ok(());
        }
        self.checkpoint.status = status;
        self.checkpoint.in_flight = None;
        self.persist()
    }

    /// Write a JSON artifact (report, manifest) next to the checkpoint.
    pub fn write_artifact<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf, CheckpointError> {
        let path = self.dir.join(name);
        let json = serde_json::to_vec_pretty(value).map_err(|source| CheckpointError::Corrupt {
            path: path.clone(),
            source,
        })?;
        write_atomic(&path, &json)?;
        Ok(path)
    }

    fn persist(&mut self) -> Result<(), CheckpointError> {
        self.checkpoint.updated_at = Utc::now();
        let path = self.dir.join(CHECKPOINT_FILE);
        let json =
            serde_json::to_vec_pretty(&self.checkpoint).map_err(|source| CheckpointError::Corrupt {
                path: path.clone(),
                source,
            })?;
        write_atomic(&path, &json)
    }
}

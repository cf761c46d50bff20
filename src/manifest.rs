//! The cumulative accepted file set.
//!
//! A `FileManifest` maps each output path to the single accepted version of that file.
//! Only the checkpoint manager produces manifests that are persisted; validators and
//! the build orchestrator read them, or read an overlay with a story's candidates.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::generate::GeneratedFile;

/// SHA-256 of file content as lower-case hex.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Normalize a relative output path: forward slashes, no `./` segments.
pub fn normalize_path(path: &str) -> String {
    let path = path.trim().replace('\\', "/");
    path.split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// One accepted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedFile {
    pub path: String,
    pub content: String,
    pub content_hash: String,
    pub story_id: String,
}

impl From<&GeneratedFile> for AcceptedFile {
    fn from(file: &GeneratedFile) -> Self {
        Self {
            path: file.path.clone(),
            content: file.content.clone(),
            content_hash: file.content_hash.clone(),
            story_id: file.story_id.clone(),
        }
    }
}

/// Path and hash of a file, without content. This is what checkpoints record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub content_hash: String,
    pub story_id: String,
}

/// Accepted files keyed by path. One hash per path by construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileManifest {
    files: BTreeMap<String, AcceptedFile>,
}

impl FileManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&AcceptedFile> {
        self.files.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// Insert a file, replacing any earlier version at the same path.
    pub fn insert(&mut self, file: AcceptedFile) {
        self.files.insert(file.path.clone(), file);
    }

    pub fn iter(&self) -> impl Iterator<Item = &AcceptedFile> {
        self.files.values()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(|k| k.as_str())
    }

    /// Path/hash list in path order.
    pub fn entries(&self) -> Vec<ManifestEntry> {
        self.files
            .values()
            .map(|f| ManifestEntry {
                path: f.path.clone(),
                content_hash: f.content_hash.clone(),
                story_id: f.story_id.clone(),
            })
            .collect()
    }

    /// A copy of this manifest with the candidate files laid over it.
    pub fn overlay(&self, candidates: &[GeneratedFile]) -> FileManifest {
        let mut combined = self.clone();
        for file in candidates {
            combined.insert(AcceptedFile::from(file));
        }
        combined
    }

    /// Files produced by one story.
    pub fn files_from(&self, story_id: &str) -> impl Iterator<Item = &AcceptedFile> {
        self.files.values().filter(move |f| f.story_id == story_id)
    }
}

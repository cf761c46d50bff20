//! Per-execution build workspace.
//!
//! Each execution owns one directory. Before every build the directory is brought to
//! exactly the given file set: stale files from earlier attempts are removed and every
//! file is rewritten. Configured cache directories (e.g. `node_modules`) survive
//! between attempts of the same execution only.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::errors::WorkspaceError;
use crate::manifest::FileManifest;

#[derive(Debug, Clone)]
pub struct IsolatedWorkspace {
    root: PathBuf,
    preserve: Vec<String>,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> WorkspaceError + '_ {
    move |source| WorkspaceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Reject absolute paths and any path that climbs out of the root.
pub fn checked_relative(path: &str) -> Result<PathBuf, WorkspaceError> {
    let candidate = Path::new(path);
    let escapes = path.is_empty()
        || candidate.is_absolute()
        || candidate
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(WorkspaceError::PathEscape {
            path: path.to_string(),
        });
    }
    Ok(candidate.to_path_buf())
}

impl IsolatedWorkspace {
    pub fn new(root: impl Into<PathBuf>, preserve: Vec<String>) -> Self {
        Self {
            root: root.into(),
            preserve,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_preserved(&self, relative: &Path) -> bool {
        relative
            .components()
            .next()
            .and_then(|c| c.as_os_str().to_str())
            .is_some_and(|first| self.preserve.iter().any(|p| p == first))
    }

    /// Make the workspace contain exactly `files` (plus preserved cache directories).
    pub fn materialize(&self, files: &FileManifest) -> Result<(), WorkspaceError> {
        let mut wanted = HashSet::new();
        for file in files.iter() {
            wanted.insert(checked_relative(&file.path)?);
        }

        std::fs::create_dir_all(&self.root).map_err(io_err(&self.root))?;

        // Remove stale files, then directories left empty
        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .contents_first(true)
            .into_iter()
            .filter_entry(|e| {
                e.path()
                    .strip_prefix(&self.root)
                    .map(|rel| !self.is_preserved(rel))
                    .unwrap_or(true)
            });
        for entry in walker {
            let entry = entry.map_err(|e| WorkspaceError::Io {
                path: self.root.clone(),
                source: e.into(),
            })?;
            let path = entry.path();
            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            if entry.file_type().is_dir() {
                // Fails when not empty, which is what we want
                let _ = std::fs::remove_dir(path);
            } else if !wanted.contains(relative) {
                std::fs::remove_file(path).map_err(io_err(path))?;
            }
        }

        for file in files.iter() {
            let target = self.root.join(checked_relative(&file.path)?);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(io_err(parent))?;
            }
            std::fs::write(&target, &file.content).map_err(io_err(&target))?;
        }
        Ok(())
    }
}

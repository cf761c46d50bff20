//! Content-addressed file storage under `blobs/<sha256>`.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::warn;

use super::write_atomic;
use crate::errors::CheckpointError;
use crate::manifest::content_hash;

pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_of(&self, hash: &str) -> PathBuf {
        self.dir.join(hash)
    }

    /// Store content durably and return its hash. Existing intact blobs are reused.
    pub fn put(&self, content: &str) -> Result<String, CheckpointError> {
        let hash = content_hash(content);
        if self.get(&hash)?.is_some() {
            return Ok(hash);
        }
        write_atomic(&self.path_of(&hash), content.as_bytes())?;
        Ok(hash)
    }

    /// Content of a blob, if it exists and still hashes to its name.
    pub fn get(&self, hash: &str) -> Result<Option<String>, CheckpointError> {
        let path = self.path_of(hash);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CheckpointError::Io { path, source }),
        };
        let Ok(content) = String::from_utf8(bytes) else {
            warn!(path = %path.display(), "Blob is not valid UTF-8");
            return Ok(None);
        };
        if content_hash(&content) != hash {
            warn!(path = %path.display(), "Blob content does not match its hash");
            return Ok(None);
        }
        Ok(Some(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_put_get() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path().join("blobs"));
        let hash = store.put("export const a = 1;\n").unwrap();
        assert_eq!(hash, content_hash("export const a = 1;\n"));
        assert_eq!(store.get(&hash).unwrap().as_deref(), Some("export const a = 1;\n"));
        assert_eq!(store.put("export const a = 1;\n").unwrap(), hash);
    }

    #[test]
    fn test_missing_and_corrupt_blobs_read_as_none() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path().join("blobs"));
        assert!(store.get(&content_hash("nothing")).unwrap().is_none());

        let hash = store.put("original").unwrap();
        fs::write(store.path_of(&hash), "tampered").unwrap();
        assert!(store.get(&hash).unwrap().is_none());

        // A corrupt blob is rewritten on the next put
        store.put("original").unwrap();
        assert!(store.get(&hash).unwrap().is_some());
    }
}

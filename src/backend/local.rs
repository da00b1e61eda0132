//! Local-directory backend
//!
//! One file per shard under `<root>/stripes/<stripe_id:08>/<shard_id:02>.chunk`.
//! Writes go through a temp file plus rename so a crash leaves the shard
//! either absent or complete.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::backend::{shard_object_key, BlobBackend};
use crate::error::{Error, Result};

/// Blob backend rooted at a local directory.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn shard_path(&self, stripe_id: u64, shard_id: u32) -> PathBuf {
        self.root.join(shard_object_key(stripe_id, shard_id))
    }

    fn classify(err: std::io::Error) -> Error {
        match err.kind() {
            ErrorKind::NotFound => Error::NotFound,
            ErrorKind::PermissionDenied => Error::PermanentIo(err.to_string()),
            _ => Error::TransientIo(err.to_string()),
        }
    }
}

impl BlobBackend for LocalBackend {
    fn read(&self, stripe_id: u64, shard_id: u32) -> Result<Vec<u8>> {
        fs::read(self.shard_path(stripe_id, shard_id)).map_err(Self::classify)
    }

    fn write(&self, stripe_id: u64, shard_id: u32, data: &[u8]) -> Result<()> {
        let path = self.shard_path(stripe_id, shard_id);
        let dir = path
            .parent()
            .ok_or_else(|| Error::PermanentIo(format!("no parent for {}", path.display())))?;
        fs::create_dir_all(dir).map_err(Self::classify)?;

        let tmp = path.with_extension("chunk.tmp");
        fs::write(&tmp, data).map_err(Self::classify)?;
        fs::rename(&tmp, &path).map_err(Self::classify)?;

        debug!(stripe_id, shard_id, len = data.len(), "wrote local shard");
        Ok(())
    }

    fn delete(&self, stripe_id: u64, shard_id: u32) -> Result<()> {
        match fs::remove_file(self.shard_path(stripe_id, shard_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::classify(e)),
        }
    }

    fn describe(&self) -> String {
        format!("local:{}", self.root.display())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path());

        backend.write(100, 2, b"shard bytes").unwrap();
        assert_eq!(backend.read(100, 2).unwrap(), b"shard bytes");
    }

    #[test]
    fn test_read_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path());

        match backend.read(1, 0) {
            Err(Error::NotFound) => {}
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_overwrite_replaces_bytes() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path());

        backend.write(7, 0, b"old").unwrap();
        backend.write(7, 0, b"new contents").unwrap();
        assert_eq!(backend.read(7, 0).unwrap(), b"new contents");
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path());

        backend.write(5, 1, b"x").unwrap();
        backend.delete(5, 1).unwrap();
        // Second delete of an absent shard is success.
        backend.delete(5, 1).unwrap();
        assert!(matches!(backend.read(5, 1), Err(Error::NotFound)));
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path());
        backend.write(42, 3, &[0u8; 4096]).unwrap();

        let stripe_dir = dir.path().join("stripes/00000042");
        let names: Vec<String> = fs::read_dir(stripe_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["03.chunk".to_string()]);
    }
}

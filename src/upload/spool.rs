//! On-disk upload spool
//!
//! One flat directory of shard records named
//! `stripe_<stripe_id:020>_chunk_<shard_id:02>.dat`, bodies holding raw
//! shard bytes. Presence means work-to-do, absence means done or never
//! existed, and the whole state is discoverable by a directory scan alone.
//! Records appear via write-then-rename so a crash never leaves a partial
//! file under a final name.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Durable staging directory for shards awaiting upload.
pub struct Spool {
    dir: PathBuf,
}

impl Spool {
    /// Open (creating if needed) the spool directory.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_name(stripe_id: u64, shard_id: u32) -> String {
        format!("stripe_{:020}_chunk_{:02}.dat", stripe_id, shard_id)
    }

    pub fn record_path(&self, stripe_id: u64, shard_id: u32) -> PathBuf {
        self.dir.join(Self::record_name(stripe_id, shard_id))
    }

    /// Persist one shard record atomically.
    pub fn write(&self, stripe_id: u64, shard_id: u32, data: &[u8]) -> Result<()> {
        let path = self.record_path(stripe_id, shard_id);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Load one shard record; `None` when the record is absent.
    pub fn read(&self, stripe_id: u64, shard_id: u32) -> Result<Option<Vec<u8>>> {
        match fs::read(self.record_path(stripe_id, shard_id)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove one shard record; removing an absent record is success.
    pub fn remove(&self, stripe_id: u64, shard_id: u32) -> Result<()> {
        match fs::remove_file(self.record_path(stripe_id, shard_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Enumerate every parseable shard record, sorted by stripe then shard
    /// so restart recovery enqueues in a deterministic order. Files that do
    /// not match the record naming (including in-flight `.tmp` files) are
    /// ignored.
    pub fn scan(&self) -> Result<Vec<(u64, u32)>> {
        let mut records = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if let Some(ids) = Self::parse_record_name(&name.to_string_lossy()) {
                records.push(ids);
            }
        }

        records.sort_unstable();
        Ok(records)
    }

    fn parse_record_name(name: &str) -> Option<(u64, u32)> {
        let rest = name.strip_prefix("stripe_")?.strip_suffix(".dat")?;
        let (stripe, shard) = rest.split_once("_chunk_")?;
        if stripe.len() != 20 || shard.len() != 2 {
            return None;
        }
        Some((stripe.parse().ok()?, shard.parse().ok()?))
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
    fn test_record_naming() {
        assert_eq!(
            Spool::record_name(100, 2),
            "stripe_00000000000000000100_chunk_02.dat"
        );
    }

    #[test]
    fn test_write_read_remove() {
        let dir = TempDir::new().unwrap();
        let spool = Spool::new(dir.path()).unwrap();

        spool.write(100, 0, b"shard").unwrap();
        assert_eq!(spool.read(100, 0).unwrap().unwrap(), b"shard");

        spool.remove(100, 0).unwrap();
        assert!(spool.read(100, 0).unwrap().is_none());
        // Removing twice is fine.
        spool.remove(100, 0).unwrap();
    }

    #[test]
    fn test_scan_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        let spool = Spool::new(dir.path()).unwrap();

        spool.write(200, 1, b"a").unwrap();
        spool.write(100, 2, b"b").unwrap();
        spool.write(100, 0, b"c").unwrap();
        std::fs::write(dir.path().join("garbage.txt"), b"x").unwrap();
        std::fs::write(
            dir.path().join("stripe_00000000000000000100_chunk_01.tmp"),
            b"partial",
        )
        .unwrap();

        assert_eq!(spool.scan().unwrap(), vec![(100, 0), (100, 2), (200, 1)]);
    }

    #[test]
    fn test_parse_rejects_malformed_names() {
        assert!(Spool::parse_record_name("stripe_1_chunk_01.dat").is_none());
        assert!(Spool::parse_record_name("stripe_00000000000000000100_chunk_1.dat").is_none());
        assert!(Spool::parse_record_name("stripe_00000000000000000100.dat").is_none());
        assert!(Spool::parse_record_name("00000000000000000100_chunk_01.dat").is_none());
        assert_eq!(
            Spool::parse_record_name("stripe_00000000000000000100_chunk_01.dat"),
            Some((100, 1))
        );
    }
}

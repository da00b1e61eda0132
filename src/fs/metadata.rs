//! Metadata store
//!
//! In-memory file table (`path → {size, stripes}`), explicit empty-directory
//! set, and the path trie for name resolution, all behind one rwlock.
//!
//! The whole namespace persists as a self-stored file at [`META_PATH`],
//! serialized to a flat little-endian binary and written through the normal
//! file path into the reserved stripe range `[0, 100)`.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::fs::file_layer::{FileManager, STRIPE_SIZE};
use crate::fs::path_trie::PathTrie;
use crate::store::{StripeStore, RESERVED_STRIPES};

/// Reserved self-storage path; invisible through the adaptor surface.
pub const META_PATH: &str = "/.__cloudraidfs_meta";

/// Upper bound read during `load`; the serialized namespace must fit here.
const MAX_META_SIZE: u64 = 16 * 1024 * 1024;

/// Per-file metadata: logical size plus the ordered stripe list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileMeta {
    pub size: u64,
    pub stripes: Vec<u64>,
}

#[derive(Default)]
struct Tables {
    files: HashMap<String, FileMeta>,
    dirs: HashSet<String>,
    trie: PathTrie,
}

impl Tables {
    fn is_dir(&self, path: &str) -> bool {
        path == "/" || self.dirs.contains(path) || self.trie.is_dir(path)
    }
}

/// File table + directory index with self-stored persistence.
pub struct MetadataStore {
    inner: RwLock<Tables>,
}

impl Default for MetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Tables::default()),
        }
    }

    // =========================================================================
    // File Table
    // =========================================================================

    pub fn is_file(&self, path: &str) -> bool {
        self.inner.read().files.contains_key(path)
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.inner.read().is_dir(path)
    }

    pub fn file_size(&self, path: &str) -> Option<u64> {
        self.inner.read().files.get(path).map(|m| m.size)
    }

    pub fn file_stripes(&self, path: &str) -> Vec<u64> {
        self.inner
            .read()
            .files
            .get(path)
            .map(|m| m.stripes.clone())
            .unwrap_or_default()
    }

    /// Stripe ID at `index`, if the file extends that far.
    pub fn stripe_at(&self, path: &str, index: usize) -> Option<u64> {
        self.inner
            .read()
            .files
            .get(path)
            .and_then(|m| m.stripes.get(index).copied())
    }

    /// Register a new empty file. Returns false when the path already holds
    /// a file.
    pub fn create_file(&self, path: &str) -> bool {
        let mut tables = self.inner.write();
        if tables.files.contains_key(path) {
            return false;
        }
        tables.files.insert(path.to_string(), FileMeta::default());
        tables.trie.insert_file(path);
        true
    }

    /// Drop a file, handing back its metadata so the caller can free the
    /// stripes.
    pub fn remove_file(&self, path: &str) -> Option<FileMeta> {
        let mut tables = self.inner.write();
        let meta = tables.files.remove(path)?;
        tables.trie.remove(path);
        Some(meta)
    }

    /// Set the exact size of a file, creating the entry if needed.
    pub fn set_size(&self, path: &str, size: u64) {
        let mut tables = self.inner.write();
        if !tables.files.contains_key(path) {
            tables.trie.insert_file(path);
        }
        tables.files.entry(path.to_string()).or_default().size = size;
    }

    /// Grow the size after a write: `size = max(size, end)`.
    pub fn grow_size(&self, path: &str, end: u64) {
        let mut tables = self.inner.write();
        if !tables.files.contains_key(path) {
            tables.trie.insert_file(path);
        }
        let meta = tables.files.entry(path.to_string()).or_default();
        meta.size = meta.size.max(end);
    }

    /// Stripe ID covering `stripe_index`, extending the stripe vector
    /// densely with freshly allocated IDs when the file is shorter.
    pub fn ensure_stripe<F>(&self, path: &str, stripe_index: usize, mut allocate: F) -> u64
    where
        F: FnMut() -> u64,
    {
        let mut tables = self.inner.write();
        if !tables.files.contains_key(path) {
            tables.trie.insert_file(path);
        }
        let meta = tables.files.entry(path.to_string()).or_default();
        while meta.stripes.len() <= stripe_index {
            meta.stripes.push(allocate());
        }
        meta.stripes[stripe_index]
    }

    // =========================================================================
    // Directory Index
    // =========================================================================

    /// Register an explicit directory. Returns false when something already
    /// lives at the path.
    pub fn create_dir(&self, path: &str) -> bool {
        let mut tables = self.inner.write();
        if tables.files.contains_key(path) || tables.is_dir(path) {
            return false;
        }
        tables.dirs.insert(path.to_string());
        tables.trie.insert_dir(path);
        true
    }

    /// Remove a directory; must be empty.
    pub fn remove_dir(&self, path: &str) -> Result<()> {
        let mut tables = self.inner.write();
        if !tables.is_dir(path) {
            return Err(Error::NotFound);
        }
        if tables.trie.child_count(path) > 0 {
            return Err(Error::DirectoryNotEmpty(path.to_string()));
        }
        tables.dirs.remove(path);
        tables.trie.remove(path);
        Ok(())
    }

    /// Children of a directory, unordered. `None` when the path does not
    /// resolve to a directory.
    pub fn list_dir(&self, path: &str) -> Option<Vec<String>> {
        let tables = self.inner.read();
        if !tables.is_dir(path) {
            return None;
        }
        tables.trie.list(path).or_else(|| Some(Vec::new()))
    }

    // =========================================================================
    // Rename
    // =========================================================================

    /// Atomically move `from` to `to` within the metadata, carrying every
    /// descendant along for directories. The destination must be absent, or
    /// an empty directory when the source is a directory. Returns the old
    /// paths of all moved files so the caller can invalidate caches.
    pub fn rename(&self, from: &str, to: &str) -> Result<Vec<String>> {
        if from == "/" || to == "/" {
            return Err(Error::InvalidArgument("cannot rename the root".to_string()));
        }

        let mut tables = self.inner.write();

        let from_is_file = tables.files.contains_key(from);
        let from_is_dir = !from_is_file && tables.is_dir(from);
        if !from_is_file && !from_is_dir {
            return Err(Error::NotFound);
        }

        if tables.files.contains_key(to) {
            return Err(Error::AlreadyExists(to.to_string()));
        }
        if tables.is_dir(to) {
            if from_is_file {
                return Err(Error::AlreadyExists(to.to_string()));
            }
            if tables.trie.child_count(to) > 0 {
                return Err(Error::DirectoryNotEmpty(to.to_string()));
            }
        }

        if from_is_file {
            let meta = tables.files.remove(from).ok_or(Error::NotFound)?;
            tables.trie.remove(from);
            tables.files.insert(to.to_string(), meta);
            tables.trie.insert_file(to);
            return Ok(vec![from.to_string()]);
        }

        // Directory: refuse a move into the subtree being moved.
        let prefix = format!("{}/", from);
        if to == from || to.starts_with(&prefix) {
            return Err(Error::InvalidArgument(format!(
                "cannot move {} into itself",
                from
            )));
        }

        let moved_files: Vec<String> = tables
            .files
            .keys()
            .filter(|p| p.starts_with(&prefix))
            .cloned()
            .collect();

        for old in &moved_files {
            let new = format!("{}{}", to, &old[from.len()..]);
            if let Some(meta) = tables.files.remove(old) {
                tables.trie.remove(old);
                tables.files.insert(new.clone(), meta);
                tables.trie.insert_file(&new);
            }
        }

        let moved_dirs: Vec<String> = tables
            .dirs
            .iter()
            .filter(|p| p.as_str() == from || p.starts_with(&prefix))
            .cloned()
            .collect();
        for old in moved_dirs {
            let new = format!("{}{}", to, &old[from.len()..]);
            tables.dirs.remove(&old);
            tables.trie.remove(&old);
            tables.dirs.insert(new.clone());
            tables.trie.insert_dir(&new);
        }

        tables.trie.remove(from);

        Ok(moved_files)
    }

    // =========================================================================
    // Serialization
    // =========================================================================

    /// Flat little-endian snapshot of all non-meta entries, deterministic
    /// byte-for-byte (entries sorted by path).
    fn serialize(&self) -> Vec<u8> {
        let tables = self.inner.read();
        let mut out = Vec::new();

        let mut paths: Vec<&String> = tables
            .files
            .keys()
            .filter(|p| p.as_str() != META_PATH)
            .collect();
        paths.sort();

        out.extend_from_slice(&(paths.len() as u32).to_le_bytes());
        for path in paths {
            let meta = &tables.files[path];
            out.extend_from_slice(&(path.len() as u32).to_le_bytes());
            out.extend_from_slice(path.as_bytes());
            out.extend_from_slice(&meta.size.to_le_bytes());
            out.extend_from_slice(&(meta.stripes.len() as u32).to_le_bytes());
            for stripe in &meta.stripes {
                out.extend_from_slice(&stripe.to_le_bytes());
            }
        }

        let mut dirs: Vec<&String> = tables.dirs.iter().collect();
        dirs.sort();

        out.extend_from_slice(&(dirs.len() as u32).to_le_bytes());
        for dir in dirs {
            out.extend_from_slice(&(dir.len() as u32).to_le_bytes());
            out.extend_from_slice(dir.as_bytes());
        }

        out
    }

    fn deserialize(data: &[u8]) -> Result<(HashMap<String, FileMeta>, HashSet<String>)> {
        let mut cursor = Cursor { data, pos: 0 };

        let mut files = HashMap::new();
        let file_count = cursor.read_u32()?;
        for _ in 0..file_count {
            let path = cursor.read_string()?;
            let size = cursor.read_u64()?;
            let stripe_count = cursor.read_u32()?;
            let mut stripes = Vec::with_capacity(stripe_count as usize);
            for _ in 0..stripe_count {
                stripes.push(cursor.read_u64()?);
            }
            files.insert(path, FileMeta { size, stripes });
        }

        let mut dirs = HashSet::new();
        let dir_count = cursor.read_u32()?;
        for _ in 0..dir_count {
            dirs.insert(cursor.read_string()?);
        }

        Ok((files, dirs))
    }

    // =========================================================================
    // Self-Stored Persistence
    // =========================================================================

    /// Stripe IDs backing a meta file of `len` bytes.
    fn reserved_stripes_for(len: u64) -> Vec<u64> {
        let count = len.div_ceil(STRIPE_SIZE).max(1);
        (0..count).collect()
    }

    /// Register the meta file so reads of it flow through the normal path.
    fn register_meta_file(tables: &mut Tables, len: u64) {
        tables.files.insert(
            META_PATH.to_string(),
            FileMeta {
                size: len,
                stripes: Self::reserved_stripes_for(len),
            },
        );
        tables.trie.insert_file(META_PATH);
    }

    /// Load the namespace from its self-stored file.
    ///
    /// The meta file is pre-registered at its reserved stripes so the read
    /// uses the normal file path (stripe cache, spool fallback, repair).
    /// Unreadable or unparseable metadata degrades to an empty namespace.
    /// Fresh tables are built beside the live ones and swapped in whole,
    /// and the user-data allocator is lifted above every stripe seen.
    pub fn load(&self, fm: &FileManager, store: &StripeStore) -> Result<()> {
        {
            let mut tables = self.inner.write();
            Self::register_meta_file(&mut tables, MAX_META_SIZE);
        }

        let data = match fm.read(META_PATH, 0, MAX_META_SIZE as usize) {
            Ok(data) => data,
            Err(e) => {
                info!(error = %e, "no readable metadata, starting empty");
                return Ok(());
            }
        };

        let (files, dirs) = match Self::deserialize(&data) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "metadata unparseable, starting empty");
                return Ok(());
            }
        };

        let mut fresh = Tables::default();
        let mut highest = 0u64;
        for (path, meta) in files {
            for &stripe in &meta.stripes {
                highest = highest.max(stripe);
            }
            fresh.trie.insert_file(&path);
            fresh.files.insert(path, meta);
        }
        for dir in dirs {
            fresh.trie.insert_dir(&dir);
            fresh.dirs.insert(dir);
        }
        Self::register_meta_file(&mut fresh, MAX_META_SIZE);

        let file_count = fresh.files.len() - 1;
        *self.inner.write() = fresh;
        store.reset_allocator(highest);

        info!(files = file_count, "metadata loaded");
        Ok(())
    }

    /// Serialize the namespace, reassign the reserved stripes to match its
    /// new length, and write it back through the normal file path.
    pub fn save(&self, fm: &FileManager) -> Result<()> {
        let bytes = self.serialize();

        let stripes_needed = (bytes.len() as u64).div_ceil(STRIPE_SIZE).max(1);
        if stripes_needed > RESERVED_STRIPES {
            return Err(Error::Metadata(format!(
                "serialized metadata needs {} stripes, only {} reserved",
                stripes_needed, RESERVED_STRIPES
            )));
        }

        {
            let mut tables = self.inner.write();
            Self::register_meta_file(&mut tables, bytes.len() as u64);
        }

        fm.write(META_PATH, 0, &bytes)?;
        info!(bytes = bytes.len(), "metadata saved");
        Ok(())
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn take(&mut self, n: usize) -> Result<&[u8]> {
        if self.pos + n > self.data.len() {
            return Err(Error::Metadata("truncated metadata".to_string()));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?.to_vec();
        String::from_utf8(bytes).map_err(|_| Error::Metadata("non-UTF-8 path".to_string()))
    }
}

// =============================================================================
// Tests
// =============================================================================

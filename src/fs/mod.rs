//! Filesystem Surface
//!
//! The POSIX-shaped contract a mount adaptor drives, assembled from the
//! layers below:
//!
//! - **File layer** (`file_layer.rs`): stripe-aligned read/write/truncate.
//! - **Metadata store** (`metadata.rs`): file table, directory set, path
//!   trie, self-stored persistence.
//! - **Path trie** (`path_trie.rs`): namespace index for `readdir`.
//!
//! Paths are absolute, `/`-separated and pre-canonicalized by the caller;
//! `..` segments are rejected. The reserved self-storage path is invisible:
//! lookups miss, listings omit it, mutations are denied.

pub mod file_layer;
pub mod metadata;
pub mod path_trie;

use std::sync::Arc;

use tracing::{info, warn};

use crate::backend;
use crate::cache::{FileCache, StripeCache};
use crate::config::Config;
use crate::ec::RsCodec;
use crate::error::{Error, Result};
use crate::store::StripeStore;
use crate::upload::AsyncUploader;

pub use file_layer::{FileManager, STRIPE_SIZE};
pub use metadata::{FileMeta, MetadataStore, META_PATH};
pub use path_trie::PathTrie;

/// Result of a namespace lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    Missing,
    File { size: u64 },
    Directory,
}

/// The assembled filesystem: every adaptor-facing operation lives here.
pub struct CloudRaidFs {
    fm: Arc<FileManager>,
    meta: Arc<MetadataStore>,
    store: Arc<StripeStore>,
    stripe_cache: Option<Arc<StripeCache>>,
    file_cache: Option<Arc<FileCache>>,
    uploader: Option<Arc<AsyncUploader>>,
}

impl CloudRaidFs {
    // =========================================================================
    // Assembly
    // =========================================================================

    /// Build the full stack from a config: codec, backends, stripe store,
    /// caches, uploader, file layer. Performs spool recovery, starts the
    /// upload workers and loads the persisted metadata.
    pub fn bootstrap(config: &Config) -> Result<Arc<Self>> {
        let codec = Arc::new(RsCodec::new(config.k, config.m)?);

        let mut backends = Vec::with_capacity(config.backends.len());
        for entry in &config.backends {
            let handle = backend::from_config(entry)?;
            info!(name = entry.name(), backend = %handle.describe(), "backend ready");
            backends.push(handle);
        }

        let store = Arc::new(StripeStore::new(backends, Arc::clone(&codec))?);

        let stripe_cache = config
            .chunk_cache
            .enabled
            .then(|| Arc::new(StripeCache::new(config.chunk_cache.to_cache_config())));
        let file_cache = config
            .cache
            .enabled
            .then(|| Arc::new(FileCache::new(config.cache.to_cache_config())));

        let uploader = if config.async_upload.enabled {
            let uploader = Arc::new(AsyncUploader::new(
                Arc::clone(&store),
                Arc::clone(&codec),
                config.async_upload.to_upload_config(),
            )?);
            // Recovery precedes the workers so the enqueue order is
            // deterministic.
            uploader.recover()?;
            uploader.start();
            Some(uploader)
        } else {
            None
        };

        let meta = Arc::new(MetadataStore::new());
        let fm = Arc::new(FileManager::new(
            Arc::clone(&store),
            Arc::clone(&meta),
            file_cache.clone(),
            stripe_cache.clone(),
            uploader.clone(),
        ));

        meta.load(&fm, &store)?;

        Ok(Arc::new(Self {
            fm,
            meta,
            store,
            stripe_cache,
            file_cache,
            uploader,
        }))
    }

    /// Assemble directly from parts; used by tests and embedders.
    pub fn assemble(
        fm: Arc<FileManager>,
        meta: Arc<MetadataStore>,
        store: Arc<StripeStore>,
        stripe_cache: Option<Arc<StripeCache>>,
        file_cache: Option<Arc<FileCache>>,
        uploader: Option<Arc<AsyncUploader>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            fm,
            meta,
            store,
            stripe_cache,
            file_cache,
            uploader,
        })
    }

    // =========================================================================
    // Namespace Operations
    // =========================================================================

    pub fn lookup(&self, path: &str) -> Result<LookupResult> {
        let path = validate_path(path)?;
        if path == META_PATH {
            return Ok(LookupResult::Missing);
        }

        if let Some(size) = self.meta.file_size(path) {
            Ok(LookupResult::File { size })
        } else if self.meta.is_dir(path) {
            Ok(LookupResult::Directory)
        } else {
            Ok(LookupResult::Missing)
        }
    }

    /// Children of a directory, order unspecified. The reserved meta file
    /// never appears.
    pub fn list(&self, path: &str) -> Result<Vec<String>> {
        let path = validate_path(path)?;
        let mut names = self.meta.list_dir(path).ok_or(Error::NotFound)?;

        if path == "/" {
            let meta_name = &META_PATH[1..];
            names.retain(|n| n != meta_name);
        }
        Ok(names)
    }

    pub fn create_file(&self, path: &str) -> Result<()> {
        let path = self.validate_mutable(path)?;
        if self.meta.is_file(path) || self.meta.is_dir(path) {
            return Err(Error::AlreadyExists(path.to_string()));
        }
        self.meta.create_file(path);
        Ok(())
    }

    pub fn create_dir(&self, path: &str) -> Result<()> {
        let path = self.validate_mutable(path)?;
        if self.meta.is_file(path) || self.meta.is_dir(path) {
            return Err(Error::AlreadyExists(path.to_string()));
        }
        self.meta.create_dir(path);
        Ok(())
    }

    /// Remove a file and free its stripes. Shard deletion is best-effort;
    /// failures are logged and the namespace entry is gone regardless.
    pub fn unlink(&self, path: &str) -> Result<()> {
        let path = self.validate_mutable(path)?;
        if self.meta.is_dir(path) {
            return Err(Error::IsADirectory(path.to_string()));
        }
        let removed = self.meta.remove_file(path).ok_or(Error::NotFound)?;

        if let Some(cache) = &self.file_cache {
            cache.invalidate(path);
        }
        for stripe_id in removed.stripes {
            if let Some(cache) = &self.stripe_cache {
                cache.invalidate(stripe_id);
            }
            if let Err(e) = self.store.delete(stripe_id) {
                warn!(stripe_id, error = %e, "freeing stripe failed");
            }
        }
        Ok(())
    }

    pub fn rmdir(&self, path: &str) -> Result<()> {
        let path = self.validate_mutable(path)?;
        if self.meta.is_file(path) {
            return Err(Error::NotADirectory(path.to_string()));
        }
        self.meta.remove_dir(path)
    }

    /// Rename a file or directory tree, atomic within the metadata.
    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        let from = self.validate_mutable(from)?;
        let to = self.validate_mutable(to)?;

        let moved = self.meta.rename(from, to)?;
        if let Some(cache) = &self.file_cache {
            for old in &moved {
                cache.invalidate(old);
            }
        }
        Ok(())
    }

    // =========================================================================
    // Data Operations
    // =========================================================================

    pub fn read(&self, path: &str, offset: u64, length: usize) -> Result<Vec<u8>> {
        let path = validate_path(path)?;
        if path == META_PATH {
            return Err(Error::NotFound);
        }
        if self.meta.is_dir(path) {
            return Err(Error::IsADirectory(path.to_string()));
        }
        if !self.meta.is_file(path) {
            return Err(Error::NotFound);
        }
        self.fm.read(path, offset, length)
    }

    /// Write bytes at an offset, creating the file entry if absent.
    pub fn write(&self, path: &str, offset: u64, data: &[u8]) -> Result<()> {
        let path = self.validate_mutable(path)?;
        if self.meta.is_dir(path) {
            return Err(Error::IsADirectory(path.to_string()));
        }
        self.fm.write(path, offset, data)
    }

    pub fn truncate(&self, path: &str, size: u64) -> Result<()> {
        let path = self.validate_mutable(path)?;
        if self.meta.is_dir(path) {
            return Err(Error::IsADirectory(path.to_string()));
        }
        if !self.meta.is_file(path) {
            return Err(Error::NotFound);
        }
        self.fm.truncate(path, size);
        Ok(())
    }

    /// Drain the upload spool, persist the metadata, then drain the stripes
    /// the metadata write itself produced.
    pub fn sync(&self) -> Result<()> {
        self.fm.flush();
        self.meta.save(&self.fm)?;
        self.fm.flush();
        Ok(())
    }

    /// Sync, then stop the upload workers.
    pub fn shutdown(&self) -> Result<()> {
        let result = self.sync();
        if let Some(uploader) = &self.uploader {
            uploader.stop();
        }
        result
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn validate_mutable<'a>(&self, path: &'a str) -> Result<&'a str> {
        let path = validate_path(path)?;
        if path == META_PATH {
            return Err(Error::AccessDenied(path.to_string()));
        }
        Ok(path)
    }
}

/// Paths must be absolute, `/`-separated, pre-canonicalized: no `..`
/// resolution happens here, and a trailing slash is only valid on the root.
fn validate_path(path: &str) -> Result<&str> {
    if !path.starts_with('/') {
        return Err(Error::InvalidArgument(format!(
            "path must be absolute: {}",
            path
        )));
    }
    if path.len() > 1 && path.ends_with('/') {
        return Err(Error::InvalidArgument(format!(
            "trailing slash: {}",
            path
        )));
    }
    if path.split('/').any(|seg| seg == "..") {
        return Err(Error::InvalidArgument(format!(
            "path must be canonical: {}",
            path
        )));
    }
    Ok(path)
}

// =============================================================================
// Tests
// =============================================================================

//! File layer
//!
//! Translates `(path, offset, length)` requests into stripe-aligned I/O:
//! whole-file reads consult the file cache, per-stripe reads go through the
//! stripe cache, then the upload spool for still-pending stripes, then the
//! stripe store; absent stripes read as zeros. Writes are read-modify-write
//! per stripe and take the asynchronous spool path by default, falling back
//! to the synchronous path when the upload queue is saturated.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::cache::{FileCache, StripeCache};
use crate::error::{Error, Result};
use crate::fs::metadata::MetadataStore;
use crate::store::StripeStore;
use crate::upload::AsyncUploader;

/// Logical stripe size: the unit of erasure coding.
pub const STRIPE_SIZE: u64 = 4 * 1024 * 1024;

/// Stripe-aligned read/write engine over the metadata store and stripe
/// store, with both caches and the async uploader layered in.
pub struct FileManager {
    store: Arc<StripeStore>,
    meta: Arc<MetadataStore>,
    file_cache: Option<Arc<FileCache>>,
    stripe_cache: Option<Arc<StripeCache>>,
    uploader: Option<Arc<AsyncUploader>>,
}

impl FileManager {
    pub fn new(
        store: Arc<StripeStore>,
        meta: Arc<MetadataStore>,
        file_cache: Option<Arc<FileCache>>,
        stripe_cache: Option<Arc<StripeCache>>,
        uploader: Option<Arc<AsyncUploader>>,
    ) -> Self {
        Self {
            store,
            meta,
            file_cache,
            stripe_cache,
            uploader,
        }
    }

    pub fn size(&self, path: &str) -> u64 {
        self.meta.file_size(path).unwrap_or(0)
    }

    // =========================================================================
    // Read Path
    // =========================================================================

    /// Read `[offset, offset+length)` clipped to the file size; reads past
    /// EOF return empty.
    pub fn read(&self, path: &str, offset: u64, length: usize) -> Result<Vec<u8>> {
        let file_size = self.size(path);

        if offset >= file_size {
            return Ok(Vec::new());
        }
        let length = length.min((file_size - offset) as usize);

        // Whole-file fast path through the file cache.
        let whole_file = offset == 0 && length as u64 == file_size;
        if whole_file {
            if let Some(cache) = self.cache_for_file(file_size) {
                if let Some(data) = cache.get(path) {
                    return Ok(data.to_vec());
                }
                let data = self.read_full_file(path, file_size)?;
                cache.put(path, Bytes::from(data.clone()));
                return Ok(data);
            }
        }

        let mut out = Vec::with_capacity(length);
        let mut pos = offset;
        let mut remaining = length;

        while remaining > 0 {
            let stripe_index = (pos / STRIPE_SIZE) as usize;
            let stripe_offset = (pos % STRIPE_SIZE) as usize;
            let to_read = remaining.min(STRIPE_SIZE as usize - stripe_offset);

            match self.meta.stripe_at(path, stripe_index) {
                Some(stripe_id) => {
                    let stripe = self.read_stripe(stripe_id)?;
                    out.extend_from_slice(&stripe[stripe_offset..stripe_offset + to_read]);
                }
                // A hole: no stripe allocated, reads as zeros.
                None => out.resize(out.len() + to_read, 0),
            }

            pos += to_read as u64;
            remaining -= to_read;
        }

        Ok(out)
    }

    fn read_full_file(&self, path: &str, file_size: u64) -> Result<Vec<u8>> {
        let stripes = self.meta.file_stripes(path);
        let mut out = Vec::with_capacity(file_size as usize);
        let mut remaining = file_size;

        for stripe_id in stripes {
            if remaining == 0 {
                break;
            }
            let stripe = self.read_stripe(stripe_id)?;
            let take = remaining.min(STRIPE_SIZE) as usize;
            out.extend_from_slice(&stripe[..take]);
            remaining -= take as u64;
        }

        // Trailing holes in a sparse file read as zeros.
        out.resize(file_size as usize, 0);
        Ok(out)
    }

    /// Fetch one stripe, always `STRIPE_SIZE` bytes: stripe cache, then the
    /// spool for pending stripes, then the stripe store. A stripe absent on
    /// every backend reads as zeros; a damaged one surfaces its error.
    fn read_stripe(&self, stripe_id: u64) -> Result<Vec<u8>> {
        if let Some(cache) = &self.stripe_cache {
            if let Some(data) = cache.get(stripe_id) {
                return Ok(pad_stripe(data.to_vec()));
            }
        }

        if let Some(uploader) = &self.uploader {
            if uploader.is_pending(stripe_id) {
                match uploader.read_pending(stripe_id) {
                    Ok(data) => {
                        let data = pad_stripe(data);
                        if let Some(cache) = &self.stripe_cache {
                            cache.put(stripe_id, Bytes::from(data.clone()));
                        }
                        return Ok(data);
                    }
                    // Spool records may already be partially uploaded and
                    // deleted; the backends are authoritative then.
                    Err(e) => debug!(stripe_id, error = %e, "spool read fell through"),
                }
            }
        }

        match self.store.read(stripe_id) {
            Ok(data) => {
                let data = pad_stripe(data);
                if let Some(cache) = &self.stripe_cache {
                    cache.put(stripe_id, Bytes::from(data.clone()));
                }
                Ok(data)
            }
            Err(Error::NotFound) => Ok(vec![0u8; STRIPE_SIZE as usize]),
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Write through the default (asynchronous) path.
    pub fn write(&self, path: &str, offset: u64, data: &[u8]) -> Result<()> {
        self.write_impl(path, offset, data, false)
    }

    /// Write synchronously: every stripe is durable on the backends when
    /// this returns.
    pub fn sync_write(&self, path: &str, offset: u64, data: &[u8]) -> Result<()> {
        self.write_impl(path, offset, data, true)
    }

    fn write_impl(&self, path: &str, offset: u64, data: &[u8], force_sync: bool) -> Result<()> {
        if let Some(cache) = &self.file_cache {
            cache.invalidate(path);
        }

        let mut pos = offset;
        let mut remaining = data;

        while !remaining.is_empty() {
            let stripe_index = (pos / STRIPE_SIZE) as usize;
            let stripe_offset = (pos % STRIPE_SIZE) as usize;
            let to_write = remaining.len().min(STRIPE_SIZE as usize - stripe_offset);

            let stripe_id = self
                .meta
                .ensure_stripe(path, stripe_index, || self.store.allocate_stripe_id());

            // Read-modify-write: overlay onto the prior contents (zeros for
            // a fresh stripe), padded back out to a full stripe.
            let mut stripe = self.read_stripe(stripe_id)?;
            stripe[stripe_offset..stripe_offset + to_write]
                .copy_from_slice(&remaining[..to_write]);

            self.write_stripe(stripe_id, stripe, force_sync)?;

            pos += to_write as u64;
            remaining = &remaining[to_write..];
        }

        self.meta.grow_size(path, offset + data.len() as u64);
        Ok(())
    }

    /// Push one full stripe down the write path, keeping the stripe cache
    /// coherent: invalidate before, repopulate after success.
    fn write_stripe(&self, stripe_id: u64, stripe: Vec<u8>, force_sync: bool) -> Result<()> {
        if let Some(cache) = &self.stripe_cache {
            cache.invalidate(stripe_id);
        }

        match (&self.uploader, force_sync) {
            (Some(uploader), false) => match uploader.async_write(stripe_id, &stripe) {
                Ok(()) => {}
                Err(Error::QueueFull) => {
                    warn!(stripe_id, "upload queue full, falling back to sync write");
                    self.store.write(stripe_id, &stripe)?;
                }
                Err(e) => return Err(e),
            },
            _ => self.store.write(stripe_id, &stripe)?,
        }

        if let Some(cache) = &self.stripe_cache {
            cache.put(stripe_id, Bytes::from(stripe));
        }
        Ok(())
    }

    // =========================================================================
    // Truncate / Flush
    // =========================================================================

    /// Set the file size without touching shards; truncated-away regions
    /// stop being readable because reads clip at the new size. Drops the
    /// file's cache entries.
    pub fn truncate(&self, path: &str, new_size: u64) {
        if let Some(cache) = &self.file_cache {
            cache.invalidate(path);
        }
        if let Some(cache) = &self.stripe_cache {
            for stripe_id in self.meta.file_stripes(path) {
                cache.invalidate(stripe_id);
            }
        }
        self.meta.set_size(path, new_size);
    }

    /// Wait until every spooled stripe is resolved.
    pub fn flush(&self) {
        if let Some(uploader) = &self.uploader {
            uploader.flush();
        }
    }

    fn cache_for_file(&self, file_size: u64) -> Option<&Arc<FileCache>> {
        self.file_cache
            .as_ref()
            .filter(|c| file_size <= c.max_file_size())
    }
}

/// Stripes are logically always `STRIPE_SIZE` bytes; codec output shorter
/// than that (written before the zero padding) is padded back out.
fn pad_stripe(mut data: Vec<u8>) -> Vec<u8> {
    if data.len() < STRIPE_SIZE as usize {
        data.resize(STRIPE_SIZE as usize, 0);
    }
    data
}

// =============================================================================
// Tests
// =============================================================================

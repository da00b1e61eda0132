//! Stripe Store
//!
//! Maps one logical stripe onto `k + m` shards spread across the backend
//! set. Backend position is identity: backend `i` always stores shard `i`,
//! and the mapping never changes for the life of the filesystem.
//!
//! Reads and writes fan out to all backends concurrently on scoped threads;
//! a read decodes as soon as the surviving shard set allows it and schedules
//! a detached repair for shards it observed missing. The store also owns the
//! user-data stripe-ID allocator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::backend::BlobBackend;
use crate::ec::RsCodec;
use crate::error::{Error, Result};

/// Stripe IDs below this value are reserved for the metadata file and are
/// never handed out by the user-data allocator.
pub const RESERVED_STRIPES: u64 = 100;

/// Erasure-coded dispatch layer over a fixed vector of blob backends.
pub struct StripeStore {
    backends: Vec<Arc<dyn BlobBackend>>,
    codec: Arc<RsCodec>,
    next_stripe_id: AtomicU64,
}

impl StripeStore {
    /// Create a store over `k + m` backends; backend count must match the
    /// codec geometry exactly.
    pub fn new(backends: Vec<Arc<dyn BlobBackend>>, codec: Arc<RsCodec>) -> Result<Self> {
        if backends.len() != codec.total_shards() {
            return Err(Error::InvalidArgument(format!(
                "backend count {} does not match k+m = {}",
                backends.len(),
                codec.total_shards()
            )));
        }

        Ok(Self {
            backends,
            codec,
            next_stripe_id: AtomicU64::new(RESERVED_STRIPES),
        })
    }

    /// Number of data shards (k).
    pub fn data_shards(&self) -> usize {
        self.codec.data_shards()
    }

    /// Number of shards per stripe (k + m).
    pub fn total_shards(&self) -> usize {
        self.codec.total_shards()
    }

    // =========================================================================
    // Stripe ID Allocation
    // =========================================================================

    /// Allocate the next user-data stripe ID.
    pub fn allocate_stripe_id(&self) -> u64 {
        self.next_stripe_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Raise the allocator above `highest`, keeping it clear of the reserved
    /// range. Called after metadata load; the allocator must always satisfy
    /// `next > max(100, any existing user stripe id)`.
    pub fn reset_allocator(&self, highest: u64) {
        let floor = RESERVED_STRIPES.max(highest.saturating_add(1));
        self.next_stripe_id.fetch_max(floor, Ordering::SeqCst);
    }

    // =========================================================================
    // Stripe I/O
    // =========================================================================

    /// Encode `data` and write all `k + m` shards concurrently.
    ///
    /// Succeeds only when every backend accepted its shard; the asynchronous
    /// uploader retries per shard, so a partial success here is reported as
    /// failure rather than silently tolerated.
    pub fn write(&self, stripe_id: u64, data: &[u8]) -> Result<()> {
        let shards = self.codec.encode(data)?;
        let results =
            self.fan_out("write", stripe_id, |i, backend| {
                backend.write(stripe_id, i as u32, &shards[i])
            });

        let mut first_err = None;
        for (i, result) in results.into_iter().enumerate() {
            if let Err(e) = result {
                warn!(stripe_id, shard = i, error = %e, "shard write failed");
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Write a single shard, used by the upload workers.
    pub fn write_shard(&self, stripe_id: u64, shard_id: u32, data: &[u8]) -> Result<()> {
        self.backends[shard_id as usize].write(stripe_id, shard_id, data)
    }

    /// Read a stripe, reconstructing from any `k` surviving shards.
    ///
    /// After a successful decode in which shards were observed missing
    /// (`NotFound` / `PermanentIo`), a detached repair task re-encodes the
    /// plaintext and writes back the absent shards only. Transient errors
    /// leave a shard indeterminate and never trigger repair.
    pub fn read(self: &Arc<Self>, stripe_id: u64) -> Result<Vec<u8>> {
        let results = self.fan_out("read", stripe_id, |i, backend| {
            backend.read(stripe_id, i as u32)
        });

        let total = self.total_shards();
        let mut shards: Vec<Option<Vec<u8>>> = Vec::with_capacity(total);
        let mut missing: Vec<usize> = Vec::new();
        let mut all_absent = true;

        for (i, result) in results.into_iter().enumerate() {
            match result {
                Ok(bytes) => {
                    all_absent = false;
                    shards.push(Some(bytes));
                }
                Err(e) => {
                    if e.is_missing_shard() {
                        missing.push(i);
                    } else {
                        all_absent = false;
                    }
                    debug!(stripe_id, shard = i, error = %e, "shard read failed");
                    shards.push(None);
                }
            }
        }

        let available = shards.iter().filter(|s| s.is_some()).count();
        if available == 0 && all_absent {
            return Err(Error::NotFound);
        }
        if available < self.data_shards() {
            return Err(Error::InsufficientShards {
                available,
                required: self.data_shards(),
            });
        }

        let data = self.codec.decode(&shards)?;

        if !missing.is_empty() {
            let store = Arc::clone(self);
            let plaintext = data.clone();
            thread::spawn(move || store.repair_missing(stripe_id, &plaintext, &missing));
        }

        Ok(data)
    }

    /// Delete all shards of a stripe. Backends report an absent shard as
    /// success, so deleting a partially-written stripe converges.
    pub fn delete(&self, stripe_id: u64) -> Result<()> {
        let results = self.fan_out("delete", stripe_id, |i, backend| {
            backend.delete(stripe_id, i as u32)
        });

        let mut first_err = None;
        for (i, result) in results.into_iter().enumerate() {
            if let Err(e) = result {
                warn!(stripe_id, shard = i, error = %e, "shard delete failed");
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Re-encode the decoded plaintext and write back the shards that were
    /// observed missing. Never overwrites surviving shards; failures are
    /// logged and not surfaced — the read that triggered the repair has
    /// already returned.
    fn repair_missing(&self, stripe_id: u64, data: &[u8], missing: &[usize]) {
        let shards = match self.codec.encode(data) {
            Ok(shards) => shards,
            Err(e) => {
                warn!(stripe_id, error = %e, "repair encode failed");
                return;
            }
        };

        thread::scope(|s| {
            for &i in missing {
                let backend = &self.backends[i];
                let shard = &shards[i];
                s.spawn(move || {
                    match backend.write(stripe_id, i as u32, shard) {
                        Ok(()) => info!(stripe_id, shard = i, "repaired missing shard"),
                        Err(e) => warn!(stripe_id, shard = i, error = %e, "shard repair failed"),
                    }
                });
            }
        });
    }

    /// Run `op` against every backend on its own scoped thread and collect
    /// the per-shard results in backend order. The wall clock of each
    /// backend call and of the whole fan-out lands in the log; the overall
    /// time is the slowest backend's, since all calls run in parallel.
    fn fan_out<T, F>(&self, op_name: &'static str, stripe_id: u64, op: F) -> Vec<Result<T>>
    where
        T: Send,
        F: Fn(usize, &Arc<dyn BlobBackend>) -> Result<T> + Sync,
    {
        let overall_start = Instant::now();

        let timed: Vec<(Result<T>, Duration)> = thread::scope(|s| {
            let handles: Vec<_> = self
                .backends
                .iter()
                .enumerate()
                .map(|(i, backend)| {
                    s.spawn({
                        let op = &op;
                        move || {
                            let start = Instant::now();
                            let result = op(i, backend);
                            (result, start.elapsed())
                        }
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|_| {
                        (
                            Err(Error::TransientIo("backend worker panicked".to_string())),
                            Duration::ZERO,
                        )
                    })
                })
                .collect()
        });

        let mut results = Vec::with_capacity(timed.len());
        for (i, (result, elapsed)) in timed.into_iter().enumerate() {
            debug!(
                stripe_id,
                shard = i,
                op = op_name,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                ok = result.is_ok(),
                "backend call finished"
            );
            results.push(result);
        }

        debug!(
            stripe_id,
            op = op_name,
            elapsed_ms = overall_start.elapsed().as_secs_f64() * 1000.0,
            "fan-out complete"
        );

        results
    }
}

// =============================================================================
// Tests
// =============================================================================

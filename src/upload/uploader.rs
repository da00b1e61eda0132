//! Asynchronous upload engine
//!
//! The default write path: encode inline, persist every shard to the spool,
//! mark the stripe pending with a count of `k + m`, enqueue one task per
//! shard and return. A pool of worker threads drains the queue, pushing each
//! shard through the stripe store to its backend, retrying transient
//! failures with linear backoff and leaving the spool record behind on
//! permanent failure so an operator can recover it.
//!
//! Restart recovery is a directory scan: every surviving spool record turns
//! back into a queued task before the workers start.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::ec::RsCodec;
use crate::error::{Error, Result};
use crate::store::StripeStore;
use crate::upload::spool::Spool;

// =============================================================================
// Configuration
// =============================================================================

/// Upload engine parameters.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Spool directory for in-flight shards
    pub cache_dir: std::path::PathBuf,
    /// Worker pool size
    pub worker_threads: usize,
    /// Retry budget per shard task
    pub max_retries: u32,
    /// Base backoff; attempt n sleeps `retry_delay_ms · n`
    pub retry_delay_ms: u64,
    /// Queue bound in shard tasks
    pub max_queue_size: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            cache_dir: std::path::PathBuf::from("/tmp/cloudraidfs_spool"),
            worker_threads: 4,
            max_retries: 3,
            retry_delay_ms: 1000,
            max_queue_size: 10_000,
        }
    }
}

// =============================================================================
// Upload Task
// =============================================================================

/// One shard awaiting upload to its backend.
#[derive(Debug, Clone)]
struct ShardTask {
    stripe_id: u64,
    shard_id: u32,
    retry_count: u32,
}

// =============================================================================
// Uploader
// =============================================================================

/// Spool-backed asynchronous uploader with a bounded FIFO queue and a
/// worker pool.
pub struct AsyncUploader {
    store: Arc<StripeStore>,
    codec: Arc<RsCodec>,
    spool: Spool,
    config: UploadConfig,

    queue: Mutex<VecDeque<ShardTask>>,
    /// Signalled when the queue gains a task or the engine stops
    queue_cv: Condvar,
    /// Signalled after every processed task; `flush` waits on it for a
    /// drained queue
    drain_cv: Condvar,

    /// stripe_id → shard tasks not yet resolved
    pending: Mutex<HashMap<u64, usize>>,
    pending_cv: Condvar,

    running: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,

    uploaded: AtomicU64,
    failed: AtomicU64,
}

impl AsyncUploader {
    pub fn new(
        store: Arc<StripeStore>,
        codec: Arc<RsCodec>,
        config: UploadConfig,
    ) -> Result<Self> {
        let spool = Spool::new(&config.cache_dir)?;

        Ok(Self {
            store,
            codec,
            spool,
            config,
            queue: Mutex::new(VecDeque::new()),
            queue_cv: Condvar::new(),
            drain_cv: Condvar::new(),
            pending: Mutex::new(HashMap::new()),
            pending_cv: Condvar::new(),
            running: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
            uploaded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        })
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Spawn the worker pool. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(workers = self.config.worker_threads, "starting upload workers");

        let mut workers = self.workers.lock();
        for _ in 0..self.config.worker_threads {
            let uploader = Arc::clone(self);
            workers.push(thread::spawn(move || uploader.worker_loop()));
        }
    }

    /// Stop the engine: no new tasks are accepted, workers drain the queue
    /// and exit, and the call returns once they have all joined.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        // Hold the queue lock for an instant so no worker sits between its
        // empty-check and its wait when the wakeup fires.
        drop(self.queue.lock());
        self.queue_cv.notify_all();

        let workers = {
            let mut guard = self.workers.lock();
            std::mem::take(&mut *guard)
        };
        for worker in workers {
            if worker.join().is_err() {
                error!("upload worker panicked");
            }
        }

        info!(
            uploaded = self.uploaded.load(Ordering::Relaxed),
            failed = self.failed.load(Ordering::Relaxed),
            "upload workers stopped"
        );
    }

    /// Re-enqueue every shard record surviving in the spool. Must run before
    /// `start` so the queue order is deterministic.
    pub fn recover(&self) -> Result<usize> {
        let records = self.spool.scan()?;
        if records.is_empty() {
            return Ok(0);
        }

        {
            let mut pending = self.pending.lock();
            for &(stripe_id, _) in &records {
                *pending.entry(stripe_id).or_insert(0) += 1;
            }
        }

        let count = records.len();
        {
            let mut queue = self.queue.lock();
            for (stripe_id, shard_id) in records {
                queue.push_back(ShardTask {
                    stripe_id,
                    shard_id,
                    retry_count: 0,
                });
            }
        }
        self.queue_cv.notify_all();

        info!(count, "recovered spooled shard uploads");
        Ok(count)
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Encode a stripe, spool all shards, enqueue their upload tasks and
    /// return. Durability is deferred; `flush` or `wait_for_stripe` observe
    /// completion.
    ///
    /// The spool write always happens first; only the enqueue step can be
    /// rejected. A `QueueFull` return therefore leaves every shard record
    /// on disk, where the next startup scan re-enqueues it.
    pub fn async_write(&self, stripe_id: u64, data: &[u8]) -> Result<()> {
        let total = self.codec.total_shards();

        let shards = self.codec.encode(data)?;
        for (shard_id, shard) in shards.iter().enumerate() {
            self.spool.write(stripe_id, shard_id as u32, shard)?;
        }

        let mut queue = self.queue.lock();
        if queue.len() + total > self.config.max_queue_size {
            // Not admitted, not pending: the spooled records stay behind
            // for recovery.
            warn!(stripe_id, queued = queue.len(), "upload queue full, stripe left spooled");
            return Err(Error::QueueFull);
        }

        {
            let mut pending = self.pending.lock();
            *pending.entry(stripe_id).or_insert(0) += total;
        }

        for shard_id in 0..total {
            queue.push_back(ShardTask {
                stripe_id,
                shard_id: shard_id as u32,
                retry_count: 0,
            });
        }
        drop(queue);
        self.queue_cv.notify_all();

        debug!(stripe_id, shards = total, "stripe spooled for upload");
        Ok(())
    }

    // =========================================================================
    // Read-Your-Own-Writes
    // =========================================================================

    /// True while any shard of the stripe is unresolved.
    pub fn is_pending(&self, stripe_id: u64) -> bool {
        self.pending.lock().contains_key(&stripe_id)
    }

    /// Serve a still-pending stripe from its spool records by decoding them
    /// directly; absent records count as missing shards.
    pub fn read_pending(&self, stripe_id: u64) -> Result<Vec<u8>> {
        let total = self.codec.total_shards();
        let mut shards: Vec<Option<Vec<u8>>> = Vec::with_capacity(total);
        for shard_id in 0..total {
            shards.push(self.spool.read(stripe_id, shard_id as u32)?);
        }

        if shards.iter().all(Option::is_none) {
            return Err(Error::NotFound);
        }

        self.codec.decode(&shards)
    }

    // =========================================================================
    // Synchronization
    // =========================================================================

    /// Block until the stripe has no unresolved shards.
    pub fn wait_for_stripe(&self, stripe_id: u64) {
        let mut pending = self.pending.lock();
        while pending.contains_key(&stripe_id) {
            self.pending_cv.wait(&mut pending);
        }
    }

    /// Block until the queue is empty and no stripe is pending.
    pub fn flush(&self) {
        {
            let mut queue = self.queue.lock();
            while !queue.is_empty() {
                self.drain_cv.wait(&mut queue);
            }
        }

        let mut pending = self.pending.lock();
        while !pending.is_empty() {
            self.pending_cv.wait(&mut pending);
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn uploaded(&self) -> u64 {
        self.uploaded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    // =========================================================================
    // Worker
    // =========================================================================

    fn worker_loop(self: Arc<Self>) {
        loop {
            let task = {
                let mut queue = self.queue.lock();
                loop {
                    if let Some(task) = queue.pop_front() {
                        break task;
                    }
                    if !self.running.load(Ordering::SeqCst) {
                        return;
                    }
                    self.queue_cv.wait(&mut queue);
                }
            };

            self.process(task);
            self.drain_cv.notify_all();
        }
    }

    fn process(&self, task: ShardTask) {
        let ShardTask {
            stripe_id,
            shard_id,
            retry_count,
        } = task;

        let bytes = match self.spool.read(stripe_id, shard_id) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                // Absent record means done-or-never-existed; the slot is
                // resolved either way.
                debug!(stripe_id, shard_id, "spool record already gone");
                self.resolve_slot(stripe_id);
                return;
            }
            Err(e) => {
                error!(stripe_id, shard_id, error = %e, "spool read failed");
                self.retry_or_fail(stripe_id, shard_id, retry_count, &e);
                return;
            }
        };

        match self.store.write_shard(stripe_id, shard_id, &bytes) {
            Ok(()) => {
                self.uploaded.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = self.spool.remove(stripe_id, shard_id) {
                    warn!(stripe_id, shard_id, error = %e, "spool cleanup failed");
                }
                self.resolve_slot(stripe_id);
            }
            Err(e) => self.retry_or_fail(stripe_id, shard_id, retry_count, &e),
        }
    }

    fn retry_or_fail(&self, stripe_id: u64, shard_id: u32, retry_count: u32, err: &Error) {
        if err.is_transient() && retry_count < self.config.max_retries {
            let attempt = retry_count + 1;
            warn!(
                stripe_id, shard_id, attempt,
                max = self.config.max_retries,
                error = %err,
                "shard upload failed, retrying"
            );
            thread::sleep(Duration::from_millis(
                self.config.retry_delay_ms * attempt as u64,
            ));

            {
                let mut queue = self.queue.lock();
                queue.push_back(ShardTask {
                    stripe_id,
                    shard_id,
                    retry_count: attempt,
                });
            }
            self.queue_cv.notify_one();
        } else {
            // The spool record stays behind for operator recovery, but the
            // pending slot resolves so flush() terminates.
            error!(
                stripe_id, shard_id, error = %err,
                "shard upload failed permanently, spool record retained"
            );
            self.failed.fetch_add(1, Ordering::Relaxed);
            self.resolve_slot(stripe_id);
        }
    }

    /// Drop one outstanding shard slot of a stripe, waking waiters when the
    /// stripe resolves completely.
    fn resolve_slot(&self, stripe_id: u64) {
        let mut pending = self.pending.lock();
        if let Some(count) = pending.get_mut(&stripe_id) {
            *count -= 1;
            if *count == 0 {
                pending.remove(&stripe_id);
            }
        }
        drop(pending);
        self.pending_cv.notify_all();
    }
}

// =============================================================================
// Tests
// =============================================================================

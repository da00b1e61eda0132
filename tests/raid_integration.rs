//! End-to-end scenarios over three local backends with k=2, m=1:
//! shard placement, loss tolerance, read-triggered repair, crash recovery
//! through the spool, and namespace persistence across restarts.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use cloudraidfs::backend::{BlobBackend, LocalBackend};
use cloudraidfs::cache::{
    FileCache, FileCacheConfig, StripeCache, StripeCacheConfig,
};
use cloudraidfs::ec::{RsCodec, HEADER_LEN};
use cloudraidfs::error::Error;
use cloudraidfs::fs::{CloudRaidFs, FileManager, MetadataStore};
use cloudraidfs::store::StripeStore;
use cloudraidfs::upload::{AsyncUploader, Spool, UploadConfig};
use cloudraidfs::{LookupResult, STRIPE_SIZE};

const K: usize = 2;
const M: usize = 1;

struct Cluster {
    backend_dirs: Vec<TempDir>,
    spool_dir: TempDir,
}

impl Cluster {
    fn new() -> Self {
        Self {
            backend_dirs: (0..K + M).map(|_| TempDir::new().unwrap()).collect(),
            spool_dir: TempDir::new().unwrap(),
        }
    }

    fn backends(&self) -> Vec<Arc<dyn BlobBackend>> {
        self.backend_dirs
            .iter()
            .map(|d| Arc::new(LocalBackend::new(d.path())) as Arc<dyn BlobBackend>)
            .collect()
    }

    fn shard_file(&self, backend: usize, stripe_id: u64, shard_id: u32) -> PathBuf {
        self.backend_dirs[backend]
            .path()
            .join(format!("stripes/{:08}/{:02}.chunk", stripe_id, shard_id))
    }

    /// Assemble a full stack over this cluster's backends and spool.
    fn stack(&self, caches: bool, start_workers: bool) -> Stack {
        let codec = Arc::new(RsCodec::new(K, M).unwrap());
        let store = Arc::new(StripeStore::new(self.backends(), Arc::clone(&codec)).unwrap());

        let uploader = Arc::new(
            AsyncUploader::new(
                Arc::clone(&store),
                Arc::clone(&codec),
                UploadConfig {
                    cache_dir: self.spool_dir.path().to_path_buf(),
                    retry_delay_ms: 10,
                    ..Default::default()
                },
            )
            .unwrap(),
        );
        uploader.recover().unwrap();
        if start_workers {
            uploader.start();
        }

        let stripe_cache = caches.then(|| {
            Arc::new(StripeCache::new(StripeCacheConfig {
                max_cache_size: 64 * 1024 * 1024,
                cache_ttl: Duration::from_secs(60),
            }))
        });
        let file_cache = caches.then(|| {
            Arc::new(FileCache::new(FileCacheConfig {
                max_cache_size: 64 * 1024 * 1024,
                max_file_size: 8 * 1024 * 1024,
                cache_ttl: Duration::from_secs(60),
            }))
        });

        let meta = Arc::new(MetadataStore::new());
        let fm = Arc::new(FileManager::new(
            Arc::clone(&store),
            Arc::clone(&meta),
            file_cache.clone(),
            stripe_cache.clone(),
            Some(Arc::clone(&uploader)),
        ));
        meta.load(&fm, &store).unwrap();

        let fs = CloudRaidFs::assemble(
            fm,
            Arc::clone(&meta),
            Arc::clone(&store),
            stripe_cache,
            file_cache,
            Some(Arc::clone(&uploader)),
        );

        Stack {
            fs,
            meta,
            store,
            uploader,
        }
    }
}

struct Stack {
    fs: Arc<CloudRaidFs>,
    meta: Arc<MetadataStore>,
    store: Arc<StripeStore>,
    uploader: Arc<AsyncUploader>,
}

fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(10));
    }
}

// =============================================================================
// E1: basic write/read and shard placement
// =============================================================================

#[test]
fn e1_write_read_and_shard_placement() {
    let cluster = Cluster::new();
    let stack = cluster.stack(true, true);

    stack.fs.write("/a", 0, b"hello").unwrap();
    assert_eq!(stack.fs.read("/a", 0, 5).unwrap(), b"hello");

    stack.uploader.flush();

    // Each backend holds exactly one shard of stripe 100.
    for backend in 0..K + M {
        let dir = cluster.backend_dirs[backend].path().join("stripes/00000100");
        let entries: Vec<_> = std::fs::read_dir(dir).unwrap().collect();
        assert_eq!(entries.len(), 1, "backend {} shard count", backend);
        assert!(cluster.shard_file(backend, 100, backend as u32).exists());
    }

    // Data shards concatenated, stripped of the 8-byte header and truncated
    // to the write length reproduce the plaintext.
    let mut joined = std::fs::read(cluster.shard_file(0, 100, 0)).unwrap();
    joined.extend(std::fs::read(cluster.shard_file(1, 100, 1)).unwrap());
    assert_eq!(&joined[HEADER_LEN..HEADER_LEN + 5], b"hello");

    stack.uploader.stop();
}

// =============================================================================
// E2: single shard loss is transparent and repaired
// =============================================================================

#[test]
fn e2_lost_shard_served_and_repaired() {
    let cluster = Cluster::new();
    let stack = cluster.stack(false, true);

    stack.fs.write("/a", 0, b"hello").unwrap();
    stack.uploader.flush();

    let lost = cluster.shard_file(1, 100, 1);
    let original = std::fs::read(&lost).unwrap();
    std::fs::remove_file(&lost).unwrap();

    assert_eq!(stack.fs.read("/a", 0, 5).unwrap(), b"hello");

    // The deleted shard reappears with its original bytes.
    wait_for("shard repair", || lost.exists());
    assert_eq!(std::fs::read(&lost).unwrap(), original);

    stack.uploader.stop();
}

// =============================================================================
// E3: losses past m fail the read and touch nothing
// =============================================================================

#[test]
fn e3_too_many_losses_fail_read() {
    let cluster = Cluster::new();
    let stack = cluster.stack(false, true);

    stack.fs.write("/a", 0, b"hello").unwrap();
    stack.uploader.flush();

    let survivor = cluster.shard_file(0, 100, 0);
    let survivor_bytes = std::fs::read(&survivor).unwrap();
    std::fs::remove_file(cluster.shard_file(1, 100, 1)).unwrap();
    std::fs::remove_file(cluster.shard_file(2, 100, 2)).unwrap();

    match stack.fs.read("/a", 0, 5) {
        Err(Error::InsufficientShards {
            available,
            required,
        }) => {
            assert_eq!(available, 1);
            assert_eq!(required, K);
        }
        other => panic!("expected InsufficientShards, got {:?}", other),
    }

    // The surviving shard is untouched.
    assert_eq!(std::fs::read(&survivor).unwrap(), survivor_bytes);

    stack.uploader.stop();
}

// =============================================================================
// E4: multi-stripe file
// =============================================================================

#[test]
fn e4_multi_stripe_file() {
    let cluster = Cluster::new();
    let stack = cluster.stack(true, true);

    let len = 6 * 1024 * 1024;
    stack.fs.write("/b", 0, &vec![0x41u8; len]).unwrap();

    assert_eq!(
        stack.fs.lookup("/b").unwrap(),
        LookupResult::File { size: len as u64 }
    );
    assert_eq!(stack.meta.file_stripes("/b").len(), 2);
    assert!(len as u64 > STRIPE_SIZE && (len as u64) < 2 * STRIPE_SIZE);

    assert_eq!(stack.fs.read("/b", len as u64 - 1, 1).unwrap(), vec![0x41]);
    // One past EOF: zero bytes, not an error.
    assert!(stack.fs.read("/b", len as u64, 1).unwrap().is_empty());

    stack.fs.shutdown().unwrap();
}

// =============================================================================
// E5: crash before upload, spool recovery restores durability
// =============================================================================

#[test]
fn e5_crash_recovery_through_spool() {
    let cluster = Cluster::new();

    // First process: the write lands in the spool, never on the backends.
    {
        let stack = cluster.stack(false, false);
        stack.fs.write("/c", 0, b"x").unwrap();

        // Persist the namespace synchronously so only the data stripe is
        // in flight when the process dies.
        let sync_fm = FileManager::new(
            Arc::clone(&stack.store),
            Arc::clone(&stack.meta),
            None,
            None,
            None,
        );
        stack.meta.save(&sync_fm).unwrap();

        assert!(!cluster.shard_file(0, 100, 0).exists());
    }

    // The spool holds one record per shard of stripe 100.
    let spool = Spool::new(cluster.spool_dir.path()).unwrap();
    assert_eq!(spool.scan().unwrap(), vec![(100, 0), (100, 1), (100, 2)]);

    // Second process: recovery re-enqueues, flush makes it durable.
    let stack = cluster.stack(false, true);
    assert!(stack.uploader.is_pending(100));

    stack.uploader.flush();

    for backend in 0..K + M {
        assert!(cluster.shard_file(backend, 100, backend as u32).exists());
    }
    assert!(spool.scan().unwrap().is_empty());
    assert_eq!(stack.fs.read("/c", 0, 1).unwrap(), b"x");

    stack.uploader.stop();
}

// =============================================================================
// E6: namespace persistence across restart
// =============================================================================

#[test]
fn e6_namespace_survives_restart() {
    let cluster = Cluster::new();

    {
        let stack = cluster.stack(true, true);
        stack.fs.create_dir("/d").unwrap();
        stack.fs.write("/d/f", 0, b"z").unwrap();
        stack.fs.shutdown().unwrap();
    }

    let stack = cluster.stack(true, true);
    assert_eq!(stack.fs.list("/d").unwrap(), vec!["f"]);
    assert_eq!(stack.fs.read("/d/f", 0, 1).unwrap(), b"z");
    assert_eq!(stack.fs.lookup("/d").unwrap(), LookupResult::Directory);

    stack.fs.shutdown().unwrap();
}

// =============================================================================
// Read-your-own-writes between enqueue and flush
// =============================================================================

#[test]
fn read_your_own_writes_via_spool() {
    let cluster = Cluster::new();
    // No caches and no workers: the only source is the spool fallback.
    let stack = cluster.stack(false, false);

    stack.fs.write("/ryow", 0, b"still in flight").unwrap();
    assert!(stack.uploader.is_pending(100));
    assert!(!cluster.shard_file(0, 100, 0).exists());

    assert_eq!(stack.fs.read("/ryow", 0, 15).unwrap(), b"still in flight");
}

// =============================================================================
// Reserved range self-storage
// =============================================================================

#[test]
fn metadata_stripes_stay_reserved() {
    let cluster = Cluster::new();

    {
        let stack = cluster.stack(true, true);
        for i in 0..5 {
            stack
                .fs
                .write(&format!("/file{}", i), 0, b"payload")
                .unwrap();
        }
        stack.fs.shutdown().unwrap();
    }

    let stack = cluster.stack(true, true);

    // User stripes all landed at or above 100, and the meta file's own
    // stripes stayed inside the reserved range.
    for i in 0..5 {
        let stripes = stack.meta.file_stripes(&format!("/file{}", i));
        assert!(stripes.iter().all(|&s| s >= 100), "stripes {:?}", stripes);
    }
    let meta_stripes = stack.meta.file_stripes("/.__cloudraidfs_meta");
    assert!(!meta_stripes.is_empty());
    assert!(meta_stripes.iter().all(|&s| s < 100));

    // New writes keep allocating past everything that exists.
    stack.fs.write("/after", 0, b"next").unwrap();
    let after = stack.meta.file_stripes("/after");
    assert_eq!(after, vec![105]);

    stack.fs.shutdown().unwrap();
}

// =============================================================================
// Overwrites invalidate and reconverge
// =============================================================================

#[test]
fn overwrite_visible_after_flush_and_restart() {
    let cluster = Cluster::new();

    {
        let stack = cluster.stack(true, true);
        stack.fs.write("/w", 0, b"version-1").unwrap();
        stack.uploader.flush();
        stack.fs.write("/w", 0, b"version-2").unwrap();
        assert_eq!(stack.fs.read("/w", 0, 9).unwrap(), b"version-2");
        stack.fs.shutdown().unwrap();
    }

    let stack = cluster.stack(true, true);
    assert_eq!(stack.fs.read("/w", 0, 9).unwrap(), b"version-2");
    stack.fs.shutdown().unwrap();
}

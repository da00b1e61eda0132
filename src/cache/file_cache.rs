//! File cache
//!
//! TTL + heat-scored cache of whole small files keyed by path. Shares the
//! stripe cache's discipline but adds an admission cap on file size, and
//! the heat score favours small hot files: a small entry buys more future
//! hits per byte than a large one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::trace;

/// File cache limits.
#[derive(Debug, Clone)]
pub struct FileCacheConfig {
    /// Aggregate byte budget
    pub max_cache_size: u64,
    /// Files larger than this are never admitted
    pub max_file_size: u64,
    /// Per-entry TTL, extended on every hit
    pub cache_ttl: Duration,
}

impl Default for FileCacheConfig {
    fn default() -> Self {
        Self {
            max_cache_size: 512 * 1024 * 1024,
            max_file_size: 16 * 1024 * 1024,
            cache_ttl: Duration::from_secs(300),
        }
    }
}

struct Entry {
    data: Bytes,
    expire_at: Instant,
    access_count: u64,
    lru_seq: u64,
}

impl Entry {
    /// Heat score: `access_count · (seconds_to_expire + 1) / (KiB + 1)`;
    /// expired entries score -1.
    fn heat(&self, now: Instant) -> f64 {
        if now >= self.expire_at {
            return -1.0;
        }
        let to_expire = (self.expire_at - now).as_secs_f64();
        let kib = (self.data.len() / 1024) as f64;
        self.access_count as f64 * (to_expire + 1.0) / (kib + 1.0)
    }
}

struct Inner {
    entries: HashMap<String, Entry>,
    current_size: u64,
    lru_counter: u64,
}

/// TTL + heat-scored in-memory cache of whole files.
pub struct FileCache {
    config: FileCacheConfig,
    inner: Mutex<Inner>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl FileCache {
    pub fn new(config: FileCacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                current_size: 0,
                lru_counter: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Largest file size the cache will admit.
    pub fn max_file_size(&self) -> u64 {
        self.config.max_file_size
    }

    /// Look up a file by path; hit semantics match the stripe cache.
    pub fn get(&self, path: &str) -> Option<Bytes> {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        let live = match inner.entries.get(path) {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(entry) => now < entry.expire_at,
        };

        if !live {
            Self::remove_entry(&mut inner, path);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        inner.lru_counter += 1;
        let seq = inner.lru_counter;
        let ttl = self.config.cache_ttl;
        let data = inner.entries.get_mut(path).map(|entry| {
            entry.expire_at = now + ttl;
            entry.access_count += 1;
            entry.lru_seq = seq;
            entry.data.clone()
        });
        if data.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        data
    }

    /// Insert a file. Payloads past `max_file_size` or the aggregate budget
    /// are refused.
    pub fn put(&self, path: &str, data: Bytes) {
        let size = data.len() as u64;
        if size > self.config.max_file_size || size > self.config.max_cache_size {
            trace!(path, size, "file too large to cache");
            return;
        }

        let mut inner = self.inner.lock();

        Self::remove_entry(&mut inner, path);

        if !self.make_room(&mut inner, size) {
            return;
        }

        let now = Instant::now();
        inner.lru_counter += 1;
        let seq = inner.lru_counter;
        inner.entries.insert(
            path.to_string(),
            Entry {
                data,
                expire_at: now + self.config.cache_ttl,
                access_count: 1,
                lru_seq: seq,
            },
        );
        inner.current_size += size;
    }

    /// Drop a path, typically because the file was written or truncated.
    pub fn invalidate(&self, path: &str) {
        let mut inner = self.inner.lock();
        Self::remove_entry(&mut inner, path);
    }

    pub fn current_size(&self) -> u64 {
        self.inner.lock().current_size
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    fn make_room(&self, inner: &mut Inner, needed: u64) -> bool {
        let now = Instant::now();

        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| now >= e.expire_at)
            .map(|(path, _)| path.clone())
            .collect();
        for path in expired {
            Self::remove_entry(inner, &path);
        }

        if inner.current_size + needed <= self.config.max_cache_size {
            return true;
        }

        // Ascending heat, least-recently-used first among equals.
        let mut scored: Vec<(String, f64, u64)> = inner
            .entries
            .iter()
            .map(|(path, e)| (path.clone(), e.heat(now), e.lru_seq))
            .collect();
        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.2.cmp(&b.2))
        });

        for (path, _, _) in scored {
            if inner.current_size + needed <= self.config.max_cache_size {
                break;
            }
            trace!(path = %path, "evicting file by heat");
            Self::remove_entry(inner, &path);
        }

        inner.current_size + needed <= self.config.max_cache_size
    }

    fn remove_entry(inner: &mut Inner, path: &str) {
        if let Some(entry) = inner.entries.remove(path) {
            inner.current_size -= entry.data.len() as u64;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn cache(max: u64, max_file: u64, ttl_ms: u64) -> FileCache {
        FileCache::new(FileCacheConfig {
            max_cache_size: max,
            max_file_size: max_file,
            cache_ttl: Duration::from_millis(ttl_ms),
        })
    }

    #[test]
    fn test_put_get() {
        let cache = cache(1024, 512, 10_000);
        cache.put("/a", Bytes::from_static(b"file contents"));
        assert_eq!(cache.get("/a").unwrap(), Bytes::from_static(b"file contents"));
        assert_eq!(cache.hits(), 1);
    }

    #[test]
    fn test_file_size_admission_cap() {
        let cache = cache(1024, 8, 10_000);
        cache.put("/big", Bytes::from(vec![0u8; 9]));
        assert!(cache.get("/big").is_none());

        cache.put("/small", Bytes::from(vec![0u8; 8]));
        assert!(cache.get("/small").is_some());
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = cache(1024, 512, 20);
        cache.put("/f", Bytes::from_static(b"short lived"));
        thread::sleep(Duration::from_millis(60));
        assert!(cache.get("/f").is_none());
    }

    #[test]
    fn test_invalidate_on_write() {
        let cache = cache(1024, 512, 10_000);
        cache.put("/f", Bytes::from_static(b"v1"));
        cache.invalidate("/f");
        assert!(cache.get("/f").is_none());
        assert_eq!(cache.current_size(), 0);
    }

    #[test]
    fn test_budget_never_exceeded() {
        let cache = cache(64, 64, 10_000);
        for i in 0..32 {
            cache.put(&format!("/f{}", i), Bytes::from(vec![0u8; 16]));
            assert!(cache.current_size() <= 64);
        }
    }

    #[test]
    fn test_small_hot_files_preferred() {
        let cache = cache(3 * 1024, 2 * 1024, 10_000);

        // A large cold file and a small file with equal access counts: the
        // size divisor makes the large one the eviction victim.
        cache.put("/large", Bytes::from(vec![0u8; 2048]));
        cache.put("/small", Bytes::from(vec![0u8; 512]));

        cache.put("/next", Bytes::from(vec![0u8; 1024]));

        assert!(cache.get("/small").is_some());
        assert!(cache.get("/next").is_some());
        assert!(cache.get("/large").is_none());
    }
}

//! Stripe cache
//!
//! TTL + heat-scored cache of decoded stripes keyed by stripe ID. One mutex
//! guards the whole table; the lock is never held across backend I/O.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::trace;

/// Stripe cache limits.
#[derive(Debug, Clone)]
pub struct StripeCacheConfig {
    /// Aggregate byte budget
    pub max_cache_size: u64,
    /// Per-entry TTL, extended on every hit
    pub cache_ttl: Duration,
}

impl Default for StripeCacheConfig {
    fn default() -> Self {
        Self {
            max_cache_size: 256 * 1024 * 1024,
            cache_ttl: Duration::from_secs(300),
        }
    }
}

struct Entry {
    data: Bytes,
    expire_at: Instant,
    access_count: u64,
    /// Monotonic recency stamp, refreshed on every hit.
    lru_seq: u64,
}

impl Entry {
    /// Heat score: `access_count · (seconds_to_expire + 1)`; expired entries
    /// score -1 so they always evict first.
    fn heat(&self, now: Instant) -> f64 {
        if now >= self.expire_at {
            return -1.0;
        }
        let to_expire = (self.expire_at - now).as_secs_f64();
        self.access_count as f64 * (to_expire + 1.0)
    }
}

struct Inner {
    entries: HashMap<u64, Entry>,
    current_size: u64,
    lru_counter: u64,
}

/// TTL + heat-scored in-memory cache of decoded stripes.
pub struct StripeCache {
    config: StripeCacheConfig,
    inner: Mutex<Inner>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl StripeCache {
    pub fn new(config: StripeCacheConfig) -> Self {
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

    /// Look up a stripe. A hit extends the TTL, bumps the access count and
    /// refreshes recency; an expired entry is removed and reported as a miss.
    pub fn get(&self, stripe_id: u64) -> Option<Bytes> {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        let live = match inner.entries.get(&stripe_id) {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(entry) => now < entry.expire_at,
        };

        if !live {
            Self::remove_entry(&mut inner, stripe_id);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        inner.lru_counter += 1;
        let seq = inner.lru_counter;
        let ttl = self.config.cache_ttl;
        let data = inner.entries.get_mut(&stripe_id).map(|entry| {
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

    /// Insert a stripe, evicting colder entries as needed. Oversized
    /// payloads are refused.
    pub fn put(&self, stripe_id: u64, data: Bytes) {
        let size = data.len() as u64;
        if size > self.config.max_cache_size {
            trace!(stripe_id, size, "stripe too large to cache");
            return;
        }

        let mut inner = self.inner.lock();

        // Replacing an entry never counts against its heat.
        Self::remove_entry(&mut inner, stripe_id);

        if !self.make_room(&mut inner, size) {
            return;
        }

        let now = Instant::now();
        inner.lru_counter += 1;
        let seq = inner.lru_counter;
        inner.entries.insert(
            stripe_id,
            Entry {
                data,
                expire_at: now + self.config.cache_ttl,
                access_count: 1,
                lru_seq: seq,
            },
        );
        inner.current_size += size;
    }

    /// Drop a stripe, typically because its backing stripe was rewritten.
    pub fn invalidate(&self, stripe_id: u64) {
        let mut inner = self.inner.lock();
        Self::remove_entry(&mut inner, stripe_id);
    }

    /// Current aggregate payload bytes.
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

    /// Purge expired entries, then evict in ascending heat order until
    /// `needed` bytes fit. Returns false when the budget cannot be met.
    fn make_room(&self, inner: &mut Inner, needed: u64) -> bool {
        let now = Instant::now();

        let expired: Vec<u64> = inner
            .entries
            .iter()
            .filter(|(_, e)| now >= e.expire_at)
            .map(|(&id, _)| id)
            .collect();
        for id in expired {
            Self::remove_entry(inner, id);
        }

        if inner.current_size + needed <= self.config.max_cache_size {
            return true;
        }

        // Ascending heat, least-recently-used first among equals.
        let mut scored: Vec<(u64, f64, u64)> = inner
            .entries
            .iter()
            .map(|(&id, e)| (id, e.heat(now), e.lru_seq))
            .collect();
        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.2.cmp(&b.2))
        });

        for (id, _, _) in scored {
            if inner.current_size + needed <= self.config.max_cache_size {
                break;
            }
            trace!(stripe_id = id, "evicting stripe by heat");
            Self::remove_entry(inner, id);
        }

        inner.current_size + needed <= self.config.max_cache_size
    }

    fn remove_entry(inner: &mut Inner, stripe_id: u64) {
        if let Some(entry) = inner.entries.remove(&stripe_id) {
            inner.current_size -= entry.data.len() as u64;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

//! In-Memory Read Caches
//!
//! Two independent monitors sitting above the stripe store:
//!
//! - **Stripe cache** (`stripe_cache.rs`): decoded stripes keyed by
//!   `stripe_id`.
//! - **File cache** (`file_cache.rs`): whole small files keyed by path,
//!   with an admission cap on file size.
//!
//! Both share the same discipline: per-entry TTL extended on hit, an
//! aggregate byte budget, and heat-ordered eviction when the budget is
//! exceeded. A hit bumps the access count and recency; expired entries are
//! purged before anything hot is considered for eviction.

pub mod file_cache;
pub mod stripe_cache;

pub use file_cache::{FileCache, FileCacheConfig};
pub use stripe_cache::{StripeCache, StripeCacheConfig};

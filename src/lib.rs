//! CloudRAID-FS — erasure-coded filesystem over heterogeneous blob backends
//!
//! Presents a POSIX-like namespace whose contents are transparently sharded
//! by a `(k, m)` Reed-Solomon code across a fixed set of blob backends
//! (local directories, WebDAV servers, S3-compatible stores). Any `m`
//! backends may fail with all data still readable; shards observed missing
//! during a read are repaired in the background.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Filesystem Surface (fs)                      │
//! │     lookup / list / read / write / truncate / rename / sync       │
//! ├──────────────┬─────────────────────────┬─────────────────────────┤
//! │  File Cache  │       File Layer        │     Metadata Store      │
//! │   (cache)    │  stripe-aligned I/O     │  table + trie + save    │
//! ├──────────────┴──────┬──────────────────┴─────────────────────────┤
//! │    Stripe Cache     │        Upload Spool + Workers (upload)      │
//! ├─────────────────────┴──────────────────────────────────────────── ┤
//! │                      Stripe Store (store)                         │
//! │        fan-out, reconstruction, repair, ID allocation             │
//! ├───────────────────────────────────────────────────────────────────┤
//! │   Reed-Solomon Codec (ec)   │   Blob Backends (backend)           │
//! │   GF(2⁸), Vandermonde       │   local / WebDAV / S3               │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`ec`] - GF(2⁸) Reed-Solomon codec
//! - [`backend`] - Blob backend contract and drivers
//! - [`store`] - Erasure-coded stripe store
//! - [`cache`] - Stripe and whole-file read caches
//! - [`upload`] - Durable spool and asynchronous upload workers
//! - [`fs`] - File layer, metadata store and the adaptor-facing surface
//! - [`config`] - YAML configuration
//! - [`error`] - Error types

pub mod backend;
pub mod cache;
pub mod config;
pub mod ec;
pub mod error;
pub mod fs;
pub mod store;
pub mod upload;

// Re-export the types embedders touch most.
pub use config::Config;
pub use error::{Error, Result};
pub use fs::{CloudRaidFs, LookupResult, STRIPE_SIZE};

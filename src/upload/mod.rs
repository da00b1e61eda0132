//! Upload Spool and Workers
//!
//! The asynchronous half of the write path:
//!
//! - **Spool** (`spool.rs`): flat on-disk staging directory, one record per
//!   in-flight shard, crash-atomic via write-then-rename, fully
//!   reconstructable by a directory scan.
//! - **Uploader** (`uploader.rs`): bounded FIFO shard queue, worker pool,
//!   linear-backoff retries, pending-stripe accounting for
//!   read-your-own-writes and `flush`, and restart recovery.

pub mod spool;
pub mod uploader;

pub use spool::Spool;
pub use uploader::{AsyncUploader, UploadConfig};

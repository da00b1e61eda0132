//! Blob Backend Contract
//!
//! Every backend stores shards addressed by `(stripe_id, shard_id)` and
//! exposes three blocking operations. The stripe store never learns driver
//! types; it holds `Arc<dyn BlobBackend>` handles, one per shard slot.
//!
//! Error discipline matters here: a driver must report an absent shard as
//! [`Error::NotFound`](crate::error::Error::NotFound), distinct from
//! `TransientIo`/`PermanentIo` — the read path repairs missing shards but
//! must not issue spurious repair writes on transport failures.

pub mod local;
pub mod s3;
pub mod webdav;

use std::sync::Arc;

use crate::config::BackendConfig;
use crate::error::Result;

pub use local::LocalBackend;
pub use s3::S3Backend;
pub use webdav::WebDavBackend;

/// A blob store holding one shard per `(stripe_id, shard_id)` pair.
///
/// All operations may block on I/O. Implementations must be safe to call
/// from many threads at once; a driver wrapping a non-thread-safe client
/// carries its own lock.
pub trait BlobBackend: Send + Sync {
    /// Fetch shard bytes. Absent shard ⇒ `NotFound`.
    fn read(&self, stripe_id: u64, shard_id: u32) -> Result<Vec<u8>>;

    /// Persist shard bytes durably, overwriting any previous version.
    fn write(&self, stripe_id: u64, shard_id: u32, data: &[u8]) -> Result<()>;

    /// Remove a shard. An already-absent shard is success.
    fn delete(&self, stripe_id: u64, shard_id: u32) -> Result<()>;

    /// Human-readable identity for logs.
    fn describe(&self) -> String;
}

/// Shared object-naming discipline used by the bundled drivers:
/// `stripes/<stripe_id:08>/<shard_id:02>.chunk`. The core never parses it.
pub fn shard_object_key(stripe_id: u64, shard_id: u32) -> String {
    format!("stripes/{:08}/{:02}.chunk", stripe_id, shard_id)
}

/// Instantiate the driver a config entry describes.
pub fn from_config(config: &BackendConfig) -> Result<Arc<dyn BlobBackend>> {
    match config {
        BackendConfig::Local { path, .. } => Ok(Arc::new(LocalBackend::new(path))),
        BackendConfig::Webdav {
            url,
            username,
            password,
            ..
        } => Ok(Arc::new(WebDavBackend::new(
            url.clone(),
            username.clone(),
            password.clone(),
        )?)),
        BackendConfig::S3 {
            endpoint,
            bucket,
            access_key,
            secret_key,
            region,
            ..
        } => Ok(Arc::new(S3Backend::new(
            endpoint.clone(),
            bucket.clone(),
            access_key.clone(),
            secret_key.clone(),
            region.clone(),
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_object_key_format() {
        assert_eq!(shard_object_key(0, 0), "stripes/00000000/00.chunk");
        assert_eq!(shard_object_key(100, 2), "stripes/00000100/02.chunk");
        assert_eq!(
            shard_object_key(123_456_789, 14),
            "stripes/123456789/14.chunk"
        );
    }
}

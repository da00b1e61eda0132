//! WebDAV backend
//!
//! Shards are plain resources under the configured base URL using the shared
//! object-key layout. Collections are created lazily with MKCOL the first
//! time a PUT bounces off a missing parent.

use reqwest::blocking::Client;
use reqwest::{Method, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

use crate::backend::{shard_object_key, BlobBackend};
use crate::error::{Error, Result};

/// Blob backend speaking WebDAV over HTTP(S).
pub struct WebDavBackend {
    client: Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

impl WebDavBackend {
    pub fn new(
        base_url: impl Into<String>,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Config(format!("webdav client: {}", e)))?;

        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }

        Ok(Self {
            client,
            base_url,
            username,
            password,
        })
    }

    fn shard_url(&self, stripe_id: u64, shard_id: u32) -> String {
        format!("{}/{}", self.base_url, shard_object_key(stripe_id, shard_id))
    }

    fn request(&self, method: Method, url: &str) -> reqwest::blocking::RequestBuilder {
        let req = self.client.request(method, url);
        match &self.username {
            Some(user) => req.basic_auth(user, self.password.as_deref()),
            None => req,
        }
    }

    /// Create the collection chain for a shard URL (MKCOL is not recursive).
    fn make_collections(&self, stripe_id: u64) -> Result<()> {
        let mkcol =
            Method::from_bytes(b"MKCOL").map_err(|e| Error::PermanentIo(e.to_string()))?;
        let key = shard_object_key(stripe_id, 0);
        let mut prefix = self.base_url.clone();
        for part in key.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("").split('/') {
            prefix = format!("{}/{}", prefix, part);
            let status = self
                .request(mkcol.clone(), &prefix)
                .send()
                .map_err(|e| Error::TransientIo(e.to_string()))?
                .status();
            // 405 means the collection already exists.
            if !status.is_success() && status != StatusCode::METHOD_NOT_ALLOWED {
                debug!(%prefix, %status, "MKCOL refused");
            }
        }
        Ok(())
    }

    fn classify_status(status: StatusCode, context: &str) -> Error {
        if status == StatusCode::NOT_FOUND {
            Error::NotFound
        } else if status.is_server_error() {
            Error::TransientIo(format!("{}: HTTP {}", context, status))
        } else {
            Error::PermanentIo(format!("{}: HTTP {}", context, status))
        }
    }
}

impl BlobBackend for WebDavBackend {
    fn read(&self, stripe_id: u64, shard_id: u32) -> Result<Vec<u8>> {
        let url = self.shard_url(stripe_id, shard_id);
        let resp = self
            .request(Method::GET, &url)
            .send()
            .map_err(|e| Error::TransientIo(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Self::classify_status(status, "GET"));
        }

        let bytes = resp
            .bytes()
            .map_err(|e| Error::TransientIo(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn write(&self, stripe_id: u64, shard_id: u32, data: &[u8]) -> Result<()> {
        let url = self.shard_url(stripe_id, shard_id);

        let mut status = self
            .request(Method::PUT, &url)
            .body(data.to_vec())
            .send()
            .map_err(|e| Error::TransientIo(e.to_string()))?
            .status();

        // Missing parent collection shows up as 404 or 409; create and retry.
        if status == StatusCode::NOT_FOUND || status == StatusCode::CONFLICT {
            self.make_collections(stripe_id)?;
            status = self
                .request(Method::PUT, &url)
                .body(data.to_vec())
                .send()
                .map_err(|e| Error::TransientIo(e.to_string()))?
                .status();
        }

        if !status.is_success() {
            warn!(stripe_id, shard_id, %status, "webdav PUT failed");
            return Err(if status.is_server_error() {
                Error::TransientIo(format!("PUT: HTTP {}", status))
            } else {
                Error::PermanentIo(format!("PUT: HTTP {}", status))
            });
        }

        debug!(stripe_id, shard_id, len = data.len(), "wrote webdav shard");
        Ok(())
    }

    fn delete(&self, stripe_id: u64, shard_id: u32) -> Result<()> {
        let url = self.shard_url(stripe_id, shard_id);
        let status = self
            .request(Method::DELETE, &url)
            .send()
            .map_err(|e| Error::TransientIo(e.to_string()))?
            .status();

        // Already gone counts as success.
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(Self::classify_status(status, "DELETE"))
        }
    }

    fn describe(&self) -> String {
        format!("webdav:{}", self.base_url)
    }
}

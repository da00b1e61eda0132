//! S3-compatible backend
//!
//! Talks to any S3-compatible object store (AWS, MinIO, Ceph RGW) with
//! path-style addressing and AWS Signature V4 request signing. One object
//! per shard at `<bucket>/stripes/<stripe_id:08>/<shard_id:02>.chunk`.

use chrono::Utc;
use reqwest::blocking::Client;
use reqwest::{Method, StatusCode};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::debug;

use crate::backend::{shard_object_key, BlobBackend};
use crate::error::{Error, Result};

/// Blob backend speaking the S3 REST API.
pub struct S3Backend {
    client: Client,
    endpoint: String,
    host: String,
    bucket: String,
    region: String,
    access_key: String,
    secret_key: String,
}

impl S3Backend {
    pub fn new(
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        region: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Config(format!("s3 client: {}", e)))?;

        let mut endpoint = endpoint.into();
        while endpoint.ends_with('/') {
            endpoint.pop();
        }
        let host = endpoint
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&endpoint)
            .split('/')
            .next()
            .unwrap_or_default()
            .to_string();
        if host.is_empty() {
            return Err(Error::Config(format!("invalid s3 endpoint: {}", endpoint)));
        }

        Ok(Self {
            client,
            endpoint,
            host,
            bucket: bucket.into(),
            region: region.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        })
    }

    fn object_uri(&self, stripe_id: u64, shard_id: u32) -> String {
        format!("/{}/{}", self.bucket, shard_object_key(stripe_id, shard_id))
    }

    /// Issue one signed request against the object for this shard.
    fn signed_request(
        &self,
        method: Method,
        stripe_id: u64,
        shard_id: u32,
        body: &[u8],
    ) -> Result<reqwest::blocking::Response> {
        let uri = self.object_uri(stripe_id, shard_id);
        let url = format!("{}{}", self.endpoint, uri);

        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let payload_hash = hex::encode(Sha256::digest(body));

        let canonical_request = format!(
            "{}\n{}\n\nhost:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n\n\
             host;x-amz-content-sha256;x-amz-date\n{}",
            method.as_str(),
            uri,
            self.host,
            payload_hash,
            amz_date,
            payload_hash
        );

        let scope = format!("{}/{}/s3/aws4_request", date, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let mut key = hmac_sha256(format!("AWS4{}", self.secret_key).as_bytes(), date.as_bytes());
        key = hmac_sha256(&key, self.region.as_bytes());
        key = hmac_sha256(&key, b"s3");
        key = hmac_sha256(&key, b"aws4_request");
        let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, \
             SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature={}",
            self.access_key, scope, signature
        );

        self.client
            .request(method, &url)
            .header("x-amz-date", amz_date)
            .header("x-amz-content-sha256", payload_hash)
            .header("authorization", authorization)
            .body(body.to_vec())
            .send()
            .map_err(|e| Error::TransientIo(e.to_string()))
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

impl BlobBackend for S3Backend {
    fn read(&self, stripe_id: u64, shard_id: u32) -> Result<Vec<u8>> {
        let resp = self.signed_request(Method::GET, stripe_id, shard_id, &[])?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Self::classify_status(status, "GetObject"));
        }
        let bytes = resp
            .bytes()
            .map_err(|e| Error::TransientIo(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn write(&self, stripe_id: u64, shard_id: u32, data: &[u8]) -> Result<()> {
        let resp = self.signed_request(Method::PUT, stripe_id, shard_id, data)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Self::classify_status(status, "PutObject"));
        }
        debug!(stripe_id, shard_id, len = data.len(), "wrote s3 shard");
        Ok(())
    }

    fn delete(&self, stripe_id: u64, shard_id: u32) -> Result<()> {
        let resp = self.signed_request(Method::DELETE, stripe_id, shard_id, &[])?;
        let status = resp.status();
        // DeleteObject answers 204; a missing key is success too.
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(Self::classify_status(status, "DeleteObject"))
        }
    }

    fn describe(&self) -> String {
        format!("s3:{}/{}", self.endpoint, self.bucket)
    }
}

// =============================================================================
// Signing Primitives
// =============================================================================

fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    let mut block = [0u8; 64];
    if key.len() > 64 {
        block[..32].copy_from_slice(&Sha256::digest(key));
    } else {
        block[..key.len()].copy_from_slice(key);
    }

    let mut inner = Sha256::new();
    inner.update(block.map(|b| b ^ 0x36));
    inner.update(message);
    let inner_hash = inner.finalize();

    let mut outer = Sha256::new();
    outer.update(block.map(|b| b ^ 0x5c));
    outer.update(inner_hash);
    outer.finalize().into()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_sha256_rfc4231_case_one() {
        let digest = hmac_sha256(&[0x0b; 20], b"Hi There");
        assert_eq!(
            hex::encode(digest),
            "b0344c61d8db38535ca8afceaf0bf12b881dc200c9833da726e9376c2e32cff7"
        );
    }

    #[test]
    fn test_hmac_sha256_long_key_is_hashed() {
        // RFC 4231 test case 6: 131-byte key forces the hash-the-key path.
        let digest = hmac_sha256(
            &[0xaa; 131],
            b"Test Using Larger Than Block-Size Key - Hash Key First",
        );
        assert_eq!(
            hex::encode(digest),
            "60e431591ee0b67f0d8a26aacbf5b77f8e0bc6213728c5140546040f0ee37f54"
        );
    }

    #[test]
    fn test_endpoint_host_extraction() {
        let b = S3Backend::new("https://minio.local:9000/", "bkt", "ak", "sk", "us-east-1")
            .unwrap();
        assert_eq!(b.host, "minio.local:9000");
        assert_eq!(b.object_uri(100, 0), "/bkt/stripes/00000100/00.chunk");
    }
}

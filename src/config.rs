//! Configuration
//!
//! YAML-backed settings covering the erasure geometry, the ordered backend
//! list, both cache budgets and the upload engine. Backend order defines the
//! shard-to-backend mapping and must never change once data exists; the
//! config therefore uses an explicit list rather than a mapping.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cache::{FileCacheConfig, StripeCacheConfig};
use crate::error::{Error, Result};
use crate::upload::UploadConfig;

/// Top-level configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Filesystem-adaptor location (consumed by the mount adaptor, unused
    /// by the core)
    #[serde(default)]
    pub mountpoint: Option<PathBuf>,

    /// Data shard count; immutable after first use
    pub k: usize,

    /// Parity shard count; immutable after first use
    pub m: usize,

    /// Ordered backend list; position i stores shard i, forever
    pub backends: Vec<BackendConfig>,

    /// Whole-file cache limits
    #[serde(default)]
    pub cache: FileCacheSettings,

    /// Decoded-stripe cache limits
    #[serde(default)]
    pub chunk_cache: StripeCacheSettings,

    /// Upload engine parameters
    #[serde(default)]
    pub async_upload: AsyncUploadSettings,
}

/// One backend entry, tagged by driver type.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Local directory driver
    Local { name: String, path: PathBuf },

    /// WebDAV driver
    Webdav {
        name: String,
        url: String,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
    },

    /// S3-compatible driver
    S3 {
        name: String,
        endpoint: String,
        bucket: String,
        access_key: String,
        secret_key: String,
        #[serde(default = "default_region")]
        region: String,
    },
}

impl BackendConfig {
    pub fn name(&self) -> &str {
        match self {
            BackendConfig::Local { name, .. } => name,
            BackendConfig::Webdav { name, .. } => name,
            BackendConfig::S3 { name, .. } => name,
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// File cache settings (`cache.*` keys).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileCacheSettings {
    #[serde(default = "FileCacheSettings::default_max_cache_size")]
    pub max_cache_size: u64,
    #[serde(default = "FileCacheSettings::default_max_file_size")]
    pub max_file_size: u64,
    /// TTL in seconds
    #[serde(default = "default_ttl_seconds")]
    pub cache_ttl: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl FileCacheSettings {
    fn default_max_cache_size() -> u64 {
        512 * 1024 * 1024
    }

    fn default_max_file_size() -> u64 {
        16 * 1024 * 1024
    }

    pub fn to_cache_config(&self) -> FileCacheConfig {
        FileCacheConfig {
            max_cache_size: self.max_cache_size,
            max_file_size: self.max_file_size,
            cache_ttl: Duration::from_secs(self.cache_ttl),
        }
    }
}

impl Default for FileCacheSettings {
    fn default() -> Self {
        Self {
            max_cache_size: Self::default_max_cache_size(),
            max_file_size: Self::default_max_file_size(),
            cache_ttl: default_ttl_seconds(),
            enabled: true,
        }
    }
}

/// Stripe cache settings (`chunk_cache.*` keys).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StripeCacheSettings {
    #[serde(default = "StripeCacheSettings::default_max_cache_size")]
    pub max_cache_size: u64,
    /// TTL in seconds
    #[serde(default = "default_ttl_seconds")]
    pub cache_ttl: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl StripeCacheSettings {
    fn default_max_cache_size() -> u64 {
        256 * 1024 * 1024
    }

    pub fn to_cache_config(&self) -> StripeCacheConfig {
        StripeCacheConfig {
            max_cache_size: self.max_cache_size,
            cache_ttl: Duration::from_secs(self.cache_ttl),
        }
    }
}

impl Default for StripeCacheSettings {
    fn default() -> Self {
        Self {
            max_cache_size: Self::default_max_cache_size(),
            cache_ttl: default_ttl_seconds(),
            enabled: true,
        }
    }
}

/// Upload engine settings (`async_upload.*` keys).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AsyncUploadSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "AsyncUploadSettings::default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "AsyncUploadSettings::default_worker_threads")]
    pub worker_threads: usize,
    #[serde(default = "AsyncUploadSettings::default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "AsyncUploadSettings::default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "AsyncUploadSettings::default_max_queue_size")]
    pub max_queue_size: usize,
}

impl AsyncUploadSettings {
    fn default_cache_dir() -> PathBuf {
        PathBuf::from("/tmp/cloudraidfs_spool")
    }

    fn default_worker_threads() -> usize {
        4
    }

    fn default_max_retries() -> u32 {
        3
    }

    fn default_retry_delay_ms() -> u64 {
        1000
    }

    fn default_max_queue_size() -> usize {
        10_000
    }

    pub fn to_upload_config(&self) -> UploadConfig {
        UploadConfig {
            cache_dir: self.cache_dir.clone(),
            worker_threads: self.worker_threads,
            max_retries: self.max_retries,
            retry_delay_ms: self.retry_delay_ms,
            max_queue_size: self.max_queue_size,
        }
    }
}

impl Default for AsyncUploadSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_dir: Self::default_cache_dir(),
            worker_threads: Self::default_worker_threads(),
            max_retries: Self::default_max_retries(),
            retry_delay_ms: Self::default_retry_delay_ms(),
            max_queue_size: Self::default_max_queue_size(),
        }
    }
}

fn default_ttl_seconds() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Parse and validate a YAML document.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("reading {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_yaml(&text)
    }

    fn validate(&self) -> Result<()> {
        if self.k == 0 || self.m == 0 {
            return Err(Error::Config("k and m must both be at least 1".to_string()));
        }
        if self.k + self.m > 255 {
            return Err(Error::Config(format!(
                "k + m must not exceed 255, got {}",
                self.k + self.m
            )));
        }
        if self.backends.len() != self.k + self.m {
            return Err(Error::Config(format!(
                "{} backends configured but k + m = {}",
                self.backends.len(),
                self.k + self.m
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

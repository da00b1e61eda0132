//! Error types for CloudRAID-FS

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur across the stripe store, caches, upload engine and
/// filesystem surface.
#[derive(Error, Debug)]
pub enum Error {
    /// Local I/O error (spool, local backend)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Object is absent where a non-absent one was expected.
    ///
    /// Kept distinct from the I/O variants: a missing shard triggers repair,
    /// a transport failure must not.
    #[error("not found")]
    NotFound,

    /// Fewer than k live shards on read; the stripe is unavailable
    #[error("insufficient shards: have {available}, need {required}")]
    InsufficientShards { available: usize, required: usize },

    /// Recoverable remote failure; retried by the upload engine
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// Unrecoverable remote failure; spool records are retained
    #[error("permanent I/O error: {0}")]
    PermanentIo(String),

    /// Upload rejected because the bounded queue is saturated
    #[error("upload queue full")]
    QueueFull,

    /// Bad parameters (erasure config out of range, malformed path, ...)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // =========================================================================
    // Codec Errors
    // =========================================================================
    /// Shard vector rejected by the codec (wrong count, unequal lengths)
    #[error("corrupt shard: {0}")]
    CorruptShard(String),

    /// Length header truncated or inconsistent with the reconstructed payload
    #[error("corrupt stripe header: {0}")]
    CorruptHeader(String),

    /// Singular submatrix during Gaussian elimination
    #[error("decode failed: {0}")]
    DecodeFailed(String),

    // =========================================================================
    // Filesystem Surface Errors
    // =========================================================================
    /// Mutation of a reserved path
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Destination already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Directory operation on a non-directory
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// File operation on a directory
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// rmdir / rename target holds children
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Persisted metadata could not be parsed
    #[error("metadata error: {0}")]
    Metadata(String),
}

impl Error {
    /// True for the error kinds that mean "the shard is definitely absent"
    /// on the read path, i.e. the ones that make a shard a repair candidate.
    pub fn is_missing_shard(&self) -> bool {
        matches!(self, Error::NotFound | Error::PermanentIo(_))
    }

    /// True for failures the upload engine is allowed to retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientIo(_) | Error::Io(_))
    }
}

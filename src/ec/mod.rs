//! Erasure Coding Module
//!
//! Reed-Solomon over GF(2⁸) with a systematic Vandermonde matrix:
//!
//! - **Field tables** (`gf256.rs`): process-wide multiplication and inverse
//!   tables behind a lazy once-guard.
//! - **Codec** (`coder.rs`): encode a stripe into `k + m` shards, decode
//!   from any `k` survivors, detect corrupt headers and shard vectors.
//!
//! Shard 0 of every stripe starts with an 8-byte little-endian prefix
//! holding the pre-padding plaintext length; the prefix is encoded with the
//! data, so it is reconstructible like any other stripe byte.

pub mod coder;
pub mod gf256;

#[cfg(test)]
mod proptest;

pub use coder::{RsCodec, HEADER_LEN};

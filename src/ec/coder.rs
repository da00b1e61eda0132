//! Reed-Solomon stripe codec
//!
//! Encodes a stripe of plaintext into `k + m` shards over a systematic
//! Vandermonde matrix in GF(2⁸) and reconstructs the plaintext from any `k`
//! survivors via Gaussian elimination.
//!
//! The 8-byte little-endian pre-padding length is prepended to the plaintext
//! before column splitting, so the header is part of the codeword: shard 0
//! starts with it, and it survives the loss of shard 0 like any other byte.

use crate::ec::gf256;
use crate::error::{Error, Result};
use tracing::debug;

/// Bytes of the little-endian `orig_len` prefix carried at the front of the
/// encoded payload.
pub const HEADER_LEN: usize = 8;

/// Reed-Solomon codec for a fixed `(k, m)` geometry.
pub struct RsCodec {
    /// Number of data shards (k)
    data_shards: usize,
    /// Number of parity shards (m)
    parity_shards: usize,
    /// `(k+m) × k` encoding matrix; the top `k` rows are the identity
    matrix: Vec<Vec<u8>>,
}

impl RsCodec {
    /// Create a codec.
    ///
    /// Requires `1 ≤ k`, `1 ≤ m` and `k + m ≤ 255` (the field runs out of
    /// distinct evaluation points past that).
    pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self> {
        if data_shards == 0 {
            return Err(Error::InvalidArgument(
                "data shard count must be at least 1".to_string(),
            ));
        }
        if parity_shards == 0 {
            return Err(Error::InvalidArgument(
                "parity shard count must be at least 1".to_string(),
            ));
        }
        if data_shards + parity_shards > 255 {
            return Err(Error::InvalidArgument(format!(
                "k + m must not exceed 255, got {}",
                data_shards + parity_shards
            )));
        }

        let matrix = build_systematic_matrix(data_shards, parity_shards)?;

        Ok(Self {
            data_shards,
            parity_shards,
            matrix,
        })
    }

    /// Get the number of data shards
    pub fn data_shards(&self) -> usize {
        self.data_shards
    }

    /// Get the number of parity shards
    pub fn parity_shards(&self) -> usize {
        self.parity_shards
    }

    /// Get the total number of shards
    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    /// Encode a stripe of plaintext into `k + m` equal-length shards.
    pub fn encode(&self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        let k = self.data_shards;
        let payload_len = HEADER_LEN + data.len();
        let shard_size = payload_len.div_ceil(k);

        let mut payload = Vec::with_capacity(k * shard_size);
        payload.extend_from_slice(&(data.len() as u64).to_le_bytes());
        payload.extend_from_slice(data);
        payload.resize(k * shard_size, 0);

        let mut shards: Vec<Vec<u8>> = Vec::with_capacity(self.total_shards());

        // Data rows are identity rows: plain column copies.
        for c in 0..k {
            shards.push(payload[c * shard_size..(c + 1) * shard_size].to_vec());
        }

        for row in &self.matrix[k..] {
            let mut out = vec![0u8; shard_size];
            for (c, &coef) in row.iter().enumerate() {
                if coef == 0 {
                    continue;
                }
                let col = &payload[c * shard_size..(c + 1) * shard_size];
                for (o, &v) in out.iter_mut().zip(col.iter()) {
                    *o ^= gf256::mul(coef, v);
                }
            }
            shards.push(out);
        }

        debug!(
            data_len = data.len(),
            shard_size,
            shards = shards.len(),
            "encoded stripe"
        );

        Ok(shards)
    }

    /// Decode a stripe from its shard vector; `None` entries mark missing
    /// shards. Succeeds with any `k` survivors.
    pub fn decode(&self, shards: &[Option<Vec<u8>>]) -> Result<Vec<u8>> {
        let k = self.data_shards;

        if shards.len() != self.total_shards() {
            return Err(Error::CorruptShard(format!(
                "expected {} shards, got {}",
                self.total_shards(),
                shards.len()
            )));
        }

        let available = shards.iter().filter(|s| s.is_some()).count();
        if available < k {
            return Err(Error::InsufficientShards {
                available,
                required: k,
            });
        }

        // First k non-empty indices.
        let rows: Vec<usize> = shards
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i))
            .take(k)
            .collect();

        let shard_size = shards[rows[0]].as_ref().map(Vec::len).unwrap_or(0);
        for &r in &rows {
            let len = shards[r].as_ref().map(Vec::len).unwrap_or(0);
            if len != shard_size {
                return Err(Error::CorruptShard(format!(
                    "shard {} has length {}, expected {}",
                    r, len, shard_size
                )));
            }
        }

        let chosen: Vec<&[u8]> = rows
            .iter()
            .filter_map(|&r| shards[r].as_deref())
            .collect();

        let payload = if rows.iter().enumerate().all(|(i, &r)| i == r) {
            // All data shards survived; the payload is their concatenation.
            let mut payload = Vec::with_capacity(k * shard_size);
            for shard in &chosen {
                payload.extend_from_slice(shard);
            }
            payload
        } else {
            self.solve(&rows, &chosen, shard_size)?
        };

        // The header lives in the first 8 payload bytes.
        if payload.len() < HEADER_LEN {
            return Err(Error::CorruptHeader(format!(
                "payload of {} bytes cannot hold the length prefix",
                payload.len()
            )));
        }
        let mut len_bytes = [0u8; HEADER_LEN];
        len_bytes.copy_from_slice(&payload[..HEADER_LEN]);
        let orig_len = u64::from_le_bytes(len_bytes) as usize;

        if orig_len > payload.len() - HEADER_LEN {
            return Err(Error::CorruptHeader(format!(
                "declared length {} exceeds reconstructed payload of {}",
                orig_len,
                payload.len() - HEADER_LEN
            )));
        }

        Ok(payload[HEADER_LEN..HEADER_LEN + orig_len].to_vec())
    }

    /// Recover the padded payload from an arbitrary surviving row set by
    /// solving the `k × k` system for every byte offset.
    fn solve(&self, rows: &[usize], chosen: &[&[u8]], shard_size: usize) -> Result<Vec<u8>> {
        let k = self.data_shards;

        let submatrix: Vec<Vec<u8>> = rows.iter().map(|&r| self.matrix[r].clone()).collect();
        // One elimination pass up front; per-byte work is then a k×k multiply.
        let inverse = invert_matrix(submatrix)?;

        let mut payload = vec![0u8; k * shard_size];
        for b in 0..shard_size {
            for (i, inv_row) in inverse.iter().enumerate() {
                let mut acc = 0u8;
                for (j, &coef) in inv_row.iter().enumerate() {
                    if coef == 0 {
                        continue;
                    }
                    acc ^= gf256::mul(coef, chosen[j][b]);
                }
                payload[i * shard_size + b] = acc;
            }
        }

        Ok(payload)
    }
}

// =============================================================================
// Matrix Construction
// =============================================================================

/// Build the systematic `(k+m) × k` encoding matrix: a Vandermonde matrix
/// `V[r][c] = (r+1)^c` post-multiplied by the inverse of its top `k × k`
/// square. The top `k` rows come out as the identity, and any `k` rows of
/// the result stay invertible because any `k` rows of `V` form a square
/// Vandermonde matrix with distinct evaluation points.
fn build_systematic_matrix(k: usize, m: usize) -> Result<Vec<Vec<u8>>> {
    let rows = k + m;
    let mut vander = vec![vec![0u8; k]; rows];
    for (r, row) in vander.iter_mut().enumerate() {
        let x = (r + 1) as u8;
        let mut v = 1u8;
        for cell in row.iter_mut() {
            *cell = v;
            v = gf256::mul(v, x);
        }
    }

    let top: Vec<Vec<u8>> = vander[..k].to_vec();
    let top_inv = invert_matrix(top)?;

    Ok(matrix_multiply(&vander, &top_inv))
}

/// Gauss-Jordan inversion in GF(2⁸) with row-swap pivoting.
fn invert_matrix(mut a: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>> {
    let n = a.len();
    let mut inv: Vec<Vec<u8>> = (0..n)
        .map(|i| {
            let mut row = vec![0u8; n];
            row[i] = 1;
            row
        })
        .collect();

    for col in 0..n {
        if a[col][col] == 0 {
            let pivot = (col + 1..n).find(|&r| a[r][col] != 0).ok_or_else(|| {
                Error::DecodeFailed(format!("singular matrix at column {}", col))
            })?;
            a.swap(col, pivot);
            inv.swap(col, pivot);
        }

        let scale = gf256::inv(a[col][col]);
        for c in 0..n {
            a[col][c] = gf256::mul(a[col][c], scale);
            inv[col][c] = gf256::mul(inv[col][c], scale);
        }

        for r in 0..n {
            if r == col || a[r][col] == 0 {
                continue;
            }
            let factor = a[r][col];
            for c in 0..n {
                let av = gf256::mul(factor, a[col][c]);
                let iv = gf256::mul(factor, inv[col][c]);
                a[r][c] ^= av;
                inv[r][c] ^= iv;
            }
        }
    }

    Ok(inv)
}

fn matrix_multiply(a: &[Vec<u8>], b: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let rows = a.len();
    let inner = b.len();
    let cols = b[0].len();

    let mut out = vec![vec![0u8; cols]; rows];
    for r in 0..rows {
        for c in 0..cols {
            let mut acc = 0u8;
            for i in 0..inner {
                acc ^= gf256::mul(a[r][i], b[i][c]);
            }
            out[r][c] = acc;
        }
    }
    out
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn as_present(shards: Vec<Vec<u8>>) -> Vec<Option<Vec<u8>>> {
        shards.into_iter().map(Some).collect()
    }

    #[test]
    fn test_invalid_geometry() {
        assert!(RsCodec::new(0, 1).is_err());
        assert!(RsCodec::new(1, 0).is_err());
        assert!(RsCodec::new(200, 56).is_err());
        assert!(RsCodec::new(251, 4).is_ok());
    }

    #[test]
    fn test_top_rows_are_identity() {
        let codec = RsCodec::new(4, 2).unwrap();
        for r in 0..4 {
            for c in 0..4 {
                let expected = if r == c { 1 } else { 0 };
                assert_eq!(codec.matrix[r][c], expected, "matrix[{r}][{c}]");
            }
        }
    }

    #[test]
    fn test_systematic_layout() {
        let codec = RsCodec::new(2, 1).unwrap();
        let shards = codec.encode(b"hello").unwrap();
        assert_eq!(shards.len(), 3);

        // Concatenated data shards = header ++ plaintext ++ padding.
        let mut joined = Vec::new();
        joined.extend_from_slice(&shards[0]);
        joined.extend_from_slice(&shards[1]);
        assert_eq!(&joined[..HEADER_LEN], &5u64.to_le_bytes());
        assert_eq!(&joined[HEADER_LEN..HEADER_LEN + 5], b"hello");
    }

    #[test]
    fn test_equal_shard_lengths() {
        let codec = RsCodec::new(5, 3).unwrap();
        let shards = codec.encode(&[0xab; 1234]).unwrap();
        let len = shards[0].len();
        assert!(shards.iter().all(|s| s.len() == len));
    }

    #[test]
    fn test_roundtrip_no_loss() {
        let codec = RsCodec::new(4, 2).unwrap();
        let data: Vec<u8> = (0..10_000).map(|i| (i * 31) as u8).collect();

        let shards = codec.encode(&data).unwrap();
        let recovered = codec.decode(&as_present(shards)).unwrap();
        assert_eq!(recovered, data);
    }

    #[test]
    fn test_roundtrip_empty_input() {
        let codec = RsCodec::new(3, 2).unwrap();
        let shards = codec.encode(&[]).unwrap();
        let recovered = codec.decode(&as_present(shards)).unwrap();
        assert!(recovered.is_empty());
    }

    #[test]
    fn test_recovers_without_shard_zero() {
        let codec = RsCodec::new(2, 1).unwrap();
        let data = b"the header must survive losing shard zero".to_vec();

        let mut shards = as_present(codec.encode(&data).unwrap());
        shards[0] = None;

        let recovered = codec.decode(&shards).unwrap();
        assert_eq!(recovered, data);
    }

    #[test]
    fn test_recovers_from_any_m_losses() {
        let codec = RsCodec::new(4, 2).unwrap();
        let data: Vec<u8> = (0..4096).map(|i| (i ^ (i >> 3)) as u8).collect();
        let encoded = codec.encode(&data).unwrap();

        for a in 0..6 {
            for b in (a + 1)..6 {
                let mut shards = as_present(encoded.clone());
                shards[a] = None;
                shards[b] = None;
                let recovered = codec.decode(&shards).unwrap();
                assert_eq!(recovered, data, "erasing shards {a} and {b}");
            }
        }
    }

    #[test]
    fn test_insufficient_shards() {
        let codec = RsCodec::new(2, 1).unwrap();
        let mut shards = as_present(codec.encode(b"x").unwrap());
        shards[0] = None;
        shards[2] = None;

        match codec.decode(&shards) {
            Err(Error::InsufficientShards {
                available,
                required,
            }) => {
                assert_eq!(available, 1);
                assert_eq!(required, 2);
            }
            other => panic!("expected InsufficientShards, got {:?}", other),
        }
    }

    #[test]
    fn test_single_data_shard_geometry() {
        let codec = RsCodec::new(1, 2).unwrap();
        let data = b"k equals one".to_vec();
        let encoded = codec.encode(&data).unwrap();

        // Only a parity shard left.
        let mut shards = as_present(encoded);
        shards[0] = None;
        shards[1] = None;

        let recovered = codec.decode(&shards).unwrap();
        assert_eq!(recovered, data);
    }

    #[test]
    fn test_corrupt_header_detected() {
        let codec = RsCodec::new(2, 1).unwrap();
        let mut shards = codec.encode(b"hello").unwrap();
        // Claim a length far past the payload.
        shards[0][..HEADER_LEN].copy_from_slice(&u64::MAX.to_le_bytes());

        match codec.decode(&as_present(shards)) {
            Err(Error::CorruptHeader(_)) => {}
            other => panic!("expected CorruptHeader, got {:?}", other),
        }
    }

    #[test]
    fn test_unequal_shard_lengths_rejected() {
        let codec = RsCodec::new(2, 1).unwrap();
        let mut shards = codec.encode(b"hello world").unwrap();
        shards[1].pop();

        match codec.decode(&as_present(shards)) {
            Err(Error::CorruptShard(_)) => {}
            other => panic!("expected CorruptShard, got {:?}", other),
        }
    }

    #[test]
    fn test_wrong_shard_count_rejected() {
        let codec = RsCodec::new(2, 1).unwrap();
        let shards = as_present(codec.encode(b"abc").unwrap());
        assert!(codec.decode(&shards[..2]).is_err());
    }

    #[test]
    fn test_encoding_deterministic() {
        let codec = RsCodec::new(3, 2).unwrap();
        let data = vec![0x5a; 999];
        assert_eq!(codec.encode(&data).unwrap(), codec.encode(&data).unwrap());
    }
}

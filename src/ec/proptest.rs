//! Property-Based Tests for the Stripe Codec
//!
//! Systematically verifies the codec across geometries, payload sizes and
//! erasure patterns:
//!
//! 1. **Roundtrip**: decode(encode(d)) == d with no losses
//! 2. **m-failure tolerance**: any erasure subset of size ≤ m recovers
//! 3. **(m+1)-failure rejection**: any subset of size > m is refused
//! 4. **Determinism**: independent codec instances agree byte-for-byte

#![cfg(test)]

use proptest::prelude::*;

use super::coder::{RsCodec, HEADER_LEN};
use crate::error::Error;

// =============================================================================
// Strategies
// =============================================================================

/// Geometries across the full supported k range with small parity counts.
fn geometry_strategy() -> impl Strategy<Value = (usize, usize)> {
    (1usize..=16, 1usize..=4)
}

fn data_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..4096)
}

/// A set of shard indices to erase, drawn from `0..total`, at most `max`.
fn erasure_strategy(total: usize, max: usize) -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0..total, 0..=max).prop_map(|mut v| {
        v.sort_unstable();
        v.dedup();
        v
    })
}

// =============================================================================
// Roundtrip Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_roundtrip_no_loss(
        (k, m) in geometry_strategy(),
        data in data_strategy(),
    ) {
        let codec = RsCodec::new(k, m).unwrap();
        let shards = codec.encode(&data).unwrap();
        prop_assert_eq!(shards.len(), k + m);

        let present: Vec<Option<Vec<u8>>> = shards.into_iter().map(Some).collect();
        let recovered = codec.decode(&present).unwrap();
        prop_assert_eq!(recovered, data);
    }

    #[test]
    fn prop_m_failure_tolerance(
        (k, m) in geometry_strategy(),
        data in data_strategy(),
        seed in any::<u64>(),
    ) {
        let codec = RsCodec::new(k, m).unwrap();
        let encoded = codec.encode(&data).unwrap();

        // Derive an erasure subset of size ≤ m from the seed.
        let total = k + m;
        let mut shards: Vec<Option<Vec<u8>>> = encoded.into_iter().map(Some).collect();
        let mut erased = 0;
        let mut s = seed;
        while erased < m {
            let idx = (s % total as u64) as usize;
            s = s.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            if shards[idx].is_some() {
                shards[idx] = None;
                erased += 1;
            }
        }

        let recovered = codec.decode(&shards).unwrap();
        prop_assert_eq!(recovered, data);
    }

    #[test]
    fn prop_header_survives_leading_erasures(
        (k, m) in (1usize..=8, 1usize..=4),
        data in prop::collection::vec(any::<u8>(), 0..1024),
    ) {
        // Erase the first min(m, k+m-k) shards: the ones carrying the header.
        let codec = RsCodec::new(k, m).unwrap();
        let mut shards: Vec<Option<Vec<u8>>> =
            codec.encode(&data).unwrap().into_iter().map(Some).collect();
        for shard in shards.iter_mut().take(m) {
            *shard = None;
        }

        let recovered = codec.decode(&shards).unwrap();
        prop_assert_eq!(recovered, data);
    }
}

// =============================================================================
// Rejection Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_too_many_erasures_rejected(
        (k, m) in (2usize..=8, 1usize..=3),
        data in prop::collection::vec(any::<u8>(), 1..512),
        extra in erasure_strategy(11, 11),
    ) {
        let codec = RsCodec::new(k, m).unwrap();
        let mut shards: Vec<Option<Vec<u8>>> =
            codec.encode(&data).unwrap().into_iter().map(Some).collect();

        // Erase m+1 distinct shards; `extra` only perturbs which ones.
        let total = k + m;
        let start = extra.first().copied().unwrap_or(0) % total;
        let mut erased = 0;
        let mut idx = start;
        while erased <= m {
            if shards[idx].is_some() {
                shards[idx] = None;
                erased += 1;
            }
            idx = (idx + 1) % total;
        }

        let result = codec.decode(&shards);
        prop_assert!(
            matches!(result, Err(Error::InsufficientShards { .. })),
            "expected Err(Error::InsufficientShards {{ .. }})"
        );
        if let Err(Error::InsufficientShards { available, required }) = result {
            prop_assert_eq!(required, k);
            prop_assert!(available < k);
        }
    }
}

// =============================================================================
// Structural Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_data_shards_carry_payload(
        (k, m) in geometry_strategy(),
        data in prop::collection::vec(any::<u8>(), 0..2048),
    ) {
        let codec = RsCodec::new(k, m).unwrap();
        let shards = codec.encode(&data).unwrap();

        let mut joined = Vec::new();
        for shard in shards.iter().take(k) {
            joined.extend_from_slice(shard);
        }

        prop_assert_eq!(&joined[..HEADER_LEN], &(data.len() as u64).to_le_bytes());
        prop_assert_eq!(&joined[HEADER_LEN..HEADER_LEN + data.len()], data.as_slice());
        // Everything past the plaintext is zero padding.
        prop_assert!(joined[HEADER_LEN + data.len()..].iter().all(|&b| b == 0));
    }

    #[test]
    fn prop_codec_instances_agree(
        (k, m) in (1usize..=8, 1usize..=4),
        data in prop::collection::vec(any::<u8>(), 0..1024),
    ) {
        let a = RsCodec::new(k, m).unwrap();
        let b = RsCodec::new(k, m).unwrap();
        prop_assert_eq!(a.encode(&data).unwrap(), b.encode(&data).unwrap());
    }
}

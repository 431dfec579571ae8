//! Property-Based Tests for the quota cache
//!
//! Codec round-trips over arbitrary JSON and limit enforcement over
//! arbitrary write sequences.

use proptest::prelude::*;
use serde_json::Value;
use std::sync::Arc;

use crate::cache::ManualClock;
use crate::config::QuotaConfig;
use crate::quota::codec::{self, CompressionAlgorithm};
use crate::quota::storage::MemoryQuotaStorage;
use crate::quota::QuotaCompressedCache;

// == Test Configuration ==
const TEST_QUOTA_BYTES: usize = 1024 * 1024;

fn new_cache(config: QuotaConfig) -> (QuotaCompressedCache, ManualClock) {
    let clock = ManualClock::new(1_700_000_000_000);
    let cache = QuotaCompressedCache::open_with_clock(
        Arc::new(MemoryQuotaStorage::new(TEST_QUOTA_BYTES)),
        config,
        Arc::new(clock.clone()),
    );
    (cache, clock)
}

// == Strategies ==
/// Strings biased towards dictionary words and the token marker
fn tricky_string_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-zA-Z0-9 ]{0,24}",
        Just("\"symbol\":".to_string()),
        Just("\u{1}".to_string()),
        Just("\u{1}a\"timestamp\"".to_string()),
        "(symbol|timestamp|price|volume|\u{1}|:|\"|,){0,12}",
    ]
}

fn json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        tricky_string_strategy().prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 48, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map(tricky_string_strategy(), inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn algorithm_strategy() -> impl Strategy<Value = CompressionAlgorithm> {
    prop_oneof![
        Just(CompressionAlgorithm::Dictionary),
        Just(CompressionAlgorithm::Lz4),
    ]
}

fn valid_key_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9:]{1,12}".prop_map(|s| s)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Property 1: Codec Round-Trip
    // Whatever the codec emits decodes back to the exact input text.
    #[test]
    fn prop_codec_roundtrip(value in json_strategy(), algorithm in algorithm_strategy()) {
        let text = value.to_string();
        if let Some(encoded) = codec::encode(algorithm, &text) {
            prop_assert_eq!(codec::decode(algorithm, &encoded).unwrap(), text);
        }
    }

    // Property 2: Cache Round-Trip
    // With the threshold at zero every value is offered to the codec and
    // still reads back unchanged.
    #[test]
    fn prop_cache_roundtrip(
        key in valid_key_strategy(),
        value in json_strategy(),
        algorithm in algorithm_strategy(),
    ) {
        let (mut cache, _clock) = new_cache(QuotaConfig {
            compression_threshold_bytes: 0,
            compression_algorithm: algorithm,
            ..QuotaConfig::default()
        });

        prop_assert!(cache.set(&key, &value, None));
        prop_assert_eq!(cache.get::<Value>(&key), Some(value));
    }

    // Property 3: Limits Hold
    // After every write the entry count and byte total stay within the
    // configured caps.
    #[test]
    fn prop_limits_hold_after_every_set(
        max_entries in 1usize..8,
        max_memory_bytes in 64usize..1024,
        writes in prop::collection::vec((valid_key_strategy(), "[a-z]{0,200}"), 1..60),
        compression_enabled in any::<bool>(),
    ) {
        let (mut cache, clock) = new_cache(QuotaConfig {
            max_entries,
            max_memory_bytes,
            compression_enabled,
            compression_threshold_bytes: 0,
            ..QuotaConfig::default()
        });

        for (key, body) in writes {
            cache.set(&key, &body, None);
            clock.advance(1);

            let stats = cache.stats().cache;
            prop_assert!(stats.current_entries <= max_entries);
            prop_assert!(stats.memory_usage <= max_memory_bytes);
        }
    }
}

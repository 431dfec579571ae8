//! Size estimation for cached values.

use serde::Serialize;

use crate::error::{CacheError, Result};

/// Size assigned to an entry whose value could not be serialized.
pub const FALLBACK_ENTRY_SIZE: usize = 1024;

/// Estimates the stored size of `key` + `value` from its JSON encoding.
pub fn estimate_entry_size<V: Serialize + ?Sized>(key: &str, value: &V) -> Result<usize> {
    let encoded = serde_json::to_vec(value)
        .map_err(|e| CacheError::Serialization(format!("cannot size '{}': {}", key, e)))?;
    Ok(key.len() + encoded.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_size_counts_key_and_json() {
        // "\"abc\"" is 5 bytes
        assert_eq!(estimate_entry_size("key", "abc").unwrap(), 8);
        assert_eq!(estimate_entry_size("k", &42u32).unwrap(), 3);
    }

    #[test]
    fn test_unserializable_value_fails() {
        let mut map = HashMap::new();
        map.insert((1, 2), "tuple keys are not valid JSON object keys");

        let err = estimate_entry_size("k", &map).unwrap_err();
        assert!(matches!(err, CacheError::Serialization(_)));
    }
}

//! Durable record envelope.

use serde::{Deserialize, Serialize};

/// Category used for keys without a `<category>:` prefix.
pub const DEFAULT_CATEGORY: &str = "general";

/// One cache entry as persisted by a [`DurableStore`](super::DurableStore).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DurableRecord {
    pub key: String,
    /// Serialized JSON of the cached value
    pub payload: String,
    pub created_at: u64,
    pub last_accessed_at: u64,
    pub ttl_ms: u64,
    pub access_count: u64,
    pub size_bytes: usize,
    pub category: String,
    pub symbol: Option<String>,
}

impl DurableRecord {
    pub fn new(key: impl Into<String>, payload: String, now: u64, ttl_ms: u64) -> Self {
        let key = key.into();
        let (category, symbol) = classify_key(&key);
        Self {
            size_bytes: key.len() + payload.len(),
            key,
            payload,
            created_at: now,
            last_accessed_at: now,
            ttl_ms,
            access_count: 0,
            category,
            symbol,
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.created_at) > self.ttl_ms
    }

    pub fn touch(&mut self, now: u64) {
        self.access_count += 1;
        self.last_accessed_at = now;
    }
}

/// A stored record that could not be decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct CorruptRecord {
    pub key: String,
    pub reason: String,
}

/// Splits `<category>:<symbol>[:...]` keys.
pub fn classify_key(key: &str) -> (String, Option<String>) {
    let mut parts = key.splitn(3, ':');
    match (parts.next(), parts.next()) {
        (Some(category), Some(symbol)) if !category.is_empty() => (
            category.to_string(),
            (!symbol.is_empty()).then(|| symbol.to_string()),
        ),
        _ => (DEFAULT_CATEGORY.to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_key() {
        assert_eq!(
            classify_key("quote:AAPL"),
            ("quote".to_string(), Some("AAPL".to_string()))
        );
        assert_eq!(
            classify_key("candles:MSFT:1d"),
            ("candles".to_string(), Some("MSFT".to_string()))
        );
        assert_eq!(classify_key("watchlist"), ("general".to_string(), None));
        assert_eq!(classify_key(":AAPL"), ("general".to_string(), None));
        assert_eq!(classify_key("news:"), ("news".to_string(), None));
    }

    #[test]
    fn test_new_record() {
        let record = DurableRecord::new("quote:AAPL", "{\"p\":1}".to_string(), 100, 50);

        assert_eq!(record.size_bytes, 10 + 7);
        assert_eq!(record.category, "quote");
        assert!(!record.is_expired(150));
        assert!(record.is_expired(151));
    }
}

//! Payload Codecs
//!
//! Reversible transforms applied to serialized payloads before they are
//! written to the quota-limited medium. A transform is only kept when its
//! output is strictly smaller than the input.
//!
//! - `Dictionary` swaps well-known market data field names (`"symbol":`,
//!   `"close":`, ...) for a two-character token. Cheap and effective on
//!   quote and candle arrays, useless on free text.
//! - `Lz4` applies LZ4 block compression and base64-encodes the result, since
//!   the medium stores text.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CacheError, Result};

/// Marks the start of a dictionary token. JSON text never contains it raw.
const TOKEN_MARKER: char = '\u{1}';

/// Alphabet of token indices; one char per dictionary slot.
const TOKEN_INDEX: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Field names substituted by the dictionary codec, most frequent first.
const DICTIONARY: &[&str] = &[
    "symbol",
    "timestamp",
    "date",
    "open",
    "high",
    "low",
    "close",
    "adjClose",
    "volume",
    "price",
    "change",
    "changePercent",
    "previousClose",
    "marketCap",
    "currency",
    "exchange",
    "dividendYield",
    "peRatio",
    "eps",
    "beta",
    "bid",
    "ask",
    "dayHigh",
    "dayLow",
    "yearHigh",
    "yearLow",
    "avgVolume",
    "name",
    "type",
    "interval",
    "data",
    "value",
];

/// Upper bound on a decoded LZ4 payload; larger size headers are treated as corrupt.
const MAX_DECODED_BYTES: usize = 64 * 1024 * 1024;

// == Algorithm ==
/// Stored representation of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// Raw JSON text
    None,
    /// Field-name token substitution
    #[default]
    Dictionary,
    /// LZ4 block + base64
    Lz4,
}

impl CompressionAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Dictionary => "dictionary",
            CompressionAlgorithm::Lz4 => "lz4",
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CompressionAlgorithm {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(CompressionAlgorithm::None),
            "dictionary" | "dict" => Ok(CompressionAlgorithm::Dictionary),
            "lz4" => Ok(CompressionAlgorithm::Lz4),
            other => Err(CacheError::InvalidRequest(format!(
                "unknown compression algorithm '{}'",
                other
            ))),
        }
    }
}

// == Encode ==
/// Applies `algorithm` to `text`. Returns `None` when the transform does not
/// apply or would not shrink the payload.
pub fn encode(algorithm: CompressionAlgorithm, text: &str) -> Option<String> {
    let encoded = match algorithm {
        CompressionAlgorithm::None => return None,
        CompressionAlgorithm::Dictionary => dictionary_encode(text)?,
        CompressionAlgorithm::Lz4 => lz4_encode(text)?,
    };

    if encoded.len() < text.len() {
        debug!(
            "{} encoded: {} -> {} bytes",
            algorithm,
            text.len(),
            encoded.len()
        );
        Some(encoded)
    } else {
        None
    }
}

// == Decode ==
/// Reverses [`encode`].
pub fn decode(algorithm: CompressionAlgorithm, payload: &str) -> Result<String> {
    match algorithm {
        CompressionAlgorithm::None => Ok(payload.to_string()),
        CompressionAlgorithm::Dictionary => dictionary_decode(payload),
        CompressionAlgorithm::Lz4 => lz4_decode(payload),
    }
}

/// `compressed / original`, 1.0 for empty input.
pub fn compression_ratio(original: usize, compressed: usize) -> f64 {
    if original == 0 {
        return 1.0;
    }
    compressed as f64 / original as f64
}

// == Dictionary ==
fn dictionary_encode(text: &str) -> Option<String> {
    if text.contains(TOKEN_MARKER) {
        return None;
    }

    let mut out = text.to_string();
    for (i, field) in DICTIONARY.iter().enumerate() {
        let pattern = format!("\"{}\":", field);
        if out.contains(&pattern) {
            let token = format!("{}{}", TOKEN_MARKER, TOKEN_INDEX[i] as char);
            out = out.replace(&pattern, &token);
        }
    }
    Some(out)
}

fn dictionary_decode(payload: &str) -> Result<String> {
    let mut out = String::with_capacity(payload.len() * 2);
    let mut chars = payload.chars();

    while let Some(c) = chars.next() {
        if c != TOKEN_MARKER {
            out.push(c);
            continue;
        }
        let slot = chars
            .next()
            .and_then(|t| TOKEN_INDEX.iter().position(|&b| b as char == t))
            .and_then(|i| DICTIONARY.get(i))
            .ok_or_else(|| CacheError::Decode("invalid dictionary token".to_string()))?;
        out.push('"');
        out.push_str(slot);
        out.push_str("\":");
    }
    Ok(out)
}

// == LZ4 ==
fn lz4_encode(text: &str) -> Option<String> {
    match lz4::block::compress(text.as_bytes(), None, true) {
        Ok(compressed) => Some(STANDARD.encode(compressed)),
        Err(e) => {
            debug!("LZ4 compression skipped: {}", e);
            None
        }
    }
}

fn lz4_decode(payload: &str) -> Result<String> {
    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| CacheError::Decode(format!("invalid base64: {}", e)))?;

    let declared = bytes
        .get(..4)
        .map(|h| i32::from_le_bytes([h[0], h[1], h[2], h[3]]))
        .ok_or_else(|| CacheError::Decode("truncated lz4 header".to_string()))?;
    if declared < 0 || declared as usize > MAX_DECODED_BYTES {
        return Err(CacheError::Decode(format!(
            "implausible lz4 size header: {}",
            declared
        )));
    }

    let raw = lz4::block::decompress(&bytes, None)
        .map_err(|e| CacheError::Decode(format!("lz4: {}", e)))?;
    String::from_utf8(raw).map_err(|e| CacheError::Decode(format!("utf-8: {}", e)))
}

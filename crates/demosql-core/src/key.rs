//! Stable cache key derivation.
//!
//! A key is the SHA-256 of `"{field}:{value}"` with the value lowercased and
//! trimmed, hex-encoded. The field is part of the hashed input, so equal raw
//! values under different fields can never share a key.

use sha2::{Digest, Sha256};

/// Content-derived address of one cached mapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a `(raw value, field)` pair.
    ///
    /// Deterministic, and insensitive to case and surrounding whitespace of
    /// the raw value. Total: any string input works, including empty.
    pub fn derive(raw_value: &str, field: &str) -> Self {
        let folded = raw_value.trim().to_lowercase();
        let mut hasher = Sha256::new();
        hasher.update(field.as_bytes());
        hasher.update(b":");
        hasher.update(folded.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Wrap an already-derived hex key read back from storage.
    pub(crate) fn from_stored(hex: String) -> Self {
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

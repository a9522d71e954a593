//! Self-validating value objects: content hashes, trace ids, cursors.
//!
//! Each type offers a validated constructor (`parse`) and an unchecked one
//! (`new_unchecked`) for trusted callers such as deserialization of data that
//! is verified elsewhere.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{AtomicError, Result};

/// A 64-character hex content hash.
///
/// The original casing is preserved; equality is case-insensitive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Validate and wrap a 64-char hex string.
    pub fn parse(input: impl Into<String>) -> Result<Self> {
        let value = input.into();
        if value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(value))
        } else {
            Err(AtomicError::InvalidHash { value })
        }
    }

    /// Wrap without validation — for trusted callers only.
    #[must_use]
    pub fn new_unchecked(input: impl Into<String>) -> Self {
        Self(input.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Normalized lowercase form, the canonical rendering on write paths.
    #[must_use]
    pub fn to_lowercase(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl PartialEq for ContentHash {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for ContentHash {}

impl std::hash::Hash for ContentHash {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::hash::Hash::hash(&self.0.to_ascii_lowercase(), state);
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ContentHash {
    type Err = AtomicError;
    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// An RFC 4122 UUID string that groups related atomics.
///
/// Validation is case-insensitive over the 8-4-4-4-12 hex pattern, but
/// equality is byte-exact: two ids differing only in case are distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceId(String);

impl TraceId {
    /// Validate and wrap a UUID string.
    pub fn parse(input: impl Into<String>) -> Result<Self> {
        let value = input.into();
        if Self::is_valid(&value) {
            Ok(Self(value))
        } else {
            Err(AtomicError::InvalidTraceId { value })
        }
    }

    /// Wrap without validation — for trusted callers only.
    #[must_use]
    pub fn new_unchecked(input: impl Into<String>) -> Self {
        Self(input.into())
    }

    /// Generate a fresh v4 trace id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_valid(value: &str) -> bool {
        let segments: Vec<&str> = value.split('-').collect();
        if segments.len() != 5 {
            return false;
        }
        const LENGTHS: [usize; 5] = [8, 4, 4, 4, 12];
        segments
            .iter()
            .zip(LENGTHS)
            .all(|(seg, len)| seg.len() == len && seg.bytes().all(|b| b.is_ascii_hexdigit()))
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for TraceId {
    type Err = AtomicError;
    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// A 1-based line position in a ledger file.
///
/// External representation is a decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Cursor(u64);

impl Cursor {
    #[must_use]
    pub fn new(position: u64) -> Self {
        Self(position)
    }

    /// Parse the decimal string form.
    pub fn parse(input: &str) -> Result<Self> {
        input
            .parse::<u64>()
            .map(Self)
            .map_err(|_| AtomicError::InvalidCursor {
                value: input.to_string(),
            })
    }

    #[must_use]
    pub fn to_number(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Cursor {
    type Err = AtomicError;
    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Cursor {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Cursor {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_accepts_both_cases() {
        let lower = ContentHash::parse("a".repeat(64)).unwrap();
        let upper = ContentHash::parse("A".repeat(64)).unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn test_hash_rejects_wrong_length_and_non_hex() {
        assert!(ContentHash::parse("abc").is_err());
        assert!(ContentHash::parse("g".repeat(64)).is_err());
    }

    #[test]
    fn test_hash_error_code() {
        let err = ContentHash::parse("nope").unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidHash);
    }

    #[test]
    fn test_trace_id_pattern() {
        assert!(TraceId::parse("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(TraceId::parse("550E8400-E29B-41D4-A716-446655440000").is_ok());
        assert!(TraceId::parse("550e8400-e29b-41d4-a716").is_err());
        assert!(TraceId::parse("zzze8400-e29b-41d4-a716-446655440000").is_err());
    }

    #[test]
    fn test_trace_id_equality_is_byte_exact() {
        let lower = TraceId::parse("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let upper = TraceId::parse("550E8400-E29B-41D4-A716-446655440000").unwrap();
        assert_ne!(lower, upper);
    }

    #[test]
    fn test_generated_trace_ids_are_valid_and_unique() {
        let a = TraceId::generate();
        let b = TraceId::generate();
        assert!(TraceId::parse(a.as_str()).is_ok());
        assert_ne!(a, b);
    }

    #[test]
    fn test_cursor_roundtrip() {
        let c = Cursor::parse("42").unwrap();
        assert_eq!(c.to_number(), 42);
        assert_eq!(c.to_string(), "42");
    }

    #[test]
    fn test_cursor_invalid_parse() {
        let err = Cursor::parse("-1").unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidCursor);
        assert!(Cursor::parse("abc").is_err());
    }

    #[test]
    fn test_cursor_serializes_as_decimal_string() {
        let json = serde_json::to_string(&Cursor::new(7)).unwrap();
        assert_eq!(json, "\"7\"");
        let back: Cursor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Cursor::new(7));
    }
}

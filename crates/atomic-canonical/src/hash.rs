//! Domain-separated content hashing.
//!
//! `hash = BLAKE3-derive-key(context = "JsonAtomic/v1", canonical bytes)`
//! over the atomic with its signing fields removed. The context string is a
//! fixed literal; changing it bumps the ledger version.

use serde_json::Value;

use atomic_core::atomic::Atomic;
use atomic_core::error::Result;
use atomic_core::ids::ContentHash;

use crate::canon::canonicalize;

/// Domain-separation context mixed into every content hash.
pub const HASH_CONTEXT: &str = "JsonAtomic/v1";

/// Fields excluded from the hashing pre-image.
pub const EXCLUDED_FIELDS: [&str; 3] = ["hash", "curr_hash", "signature"];

/// Copy of `value` with the signing fields removed from the top level.
#[must_use]
pub fn strip_signing_fields(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut stripped = map.clone();
            for field in EXCLUDED_FIELDS {
                stripped.remove(field);
            }
            Value::Object(stripped)
        }
        other => other.clone(),
    }
}

/// Hash an arbitrary value: strip, canonicalize, derive, hex.
pub fn content_hash(value: &Value) -> Result<String> {
    let stripped = strip_signing_fields(value);
    let bytes = canonicalize(&stripped)?;
    Ok(hex::encode(blake3::derive_key(HASH_CONTEXT, &bytes)))
}

/// Content hash of an atomic as a validated value object.
pub fn atomic_hash(atomic: &Atomic) -> Result<ContentHash> {
    let digest = content_hash(&atomic.to_value())?;
    Ok(ContentHash::new_unchecked(digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomic_core::atomic::{AtomicBuilder, EntityType};
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "schema_version": "1.1.0",
            "entity_type": "file",
            "this": "test",
            "did": {"actor": "user", "action": "create"},
            "metadata": {
                "trace_id": "550e8400-e29b-41d4-a716-446655440000",
                "created_at": "2024-01-01T00:00:00Z",
            },
        })
    }

    #[test]
    fn test_hash_is_64_lowercase_hex_and_stable() {
        let h1 = content_hash(&sample()).unwrap();
        let h2 = content_hash(&sample()).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert!(h1.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
    }

    #[test]
    fn test_signing_fields_do_not_affect_hash() {
        let bare = content_hash(&sample()).unwrap();
        let mut decorated = sample();
        decorated["hash"] = json!("ab".repeat(32));
        decorated["curr_hash"] = json!("cd".repeat(32));
        decorated["signature"] = json!({"alg": "Ed25519", "sig": "ef".repeat(64)});
        assert_eq!(content_hash(&decorated).unwrap(), bare);
    }

    #[test]
    fn test_any_other_field_changes_hash() {
        let bare = content_hash(&sample()).unwrap();
        let mut mutated = sample();
        mutated["this"] = json!("other");
        assert_ne!(content_hash(&mutated).unwrap(), bare);
    }

    #[test]
    fn test_nested_signing_field_names_are_hashed() {
        // Only top-level signing fields are excluded.
        let bare = content_hash(&sample()).unwrap();
        let mut nested = sample();
        nested["payload"] = json!({"hash": "zz"});
        assert_ne!(content_hash(&nested).unwrap(), bare);
    }

    #[test]
    fn test_atomic_hash_matches_value_hash() {
        let atomic = AtomicBuilder::new(EntityType::Test, "subject", "ci", "run").build();
        let via_atomic = atomic_hash(&atomic).unwrap();
        let via_value = content_hash(&atomic.to_value()).unwrap();
        assert_eq!(via_atomic.as_str(), via_value);
    }
}

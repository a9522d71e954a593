//! `atomic-canonical` — Deterministic serialization and content hashing.
//!
//! # Design
//! - Canonical bytes are the hashing pre-image, never the storage format
//! - BLAKE3 in derive-key mode provides domain separation
//! - Callers needing cross-ecosystem stability should prefer integers and
//!   strings over floats

pub mod canon;
pub mod hash;

pub use canon::canonicalize;
pub use hash::{atomic_hash, content_hash, strip_signing_fields, EXCLUDED_FIELDS, HASH_CONTEXT};

//! `atomic-core` — Shared kernel for the atomic ledger.
//!
//! This crate owns all domain types used across the ledger crates.
//! No business logic lives here — only pure types and errors.
//!
//! # Module Map
//! - [`ids`] — Value objects (ContentHash, TraceId, Cursor)
//! - [`error`] — AtomicError enum + ErrorEnvelope + stable codes
//! - [`atomic`] — Atomic record, builder, entity types, signature envelope

pub mod atomic;
pub mod error;
pub mod ids;

// Re-export most commonly used items at crate root.
pub use atomic::{Atomic, AtomicBuilder, EntityType, SignatureEnvelope, SCHEMA_VERSION, SIGNATURE_ALG};
pub use error::{AtomicError, ErrorCode, ErrorEnvelope, Result};
pub use ids::{ContentHash, Cursor, TraceId};

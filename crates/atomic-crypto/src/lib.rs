//! `atomic-crypto` — Ed25519 signing and verification for atomics.
//!
//! # Design
//! - Detached signatures over the hex content hash (not the raw bytes)
//! - Structured `{alg, public_key, sig, signed_at}` envelope on write
//! - Legacy bare-hex signatures accepted read-only with an external key

pub mod keys;
pub mod signer;

pub use keys::{
    generate_keypair, signing_key_from_hex, signing_key_hex, verifying_key_from_hex,
    verifying_key_hex,
};
pub use signer::{sign, sign_at, verify};

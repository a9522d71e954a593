//! Detached signing and verification of atomics.
//!
//! The signature covers the UTF-8 bytes of the 64-char hex content hash, not
//! the canonical bytes. Verification additionally recomputes the hash, so
//! tampering with any hashed field breaks the signature path even when the
//! signature itself still matches the stored hash.

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde_json::Value;
use tracing::debug;

use atomic_core::atomic::{Atomic, SignatureEnvelope, SIGNATURE_ALG};
use atomic_core::error::{AtomicError, Result};
use atomic_canonical::atomic_hash;

use crate::keys::{decode_exact, verifying_key_from_hex, verifying_key_hex};

/// Hash and sign an atomic, stamping `signed_at` with the current time.
pub fn sign(atomic: &Atomic, sk: &SigningKey) -> Result<Atomic> {
    sign_at(atomic, sk, Utc::now())
}

/// Hash and sign an atomic with an explicit `signed_at` timestamp.
///
/// Any stale `hash`/`signature` fields on the input are discarded before
/// hashing. The returned atomic carries both the hash and the envelope.
pub fn sign_at(atomic: &Atomic, sk: &SigningKey, signed_at: DateTime<Utc>) -> Result<Atomic> {
    let mut signed = atomic.clone();
    signed.clear_signing_fields();

    let hash = atomic_hash(&signed)?;
    let signature: Signature = sk.sign(hash.as_str().as_bytes());
    let envelope = SignatureEnvelope {
        alg: SIGNATURE_ALG.into(),
        public_key: verifying_key_hex(&sk.verifying_key()),
        sig: hex::encode(signature.to_bytes()),
        signed_at,
    };
    signed.set_hash(&hash);
    signed.set_signature(&envelope);
    debug!(hash = %hash, "signed atomic");
    Ok(signed)
}

/// Verify an atomic's signature.
///
/// Requires both `hash` and `signature` to be present. `external_key`
/// overrides the envelope's embedded public key and is mandatory for the
/// legacy bare-hex signature form. Returns `Ok(false)` when the signature or
/// the recomputed hash does not match; structural problems are errors.
pub fn verify(atomic: &Atomic, external_key: Option<&VerifyingKey>) -> Result<bool> {
    let stored_hash = atomic
        .hash()
        .ok_or_else(|| AtomicError::InvalidSignatureFormat {
            reason: "atomic has no hash".into(),
        })?
        .to_string();
    let signature_field = atomic
        .signature()
        .ok_or_else(|| AtomicError::InvalidSignatureFormat {
            reason: "atomic has no signature".into(),
        })?;

    let (sig_bytes, key) = match signature_field {
        Value::Object(_) => {
            let envelope = SignatureEnvelope::from_value(signature_field)?;
            if envelope.alg != SIGNATURE_ALG {
                return Err(AtomicError::UnsupportedAlgorithm { alg: envelope.alg });
            }
            let sig_bytes = decode_exact::<64>(&envelope.sig, "signature")?;
            let key = match external_key {
                Some(key) => *key,
                None => verifying_key_from_hex(&envelope.public_key)?,
            };
            (sig_bytes, key)
        }
        // Legacy read-only form: bare hex signature, key supplied by caller.
        Value::String(raw) => {
            let sig_bytes = decode_exact::<64>(raw, "signature")?;
            let key = external_key.ok_or_else(|| AtomicError::SignatureError {
                reason: "legacy signature requires an external public key".into(),
            })?;
            (sig_bytes, *key)
        }
        _ => {
            return Err(AtomicError::InvalidSignatureFormat {
                reason: "signature must be an envelope object or hex string".into(),
            })
        }
    };

    // The stored hash must still match the content it claims to cover.
    let computed = atomic_hash(atomic)?;
    if !computed.as_str().eq_ignore_ascii_case(&stored_hash) {
        debug!(stored = %stored_hash, computed = %computed, "hash recomputation mismatch");
        return Ok(false);
    }

    let signature = Signature::from_bytes(&sig_bytes);
    Ok(key.verify(stored_hash.as_bytes(), &signature).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomic_core::atomic::{AtomicBuilder, EntityType};
    use atomic_core::ErrorCode;
    use serde_json::json;

    use crate::keys::{generate_keypair, signing_key_from_hex};

    fn unsigned() -> Atomic {
        Atomic::from_value(json!({
            "schema_version": "1.1.0",
            "entity_type": "file",
            "this": "test",
            "did": {"actor": "user", "action": "create"},
            "metadata": {
                "trace_id": "550e8400-e29b-41d4-a716-446655440000",
                "created_at": "2024-01-01T00:00:00Z",
            },
        }))
        .unwrap()
    }

    #[test]
    fn test_sign_then_verify_roundtrip() {
        let (sk, vk) = generate_keypair();
        let signed = sign(&unsigned(), &sk).unwrap();
        assert!(verify(&signed, Some(&vk)).unwrap());
        // Envelope's embedded key gives the same answer.
        assert!(verify(&signed, None).unwrap());
    }

    #[test]
    fn test_low_entropy_fixture_key() {
        let sk = signing_key_from_hex(&format!("{}01", "00".repeat(31))).unwrap();
        let signed = sign(&unsigned(), &sk).unwrap();
        assert!(verify(&signed, Some(&sk.verifying_key())).unwrap());

        let mut tampered = signed.clone();
        tampered.insert("this", json!("other"));
        assert!(!verify(&tampered, Some(&sk.verifying_key())).unwrap());
    }

    #[test]
    fn test_tampering_any_hashed_field_invalidates() {
        let (sk, vk) = generate_keypair();
        let signed = sign(&unsigned(), &sk).unwrap();
        for (field, value) in [
            ("entity_type", json!("law")),
            ("intent", json!("injected")),
            ("prev", json!("ab".repeat(32))),
        ] {
            let mut tampered = signed.clone();
            tampered.insert(field, value);
            assert!(!verify(&tampered, Some(&vk)).unwrap(), "field {field}");
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let (sk, _) = generate_keypair();
        let (_, other_vk) = generate_keypair();
        let signed = sign(&unsigned(), &sk).unwrap();
        assert!(!verify(&signed, Some(&other_vk)).unwrap());
    }

    #[test]
    fn test_unsupported_algorithm() {
        let (sk, vk) = generate_keypair();
        let mut signed = sign(&unsigned(), &sk).unwrap();
        let mut envelope = SignatureEnvelope::from_value(signed.signature().unwrap()).unwrap();
        envelope.alg = "RSA".into();
        signed.set_signature(&envelope);
        let err = verify(&signed, Some(&vk)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnsupportedAlgorithm);
    }

    #[test]
    fn test_legacy_bare_hex_signature() {
        let (sk, vk) = generate_keypair();
        let signed = sign(&unsigned(), &sk).unwrap();
        let envelope = SignatureEnvelope::from_value(signed.signature().unwrap()).unwrap();
        let mut legacy = signed.clone();
        legacy.insert("signature", json!(envelope.sig));

        assert!(verify(&legacy, Some(&vk)).unwrap());
        let err = verify(&legacy, None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SignatureError);
    }

    #[test]
    fn test_malformed_signature_shapes() {
        let (sk, vk) = generate_keypair();
        let signed = sign(&unsigned(), &sk).unwrap();

        let mut numeric = signed.clone();
        numeric.insert("signature", json!(42));
        let err = verify(&numeric, Some(&vk)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidSignatureFormat);

        let mut bad_hex = signed.clone();
        bad_hex.insert("signature", json!("zz".repeat(64)));
        let err = verify(&bad_hex, Some(&vk)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidSignatureFormat);
    }

    #[test]
    fn test_verify_requires_hash_and_signature() {
        let (sk, vk) = generate_keypair();
        let signed = sign(&unsigned(), &sk).unwrap();

        let mut no_hash = signed.clone();
        no_hash.remove("hash");
        assert!(verify(&no_hash, Some(&vk)).is_err());

        let mut no_sig = signed;
        no_sig.remove("signature");
        assert!(verify(&no_sig, Some(&vk)).is_err());
    }

    #[test]
    fn test_signature_is_deterministic_for_fixed_inputs() {
        // Ed25519 is deterministic: same key + same hash → same sig bytes.
        let sk = signing_key_from_hex(&format!("{}01", "00".repeat(31))).unwrap();
        let at = Utc::now();
        let a = sign_at(&unsigned(), &sk, at).unwrap();
        let b = sign_at(&unsigned(), &sk, at).unwrap();
        let ea = SignatureEnvelope::from_value(a.signature().unwrap()).unwrap();
        let eb = SignatureEnvelope::from_value(b.signature().unwrap()).unwrap();
        assert_eq!(ea.sig, eb.sig);
    }

    #[test]
    fn test_builder_output_signs_cleanly() {
        let (sk, _) = generate_keypair();
        let atomic = AtomicBuilder::new(EntityType::Decision, "ship it", "lead", "approve").build();
        let signed = sign(&atomic, &sk).unwrap();
        assert_eq!(signed.hash().map(str::len), Some(64));
        assert!(verify(&signed, None).unwrap());
    }
}

//! Ed25519 key material: generation, hex encoding, hex decoding.

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand_core::OsRng;

use atomic_core::error::{AtomicError, Result};

/// Generate a fresh keypair from the system CSPRNG.
#[must_use]
pub fn generate_keypair() -> (SigningKey, VerifyingKey) {
    let sk = SigningKey::generate(&mut OsRng);
    let vk = sk.verifying_key();
    (sk, vk)
}

/// Decode a 32-byte signing key from 64 hex chars.
pub fn signing_key_from_hex(raw: &str) -> Result<SigningKey> {
    let bytes = decode_exact::<32>(raw, "signing key")?;
    Ok(SigningKey::from_bytes(&bytes))
}

/// Decode a 32-byte verifying key from 64 hex chars.
pub fn verifying_key_from_hex(raw: &str) -> Result<VerifyingKey> {
    let bytes = decode_exact::<32>(raw, "public key")?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| AtomicError::SignatureError {
        reason: format!("public key is not a valid curve point: {e}"),
    })
}

#[must_use]
pub fn signing_key_hex(sk: &SigningKey) -> String {
    hex::encode(sk.to_bytes())
}

#[must_use]
pub fn verifying_key_hex(vk: &VerifyingKey) -> String {
    hex::encode(vk.to_bytes())
}

pub(crate) fn decode_exact<const N: usize>(raw: &str, what: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(raw).map_err(|e| AtomicError::InvalidSignatureFormat {
        reason: format!("{what} is not valid hex: {e}"),
    })?;
    bytes
        .try_into()
        .map_err(|_| AtomicError::InvalidSignatureFormat {
            reason: format!("{what} must be {N} bytes"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_keys_roundtrip_hex() {
        let (sk, vk) = generate_keypair();
        let sk2 = signing_key_from_hex(&signing_key_hex(&sk)).unwrap();
        let vk2 = verifying_key_from_hex(&verifying_key_hex(&vk)).unwrap();
        assert_eq!(sk.to_bytes(), sk2.to_bytes());
        assert_eq!(vk.to_bytes(), vk2.to_bytes());
    }

    #[test]
    fn test_public_key_derives_from_private() {
        let sk = signing_key_from_hex(&format!("{}01", "00".repeat(31))).unwrap();
        let vk = sk.verifying_key();
        assert_eq!(verifying_key_hex(&vk).len(), 64);
    }

    #[test]
    fn test_malformed_hex_rejected() {
        let err = signing_key_from_hex("zz").unwrap_err();
        assert_eq!(err.code(), atomic_core::ErrorCode::InvalidSignatureFormat);
        assert!(signing_key_from_hex("ab").is_err()); // wrong length
    }
}

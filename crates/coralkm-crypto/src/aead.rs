//! AES-256-GCM envelope with associated-data binding
//!
//! Wallet backups are encrypted with AES-256-GCM under the DEK. The
//! associated data, when present, is the canonical JSON serialization of a
//! caller context object (the namespace, for backups), so a ciphertext can
//! only be opened in the context it was produced for.
//!
//! AD presence must match between encrypt and decrypt: an envelope carrying
//! AD cannot be opened without it, and vice versa. The comparison of AD
//! bytes is constant-time and happens before any decryption work.

use crate::dek::Dek;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use coralkm_core::{encoding, CoralError, Effects, Result};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

/// The only algorithm this envelope format supports.
pub const ALG_AES_GCM: &str = "AES-GCM";

/// Envelope format version.
pub const ENVELOPE_V1: u8 = 1;

const IV_LEN: usize = 12;

/// Serialized AEAD envelope: `{alg, v, iv, ct, aad?}`.
///
/// The GCM tag is appended to the ciphertext by the cipher; `aad` records
/// the exact associated-data bytes the ciphertext was bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherEnvelope {
    /// Algorithm identifier, always `"AES-GCM"` when produced here
    pub alg: String,
    /// Format version
    pub v: u8,
    /// 96-bit IV, base64url
    pub iv: String,
    /// Ciphertext plus 128-bit tag, base64url
    pub ct: String,
    /// Associated data bytes, base64url, when the payload was bound to a context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aad: Option<String>,
}

impl CipherEnvelope {
    /// Serialize to JSON bytes (the form stored at the gateway).
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| CoralError::internal(format!("envelope serialization failed: {e}")))
    }

    /// Parse from JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| CoralError::invalid_argument(format!("malformed cipher envelope: {e}")))
    }
}

/// Encrypt `plaintext` under `key`, optionally bound to a context object.
///
/// A fresh 96-bit IV is drawn from the injected randomness on every call.
pub fn encrypt<A: Serialize>(
    key: &Dek,
    plaintext: &[u8],
    ad: Option<&A>,
    effects: &Effects,
) -> Result<CipherEnvelope> {
    let aad_bytes = ad.map(encoding::canonical_json).transpose()?;
    let iv: [u8; IV_LEN] = effects.random_bytes();

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let ct = cipher
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: plaintext,
                aad: aad_bytes.as_deref().unwrap_or(&[]),
            },
        )
        .map_err(|_| CoralError::internal("AEAD encryption failed"))?;

    Ok(CipherEnvelope {
        alg: ALG_AES_GCM.to_string(),
        v: ENVELOPE_V1,
        iv: encoding::b64url_encode(&iv),
        ct: encoding::b64url_encode(&ct),
        aad: aad_bytes.map(|bytes| encoding::b64url_encode(&bytes)),
    })
}

/// Decrypt an envelope, enforcing the associated-data contract.
pub fn decrypt<A: Serialize>(
    key: &Dek,
    envelope: &CipherEnvelope,
    ad: Option<&A>,
) -> Result<Vec<u8>> {
    if envelope.alg != ALG_AES_GCM {
        return Err(CoralError::AeadUnsupportedAlg {
            alg: envelope.alg.clone(),
        });
    }

    // AD presence must match before any cipher work happens.
    let aad_bytes = match (&envelope.aad, ad) {
        (None, None) => None,
        (Some(stored), Some(supplied)) => {
            let stored = encoding::b64url_decode(stored)?;
            let supplied = encoding::canonical_json(supplied)?;
            if !bool::from(stored.ct_eq(&supplied)) {
                return Err(CoralError::AeadAadMismatch);
            }
            Some(supplied)
        }
        _ => return Err(CoralError::AeadAadMismatch),
    };

    let iv = encoding::b64url_decode(&envelope.iv)?;
    if iv.len() != IV_LEN {
        return Err(CoralError::invalid_argument(format!(
            "IV must be {IV_LEN} bytes, got {}",
            iv.len()
        )));
    }
    let ct = encoding::b64url_decode(&envelope.ct)?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    cipher
        .decrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: &ct,
                aad: aad_bytes.as_deref().unwrap_or(&[]),
            },
        )
        .map_err(|_| CoralError::internal("AEAD decryption failed: bad key or corrupt ciphertext"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use coralkm_core::{Did, Namespace};
    use uuid::Uuid;

    fn namespace() -> Namespace {
        Namespace::new(Uuid::nil(), Did::new("did:coral:gw"))
    }

    #[test]
    fn roundtrip_without_ad() {
        let effects = Effects::test();
        let key = Dek::generate(&effects);
        let envelope = encrypt::<Namespace>(&key, b"hello", None, &effects).unwrap();
        assert_eq!(envelope.alg, ALG_AES_GCM);
        assert!(envelope.aad.is_none());
        let plaintext = decrypt::<Namespace>(&key, &envelope, None).unwrap();
        assert_eq!(plaintext, b"hello");
    }

    #[test]
    fn roundtrip_with_ad() {
        let effects = Effects::test();
        let key = Dek::generate(&effects);
        let ns = namespace();
        let envelope = encrypt(&key, b"payload", Some(&ns), &effects).unwrap();
        assert!(envelope.aad.is_some());
        assert_eq!(decrypt(&key, &envelope, Some(&ns)).unwrap(), b"payload");
    }

    #[test]
    fn ad_presence_mismatch_fails_both_ways() {
        let effects = Effects::test();
        let key = Dek::generate(&effects);
        let ns = namespace();

        let bound = encrypt(&key, b"x", Some(&ns), &effects).unwrap();
        assert_eq!(
            decrypt::<Namespace>(&key, &bound, None),
            Err(CoralError::AeadAadMismatch)
        );

        let unbound = encrypt::<Namespace>(&key, b"x", None, &effects).unwrap();
        assert_eq!(
            decrypt(&key, &unbound, Some(&ns)),
            Err(CoralError::AeadAadMismatch)
        );
    }

    #[test]
    fn wrong_algorithm_is_rejected() {
        let effects = Effects::test();
        let key = Dek::generate(&effects);
        let mut envelope = encrypt::<Namespace>(&key, b"x", None, &effects).unwrap();
        envelope.alg = "ChaCha20-Poly1305".to_string();
        assert!(matches!(
            decrypt::<Namespace>(&key, &envelope, None),
            Err(CoralError::AeadUnsupportedAlg { .. })
        ));
    }

    #[test]
    fn envelope_json_roundtrip() {
        let effects = Effects::test();
        let key = Dek::generate(&effects);
        let ns = namespace();
        let envelope = encrypt(&key, b"blob", Some(&ns), &effects).unwrap();
        let bytes = envelope.to_bytes().unwrap();
        let parsed = CipherEnvelope::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, envelope);
        assert_eq!(decrypt(&key, &parsed, Some(&ns)).unwrap(), b"blob");
    }
}

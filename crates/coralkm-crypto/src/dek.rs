//! Data-encryption key handling
//!
//! The DEK is a 256-bit AES key that only ever exists in wallet memory. It
//! leaves the wallet in exactly two forms: split into threshold shares, or
//! base64url inside the (already encrypted) backup plaintext.

use coralkm_core::{encoding, CoralError, Effects, Result};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of the data-encryption key in bytes.
pub const DEK_LEN: usize = 32;

/// 256-bit data-encryption key, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Dek([u8; DEK_LEN]);

impl Dek {
    /// Generate a fresh key from the injected randomness.
    pub fn generate(effects: &Effects) -> Self {
        Dek(effects.random_bytes())
    }

    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; DEK_LEN]) -> Self {
        Dek(bytes)
    }

    /// Reconstruct a key from a combined secret.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; DEK_LEN] = bytes
            .try_into()
            .map_err(|_| CoralError::invalid_argument(format!(
                "DEK must be {DEK_LEN} bytes, got {}",
                bytes.len()
            )))?;
        Ok(Dek(raw))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; DEK_LEN] {
        &self.0
    }

    /// Export for backup persistence.
    pub fn to_base64url(&self) -> String {
        encoding::b64url_encode(&self.0)
    }

    /// Import from a backup.
    pub fn from_base64url(value: &str) -> Result<Self> {
        Self::from_slice(&encoding::b64url_decode(value)?)
    }
}

impl PartialEq for Dek {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for Dek {}

impl fmt::Debug for Dek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material
        f.write_str("Dek(..)")
    }
}

//! Wallet backup plaintext model
//!
//! The backup plaintext is `{identifiers, keys, shares}`: the wallet's own
//! identities, the exported DEK, and a record of which guardian holds which
//! share. The whole object is serialized to JSON, encrypted under the DEK
//! with the namespace as associated data, and PUT to the gateway.

use coralkm_core::{CoralError, Did, Namespace, Result};
use coralkm_crypto::Dek;
use serde::{Deserialize, Serialize};

/// What each guardian currently holds, as tracked by the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareRecord {
    /// The guardian holding the share
    pub guardian: Did,
    /// The namespace the share protects
    pub namespace: Namespace,
    /// Reconstruction threshold of the split this share came from
    pub threshold: u8,
    /// Share wire bytes, base64url
    pub share: String,
    /// When the share was distributed
    pub updated_at: u64,
}

/// Key material carried in the backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupKeys {
    /// The DEK, base64url
    pub dek: String,
}

/// Backup plaintext. Exists only in wallet memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletBackup {
    /// Identities this wallet answers to
    pub identifiers: Vec<Did>,
    /// Exported key material
    pub keys: BackupKeys,
    /// Current share distribution
    pub shares: Vec<ShareRecord>,
}

impl WalletBackup {
    /// Assemble a backup for a wallet.
    pub fn new(wallet: Did, dek: &Dek, shares: Vec<ShareRecord>) -> Self {
        WalletBackup {
            identifiers: vec![wallet],
            keys: BackupKeys {
                dek: dek.to_base64url(),
            },
            shares,
        }
    }

    /// Serialize for encryption.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| CoralError::internal(format!("backup serialization failed: {e}")))
    }

    /// Parse a decrypted backup.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| CoralError::invalid_argument(format!("malformed backup: {e}")))
    }

    /// Recover the DEK carried in the backup.
    pub fn dek(&self) -> Result<Dek> {
        Dek::from_base64url(&self.keys.dek)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coralkm_core::Effects;
    use uuid::Uuid;

    #[test]
    fn backup_roundtrip_preserves_dek() {
        let effects = Effects::test();
        let dek = Dek::generate(&effects);
        let backup = WalletBackup::new(Did::new("did:coral:w"), &dek, Vec::new());

        let bytes = backup.to_bytes().unwrap();
        let parsed = WalletBackup::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, backup);
        assert_eq!(parsed.dek().unwrap(), dek);
    }

    #[test]
    fn share_records_survive_serialization() {
        let record = ShareRecord {
            guardian: Did::new("did:coral:ga"),
            namespace: Namespace::new(Uuid::from_u128(1), Did::new("did:coral:gw")),
            threshold: 2,
            share: "AQIDBA".to_string(),
            updated_at: 1000,
        };
        let backup = WalletBackup::new(
            Did::new("did:coral:w"),
            &Dek::from_bytes([0u8; 32]),
            vec![record.clone()],
        );
        let parsed = WalletBackup::from_bytes(&backup.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed.shares, vec![record]);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(WalletBackup::from_bytes(b"not json").is_err());
    }
}

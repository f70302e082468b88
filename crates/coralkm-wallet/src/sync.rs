//! Backup PUT/GET flow with integrity verification
//!
//! The wallet serializes its backup, encrypts it under the DEK with the
//! namespace as associated data, and PUTs the ciphertext to the gateway.
//! The SHA-256 computed before sending must match the hash the gateway
//! acknowledges; a mismatch means the gateway stored something else.

use crate::backup::WalletBackup;
use coralkm_core::{encoding, Did, Effects, Namespace, Result};
use coralkm_crypto::{aead, Dek};
use coralkm_protocol::messages::{Body, Envelope, NamespaceSyncBody, SyncOp};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

/// Outcome of a PUT acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// The gateway stored exactly what was sent
    Verified {
        /// The agreed hash, hex
        hash: String,
    },
    /// The gateway reported a different hash
    Mismatch {
        /// Hash computed before sending
        expected: String,
        /// Hash the gateway reported
        actual: String,
    },
    /// The acknowledgement does not match the outstanding PUT
    Unknown,
}

struct PendingPut {
    thread: Uuid,
    hash: String,
}

/// Wallet-side sync flow state.
pub struct NamespaceSync {
    pending_put: Option<PendingPut>,
}

impl NamespaceSync {
    /// Flow with nothing outstanding.
    pub fn new() -> Self {
        NamespaceSync { pending_put: None }
    }

    /// Encrypt `backup` for `namespace` and build the PUT message.
    ///
    /// Records the client-side hash for verification against the gateway's
    /// acknowledgement.
    pub fn build_put(
        &mut self,
        wallet: &Did,
        dek: &Dek,
        namespace: &Namespace,
        backup: &WalletBackup,
        effects: &Effects,
    ) -> Result<Envelope> {
        let plaintext = backup.to_bytes()?;
        let ciphertext = aead::encrypt(dek, &plaintext, Some(namespace), effects)?.to_bytes()?;
        let hash = hex::encode(Sha256::digest(&ciphertext));

        let envelope = Envelope::new(
            effects.gen_uuid(),
            wallet.clone(),
            namespace.gateway_did.clone(),
            Body::NamespaceSync(NamespaceSyncBody {
                request: SyncOp::Put,
                data: Some(encoding::b64url_encode(&ciphertext)),
                recovery_id: None,
            }),
        );
        debug!(wallet = %wallet, namespace = %namespace.id, hash = %hash, "backup PUT prepared");
        self.pending_put = Some(PendingPut {
            thread: envelope.id,
            hash,
        });
        Ok(envelope)
    }

    /// Check a PUT acknowledgement against the outstanding PUT.
    pub fn on_put_response(&mut self, thread_id: Option<Uuid>, reported_hash: &str) -> PutOutcome {
        match &self.pending_put {
            Some(pending) if Some(pending.thread) == thread_id => {
                let expected = pending.hash.clone();
                self.pending_put = None;
                if expected == reported_hash {
                    PutOutcome::Verified { hash: expected }
                } else {
                    PutOutcome::Mismatch {
                        expected,
                        actual: reported_hash.to_string(),
                    }
                }
            }
            _ => PutOutcome::Unknown,
        }
    }

    /// Whether a PUT is awaiting acknowledgement.
    pub fn put_in_flight(&self) -> bool {
        self.pending_put.is_some()
    }
}

impl Default for NamespaceSync {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coralkm_crypto::CipherEnvelope;
    use uuid::Uuid;

    fn fixtures() -> (NamespaceSync, Did, Dek, Namespace, Effects) {
        let effects = Effects::test();
        (
            NamespaceSync::new(),
            Did::new("did:coral:wallet"),
            Dek::generate(&effects),
            Namespace::new(Uuid::from_u128(1), Did::new("did:coral:gw")),
            effects,
        )
    }

    #[test]
    fn put_carries_namespace_bound_ciphertext() {
        let (mut sync, wallet, dek, ns, effects) = fixtures();
        let backup = WalletBackup::new(wallet.clone(), &dek, Vec::new());
        let envelope = sync
            .build_put(&wallet, &dek, &ns, &backup, &effects)
            .unwrap();

        let Body::NamespaceSync(body) = &envelope.body else {
            panic!("expected sync body");
        };
        let ciphertext = encoding::b64url_decode(body.data.as_ref().unwrap()).unwrap();
        let parsed = CipherEnvelope::from_bytes(&ciphertext).unwrap();
        let plaintext = aead::decrypt(&dek, &parsed, Some(&ns)).unwrap();
        assert_eq!(WalletBackup::from_bytes(&plaintext).unwrap(), backup);
    }

    #[test]
    fn matching_hash_verifies() {
        let (mut sync, wallet, dek, ns, effects) = fixtures();
        let backup = WalletBackup::new(wallet.clone(), &dek, Vec::new());
        let envelope = sync
            .build_put(&wallet, &dek, &ns, &backup, &effects)
            .unwrap();

        let Body::NamespaceSync(body) = &envelope.body else {
            panic!("expected sync body");
        };
        let ciphertext = encoding::b64url_decode(body.data.as_ref().unwrap()).unwrap();
        let hash = hex::encode(Sha256::digest(&ciphertext));

        assert_eq!(
            sync.on_put_response(Some(envelope.id), &hash),
            PutOutcome::Verified { hash }
        );
        assert!(!sync.put_in_flight());
    }

    #[test]
    fn wrong_hash_is_a_mismatch() {
        let (mut sync, wallet, dek, ns, effects) = fixtures();
        let backup = WalletBackup::new(wallet.clone(), &dek, Vec::new());
        let envelope = sync
            .build_put(&wallet, &dek, &ns, &backup, &effects)
            .unwrap();
        assert!(matches!(
            sync.on_put_response(Some(envelope.id), "deadbeef"),
            PutOutcome::Mismatch { .. }
        ));
    }

    #[test]
    fn unrelated_thread_is_unknown() {
        let (mut sync, wallet, dek, ns, effects) = fixtures();
        let backup = WalletBackup::new(wallet.clone(), &dek, Vec::new());
        sync.build_put(&wallet, &dek, &ns, &backup, &effects)
            .unwrap();
        assert_eq!(
            sync.on_put_response(Some(Uuid::from_u128(777)), "00"),
            PutOutcome::Unknown
        );
        assert!(sync.put_in_flight());
    }
}

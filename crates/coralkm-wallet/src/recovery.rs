//! Wallet-side recovery ceremony state machine
//!
//! One ceremony at a time. The coordinator issues the recovery request
//! (the envelope id doubles as the ceremony id, so every sub-dialog carries
//! it as `pthid`), collects released shares deduplicated by guardian, and at
//! threshold reconstructs the DEK and fetches the backup.

use crate::backup::WalletBackup;
use coralkm_core::{encoding, CoralError, Did, Effects, Namespace, Result};
use coralkm_crypto::{aead, sss, CipherEnvelope, Dek};
use coralkm_protocol::messages::{
    Body, Envelope, NamespaceRecoveryRequestBody, NamespaceSyncBody, SyncOp,
};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Where an in-flight ceremony stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPhase {
    /// Waiting for guardians to verify and release
    AwaitingShares,
    /// DEK reconstructed; backup fetch is out
    AwaitingBackup,
}

struct Ceremony {
    id: Uuid,
    namespace: Namespace,
    phase: RecoveryPhase,
    shares: BTreeMap<Did, sss::SecretShare>,
    threshold: Option<u8>,
    expires_at: u64,
    dek: Option<Dek>,
    get_thread: Option<Uuid>,
}

/// A finished ceremony: the restored backup and recovered key.
#[derive(Debug)]
pub struct Restored {
    /// Ceremony id
    pub ceremony_id: Uuid,
    /// The recovered namespace
    pub namespace: Namespace,
    /// The decrypted backup
    pub backup: WalletBackup,
    /// The reconstructed DEK
    pub dek: Dek,
}

/// What a released share did to the ceremony.
#[derive(Debug)]
pub enum ShareProgress {
    /// Not part of the in-flight ceremony (or a duplicate); nothing changed
    Ignored,
    /// Counted; still below threshold
    Collected {
        /// Distinct shares held
        have: usize,
        /// Shares needed
        need: usize,
    },
    /// Threshold reached; the DEK is back and the backup fetch should go out
    Reconstructed {
        /// Fetch message for the gateway
        fetch: Envelope,
    },
}

/// Wallet-side recovery coordinator.
pub struct RecoveryCoordinator {
    current: Option<Ceremony>,
}

impl RecoveryCoordinator {
    /// Coordinator with no ceremony in flight.
    pub fn new() -> Self {
        RecoveryCoordinator { current: None }
    }

    /// Whether a ceremony is in flight.
    pub fn in_flight(&self) -> bool {
        self.current.is_some()
    }

    /// Phase of the in-flight ceremony.
    pub fn phase(&self) -> Option<RecoveryPhase> {
        self.current.as_ref().map(|c| c.phase)
    }

    /// Ceremony id of the in-flight ceremony.
    pub fn ceremony_id(&self) -> Option<Uuid> {
        self.current.as_ref().map(|c| c.id)
    }

    /// Begin a ceremony for `namespace`, returning the recovery request to
    /// send to its gateway.
    pub fn start(
        &mut self,
        device: &Did,
        namespace: Namespace,
        ttl_secs: u64,
        effects: &Effects,
    ) -> Result<Envelope> {
        if self.current.is_some() {
            return Err(CoralError::invalid_argument(
                "a recovery ceremony is already in flight",
            ));
        }

        let id = effects.gen_uuid();
        let expires_at = effects.now()?.saturating_add(ttl_secs);
        let request = Envelope::new(
            id,
            device.clone(),
            namespace.gateway_did.clone(),
            Body::NamespaceRecoveryRequest(NamespaceRecoveryRequestBody {
                device_did: device.clone(),
                namespace: namespace.clone(),
                expires_at,
            }),
        );

        info!(ceremony = %id, namespace = %namespace.id, "recovery ceremony started");
        self.current = Some(Ceremony {
            id,
            namespace,
            phase: RecoveryPhase::AwaitingShares,
            shares: BTreeMap::new(),
            threshold: None,
            expires_at,
            dek: None,
            get_thread: None,
        });
        Ok(request)
    }

    /// Feed a `guardian-release-share` into the ceremony.
    ///
    /// Duplicate releases from the same guardian never double-count.
    pub fn on_release_share(
        &mut self,
        guardian: &Did,
        ceremony_id: Uuid,
        share_b64: &str,
        threshold: u8,
        device: &Did,
        effects: &Effects,
    ) -> Result<ShareProgress> {
        let Some(ceremony) = self.current.as_mut() else {
            debug!(guardian = %guardian, "share released with no ceremony in flight");
            return Ok(ShareProgress::Ignored);
        };
        if ceremony.id != ceremony_id || ceremony.phase != RecoveryPhase::AwaitingShares {
            debug!(guardian = %guardian, "share does not belong to the in-flight ceremony");
            return Ok(ShareProgress::Ignored);
        }
        if ceremony.shares.contains_key(guardian) {
            warn!(guardian = %guardian, "duplicate share release ignored");
            return Ok(ShareProgress::Ignored);
        }

        let share = sss::SecretShare::from_bytes(&encoding::b64url_decode(share_b64)?)?;
        if share.threshold != threshold {
            return Err(CoralError::SssCorruptShare);
        }
        ceremony.shares.insert(guardian.clone(), share);
        let need = *ceremony.threshold.get_or_insert(threshold) as usize;
        let have = ceremony.shares.len();
        debug!(ceremony = %ceremony.id, have, need, "share collected");

        if have < need {
            return Ok(ShareProgress::Collected { have, need });
        }

        let shares: Vec<_> = ceremony.shares.values().cloned().collect();
        let dek = Dek::from_slice(&sss::combine(&shares)?)?;
        info!(ceremony = %ceremony.id, "DEK reconstructed; fetching backup");

        let fetch = Envelope::new(
            effects.gen_uuid(),
            device.clone(),
            ceremony.namespace.gateway_did.clone(),
            Body::NamespaceSync(NamespaceSyncBody {
                request: SyncOp::Get,
                data: None,
                recovery_id: Some(ceremony.namespace.id),
            }),
        );
        ceremony.dek = Some(dek);
        ceremony.phase = RecoveryPhase::AwaitingBackup;
        ceremony.get_thread = Some(fetch.id);
        Ok(ShareProgress::Reconstructed { fetch })
    }

    /// Feed the GET response; on success the ceremony is finished and
    /// cleared.
    pub fn on_backup(
        &mut self,
        thread_id: Option<Uuid>,
        data_b64: &str,
    ) -> Result<Option<Restored>> {
        let Some(ceremony) = self.current.as_mut() else {
            return Ok(None);
        };
        if ceremony.phase != RecoveryPhase::AwaitingBackup || ceremony.get_thread != thread_id {
            return Ok(None);
        }

        let envelope = CipherEnvelope::from_bytes(&encoding::b64url_decode(data_b64)?)?;
        let dek = ceremony
            .dek
            .clone()
            .ok_or_else(|| CoralError::internal("ceremony lost its reconstructed DEK"))?;
        let plaintext = aead::decrypt(&dek, &envelope, Some(&ceremony.namespace))?;
        let backup = WalletBackup::from_bytes(&plaintext)?;

        let restored = Restored {
            ceremony_id: ceremony.id,
            namespace: ceremony.namespace.clone(),
            backup,
            dek,
        };
        info!(ceremony = %restored.ceremony_id, "backup restored");
        self.current = None;
        Ok(Some(restored))
    }

    /// Drop the ceremony if it passed its deadline; returns its id.
    pub fn expire(&mut self, now: u64) -> Option<Uuid> {
        match self.current.as_ref() {
            Some(ceremony) if now >= ceremony.expires_at => {
                let id = ceremony.id;
                warn!(ceremony = %id, "recovery ceremony expired");
                self.current = None;
                Some(id)
            }
            _ => None,
        }
    }

    /// Abort the ceremony, if any; returns its id.
    pub fn abort(&mut self) -> Option<Uuid> {
        self.current.take().map(|ceremony| ceremony.id)
    }
}

impl Default for RecoveryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

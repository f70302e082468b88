//! Guardian handlers: guardianship lifecycle, share custody, recovery
//! verification

use super::ProtocolEngine;
use crate::messages::{
    Body, ChallengeResponseBody, DenyBody, Envelope, GuardianShareUpdateBody,
    NamespaceRecoveryRequestBody, ReleaseShareBody, VerificationChallengeBody,
};
use crate::store::{PolicyStatus, StoredRecoveryRequest, StoredShare};
use coralkm_core::{encoding, CoralError, Result};
use coralkm_crypto::sss::SecretShare;
use tracing::{debug, info, warn};

impl ProtocolEngine {
    /// `guardian-request`: grant guardianship unless policy refuses.
    ///
    /// Granting records the wallet identity in the policy row; the recovery
    /// handlers read the authorized identity from there.
    pub(crate) async fn handle_guardian_request(
        &self,
        envelope: &Envelope,
    ) -> Result<Vec<Envelope>> {
        let store = self.require_guardian()?;

        if let Some(PolicyStatus::Denied) = store.get_policy(&envelope.from).await? {
            info!(guardian = %self.did(), wallet = %envelope.from, "guardianship denied by policy");
            let deny = Envelope::new(
                self.effects().gen_uuid(),
                self.did().clone(),
                envelope.from.clone(),
                Body::GuardianDeny(DenyBody {
                    reason: Some("guardian policy denies this wallet".to_string()),
                }),
            )
            .with_thid(envelope.id);
            return Ok(vec![deny]);
        }

        store
            .set_policy(envelope.from.clone(), PolicyStatus::Granted)
            .await?;
        info!(guardian = %self.did(), wallet = %envelope.from, "guardianship granted");
        Ok(vec![Envelope::new(
            self.effects().gen_uuid(),
            self.did().clone(),
            envelope.from.clone(),
            Body::GuardianGrant,
        )
        .with_thid(envelope.id)])
    }

    /// `guardian-remove`: deny the policy and delete every share the sender
    /// owns, as one transaction.
    pub(crate) async fn handle_guardian_remove(
        &self,
        envelope: &Envelope,
    ) -> Result<Vec<Envelope>> {
        let store = self.require_guardian()?;
        let deleted = store.revoke_guardianship(&envelope.from).await?;
        info!(guardian = %self.did(), wallet = %envelope.from, deleted, "guardianship revoked");
        Ok(vec![Envelope::new(
            self.effects().gen_uuid(),
            self.did().clone(),
            envelope.from.clone(),
            Body::GuardianRemoveConfirm,
        )
        .with_thid(envelope.id)])
    }

    /// `guardian-share-update`: upsert the held share for the namespace.
    pub(crate) async fn handle_share_update(
        &self,
        envelope: &Envelope,
        body: &GuardianShareUpdateBody,
    ) -> Result<Vec<Envelope>> {
        let store = self.require_guardian()?;

        let bytes = encoding::b64url_decode(&body.share)?;
        let parsed = SecretShare::from_bytes(&bytes)?;
        if parsed.threshold != body.threshold {
            return Err(CoralError::invalid_argument(
                "body.threshold does not match the share metadata",
            ));
        }

        // A requested delay holds the store and the confirmation together
        if let Some(seconds) = body.delay {
            debug!(guardian = %self.did(), seconds, "deferring share update");
            self.effects().delay(seconds).await?;
        }

        store
            .save_share(StoredShare {
                owner: envelope.from.clone(),
                namespace: body.namespace.clone(),
                threshold: body.threshold,
                share: bytes,
                updated_at: self.effects().now()?,
            })
            .await?;
        debug!(guardian = %self.did(), wallet = %envelope.from, namespace = %body.namespace.id, threshold = body.threshold, "share updated");

        Ok(vec![Envelope::new(
            self.effects().gen_uuid(),
            self.did().clone(),
            envelope.from.clone(),
            Body::GuardianShareUpdateConfirm,
        )
        .with_thid(envelope.id)])
    }

    /// `namespace-recovery-request`: persist the ceremony and challenge the
    /// recovering device.
    ///
    /// Parties that hold no share for the namespace drop the request without
    /// a reply, so probing cannot enumerate guardians.
    pub(crate) async fn handle_recovery_request(
        &self,
        envelope: &Envelope,
        body: &NamespaceRecoveryRequestBody,
    ) -> Result<Vec<Envelope>> {
        let store = self.require_guardian()?;
        if !store
            .is_guardian(&body.namespace.gateway_did, &body.namespace.id)
            .await?
        {
            return Err(CoralError::NotAGuardian);
        }

        let challenge = self.verifier().issue(self.effects());
        store
            .save_recovery_request(StoredRecoveryRequest {
                id: envelope.id,
                device_did: body.device_did.clone(),
                namespace: body.namespace.clone(),
                challenge_id: challenge.id,
                created_at: self.effects().now()?,
                expires_at: body.expires_at,
            })
            .await?;
        info!(guardian = %self.did(), ceremony = %envelope.id, device = %body.device_did, "recovery request stored, challenging device");

        Ok(vec![Envelope::new(
            self.effects().gen_uuid(),
            self.did().clone(),
            body.device_did.clone(),
            Body::GuardianVerificationChallenge(VerificationChallengeBody { challenge }),
        )
        .with_pthid(envelope.id)])
    }

    /// `guardian-verification-challenge-response`: release the share if the
    /// ceremony is alive and the answer verifies; delete the request either
    /// way.
    pub(crate) async fn handle_challenge_response(
        &self,
        envelope: &Envelope,
        body: &ChallengeResponseBody,
    ) -> Result<Vec<Envelope>> {
        let store = self.require_guardian()?;
        let now = self.effects().now()?;

        // Expired ceremonies are purged before any response is considered
        let purged = store.purge_expired(now).await?;
        if purged > 0 {
            debug!(guardian = %self.did(), purged, "purged expired recovery requests");
        }

        let ceremony_id = envelope
            .pthid
            .ok_or_else(|| CoralError::invalid_argument("pthid"))?;
        let Some(recovery) = store.get_recovery_request(&ceremony_id).await? else {
            warn!(guardian = %self.did(), ceremony = %ceremony_id, "no live recovery request for response; dropping");
            return Ok(Vec::new());
        };

        if recovery.is_expired(now) {
            store.delete_recovery_request(&ceremony_id).await?;
            warn!(guardian = %self.did(), ceremony = %ceremony_id, "recovery request expired; dropping response");
            return Ok(Vec::new());
        }

        if body.challenge_id != recovery.challenge_id {
            store.delete_recovery_request(&ceremony_id).await?;
            warn!(guardian = %self.did(), ceremony = %ceremony_id, "response references a different challenge; ceremony aborted");
            return Ok(Vec::new());
        }

        if !self.verifier().verify(recovery.challenge_id, &body.response) {
            store.delete_recovery_request(&ceremony_id).await?;
            warn!(guardian = %self.did(), ceremony = %ceremony_id, "verification failed; ceremony aborted");
            return Ok(Vec::new());
        }

        let Some(share) = store
            .get_share(&recovery.namespace.gateway_did, &recovery.namespace.id)
            .await?
        else {
            store.delete_recovery_request(&ceremony_id).await?;
            warn!(guardian = %self.did(), ceremony = %ceremony_id, "share no longer held; ceremony aborted");
            return Ok(Vec::new());
        };

        store.delete_recovery_request(&ceremony_id).await?;
        info!(guardian = %self.did(), ceremony = %ceremony_id, device = %recovery.device_did, "verification passed, releasing share");

        Ok(vec![Envelope::new(
            self.effects().gen_uuid(),
            self.did().clone(),
            recovery.device_did.clone(),
            Body::GuardianReleaseShare(ReleaseShareBody {
                share: encoding::b64url_encode(&share.share),
                threshold: share.threshold,
            }),
        )
        .with_pthid(recovery.id)])
    }
}

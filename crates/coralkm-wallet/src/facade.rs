//! Wallet facade implementing the engine's wallet hooks
//!
//! [`WalletAgent`] is the single entry point an application uses: it issues
//! requests through the mediator and, registered as the engine's
//! [`WalletHooks`], absorbs every wallet-bound message into its state.
//! Outcomes surface as [`WalletEvent`]s rather than return values, because
//! replies arrive asynchronously.

use crate::backup::{ShareRecord, WalletBackup};
use crate::events::WalletEvent;
use crate::recovery::{RecoveryCoordinator, ShareProgress};
use crate::share_manager::{ConfirmProgress, ResplitOutcome, ShareManager};
use crate::sync::{NamespaceSync, PutOutcome};
use async_trait::async_trait;
use coralkm_core::{CoralError, Did, Effects, Namespace, Result};
use coralkm_crypto::Dek;
use coralkm_protocol::codec;
use coralkm_protocol::messages::{
    Body, ChallengeResponseBody, DenyBody, Envelope, NamespaceGrantBody,
    NamespaceSyncResponseBody, ProblemReportBody, ReleaseShareBody, SyncOp,
    VerificationChallengeBody,
};
use coralkm_protocol::verify::ChallengePrompt;
use coralkm_protocol::{Mediator, WalletHooks};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Wallet protocol tunables.
#[derive(Debug, Clone)]
pub struct WalletConfig {
    /// How long to wait for a reply before failing a thread
    pub reply_deadline_secs: u64,
    /// Lifetime of a recovery ceremony
    pub recovery_ttl_secs: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        WalletConfig {
            reply_deadline_secs: 60,
            recovery_ttl_secs: 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GuardianStatus {
    Requested,
    Granted,
    RemoveRequested,
}

#[derive(Debug, Clone)]
enum ThreadKind {
    NamespaceRequest,
    GuardianRequest(Did),
    GuardianRemove(Did),
    ShareUpdate,
    SyncPut,
    SyncGet,
}

struct PendingThread {
    kind: ThreadKind,
    deadline: u64,
}

struct WalletState {
    dek: Option<Dek>,
    namespace: Option<Namespace>,
    guardians: BTreeMap<Did, GuardianStatus>,
    records: Vec<ShareRecord>,
    shares: ShareManager,
    recovery: RecoveryCoordinator,
    sync: NamespaceSync,
    pending: HashMap<Uuid, PendingThread>,
    events: Vec<WalletEvent>,
}

/// Orchestrates the wallet role: provisioning, guardianship, share
/// distribution, backup sync and recovery.
pub struct WalletAgent {
    did: Did,
    effects: Effects,
    mediator: Arc<dyn Mediator>,
    prompt: Arc<dyn ChallengePrompt>,
    config: WalletConfig,
    state: async_lock::Mutex<WalletState>,
}

impl WalletAgent {
    /// A wallet with the given key material (`None` for a recovering
    /// device that has lost its DEK).
    pub fn new(
        did: Did,
        dek: Option<Dek>,
        mediator: Arc<dyn Mediator>,
        prompt: Arc<dyn ChallengePrompt>,
        effects: Effects,
    ) -> Self {
        WalletAgent {
            did,
            effects,
            mediator,
            prompt,
            config: WalletConfig::default(),
            state: async_lock::Mutex::new(WalletState {
                dek,
                namespace: None,
                guardians: BTreeMap::new(),
                records: Vec::new(),
                shares: ShareManager::new(),
                recovery: RecoveryCoordinator::new(),
                sync: NamespaceSync::new(),
                pending: HashMap::new(),
                events: Vec::new(),
            }),
        }
    }

    /// Override the default tunables.
    pub fn with_config(mut self, config: WalletConfig) -> Self {
        self.config = config;
        self
    }

    /// This wallet's identity.
    pub fn did(&self) -> &Did {
        &self.did
    }

    /// Ask `gateway` for a namespace. At most one request in flight.
    pub async fn request_namespace(&self, gateway: &Did) -> Result<Uuid> {
        let envelope = {
            let mut state = self.state.lock().await;
            if state.namespace.is_some() {
                return Err(CoralError::invalid_argument(
                    "namespace already provisioned",
                ));
            }
            if state
                .pending
                .values()
                .any(|p| matches!(p.kind, ThreadKind::NamespaceRequest))
            {
                return Err(CoralError::invalid_argument(
                    "a namespace request is already in flight",
                ));
            }
            let envelope = Envelope::new(
                self.effects.gen_uuid(),
                self.did.clone(),
                gateway.clone(),
                Body::NamespaceRequest,
            );
            self.track(&mut state, envelope.id, ThreadKind::NamespaceRequest)?;
            envelope
        };
        let id = envelope.id;
        self.send(envelope).await?;
        Ok(id)
    }

    /// Ask `guardian` to hold a share of the DEK.
    pub async fn add_guardian(&self, guardian: &Did) -> Result<Uuid> {
        let envelope = {
            let mut state = self.state.lock().await;
            state
                .guardians
                .insert(guardian.clone(), GuardianStatus::Requested);
            let envelope = Envelope::new(
                self.effects.gen_uuid(),
                self.did.clone(),
                guardian.clone(),
                Body::GuardianRequest,
            );
            self.track(
                &mut state,
                envelope.id,
                ThreadKind::GuardianRequest(guardian.clone()),
            )?;
            envelope
        };
        let id = envelope.id;
        self.send(envelope).await?;
        Ok(id)
    }

    /// Revoke `guardian` and re-split over the remaining set once the
    /// removal confirms.
    pub async fn remove_guardian(&self, guardian: &Did) -> Result<Uuid> {
        let envelope = {
            let mut state = self.state.lock().await;
            if !state.guardians.contains_key(guardian) {
                return Err(CoralError::invalid_argument(format!(
                    "{guardian} is not a guardian of this wallet"
                )));
            }
            state
                .guardians
                .insert(guardian.clone(), GuardianStatus::RemoveRequested);
            let envelope = Envelope::new(
                self.effects.gen_uuid(),
                self.did.clone(),
                guardian.clone(),
                Body::GuardianRemove,
            );
            self.track(
                &mut state,
                envelope.id,
                ThreadKind::GuardianRemove(guardian.clone()),
            )?;
            envelope
        };
        let id = envelope.id;
        self.send(envelope).await?;
        Ok(id)
    }

    /// Encrypt the current backup and PUT it to the gateway.
    pub async fn sync_backup(&self) -> Result<Uuid> {
        let envelope = {
            let mut state = self.state.lock().await;
            let envelope = self.build_backup_put(&mut state)?;
            self.track(&mut state, envelope.id, ThreadKind::SyncPut)?;
            envelope
        };
        let id = envelope.id;
        self.send(envelope).await?;
        Ok(id)
    }

    /// Force a re-split over the currently granted guardians.
    pub async fn resplit_shares(&self) -> Result<()> {
        let envelopes = {
            let mut state = self.state.lock().await;
            self.start_resplit(&mut state)?
        };
        self.send_all(envelopes).await
    }

    /// Begin a recovery ceremony for `namespace` (typically on a new device
    /// that knows its namespace but has lost its DEK).
    pub async fn start_recovery(&self, namespace: Namespace) -> Result<Uuid> {
        let envelope = {
            let mut state = self.state.lock().await;
            state.recovery.start(
                &self.did,
                namespace,
                self.config.recovery_ttl_secs,
                &self.effects,
            )?
        };
        let id = envelope.id;
        self.send(envelope).await?;
        Ok(id)
    }

    /// Fail threads past their reply deadline and expire a stale recovery.
    pub async fn expire_stale(&self) -> Result<()> {
        let now = self.effects.now()?;
        let mut state = self.state.lock().await;

        let stale: Vec<Uuid> = state
            .pending
            .iter()
            .filter(|(_, thread)| now >= thread.deadline)
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            if let Some(thread) = state.pending.remove(&id) {
                warn!(wallet = %self.did, thread = %id, "request timed out");
                if matches!(thread.kind, ThreadKind::ShareUpdate) {
                    state.shares.abandon_thread(id);
                }
                state.events.push(WalletEvent::ThreadTimedOut { thread_id: id });
            }
        }

        if let Some(recovery_id) = state.recovery.expire(now) {
            state
                .events
                .push(WalletEvent::RecoveryExpired { recovery_id });
        }
        Ok(())
    }

    /// Drain accumulated events.
    pub async fn take_events(&self) -> Vec<WalletEvent> {
        std::mem::take(&mut self.state.lock().await.events)
    }

    /// The provisioned namespace, if any.
    pub async fn namespace(&self) -> Option<Namespace> {
        self.state.lock().await.namespace.clone()
    }

    /// The wallet's key, if it holds one.
    pub async fn dek(&self) -> Option<Dek> {
        self.state.lock().await.dek.clone()
    }

    /// The live share distribution.
    pub async fn share_records(&self) -> Vec<ShareRecord> {
        self.state.lock().await.records.clone()
    }

    /// Whether a recovery ceremony is in flight.
    pub async fn recovery_in_flight(&self) -> bool {
        self.state.lock().await.recovery.in_flight()
    }

    fn track(&self, state: &mut WalletState, id: Uuid, kind: ThreadKind) -> Result<()> {
        let deadline = self
            .effects
            .now()?
            .saturating_add(self.config.reply_deadline_secs);
        state.pending.insert(id, PendingThread { kind, deadline });
        Ok(())
    }

    fn build_backup_put(&self, state: &mut WalletState) -> Result<Envelope> {
        let dek = state
            .dek
            .clone()
            .ok_or_else(|| CoralError::invalid_argument("wallet holds no DEK"))?;
        let namespace = state
            .namespace
            .clone()
            .ok_or_else(|| CoralError::invalid_argument("no namespace provisioned"))?;
        let backup = WalletBackup::new(self.did.clone(), &dek, state.records.clone());
        state
            .sync
            .build_put(&self.did, &dek, &namespace, &backup, &self.effects)
    }

    /// Split the DEK over the granted guardians; called on every membership
    /// change.
    fn start_resplit(&self, state: &mut WalletState) -> Result<Vec<Envelope>> {
        let (Some(dek), Some(namespace)) = (state.dek.clone(), state.namespace.clone()) else {
            debug!(wallet = %self.did, "no DEK or namespace yet; skipping re-split");
            return Ok(Vec::new());
        };
        let granted: Vec<Did> = state
            .guardians
            .iter()
            .filter(|(_, status)| **status == GuardianStatus::Granted)
            .map(|(did, _)| did.clone())
            .collect();

        match state
            .shares
            .begin(&dek, &namespace, &granted, &self.effects, &self.did)?
        {
            ResplitOutcome::Started { envelopes } => {
                for envelope in &envelopes {
                    self.track(state, envelope.id, ThreadKind::ShareUpdate)?;
                }
                Ok(envelopes)
            }
            ResplitOutcome::TooFewGuardians { count } => {
                state
                    .events
                    .push(WalletEvent::InsufficientGuardians { count });
                Ok(Vec::new())
            }
            ResplitOutcome::Deferred => Ok(Vec::new()),
        }
    }

    async fn send(&self, envelope: Envelope) -> Result<()> {
        self.mediator.send(codec::encode(&envelope)).await
    }

    async fn send_all(&self, envelopes: Vec<Envelope>) -> Result<()> {
        for envelope in envelopes {
            self.send(envelope).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl WalletHooks for WalletAgent {
    async fn on_namespace_grant(
        &self,
        envelope: &Envelope,
        body: &NamespaceGrantBody,
    ) -> Result<Vec<Envelope>> {
        let mut state = self.state.lock().await;
        if let Some(thid) = envelope.thid {
            state.pending.remove(&thid);
        }
        info!(wallet = %self.did, namespace = %body.namespace.id, "namespace granted");
        state.namespace = Some(body.namespace.clone());
        state.events.push(WalletEvent::NamespaceGranted {
            namespace: body.namespace.clone(),
        });
        Ok(Vec::new())
    }

    async fn on_namespace_deny(
        &self,
        envelope: &Envelope,
        body: &DenyBody,
    ) -> Result<Vec<Envelope>> {
        let mut state = self.state.lock().await;
        if let Some(thid) = envelope.thid {
            state.pending.remove(&thid);
        }
        warn!(wallet = %self.did, reason = ?body.reason, "namespace denied");
        state.events.push(WalletEvent::NamespaceDenied {
            reason: body.reason.clone(),
        });
        Ok(Vec::new())
    }

    async fn on_sync_response(
        &self,
        envelope: &Envelope,
        body: &NamespaceSyncResponseBody,
    ) -> Result<Vec<Envelope>> {
        let mut state = self.state.lock().await;
        if let Some(thid) = envelope.thid {
            state.pending.remove(&thid);
        }
        match body.request {
            SyncOp::Put => {
                let Some(hash) = body.hash.as_deref() else {
                    return Ok(Vec::new());
                };
                match state.sync.on_put_response(envelope.thid, hash) {
                    PutOutcome::Verified { hash } => {
                        info!(wallet = %self.did, %hash, "backup synced");
                        state.events.push(WalletEvent::BackupSynced { hash });
                    }
                    PutOutcome::Mismatch { expected, actual } => {
                        warn!(wallet = %self.did, %expected, %actual, "backup hash mismatch");
                        state
                            .events
                            .push(WalletEvent::BackupHashMismatch { expected, actual });
                    }
                    PutOutcome::Unknown => {
                        debug!(wallet = %self.did, "unmatched PUT acknowledgement");
                    }
                }
            }
            SyncOp::Get => {
                let Some(data) = body.data.as_deref() else {
                    return Ok(Vec::new());
                };
                if let Some(restored) = state.recovery.on_backup(envelope.thid, data)? {
                    state.dek = Some(restored.dek.clone());
                    state.namespace = Some(restored.namespace.clone());
                    state.records = restored.backup.shares.clone();
                    state.events.push(WalletEvent::RecoveryRestored {
                        recovery_id: restored.ceremony_id,
                        backup: restored.backup,
                    });
                }
            }
        }
        Ok(Vec::new())
    }

    async fn on_guardian_grant(&self, envelope: &Envelope) -> Result<Vec<Envelope>> {
        let mut state = self.state.lock().await;
        if let Some(thid) = envelope.thid {
            state.pending.remove(&thid);
        }
        info!(wallet = %self.did, guardian = %envelope.from, "guardian granted");
        state
            .guardians
            .insert(envelope.from.clone(), GuardianStatus::Granted);
        state.events.push(WalletEvent::GuardianGranted {
            guardian: envelope.from.clone(),
        });
        // Membership changed: re-split over the new set
        self.start_resplit(&mut state)
    }

    async fn on_guardian_deny(
        &self,
        envelope: &Envelope,
        body: &DenyBody,
    ) -> Result<Vec<Envelope>> {
        let mut state = self.state.lock().await;
        if let Some(thid) = envelope.thid {
            state.pending.remove(&thid);
        }
        warn!(wallet = %self.did, guardian = %envelope.from, "guardian denied");
        state.guardians.remove(&envelope.from);
        state.events.push(WalletEvent::GuardianDenied {
            guardian: envelope.from.clone(),
            reason: body.reason.clone(),
        });
        Ok(Vec::new())
    }

    async fn on_guardian_remove_confirm(&self, envelope: &Envelope) -> Result<Vec<Envelope>> {
        let mut state = self.state.lock().await;
        if let Some(thid) = envelope.thid {
            state.pending.remove(&thid);
        }
        info!(wallet = %self.did, guardian = %envelope.from, "guardian removed");
        state.guardians.remove(&envelope.from);
        state.records.retain(|record| record.guardian != envelope.from);
        state.events.push(WalletEvent::GuardianRemoved {
            guardian: envelope.from.clone(),
        });
        // Remaining guardians need fresh shares under the new threshold
        self.start_resplit(&mut state)
    }

    async fn on_share_update_confirm(&self, envelope: &Envelope) -> Result<Vec<Envelope>> {
        let Some(thid) = envelope.thid else {
            return Ok(Vec::new());
        };
        let mut state = self.state.lock().await;
        state.pending.remove(&thid);

        match state.shares.on_confirm(thid) {
            ConfirmProgress::Complete { records, threshold } => {
                info!(wallet = %self.did, threshold, "re-split confirmed by all guardians");
                let guardians = records.iter().map(|r| r.guardian.clone()).collect();
                state.records = records;
                state
                    .events
                    .push(WalletEvent::SharesDistributed { threshold, guardians });

                if state.shares.take_deferred() {
                    // Membership changed mid-cycle; run the deferred split
                    // before persisting anything
                    return self.start_resplit(&mut state);
                }
                // Persist the new distribution in the backup
                let put = self.build_backup_put(&mut state)?;
                self.track(&mut state, put.id, ThreadKind::SyncPut)?;
                Ok(vec![put])
            }
            ConfirmProgress::Pending { remaining } => {
                debug!(wallet = %self.did, remaining, "share update confirmed");
                Ok(Vec::new())
            }
            ConfirmProgress::Unknown => Ok(Vec::new()),
        }
    }

    async fn on_verification_challenge(
        &self,
        envelope: &Envelope,
        body: &VerificationChallengeBody,
    ) -> Result<Vec<Envelope>> {
        let state = self.state.lock().await;
        let Some(pthid) = envelope.pthid else {
            return Ok(Vec::new());
        };
        if state.recovery.ceremony_id() != Some(pthid) {
            debug!(wallet = %self.did, "challenge for an unknown ceremony; ignoring");
            return Ok(Vec::new());
        }
        drop(state);

        let response = self.prompt.answer(&body.challenge);
        // The response threads to the challenge itself, not its envelope
        Ok(vec![Envelope::new(
            self.effects.gen_uuid(),
            self.did.clone(),
            envelope.from.clone(),
            Body::GuardianVerificationChallengeResponse(ChallengeResponseBody {
                challenge_id: body.challenge.id,
                response,
            }),
        )
        .with_thid(body.challenge.id)
        .with_pthid(pthid)])
    }

    async fn on_release_share(
        &self,
        envelope: &Envelope,
        body: &ReleaseShareBody,
    ) -> Result<Vec<Envelope>> {
        let Some(pthid) = envelope.pthid else {
            return Ok(Vec::new());
        };
        let mut state = self.state.lock().await;
        match state.recovery.on_release_share(
            &envelope.from,
            pthid,
            &body.share,
            body.threshold,
            &self.did,
            &self.effects,
        )? {
            ShareProgress::Reconstructed { fetch } => {
                self.track(&mut state, fetch.id, ThreadKind::SyncGet)?;
                Ok(vec![fetch])
            }
            ShareProgress::Collected { have, need } => {
                debug!(wallet = %self.did, have, need, "recovery share collected");
                Ok(Vec::new())
            }
            ShareProgress::Ignored => Ok(Vec::new()),
        }
    }

    async fn on_problem_report(
        &self,
        envelope: &Envelope,
        body: &ProblemReportBody,
    ) -> Result<Vec<Envelope>> {
        let mut state = self.state.lock().await;
        // The report's pthid names the failed thread
        if let Some(pthid) = envelope.pthid {
            state.pending.remove(&pthid);
        }
        let comment = codec::render_comment(&body.comment, body.args.as_deref().unwrap_or(&[]));
        warn!(wallet = %self.did, code = %body.code, %comment, "problem reported");
        state.events.push(WalletEvent::ProblemReported {
            code: body.code.clone(),
            comment,
        });
        Ok(Vec::new())
    }
}

//! Per-role protocol engine
//!
//! One engine instance serves one party. The roles it plays are determined
//! by what was injected: a gateway store enables the gateway handlers, a
//! guardian store the guardian handlers, and a [`WalletHooks`] object the
//! wallet dispatch. Every handler asserts its role and required fields;
//! violations are answered with a problem report on the offender's thread,
//! except where replying would leak guardianship.

mod gateway;
mod guardian;
mod wallet;

pub use wallet::WalletHooks;

use crate::codec::{self, Offender};
use crate::messages::{Body, Envelope};
use crate::store::{GuardianStore, NamespaceStore};
use crate::verify::{ChallengeVerifier, FixedCodeVerifier};
use coralkm_core::{CoralError, Did, Effects, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Protocol roles a party can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    /// End-user wallet
    Wallet,
    /// Namespace gateway
    Gateway,
    /// Recovery guardian
    Guardian,
}

/// Per-party protocol state machine.
pub struct ProtocolEngine {
    did: Did,
    effects: Effects,
    namespaces: Option<Arc<dyn NamespaceStore>>,
    guardians: Option<Arc<dyn GuardianStore>>,
    wallet: Option<Arc<dyn WalletHooks>>,
    verifier: Arc<dyn ChallengeVerifier>,
}

impl ProtocolEngine {
    /// Engine with no roles; attach them with the `with_*` builders.
    pub fn new(did: Did, effects: Effects) -> Self {
        ProtocolEngine {
            did,
            effects,
            namespaces: None,
            guardians: None,
            wallet: None,
            verifier: Arc::new(FixedCodeVerifier::default()),
        }
    }

    /// Enable the gateway role.
    pub fn with_gateway(mut self, store: Arc<dyn NamespaceStore>) -> Self {
        self.namespaces = Some(store);
        self
    }

    /// Enable the guardian role.
    pub fn with_guardian(mut self, store: Arc<dyn GuardianStore>) -> Self {
        self.guardians = Some(store);
        self
    }

    /// Enable the wallet role.
    pub fn with_wallet(mut self, hooks: Arc<dyn WalletHooks>) -> Self {
        self.wallet = Some(hooks);
        self
    }

    /// Replace the demo challenge verifier.
    pub fn with_verifier(mut self, verifier: Arc<dyn ChallengeVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// This party's identity.
    pub fn did(&self) -> &Did {
        &self.did
    }

    /// Roles this engine plays, derived from the injected capabilities.
    pub fn roles(&self) -> Vec<Role> {
        let mut roles = Vec::new();
        if self.wallet.is_some() {
            roles.push(Role::Wallet);
        }
        if self.namespaces.is_some() {
            roles.push(Role::Gateway);
        }
        if self.guardians.is_some() {
            roles.push(Role::Guardian);
        }
        roles
    }

    pub(crate) fn effects(&self) -> &Effects {
        &self.effects
    }

    pub(crate) fn verifier(&self) -> &Arc<dyn ChallengeVerifier> {
        &self.verifier
    }

    pub(crate) fn require_gateway(&self) -> Result<&Arc<dyn NamespaceStore>> {
        self.namespaces
            .as_ref()
            .ok_or_else(|| CoralError::invalid_role("gateway"))
    }

    pub(crate) fn require_guardian(&self) -> Result<&Arc<dyn GuardianStore>> {
        self.guardians
            .as_ref()
            .ok_or_else(|| CoralError::invalid_role("guardian"))
    }

    fn require_wallet(&self) -> Result<&Arc<dyn WalletHooks>> {
        self.wallet
            .as_ref()
            .ok_or_else(|| CoralError::invalid_role("wallet"))
    }

    /// Process a wire message, returning wire replies.
    pub async fn handle_wire(&self, wire: &Value) -> Result<Vec<Value>> {
        match codec::decode(wire) {
            Ok(envelope) => Ok(self
                .handle(&envelope)
                .await?
                .iter()
                .map(codec::encode)
                .collect()),
            Err(failure) => {
                let Some(offender) = failure.offender else {
                    warn!(party = %self.did, error = %failure.error, "dropping unanswerable message");
                    return Ok(Vec::new());
                };
                // Never answer a broken problem report; two parties would
                // bounce reports at each other forever.
                if is_problem_report(wire) {
                    warn!(party = %self.did, error = %failure.error, "dropping malformed problem report");
                    return Ok(Vec::new());
                }
                warn!(party = %self.did, error = %failure.error, "rejecting malformed message");
                Ok(vec![codec::encode(&self.report(&offender, &failure.error))])
            }
        }
    }

    /// Process a typed message, returning zero or more replies.
    ///
    /// Handler errors become problem reports on the offender's thread.
    /// Silent errors produce no reply; fatal (internal) errors bubble up and
    /// fail the request without emitting anything.
    pub async fn handle(&self, envelope: &Envelope) -> Result<Vec<Envelope>> {
        match self.dispatch(envelope).await {
            Ok(replies) => Ok(replies),
            Err(error) if error.is_fatal() => Err(error),
            Err(error) if error.is_silent() => {
                debug!(party = %self.did, "dropping message silently");
                Ok(Vec::new())
            }
            Err(error) => {
                debug!(party = %self.did, %error, "answering with problem report");
                Ok(vec![self.report(&Offender::of(envelope), &error)])
            }
        }
    }

    async fn dispatch(&self, envelope: &Envelope) -> Result<Vec<Envelope>> {
        match &envelope.body {
            // Gateway role
            Body::NamespaceRequest => self.handle_namespace_request(envelope).await,
            Body::NamespaceSync(body) => self.handle_namespace_sync(envelope, body).await,

            // Recovery requests fan out: a gateway relays, a guardian
            // processes, anyone else drops the broadcast without comment.
            Body::NamespaceRecoveryRequest(body) => {
                let mut out = Vec::new();
                if self.guardians.is_some() {
                    match self.handle_recovery_request(envelope, body).await {
                        Ok(replies) => out.extend(replies),
                        Err(CoralError::NotAGuardian) => {
                            debug!(party = %self.did, "not a guardian for this namespace");
                        }
                        Err(error) => return Err(error),
                    }
                }
                if self.namespaces.is_some() && envelope.to.contains(&self.did) {
                    out.extend(self.relay_recovery_request(envelope, body).await?);
                }
                Ok(out)
            }

            // Guardian role
            Body::GuardianRequest => self.handle_guardian_request(envelope).await,
            Body::GuardianRemove => self.handle_guardian_remove(envelope).await,
            Body::GuardianShareUpdate(body) => self.handle_share_update(envelope, body).await,
            Body::GuardianVerificationChallengeResponse(body) => {
                self.handle_challenge_response(envelope, body).await
            }

            // Wallet role
            Body::NamespaceGrant(body) => {
                self.require_wallet()?.on_namespace_grant(envelope, body).await
            }
            Body::NamespaceDeny(body) => {
                self.require_wallet()?.on_namespace_deny(envelope, body).await
            }
            Body::NamespaceSyncResponse(body) => {
                self.require_wallet()?.on_sync_response(envelope, body).await
            }
            Body::GuardianGrant => self.require_wallet()?.on_guardian_grant(envelope).await,
            Body::GuardianDeny(body) => {
                self.require_wallet()?.on_guardian_deny(envelope, body).await
            }
            Body::GuardianRemoveConfirm => {
                self.require_wallet()?.on_guardian_remove_confirm(envelope).await
            }
            Body::GuardianShareUpdateConfirm => {
                self.require_wallet()?.on_share_update_confirm(envelope).await
            }
            Body::GuardianVerificationChallenge(body) => {
                self.require_wallet()?
                    .on_verification_challenge(envelope, body)
                    .await
            }
            Body::GuardianReleaseShare(body) => {
                self.require_wallet()?.on_release_share(envelope, body).await
            }

            // Problem reports terminate threads; never answer one.
            Body::ProblemReport(body) => match &self.wallet {
                Some(hooks) => hooks.on_problem_report(envelope, body).await,
                None => {
                    warn!(party = %self.did, code = %body.code, "problem report received");
                    Ok(Vec::new())
                }
            },
        }
    }

    pub(crate) fn report(&self, offender: &Offender, error: &CoralError) -> Envelope {
        codec::problem_report(self.effects.gen_uuid(), self.did.clone(), offender, error)
    }
}

fn is_problem_report(wire: &Value) -> bool {
    wire.get("type")
        .and_then(Value::as_str)
        .is_some_and(|uri| uri.ends_with("/report-problem"))
}

//! Wallet dispatch seam
//!
//! The wallet role keeps mutable state (DEK, guardian view, in-flight
//! ceremonies) that lives above the protocol layer, so the engine hands
//! wallet-bound messages to a [`WalletHooks`] trait object instead of
//! owning that state itself. Implementations may return follow-up messages
//! (a challenge answer, a backup fetch after reconstruction).

use crate::messages::{
    DenyBody, Envelope, NamespaceGrantBody, NamespaceSyncResponseBody, ProblemReportBody,
    ReleaseShareBody, VerificationChallengeBody,
};
use async_trait::async_trait;
use coralkm_core::Result;

/// Wallet-side message handling, injected into the engine.
#[async_trait]
pub trait WalletHooks: Send + Sync {
    /// A gateway issued a namespace for this wallet.
    async fn on_namespace_grant(
        &self,
        envelope: &Envelope,
        body: &NamespaceGrantBody,
    ) -> Result<Vec<Envelope>>;

    /// A gateway refused to issue a namespace.
    async fn on_namespace_deny(
        &self,
        envelope: &Envelope,
        body: &DenyBody,
    ) -> Result<Vec<Envelope>>;

    /// A gateway answered a PUT (hash) or GET (ciphertext).
    async fn on_sync_response(
        &self,
        envelope: &Envelope,
        body: &NamespaceSyncResponseBody,
    ) -> Result<Vec<Envelope>>;

    /// A guardian accepted guardianship.
    async fn on_guardian_grant(&self, envelope: &Envelope) -> Result<Vec<Envelope>>;

    /// A guardian refused guardianship.
    async fn on_guardian_deny(
        &self,
        envelope: &Envelope,
        body: &DenyBody,
    ) -> Result<Vec<Envelope>>;

    /// A guardian confirmed removal.
    async fn on_guardian_remove_confirm(&self, envelope: &Envelope) -> Result<Vec<Envelope>>;

    /// A guardian confirmed a share update.
    async fn on_share_update_confirm(&self, envelope: &Envelope) -> Result<Vec<Envelope>>;

    /// A guardian challenged this device during recovery.
    async fn on_verification_challenge(
        &self,
        envelope: &Envelope,
        body: &VerificationChallengeBody,
    ) -> Result<Vec<Envelope>>;

    /// A guardian released its share during recovery.
    async fn on_release_share(
        &self,
        envelope: &Envelope,
        body: &ReleaseShareBody,
    ) -> Result<Vec<Envelope>>;

    /// A counterparty reported a protocol failure.
    async fn on_problem_report(
        &self,
        envelope: &Envelope,
        body: &ProblemReportBody,
    ) -> Result<Vec<Envelope>>;
}

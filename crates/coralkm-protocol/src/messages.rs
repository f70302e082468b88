//! Typed protocol messages
//!
//! Every CoralKM message is an [`Envelope`] with a globally unique id, an
//! absolute type URI, sender and recipients, optional thread correlation
//! (`thid` for request/reply, `pthid` for recovery sub-dialogs) and a typed
//! [`Body`]. The body set is closed: one variant per type URI, dispatched by
//! exhaustive match in the engine.

use coralkm_core::{Did, Namespace};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Absolute prefix of every CoralKM type URI.
pub const TYPE_PREFIX: &str = "https://coralstack.com/coralkm/0.1/";

/// A protocol message. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Globally unique message id
    pub id: Uuid,
    /// Sender identity
    pub from: Did,
    /// One or more recipients
    pub to: Vec<Did>,
    /// Threads a reply to a prior request
    pub thid: Option<Uuid>,
    /// Links a sub-dialog to its parent recovery ceremony
    pub pthid: Option<Uuid>,
    /// Typed payload
    pub body: Body,
}

impl Envelope {
    /// Build a message to a single recipient.
    pub fn new(id: Uuid, from: Did, to: Did, body: Body) -> Self {
        Envelope {
            id,
            from,
            to: vec![to],
            thid: None,
            pthid: None,
            body,
        }
    }

    /// Thread this message as a reply to `request_id`.
    pub fn with_thid(mut self, request_id: Uuid) -> Self {
        self.thid = Some(request_id);
        self
    }

    /// Attach this message to a parent ceremony.
    pub fn with_pthid(mut self, ceremony_id: Uuid) -> Self {
        self.pthid = Some(ceremony_id);
        self
    }

    /// The absolute type URI of the body.
    pub fn type_uri(&self) -> String {
        self.body.type_uri()
    }
}

/// Closed set of message payloads, keyed by type URI.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// wallet → gateway: ask for a namespace
    NamespaceRequest,
    /// gateway → wallet: namespace issued
    NamespaceGrant(NamespaceGrantBody),
    /// gateway → wallet: namespace refused
    NamespaceDeny(DenyBody),
    /// wallet → gateway: PUT or GET backup data
    NamespaceSync(NamespaceSyncBody),
    /// gateway → wallet: PUT hash or GET data
    NamespaceSyncResponse(NamespaceSyncResponseBody),
    /// wallet → gateway (fans out to guardians): begin a recovery ceremony
    NamespaceRecoveryRequest(NamespaceRecoveryRequestBody),
    /// wallet → guardian: ask to become a guardian
    GuardianRequest,
    /// guardian → wallet: guardianship accepted
    GuardianGrant,
    /// guardian → wallet: guardianship refused
    GuardianDeny(DenyBody),
    /// wallet → guardian: revoke guardianship
    GuardianRemove,
    /// guardian → wallet: revocation done
    GuardianRemoveConfirm,
    /// wallet → guardian: replace the held share
    GuardianShareUpdate(GuardianShareUpdateBody),
    /// guardian → wallet: share stored
    GuardianShareUpdateConfirm,
    /// guardian → recovering device: verify identity out of band
    GuardianVerificationChallenge(VerificationChallengeBody),
    /// recovering device → guardian: challenge answer
    GuardianVerificationChallengeResponse(ChallengeResponseBody),
    /// guardian → recovering device: threshold share released
    GuardianReleaseShare(ReleaseShareBody),
    /// any → offender: validation or processing failure
    ProblemReport(ProblemReportBody),
}

impl Body {
    /// Type URI suffix under [`TYPE_PREFIX`].
    pub fn type_suffix(&self) -> &'static str {
        match self {
            Body::NamespaceRequest => "namespace-request",
            Body::NamespaceGrant(_) => "namespace-grant",
            Body::NamespaceDeny(_) => "namespace-deny",
            Body::NamespaceSync(_) => "namespace-sync",
            Body::NamespaceSyncResponse(_) => "namespace-sync-response",
            Body::NamespaceRecoveryRequest(_) => "namespace-recovery-request",
            Body::GuardianRequest => "guardian-request",
            Body::GuardianGrant => "guardian-grant",
            Body::GuardianDeny(_) => "guardian-deny",
            Body::GuardianRemove => "guardian-remove",
            Body::GuardianRemoveConfirm => "guardian-remove-confirm",
            Body::GuardianShareUpdate(_) => "guardian-share-update",
            Body::GuardianShareUpdateConfirm => "guardian-share-update-confirm",
            Body::GuardianVerificationChallenge(_) => "guardian-verification-challenge",
            Body::GuardianVerificationChallengeResponse(_) => {
                "guardian-verification-challenge-response"
            }
            Body::GuardianReleaseShare(_) => "guardian-release-share",
            Body::ProblemReport(_) => "report-problem",
        }
    }

    /// Absolute type URI.
    pub fn type_uri(&self) -> String {
        format!("{TYPE_PREFIX}{}", self.type_suffix())
    }
}

/// Body of `namespace-grant`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceGrantBody {
    /// The issued namespace
    pub namespace: Namespace,
}

/// Body of `namespace-deny` and `guardian-deny`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DenyBody {
    /// Optional human-readable reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// PUT or GET direction of a sync request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncOp {
    /// Store backup data
    #[serde(rename = "PUT")]
    Put,
    /// Fetch backup data
    #[serde(rename = "GET")]
    Get,
}

/// Body of `namespace-sync`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceSyncBody {
    /// Direction
    pub request: SyncOp,
    /// PUT only: backup ciphertext, base64url
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// GET only: resolve by namespace id instead of sender identity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_id: Option<Uuid>,
}

/// Body of `namespace-sync-response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceSyncResponseBody {
    /// Direction being answered
    pub request: SyncOp,
    /// PUT: SHA-256 of the stored bytes, hex
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// GET: backup ciphertext, base64url
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// Body of `namespace-recovery-request`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceRecoveryRequestBody {
    /// The device asking for recovery; challenges and shares go here
    pub device_did: Did,
    /// The namespace whose backup is being recovered
    pub namespace: Namespace,
    /// Unix timestamp after which guardians must refuse to act
    pub expires_at: u64,
}

/// Body of `guardian-share-update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardianShareUpdateBody {
    /// Namespace the share belongs to
    pub namespace: Namespace,
    /// Reconstruction threshold after this re-split
    pub threshold: u8,
    /// Share wire bytes, base64url
    pub share: String,
    /// Seconds the guardian waits before storing and confirming, for
    /// exercising slow-confirmation paths
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
}

/// Kind of identity verification a guardian asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    /// A code shared out of band
    Code,
    /// A personal question
    Question,
}

/// A verification challenge issued under `pthid = recovery id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationChallenge {
    /// Challenge id, echoed back in the response
    pub id: Uuid,
    /// What kind of verification this is
    #[serde(rename = "type")]
    pub kind: ChallengeKind,
    /// Instructions shown to the user
    pub instructions: String,
}

/// Body of `guardian-verification-challenge`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationChallengeBody {
    /// The challenge to present to the user
    pub challenge: VerificationChallenge,
}

/// Body of `guardian-verification-challenge-response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeResponseBody {
    /// Which challenge is being answered
    pub challenge_id: Uuid,
    /// The user's answer
    pub response: String,
}

/// Body of `guardian-release-share`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseShareBody {
    /// Share wire bytes, base64url
    pub share: String,
    /// Reconstruction threshold the share was split under
    pub threshold: u8,
}

/// Body of `report-problem`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemReportBody {
    /// Machine-readable code
    pub code: String,
    /// Human-readable comment, may contain `{1}`..`{n}` placeholders
    pub comment: String,
    /// Placeholder arguments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    /// Where to escalate unresolvable problems
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalate_to: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_uris_are_absolute() {
        let body = Body::NamespaceRequest;
        assert_eq!(
            body.type_uri(),
            "https://coralstack.com/coralkm/0.1/namespace-request"
        );
    }

    #[test]
    fn builder_threads_replies() {
        let request_id = Uuid::from_u128(1);
        let reply = Envelope::new(
            Uuid::from_u128(2),
            Did::new("did:coral:gw"),
            Did::new("did:coral:w"),
            Body::GuardianGrant,
        )
        .with_thid(request_id);
        assert_eq!(reply.thid, Some(request_id));
        assert_eq!(reply.pthid, None);
    }

    #[test]
    fn sync_op_uses_wire_names() {
        assert_eq!(serde_json::to_string(&SyncOp::Put).unwrap(), "\"PUT\"");
        assert_eq!(serde_json::to_string(&SyncOp::Get).unwrap(), "\"GET\"");
    }

    #[test]
    fn challenge_kind_is_renamed_to_type() {
        let challenge = VerificationChallenge {
            id: Uuid::nil(),
            kind: ChallengeKind::Code,
            instructions: "enter the code".into(),
        };
        let json = serde_json::to_value(&challenge).unwrap();
        assert_eq!(json["type"], "code");
    }
}

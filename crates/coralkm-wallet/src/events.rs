//! Structured events surfaced to the UI
//!
//! The wallet never blocks on a remote party; outcomes arrive as events the
//! embedding application drains with [`crate::WalletAgent::take_events`].

use crate::backup::WalletBackup;
use coralkm_core::{Did, Namespace};
use uuid::Uuid;

/// Wallet-side protocol outcomes.
#[derive(Debug, Clone, PartialEq)]
pub enum WalletEvent {
    /// A gateway issued a namespace
    NamespaceGranted {
        /// The issued namespace
        namespace: Namespace,
    },
    /// A gateway refused a namespace
    NamespaceDenied {
        /// Stated reason, if any
        reason: Option<String>,
    },
    /// A backup PUT was acknowledged with a matching hash
    BackupSynced {
        /// SHA-256 of the stored ciphertext, hex
        hash: String,
    },
    /// The gateway's hash does not match the client-side hash
    BackupHashMismatch {
        /// Hash computed before sending
        expected: String,
        /// Hash the gateway reported
        actual: String,
    },
    /// A guardian accepted guardianship
    GuardianGranted {
        /// The accepting guardian
        guardian: Did,
    },
    /// A guardian refused guardianship
    GuardianDenied {
        /// The refusing guardian
        guardian: Did,
        /// Stated reason, if any
        reason: Option<String>,
    },
    /// A guardian confirmed removal
    GuardianRemoved {
        /// The removed guardian
        guardian: Did,
    },
    /// Fewer than two granted guardians; no split was performed
    InsufficientGuardians {
        /// Granted guardian count
        count: usize,
    },
    /// Every guardian confirmed the latest re-split
    SharesDistributed {
        /// Threshold of the new split
        threshold: u8,
        /// Guardians holding shares
        guardians: Vec<Did>,
    },
    /// Recovery finished; the backup was decrypted
    RecoveryRestored {
        /// Ceremony id
        recovery_id: Uuid,
        /// The restored backup
        backup: WalletBackup,
    },
    /// The in-flight recovery ceremony passed its deadline
    RecoveryExpired {
        /// Ceremony id
        recovery_id: Uuid,
    },
    /// A request thread passed its reply deadline
    ThreadTimedOut {
        /// The timed-out request id
        thread_id: Uuid,
    },
    /// A counterparty sent a problem report
    ProblemReported {
        /// Machine-readable code
        code: String,
        /// Rendered comment
        comment: String,
    },
}

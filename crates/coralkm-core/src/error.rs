//! Unified error system for CoralKM
//!
//! A single error enum covers the whole protocol taxonomy. Handlers map most
//! variants to problem-report replies; `Internal` is the only class that
//! bubbles up and fails the current request.

use serde::{Deserialize, Serialize};

/// Result alias used across all CoralKM crates.
pub type Result<T> = std::result::Result<T, CoralError>;

/// Unified error type for all CoralKM operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum CoralError {
    /// A message field is missing or ill-typed
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// What was missing or malformed
        message: String,
    },

    /// Message addressed to a role the receiver does not play
    #[error("this party does not play the {role} role")]
    InvalidRole {
        /// The role the message required
        role: String,
    },

    /// Message type outside the supported protocol set
    #[error("unsupported message type: {type_uri}")]
    UnsupportedMessageType {
        /// The offending type URI
        type_uri: String,
    },

    /// The requester has no granted policy for the attempted operation
    #[error("policy not granted for {requester}")]
    PolicyNotGranted {
        /// Identity whose policy check failed
        requester: String,
    },

    /// This party holds no share for the referenced namespace.
    ///
    /// Never reported back to the sender; revealing it would allow guardian
    /// enumeration.
    #[error("not a guardian for the requested namespace")]
    NotAGuardian,

    /// No namespace matches the requested id or owner
    #[error("namespace not found: {message}")]
    NamespaceNotFound {
        /// What was looked up
        message: String,
    },

    /// Associated data absent/present mismatch or byte mismatch
    #[error("associated data mismatch")]
    AeadAadMismatch,

    /// Ciphertext envelope names an algorithm other than AES-GCM
    #[error("unsupported AEAD algorithm: {alg}")]
    AeadUnsupportedAlg {
        /// The algorithm the envelope carried
        alg: String,
    },

    /// Fewer shares than the reconstruction threshold
    #[error("insufficient shares: need {needed}, got {got}")]
    SssInsufficientShares {
        /// Threshold encoded in the share metadata
        needed: usize,
        /// Shares actually supplied
        got: usize,
    },

    /// A share failed structural or consistency checks
    #[error("corrupt or inconsistent share")]
    SssCorruptShare,

    /// A recovery request or thread outlived its deadline
    #[error("expired: {message}")]
    Expired {
        /// What expired
        message: String,
    },

    /// Internal failure (store I/O, serialization, crypto backend)
    #[error("internal error: {message}")]
    Internal {
        /// Description of the failure
        message: String,
    },
}

impl CoralError {
    /// Create an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an invalid-role error.
    pub fn invalid_role(role: impl Into<String>) -> Self {
        Self::InvalidRole { role: role.into() }
    }

    /// Create an unsupported-message-type error.
    pub fn unsupported_type(type_uri: impl Into<String>) -> Self {
        Self::UnsupportedMessageType {
            type_uri: type_uri.into(),
        }
    }

    /// Create a policy-not-granted error.
    pub fn policy_not_granted(requester: impl Into<String>) -> Self {
        Self::PolicyNotGranted {
            requester: requester.into(),
        }
    }

    /// Create a namespace-not-found error.
    pub fn namespace_not_found(message: impl Into<String>) -> Self {
        Self::NamespaceNotFound {
            message: message.into(),
        }
    }

    /// Create an expired error.
    pub fn expired(message: impl Into<String>) -> Self {
        Self::Expired {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Wire code used in problem-report bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => "invalid-argument",
            Self::InvalidRole { .. } => "invalid-role",
            Self::UnsupportedMessageType { .. } => "unsupported-message-type",
            Self::PolicyNotGranted { .. } => "policy-not-granted",
            Self::NotAGuardian => "not-a-guardian",
            Self::NamespaceNotFound { .. } => "namespace-not-found",
            Self::AeadAadMismatch => "aead-aad-mismatch",
            Self::AeadUnsupportedAlg { .. } => "aead-unsupported-alg",
            Self::SssInsufficientShares { .. } => "sss-insufficient-shares",
            Self::SssCorruptShare => "sss-corrupt-share",
            Self::Expired { .. } => "expired",
            Self::Internal { .. } => "internal-error",
        }
    }

    /// Errors that must never be revealed to the sender.
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::NotAGuardian)
    }

    /// Errors that fail the current request instead of producing a reply.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(CoralError::invalid_argument("x").code(), "invalid-argument");
        assert_eq!(CoralError::AeadAadMismatch.code(), "aead-aad-mismatch");
        assert_eq!(CoralError::NotAGuardian.code(), "not-a-guardian");
    }

    #[test]
    fn not_a_guardian_is_silent() {
        assert!(CoralError::NotAGuardian.is_silent());
        assert!(!CoralError::policy_not_granted("w").is_silent());
    }

    #[test]
    fn internal_is_fatal() {
        assert!(CoralError::internal("disk").is_fatal());
        assert!(!CoralError::expired("request").is_fatal());
    }
}

//! Recovery verification seams
//!
//! Identity verification during recovery is deliberately pluggable: the
//! guardian side issues and checks challenges through [`ChallengeVerifier`],
//! the device side answers them through [`ChallengePrompt`]. The demo
//! implementations use a fixed out-of-band code; a production deployment
//! replaces both with a cryptographic challenge-response bound to the
//! ceremony id and device identity.

use crate::messages::{ChallengeKind, VerificationChallenge};
use coralkm_core::Effects;
use uuid::Uuid;

/// The code the demo verifier accepts.
pub const DEMO_VERIFICATION_CODE: &str = "123456";

/// Guardian-side challenge issuing and checking.
pub trait ChallengeVerifier: Send + Sync {
    /// Produce a challenge to send to the recovering device.
    fn issue(&self, effects: &Effects) -> VerificationChallenge;

    /// Check a device's answer to a previously issued challenge.
    fn verify(&self, challenge_id: Uuid, response: &str) -> bool;
}

/// Device-side challenge answering (stands in for the user).
pub trait ChallengePrompt: Send + Sync {
    /// Answer a challenge presented during recovery.
    fn answer(&self, challenge: &VerificationChallenge) -> String;
}

/// Demo verifier: a fixed code shared out of band.
#[derive(Debug, Clone)]
pub struct FixedCodeVerifier {
    code: String,
}

impl FixedCodeVerifier {
    /// Verifier accepting the given code.
    pub fn new(code: impl Into<String>) -> Self {
        FixedCodeVerifier { code: code.into() }
    }
}

impl Default for FixedCodeVerifier {
    fn default() -> Self {
        Self::new(DEMO_VERIFICATION_CODE)
    }
}

impl ChallengeVerifier for FixedCodeVerifier {
    fn issue(&self, effects: &Effects) -> VerificationChallenge {
        VerificationChallenge {
            id: effects.gen_uuid(),
            kind: ChallengeKind::Code,
            instructions: "Enter the verification code shared with your guardian out of band."
                .to_string(),
        }
    }

    fn verify(&self, _challenge_id: Uuid, response: &str) -> bool {
        response == self.code
    }
}

/// Demo prompt: always answers with the given code.
#[derive(Debug, Clone)]
pub struct FixedCodePrompt {
    code: String,
}

impl FixedCodePrompt {
    /// Prompt answering with the given code.
    pub fn new(code: impl Into<String>) -> Self {
        FixedCodePrompt { code: code.into() }
    }
}

impl Default for FixedCodePrompt {
    fn default() -> Self {
        Self::new(DEMO_VERIFICATION_CODE)
    }
}

impl ChallengePrompt for FixedCodePrompt {
    fn answer(&self, _challenge: &VerificationChallenge) -> String {
        self.code.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_prompt_satisfies_demo_verifier() {
        let effects = Effects::test();
        let verifier = FixedCodeVerifier::default();
        let prompt = FixedCodePrompt::default();
        let challenge = verifier.issue(&effects);
        assert!(verifier.verify(challenge.id, &prompt.answer(&challenge)));
    }

    #[test]
    fn wrong_code_is_rejected() {
        let effects = Effects::test();
        let verifier = FixedCodeVerifier::default();
        let challenge = verifier.issue(&effects);
        assert!(!verifier.verify(challenge.id, "000000"));
    }
}

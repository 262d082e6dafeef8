//! PKCE (Proof Key for Code Exchange) utilities for OAuth2
//!
//! Implements RFC 7636 with the S256 challenge method.

use super::cipher::{generate_hash, generate_random_string};

/// Length of the code verifier (RFC 7636 allows 43-128 characters)
pub const CODE_VERIFIER_LENGTH: usize = 128;

/// The only challenge method this crate issues
pub const CHALLENGE_METHOD: &str = "S256";

/// Length of the anti-replay state token
const STATE_LENGTH: usize = 32;

/// PKCE verifier/challenge pair for one authorization attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
    pub method: &'static str,
}

impl PkceChallenge {
    /// Generate a fresh verifier and its S256 challenge
    pub fn new() -> Self {
        let verifier = generate_random_string(CODE_VERIFIER_LENGTH);
        let challenge = generate_hash(&verifier);
        Self {
            verifier,
            challenge,
            method: CHALLENGE_METHOD,
        }
    }
}

impl Default for PkceChallenge {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory authorization attempt state held by the credential manager
#[derive(Debug, Clone, Default)]
pub enum PendingChallenge {
    #[default]
    None,
    Pending {
        pkce: PkceChallenge,
        state: String,
    },
}

impl PendingChallenge {
    /// Start a new attempt for `pkce` with a fresh anti-replay state
    pub fn issue(pkce: PkceChallenge) -> Self {
        PendingChallenge::Pending {
            pkce,
            state: generate_random_string(STATE_LENGTH),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, PendingChallenge::Pending { .. })
    }

    /// Anti-replay state of the pending attempt
    pub fn state(&self) -> Option<&str> {
        match self {
            PendingChallenge::Pending { state, .. } => Some(state),
            PendingChallenge::None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_verifier_length() {
        let pkce = PkceChallenge::new();
        assert_eq!(pkce.verifier.len(), CODE_VERIFIER_LENGTH);
    }

    #[test]
    fn test_code_challenge_format() {
        let pkce = PkceChallenge::new();

        // SHA256 produces 32 bytes, Base64URL encoding produces 43 characters (no padding)
        assert_eq!(pkce.challenge.len(), 43);
        assert_eq!(pkce.method, "S256");
        assert_eq!(pkce.challenge, generate_hash(&pkce.verifier));
    }

    #[test]
    fn test_verifiers_are_unique() {
        let p1 = PkceChallenge::new();
        let p2 = PkceChallenge::new();
        assert_ne!(p1.verifier, p2.verifier, "Verifiers should be unique");
    }

    #[test]
    fn test_pending_challenge() {
        let none = PendingChallenge::default();
        assert!(!none.is_pending());
        assert!(none.state().is_none());

        let pending = PendingChallenge::issue(PkceChallenge::new());
        assert!(pending.is_pending());
        assert_eq!(pending.state().map(str::len), Some(STATE_LENGTH));
    }
}

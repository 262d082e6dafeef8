//! Error types for taskgate

use std::time::Duration;
use thiserror::Error;

/// Result type alias for taskgate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while managing credentials
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No pending PKCE challenge: build an authorization URL before exchanging a code")]
    NoPendingChallenge,

    #[error("Re-authentication required: {0}")]
    ReauthenticationRequired(String),

    #[error("Token endpoint returned {status}: {body}")]
    TokenEndpoint { status: u16, body: String },

    #[error("Credential integrity error: {0}")]
    Integrity(String),

    #[error("Authorization failed: {error} - {description}")]
    AuthorizationDenied { error: String, description: String },

    #[error("State mismatch in authorization callback")]
    StateMismatch,

    #[error("Timed out after {0:?} waiting for the authorization callback")]
    CallbackTimeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OAuth error: {0}")]
    OAuth(String),
}

impl Error {
    /// Whether recovering from this error means running the interactive flow again
    pub fn is_reauth(&self) -> bool {
        matches!(
            self,
            Error::ReauthenticationRequired(_) | Error::NoPendingChallenge | Error::TokenEndpoint { .. }
        )
    }
}

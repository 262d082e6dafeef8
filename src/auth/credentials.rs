//! OAuth2 credential record
//!
//! The unit of persisted authentication state. Field names match the token
//! endpoint's snake_case wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tokens within this many seconds of expiry are treated as expired
pub const EXPIRY_BUFFER_SECS: i64 = 300;

/// OAuth2 credentials with access and refresh tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// The access token for API requests
    pub access_token: String,

    /// The refresh token for obtaining new access tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Token type (usually "Bearer")
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Space-delimited scopes granted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Lifetime in seconds declared by the provider at issuance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,

    /// Unix timestamp after which the access token is unusable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Credentials {
    /// Create credentials without a computed expiry
    pub fn new(access_token: String, refresh_token: Option<String>, expires_in: Option<i64>) -> Self {
        Self {
            access_token,
            refresh_token,
            token_type: default_token_type(),
            scope: None,
            expires_in,
            expires_at: None,
        }
    }

    /// Derive `expires_at` from `expires_in` relative to `now`.
    ///
    /// Any previous `expires_at` is discarded. Without `expires_in` the
    /// record is returned unchanged.
    pub fn with_computed_expiry_at(mut self, now: DateTime<Utc>) -> Self {
        if let Some(secs) = self.expires_in {
            self.expires_at = Some(now.timestamp() + secs);
        }
        self
    }

    /// Whether the token is expired, or expires within the safety buffer, at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now.timestamp() + EXPIRY_BUFFER_SECS,
            None => false, // No declared lifetime means non-expiring
        }
    }

    /// Check if we have a refresh token
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }

    /// Granted scopes as a list
    pub fn scopes(&self) -> Option<Vec<String>> {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().map(str::to_string).collect())
    }
}

//! CredentialManager - OAuth2 credential lifecycle
//!
//! Manages the complete OAuth2 PKCE flow:
//! - Authorization URL construction with a pending PKCE challenge
//! - Code exchange and refresh against the token endpoint
//! - Expiry evaluation and refresh-on-demand for consumers
//!
//! Token endpoint calls are never retried here. A failed exchange or refresh
//! almost always means an invalid code or token, so it surfaces as an error
//! the caller resolves by authenticating again.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;
use crate::Result;
use crate::config::{CallbackConfig, Config, OAuthConfig};
use crate::error::Error;
use super::callback_server::CallbackListener;
use super::credentials::Credentials;
use super::pkce::{PendingChallenge, PkceChallenge};
use super::store::CredentialStore;

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    fn into_credentials(self) -> Credentials {
        let mut credentials = Credentials::new(self.access_token, self.refresh_token, self.expires_in);
        if let Some(token_type) = self.token_type {
            credentials.token_type = token_type;
        }
        credentials.scope = self.scope;
        CredentialStore::with_computed_expiry(credentials)
    }
}

/// Token exchange request
#[derive(Debug, Serialize)]
struct TokenExchangeRequest<'a> {
    grant_type: &'a str,
    code: &'a str,
    code_verifier: &'a str,
    client_id: &'a str,
    redirect_uri: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_secret: Option<&'a str>,
}

/// Token refresh request
#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    grant_type: &'a str,
    refresh_token: &'a str,
    client_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_secret: Option<&'a str>,
}

/// Read-only snapshot of the authentication state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthStatus {
    /// A credential record is stored
    pub is_authenticated: bool,
    /// The stored access token is outside the expiry buffer
    pub has_valid_token: bool,
    /// Unix timestamp of access token expiry
    pub expires_at: Option<i64>,
    pub scopes: Option<Vec<String>>,
}

/// OAuth2 credential manager
///
/// Drive it from a single caller: concurrent exchange or refresh calls are not
/// coordinated.
pub struct CredentialManager {
    oauth: OAuthConfig,
    callback: CallbackConfig,
    redirect_uri: String,
    store: CredentialStore,
    http_client: Client,
    pending: PendingChallenge,
}

impl CredentialManager {
    /// Create a manager storing credentials in the per-user config directory,
    /// keyed with the passphrase from the environment if one is set
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_passphrase(config, crate::config::passphrase().as_deref())
    }

    /// Create a manager over the per-user store, layering `passphrase` over
    /// the machine-derived key
    pub fn with_passphrase(config: &Config, passphrase: Option<&str>) -> Result<Self> {
        let store = CredentialStore::with_passphrase(crate::config::config_dir(), passphrase);
        Self::with_store(config, store)
    }

    /// Create a manager over an explicit store
    pub fn with_store(config: &Config, store: CredentialStore) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            oauth: config.oauth.clone(),
            callback: config.callback.clone(),
            redirect_uri: config.callback.redirect_uri(config.callback.port),
            store,
            http_client: Client::new(),
            pending: PendingChallenge::None,
        })
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Anti-replay state of the pending authorization attempt
    pub fn pending_state(&self) -> Option<&str> {
        self.pending.state()
    }

    /// Generate a fresh PKCE challenge, replacing any pending one
    pub fn create_challenge(&mut self) -> PkceChallenge {
        let pkce = PkceChallenge::new();
        self.pending = PendingChallenge::issue(pkce.clone());
        pkce
    }

    /// Build the authorization URL for a fresh PKCE challenge.
    ///
    /// Only the most recent URL's challenge can be exchanged.
    pub fn build_authorization_url(&mut self) -> Result<String> {
        let pkce = self.create_challenge();
        let state = self.pending_state().ok_or(Error::NoPendingChallenge)?.to_string();

        let mut url = Url::parse(&self.oauth.auth_url)
            .map_err(|e| Error::Config(format!("Invalid auth URL: {}", e)))?;

        url.query_pairs_mut()
            .append_pair("client_id", &self.oauth.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.oauth.scopes.join(" "))
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", pkce.method)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("state", &state);

        Ok(url.to_string())
    }

    /// Exchange an authorization code using the pending PKCE verifier.
    ///
    /// On success the credentials are persisted and the challenge is consumed.
    pub async fn exchange_code(&mut self, code: &str) -> Result<Credentials> {
        let verifier = match &self.pending {
            PendingChallenge::Pending { pkce, .. } => pkce.verifier.clone(),
            PendingChallenge::None => return Err(Error::NoPendingChallenge),
        };

        let request = TokenExchangeRequest {
            grant_type: "authorization_code",
            code,
            code_verifier: &verifier,
            client_id: &self.oauth.client_id,
            redirect_uri: &self.redirect_uri,
            client_secret: self.oauth.client_secret.as_deref(),
        };

        tracing::info!("Exchanging authorization code");
        let credentials = self.post_token(&request).await?;

        self.store.save(&credentials)?;
        self.pending = PendingChallenge::None;
        Ok(credentials)
    }

    /// Refresh the stored access token.
    ///
    /// A refresh token omitted by the provider is carried forward from the
    /// stored record.
    pub async fn refresh(&self) -> Result<Credentials> {
        let current = self.store.load()?.ok_or_else(|| {
            Error::ReauthenticationRequired("no stored credentials".to_string())
        })?;
        let refresh_token = current.refresh_token.as_deref().ok_or_else(|| {
            Error::ReauthenticationRequired("no refresh token available".to_string())
        })?;

        let request = RefreshRequest {
            grant_type: "refresh_token",
            refresh_token,
            client_id: &self.oauth.client_id,
            client_secret: self.oauth.client_secret.as_deref(),
        };

        tracing::info!("Refreshing access token");
        let mut credentials = self.post_token(&request).await?;
        if credentials.refresh_token.is_none() {
            credentials.refresh_token = current.refresh_token.clone();
        }
        if credentials.scope.is_none() {
            credentials.scope = current.scope.clone();
        }

        self.store.save(&credentials)?;
        Ok(credentials)
    }

    async fn post_token<T: Serialize>(&self, form: &T) -> Result<Credentials> {
        let response = self.http_client
            .post(&self.oauth.token_url)
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::TokenEndpoint {
                status: status.as_u16(),
                body,
            });
        }

        let token_response: TokenResponse = response.json().await?;
        Ok(token_response.into_credentials())
    }

    /// Whether stored credentials exist and are outside the expiry buffer
    pub fn is_valid(&self) -> Result<bool> {
        Ok(self
            .store
            .load()?
            .map(|creds| !CredentialStore::is_expired(&creds))
            .unwrap_or(false))
    }

    /// Get a valid access token, refreshing once if needed.
    ///
    /// Never falls back to an expired token.
    pub async fn get_valid_access_token(&self) -> Result<String> {
        if let Some(creds) = self.store.load()? {
            if !CredentialStore::is_expired(&creds) {
                tracing::debug!("Using cached access token");
                return Ok(creds.access_token);
            }
        }

        match self.refresh().await {
            Ok(creds) => Ok(creds.access_token),
            Err(e @ (Error::Integrity(_) | Error::Io(_) | Error::ReauthenticationRequired(_))) => Err(e),
            Err(e) => {
                tracing::warn!("Token refresh failed: {}", e);
                Err(Error::ReauthenticationRequired(format!("token refresh failed: {}", e)))
            }
        }
    }

    /// Like [`get_valid_access_token`](Self::get_valid_access_token) but
    /// returns `None` when no usable credentials can be produced.
    pub async fn get_valid_credentials_or_none(&self) -> Result<Option<Credentials>> {
        if let Some(creds) = self.store.load()? {
            if !CredentialStore::is_expired(&creds) {
                return Ok(Some(creds));
            }
        }

        match self.refresh().await {
            Ok(creds) => Ok(Some(creds)),
            Err(e @ (Error::Integrity(_) | Error::Io(_))) => Err(e),
            Err(e) => {
                tracing::debug!("No usable credentials: {}", e);
                Ok(None)
            }
        }
    }

    /// Snapshot of the stored credentials. Never refreshes.
    pub fn status(&self) -> Result<AuthStatus> {
        Ok(match self.store.load()? {
            Some(creds) => AuthStatus {
                is_authenticated: true,
                has_valid_token: !CredentialStore::is_expired(&creds),
                expires_at: creds.expires_at,
                scopes: creds.scopes(),
            },
            None => AuthStatus {
                is_authenticated: false,
                has_valid_token: false,
                expires_at: None,
                scopes: None,
            },
        })
    }

    /// Run the browser flow, printing the URL and opening it when `open_browser` is set
    pub async fn run_interactive_flow(&mut self, open_browser: bool) -> Result<Credentials> {
        self.run_interactive_flow_with(|url| {
            if open_browser {
                crate::ui::print_step("Opening browser for authorization...");
                println!("\nIf the browser doesn't open, visit this URL:\n{}\n", url);
                if let Err(e) = open::that(url) {
                    tracing::warn!("Failed to open browser: {}", e);
                }
            } else {
                println!("\nVisit this URL to authorize:\n{}\n", url);
            }
            crate::ui::print_thinking("Waiting for authorization");
        })
        .await
    }

    /// Run the full flow, handing the authorization URL to `present`.
    ///
    /// The callback listener is stopped on every exit path.
    pub async fn run_interactive_flow_with<F>(&mut self, present: F) -> Result<Credentials>
    where
        F: FnOnce(&str),
    {
        let mut listener = CallbackListener::new(&self.callback);
        let result = self.complete_flow(&mut listener, present).await;
        listener.stop();
        result
    }

    async fn complete_flow<F>(&mut self, listener: &mut CallbackListener, present: F) -> Result<Credentials>
    where
        F: FnOnce(&str),
    {
        let port = listener.start().await?;
        self.redirect_uri = self.callback.redirect_uri(port);

        let auth_url = self.build_authorization_url()?;
        if let Some(state) = self.pending_state() {
            listener.expect_state(state);
        }

        present(&auth_url);

        let code = listener.await_result().await?;
        self.exchange_code(&code).await
    }

    /// Remove stored credentials
    pub fn logout(&self) -> Result<()> {
        self.store.clear()
    }
}

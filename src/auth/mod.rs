//! Authentication module for OAuth2 and credential management
//!
//! This module provides:
//! - Symmetric encryption and key derivation for credentials at rest
//! - PKCE code generation for OAuth2 flows
//! - Encrypted credential storage and retrieval
//! - OAuth2 callback listener
//! - CredentialManager tying the lifecycle together

mod cipher;
mod pkce;
mod credentials;
mod store;
mod callback_server;
mod provider;

pub use cipher::{derive_key, generate_hash, generate_random_string, secure_compare, Key, PBKDF2_ITERATIONS};
pub use pkce::{PendingChallenge, PkceChallenge};
pub use credentials::{Credentials, EXPIRY_BUFFER_SECS};
pub use store::{CredentialStore, TOKEN_FILE_NAME};
pub(crate) use store::ensure_private_dir;
pub use callback_server::{CallbackListener, ListenerState};
pub use provider::{AuthStatus, CredentialManager};

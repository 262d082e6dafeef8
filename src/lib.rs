//! taskgate - OAuth2 credential lifecycle for a local task-list service
//!
//! This library authenticates against a remote OAuth2 provider with the
//! Authorization Code flow and PKCE, keeps the resulting tokens encrypted at
//! rest, and refreshes them on demand. Consumers need only
//! [`CredentialManager::get_valid_access_token`](auth::CredentialManager::get_valid_access_token),
//! `status`, `run_interactive_flow` and `logout`.

pub mod auth;
pub mod config;
pub mod error;
pub mod ui;

pub use error::{Error, Result};

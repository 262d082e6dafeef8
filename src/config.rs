//! Configuration management

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::Result;
use crate::error::Error;

/// Environment variable overriding the per-user config directory
pub const HOME_ENV: &str = "TASKGATE_HOME";

/// Environment variable overriding the OAuth client id
pub const CLIENT_ID_ENV: &str = "TASKGATE_CLIENT_ID";

/// Environment variable overriding the OAuth client secret
pub const CLIENT_SECRET_ENV: &str = "TASKGATE_CLIENT_SECRET";

/// Environment variable holding the optional credential store passphrase.
/// Never read from or written to `config.json`.
pub const PASSPHRASE_ENV: &str = "TASKGATE_PASSPHRASE";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// OAuth client and provider endpoints
    #[serde(default)]
    pub oauth: OAuthConfig,

    /// Local callback listener
    #[serde(default)]
    pub callback: CallbackConfig,
}

/// OAuth client registration and provider endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    #[serde(default)]
    pub client_id: String,

    /// Only sent when the provider issued one (installed-app clients)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    #[serde(default = "default_auth_url")]
    pub auth_url: String,

    #[serde(default = "default_token_url")]
    pub token_url: String,

    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

/// Local redirect listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackConfig {
    #[serde(default = "default_callback_host")]
    pub host: String,

    /// Preferred port; the next free port above it is used when taken
    #[serde(default = "default_callback_port")]
    pub port: u16,

    #[serde(default = "default_callback_path")]
    pub path: String,

    #[serde(default = "default_callback_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_auth_url() -> String {
    "https://accounts.google.com/o/oauth2/v2/auth".to_string()
}

fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_scopes() -> Vec<String> {
    vec!["https://www.googleapis.com/auth/tasks".to_string()]
}

fn default_callback_host() -> String {
    "127.0.0.1".to_string()
}

fn default_callback_port() -> u16 {
    3000
}

fn default_callback_path() -> String {
    "/oauth/callback".to_string()
}

fn default_callback_timeout_secs() -> u64 {
    300
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            scopes: default_scopes(),
        }
    }
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            host: default_callback_host(),
            port: default_callback_port(),
            path: default_callback_path(),
            timeout_secs: default_callback_timeout_secs(),
        }
    }
}

impl CallbackConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Redirect URI for a listener bound to `port`
    pub fn redirect_uri(&self, port: u16) -> String {
        format!("http://{}:{}{}", self.host, port, self.path)
    }
}

impl Config {
    /// Check that the configuration can drive an authorization flow
    pub fn validate(&self) -> Result<()> {
        if self.oauth.client_id.trim().is_empty() {
            return Err(Error::Config(format!(
                "OAuth client_id is not set. Run 'taskgate init' or set {}.",
                CLIENT_ID_ENV
            )));
        }
        if self.oauth.scopes.is_empty() {
            return Err(Error::Config("At least one OAuth scope is required".to_string()));
        }
        if !self.callback.path.starts_with('/') {
            return Err(Error::Config(format!(
                "Callback path must start with '/': {}",
                self.callback.path
            )));
        }
        Ok(())
    }

    /// Apply environment variable overrides
    fn apply_env(&mut self) {
        if let Ok(client_id) = std::env::var(CLIENT_ID_ENV) {
            if !client_id.is_empty() {
                self.oauth.client_id = client_id;
            }
        }
        if let Ok(secret) = std::env::var(CLIENT_SECRET_ENV) {
            if !secret.is_empty() {
                self.oauth.client_secret = Some(secret);
            }
        }
    }
}

/// Get the config directory path
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(HOME_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".taskgate")
}

/// Get the config file path
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Load configuration from file, falling back to defaults, then apply env overrides
pub fn load() -> Result<Config> {
    let mut config = load_from(&config_path())?;
    config.apply_env();
    Ok(config)
}

/// Read `path`, or defaults when it does not exist. A file that exists but
/// cannot be read or parsed is an error.
pub fn load_from(path: &Path) -> Result<Config> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!("No config at {:?}, using defaults", path);
            return Ok(Config::default());
        }
        Err(e) => return Err(e.into()),
    };

    serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("Invalid config file {:?}: {}", path, e)))
}

/// Save configuration to file
pub fn save(config: &Config) -> Result<()> {
    save_to(&config_path(), config)
}

/// Write `config` to `path`, owner read/write only from creation
pub fn save_to(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        crate::auth::ensure_private_dir(parent)?;
    }

    let content = serde_json::to_string_pretty(config)?;

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(content.as_bytes())?;
    file.flush()?;

    // An existing file keeps its old mode through open()
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

/// Credential store passphrase from the environment, if set
pub fn passphrase() -> Option<String> {
    std::env::var(PASSPHRASE_ENV).ok().filter(|p| !p.is_empty())
}

/// Ask for the credential store passphrase without echoing it
pub fn prompt_passphrase() -> Result<String> {
    use inquire::{Password, PasswordDisplayMode};

    Password::new("Credential store passphrase:")
        .without_confirmation()
        .with_display_mode(PasswordDisplayMode::Masked)
        .prompt()
        .map_err(|e| Error::Config(format!("Prompt failed: {}", e)))
}

/// Interactive setup of the OAuth client registration
pub fn onboard() -> Result<Config> {
    use crate::ui;
    use inquire::{Password, PasswordDisplayMode, Text};

    ui::print_header("Setup");
    println!("  Register a desktop OAuth client with your provider, then enter its details.\n");

    // A broken config.json must not be silently replaced with defaults
    let mut config = load()?;

    let client_id = Text::new("OAuth client ID:")
        .with_initial_value(&config.oauth.client_id)
        .prompt()
        .map_err(|e| Error::Config(format!("Prompt failed: {}", e)))?;
    config.oauth.client_id = client_id.trim().to_string();

    let secret = Password::new("OAuth client secret (leave empty if none):")
        .without_confirmation()
        .with_display_mode(PasswordDisplayMode::Masked)
        .prompt()
        .map_err(|e| Error::Config(format!("Prompt failed: {}", e)))?;
    config.oauth.client_secret = Some(secret.trim().to_string()).filter(|s| !s.is_empty());

    config.validate()?;

    ui::print_thinking("Saving configuration");
    save(&config)?;
    ui::print_success(&format!("Configuration written to {:?}", config_path()));

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.callback.port, 3000);
        assert_eq!(config.callback.path, "/oauth/callback");
        assert_eq!(config.callback.timeout(), Duration::from_secs(300));
        assert_eq!(config.oauth.scopes, vec!["https://www.googleapis.com/auth/tasks"]);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"oauth":{"client_id":"abc"}}"#).unwrap();
        assert_eq!(config.oauth.client_id, "abc");
        assert_eq!(config.oauth.token_url, "https://oauth2.googleapis.com/token");
        assert_eq!(config.callback.host, "127.0.0.1");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_requires_client_id() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_redirect_uri() {
        let callback = CallbackConfig::default();
        assert_eq!(callback.redirect_uri(3001), "http://127.0.0.1:3001/oauth/callback");
    }

    #[test]
    fn test_load_from_missing_is_default() {
        let dir = TempDir::new().unwrap();
        let config = load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config.callback.port, 3000);
        assert!(config.oauth.client_id.is_empty());
    }

    #[test]
    fn test_load_from_invalid_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"oauth":{"client_id":"abc","token_url":"#).unwrap();

        assert!(matches!(load_from(&path), Err(Error::Config(_))));
        // The broken file is left for the operator to fix
        assert!(std::fs::read_to_string(&path).unwrap().contains("client_id"));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.oauth.client_id = "client".to_string();
        config.oauth.token_url = "https://example.test/token".to_string();
        config.callback.port = 4100;
        save_to(&path, &config).unwrap();

        let loaded = load_from(&path).unwrap();
        assert_eq!(loaded.oauth.client_id, "client");
        assert_eq!(loaded.oauth.token_url, "https://example.test/token");
        assert_eq!(loaded.callback.port, 4100);
    }

    #[test]
    fn test_passphrase_is_not_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        // Files written by older versions may still carry one
        std::fs::write(&path, r#"{"oauth":{"client_id":"abc","passphrase":"hunter2"}}"#).unwrap();
        let config = load_from(&path).unwrap();
        save_to(&path, &config).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("passphrase"));
        assert!(!raw.contains("hunter2"));
    }

    #[cfg(unix)]
    #[test]
    fn test_save_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let mode = |path: &Path| std::fs::metadata(path).unwrap().permissions().mode() & 0o777;

        save_to(&path, &Config::default()).unwrap();
        assert_eq!(mode(&path), 0o600);

        // An existing world-readable file is tightened on rewrite
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        save_to(&path, &Config::default()).unwrap();
        assert_eq!(mode(&path), 0o600);
    }
}

//! Encrypted single-record credential storage
//!
//! Persists credentials to `<config dir>/tokens.enc` as an AES-256-GCM
//! envelope. The key is derived from machine identity (hostname and OS
//! username) with a fixed application salt, so the same machine and user
//! always rederive it without prompting. The ciphertext is therefore only as
//! strong as an attacker's difficulty in impersonating that identity.
//!
//! A passphrase can be layered over the identity. It only adds protection
//! when it is kept off disk: the CLI takes it from `TASKGATE_PASSPHRASE` or a
//! prompt, never from `config.json`.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use chrono::Utc;
use crate::Result;
use crate::error::Error;
use super::cipher::{self, Envelope, Key, PBKDF2_ITERATIONS};
use super::credentials::Credentials;

/// Credential file name inside the config directory
pub const TOKEN_FILE_NAME: &str = "tokens.enc";

/// Application-level key derivation salt. Fixed so keys rederive across runs.
const KEY_SALT: &[u8] = b"taskgate-credential-store-v1";

/// Encrypted credential store backed by a single file
#[derive(Clone)]
pub struct CredentialStore {
    path: PathBuf,
    key: Key,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl CredentialStore {
    /// Open a store in `dir` keyed by machine identity
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self::with_passphrase(dir, None)
    }

    /// Open a store in `dir`, layering an optional passphrase over machine identity
    pub fn with_passphrase(dir: impl AsRef<Path>, passphrase: Option<&str>) -> Self {
        let mut secret = machine_identity();
        if let Some(passphrase) = passphrase.filter(|p| !p.is_empty()) {
            secret.push(':');
            secret.push_str(passphrase);
        }
        let key = cipher::derive_key(&secret, KEY_SALT, PBKDF2_ITERATIONS);
        Self::with_key(dir, key)
    }

    /// Open a store in `dir` with an explicit key
    pub fn with_key(dir: impl AsRef<Path>, key: Key) -> Self {
        Self {
            path: dir.as_ref().join(TOKEN_FILE_NAME),
            key,
        }
    }

    /// Path of the encrypted credential file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Encrypt and write credentials, owner read/write only
    pub fn save(&self, credentials: &Credentials) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            ensure_private_dir(parent)?;
        }

        let plaintext = serde_json::to_string(credentials)?;
        let envelope = cipher::encrypt(&plaintext, &self.key)?;
        let content = serde_json::to_string_pretty(&envelope)?;

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path)?;
        file.write_all(content.as_bytes())?;
        file.flush()?;

        // The mode above only applies on creation
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!("Saved credentials to {:?}", self.path);
        Ok(())
    }

    /// Load and decrypt credentials.
    ///
    /// Returns `Ok(None)` only when the file does not exist. Corrupt or
    /// undecryptable contents are an [`Error::Integrity`].
    pub fn load(&self) -> Result<Option<Credentials>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let envelope: Envelope = serde_json::from_str(&content)
            .map_err(|e| Error::Integrity(format!("malformed credential file {:?}: {}", self.path, e)))?;
        let plaintext = cipher::decrypt(&envelope, &self.key)?;
        let credentials = serde_json::from_str(&plaintext)
            .map_err(|e| Error::Integrity(format!("malformed credential record: {}", e)))?;

        Ok(Some(credentials))
    }

    /// Delete stored credentials. A missing file is not an error.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!("Removed credentials at {:?}", self.path);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a credential file exists. Does not decrypt.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Whether `credentials` is expired or within the safety buffer of expiry
    pub fn is_expired(credentials: &Credentials) -> bool {
        credentials.is_expired_at(Utc::now())
    }

    /// Stamp `expires_at` from `expires_in` relative to now
    pub fn with_computed_expiry(credentials: Credentials) -> Credentials {
        credentials.with_computed_expiry_at(Utc::now())
    }
}

/// Hostname and OS username of the current process
fn machine_identity() -> String {
    let hostname = whoami::fallible::hostname().unwrap_or_else(|_| "unknown-host".to_string());
    let username = whoami::username();
    format!("{}:{}", hostname, username)
}

/// Create `dir` with owner-only permissions if it does not exist
pub(crate) fn ensure_private_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        return Ok(());
    }

    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store(dir: &TempDir) -> CredentialStore {
        CredentialStore::with_key(dir.path(), [9u8; 32])
    }

    fn sample() -> Credentials {
        let mut creds = Credentials::new(
            "access".to_string(),
            Some("refresh".to_string()),
            Some(3600),
        );
        creds.scope = Some("https://www.googleapis.com/auth/tasks".to_string());
        CredentialStore::with_computed_expiry(creds)
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let creds = sample();

        assert!(!store.exists());
        store.save(&creds).unwrap();
        assert!(store.exists());

        assert_eq!(store.load().unwrap(), Some(creds));
    }

    #[test]
    fn test_file_is_encrypted_envelope() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        store.save(&sample()).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains("access"));

        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let fields: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(fields, vec!["data", "iv", "salt"]);
    }

    #[test]
    fn test_machine_key_roundtrip() {
        let dir = TempDir::new().unwrap();
        CredentialStore::new(dir.path()).save(&sample()).unwrap();

        // A fresh instance rederives the same key
        let loaded = CredentialStore::new(dir.path()).load().unwrap();
        assert_eq!(loaded.map(|c| c.access_token).as_deref(), Some("access"));
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(test_store(&dir).load().unwrap().is_none());
    }

    #[test]
    fn test_load_invalid_json_is_fatal() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        fs::write(store.path(), "not json {").unwrap();

        assert!(matches!(store.load(), Err(Error::Integrity(_))));
    }

    #[test]
    fn test_load_with_wrong_key_is_fatal() {
        let dir = TempDir::new().unwrap();
        test_store(&dir).save(&sample()).unwrap();

        let other = CredentialStore::with_key(dir.path(), [1u8; 32]);
        assert!(matches!(other.load(), Err(Error::Integrity(_))));
    }

    #[test]
    fn test_clear() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        // Clearing when absent succeeds
        store.clear().unwrap();

        store.save(&sample()).unwrap();
        store.clear().unwrap();
        assert!(!store.exists());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_passphrase_must_match() {
        let dir = TempDir::new().unwrap();
        CredentialStore::with_passphrase(dir.path(), Some("correct horse"))
            .save(&sample())
            .unwrap();

        let without = CredentialStore::with_passphrase(dir.path(), None);
        assert!(matches!(without.load(), Err(Error::Integrity(_))));

        let different = CredentialStore::with_passphrase(dir.path(), Some("battery staple"));
        assert!(matches!(different.load(), Err(Error::Integrity(_))));

        let same = CredentialStore::with_passphrase(dir.path(), Some("correct horse"));
        assert_eq!(same.load().unwrap().map(|c| c.access_token).as_deref(), Some("access"));
    }

    #[test]
    fn test_empty_passphrase_is_machine_key() {
        let dir = TempDir::new().unwrap();
        CredentialStore::new(dir.path()).save(&sample()).unwrap();

        let loaded = CredentialStore::with_passphrase(dir.path(), Some("")).load().unwrap();
        assert!(loaded.is_some());
    }

    #[cfg(unix)]
    #[test]
    fn test_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let config_dir = dir.path().join("nested").join("taskgate");
        let store = CredentialStore::with_key(&config_dir, [9u8; 32]);
        store.save(&sample()).unwrap();

        let file_mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(file_mode & 0o777, 0o600);

        let dir_mode = fs::metadata(&config_dir).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o700);
    }

    #[test]
    fn test_is_expired() {
        let mut creds = sample();
        assert!(!CredentialStore::is_expired(&creds));

        creds.expires_at = Some(Utc::now().timestamp() + 120);
        assert!(CredentialStore::is_expired(&creds));

        creds.expires_at = None;
        assert!(!CredentialStore::is_expired(&creds));
    }
}

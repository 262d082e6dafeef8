//! Symmetric encryption primitives for credentials at rest
//!
//! AES-256-GCM with a 128-bit IV and a random 256-bit value bound in as
//! additional authenticated data. Keys come from PBKDF2-HMAC-SHA256.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use crate::Result;
use crate::error::Error;

/// AES-256-GCM keyed for 16-byte nonces
type Aes256Gcm128 = AesGcm<Aes256, U16>;

/// Size of a derived key in bytes (256 bits)
pub const KEY_LEN: usize = 32;

/// Size of the IV in bytes (128 bits)
pub const IV_LEN: usize = 16;

/// Size of the random additional authenticated data in bytes (256 bits)
pub const AAD_LEN: usize = 32;

/// Minimum PBKDF2 iteration count
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// A 256-bit symmetric key
pub type Key = [u8; KEY_LEN];

/// Encrypted payload as written to disk.
///
/// `salt` is the per-encryption AAD, not a key-derivation salt. The name is
/// kept for compatibility with existing credential files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Hex ciphertext with the 16-byte GCM tag appended
    pub data: String,
    /// Hex IV
    pub iv: String,
    /// Hex AAD
    pub salt: String,
}

/// Derive a 256-bit key from secret material with PBKDF2-HMAC-SHA256.
///
/// Deterministic: identical inputs always yield identical keys. Counts below
/// [`PBKDF2_ITERATIONS`] are raised to it.
pub fn derive_key(secret: &str, salt: &[u8], iterations: u32) -> Key {
    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(secret.as_bytes(), salt, iterations.max(PBKDF2_ITERATIONS), &mut key);
    key
}

/// Encrypt a UTF-8 payload under `key` with a fresh IV and AAD.
pub fn encrypt(plaintext: &str, key: &Key) -> Result<Envelope> {
    let cipher = Aes256Gcm128::new(GenericArray::from_slice(key));

    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    let mut aad = [0u8; AAD_LEN];
    OsRng.fill_bytes(&mut aad);

    let data = cipher
        .encrypt(
            GenericArray::from_slice(&iv),
            Payload { msg: plaintext.as_bytes(), aad: &aad },
        )
        .map_err(|_| Error::Integrity("encryption failed".to_string()))?;

    Ok(Envelope {
        data: hex::encode(data),
        iv: hex::encode(iv),
        salt: hex::encode(aad),
    })
}

/// Decrypt an envelope. Any tampering or a wrong key fails the tag check.
pub fn decrypt(envelope: &Envelope, key: &Key) -> Result<String> {
    let data = decode_field(&envelope.data, "data")?;
    let iv = decode_field(&envelope.iv, "iv")?;
    let aad = decode_field(&envelope.salt, "salt")?;

    if iv.len() != IV_LEN {
        return Err(Error::Integrity(format!(
            "invalid IV size: expected {}, got {}",
            IV_LEN,
            iv.len()
        )));
    }

    let cipher = Aes256Gcm128::new(GenericArray::from_slice(key));
    let plaintext = cipher
        .decrypt(GenericArray::from_slice(&iv), Payload { msg: &data, aad: &aad })
        .map_err(|_| Error::Integrity("decryption failed (wrong key or corrupted data)".to_string()))?;

    String::from_utf8(plaintext)
        .map_err(|_| Error::Integrity("decrypted data is not valid UTF-8".to_string()))
}

fn decode_field(value: &str, field: &str) -> Result<Vec<u8>> {
    hex::decode(value)
        .map_err(|e| Error::Integrity(format!("failed to decode envelope field `{}`: {}", field, e)))
}

/// Generate a random string of exactly `length` URL-safe characters (`[A-Za-z0-9_-]`)
pub fn generate_random_string(length: usize) -> String {
    let mut bytes = vec![0u8; length];
    OsRng.fill_bytes(&mut bytes);
    let mut encoded = URL_SAFE_NO_PAD.encode(&bytes);
    encoded.truncate(length);
    encoded
}

/// SHA-256 digest, base64url encoded without padding
pub fn generate_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Constant-time string equality. Only the length comparison can short-circuit.
pub fn secure_compare(a: &str, b: &str) -> bool {
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> Key {
        derive_key("test-host:test-user", b"test-salt", PBKDF2_ITERATIONS)
    }

    fn flip_first_byte(hex_value: &str) -> String {
        let mut bytes = hex::decode(hex_value).unwrap();
        bytes[0] ^= 0x01;
        hex::encode(bytes)
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = [7u8; KEY_LEN];
        let plaintext = r#"{"access_token":"ya29.secret"}"#;

        let envelope = encrypt(plaintext, &key).unwrap();
        assert_ne!(envelope.data, plaintext);
        assert_eq!(decrypt(&envelope, &key).unwrap(), plaintext);
    }

    #[test]
    fn test_envelope_sizes() {
        let key = [7u8; KEY_LEN];
        let envelope = encrypt("abc", &key).unwrap();

        assert_eq!(envelope.iv.len(), IV_LEN * 2);
        assert_eq!(envelope.salt.len(), AAD_LEN * 2);
        // 3 bytes of ciphertext + 16 byte tag
        assert_eq!(envelope.data.len(), (3 + 16) * 2);
    }

    #[test]
    fn test_encryptions_are_randomized() {
        let key = [7u8; KEY_LEN];
        let e1 = encrypt("same-plaintext", &key).unwrap();
        let e2 = encrypt("same-plaintext", &key).unwrap();

        assert_ne!(e1.iv, e2.iv);
        assert_ne!(e1.salt, e2.salt);
        assert_ne!(e1.data, e2.data);
        assert_eq!(decrypt(&e1, &key).unwrap(), "same-plaintext");
        assert_eq!(decrypt(&e2, &key).unwrap(), "same-plaintext");
    }

    #[test]
    fn test_tampering_fails() {
        let key = [7u8; KEY_LEN];
        let envelope = encrypt("secret", &key).unwrap();

        let mut tampered = envelope.clone();
        tampered.data = flip_first_byte(&envelope.data);
        assert!(matches!(decrypt(&tampered, &key), Err(Error::Integrity(_))));

        let mut tampered = envelope.clone();
        tampered.iv = flip_first_byte(&envelope.iv);
        assert!(matches!(decrypt(&tampered, &key), Err(Error::Integrity(_))));

        let mut tampered = envelope.clone();
        tampered.salt = flip_first_byte(&envelope.salt);
        assert!(matches!(decrypt(&tampered, &key), Err(Error::Integrity(_))));
    }

    #[test]
    fn test_wrong_key_fails() {
        let envelope = encrypt("secret", &[1u8; KEY_LEN]).unwrap();
        assert!(matches!(decrypt(&envelope, &[2u8; KEY_LEN]), Err(Error::Integrity(_))));
    }

    #[test]
    fn test_malformed_envelope_fails() {
        let key = [7u8; KEY_LEN];
        let mut envelope = encrypt("secret", &key).unwrap();
        envelope.iv = "abcd".to_string();
        assert!(matches!(decrypt(&envelope, &key), Err(Error::Integrity(_))));

        envelope.iv = "not hex".to_string();
        assert!(matches!(decrypt(&envelope, &key), Err(Error::Integrity(_))));
    }

    #[test]
    fn test_derive_key_deterministic() {
        let k1 = test_key();
        let k2 = test_key();
        assert_eq!(k1, k2);

        let other = derive_key("other-host:test-user", b"test-salt", PBKDF2_ITERATIONS);
        assert_ne!(k1, other);
    }

    #[test]
    fn test_derived_key_roundtrip() {
        let key = test_key();
        let envelope = encrypt("payload", &key).unwrap();
        assert_eq!(decrypt(&envelope, &test_key()).unwrap(), "payload");
    }

    #[test]
    fn test_random_string_length_and_alphabet() {
        for length in [0, 1, 7, 43, 128, 200] {
            let s = generate_random_string(length);
            assert_eq!(s.len(), length);
            for c in s.chars() {
                assert!(
                    c.is_ascii_alphanumeric() || c == '-' || c == '_',
                    "Invalid character: {}", c
                );
            }
        }
    }

    #[test]
    fn test_random_strings_are_unique() {
        assert_ne!(generate_random_string(32), generate_random_string(32));
    }

    #[test]
    fn test_generate_hash_rfc7636_vector() {
        // RFC 7636 appendix B
        assert_eq!(
            generate_hash("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_secure_compare() {
        assert!(secure_compare("abc", "abc"));
        assert!(!secure_compare("abc", "abd"));
        assert!(!secure_compare("abc", "abcd"));
        assert!(secure_compare("", ""));
        assert!(!secure_compare("", "a"));

        let state = generate_random_string(32);
        assert!(secure_compare(&state, &state.clone()));
        assert!(!secure_compare(&state, &generate_random_string(32)));
    }
}

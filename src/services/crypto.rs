use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use pbkdf2::pbkdf2_hmac;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use crate::error::{Error, Result};

/// Fixed KDF salt. Changing it invalidates every stored secret, so it is
/// versioned in the name.
const KDF_SALT: &[u8] = b"fireside_salt_v1";
const KDF_ITERATIONS: u32 = 100_000;
const NONCE_LEN: usize = 12;

/// Symmetric cipher for secret-classified settings, keyed from the process
/// secret via PBKDF2-HMAC-SHA256.
///
/// Created once at startup and shared; callers never see raw ciphertext or
/// the derived key.
#[derive(Clone)]
pub struct SecretCipher {
    key: [u8; 32],
}

impl SecretCipher {
    pub fn new(process_secret: &SecretString) -> Self {
        let mut key = [0u8; 32];
        pbkdf2_hmac::<Sha256>(
            process_secret.expose_secret().as_bytes(),
            KDF_SALT,
            KDF_ITERATIONS,
            &mut key,
        );
        Self { key }
    }

    /// Encrypts a plaintext secret to a base64 token (nonce || ciphertext).
    /// Empty plaintext seals to an empty string.
    pub fn seal(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| Error::Internal(format!("Encryption failed: {}", e)))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);

        Ok(URL_SAFE_NO_PAD.encode(payload))
    }

    /// Decrypts a sealed token back to plaintext. Empty input opens to an
    /// empty string.
    pub fn open(&self, sealed: &str) -> Result<String> {
        if sealed.is_empty() {
            return Ok(String::new());
        }

        let payload = URL_SAFE_NO_PAD
            .decode(sealed)
            .map_err(|e| Error::Internal(format!("Invalid sealed secret encoding: {}", e)))?;

        if payload.len() <= NONCE_LEN {
            return Err(Error::Internal("Sealed secret too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| {
                Error::Internal(
                    "Failed to decrypt stored secret. The process secret may have changed."
                        .to_string(),
                )
            })?;

        String::from_utf8(plaintext)
            .map_err(|e| Error::Internal(format!("Decrypted secret is not UTF-8: {}", e)))
    }
}

/// Mask a secret for display: the first `show_chars` characters followed
/// by an ellipsis. Too-short or empty secrets mask to an empty string.
pub fn mask_secret(secret: &str, show_chars: usize) -> String {
    if secret.is_empty() || secret.chars().count() < show_chars {
        return String::new();
    }
    let prefix: String = secret.chars().take(show_chars).collect();
    format!("{}…", prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> SecretCipher {
        SecretCipher::new(&SecretString::from(
            "0123456789abcdef0123456789abcdef-test".to_string(),
        ))
    }

    #[test]
    fn test_seal_open_round_trip() {
        let c = cipher();
        let sealed = c.seal("sk-test-key-value-123").unwrap();
        assert_ne!(sealed, "sk-test-key-value-123");
        assert_eq!(c.open(&sealed).unwrap(), "sk-test-key-value-123");
    }

    #[test]
    fn test_seal_is_randomized() {
        let c = cipher();
        let a = c.seal("same-plaintext").unwrap();
        let b = c.seal("same-plaintext").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_round_trip() {
        let c = cipher();
        assert_eq!(c.seal("").unwrap(), "");
        assert_eq!(c.open("").unwrap(), "");
    }

    #[test]
    fn test_open_with_wrong_key_fails() {
        let sealed = cipher().seal("topsecret").unwrap();
        let other = SecretCipher::new(&SecretString::from(
            "ffffffffffffffffffffffffffffffff-other".to_string(),
        ));
        assert!(other.open(&sealed).is_err());
    }

    #[test]
    fn test_open_garbage_fails() {
        assert!(cipher().open("not base64 at all!!!").is_err());
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("sk-ant-api03-abcdef", 8), "sk-ant-a…");
        assert_eq!(mask_secret("short", 8), "");
        assert_eq!(mask_secret("", 4), "");
    }
}

//! Credential hashing and sensitive-field encryption
//!
//! Passwords are stored as salted SHA-256 digests. National identifiers are
//! encrypted at rest with AES-256-GCM; the rest of the engine treats the
//! ciphertext as an opaque string.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors from hashing or field encryption
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Malformed password hash")]
    MalformedHash,

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Malformed ciphertext: {0}")]
    MalformedCiphertext(String),
}

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// Hash a password with a random salt. Format: `v1$<salt-b64>$<digest-b64>`.
pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);

    let digest = salted_digest(&salt, password);
    format!("v1${}${}", BASE64.encode(salt), BASE64.encode(digest))
}

/// Verify a password against a stored hash
pub fn verify_password(password: &str, stored: &str) -> Result<bool, CryptoError> {
    let mut parts = stored.splitn(3, '$');
    let (version, salt_b64, digest_b64) = match (parts.next(), parts.next(), parts.next()) {
        (Some(v), Some(s), Some(d)) => (v, s, d),
        _ => return Err(CryptoError::MalformedHash),
    };
    if version != "v1" {
        return Err(CryptoError::MalformedHash);
    }

    let salt = BASE64
        .decode(salt_b64)
        .map_err(|_| CryptoError::MalformedHash)?;
    let expected = BASE64
        .decode(digest_b64)
        .map_err(|_| CryptoError::MalformedHash)?;

    let actual = salted_digest(&salt, password);

    // Constant-time comparison
    if actual.len() != expected.len() {
        return Ok(false);
    }
    let mut diff = 0u8;
    for (a, b) in actual.iter().zip(expected.iter()) {
        diff |= a ^ b;
    }
    Ok(diff == 0)
}

fn salted_digest(salt: &[u8], password: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().to_vec()
}

/// Hash an opaque token (e.g. refresh tokens) for storage
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    BASE64.encode(digest)
}

/// AES-256-GCM cipher for sensitive fields
#[derive(Clone)]
pub struct FieldCipher {
    key: [u8; 32],
}

impl FieldCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Encrypt a plaintext field. Output: base64(nonce || ciphertext).
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(combined))
    }

    /// Decrypt a field produced by [`FieldCipher::encrypt`]
    pub fn decrypt(&self, encoded: &str) -> Result<String, CryptoError> {
        let combined = BASE64
            .decode(encoded)
            .map_err(|e| CryptoError::MalformedCiphertext(e.to_string()))?;

        if combined.len() < NONCE_LEN {
            return Err(CryptoError::MalformedCiphertext(
                "ciphertext shorter than nonce".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        String::from_utf8(plaintext).map_err(|e| CryptoError::MalformedCiphertext(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_roundtrip() {
        let hash = hash_password("hunter2");
        assert!(verify_password("hunter2", &hash).unwrap());
        assert!(!verify_password("hunter3", &hash).unwrap());
    }

    #[test]
    fn test_password_hashes_are_salted() {
        let a = hash_password("same-password");
        let b = hash_password("same-password");
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_hash_rejected() {
        assert!(verify_password("x", "not-a-hash").is_err());
        assert!(verify_password("x", "v2$abc$def").is_err());
    }

    #[test]
    fn test_field_cipher_roundtrip() {
        let cipher = FieldCipher::new([42u8; 32]);
        let ct = cipher.encrypt("A123456789").unwrap();
        assert_ne!(ct, "A123456789");
        assert_eq!(cipher.decrypt(&ct).unwrap(), "A123456789");
    }

    #[test]
    fn test_field_cipher_wrong_key_fails() {
        let cipher = FieldCipher::new([1u8; 32]);
        let other = FieldCipher::new([2u8; 32]);
        let ct = cipher.encrypt("A123456789").unwrap();
        assert!(other.decrypt(&ct).is_err());
    }

    #[test]
    fn test_field_cipher_distinct_nonces() {
        let cipher = FieldCipher::new([9u8; 32]);
        let a = cipher.encrypt("same-value").unwrap();
        let b = cipher.encrypt("same-value").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_token_is_stable() {
        assert_eq!(hash_token("tok"), hash_token("tok"));
        assert_ne!(hash_token("tok"), hash_token("tok2"));
    }
}

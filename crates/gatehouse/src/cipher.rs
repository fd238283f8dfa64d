//! Authenticated encryption for token material at rest.
//!
//! Tokens are encrypted before they leave memory for the credential
//! store and decrypted on load. The key is generated fresh per cipher
//! instance and never persisted, so stored blobs become unreadable once
//! the instance is gone: storage is a short-lived cache, not a vault.

use base64::{Engine, engine::general_purpose::STANDARD};
use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};

use crate::error::{AuthError, Result};

/// Nonce size for ChaCha20-Poly1305 (96 bits).
const NONCE_SIZE: usize = 12;

/// Symmetric cipher guarding tokens in durable storage.
pub struct TokenCipher {
    cipher: ChaCha20Poly1305,
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher").finish_non_exhaustive()
    }
}

impl TokenCipher {
    /// Create a cipher with a fresh random 256-bit key.
    pub fn new() -> Self {
        let key = ChaCha20Poly1305::generate_key(&mut OsRng);
        Self {
            cipher: ChaCha20Poly1305::new(&key),
        }
    }

    /// Encrypt a plaintext token into a storable blob.
    ///
    /// A fresh random nonce is drawn per call, so encrypting the same
    /// plaintext twice yields different blobs. Output is
    /// base64(nonce || ciphertext).
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| AuthError::DecryptionFailure)?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(nonce.as_slice());
        blob.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(blob))
    }

    /// Decrypt a blob produced by [`encrypt`](Self::encrypt).
    ///
    /// Fails with [`AuthError::DecryptionFailure`] on malformed input or
    /// any integrity-check failure. Callers must treat that as a
    /// corrupted session and log out rather than retry.
    pub fn decrypt(&self, blob: &str) -> Result<String> {
        let bytes = STANDARD
            .decode(blob)
            .map_err(|_| AuthError::DecryptionFailure)?;
        if bytes.len() <= NONCE_SIZE {
            return Err(AuthError::DecryptionFailure);
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| AuthError::DecryptionFailure)?;

        String::from_utf8(plaintext).map_err(|_| AuthError::DecryptionFailure)
    }
}

impl Default for TokenCipher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let cipher = TokenCipher::new();
        for token in ["gho_abc123", "", "a", "токен-with-unicode-✓"] {
            let blob = cipher.encrypt(token).unwrap();
            assert_eq!(cipher.decrypt(&blob).unwrap(), token);
        }
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let cipher = TokenCipher::new();
        let a = cipher.encrypt("same-token").unwrap();
        let b = cipher.encrypt("same-token").unwrap();
        assert_ne!(a, b, "identical plaintext must yield distinct blobs");
    }

    #[test]
    fn test_tampered_blob_fails() {
        let cipher = TokenCipher::new();
        let blob = cipher.encrypt("gho_secret").unwrap();

        let mut bytes = STANDARD.decode(&blob).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = STANDARD.encode(bytes);

        assert!(matches!(
            cipher.decrypt(&tampered),
            Err(AuthError::DecryptionFailure)
        ));
    }

    #[test]
    fn test_malformed_input_fails() {
        let cipher = TokenCipher::new();
        assert!(cipher.decrypt("not base64 at all!!!").is_err());
        assert!(cipher.decrypt("").is_err());
        // Valid base64 but shorter than a nonce.
        assert!(cipher.decrypt(&STANDARD.encode([0u8; 4])).is_err());
    }

    #[test]
    fn test_keys_are_per_instance() {
        let blob = TokenCipher::new().encrypt("gho_secret").unwrap();
        // A different instance holds a different key and must reject it.
        assert!(TokenCipher::new().decrypt(&blob).is_err());
    }
}

//! At-rest sealing for vialogin account credentials.
//!
//! AES-256-GCM with a random 96-bit nonce; the envelope stored in the
//! database is `base64(nonce || ciphertext)`. The key comes from
//! configuration and never leaves the server.

use aes_gcm::{aead::Aead, Aes256Gcm, KeyInit, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;

use crate::errors::ServiceError;

/// Encryption key length (256 bits)
const KEY_LEN: usize = 32;
/// Nonce length for AES-GCM (96 bits)
const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Invalid key: expected {KEY_LEN} bytes, got {0}")]
    InvalidKey(usize),
    #[error("Encryption error: {0}")]
    Encryption(String),
    #[error("Decryption error: {0}")]
    Decryption(String),
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Envelope too short")]
    Truncated,
}

impl From<VaultError> for ServiceError {
    fn from(err: VaultError) -> Self {
        ServiceError::CryptoError(err.to_string())
    }
}

pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl CredentialVault {
    /// Builds a vault from a base64-encoded 32-byte key.
    pub fn from_base64_key(key_b64: &str) -> Result<Self, VaultError> {
        let key_bytes = BASE64.decode(key_b64.trim())?;
        if key_bytes.len() != KEY_LEN {
            return Err(VaultError::InvalidKey(key_bytes.len()));
        }
        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| VaultError::Encryption(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Seals a plaintext into a storable envelope.
    pub fn seal(&self, plaintext: &str) -> Result<String, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| VaultError::Encryption(e.to_string()))?;

        let mut envelope = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(envelope))
    }

    /// Opens an envelope produced by [`seal`](Self::seal).
    pub fn open(&self, envelope: &str) -> Result<String, VaultError> {
        let bytes = BASE64.decode(envelope.trim())?;
        if bytes.len() <= NONCE_LEN {
            return Err(VaultError::Truncated);
        }
        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| VaultError::Decryption(e.to_string()))?;
        String::from_utf8(plaintext).map_err(|e| VaultError::Decryption(e.to_string()))
    }
}

//! At-rest protection of ticket bodies.
//!
//! When a [`CipherExecutor`] is enabled, the registry stores each ticket body
//! encrypted and replaces every lookup key (ticket id, parent id, principal
//! id) with its SHA-512 hex digest, so a dump of the backend reveals neither
//! live ticket ids nor principals.
//!
//! # Security Considerations
//!
//! - AES-256-GCM with a random 96-bit nonce per body; the nonce is stored
//!   in front of the ciphertext
//! - Keys are provided base64-encoded in configuration and never logged

use std::fmt;

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rand::RngCore;
use sha2::{Digest, Sha512};

use crate::TicketResult;
use crate::error::TicketError;

/// Nonce size for AES-256-GCM (96 bits)
const NONCE_SIZE: usize = 12;

/// Key size for AES-256 (256 bits)
pub const KEY_SIZE: usize = 32;

/// Encrypts and decrypts serialized tickets.
pub trait CipherExecutor: Send + Sync + fmt::Debug {
    /// Encrypts `plain`.
    ///
    /// # Errors
    ///
    /// Returns a `Cipher` error if encryption fails.
    fn encode(&self, plain: &[u8]) -> TicketResult<Vec<u8>>;

    /// Decrypts `data` produced by [`CipherExecutor::encode`].
    ///
    /// # Errors
    ///
    /// Returns a `Cipher` error if the data was tampered with or was
    /// encrypted under another key.
    fn decode(&self, data: &[u8]) -> TicketResult<Vec<u8>>;

    /// Returns `false` for pass-through executors.
    fn is_enabled(&self) -> bool;
}

/// Pass-through executor.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpCipherExecutor;

impl CipherExecutor for NoOpCipherExecutor {
    fn encode(&self, plain: &[u8]) -> TicketResult<Vec<u8>> {
        Ok(plain.to_vec())
    }

    fn decode(&self, data: &[u8]) -> TicketResult<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// AES-256-GCM executor.
#[derive(Clone)]
pub struct AesGcmCipherExecutor {
    cipher: Aes256Gcm,
}

impl AesGcmCipherExecutor {
    /// Creates an executor from a raw 256-bit key.
    ///
    /// # Errors
    ///
    /// Returns a `Cipher` error if the key is not 32 bytes long.
    pub fn new(key: &[u8]) -> TicketResult<Self> {
        if key.len() != KEY_SIZE {
            return Err(TicketError::cipher(format!(
                "key must be {KEY_SIZE} bytes, got {}",
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| TicketError::cipher(format!("Failed to create cipher: {e}")))?;
        Ok(Self { cipher })
    }

    /// Creates an executor from a base64-encoded key.
    ///
    /// # Errors
    ///
    /// Returns a `Cipher` error if the key is not valid base64 or has the
    /// wrong length.
    pub fn from_base64_key(key: &str) -> TicketResult<Self> {
        let raw = BASE64
            .decode(key.trim())
            .map_err(|e| TicketError::cipher(format!("Invalid key base64: {e}")))?;
        Self::new(&raw)
    }

    /// Generates a random base64-encoded key.
    #[must_use]
    pub fn generate_key() -> String {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        BASE64.encode(key)
    }
}

impl fmt::Debug for AesGcmCipherExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesGcmCipherExecutor").finish_non_exhaustive()
    }
}

impl CipherExecutor for AesGcmCipherExecutor {
    fn encode(&self, plain: &[u8]) -> TicketResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plain)
            .map_err(|e| TicketError::cipher(format!("Encryption failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decode(&self, data: &[u8]) -> TicketResult<Vec<u8>> {
        if data.len() < NONCE_SIZE {
            return Err(TicketError::cipher("Ciphertext is too short"));
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| TicketError::cipher(format!("Decryption failed: {e}")))
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

/// SHA-512 hex digest used for lookup keys when encryption is enabled.
#[must_use]
pub fn digest(value: &str) -> String {
    hex::encode(Sha512::digest(value.as_bytes()))
}

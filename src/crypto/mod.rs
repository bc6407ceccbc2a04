//! At-rest AES-256-GCM helper, keyed by `ENCRYPTION_KEY` (see `config::Config`).
//!
//! Not wired into any handler — message ciphertext is already opaque,
//! client-side end-to-end-encrypted data by the time it reaches the server
//! (§3.2). This module exists for an operator who wants a second, server-held
//! encryption layer over the store itself; see DESIGN.md for why it stays
//! dormant by default.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    AeadCore, Aes256Gcm, Key, Nonce,
};

use crate::error::{AppError, AppResult};

pub struct AtRestCipher {
    cipher: Aes256Gcm,
}

impl AtRestCipher {
    pub fn new(key: &[u8; 32]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Encrypt `plaintext`, returning `(nonce, ciphertext)`. The nonce is
    /// freshly generated per call and must be stored alongside the
    /// ciphertext to decrypt it later.
    pub fn encrypt(&self, plaintext: &[u8]) -> AppResult<(Vec<u8>, Vec<u8>)> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self.cipher.encrypt(&nonce, plaintext).map_err(|e| {
            tracing::error!(error = ?e, "at-rest encryption failed");
            AppError::Internal
        })?;
        Ok((nonce.to_vec(), ciphertext))
    }

    pub fn decrypt(&self, nonce: &[u8], ciphertext: &[u8]) -> AppResult<Vec<u8>> {
        if nonce.len() != 12 {
            return Err(AppError::Internal);
        }
        let nonce = Nonce::from_slice(nonce);
        self.cipher.decrypt(nonce, ciphertext).map_err(|e| {
            tracing::error!(error = ?e, "at-rest decryption failed");
            AppError::Internal
        })
    }
}

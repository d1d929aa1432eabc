use aes_gcm::{
    Nonce,
    aead::{Aead, OsRng, rand_core::RngCore},
};
use hush_types::models::{CipherEnvelope, NONCE_LEN};

use crate::error::{CryptoError, DecryptError};
use crate::keys::RoomKey;

/// Shown in place of a message that could not be decrypted.
pub const DECRYPTION_FAILED: &str = "[unable to decrypt message]";

impl RoomKey {
    /// Encrypt a message with AES-256-GCM and a fresh random nonce.
    /// Returns `nonce(12) ++ ciphertext ++ tag(16)`.
    pub fn seal(&self, plaintext: &str) -> Result<CipherEnvelope, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher()
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Encryption)?;

        Ok(CipherEnvelope::new(&nonce_bytes, &ciphertext))
    }

    /// Decrypt an envelope produced by `seal` under the same room key.
    pub fn open(&self, envelope: &CipherEnvelope) -> Result<String, DecryptError> {
        let (nonce, ciphertext) = envelope.split().ok_or(DecryptError::TooShort)?;

        let plaintext = self
            .cipher()
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| DecryptError::AuthFailed)?;

        String::from_utf8(plaintext).map_err(|_| DecryptError::InvalidUtf8)
    }

    /// Like `open`, but a bad envelope becomes `DECRYPTION_FAILED` so one
    /// corrupt message never stops the rest from rendering.
    pub fn open_or_placeholder(&self, envelope: &CipherEnvelope) -> String {
        self.open(envelope)
            .unwrap_or_else(|_| DECRYPTION_FAILED.to_string())
    }
}

/// Derive the room key and seal one message.
///
/// Stateless: re-derives the key on every call. Long-lived connections should
/// derive a `RoomKey` once and call `seal` instead.
pub fn encrypt(plaintext: &str, password: &str, salt: &str) -> Result<CipherEnvelope, CryptoError> {
    RoomKey::derive(password, salt)?.seal(plaintext)
}

/// Derive the room key and open one envelope, reporting why it failed.
pub fn try_decrypt(envelope: &CipherEnvelope, password: &str, salt: &str) -> Result<String, CryptoError> {
    let key = RoomKey::derive(password, salt)?;
    Ok(key.open(envelope)?)
}

/// Derive the room key and open one envelope; any failure yields `DECRYPTION_FAILED`.
pub fn decrypt(envelope: &CipherEnvelope, password: &str, salt: &str) -> String {
    try_decrypt(envelope, password, salt).unwrap_or_else(|_| DECRYPTION_FAILED.to_string())
}

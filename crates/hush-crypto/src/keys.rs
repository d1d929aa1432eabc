use std::fmt;

use aes_gcm::{Aes256Gcm, Key, KeyInit};
use hmac::Hmac;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// PBKDF2 iteration count. Every client in a room must agree on it.
pub const PBKDF2_ROUNDS: u32 = 100_000;

/// AES-256 key length.
pub const KEY_LEN: usize = 32;

/// AES-256-GCM key derived from a room password.
///
/// The raw key bytes exist only for the duration of `derive` and are wiped
/// before it returns; afterwards the key can only seal and open envelopes.
pub struct RoomKey {
    cipher: Aes256Gcm,
}

impl RoomKey {
    /// PBKDF2-HMAC-SHA256 over the UTF-8 password, salted with the room hash.
    ///
    /// Deterministic: the same `(password, salt)` always yields a key that opens
    /// envelopes sealed by any other key derived from the same pair. This is
    /// deliberately slow (100k rounds); call it off the async runtime.
    pub fn derive(password: &str, salt: &str) -> Result<Self, CryptoError> {
        if password.is_empty() || salt.is_empty() {
            return Err(CryptoError::EmptyInput);
        }

        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        pbkdf2::pbkdf2::<Hmac<Sha256>>(
            password.as_bytes(),
            salt.as_bytes(),
            PBKDF2_ROUNDS,
            &mut key[..],
        )
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..]));
        Ok(Self { cipher })
    }

    pub(crate) fn cipher(&self) -> &Aes256Gcm {
        &self.cipher
    }
}

impl fmt::Debug for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RoomKey(<redacted>)")
    }
}

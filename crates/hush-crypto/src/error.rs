use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("password and room identifier must not be empty")]
    EmptyInput,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed")]
    Encryption,

    #[error(transparent)]
    Decryption(#[from] DecryptError),
}

/// Why a single envelope could not be opened. Never fatal to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecryptError {
    #[error("envelope too short to hold a nonce and tag")]
    TooShort,

    #[error("GCM authentication failed: wrong key, or data corrupted or tampered")]
    AuthFailed,

    #[error("decrypted message is not valid UTF-8")]
    InvalidUtf8,
}

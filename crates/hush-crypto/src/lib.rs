/// Hush Crypto Library
///
/// Room-password encryption: every member who knows the room password derives
/// the same AES-256-GCM key (PBKDF2-HMAC-SHA256, salted with the room hash).
/// Each message is sealed independently with a fresh random nonce.
///
/// The relay server never links against this crate; it only ever sees
/// `CipherEnvelope` bytes.

pub mod encrypt;
pub mod error;
pub mod keys;

pub use encrypt::{DECRYPTION_FAILED, decrypt, encrypt, try_decrypt};
pub use error::{CryptoError, DecryptError};
pub use keys::RoomKey;

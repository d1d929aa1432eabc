use serde::{Deserialize, Serialize};

/// AES-GCM nonce length carried at the front of every envelope.
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length appended to the ciphertext.
pub const TAG_LEN: usize = 16;

/// One encrypted chat message: `nonce(12) ++ ciphertext ++ tag(16)`.
///
/// On the wire this is a JSON array of integers (0-255), which is exactly how
/// serde renders a `Vec<u8>`. The relay forwards it untouched; only clients
/// holding the room key can open it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CipherEnvelope(Vec<u8>);

impl CipherEnvelope {
    /// Build an envelope from a nonce and the AEAD output (ciphertext with tag).
    pub fn new(nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        bytes.extend_from_slice(nonce);
        bytes.extend_from_slice(ciphertext);
        Self(bytes)
    }

    /// Wrap raw wire bytes without validation.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Split into `(nonce, ciphertext+tag)`.
    /// Returns `None` when the envelope cannot even hold a nonce and a tag.
    pub fn split(&self) -> Option<(&[u8], &[u8])> {
        if self.0.len() < NONCE_LEN + TAG_LEN {
            return None;
        }
        Some(self.0.split_at(NONCE_LEN))
    }
}

impl From<Vec<u8>> for CipherEnvelope {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

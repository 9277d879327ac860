//! Per-subject key derivation.
//!
//! Keys are an ephemeral, pure function of `(subject_id, context_label)` —
//! commonly a user id and a record or event id — so that encrypt-then-decrypt
//! within one logical operation always round-trips, while distinct pairs
//! yield independent keys. Derivation is SHA-256 with domain separation;
//! there is deliberately no weaker fallback.

use common::PrivacyError;
use sha2::{Digest, Sha256};

use super::cipher::KEY_LEN;

/// Domain-separation prefix mixed into every derivation.
const DERIVE_DOMAIN: &[u8] = b"practice-privacy/field-key/v1";

/// Fixed-size derived key buffer.
///
/// Exclusive to the single encrypt/decrypt call that requested it. The memory
/// is overwritten with zeroes on drop to minimise the window during which key
/// material lives in RAM, and the `Debug` form never prints the bytes.
#[derive(Clone)]
pub struct EncryptionKey(Box<[u8; KEY_LEN]>);

impl EncryptionKey {
    /// Borrow the raw key bytes for a cipher call.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        // Zero the key material on drop.
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material — not even in debug builds.
        f.write_str("EncryptionKey([REDACTED])")
    }
}

/// Derives ephemeral symmetric keys from subject and context identifiers.
///
/// Stateless; construct one and share it freely. No key is ever stored.
#[derive(Debug, Clone, Default)]
pub struct KeyDeriver;

impl KeyDeriver {
    pub fn new() -> Self {
        Self
    }

    /// Derive the key for `(subject_id, context_label)`.
    ///
    /// # Errors
    ///
    /// Returns [`PrivacyError::Validation`] if `subject_id` is empty or
    /// whitespace. The context label may be any string, including empty.
    pub fn derive(&self, subject_id: &str, context_label: &str) -> Result<EncryptionKey, PrivacyError> {
        if subject_id.trim().is_empty() {
            return Err(PrivacyError::validation("subject_id must not be empty"));
        }

        // Length-prefixed inputs so ("ab","c") and ("a","bc") never collide.
        let mut hasher = Sha256::new();
        hasher.update(DERIVE_DOMAIN);
        hasher.update((subject_id.len() as u64).to_be_bytes());
        hasher.update(subject_id.as_bytes());
        hasher.update((context_label.len() as u64).to_be_bytes());
        hasher.update(context_label.as_bytes());
        let digest = hasher.finalize();

        let mut buf = Box::new([0u8; KEY_LEN]);
        buf.copy_from_slice(&digest);
        Ok(EncryptionKey(buf))
    }
}

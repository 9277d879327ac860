//! AES-256-GCM-SIV encryption and decryption of individual field values.
//!
//! A fresh 96-bit nonce is drawn from the OS CSPRNG for every encryption and
//! prepended to the authenticated ciphertext; the pair is carried as one
//! opaque base64 string. AES-GCM-SIV is nonce-misuse-resistant, so even an
//! RNG failure degrades gracefully instead of breaking authentication.

use aes_gcm_siv::{
    aead::{Aead, KeyInit, OsRng},
    Aes256GcmSiv, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

/// Byte length of an AES-256 key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;

/// Byte length of an AES-GCM-SIV nonce (12 bytes = 96 bits).
pub const NONCE_LEN: usize = 12;

/// Byte length of the GCM-SIV authentication tag.
pub const TAG_LEN: usize = 16;

/// Errors produced by the cipher layer.
#[derive(Debug, Error)]
pub enum CipherError {
    /// The key is the wrong length (must be [`KEY_LEN`] bytes).
    #[error("invalid key length: expected {KEY_LEN} bytes")]
    InvalidKeyLength,

    /// AEAD encryption or decryption failed (wrong key or tampered data).
    #[error("aead operation failed")]
    AeadFailure,

    /// The encrypted field string is not valid base64 or is too short to
    /// contain a nonce and an authentication tag.
    #[error("invalid encrypted field format")]
    InvalidFormat,
}

/// Encrypt a plaintext value, returning the opaque wire string.
///
/// # Errors
///
/// Returns [`CipherError::InvalidKeyLength`] if `key` is not [`KEY_LEN`]
/// bytes, or [`CipherError::AeadFailure`] on an internal AEAD error.
pub fn encrypt_value(plaintext: &[u8], key: &[u8]) -> Result<String, CipherError> {
    let cipher = build_cipher(key)?;

    use aes_gcm_siv::aead::rand_core::RngCore;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CipherError::AeadFailure)?;

    let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(combined))
}

/// Decrypt a wire string produced by [`encrypt_value`] back to plaintext.
///
/// # Errors
///
/// Returns [`CipherError::InvalidFormat`] if the string does not decode to at
/// least `NONCE_LEN + TAG_LEN` bytes, and [`CipherError::AeadFailure`] if
/// authentication fails — never corrupted plaintext.
pub fn decrypt_value(encoded: &str, key: &[u8]) -> Result<Vec<u8>, CipherError> {
    let cipher = build_cipher(key)?;

    let combined = STANDARD
        .decode(encoded)
        .map_err(|_| CipherError::InvalidFormat)?;
    if combined.len() < NONCE_LEN + TAG_LEN {
        return Err(CipherError::InvalidFormat);
    }

    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CipherError::AeadFailure)
}

fn build_cipher(key: &[u8]) -> Result<Aes256GcmSiv, CipherError> {
    if key.len() != KEY_LEN {
        return Err(CipherError::InvalidKeyLength);
    }
    Aes256GcmSiv::new_from_slice(key).map_err(|_| CipherError::InvalidKeyLength)
}

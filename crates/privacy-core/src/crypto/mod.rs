//! Key derivation and field-level encryption primitives.
//!
//! This module is intentionally free of audit and persistence dependencies.
//!
//! # Ciphertext format
//!
//! ```text
//! base64(nonce ‖ ciphertext+tag)
//! ```
//!
//! A single opaque string per encrypted field. Decoders reject anything
//! shorter than `NONCE_LEN + TAG_LEN` bytes after decoding.
//!
//! # Security invariants
//!
//! - Keys are derived per (subject, context) call, never persisted, never
//!   logged, zeroed on drop.
//! - Decryption with the wrong key or context fails closed; there is no path
//!   that returns plausible-but-wrong plaintext.

pub mod cipher;
pub mod fields;
pub mod keys;

pub use cipher::{KEY_LEN, NONCE_LEN, TAG_LEN};
pub use fields::{FieldCrypter, SensitiveFieldPolicy};
pub use keys::{EncryptionKey, KeyDeriver};

//! Common error types shared across crates.

use thiserror::Error;

/// Top-level error type for the privacy core.
///
/// Propagation policy differs per call path:
/// - Crypto and consent failures on a record *write* path are surfaced —
///   silently storing unencrypted data is unacceptable.
/// - Audit-trail *write* failures are downgraded by the recorder to a logged
///   warning and a `None` return, so audit logging never aborts the business
///   operation it observes.
/// - Audit-trail *read* failures (queries, reports) are surfaced.
#[derive(Debug, Error)]
pub enum PrivacyError {
    /// Malformed input: empty subject, invalid event draft, bad deletion request.
    #[error("validation error: {0}")]
    Validation(String),

    /// Consent was invalid, expired, or insufficient for the requested purpose.
    #[error("consent rejected: {0}")]
    Auth(String),

    /// A conflicting concurrent change was reported by a collaborator.
    /// Never produced by the core itself; passed through to callers.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A field could not be encrypted.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// A field could not be decrypted: wrong key, wrong context, or malformed
    /// ciphertext. Always fail-closed — no plausible-but-wrong plaintext.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// The audit persistence collaborator failed (network or store error).
    #[error("audit store error: {0}")]
    Store(String),
}

impl PrivacyError {
    /// Construct a [`PrivacyError::Validation`] from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Returns `true` for failures the audit recorder is allowed to swallow.
    pub fn is_transient_store_failure(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_message() {
        let e = PrivacyError::validation("subject_id must not be empty");
        assert!(e.to_string().contains("subject_id must not be empty"));
    }

    #[test]
    fn store_failures_are_transient() {
        assert!(PrivacyError::Store("timeout".into()).is_transient_store_failure());
        assert!(!PrivacyError::Auth("expired".into()).is_transient_store_failure());
    }
}

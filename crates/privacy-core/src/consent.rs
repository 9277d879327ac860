//! Purpose-scoped, time-bounded consent tokens.
//!
//! A token is an opaque two-part string:
//!
//! ```text
//! base64url(payload_json).base64url(hmac_sha256(payload_json))
//! ```
//!
//! The MAC is keyed with the process-wide consent signing key, so a tampered
//! or forged payload is rejected as `invalid_token`. Validation re-checks
//! expiry and purposes on every call; nothing is cached between calls.

use std::collections::BTreeSet;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use common::PrivacyError;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::info;

type HmacSha256 = Hmac<Sha256>;

/// Decoded consent token payload. Immutable once issued; never renewed in
/// place — expiry means a fresh capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentToken {
    pub subject_id: String,
    pub purposes: BTreeSet<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub token_id: String,
}

/// What `issue` hands back to the caller for transport and bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentGrant {
    /// Opaque serialized token.
    pub token: String,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Why a token failed validation. Every variant maps to an actionable reason
/// code — callers never see a bare "access denied".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsentRefusal {
    /// The token's expiry is in the past.
    TokenExpired { expired_at: DateTime<Utc> },
    /// The granted purposes do not cover the required set.
    InsufficientPurposes {
        granted: BTreeSet<String>,
        required: BTreeSet<String>,
    },
    /// The token could not be decoded, or its MAC did not verify.
    InvalidToken,
}

impl ConsentRefusal {
    /// Machine-readable reason code.
    pub fn reason_code(&self) -> &'static str {
        match self {
            ConsentRefusal::TokenExpired { .. } => "token_expired",
            ConsentRefusal::InsufficientPurposes { .. } => "insufficient_purposes",
            ConsentRefusal::InvalidToken => "invalid_token",
        }
    }
}

/// Outcome of [`ConsentManager::validate`]. Returned, never thrown, so call
/// sites decide how to react.
#[derive(Debug, Clone)]
pub enum ConsentOutcome {
    Valid(ConsentToken),
    Invalid(ConsentRefusal),
}

impl ConsentOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ConsentOutcome::Valid(_))
    }

    /// Convert an invalid outcome into [`PrivacyError::Auth`] carrying the
    /// reason code. The common shape at gated call sites.
    pub fn require(self) -> Result<ConsentToken, PrivacyError> {
        match self {
            ConsentOutcome::Valid(token) => Ok(token),
            ConsentOutcome::Invalid(refusal) => Err(PrivacyError::Auth(
                refusal.reason_code().to_string(),
            )),
        }
    }
}

/// Issues and validates consent tokens.
#[derive(Clone)]
pub struct ConsentManager {
    signing_key: Vec<u8>,
}

impl std::fmt::Debug for ConsentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ConsentManager { signing_key: [REDACTED] }")
    }
}

impl ConsentManager {
    /// Create a manager with the given signing key.
    ///
    /// # Errors
    ///
    /// Returns [`PrivacyError::Validation`] if the key is shorter than 32
    /// bytes.
    pub fn new(signing_key: impl Into<Vec<u8>>) -> Result<Self, PrivacyError> {
        let signing_key = signing_key.into();
        if signing_key.len() < 32 {
            return Err(PrivacyError::validation(
                "consent signing key must be at least 32 bytes",
            ));
        }
        Ok(Self { signing_key })
    }

    /// Issue a token granting `purposes` to `subject_id` for `ttl_days`.
    ///
    /// # Errors
    ///
    /// Returns [`PrivacyError::Validation`] on an empty subject, an empty
    /// purpose set, or a zero TTL.
    pub fn issue(
        &self,
        subject_id: &str,
        purposes: BTreeSet<String>,
        ttl_days: u32,
    ) -> Result<ConsentGrant, PrivacyError> {
        if subject_id.trim().is_empty() {
            return Err(PrivacyError::validation("subject_id must not be empty"));
        }
        if purposes.is_empty() {
            return Err(PrivacyError::validation(
                "consent must grant at least one purpose",
            ));
        }
        if ttl_days == 0 {
            return Err(PrivacyError::validation("ttl_days must be > 0"));
        }

        let issued_at = Utc::now();
        let token = ConsentToken {
            subject_id: subject_id.to_owned(),
            purposes,
            issued_at,
            expires_at: issued_at + Duration::days(i64::from(ttl_days)),
            token_id: format!("consent_{}", uuid::Uuid::new_v4()),
        };

        let encoded = self.encode(&token)?;
        info!(
            subject_id = %token.subject_id,
            token_id = %token.token_id,
            expires_at = %token.expires_at,
            "consent token issued"
        );
        Ok(ConsentGrant {
            token: encoded,
            token_id: token.token_id,
            expires_at: token.expires_at,
        })
    }

    /// Validate `token` against `required_purposes`.
    ///
    /// Checks, in order: decode + MAC + parse, expiry (`now < expires_at`),
    /// then that the required purposes are a subset of the granted ones.
    /// Never errors — failures come back as [`ConsentOutcome::Invalid`] with
    /// a typed reason.
    pub fn validate(&self, token: &str, required_purposes: &BTreeSet<String>) -> ConsentOutcome {
        let payload = match self.decode(token) {
            Some(p) => p,
            None => return ConsentOutcome::Invalid(ConsentRefusal::InvalidToken),
        };

        if Utc::now() >= payload.expires_at {
            return ConsentOutcome::Invalid(ConsentRefusal::TokenExpired {
                expired_at: payload.expires_at,
            });
        }

        if !required_purposes.is_subset(&payload.purposes) {
            return ConsentOutcome::Invalid(ConsentRefusal::InsufficientPurposes {
                granted: payload.purposes,
                required: required_purposes.clone(),
            });
        }

        ConsentOutcome::Valid(payload)
    }

    fn encode(&self, token: &ConsentToken) -> Result<String, PrivacyError> {
        let payload =
            serde_json::to_vec(token).map_err(|e| PrivacyError::Validation(e.to_string()))?;
        let tag = self.mac(&payload);
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(tag)
        ))
    }

    fn decode(&self, token: &str) -> Option<ConsentToken> {
        let (payload_b64, tag_b64) = token.split_once('.')?;
        let payload = URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
        let tag = URL_SAFE_NO_PAD.decode(tag_b64).ok()?;

        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
        mac.update(&payload);
        mac.verify_slice(&tag).ok()?;

        serde_json::from_slice(&payload).ok()
    }

    fn mac(&self, payload: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ConsentManager {
        ConsentManager::new(vec![0x5a; 32]).unwrap()
    }

    fn purposes(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn issue_and_validate_round_trip() {
        let m = manager();
        let grant = m
            .issue("client-7", purposes(&["appointments", "billing"]), 30)
            .unwrap();
        let outcome = m.validate(&grant.token, &purposes(&["appointments"]));
        match outcome {
            ConsentOutcome::Valid(token) => {
                assert_eq!(token.subject_id, "client-7");
                assert_eq!(token.token_id, grant.token_id);
            }
            ConsentOutcome::Invalid(r) => panic!("unexpected refusal: {r:?}"),
        }
    }

    #[test]
    fn missing_purpose_is_insufficient() {
        let m = manager();
        let grant = m.issue("client-7", purposes(&["appointments"]), 30).unwrap();
        let outcome = m.validate(&grant.token, &purposes(&["appointments", "billing"]));
        match outcome {
            ConsentOutcome::Invalid(refusal) => {
                assert_eq!(refusal.reason_code(), "insufficient_purposes");
                match refusal {
                    ConsentRefusal::InsufficientPurposes { granted, required } => {
                        assert!(granted.contains("appointments"));
                        assert!(required.contains("billing"));
                    }
                    other => panic!("wrong refusal: {other:?}"),
                }
            }
            ConsentOutcome::Valid(_) => panic!("should not validate"),
        }
    }

    #[test]
    fn expiry_boundary() {
        let m = manager();
        let mut token = ConsentToken {
            subject_id: "client-7".into(),
            purposes: purposes(&["appointments"]),
            issued_at: Utc::now() - Duration::days(1),
            expires_at: Utc::now() - Duration::milliseconds(1),
            token_id: "consent_x".into(),
        };
        let encoded = m.encode(&token).unwrap();
        let outcome = m.validate(&encoded, &purposes(&["appointments"]));
        assert_eq!(
            match outcome {
                ConsentOutcome::Invalid(r) => r.reason_code(),
                _ => "valid",
            },
            "token_expired"
        );

        // Just inside the window: still valid with purposes held constant.
        token.expires_at = Utc::now() + Duration::milliseconds(200);
        let encoded = m.encode(&token).unwrap();
        assert!(m.validate(&encoded, &purposes(&["appointments"])).is_valid());
    }

    #[test]
    fn garbage_token_is_invalid() {
        let m = manager();
        let outcome = m.validate("not-a-token", &BTreeSet::new());
        match outcome {
            ConsentOutcome::Invalid(r) => assert_eq!(r.reason_code(), "invalid_token"),
            ConsentOutcome::Valid(_) => panic!("garbage validated"),
        }
    }

    #[test]
    fn tampered_payload_fails_mac() {
        let m = manager();
        let grant = m.issue("client-7", purposes(&["appointments"]), 30).unwrap();
        let (payload_b64, tag_b64) = grant.token.split_once('.').unwrap();

        // Re-encode a payload claiming extra purposes, keeping the old tag.
        let mut payload: ConsentToken = serde_json::from_slice(
            &URL_SAFE_NO_PAD.decode(payload_b64).unwrap(),
        )
        .unwrap();
        payload.purposes.insert("billing".into());
        let forged = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).unwrap()),
            tag_b64
        );

        let outcome = m.validate(&forged, &purposes(&["billing"]));
        match outcome {
            ConsentOutcome::Invalid(r) => assert_eq!(r.reason_code(), "invalid_token"),
            ConsentOutcome::Valid(_) => panic!("forged token validated"),
        }
    }

    #[test]
    fn wrong_signing_key_rejected() {
        let issuer = manager();
        let other = ConsentManager::new(vec![0xa5; 32]).unwrap();
        let grant = issuer
            .issue("client-7", purposes(&["appointments"]), 30)
            .unwrap();
        assert!(!other.validate(&grant.token, &BTreeSet::new()).is_valid());
    }

    #[test]
    fn issue_validates_inputs() {
        let m = manager();
        assert!(m.issue("", purposes(&["p"]), 30).is_err());
        assert!(m.issue("client-7", BTreeSet::new(), 30).is_err());
        assert!(m.issue("client-7", purposes(&["p"]), 0).is_err());
    }

    #[test]
    fn short_signing_key_rejected() {
        assert!(ConsentManager::new(vec![0u8; 16]).is_err());
    }

    #[test]
    fn require_maps_to_auth_error() {
        let m = manager();
        let err = m
            .validate("garbage", &BTreeSet::new())
            .require()
            .unwrap_err();
        match err {
            PrivacyError::Auth(code) => assert_eq!(code, "invalid_token"),
            other => panic!("wrong error: {other:?}"),
        }
    }
}

//! Recursive field-level encryption of structured records.
//!
//! [`SensitiveFieldPolicy`] is a declared set of field names known to carry
//! sensitive content. Matching is by normalised name (lowercased, underscores
//! removed) so `session_notes`, `sessionNotes`, and `SessionNotes` all match
//! the same declaration — but `notes_archive` never matches `notes`, which a
//! substring check would.
//!
//! [`FieldCrypter`] walks a JSON record; matched non-null leaves are replaced
//! by an opaque ciphertext string with a sibling `<field>_encrypted = true`
//! marker. `decrypt` is the exact inverse and is driven by the markers alone.

use std::collections::HashSet;

use common::PrivacyError;
use serde_json::{Map, Value};

use super::cipher;
use super::keys::EncryptionKey;

/// Field names treated as sensitive when no explicit policy is supplied.
///
/// Identifiers, contact information, and clinical narrative fields.
const DEFAULT_VOCABULARY: &[&str] = &[
    "ssn",
    "social_security_number",
    "tax_id",
    "national_id",
    "phone_number",
    "email",
    "address",
    "emergency_contact",
    "medical_history",
    "diagnosis",
    "medication",
    "notes",
    "session_notes",
    "observations",
    "personal_notes",
];

/// Suffix of the boolean marker paired with every encrypted field.
const MARKER_SUFFIX: &str = "_encrypted";

/// A declared, normalised set of sensitive field names.
#[derive(Debug, Clone)]
pub struct SensitiveFieldPolicy {
    names: HashSet<String>,
}

impl SensitiveFieldPolicy {
    /// Build a policy from an explicit list of field names.
    ///
    /// # Errors
    ///
    /// Returns [`PrivacyError::Validation`] if any name is empty.
    pub fn from_names<I, S>(names: I) -> Result<Self, PrivacyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = HashSet::new();
        for name in names {
            let normalised = normalise(name.as_ref());
            if normalised.is_empty() {
                return Err(PrivacyError::validation(
                    "sensitive field names must not be empty",
                ));
            }
            set.insert(normalised);
        }
        Ok(Self { names: set })
    }

    /// The default vocabulary: identifiers, contact info, clinical notes.
    pub fn default_vocabulary() -> Self {
        Self::from_names(DEFAULT_VOCABULARY.iter().copied())
            .unwrap_or_else(|_| unreachable!("default vocabulary is non-empty"))
    }

    /// Policy covering only audit narrative payload fields.
    pub fn audit_narrative() -> Self {
        Self::from_names(["changes", "previous_data", "new_data", "details"])
            .unwrap_or_else(|_| unreachable!("narrative names are non-empty"))
    }

    /// Returns `true` if `field_name` is declared sensitive.
    pub fn is_sensitive(&self, field_name: &str) -> bool {
        self.names.contains(&normalise(field_name))
    }
}

impl Default for SensitiveFieldPolicy {
    fn default() -> Self {
        Self::default_vocabulary()
    }
}

fn normalise(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Encrypts and decrypts the sensitive fields of structured records.
#[derive(Debug, Clone)]
pub struct FieldCrypter {
    policy: SensitiveFieldPolicy,
}

impl FieldCrypter {
    pub fn new(policy: SensitiveFieldPolicy) -> Self {
        Self { policy }
    }

    /// Encrypt every declared sensitive field in `record`.
    ///
    /// Matched non-null fields have their whole value (scalar or subtree)
    /// JSON-serialised, encrypted, and replaced by the ciphertext string,
    /// with a `<field>_encrypted = true` sibling inserted. Fields already
    /// carrying a truthy marker pass through untouched; non-sensitive
    /// containers recurse.
    ///
    /// # Errors
    ///
    /// Returns [`PrivacyError::Encryption`] on a cipher failure.
    pub fn encrypt(&self, record: &Value, key: &EncryptionKey) -> Result<Value, PrivacyError> {
        self.encrypt_node(record, key)
    }

    /// Invert [`encrypt`](Self::encrypt): every field with a truthy
    /// `<field>_encrypted` marker is decrypted and re-parsed, the marker
    /// dropped; everything else passes through unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`PrivacyError::Decryption`] on a wrong key, tampered or
    /// malformed ciphertext — the walk aborts rather than yielding a partial
    /// or corrupted record. Callers that want per-record resilience catch
    /// this and keep the ciphertext form.
    pub fn decrypt(&self, record: &Value, key: &EncryptionKey) -> Result<Value, PrivacyError> {
        decrypt_node(record, key)
    }

    /// Produce a copy of `record` safe to pass to a log statement: every
    /// declared sensitive field is replaced by the literal `"[REDACTED]"`,
    /// whatever its value. Markers and non-sensitive fields pass through.
    pub fn sanitize_for_logging(&self, record: &Value) -> Value {
        match record {
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (name, child) in map {
                    if !name.ends_with(MARKER_SUFFIX) && self.policy.is_sensitive(name) {
                        out.insert(name.clone(), Value::String("[REDACTED]".into()));
                    } else {
                        out.insert(name.clone(), self.sanitize_for_logging(child));
                    }
                }
                Value::Object(out)
            }
            Value::Array(items) => {
                Value::Array(items.iter().map(|i| self.sanitize_for_logging(i)).collect())
            }
            other => other.clone(),
        }
    }

    fn encrypt_node(&self, value: &Value, key: &EncryptionKey) -> Result<Value, PrivacyError> {
        match value {
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (name, child) in map {
                    if name.ends_with(MARKER_SUFFIX) {
                        out.insert(name.clone(), child.clone());
                    } else if self.policy.is_sensitive(name)
                        && !child.is_null()
                        && !has_marker(map, name)
                    {
                        let plaintext = serde_json::to_vec(child)
                            .map_err(|e| PrivacyError::Encryption(e.to_string()))?;
                        let ciphertext = cipher::encrypt_value(&plaintext, key.as_bytes())
                            .map_err(|e| PrivacyError::Encryption(e.to_string()))?;
                        out.insert(name.clone(), Value::String(ciphertext));
                        out.insert(format!("{name}{MARKER_SUFFIX}"), Value::Bool(true));
                    } else if has_marker(map, name) {
                        // Already ciphertext from an earlier pass.
                        out.insert(name.clone(), child.clone());
                    } else if child.is_object() || child.is_array() {
                        out.insert(name.clone(), self.encrypt_node(child, key)?);
                    } else {
                        out.insert(name.clone(), child.clone());
                    }
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.encrypt_node(item, key)?);
                }
                Ok(Value::Array(out))
            }
            other => Ok(other.clone()),
        }
    }
}

fn decrypt_node(value: &Value, key: &EncryptionKey) -> Result<Value, PrivacyError> {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (name, child) in map {
                if name.ends_with(MARKER_SUFFIX) {
                    continue;
                }
                if has_marker(map, name) {
                    let ciphertext = child.as_str().ok_or_else(|| {
                        PrivacyError::Decryption(format!(
                            "field '{name}' is marked encrypted but is not a string"
                        ))
                    })?;
                    let plaintext = cipher::decrypt_value(ciphertext, key.as_bytes())
                        .map_err(|e| PrivacyError::Decryption(e.to_string()))?;
                    let restored: Value = serde_json::from_slice(&plaintext).map_err(|_| {
                        PrivacyError::Decryption("plaintext is not valid JSON".into())
                    })?;
                    out.insert(name.clone(), restored);
                } else if child.is_object() || child.is_array() {
                    out.insert(name.clone(), decrypt_node(child, key)?);
                } else {
                    out.insert(name.clone(), child.clone());
                }
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(decrypt_node(item, key)?);
            }
            Ok(Value::Array(out))
        }
        other => Ok(other.clone()),
    }
}

fn has_marker(map: &Map<String, Value>, name: &str) -> bool {
    map.get(&format!("{name}{MARKER_SUFFIX}"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::KeyDeriver;
    use serde_json::json;

    fn crypter() -> FieldCrypter {
        FieldCrypter::new(SensitiveFieldPolicy::default_vocabulary())
    }

    fn key_for(subject: &str) -> EncryptionKey {
        KeyDeriver::new().derive(subject, "record-1").unwrap()
    }

    #[test]
    fn round_trip_restores_record() {
        let record = json!({
            "name": "Alice",
            "ssn": "123-45-6789",
            "client": {
                "email": "alice@example.com",
                "city": "Madrid"
            },
            "visits": [{"session_notes": "made good progress"}]
        });
        let key = key_for("client-7");
        let encrypted = crypter().encrypt(&record, &key).unwrap();
        let decrypted = crypter().decrypt(&encrypted, &key).unwrap();
        assert_eq!(decrypted, record);
    }

    #[test]
    fn sensitive_fields_get_markers() {
        let record = json!({"ssn": "123-45-6789", "name": "Alice"});
        let key = key_for("client-7");
        let encrypted = crypter().encrypt(&record, &key).unwrap();

        assert_eq!(encrypted["ssn_encrypted"], true);
        assert_ne!(encrypted["ssn"], "123-45-6789");
        assert!(encrypted["ssn"].is_string());
        // Non-sensitive fields pass through unchanged, unmarked.
        assert_eq!(encrypted["name"], "Alice");
        assert!(encrypted.get("name_encrypted").is_none());
    }

    #[test]
    fn wrong_key_fails_closed() {
        let record = json!({"diagnosis": "F41.1"});
        let encrypted = crypter().encrypt(&record, &key_for("client-7")).unwrap();
        let result = crypter().decrypt(&encrypted, &key_for("client-8"));
        assert!(matches!(result, Err(PrivacyError::Decryption(_))));
    }

    #[test]
    fn null_values_are_skipped() {
        let record = json!({"email": null});
        let key = key_for("client-7");
        let encrypted = crypter().encrypt(&record, &key).unwrap();
        assert!(encrypted["email"].is_null());
        assert!(encrypted.get("email_encrypted").is_none());
    }

    #[test]
    fn already_marked_fields_are_not_reencrypted() {
        let record = json!({"notes": "plain"});
        let key = key_for("client-7");
        let once = crypter().encrypt(&record, &key).unwrap();
        let twice = crypter().encrypt(&once, &key).unwrap();
        assert_eq!(once, twice);
        assert_eq!(crypter().decrypt(&twice, &key).unwrap(), record);
    }

    #[test]
    fn nested_sensitive_object_encrypted_whole() {
        let record = json!({
            "emergency_contact": {"name": "Bob", "phone": "555-0100"}
        });
        let key = key_for("client-7");
        let encrypted = crypter().encrypt(&record, &key).unwrap();
        assert!(encrypted["emergency_contact"].is_string());
        let decrypted = crypter().decrypt(&encrypted, &key).unwrap();
        assert_eq!(decrypted["emergency_contact"]["phone"], "555-0100");
    }

    #[test]
    fn name_matching_is_normalised_not_substring() {
        let policy = SensitiveFieldPolicy::default_vocabulary();
        assert!(policy.is_sensitive("session_notes"));
        assert!(policy.is_sensitive("sessionNotes"));
        assert!(policy.is_sensitive("SSN"));
        // Substring collisions the declared policy must not produce.
        assert!(!policy.is_sensitive("notes_archive"));
        assert!(!policy.is_sensitive("emailed_at"));
    }

    #[test]
    fn empty_policy_name_rejected() {
        assert!(SensitiveFieldPolicy::from_names(["ssn", ""]).is_err());
        assert!(SensitiveFieldPolicy::from_names(["__"]).is_err());
    }

    #[test]
    fn narrative_policy_only_touches_payload_fields() {
        let crypter = FieldCrypter::new(SensitiveFieldPolicy::audit_narrative());
        let record = json!({
            "details": {"notes": "session went well"},
            "ip": "10.0.0.1"
        });
        let key = key_for("therapist-1");
        let encrypted = crypter.encrypt(&record, &key).unwrap();
        assert!(encrypted["details"].is_string());
        assert_eq!(encrypted["details_encrypted"], true);
        assert_eq!(encrypted["ip"], "10.0.0.1");
    }

    #[test]
    fn sanitize_redacts_sensitive_fields_at_any_depth() {
        let record = json!({
            "name": "Alice",
            "ssn": "123-45-6789",
            "client": {"email": "alice@example.com", "city": "Madrid"},
            "visits": [{"session_notes": {"mood": "low"}}]
        });
        let safe = crypter().sanitize_for_logging(&record);
        assert_eq!(safe["ssn"], "[REDACTED]");
        assert_eq!(safe["client"]["email"], "[REDACTED]");
        assert_eq!(safe["visits"][0]["session_notes"], "[REDACTED]");
        // Non-sensitive fields survive untouched.
        assert_eq!(safe["name"], "Alice");
        assert_eq!(safe["client"]["city"], "Madrid");
    }

    #[test]
    fn non_string_values_round_trip() {
        let record = json!({"medication": [{"name": "sertraline", "mg": 50}]});
        let key = key_for("client-7");
        let encrypted = crypter().encrypt(&record, &key).unwrap();
        let decrypted = crypter().decrypt(&encrypted, &key).unwrap();
        assert_eq!(decrypted["medication"][0]["mg"], 50);
    }
}

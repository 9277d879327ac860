//! Static compliance inspection of outbound records.
//!
//! Pure functions over JSON values: no I/O, returns findings rather than
//! throwing, so each call site decides enforcement.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use common::{ComplianceViolation, Severity, ViolationKind};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::crypto::SensitiveFieldPolicy;

/// Field-name prefixes that indicate data a minimised record should not carry.
const UNNECESSARY_PREFIXES: &[&str] = &[
    "temp_",
    "tmp_",
    "debug_",
    "test_",
    "unused_",
    "deprecated_",
    "old_",
];

/// Knobs for a single validation pass.
#[derive(Debug, Clone)]
pub struct ComplianceOptions {
    /// Require a `<field>_encrypted` marker on every sensitive field.
    pub require_encryption: bool,
    /// Sensitive field names the caller explicitly permits in plaintext.
    pub allow_sensitive_fields: HashSet<String>,
    /// Flag temporary/debug/deprecated fields as minimization violations.
    pub validate_data_minimization: bool,
}

impl Default for ComplianceOptions {
    fn default() -> Self {
        Self {
            require_encryption: true,
            allow_sensitive_fields: HashSet::new(),
            validate_data_minimization: true,
        }
    }
}

/// Result of one validation pass.
#[derive(Debug, Clone, Serialize)]
pub struct ComplianceCheck {
    pub is_compliant: bool,
    pub violations: Vec<ComplianceViolation>,
    pub checked_at: DateTime<Utc>,
}

/// Inspects records for unencrypted sensitive fields and superfluous fields
/// before they are allowed to leave the core.
#[derive(Debug, Clone)]
pub struct ComplianceValidator {
    policy: SensitiveFieldPolicy,
}

impl ComplianceValidator {
    pub fn new(policy: SensitiveFieldPolicy) -> Self {
        Self { policy }
    }

    /// Validate `record` against `options`, walking top-level and nested
    /// objects. Violation fields are dot paths from the record root.
    pub fn validate(&self, record: &Value, options: &ComplianceOptions) -> ComplianceCheck {
        let mut violations = Vec::new();
        if let Value::Object(map) = record {
            self.walk(map, "", options, &mut violations);
        }
        ComplianceCheck {
            is_compliant: violations.is_empty(),
            violations,
            checked_at: Utc::now(),
        }
    }

    fn walk(
        &self,
        map: &Map<String, Value>,
        prefix: &str,
        options: &ComplianceOptions,
        out: &mut Vec<ComplianceViolation>,
    ) {
        for (name, value) in map {
            if name.ends_with("_encrypted") {
                continue;
            }
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}.{name}")
            };

            if options.require_encryption
                && self.policy.is_sensitive(name)
                && !options.allow_sensitive_fields.contains(name)
                && !marker_set(map, name)
            {
                out.push(ComplianceViolation {
                    kind: ViolationKind::UnencryptedSensitiveData,
                    field: path.clone(),
                    severity: Severity::High,
                    message: format!("Sensitive field '{name}' is not encrypted"),
                });
            }

            if options.validate_data_minimization
                && UNNECESSARY_PREFIXES.iter().any(|p| name.starts_with(p))
            {
                out.push(ComplianceViolation {
                    kind: ViolationKind::DataMinimization,
                    field: path.clone(),
                    severity: Severity::Medium,
                    message: format!("Field '{name}' may not be necessary"),
                });
            }

            // Recurse into nested objects unless the whole subtree is already
            // ciphertext (marker set means the value is an opaque string).
            match value {
                Value::Object(child) if !marker_set(map, name) => {
                    self.walk(child, &path, options, out);
                }
                Value::Array(items) => {
                    for (idx, item) in items.iter().enumerate() {
                        if let Value::Object(child) = item {
                            self.walk(child, &format!("{path}[{idx}]"), options, out);
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

impl Default for ComplianceValidator {
    fn default() -> Self {
        Self::new(SensitiveFieldPolicy::default_vocabulary())
    }
}

fn marker_set(map: &Map<String, Value>, name: &str) -> bool {
    map.get(&format!("{name}_encrypted"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> ComplianceValidator {
        ComplianceValidator::default()
    }

    #[test]
    fn unencrypted_ssn_is_single_high_violation() {
        let record = json!({"ssn": "123-45-6789"});
        let check = validator().validate(&record, &ComplianceOptions::default());
        assert!(!check.is_compliant);
        assert_eq!(check.violations.len(), 1);
        let v = &check.violations[0];
        assert_eq!(v.kind, ViolationKind::UnencryptedSensitiveData);
        assert_eq!(v.field, "ssn");
        assert_eq!(v.severity, Severity::High);
    }

    #[test]
    fn marked_ssn_is_compliant() {
        let record = json!({"ssn": "opaque-ciphertext", "ssn_encrypted": true});
        let check = validator().validate(&record, &ComplianceOptions::default());
        assert!(check.is_compliant);
        assert!(check.violations.is_empty());
    }

    #[test]
    fn nested_violation_reports_dot_path() {
        let record = json!({"client": {"profile": {"email": "a@b.c"}}});
        let check = validator().validate(&record, &ComplianceOptions::default());
        assert_eq!(check.violations.len(), 1);
        assert_eq!(check.violations[0].field, "client.profile.email");
    }

    #[test]
    fn allow_list_suppresses_violation() {
        let record = json!({"email": "front-desk@example.com"});
        let options = ComplianceOptions {
            allow_sensitive_fields: ["email".to_string()].into_iter().collect(),
            ..ComplianceOptions::default()
        };
        assert!(validator().validate(&record, &options).is_compliant);
    }

    #[test]
    fn require_encryption_off_skips_sensitive_check() {
        let record = json!({"ssn": "123-45-6789", "debug_trace": "x"});
        let options = ComplianceOptions {
            require_encryption: false,
            ..ComplianceOptions::default()
        };
        let check = validator().validate(&record, &options);
        assert_eq!(check.violations.len(), 1);
        assert_eq!(check.violations[0].kind, ViolationKind::DataMinimization);
    }

    #[test]
    fn minimization_prefixes_flagged_medium() {
        let record = json!({"temp_export": 1, "old_address_cache": "x", "name": "ok"});
        let check = validator().validate(&record, &ComplianceOptions::default());
        assert_eq!(check.violations.len(), 2);
        for v in &check.violations {
            assert_eq!(v.kind, ViolationKind::DataMinimization);
            assert_eq!(v.severity, Severity::Medium);
        }
    }

    #[test]
    fn minimization_off_skips_prefix_check() {
        let record = json!({"tmp_scratch": 1});
        let options = ComplianceOptions {
            validate_data_minimization: false,
            ..ComplianceOptions::default()
        };
        assert!(validator().validate(&record, &options).is_compliant);
    }

    #[test]
    fn array_items_are_inspected() {
        let record = json!({"visits": [{"session_notes": "plain"}]});
        let check = validator().validate(&record, &ComplianceOptions::default());
        assert_eq!(check.violations.len(), 1);
        assert_eq!(check.violations[0].field, "visits[0].session_notes");
    }

    #[test]
    fn non_object_record_is_trivially_compliant() {
        let check = validator().validate(&json!("scalar"), &ComplianceOptions::default());
        assert!(check.is_compliant);
    }
}

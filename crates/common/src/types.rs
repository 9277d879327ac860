//! Core data model: audit events, their classification enums, and the
//! compliance/anomaly types produced by the core.
//!
//! Everything here is plain serde data — no I/O and no crypto. The narrative
//! payload of an [`AuditEvent`] is a flattened JSON map so that selectively
//! encrypted fields and their `<field>_encrypted` markers serialize exactly
//! like the rest of the event.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Retention horizon for security/auth-adjacent events (~7 years).
pub const SECURITY_EVENT_RETENTION_DAYS: u32 = 7 * 365;
/// Retention horizon for data export/import events (~3 years).
pub const DATA_EVENT_RETENTION_DAYS: u32 = 3 * 365;
/// Retention horizon for system-change events (~5 years).
pub const SYSTEM_EVENT_RETENTION_DAYS: u32 = 5 * 365;
/// Retention horizon for generic user actions (~2 years).
pub const USER_ACTION_RETENTION_DAYS: u32 = 2 * 365;
/// Default horizon used by the retention scheduler's cleanup cutoff (1 year).
pub const DEFAULT_RETENTION_DAYS: u32 = 365;

/// The kind of operation an audit event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Create,
    Read,
    Update,
    Delete,
    Login,
    Logout,
    Access,
    PermissionChange,
    DataExport,
    DataImport,
    SystemChange,
}

impl EventType {
    /// Every event type, in declaration order.
    pub const ALL: [EventType; 11] = [
        EventType::Create,
        EventType::Read,
        EventType::Update,
        EventType::Delete,
        EventType::Login,
        EventType::Logout,
        EventType::Access,
        EventType::PermissionChange,
        EventType::DataExport,
        EventType::DataImport,
        EventType::SystemChange,
    ];

    /// Wire name of the event type.
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Create => "create",
            EventType::Read => "read",
            EventType::Update => "update",
            EventType::Delete => "delete",
            EventType::Login => "login",
            EventType::Logout => "logout",
            EventType::Access => "access",
            EventType::PermissionChange => "permission_change",
            EventType::DataExport => "data_export",
            EventType::DataImport => "data_import",
            EventType::SystemChange => "system_change",
        }
    }

    /// Retention horizon in days, computed from the fixed classification
    /// table. Deterministic: the same event type always maps to the same
    /// horizon. Callers may override per event, never ad hoc here.
    pub fn retention_days(self) -> u32 {
        match self {
            EventType::Login
            | EventType::Logout
            | EventType::Access
            | EventType::PermissionChange => SECURITY_EVENT_RETENTION_DAYS,
            EventType::DataExport | EventType::DataImport => DATA_EVENT_RETENTION_DAYS,
            EventType::SystemChange => SYSTEM_EVENT_RETENTION_DAYS,
            EventType::Create | EventType::Read | EventType::Update | EventType::Delete => {
                USER_ACTION_RETENTION_DAYS
            }
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of business entity an audit event concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    User,
    Client,
    SessionNote,
    TreatmentPlan,
    Objective,
    Credential,
    Document,
    System,
}

impl EntityType {
    /// Wire name of the entity type.
    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::User => "user",
            EntityType::Client => "client",
            EntityType::SessionNote => "session_note",
            EntityType::TreatmentPlan => "treatment_plan",
            EntityType::Objective => "objective",
            EntityType::Credential => "credential",
            EntityType::Document => "document",
            EntityType::System => "system",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity classification of an audit event or compliance violation.
///
/// Ordered: `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Wire name of the severity level.
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk classification of an anomaly finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Returns `true` for findings that warrant a call-time warning.
    pub fn is_elevated(self) -> bool {
        matches!(self, RiskLevel::High | RiskLevel::Critical)
    }
}

/// Request context captured alongside every audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventContext {
    /// Deployment environment tag (e.g. `"production"`).
    pub environment: String,
    /// Per-log-call request identifier (`req_<uuid>`).
    pub request_id: String,
    /// When the context block was built.
    pub timestamp: DateTime<Utc>,
}

/// An immutable, severity-classified, retention-governed audit record.
///
/// Routing and search fields (`ip`, `user_agent`, `session_id`, the context
/// block) always stay plaintext. Narrative payload fields (`changes`,
/// `previous_data`, `new_data`, `details`) live in the flattened `payload`
/// map and are selectively encrypted by the recorder, each paired with a
/// `<field>_encrypted = true` marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event identifier (`audit_<uuid>`).
    pub event_id: String,
    pub event_type: EventType,
    pub entity_type: EntityType,
    /// Identifier of the affected business entity.
    pub entity_id: String,
    /// Free-form action verb supplied by the caller (e.g. `"bulk_delete"`).
    pub action: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    /// Days this event may be retained before scheduled deletion.
    pub retention_days: u32,
    /// Who performed the operation; `"system"` for unattended paths.
    pub actor_id: String,
    pub ip: String,
    pub user_agent: String,
    pub session_id: String,
    pub context: EventContext,
    /// Narrative payload fields and their encryption markers.
    #[serde(flatten)]
    pub payload: serde_json::Map<String, Value>,
}

impl AuditEvent {
    /// Returns `true` when the event's retention horizon has passed as of `now`.
    pub fn retention_exceeded(&self, now: DateTime<Utc>) -> bool {
        self.timestamp + chrono::Duration::days(i64::from(self.retention_days)) <= now
    }
}

/// What a compliance violation is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// A sensitive field left the core without its paired encrypted marker.
    UnencryptedSensitiveData,
    /// A temporary/debug/deprecated field survived into an outbound record.
    DataMinimization,
}

/// A single finding from compliance validation — produced, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceViolation {
    #[serde(rename = "type")]
    pub kind: ViolationKind,
    /// Dot path of the offending field (e.g. `"client.emergency_contact"`).
    pub field: String,
    pub severity: Severity,
    pub message: String,
}

/// A read-only finding from audit anomaly detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyFinding {
    /// Machine-readable rule name (e.g. `"actor_volume_burst"`).
    #[serde(rename = "type")]
    pub kind: String,
    pub risk_level: RiskLevel,
    pub description: String,
}

/// Page descriptor attached to trail and search results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub has_more: bool,
}

//! Shared vocabulary for the practice privacy core: error taxonomy, the audit
//! event model, and the compliance/anomaly types exchanged between the core
//! and its domain collaborators.

pub mod error;
pub mod types;

pub use error::PrivacyError;
pub use types::{
    AnomalyFinding, AuditEvent, ComplianceViolation, EntityType, EventContext, EventType,
    Pagination, RiskLevel, Severity, ViolationKind,
};

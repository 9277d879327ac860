//! Audit trail recording, querying, and retention.
//!
//! # Responsibilities
//!
//! - [`AuditRecorder`] builds, classifies, selectively encrypts, and persists
//!   one audit event per observed operation — and never lets an audit failure
//!   break the operation it observes.
//! - [`AuditQueryEngine`] retrieves, decrypts, searches, and summarises the
//!   trail; generates compliance reports; runs anomaly detection.
//! - [`RetentionScheduler`] purges events past their retention horizon on a
//!   fixed interval with a single-flight guard, and records the deletion.
//! - [`AuditStore`] is the persistence contract; [`MemoryAuditStore`] is the
//!   in-process reference implementation.
//!
//! # Module invariants
//!
//! - Events are append-only and logically immutable once created; only the
//!   retention path deletes them.
//! - Narrative payload fields are the only encrypted parts of an event;
//!   routing fields stay queryable plaintext.

pub mod query;
pub mod recorder;
pub mod retention;
pub mod store;

pub use query::{AuditQueryEngine, AuditTrail, SearchResults, TrailOptions, TrailSummary};
pub use recorder::{AuditRecorder, EventDraft, LogOptions};
pub use retention::{DeletionRequest, RetentionScheduler};
pub use store::{
    AnomalyOptions, AuditStore, ComplianceReport, DeletionCriteria, DeletionOutcome,
    MemoryAuditStore, ReportOptions, SearchCriteria, StorePage, TrailFilters,
};

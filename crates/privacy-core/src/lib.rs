//! Consent-gated field-level encryption and compliance audit core for a
//! practice-management backend.
//!
//! Domain collaborators (the bookings/rates/packages proxies and friends) use
//! exactly two contracts from this crate:
//!
//! 1. **Encrypt/decrypt a record for subject X** — [`crypto::FieldCrypter`]
//!    over a key from [`crypto::KeyDeriver`], optionally gated by a
//!    [`consent::ConsentManager`] token and checked by
//!    [`compliance::ComplianceValidator`] before the record leaves the core.
//! 2. **Emit/query an audit event** — [`audit::AuditRecorder`] after every
//!    create/read/update/delete, [`audit::AuditQueryEngine`] and
//!    [`audit::RetentionScheduler`] over the trail it builds.
//!
//! Components are plain constructed values wired together explicitly; there
//! is no global state. One instance of each per process (or per test).

pub mod audit;
pub mod cache;
pub mod compliance;
pub mod config;
pub mod consent;
pub mod crypto;
pub mod telemetry;

pub use audit::{AuditQueryEngine, AuditRecorder, AuditStore, MemoryAuditStore, RetentionScheduler};
pub use cache::TaggedCache;
pub use compliance::ComplianceValidator;
pub use config::Config;
pub use consent::ConsentManager;
pub use crypto::{EncryptionKey, FieldCrypter, KeyDeriver, SensitiveFieldPolicy};

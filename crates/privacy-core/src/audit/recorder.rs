//! Building and persisting audit events.
//!
//! The recorder is deliberately forgiving on its own behalf: a malformed
//! draft (outside strict mode), a crypto failure on the audit copy, or a
//! store outage all downgrade to a logged warning and a `None` return.
//! Losing one audit record is preferable to blocking the therapy or booking
//! operation that triggered it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{AuditEvent, EntityType, EventContext, EventType, PrivacyError, Severity};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::TaggedCache;
use crate::crypto::{FieldCrypter, KeyDeriver, SensitiveFieldPolicy};

use super::store::AuditStore;

/// Cache tags attached to every recorded event entry.
const CACHE_TAGS: &[&str] = &["audit", "logs"];

/// Caller-supplied material for one audit event.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub event_type: EventType,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub action: String,
    /// Defaults to `"system"` when absent.
    pub actor_id: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
    /// Narrative payload fields (`changes`, `previous_data`, `new_data`,
    /// `details`); only these are encrypted.
    pub payload: Map<String, Value>,
}

impl EventDraft {
    pub fn new(
        event_type: EventType,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            entity_type,
            entity_id: entity_id.into(),
            action: action.into(),
            actor_id: None,
            ip: None,
            user_agent: None,
            session_id: None,
            payload: Map::new(),
        }
    }

    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    /// Attach a narrative payload field.
    pub fn payload_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.payload.insert(name.into(), value);
        self
    }
}

/// Per-call knobs for [`AuditRecorder::log`].
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Encrypt narrative payload fields. On by default.
    pub encrypt: bool,
    pub severity: Severity,
    /// Override the retention table for this one event.
    pub retention_days: Option<u32>,
    /// Record a secondary alert entry even below critical severity.
    pub alert_on_critical: bool,
    /// Surface validation failures instead of swallowing them.
    pub strict: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            encrypt: true,
            severity: Severity::Medium,
            retention_days: None,
            alert_on_critical: false,
            strict: false,
        }
    }
}

/// Builds, classifies, selectively encrypts, and persists audit events.
pub struct AuditRecorder {
    store: Arc<dyn AuditStore>,
    cache: TaggedCache,
    deriver: KeyDeriver,
    crypter: FieldCrypter,
    environment: String,
    cache_ttl: Duration,
}

impl AuditRecorder {
    pub fn new(
        store: Arc<dyn AuditStore>,
        cache: TaggedCache,
        environment: impl Into<String>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            deriver: KeyDeriver::new(),
            crypter: FieldCrypter::new(SensitiveFieldPolicy::audit_narrative()),
            environment: environment.into(),
            cache_ttl,
        }
    }

    /// Record one audit event.
    ///
    /// Returns the persisted event, or `None` when the event was dropped
    /// (invalid draft outside strict mode, crypto failure on the audit copy,
    /// or a store failure) — audit logging never aborts the business
    /// operation it observes.
    ///
    /// # Errors
    ///
    /// Only in strict mode, and only [`PrivacyError::Validation`] for a
    /// malformed draft.
    pub async fn log(
        &self,
        draft: EventDraft,
        options: LogOptions,
    ) -> Result<Option<AuditEvent>, PrivacyError> {
        if let Err(e) = validate_draft(&draft) {
            if options.strict {
                return Err(e);
            }
            warn!(
                event_type = %draft.event_type,
                entity_type = %draft.entity_type,
                payload = %self
                    .crypter
                    .sanitize_for_logging(&serde_json::Value::Object(draft.payload.clone())),
                error = %e,
                "invalid audit event draft; dropping"
            );
            return Ok(None);
        }

        let event = match self.build_and_persist(draft, &options).await {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "failed to log audit event; dropping");
                return Ok(None);
            }
        };

        if event.severity == Severity::Critical || options.alert_on_critical {
            self.record_alert(&event, options.encrypt).await;
        }

        debug!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            "audit event logged"
        );
        Ok(Some(event))
    }

    async fn build_and_persist(
        &self,
        draft: EventDraft,
        options: &LogOptions,
    ) -> Result<AuditEvent, PrivacyError> {
        let now = Utc::now();
        let event_id = format!("audit_{}", Uuid::new_v4());
        let actor_id = draft.actor_id.unwrap_or_else(|| "system".to_owned());

        let payload = if options.encrypt && !draft.payload.is_empty() {
            let key = self.deriver.derive(&actor_id, &event_id)?;
            match self.crypter.encrypt(&Value::Object(draft.payload), &key)? {
                Value::Object(map) => map,
                _ => unreachable!("encrypting an object yields an object"),
            }
        } else {
            draft.payload
        };

        let event = AuditEvent {
            event_id,
            event_type: draft.event_type,
            entity_type: draft.entity_type,
            entity_id: draft.entity_id,
            action: draft.action,
            severity: options.severity,
            timestamp: now,
            retention_days: options
                .retention_days
                .unwrap_or_else(|| draft.event_type.retention_days()),
            actor_id,
            ip: draft.ip.unwrap_or_else(|| "unknown".to_owned()),
            user_agent: draft.user_agent.unwrap_or_else(|| "unknown".to_owned()),
            session_id: draft.session_id.unwrap_or_else(|| "unknown".to_owned()),
            context: EventContext {
                environment: self.environment.clone(),
                request_id: format!("req_{}", Uuid::new_v4()),
                timestamp: now,
            },
            payload,
        };

        info!(
            event_type = %event.event_type,
            entity_type = %event.entity_type,
            severity = %event.severity,
            "creating audit event"
        );
        let event = self.store.create(event).await?;

        if let Ok(value) = serde_json::to_value(&event) {
            self.cache
                .set(
                    &format!("audit_event_{}", event.event_id),
                    value,
                    self.cache_ttl,
                    CACHE_TAGS,
                )
                .await;
        }
        Ok(event)
    }

    /// Record the secondary system-level entry documenting a critical event.
    async fn record_alert(&self, original: &AuditEvent, encrypt: bool) {
        error!(
            event_id = %original.event_id,
            event_type = %original.event_type,
            severity = %original.severity,
            "critical audit event detected"
        );

        let draft = EventDraft::new(
            EventType::SystemChange,
            EntityType::System,
            "alert_system",
            "critical_event_alert",
        )
        .payload_field(
            "details",
            serde_json::json!({
                "original_event_id": original.event_id,
                "alert_reason": "critical_severity",
            }),
        );
        let options = LogOptions {
            encrypt,
            severity: Severity::High,
            ..LogOptions::default()
        };
        // Recursion is bounded: the alert itself is high, not critical.
        if let Err(e) = Box::pin(self.log(draft, options)).await {
            warn!(error = %e, "failed to record critical event alert");
        }
    }

    /// Fast single-event lookup from the advisory cache.
    pub async fn cached_event(&self, event_id: &str) -> Option<Value> {
        self.cache.get(&format!("audit_event_{event_id}")).await
    }

    /// Drop all cached audit entries, by tag.
    pub async fn clear_cache(&self) {
        self.cache.invalidate_tag("audit").await;
        self.cache.invalidate_tag("logs").await;
    }
}

fn validate_draft(draft: &EventDraft) -> Result<(), PrivacyError> {
    if draft.entity_id.trim().is_empty() {
        return Err(PrivacyError::validation("entity_id must not be empty"));
    }
    if draft.action.trim().is_empty() {
        return Err(PrivacyError::validation("action must not be empty"));
    }
    Ok(())
}

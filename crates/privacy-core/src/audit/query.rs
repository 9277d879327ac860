//! Retrieval, decryption, and analysis of the audit trail.
//!
//! Read failures surface to the caller — someone explicitly asking for
//! compliance data needs to know it failed. A decryption failure on one
//! event, though, only costs that event its plaintext: the event is returned
//! with its ciphertext intact and a warning is logged.
//!
//! Every read path records its own unencrypted, low-severity `access` entry,
//! so inspection of the trail is itself on the trail.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{
    AnomalyFinding, AuditEvent, EntityType, EventType, Pagination, PrivacyError, Severity,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::crypto::{FieldCrypter, KeyDeriver, SensitiveFieldPolicy};

use super::recorder::{AuditRecorder, EventDraft, LogOptions};
use super::store::{
    AnomalyOptions, AuditStore, ComplianceReport, ReportOptions, SearchCriteria, StorePage,
    TrailFilters,
};

/// Options for a trail fetch.
#[derive(Debug, Clone, Default)]
pub struct TrailOptions {
    pub filters: TrailFilters,
    /// Decrypt narrative payload fields per event.
    pub decrypt_sensitive_data: bool,
}

/// A high/critical event surfaced in a trail summary.
#[derive(Debug, Clone, Serialize)]
pub struct RiskFactor {
    pub event_id: String,
    pub event_type: EventType,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

/// Aggregates over one page of trail events.
#[derive(Debug, Clone, Serialize)]
pub struct TrailSummary {
    pub total_events: usize,
    pub event_types: BTreeMap<String, u64>,
    pub severity_distribution: BTreeMap<String, u64>,
    pub actor_activity: BTreeMap<String, u64>,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
    pub risk_factors: Vec<RiskFactor>,
}

/// Result of [`AuditQueryEngine::get_trail`].
#[derive(Debug, Clone)]
pub struct AuditTrail {
    pub events: Vec<AuditEvent>,
    pub pagination: Pagination,
    pub summary: TrailSummary,
}

/// Aggregations attached to search results.
#[derive(Debug, Clone, Serialize)]
pub struct SearchAggregations {
    pub by_event_type: BTreeMap<String, u64>,
    pub by_severity: BTreeMap<String, u64>,
}

/// Result of [`AuditQueryEngine::search`].
#[derive(Debug, Clone)]
pub struct SearchResults {
    pub events: Vec<AuditEvent>,
    pub pagination: Pagination,
    pub aggregations: SearchAggregations,
}

/// Retrieves, decrypts, searches, and summarises audit trails.
pub struct AuditQueryEngine {
    store: Arc<dyn AuditStore>,
    recorder: Arc<AuditRecorder>,
    deriver: KeyDeriver,
    crypter: FieldCrypter,
}

impl AuditQueryEngine {
    pub fn new(store: Arc<dyn AuditStore>, recorder: Arc<AuditRecorder>) -> Self {
        Self {
            store,
            recorder,
            deriver: KeyDeriver::new(),
            crypter: FieldCrypter::new(SensitiveFieldPolicy::audit_narrative()),
        }
    }

    /// Fetch one page of the trail for a single entity, with summary.
    ///
    /// # Errors
    ///
    /// Surfaces store failures. Per-event decryption failures do not fail
    /// the call; the affected events keep their ciphertext.
    pub async fn get_trail(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        options: &TrailOptions,
    ) -> Result<AuditTrail, PrivacyError> {
        info!(entity_type = %entity_type, entity_id, "fetching audit trail");
        let page = self
            .store
            .get_trail(entity_type, entity_id, &options.filters)
            .await?;

        let pagination = pagination(&page, options.filters.page, options.filters.limit);
        let events = self.maybe_decrypt(page.events, options.decrypt_sensitive_data);
        let summary = summarise(&events);

        self.log_access(
            "audit_trail",
            "read",
            serde_json::json!({
                "entity_type": entity_type.as_str(),
                "entity_id": entity_id,
                "event_count": events.len(),
            }),
        )
        .await;

        Ok(AuditTrail {
            pagination,
            events,
            summary,
        })
    }

    /// Search events across entities.
    ///
    /// # Errors
    ///
    /// Surfaces store failures; decryption is fail-soft per event.
    pub async fn search(
        &self,
        criteria: &SearchCriteria,
        decrypt_sensitive_data: bool,
    ) -> Result<SearchResults, PrivacyError> {
        info!(page = criteria.page, limit = criteria.limit, "searching audit events");
        let page = self.store.search(criteria).await?;
        let events = self.maybe_decrypt(page.events.clone(), decrypt_sensitive_data);

        let mut by_event_type = BTreeMap::new();
        let mut by_severity = BTreeMap::new();
        for event in &events {
            *by_event_type
                .entry(event.event_type.as_str().to_owned())
                .or_insert(0u64) += 1;
            *by_severity
                .entry(event.severity.as_str().to_owned())
                .or_insert(0u64) += 1;
        }

        self.log_access(
            "audit_search",
            "search",
            serde_json::json!({"result_count": events.len()}),
        )
        .await;

        Ok(SearchResults {
            pagination: pagination(&page, criteria.page, criteria.limit),
            events,
            aggregations: SearchAggregations {
                by_event_type,
                by_severity,
            },
        })
    }

    /// Generate a compliance report over the requested window.
    ///
    /// # Errors
    ///
    /// Surfaces store failures.
    pub async fn generate_compliance_report(
        &self,
        report_type: &str,
        options: &ReportOptions,
    ) -> Result<ComplianceReport, PrivacyError> {
        info!(report_type, "generating compliance report");
        let report = self.store.generate_report(report_type, options).await?;

        self.log_access(
            "compliance_report",
            "generate",
            serde_json::json!({"report_type": report_type}),
        )
        .await;

        info!(
            report_type,
            total_events = report.statistics.total_events,
            "compliance report generated"
        );
        Ok(report)
    }

    /// Run anomaly detection over recent history.
    ///
    /// High/critical findings are logged as warnings at call time.
    ///
    /// # Errors
    ///
    /// Surfaces store failures.
    pub async fn detect_anomalies(
        &self,
        options: &AnomalyOptions,
    ) -> Result<Vec<AnomalyFinding>, PrivacyError> {
        info!(lookback_days = options.lookback_days, "detecting audit anomalies");
        let findings = self.store.detect_anomalies(options).await?;

        for finding in findings.iter().filter(|f| f.risk_level.is_elevated()) {
            warn!(
                kind = %finding.kind,
                risk_level = ?finding.risk_level,
                description = %finding.description,
                "high-risk anomaly detected"
            );
        }

        self.log_access(
            "audit_anomalies",
            "analyze",
            serde_json::json!({"finding_count": findings.len()}),
        )
        .await;

        Ok(findings)
    }

    fn maybe_decrypt(&self, events: Vec<AuditEvent>, decrypt: bool) -> Vec<AuditEvent> {
        if !decrypt {
            return events;
        }
        events
            .into_iter()
            .map(|event| self.decrypt_event(event))
            .collect()
    }

    /// Decrypt one event's narrative payload, keeping ciphertext on failure.
    fn decrypt_event(&self, event: AuditEvent) -> AuditEvent {
        if !event.payload.keys().any(|k| k.ends_with("_encrypted")) {
            return event;
        }
        let key = match self.deriver.derive(&event.actor_id, &event.event_id) {
            Ok(key) => key,
            Err(e) => {
                warn!(event_id = %event.event_id, error = %e, "cannot derive audit event key");
                return event;
            }
        };
        match self
            .crypter
            .decrypt(&Value::Object(event.payload.clone()), &key)
        {
            Ok(Value::Object(payload)) => AuditEvent { payload, ..event },
            Ok(_) => event,
            Err(e) => {
                warn!(
                    event_id = %event.event_id,
                    error = %e,
                    "failed to decrypt audit event payload; returning ciphertext"
                );
                event
            }
        }
    }

    /// Record that the trail itself was read. Unencrypted, low severity,
    /// fail-soft by the recorder's own contract.
    async fn log_access(&self, target: &str, action: &str, details: Value) {
        let draft = EventDraft::new(EventType::Access, EntityType::System, target, action)
            .payload_field("details", details);
        let options = LogOptions {
            encrypt: false,
            severity: Severity::Low,
            ..LogOptions::default()
        };
        if let Err(e) = self.recorder.log(draft, options).await {
            warn!(error = %e, "failed to record audit access entry");
        }
    }
}

fn pagination(page: &StorePage, page_no: usize, limit: usize) -> Pagination {
    Pagination {
        page: page_no,
        limit,
        total: page.total,
        has_more: page.has_more,
    }
}

fn summarise(events: &[AuditEvent]) -> TrailSummary {
    let mut summary = TrailSummary {
        total_events: events.len(),
        event_types: BTreeMap::new(),
        severity_distribution: BTreeMap::new(),
        actor_activity: BTreeMap::new(),
        earliest: None,
        latest: None,
        risk_factors: Vec::new(),
    };

    for event in events {
        *summary
            .event_types
            .entry(event.event_type.as_str().to_owned())
            .or_insert(0) += 1;
        *summary
            .severity_distribution
            .entry(event.severity.as_str().to_owned())
            .or_insert(0) += 1;
        *summary
            .actor_activity
            .entry(event.actor_id.clone())
            .or_insert(0) += 1;

        if summary.earliest.is_none_or(|t| event.timestamp < t) {
            summary.earliest = Some(event.timestamp);
        }
        if summary.latest.is_none_or(|t| event.timestamp > t) {
            summary.latest = Some(event.timestamp);
        }

        if event.severity >= Severity::High {
            summary.risk_factors.push(RiskFactor {
                event_id: event.event_id.clone(),
                event_type: event.event_type,
                severity: event.severity,
                timestamp: event.timestamp,
            });
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::store::MemoryAuditStore;
    use crate::cache::TaggedCache;
    use serde_json::json;
    use std::time::Duration;

    fn engine() -> (AuditQueryEngine, Arc<MemoryAuditStore>, Arc<AuditRecorder>) {
        let store = Arc::new(MemoryAuditStore::new());
        let recorder = Arc::new(AuditRecorder::new(
            store.clone(),
            TaggedCache::new(),
            "test",
            Duration::from_secs(600),
        ));
        (
            AuditQueryEngine::new(store.clone(), recorder.clone()),
            store,
            recorder,
        )
    }

    #[tokio::test]
    async fn audit_round_trip_decrypts_details() {
        let (engine, _store, recorder) = engine();
        let draft =
            EventDraft::new(EventType::Update, EntityType::SessionNote, "note-9", "update")
                .actor("therapist-1")
                .payload_field("details", json!({"notes": "made good progress"}));
        recorder.log(draft, LogOptions::default()).await.unwrap().unwrap();

        let options = TrailOptions {
            decrypt_sensitive_data: true,
            ..TrailOptions::default()
        };
        let trail = engine
            .get_trail(EntityType::SessionNote, "note-9", &options)
            .await
            .unwrap();

        assert_eq!(trail.events.len(), 1);
        let event = &trail.events[0];
        assert_eq!(event.payload["details"]["notes"], "made good progress");
        assert!(event.payload.get("details_encrypted").is_none());
        // `update` is a generic user action.
        assert_eq!(event.retention_days, 730);
    }

    #[tokio::test]
    async fn without_decrypt_ciphertext_is_returned() {
        let (engine, _store, recorder) = engine();
        let draft =
            EventDraft::new(EventType::Update, EntityType::SessionNote, "note-9", "update")
                .payload_field("details", json!("sensitive narrative"));
        recorder.log(draft, LogOptions::default()).await.unwrap().unwrap();

        let trail = engine
            .get_trail(EntityType::SessionNote, "note-9", &TrailOptions::default())
            .await
            .unwrap();
        let event = &trail.events[0];
        assert_eq!(event.payload["details_encrypted"], true);
        assert!(event.payload["details"].is_string());
        assert_ne!(event.payload["details"], "sensitive narrative");
    }

    #[tokio::test]
    async fn corrupted_payload_keeps_ciphertext_and_does_not_fail() {
        let (engine, store, recorder) = engine();
        let draft =
            EventDraft::new(EventType::Update, EntityType::SessionNote, "note-9", "update")
                .payload_field("details", json!("narrative"));
        let mut event = recorder
            .log(draft, LogOptions::default())
            .await
            .unwrap()
            .unwrap();

        // Persist a second copy whose ciphertext cannot authenticate.
        event.event_id = "audit_corrupted".into();
        event
            .payload
            .insert("details".into(), json!("bm90IHJlYWwgY2lwaGVydGV4dCEhISE"));
        store.create(event).await.unwrap();

        let options = TrailOptions {
            decrypt_sensitive_data: true,
            ..TrailOptions::default()
        };
        let trail = engine
            .get_trail(EntityType::SessionNote, "note-9", &options)
            .await
            .unwrap();
        assert_eq!(trail.events.len(), 2);
        let corrupted = trail
            .events
            .iter()
            .find(|e| e.event_id == "audit_corrupted")
            .unwrap();
        // Ciphertext intact, marker still present.
        assert_eq!(corrupted.payload["details_encrypted"], true);
        let intact = trail
            .events
            .iter()
            .find(|e| e.event_id != "audit_corrupted")
            .unwrap();
        assert_eq!(intact.payload["details"], "narrative");
    }

    #[tokio::test]
    async fn summary_aggregates_counts_and_risk_factors() {
        let (engine, _store, recorder) = engine();
        for severity in [Severity::Low, Severity::Medium, Severity::Critical] {
            let draft = EventDraft::new(EventType::Read, EntityType::Client, "c1", "read")
                .actor("u1");
            let options = LogOptions {
                severity,
                encrypt: false,
                ..LogOptions::default()
            };
            recorder.log(draft, options).await.unwrap().unwrap();
        }

        let trail = engine
            .get_trail(EntityType::Client, "c1", &TrailOptions::default())
            .await
            .unwrap();
        let summary = &trail.summary;
        assert_eq!(summary.total_events, 3);
        assert_eq!(summary.event_types["read"], 3);
        assert_eq!(summary.actor_activity["u1"], 3);
        assert_eq!(summary.severity_distribution["critical"], 1);
        // The critical event (its alert entry lands on another entity).
        assert_eq!(summary.risk_factors.len(), 1);
        assert!(summary.earliest.unwrap() <= summary.latest.unwrap());
    }

    #[tokio::test]
    async fn reads_leave_their_own_access_entries() {
        let (engine, store, _recorder) = engine();
        engine
            .get_trail(EntityType::Client, "c1", &TrailOptions::default())
            .await
            .unwrap();

        let access = store
            .search(&SearchCriteria {
                event_types: vec![EventType::Access],
                ..SearchCriteria::default()
            })
            .await
            .unwrap();
        assert_eq!(access.total, 1);
        let entry = &access.events[0];
        assert_eq!(entry.severity, Severity::Low);
        assert_eq!(entry.entity_id, "audit_trail");
        // Access entries are plaintext by design.
        assert!(entry.payload.get("details_encrypted").is_none());
    }

    #[tokio::test]
    async fn search_returns_aggregations() {
        let (engine, _store, recorder) = engine();
        for _ in 0..2 {
            let draft = EventDraft::new(EventType::Login, EntityType::User, "u1", "login");
            let options = LogOptions {
                encrypt: false,
                ..LogOptions::default()
            };
            recorder.log(draft, options).await.unwrap().unwrap();
        }

        let results = engine
            .search(
                &SearchCriteria {
                    event_types: vec![EventType::Login],
                    ..SearchCriteria::default()
                },
                false,
            )
            .await
            .unwrap();
        assert_eq!(results.events.len(), 2);
        assert_eq!(results.aggregations.by_event_type["login"], 2);
        assert_eq!(results.pagination.total, 2);
    }

    #[tokio::test]
    async fn compliance_report_via_engine() {
        let (engine, _store, recorder) = engine();
        let draft = EventDraft::new(EventType::DataExport, EntityType::Document, "d1", "export");
        let options = LogOptions {
            severity: Severity::High,
            encrypt: false,
            ..LogOptions::default()
        };
        recorder.log(draft, options).await.unwrap().unwrap();

        let report = engine
            .generate_compliance_report(
                "quarterly",
                &ReportOptions {
                    include_recommendations: true,
                    ..ReportOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(report.report_type, "quarterly");
        assert_eq!(report.findings.len(), 1);
    }

    #[tokio::test]
    async fn anomalies_via_engine() {
        let (engine, _store, recorder) = engine();
        for _ in 0..12 {
            let draft =
                EventDraft::new(EventType::DataExport, EntityType::Document, "d", "export")
                    .actor("u9");
            let options = LogOptions {
                encrypt: false,
                ..LogOptions::default()
            };
            recorder.log(draft, options).await.unwrap().unwrap();
        }
        let findings = engine
            .detect_anomalies(&AnomalyOptions::default())
            .await
            .unwrap();
        assert!(findings.iter().any(|f| f.kind == "bulk_data_export"));
    }
}

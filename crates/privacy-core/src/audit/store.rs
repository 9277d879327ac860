//! Audit persistence contract and the in-process reference store.
//!
//! [`AuditStore`] is the seam between the core and whatever actually holds
//! the trail. Report generation and anomaly detection have default
//! implementations layered on `search`, so a remote store may push them down
//! while [`MemoryAuditStore`] inherits the reference behaviour.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{AnomalyFinding, AuditEvent, EntityType, EventType, PrivacyError, RiskLevel, Severity};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Filters for a per-entity trail fetch.
#[derive(Debug, Clone)]
pub struct TrailFilters {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    /// Restrict to these event types; empty means all.
    pub event_types: Vec<EventType>,
    /// Include `system_change` events in the trail.
    pub include_system_events: bool,
    /// 1-based page number.
    pub page: usize,
    pub limit: usize,
}

impl Default for TrailFilters {
    fn default() -> Self {
        Self {
            start_date: None,
            end_date: None,
            event_types: Vec::new(),
            include_system_events: true,
            page: 1,
            limit: 50,
        }
    }
}

/// Criteria for a cross-entity search.
#[derive(Debug, Clone)]
pub struct SearchCriteria {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub event_types: Vec<EventType>,
    pub severities: Vec<Severity>,
    pub actor_ids: Vec<String>,
    pub entity_types: Vec<EntityType>,
    pub entity_id: Option<String>,
    pub page: usize,
    pub limit: usize,
}

impl Default for SearchCriteria {
    fn default() -> Self {
        Self {
            start_date: None,
            end_date: None,
            event_types: Vec::new(),
            severities: Vec::new(),
            actor_ids: Vec::new(),
            entity_types: Vec::new(),
            entity_id: None,
            page: 1,
            limit: 100,
        }
    }
}

/// One page of events from the store, newest first.
#[derive(Debug, Clone)]
pub struct StorePage {
    pub events: Vec<AuditEvent>,
    pub total: usize,
    pub has_more: bool,
}

/// What to delete.
#[derive(Debug, Clone, Default)]
pub struct DeletionCriteria {
    /// Only events at or before this timestamp.
    pub end_date: Option<DateTime<Utc>>,
    /// Only events whose own retention horizon has passed.
    pub retention_exceeded: bool,
    /// Restrict to these entity types; empty means all.
    pub entity_types: Vec<EntityType>,
}

/// Result of a deletion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionOutcome {
    /// Events matching the criteria.
    pub matched: usize,
    /// Events actually removed (0 for a dry run).
    pub deleted: usize,
    pub dry_run: bool,
}

/// Options for compliance report generation.
#[derive(Debug, Clone, Default)]
pub struct ReportOptions {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub entity_types: Vec<EntityType>,
    pub actor_ids: Vec<String>,
    pub include_recommendations: bool,
}

/// Aggregate statistics over the reporting window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportStatistics {
    pub total_events: usize,
    pub by_event_type: BTreeMap<String, u64>,
    pub by_entity_type: BTreeMap<String, u64>,
    pub by_severity: BTreeMap<String, u64>,
}

/// A high/critical event surfaced in a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportFinding {
    pub event_id: String,
    pub event_type: EventType,
    pub severity: Severity,
    pub action: String,
    pub timestamp: DateTime<Utc>,
}

/// A generated compliance report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub report_type: String,
    pub generated_at: DateTime<Utc>,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub statistics: ReportStatistics,
    pub findings: Vec<ReportFinding>,
    pub recommendations: Vec<String>,
}

/// How aggressively anomaly detection flags activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnomalySensitivity {
    Low,
    #[default]
    Medium,
    High,
}

impl AnomalySensitivity {
    fn volume_threshold(self) -> usize {
        match self {
            AnomalySensitivity::Low => 200,
            AnomalySensitivity::Medium => 100,
            AnomalySensitivity::High => 50,
        }
    }

    fn export_threshold(self) -> usize {
        match self {
            AnomalySensitivity::Low => 20,
            AnomalySensitivity::Medium => 10,
            AnomalySensitivity::High => 5,
        }
    }

    fn severity_cluster_threshold(self) -> usize {
        match self {
            AnomalySensitivity::Low => 10,
            AnomalySensitivity::Medium => 5,
            AnomalySensitivity::High => 3,
        }
    }
}

/// Options for anomaly detection over recent history.
#[derive(Debug, Clone)]
pub struct AnomalyOptions {
    pub lookback_days: u32,
    pub sensitivity: AnomalySensitivity,
    /// Restrict to these event types; empty means all.
    pub event_types: Vec<EventType>,
}

impl Default for AnomalyOptions {
    fn default() -> Self {
        Self {
            lookback_days: 30,
            sensitivity: AnomalySensitivity::default(),
            event_types: Vec::new(),
        }
    }
}

/// Window size used when a default implementation needs the full result set.
const SCAN_LIMIT: usize = 10_000;

/// Persistence contract consumed by the recorder, query engine, and
/// retention scheduler.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append one event. Events are immutable once created.
    async fn create(&self, event: AuditEvent) -> Result<AuditEvent, PrivacyError>;

    /// Fetch one page of the trail for a single entity, newest first.
    async fn get_trail(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        filters: &TrailFilters,
    ) -> Result<StorePage, PrivacyError>;

    /// Fetch one page of events matching `criteria`, newest first.
    async fn search(&self, criteria: &SearchCriteria) -> Result<StorePage, PrivacyError>;

    /// Delete events matching `criteria`. A dry run counts without removing.
    async fn delete_data(
        &self,
        criteria: &DeletionCriteria,
        dry_run: bool,
    ) -> Result<DeletionOutcome, PrivacyError>;

    /// Build a compliance report over the requested window.
    async fn generate_report(
        &self,
        report_type: &str,
        options: &ReportOptions,
    ) -> Result<ComplianceReport, PrivacyError> {
        let criteria = SearchCriteria {
            start_date: options.start_date,
            end_date: options.end_date,
            entity_types: options.entity_types.clone(),
            actor_ids: options.actor_ids.clone(),
            limit: SCAN_LIMIT,
            ..SearchCriteria::default()
        };
        let page = self.search(&criteria).await?;

        let mut by_event_type = BTreeMap::new();
        let mut by_entity_type = BTreeMap::new();
        let mut by_severity = BTreeMap::new();
        let mut findings = Vec::new();
        for event in &page.events {
            *by_event_type
                .entry(event.event_type.as_str().to_owned())
                .or_insert(0u64) += 1;
            *by_entity_type
                .entry(event.entity_type.as_str().to_owned())
                .or_insert(0u64) += 1;
            *by_severity
                .entry(event.severity.as_str().to_owned())
                .or_insert(0u64) += 1;
            if event.severity >= Severity::High {
                findings.push(ReportFinding {
                    event_id: event.event_id.clone(),
                    event_type: event.event_type,
                    severity: event.severity,
                    action: event.action.clone(),
                    timestamp: event.timestamp,
                });
            }
        }

        let mut recommendations = Vec::new();
        if options.include_recommendations {
            if !findings.is_empty() {
                recommendations
                    .push("Review all high and critical severity events in the period".into());
            }
            if by_event_type.contains_key("data_export") {
                recommendations
                    .push("Verify that recorded data exports were authorised".into());
            }
        }

        Ok(ComplianceReport {
            report_type: report_type.to_owned(),
            generated_at: Utc::now(),
            period_start: options.start_date,
            period_end: options.end_date,
            statistics: ReportStatistics {
                total_events: page.total,
                by_event_type,
                by_entity_type,
                by_severity,
            },
            findings,
            recommendations,
        })
    }

    /// Run rule-based anomaly detection over the lookback window.
    async fn detect_anomalies(
        &self,
        options: &AnomalyOptions,
    ) -> Result<Vec<AnomalyFinding>, PrivacyError> {
        let criteria = SearchCriteria {
            start_date: Some(Utc::now() - Duration::days(i64::from(options.lookback_days))),
            event_types: options.event_types.clone(),
            limit: SCAN_LIMIT,
            ..SearchCriteria::default()
        };
        let page = self.search(&criteria).await?;
        let sensitivity = options.sensitivity;

        let mut per_actor: BTreeMap<&str, usize> = BTreeMap::new();
        let mut exports_per_actor: BTreeMap<&str, usize> = BTreeMap::new();
        let mut elevated = 0usize;
        for event in &page.events {
            *per_actor.entry(event.actor_id.as_str()).or_insert(0) += 1;
            if event.event_type == EventType::DataExport {
                *exports_per_actor.entry(event.actor_id.as_str()).or_insert(0) += 1;
            }
            if event.severity >= Severity::High {
                elevated += 1;
            }
        }

        let mut findings = Vec::new();
        for (actor, count) in &per_actor {
            if *count > sensitivity.volume_threshold() {
                let risk = if *count > sensitivity.volume_threshold() * 2 {
                    RiskLevel::Critical
                } else {
                    RiskLevel::High
                };
                findings.push(AnomalyFinding {
                    kind: "actor_volume_burst".into(),
                    risk_level: risk,
                    description: format!(
                        "actor '{actor}' produced {count} events in {} days",
                        options.lookback_days
                    ),
                });
            }
        }
        for (actor, count) in &exports_per_actor {
            if *count > sensitivity.export_threshold() {
                let risk = if *count > sensitivity.export_threshold() * 2 {
                    RiskLevel::Critical
                } else {
                    RiskLevel::High
                };
                findings.push(AnomalyFinding {
                    kind: "bulk_data_export".into(),
                    risk_level: risk,
                    description: format!(
                        "actor '{actor}' exported data {count} times in {} days",
                        options.lookback_days
                    ),
                });
            }
        }
        if elevated > sensitivity.severity_cluster_threshold() {
            findings.push(AnomalyFinding {
                kind: "elevated_severity_cluster".into(),
                risk_level: RiskLevel::High,
                description: format!(
                    "{elevated} high/critical events in {} days",
                    options.lookback_days
                ),
            });
        }

        Ok(findings)
    }
}

/// In-memory [`AuditStore`] backed by a `tokio` read-write lock.
///
/// The reference implementation for tests and single-process deployments.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditStore {
    events: Arc<RwLock<Vec<AuditEvent>>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events currently held.
    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }

    fn deletion_matches(event: &AuditEvent, criteria: &DeletionCriteria, now: DateTime<Utc>) -> bool {
        if let Some(end) = criteria.end_date {
            if event.timestamp > end {
                return false;
            }
        }
        if criteria.retention_exceeded && !event.retention_exceeded(now) {
            return false;
        }
        if !criteria.entity_types.is_empty() && !criteria.entity_types.contains(&event.entity_type)
        {
            return false;
        }
        true
    }
}

fn paginate(mut events: Vec<AuditEvent>, page: usize, limit: usize) -> StorePage {
    events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    let total = events.len();
    let page = page.max(1);
    let start = (page - 1).saturating_mul(limit).min(total);
    let end = (start + limit).min(total);
    StorePage {
        events: events[start..end].to_vec(),
        total,
        has_more: end < total,
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn create(&self, event: AuditEvent) -> Result<AuditEvent, PrivacyError> {
        self.events.write().await.push(event.clone());
        Ok(event)
    }

    async fn get_trail(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        filters: &TrailFilters,
    ) -> Result<StorePage, PrivacyError> {
        let events = self.events.read().await;
        let matching: Vec<AuditEvent> = events
            .iter()
            .filter(|e| e.entity_type == entity_type && e.entity_id == entity_id)
            .filter(|e| filters.start_date.is_none_or(|d| e.timestamp >= d))
            .filter(|e| filters.end_date.is_none_or(|d| e.timestamp <= d))
            .filter(|e| {
                filters.event_types.is_empty() || filters.event_types.contains(&e.event_type)
            })
            .filter(|e| {
                filters.include_system_events || e.event_type != EventType::SystemChange
            })
            .cloned()
            .collect();
        Ok(paginate(matching, filters.page, filters.limit))
    }

    async fn search(&self, criteria: &SearchCriteria) -> Result<StorePage, PrivacyError> {
        let events = self.events.read().await;
        let matching: Vec<AuditEvent> = events
            .iter()
            .filter(|e| criteria.start_date.is_none_or(|d| e.timestamp >= d))
            .filter(|e| criteria.end_date.is_none_or(|d| e.timestamp <= d))
            .filter(|e| {
                criteria.event_types.is_empty() || criteria.event_types.contains(&e.event_type)
            })
            .filter(|e| {
                criteria.severities.is_empty() || criteria.severities.contains(&e.severity)
            })
            .filter(|e| criteria.actor_ids.is_empty() || criteria.actor_ids.contains(&e.actor_id))
            .filter(|e| {
                criteria.entity_types.is_empty() || criteria.entity_types.contains(&e.entity_type)
            })
            .filter(|e| {
                criteria
                    .entity_id
                    .as_deref()
                    .is_none_or(|id| e.entity_id == id)
            })
            .cloned()
            .collect();
        Ok(paginate(matching, criteria.page, criteria.limit))
    }

    async fn delete_data(
        &self,
        criteria: &DeletionCriteria,
        dry_run: bool,
    ) -> Result<DeletionOutcome, PrivacyError> {
        let now = Utc::now();
        let mut events = self.events.write().await;
        let matched = events
            .iter()
            .filter(|e| Self::deletion_matches(e, criteria, now))
            .count();
        let deleted = if dry_run {
            0
        } else {
            events.retain(|e| !Self::deletion_matches(e, criteria, now));
            matched
        };
        Ok(DeletionOutcome {
            matched,
            deleted,
            dry_run,
        })
    }
}

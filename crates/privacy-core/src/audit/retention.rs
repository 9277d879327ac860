//! Retention enforcement over the audit trail.
//!
//! Destructive deletions require named approval and leave their own
//! high-severity audit record. The periodic cleanup runs under a
//! single-flight guard so a slow pass and the next tick never overlap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{EntityType, EventType, PrivacyError, Severity};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::recorder::{AuditRecorder, EventDraft, LogOptions};
use super::store::{AuditStore, DeletionCriteria, DeletionOutcome};

/// Authorisation and intent for a deletion.
#[derive(Debug, Clone)]
pub struct DeletionRequest {
    /// Count matches without removing anything. On by default.
    pub dry_run: bool,
    pub reason: String,
    /// Required for a destructive run.
    pub approved_by: Option<String>,
    /// Record the deletion itself on the trail. On by default.
    pub create_deletion_record: bool,
}

impl Default for DeletionRequest {
    fn default() -> Self {
        Self {
            dry_run: true,
            reason: String::new(),
            approved_by: None,
            create_deletion_record: true,
        }
    }
}

/// Deletes expired audit data on a fixed interval and on demand.
pub struct RetentionScheduler {
    store: Arc<dyn AuditStore>,
    recorder: Arc<AuditRecorder>,
    interval: Duration,
    default_retention_days: u32,
    running: AtomicBool,
}

impl RetentionScheduler {
    pub fn new(
        store: Arc<dyn AuditStore>,
        recorder: Arc<AuditRecorder>,
        interval: Duration,
        default_retention_days: u32,
    ) -> Self {
        Self {
            store,
            recorder,
            interval,
            default_retention_days,
            running: AtomicBool::new(false),
        }
    }

    /// Delete audit data matching `criteria`, subject to `request`.
    ///
    /// # Errors
    ///
    /// [`PrivacyError::Validation`] for a destructive run without an
    /// approver; store failures surface.
    pub async fn delete_audit_data(
        &self,
        criteria: &DeletionCriteria,
        request: &DeletionRequest,
    ) -> Result<DeletionOutcome, PrivacyError> {
        if !request.dry_run && request.approved_by.is_none() {
            return Err(PrivacyError::validation(
                "destructive audit deletion requires an approver",
            ));
        }

        let outcome = self.store.delete_data(criteria, request.dry_run).await?;
        info!(
            matched = outcome.matched,
            deleted = outcome.deleted,
            dry_run = outcome.dry_run,
            reason = %request.reason,
            "audit deletion completed"
        );

        if !request.dry_run {
            // Deleted events must not linger in the advisory cache.
            self.recorder.clear_cache().await;
        }

        if !request.dry_run && request.create_deletion_record {
            let actor = request
                .approved_by
                .clone()
                .unwrap_or_else(|| "system".to_owned());
            let draft = EventDraft::new(
                EventType::SystemChange,
                EntityType::System,
                "audit_data",
                "bulk_delete",
            )
            .actor(actor)
            .payload_field(
                "details",
                serde_json::json!({
                    "deleted_count": outcome.deleted,
                    "reason": request.reason,
                    "approved_by": request.approved_by,
                }),
            );
            let options = LogOptions {
                severity: Severity::High,
                alert_on_critical: true,
                ..LogOptions::default()
            };
            // Fail-soft by the recorder's contract; the deletion stands.
            if let Err(e) = self.recorder.log(draft, options).await {
                warn!(error = %e, "failed to record audit deletion");
            }
        }

        Ok(outcome)
    }

    /// Run one cleanup pass: delete everything past its retention horizon
    /// and anything older than the default horizon.
    ///
    /// Returns `None` when a pass is already in flight.
    ///
    /// # Errors
    ///
    /// Store failures surface.
    pub async fn run_cleanup(&self) -> Result<Option<DeletionOutcome>, PrivacyError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("retention cleanup already running; skipping this pass");
            return Ok(None);
        }

        let cutoff = Utc::now() - chrono::Duration::days(i64::from(self.default_retention_days));
        let criteria = DeletionCriteria {
            end_date: Some(cutoff),
            retention_exceeded: true,
            ..DeletionCriteria::default()
        };
        let request = DeletionRequest {
            dry_run: false,
            reason: "automatic_retention_cleanup".into(),
            approved_by: Some("system".into()),
            create_deletion_record: true,
        };

        let result = self.delete_audit_data(&criteria, &request).await;
        self.running.store(false, Ordering::SeqCst);
        result.map(Some)
    }

    /// Spawn the periodic cleanup loop.
    pub fn task(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // First tick fires immediately; the schedule starts one interval out.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                info!("running scheduled retention cleanup");
                match self.run_cleanup().await {
                    Ok(Some(outcome)) => {
                        info!(deleted = outcome.deleted, "retention cleanup finished");
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "retention cleanup failed"),
                }
            }
        })
    }
}

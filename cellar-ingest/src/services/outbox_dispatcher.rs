//! Outbox dispatcher
//!
//! Approved counting sessions become outbox jobs carrying the external
//! document. Jobs are deduplicated on `(job_type, payload_hash)`, so resubmitting
//! unchanged content returns the existing job. Dispatch delivers pending jobs
//! oldest first with a bounded number of attempts per job.

use std::sync::Arc;
use std::time::Instant;

use cellar_common::config::OutboxConfig;
use cellar_common::content_hash;
use cellar_common::events::{CellarEvent, EventBus};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::logs::{self, ApiLogEntry};
use crate::db::{outbox, sessions};
use crate::models::{CountingSession, DispatchResult, JobType, OutboxJob, OutboxStatus, SessionTotal};
use crate::services::inventory_client::{
    InventoryError, InventorySession, InventorySystem, DOCUMENTS_PATH,
};

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("Counting session not found: {0}")]
    SessionNotFound(String),

    #[error("Session {session_id} is {status}; only approved or completed sessions can be submitted")]
    SessionNotSubmittable { session_id: String, status: String },

    #[error("Session {0} has no counted products with an external id")]
    EmptySession(String),

    #[error("Outbox job not found: {0}")]
    JobNotFound(Uuid),

    #[error(transparent)]
    Common(#[from] cellar_common::Error),
}

/// One line of the external inventory document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentLine {
    pub product_external_id: String,
    pub counted: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difference: Option<f64>,
}

/// Document posted to the inventory system
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InventoryDocument {
    pub document_type: &'static str,
    pub session_id: String,
    pub store_external_id: Option<String>,
    pub counted_at: Option<String>,
    pub lines: Vec<DocumentLine>,
}

/// Build the document for a session's totals
///
/// Products without an external id cannot be addressed upstream and are
/// left out. Check documents also carry the expected baseline.
pub fn build_document(
    session: &CountingSession,
    totals: &[SessionTotal],
    job_type: JobType,
) -> InventoryDocument {
    let lines = totals
        .iter()
        .filter_map(|total| {
            let Some(external_id) = total.product_external_id.as_deref() else {
                warn!(
                    session_id = %session.id,
                    product_id = %total.product_id,
                    "Counted product has no external id, omitted from document"
                );
                return None;
            };

            let (expected, difference) = match job_type {
                JobType::InventoryCommit => (None, None),
                JobType::InventoryCheck => {
                    let expected = total.expected.unwrap_or(0.0);
                    (Some(expected), Some(total.counted - expected))
                }
            };

            Some(DocumentLine {
                product_external_id: external_id.to_string(),
                counted: total.counted,
                expected,
                difference,
            })
        })
        .collect();

    InventoryDocument {
        document_type: job_type.as_str(),
        session_id: session.id.clone(),
        store_external_id: session.store_external_id.clone(),
        counted_at: session.approved_at.clone(),
        lines,
    }
}

/// Result of `enqueue`
#[derive(Debug, Clone)]
pub struct Enqueued {
    pub job: OutboxJob,
    pub items_count: usize,
    /// False when an identical job already existed
    pub created: bool,
}

#[derive(Clone)]
pub struct OutboxDispatcher {
    db: SqlitePool,
    inventory: Arc<dyn InventorySystem>,
    config: OutboxConfig,
    event_bus: EventBus,
}

impl OutboxDispatcher {
    pub fn new(
        db: SqlitePool,
        inventory: Arc<dyn InventorySystem>,
        config: OutboxConfig,
        event_bus: EventBus,
    ) -> Self {
        Self {
            db,
            inventory,
            config,
            event_bus,
        }
    }

    /// Queue a session's approved counts for delivery
    pub async fn enqueue(&self, session_id: &str, job_type: JobType) -> Result<Enqueued, OutboxError> {
        let session = sessions::get_session(&self.db, session_id)
            .await?
            .ok_or_else(|| OutboxError::SessionNotFound(session_id.to_string()))?;

        if !session.is_submittable() {
            return Err(OutboxError::SessionNotSubmittable {
                session_id: session.id,
                status: session.status,
            });
        }

        let totals = sessions::session_totals(&self.db, session_id).await?;
        let document = build_document(&session, &totals, job_type);
        if document.lines.is_empty() {
            return Err(OutboxError::EmptySession(session.id));
        }

        let payload = serde_json::to_value(&document).map_err(cellar_common::Error::from)?;
        let payload_hash = content_hash(&payload)?;
        let items_count = document.lines.len();

        let now = Utc::now();
        let candidate = OutboxJob {
            id: Uuid::new_v4(),
            job_type,
            session_id: session.id.clone(),
            payload,
            payload_hash,
            status: OutboxStatus::Pending,
            attempts: 0,
            max_attempts: self.config.max_attempts,
            last_error: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
        };

        let (job, created) = outbox::insert_if_absent(&self.db, &candidate).await?;

        if created {
            info!(
                job_id = %job.id,
                session_id = %job.session_id,
                job_type = job_type.as_str(),
                items = items_count,
                "Outbox job enqueued"
            );
            self.audit(
                "outbox_enqueued",
                job.id,
                json!({ "session_id": job.session_id, "job_type": job_type.as_str(), "items": items_count }),
            )
            .await;
        } else {
            debug!(job_id = %job.id, session_id = %job.session_id, "Identical outbox job already queued");
        }

        Ok(Enqueued {
            job,
            items_count,
            created,
        })
    }

    /// Deliver pending jobs (or just `job_id`) and report each outcome
    ///
    /// The inventory session is opened only when a delivery is attempted and
    /// is always closed before returning.
    pub async fn dispatch(&self, job_id: Option<Uuid>) -> Result<Vec<DispatchResult>, OutboxError> {
        let jobs = match job_id {
            Some(id) => {
                let job = outbox::get_job(&self.db, id)
                    .await?
                    .ok_or(OutboxError::JobNotFound(id))?;
                if job.status != OutboxStatus::Pending {
                    debug!(job_id = %id, status = job.status.as_str(), "Job not pending, nothing to do");
                    return Ok(vec![DispatchResult {
                        job_id: job.id,
                        status: job.status,
                        attempts: job.attempts,
                        error: job.last_error,
                    }]);
                }
                vec![job]
            }
            None => outbox::pending_jobs(&self.db, self.config.batch_limit).await?,
        };

        let mut session: Option<InventorySession> = None;
        let mut results = Vec::with_capacity(jobs.len());
        let mut outcome = Ok(());

        for job in jobs {
            match self.dispatch_one(&job, &mut session).await {
                Ok(Some(result)) => {
                    self.event_bus.emit_lossy(CellarEvent::OutboxJobDispatched {
                        job_id: result.job_id,
                        session_id: job.session_id.clone(),
                        status: result.status.as_str().to_string(),
                        attempts: result.attempts,
                        timestamp: Utc::now(),
                    });
                    results.push(result);
                }
                Ok(None) => {}
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        if let Some(open) = session.take() {
            if let Err(e) = self.inventory.close_session(&open).await {
                warn!("Failed to close inventory session after dispatch: {}", e);
            }
        }

        outcome.map(|()| results)
    }

    /// `Ok(None)` when another dispatcher claimed the job first
    async fn dispatch_one(
        &self,
        job: &OutboxJob,
        session: &mut Option<InventorySession>,
    ) -> Result<Option<DispatchResult>, OutboxError> {
        if job.is_exhausted() {
            let message = format!(
                "Gave up after {} delivery attempts: {}",
                job.attempts,
                job.last_error.as_deref().unwrap_or("no error recorded")
            );
            outbox::mark_failed(&self.db, job.id, &message).await?;
            error!(job_id = %job.id, attempts = job.attempts, "Outbox job exhausted");
            self.audit(
                "outbox_exhausted",
                job.id,
                json!({ "session_id": job.session_id, "attempts": job.attempts }),
            )
            .await;
            return Ok(Some(DispatchResult {
                job_id: job.id,
                status: OutboxStatus::Failed,
                attempts: job.attempts,
                error: Some(message),
            }));
        }

        let Some(attempts) = outbox::claim(&self.db, job.id).await? else {
            return Ok(None);
        };

        let started = Instant::now();
        let delivery = match self.session(session).await {
            Ok(open) => self.inventory.submit_document(open, &job.payload).await,
            Err(e) => Err(e),
        };
        let duration_ms = started.elapsed().as_millis() as i64;

        let (status_code, error) = match &delivery {
            Ok(receipt) => (Some(receipt.status_code), None),
            Err(e) => (e.status_code(), Some(e.to_string())),
        };
        let entry = ApiLogEntry {
            method: "POST".to_string(),
            endpoint: DOCUMENTS_PATH.to_string(),
            reference_id: Some(job.id.to_string()),
            status_code,
            success: delivery.is_ok(),
            duration_ms,
            error: error.clone(),
        };
        if let Err(e) = logs::log_api_call(&self.db, &entry).await {
            warn!(job_id = %job.id, "API log write failed: {}", e);
        }

        match error {
            None => {
                outbox::mark_success(&self.db, job.id).await?;
                sessions::mark_synced(&self.db, &job.session_id).await?;
                info!(job_id = %job.id, session_id = %job.session_id, attempts, duration_ms, "Outbox job delivered");
                self.audit(
                    "outbox_delivered",
                    job.id,
                    json!({ "session_id": job.session_id, "attempts": attempts }),
                )
                .await;

                Ok(Some(DispatchResult {
                    job_id: job.id,
                    status: OutboxStatus::Success,
                    attempts,
                    error: None,
                }))
            }
            Some(message) => {
                outbox::mark_retry(&self.db, job.id, &message).await?;
                warn!(
                    job_id = %job.id,
                    attempts,
                    max_attempts = job.max_attempts,
                    "Outbox delivery failed: {}", message
                );

                Ok(Some(DispatchResult {
                    job_id: job.id,
                    status: OutboxStatus::Pending,
                    attempts,
                    error: Some(message),
                }))
            }
        }
    }

    /// Reuse the batch's inventory session, opening it on first use
    async fn session<'a>(
        &self,
        session: &'a mut Option<InventorySession>,
    ) -> Result<&'a InventorySession, InventoryError> {
        let open = match session.take() {
            Some(open) => open,
            None => self.inventory.open_session().await?,
        };
        Ok(session.insert(open))
    }

    async fn audit(&self, action: &str, job_id: Uuid, details: serde_json::Value) {
        let job_id = job_id.to_string();
        if let Err(e) = logs::audit(&self.db, action, "outbox_job", Some(&job_id), details).await {
            warn!(job_id = %job_id, action, "Audit write failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> CountingSession {
        CountingSession {
            id: "cs-1".to_string(),
            store_id: Some("local-store".to_string()),
            store_external_id: Some("S1".to_string()),
            name: "October count".to_string(),
            status: "approved".to_string(),
            approved_at: Some("2026-10-01T18:00:00Z".to_string()),
        }
    }

    fn total(external_id: Option<&str>, counted: f64, expected: Option<f64>) -> SessionTotal {
        SessionTotal {
            product_id: format!("local-{}", external_id.unwrap_or("none")),
            product_external_id: external_id.map(str::to_string),
            counted,
            expected,
        }
    }

    #[test]
    fn test_commit_document_omits_unaddressable_products() {
        let totals = vec![
            total(Some("P1"), 6.0, Some(5.0)),
            total(None, 2.0, None),
            total(Some("P2"), 12.0, None),
        ];

        let document = build_document(&session(), &totals, JobType::InventoryCommit);

        assert_eq!(document.document_type, "inventory_commit");
        assert_eq!(document.store_external_id.as_deref(), Some("S1"));
        assert_eq!(document.lines.len(), 2);
        assert_eq!(document.lines[0].expected, None);
        assert_eq!(document.lines[1].product_external_id, "P2");
    }

    #[test]
    fn test_check_document_reports_differences() {
        let totals = vec![total(Some("P1"), 6.0, Some(5.0)), total(Some("P2"), 3.0, None)];

        let document = build_document(&session(), &totals, JobType::InventoryCheck);

        assert_eq!(document.lines[0].difference, Some(1.0));
        assert_eq!(document.lines[1].expected, Some(0.0));
        assert_eq!(document.lines[1].difference, Some(3.0));
    }

    #[test]
    fn test_commit_lines_serialize_without_baseline() {
        let document = build_document(&session(), &[total(Some("P1"), 1.0, Some(4.0))], JobType::InventoryCommit);
        let value = serde_json::to_value(&document).unwrap();

        assert!(value["lines"][0].get("expected").is_none());
        assert_eq!(value["counted_at"], "2026-10-01T18:00:00Z");
    }
}

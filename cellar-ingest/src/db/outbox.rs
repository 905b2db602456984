//! Outbox job persistence
//!
//! Rows are only ever mutated by the dispatcher and never deleted.

use cellar_common::db::{format_timestamp, now_timestamp, parse_timestamp};
use cellar_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use crate::models::{JobType, OutboxJob, OutboxStatus};

const JOB_COLUMNS: &str = "id, job_type, session_id, payload, payload_hash, status, attempts, \
                           max_attempts, last_error, created_at, updated_at, processed_at";

/// Insert unless a job with the same `(job_type, payload_hash)` exists
///
/// Returns the stored job and whether it was newly created.
pub async fn insert_if_absent(pool: &SqlitePool, job: &OutboxJob) -> Result<(OutboxJob, bool)> {
    let result = sqlx::query(
        r#"
        INSERT INTO outbox_jobs (
            id, job_type, session_id, payload, payload_hash, status,
            attempts, max_attempts, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(job_type, payload_hash) DO NOTHING
        "#,
    )
    .bind(job.id.to_string())
    .bind(job.job_type.as_str())
    .bind(&job.session_id)
    .bind(job.payload.to_string())
    .bind(&job.payload_hash)
    .bind(job.status.as_str())
    .bind(job.attempts)
    .bind(job.max_attempts)
    .bind(format_timestamp(job.created_at))
    .bind(format_timestamp(job.updated_at))
    .execute(pool)
    .await?;

    let created = result.rows_affected() == 1;

    let sql = format!(
        "SELECT {} FROM outbox_jobs WHERE job_type = ? AND payload_hash = ?",
        JOB_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(job.job_type.as_str())
        .bind(&job.payload_hash)
        .fetch_one(pool)
        .await?;

    Ok((row_to_job(&row)?, created))
}

pub async fn get_job(pool: &SqlitePool, job_id: Uuid) -> Result<Option<OutboxJob>> {
    let sql = format!("SELECT {} FROM outbox_jobs WHERE id = ?", JOB_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(job_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_job).transpose()
}

/// Oldest pending jobs first
pub async fn pending_jobs(pool: &SqlitePool, limit: i64) -> Result<Vec<OutboxJob>> {
    let sql = format!(
        "SELECT {} FROM outbox_jobs WHERE status = 'pending' ORDER BY created_at, rowid LIMIT ?",
        JOB_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(limit).fetch_all(pool).await?;

    rows.iter().map(row_to_job).collect()
}

/// Claim a pending job for delivery and count the attempt
///
/// Returns the new attempt count, or None if the job was not pending.
pub async fn claim(pool: &SqlitePool, job_id: Uuid) -> Result<Option<i64>> {
    let attempts: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE outbox_jobs
        SET status = 'processing', attempts = attempts + 1, updated_at = ?
        WHERE id = ? AND status = 'pending'
        RETURNING attempts
        "#,
    )
    .bind(now_timestamp())
    .bind(job_id.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(attempts)
}

pub async fn mark_success(pool: &SqlitePool, job_id: Uuid) -> Result<()> {
    let now = now_timestamp();
    sqlx::query(
        "UPDATE outbox_jobs SET status = 'success', last_error = NULL, updated_at = ?, processed_at = ?
         WHERE id = ?",
    )
    .bind(&now)
    .bind(&now)
    .bind(job_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Back to `pending` so a later dispatch retries it
pub async fn mark_retry(pool: &SqlitePool, job_id: Uuid, error: &str) -> Result<()> {
    sqlx::query("UPDATE outbox_jobs SET status = 'pending', last_error = ?, updated_at = ? WHERE id = ?")
        .bind(error)
        .bind(now_timestamp())
        .bind(job_id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Permanent failure; operator must resubmit
pub async fn mark_failed(pool: &SqlitePool, job_id: Uuid, error: &str) -> Result<()> {
    let now = now_timestamp();
    sqlx::query(
        "UPDATE outbox_jobs SET status = 'failed', last_error = ?, updated_at = ?, processed_at = ?
         WHERE id = ?",
    )
    .bind(error)
    .bind(&now)
    .bind(&now)
    .bind(job_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

fn row_to_job(row: &SqliteRow) -> Result<OutboxJob> {
    let id: String = row.get("id");
    let id = Uuid::parse_str(&id)
        .map_err(|e| Error::Internal(format!("Invalid outbox job id '{}': {}", id, e)))?;

    let job_type: String = row.get("job_type");
    let job_type = JobType::parse(&job_type)
        .ok_or_else(|| Error::Internal(format!("Unknown job type '{}'", job_type)))?;

    let status: String = row.get("status");
    let status = OutboxStatus::parse(&status)
        .ok_or_else(|| Error::Internal(format!("Unknown outbox status '{}'", status)))?;

    let payload: String = row.get("payload");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");
    let processed_at: Option<String> = row.get("processed_at");

    Ok(OutboxJob {
        id,
        job_type,
        session_id: row.get("session_id"),
        payload: serde_json::from_str(&payload)?,
        payload_hash: row.get("payload_hash"),
        status,
        attempts: row.get("attempts"),
        max_attempts: row.get("max_attempts"),
        last_error: row.get("last_error"),
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        processed_at: processed_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

//! Recognition attempt persistence
//!
//! One row per recognition request. Rows are inserted in `processing` and
//! finalized exactly once; terminal rows are never updated again.

use cellar_common::db::{format_timestamp, now_timestamp, parse_timestamp};
use cellar_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{
    AttemptCompletion, AttemptStatus, ExtractionRecord, RecognitionAttempt, RecognitionFeedback,
};
use crate::utils::{max_lock_wait_ms, retry_on_lock};

/// Insert a new attempt (status `processing`)
pub async fn insert_attempt(pool: &SqlitePool, attempt: &RecognitionAttempt) -> Result<()> {
    let id = attempt.id.to_string();
    let created_at = format_timestamp(attempt.created_at);
    let max_wait_ms = max_lock_wait_ms(pool).await;

    retry_on_lock("insert_attempt", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO recognition_attempts (
                id, user_id, session_id, model_used, prompt_version, status, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&attempt.user_id)
        .bind(&attempt.session_id)
        .bind(&attempt.model_used)
        .bind(&attempt.prompt_version)
        .bind(attempt.status.as_str())
        .bind(&created_at)
        .execute(pool)
        .await?;

        Ok(())
    })
    .await
}

/// Move a `processing` attempt to a terminal status
///
/// Fails with `InvalidInput` if the attempt is missing or already terminal.
pub async fn finalize_attempt(
    pool: &SqlitePool,
    attempt_id: Uuid,
    status: AttemptStatus,
    completion: &AttemptCompletion,
) -> Result<()> {
    if !status.is_terminal() {
        return Err(Error::InvalidInput(
            "Attempts can only be finalized into a terminal status".to_string(),
        ));
    }

    let id = attempt_id.to_string();
    let extracted = completion
        .extracted_data
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let processed_at = now_timestamp();
    let max_wait_ms = max_lock_wait_ms(pool).await;

    let affected = retry_on_lock("finalize_attempt", max_wait_ms, || async {
        let result = sqlx::query(
            r#"
            UPDATE recognition_attempts SET
                status = ?,
                extracted_data = ?,
                raw_response = ?,
                matched_product_id = ?,
                match_confidence = ?,
                match_method = ?,
                tokens_used = ?,
                processing_time_ms = ?,
                error_message = ?,
                processed_at = ?
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(status.as_str())
        .bind(&extracted)
        .bind(&completion.raw_response)
        .bind(&completion.matched_product_id)
        .bind(completion.match_confidence)
        .bind(&completion.match_method)
        .bind(completion.tokens_used)
        .bind(completion.processing_time_ms)
        .bind(&completion.error_message)
        .bind(&processed_at)
        .bind(&id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    })
    .await?;

    if affected == 0 {
        return Err(Error::InvalidInput(format!(
            "Recognition attempt {} is not in processing state",
            attempt_id
        )));
    }

    Ok(())
}

/// Load one attempt
pub async fn get_attempt(pool: &SqlitePool, attempt_id: Uuid) -> Result<Option<RecognitionAttempt>> {
    let row = sqlx::query(
        r#"
        SELECT id, user_id, session_id, model_used, prompt_version, status,
               extracted_data, raw_response, matched_product_id, match_confidence,
               match_method, tokens_used, processing_time_ms, error_message,
               created_at, processed_at
        FROM recognition_attempts
        WHERE id = ?
        "#,
    )
    .bind(attempt_id.to_string())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let status: String = row.get("status");
    let status = AttemptStatus::parse(&status)
        .ok_or_else(|| Error::Internal(format!("Unknown attempt status '{}'", status)))?;

    let extracted: Option<String> = row.get("extracted_data");
    let extracted_data = extracted
        .map(|json| serde_json::from_str::<ExtractionRecord>(&json))
        .transpose()?;

    let created_at: String = row.get("created_at");
    let processed_at: Option<String> = row.get("processed_at");

    Ok(Some(RecognitionAttempt {
        id: attempt_id,
        user_id: row.get("user_id"),
        session_id: row.get("session_id"),
        model_used: row.get("model_used"),
        prompt_version: row.get("prompt_version"),
        status,
        extracted_data,
        raw_response: row.get("raw_response"),
        matched_product_id: row.get("matched_product_id"),
        match_confidence: row.get("match_confidence"),
        match_method: row.get("match_method"),
        tokens_used: row.get("tokens_used"),
        processing_time_ms: row.get("processing_time_ms"),
        error_message: row.get("error_message"),
        created_at: parse_timestamp(&created_at)?,
        processed_at: processed_at.as_deref().map(parse_timestamp).transpose()?,
    }))
}

/// Record an operator's confirm/reject decision
pub async fn insert_feedback(pool: &SqlitePool, feedback: &RecognitionFeedback) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO recognition_feedback (attempt_id, user_id, product_id, accepted, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(feedback.attempt_id.to_string())
    .bind(&feedback.user_id)
    .bind(&feedback.product_id)
    .bind(feedback.accepted)
    .bind(now_timestamp())
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

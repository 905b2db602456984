//! Operational logs: outbound API calls and the audit trail

use cellar_common::db::now_timestamp;
use cellar_common::Result;
use sqlx::SqlitePool;

use crate::utils::{max_lock_wait_ms, retry_on_lock};

/// One outbound call to the external inventory system
#[derive(Debug, Clone)]
pub struct ApiLogEntry {
    pub method: String,
    pub endpoint: String,
    /// Outbox job id or sync run id
    pub reference_id: Option<String>,
    pub status_code: Option<u16>,
    pub success: bool,
    pub duration_ms: i64,
    pub error: Option<String>,
}

pub async fn log_api_call(pool: &SqlitePool, entry: &ApiLogEntry) -> Result<()> {
    let created_at = now_timestamp();
    let status_code = entry.status_code.map(i64::from);
    let max_wait_ms = max_lock_wait_ms(pool).await;

    retry_on_lock("log_api_call", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO api_logs (method, endpoint, reference_id, status_code, success, duration_ms, error, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.method)
        .bind(&entry.endpoint)
        .bind(&entry.reference_id)
        .bind(status_code)
        .bind(entry.success)
        .bind(entry.duration_ms)
        .bind(&entry.error)
        .bind(&created_at)
        .execute(pool)
        .await?;

        Ok(())
    })
    .await
}

pub async fn audit(
    pool: &SqlitePool,
    action: &str,
    entity_type: &str,
    entity_id: Option<&str>,
    details: serde_json::Value,
) -> Result<()> {
    let created_at = now_timestamp();
    let details = details.to_string();
    let max_wait_ms = max_lock_wait_ms(pool).await;

    retry_on_lock("audit", max_wait_ms, || async {
        sqlx::query(
            "INSERT INTO audit_log (action, entity_type, entity_id, details, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(action)
        .bind(entity_type)
        .bind(entity_id)
        .bind(&details)
        .bind(&created_at)
        .execute(pool)
        .await?;

        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_audit_and_api_log_rows() {
        let pool = cellar_common::db::init_memory_database().await.unwrap();

        audit(&pool, "sync_started", "sync_run", Some("run-1"), json!({"run_type": "stores"}))
            .await
            .unwrap();
        log_api_call(
            &pool,
            &ApiLogEntry {
                method: "POST".into(),
                endpoint: "/documents".into(),
                reference_id: Some("job-1".into()),
                status_code: Some(503),
                success: false,
                duration_ms: 42,
                error: Some("unavailable".into()),
            },
        )
        .await
        .unwrap();

        let audits: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_log WHERE action = 'sync_started'")
            .fetch_one(&pool)
            .await
            .unwrap();
        let (status, success): (i64, bool) =
            sqlx::query_as("SELECT status_code, success FROM api_logs WHERE reference_id = 'job-1'")
                .fetch_one(&pool)
                .await
                .unwrap();

        assert_eq!(audits, 1);
        assert_eq!(status, 503);
        assert!(!success);
    }
}

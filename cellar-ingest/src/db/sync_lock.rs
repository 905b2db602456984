//! Global sync lease
//!
//! A single row (`id = 1`) holds the current holder and an expiry. Acquire is
//! a conditional update that only succeeds when the lease is free or expired;
//! a crashed holder therefore blocks syncs for at most one TTL.

use cellar_common::Result;
use chrono::Utc;
use sqlx::SqlitePool;

/// Try to take the lease for `holder`; false if someone else holds it
pub async fn try_acquire(pool: &SqlitePool, holder: &str, ttl_secs: i64) -> Result<bool> {
    let now_ms = Utc::now().timestamp_millis();
    let expires_at_ms = now_ms + ttl_secs.max(1) * 1000;

    let result = sqlx::query(
        r#"
        UPDATE sync_lock
        SET holder = ?, acquired_at_ms = ?, expires_at_ms = ?
        WHERE id = 1 AND (holder IS NULL OR expires_at_ms < ?)
        "#,
    )
    .bind(holder)
    .bind(now_ms)
    .bind(expires_at_ms)
    .bind(now_ms)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Release the lease if `holder` still owns it
///
/// Returns false when the lease had expired and was taken over.
pub async fn release(pool: &SqlitePool, holder: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE sync_lock
        SET holder = NULL, acquired_at_ms = NULL, expires_at_ms = NULL
        WHERE id = 1 AND holder = ?
        "#,
    )
    .bind(holder)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Current holder, ignoring expired leases
pub async fn current_holder(pool: &SqlitePool) -> Result<Option<String>> {
    let holder = sqlx::query_scalar::<_, Option<String>>(
        "SELECT holder FROM sync_lock WHERE id = 1 AND holder IS NOT NULL AND expires_at_ms >= ?",
    )
    .bind(Utc::now().timestamp_millis())
    .fetch_optional(pool)
    .await?
    .flatten();

    Ok(holder)
}

//! Counting session reads for outbox enqueue

use cellar_common::db::now_timestamp;
use cellar_common::Result;
use sqlx::SqlitePool;

use crate::models::counting_session::SESSION_SYNCED;
use crate::models::{CountingSession, SessionTotal};

pub async fn get_session(pool: &SqlitePool, session_id: &str) -> Result<Option<CountingSession>> {
    let session = sqlx::query_as::<_, CountingSession>(
        r#"
        SELECT cs.id, cs.store_id, s.external_id AS store_external_id,
               cs.name, cs.status, cs.approved_at
        FROM counting_sessions cs
        LEFT JOIN stores s ON s.id = cs.store_id
        WHERE cs.id = ?
        "#,
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await?;

    Ok(session)
}

/// Counted quantity per product, ordered by product external id
pub async fn session_totals(pool: &SqlitePool, session_id: &str) -> Result<Vec<SessionTotal>> {
    let totals = sqlx::query_as::<_, SessionTotal>(
        r#"
        SELECT ci.product_id,
               p.external_id AS product_external_id,
               SUM(ci.quantity) AS counted,
               MAX(ci.expected_quantity) AS expected
        FROM count_items ci
        LEFT JOIN products p ON p.id = ci.product_id
        WHERE ci.session_id = ?
        GROUP BY ci.product_id, p.external_id
        ORDER BY p.external_id, ci.product_id
        "#,
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?;

    Ok(totals)
}

pub async fn mark_synced(pool: &SqlitePool, session_id: &str) -> Result<()> {
    sqlx::query("UPDATE counting_sessions SET status = ?, synced_at = ? WHERE id = ?")
        .bind(SESSION_SYNCED)
        .bind(now_timestamp())
        .bind(session_id)
        .execute(pool)
        .await?;

    Ok(())
}

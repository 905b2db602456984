//! Database Retry Logic
//!
//! Exponential backoff for transient SQLite lock errors on audit writes.
//! The total wait is bounded by the `database_max_lock_wait_ms` setting.

use cellar_common::{Error, Result};
use sqlx::SqlitePool;
use std::time::{Duration, Instant};

/// Read the retry budget from settings (default 5000ms)
pub async fn max_lock_wait_ms(pool: &SqlitePool) -> u64 {
    sqlx::query_scalar::<_, i64>(
        "SELECT CAST(value AS INTEGER) FROM settings WHERE key = 'database_max_lock_wait_ms'",
    )
    .fetch_optional(pool)
    .await
    .ok()
    .flatten()
    .map(|ms| ms.max(0) as u64)
    .unwrap_or(5000)
}

/// Retry a database operation with exponential backoff until max_wait_ms elapses.
///
/// **Algorithm:**
/// 1. Attempt operation
/// 2. If "database is locked": back off (10ms doubling, capped at 1000ms) and retry
///    while the elapsed time is below `max_wait_ms`
/// 3. Any other error is returned immediately
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0;
    let mut backoff_ms = 10u64;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Database operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_lock_error(&err) {
                    return Err(err);
                }

                let elapsed = start_time.elapsed();
                if elapsed >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        max_wait_ms,
                        "Database operation failed: max retry time exceeded"
                    );
                    return Err(Error::Internal(format!(
                        "Database locked after {} attempts ({} ms elapsed, max {} ms)",
                        attempt,
                        elapsed.as_millis(),
                        max_wait_ms
                    )));
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    "Database locked, will retry after backoff"
                );

                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(1000);
            }
        }
    }
}

fn is_lock_error(err: &Error) -> bool {
    match err {
        Error::Database(db_err) => db_err.to_string().contains("database is locked"),
        _ => false,
    }
}

//! Sync run persistence
//!
//! `stats` is rewritten after every stage so a polling client sees the
//! live stage name and progress.

use cellar_common::db::{format_timestamp, parse_timestamp};
use cellar_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{SyncRun, SyncRunType, SyncStats, SyncStatus};

pub async fn insert_run(pool: &SqlitePool, run: &SyncRun) -> Result<()> {
    sqlx::query(
        "INSERT INTO sync_runs (id, run_type, status, stats, started_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(run.id.to_string())
    .bind(run.run_type.as_str())
    .bind(run.status.as_str())
    .bind(serde_json::to_string(&run.stats)?)
    .bind(format_timestamp(run.started_at))
    .execute(pool)
    .await?;

    Ok(())
}

/// Persist live counters while the run is still `running`
pub async fn update_stats(pool: &SqlitePool, run_id: Uuid, stats: &SyncStats) -> Result<()> {
    sqlx::query("UPDATE sync_runs SET stats = ? WHERE id = ? AND status = 'running'")
        .bind(serde_json::to_string(stats)?)
        .bind(run_id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Write the terminal status, error and final counters
pub async fn finish_run(pool: &SqlitePool, run: &SyncRun) -> Result<()> {
    let finished_at = run.finished_at.map(format_timestamp);

    sqlx::query(
        "UPDATE sync_runs SET status = ?, stats = ?, error = ?, finished_at = ?
         WHERE id = ? AND status = 'running'",
    )
    .bind(run.status.as_str())
    .bind(serde_json::to_string(&run.stats)?)
    .bind(&run.error)
    .bind(finished_at)
    .bind(run.id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_run(pool: &SqlitePool, run_id: Uuid) -> Result<Option<SyncRun>> {
    let row = sqlx::query(
        "SELECT run_type, status, stats, error, started_at, finished_at FROM sync_runs WHERE id = ?",
    )
    .bind(run_id.to_string())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let run_type: String = row.get("run_type");
    let run_type = run_type.parse::<SyncRunType>().map_err(Error::Internal)?;

    let status: String = row.get("status");
    let status = SyncStatus::parse(&status)
        .ok_or_else(|| Error::Internal(format!("Unknown sync status '{}'", status)))?;

    let stats: String = row.get("stats");
    let started_at: String = row.get("started_at");
    let finished_at: Option<String> = row.get("finished_at");

    Ok(Some(SyncRun {
        id: run_id,
        run_type,
        status,
        stats: serde_json::from_str(&stats)?,
        error: row.get("error"),
        started_at: parse_timestamp(&started_at)?,
        finished_at: finished_at.as_deref().map(parse_timestamp).transpose()?,
    }))
}

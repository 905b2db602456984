//! Settings database operations
//!
//! Key-value overrides read by the extractor and the sync engine.
//! Database values take priority over ENV and TOML (see `crate::config`).

use cellar_common::{Error, Result};
use sqlx::{Pool, Sqlite};

pub const VISION_API_KEY: &str = "vision_api_key";
pub const VISION_MODEL: &str = "vision_model";
pub const EMBEDDING_API_KEY: &str = "embedding_api_key";
pub const SYNC_REIMPORT_POLICY: &str = "sync_reimport_policy";

/// Get vision provider API key override
pub async fn get_vision_api_key(db: &Pool<Sqlite>) -> Result<Option<String>> {
    get_setting::<String>(db, VISION_API_KEY).await
}

/// Set vision provider API key override
pub async fn set_vision_api_key(db: &Pool<Sqlite>, key: String) -> Result<()> {
    set_setting(db, VISION_API_KEY, key).await
}

/// Get vision model name override
pub async fn get_vision_model(db: &Pool<Sqlite>) -> Result<Option<String>> {
    get_setting::<String>(db, VISION_MODEL).await
}

pub async fn set_vision_model(db: &Pool<Sqlite>, model: String) -> Result<()> {
    set_setting(db, VISION_MODEL, model).await
}

/// Get embedding provider API key override
pub async fn get_embedding_api_key(db: &Pool<Sqlite>) -> Result<Option<String>> {
    get_setting::<String>(db, EMBEDDING_API_KEY).await
}

/// Get reimport policy override (merge | hide | replace | fresh)
pub async fn get_reimport_policy(db: &Pool<Sqlite>) -> Result<Option<String>> {
    get_setting::<String>(db, SYNC_REIMPORT_POLICY).await
}

pub async fn set_reimport_policy(db: &Pool<Sqlite>, policy: String) -> Result<()> {
    set_setting(db, SYNC_REIMPORT_POLICY, policy).await
}

/// Generic setting getter (internal)
///
/// Empty values count as unset.
async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(Option<String>,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(Error::Database)?;

    match row.and_then(|(value,)| value) {
        Some(value) if !value.trim().is_empty() => {
            let parsed = value
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting '{}' failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        _ => Ok(None),
    }
}

/// Generic setting setter (internal)
async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}

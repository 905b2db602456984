//! Database initialization
//!
//! Creates every table used by the recognition, sync and outbox flows.
//! All statements are idempotent (`IF NOT EXISTS`), so startup can run them
//! against an existing database.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL allows concurrent readers with one writer
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database with the full schema
///
/// Every pooled connection to `sqlite::memory:` would be a separate empty
/// database, so the pool is pinned to one connection.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and seed default settings
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    create_settings_table(pool).await?;

    // Catalog mirrored from the external inventory system
    create_catalog_tables(pool).await?;
    create_external_objects_table(pool).await?;

    // Recognition audit trail
    create_recognition_tables(pool).await?;

    // Sync runs and the global lease
    create_sync_tables(pool).await?;

    // Counting sessions (written by the UI, read by outbox enqueue)
    create_counting_tables(pool).await?;

    // Outbox and operational logs
    create_outbox_tables(pool).await?;
    create_log_tables(pool).await?;

    init_default_settings(pool).await?;

    Ok(())
}

/// Create the settings table
///
/// Stores key-value overrides (model name, API keys, tunables).
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_catalog_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stores (
            id TEXT PRIMARY KEY,
            external_id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS measure_units (
            id TEXT PRIMARY KEY,
            external_id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            symbol TEXT,
            base_unit_id TEXT REFERENCES measure_units(id) ON DELETE SET NULL,
            conversion_factor REAL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS categories (
            id TEXT PRIMARY KEY,
            external_id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            parent_id TEXT REFERENCES categories(id) ON DELETE SET NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            external_id TEXT UNIQUE,
            name TEXT NOT NULL,
            producer TEXT,
            vintage INTEGER,
            volume_ml INTEGER,
            region TEXT,
            country TEXT,
            category_id TEXT REFERENCES categories(id) ON DELETE SET NULL,
            unit_id TEXT REFERENCES measure_units(id) ON DELETE SET NULL,
            price REAL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_products_active_name ON products(is_active, name)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS product_barcodes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            product_id TEXT NOT NULL REFERENCES products(id),
            barcode TEXT NOT NULL,
            UNIQUE(product_id, barcode)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS product_embeddings (
            product_id TEXT PRIMARY KEY REFERENCES products(id),
            embedding BLOB NOT NULL,
            dimensions INTEGER NOT NULL,
            source_hash TEXT NOT NULL,
            model TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stock_levels (
            product_id TEXT NOT NULL REFERENCES products(id),
            store_id TEXT NOT NULL REFERENCES stores(id),
            quantity REAL NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (product_id, store_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Raw external payload cache; `payload_hash` drives unchanged-record skipping
async fn create_external_objects_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS external_objects (
            object_type TEXT NOT NULL,
            external_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            payload_hash TEXT NOT NULL,
            fetched_at TEXT NOT NULL,
            PRIMARY KEY (object_type, external_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_recognition_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS recognition_attempts (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            session_id TEXT,
            model_used TEXT NOT NULL,
            prompt_version TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'processing'
                CHECK (status IN ('processing', 'success', 'manual_review', 'failed')),
            extracted_data TEXT,
            raw_response TEXT,
            matched_product_id TEXT,
            match_confidence INTEGER,
            match_method TEXT,
            tokens_used INTEGER,
            processing_time_ms INTEGER,
            error_message TEXT,
            created_at TEXT NOT NULL,
            processed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS recognition_feedback (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            attempt_id TEXT NOT NULL REFERENCES recognition_attempts(id),
            user_id TEXT NOT NULL,
            product_id TEXT,
            accepted INTEGER NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_sync_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_runs (
            id TEXT PRIMARY KEY,
            run_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'running'
                CHECK (status IN ('running', 'success', 'failed')),
            stats TEXT NOT NULL DEFAULT '{}',
            error TEXT,
            started_at TEXT NOT NULL,
            finished_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Single-row lease; holder NULL means free
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_lock (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            holder TEXT,
            acquired_at_ms INTEGER,
            expires_at_ms INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO sync_lock (id, holder) VALUES (1, NULL)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_counting_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS counting_sessions (
            id TEXT PRIMARY KEY,
            store_id TEXT REFERENCES stores(id),
            name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'open',
            created_at TEXT NOT NULL,
            approved_at TEXT,
            synced_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // expected_quantity is the baseline snapshot the count is measured against
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS count_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL REFERENCES counting_sessions(id),
            product_id TEXT NOT NULL,
            quantity REAL NOT NULL,
            expected_quantity REAL,
            counted_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_outbox_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS outbox_jobs (
            id TEXT PRIMARY KEY,
            job_type TEXT NOT NULL,
            session_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            payload_hash TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'processing', 'success', 'failed')),
            attempts INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL,
            last_error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            processed_at TEXT,
            UNIQUE (job_type, payload_hash)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_outbox_pending ON outbox_jobs(status, created_at)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_log_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS api_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            method TEXT NOT NULL,
            endpoint TEXT NOT NULL,
            reference_id TEXT,
            status_code INTEGER,
            success INTEGER NOT NULL,
            duration_ms INTEGER NOT NULL,
            error TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            action TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT,
            details TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Ensure required settings exist with default values
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    // Upper bound for retry_on_lock on audit writes
    ensure_setting(pool, "database_max_lock_wait_ms", "5000").await?;

    Ok(())
}

async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
        .bind(key)
        .bind(default_value)
        .execute(pool)
        .await?;

    // Reset NULL values to default
    sqlx::query("UPDATE settings SET value = ? WHERE key = ? AND value IS NULL")
        .bind(default_value)
        .bind(key)
        .execute(pool)
        .await?;

    Ok(())
}

//! Catalog tables: products, barcodes, embeddings, stores, units, categories
//!
//! Read side serves candidate retrieval; write side is driven by the sync
//! engine, keyed by external identifiers.

use cellar_common::db::now_timestamp;
use cellar_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::models::CatalogProduct;

const PRODUCT_COLUMNS: &str = "id, name, producer, vintage, volume_ml, region, country";

/// Snapshot of all active products, ordered by id
pub async fn load_active_products(pool: &SqlitePool) -> Result<Vec<CatalogProduct>> {
    let sql = format!(
        "SELECT {} FROM products WHERE is_active = 1 ORDER BY id",
        PRODUCT_COLUMNS
    );
    let products = sqlx::query_as::<_, CatalogProduct>(&sql)
        .fetch_all(pool)
        .await?;

    Ok(products)
}

/// Active products sharing a name (case-insensitive), newest vintage first
pub async fn find_active_variants(pool: &SqlitePool, name: &str) -> Result<Vec<CatalogProduct>> {
    let sql = format!(
        "SELECT {} FROM products
         WHERE is_active = 1 AND lower(trim(name)) = lower(trim(?))
         ORDER BY vintage IS NULL, vintage DESC, id",
        PRODUCT_COLUMNS
    );
    let variants = sqlx::query_as::<_, CatalogProduct>(&sql)
        .bind(name)
        .fetch_all(pool)
        .await?;

    Ok(variants)
}

// ============================================================================
// Embeddings
// ============================================================================

/// Stored vector of one active product
#[derive(Debug, Clone)]
pub struct StoredEmbedding {
    pub product_id: String,
    pub vector: Vec<f32>,
}

/// Vectors of all active products
pub async fn load_active_embeddings(pool: &SqlitePool) -> Result<Vec<StoredEmbedding>> {
    let rows = sqlx::query(
        r#"
        SELECT e.product_id, e.embedding
        FROM product_embeddings e
        JOIN products p ON p.id = e.product_id
        WHERE p.is_active = 1
        ORDER BY e.product_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let product_id: String = row.get("product_id");
            let blob: Vec<u8> = row.get("embedding");
            let vector = decode_vector(&blob).ok_or_else(|| {
                Error::Internal(format!("Corrupt embedding blob for product {}", product_id))
            })?;
            Ok(StoredEmbedding { product_id, vector })
        })
        .collect()
}

/// `source_hash` of every stored embedding, keyed by product id
pub async fn embedding_source_hashes(pool: &SqlitePool) -> Result<HashMap<String, String>> {
    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT product_id, source_hash FROM product_embeddings")
            .fetch_all(pool)
            .await?;

    Ok(rows.into_iter().collect())
}

pub async fn upsert_embedding(
    pool: &SqlitePool,
    product_id: &str,
    vector: &[f32],
    source_hash: &str,
    model: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO product_embeddings (product_id, embedding, dimensions, source_hash, model, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(product_id) DO UPDATE SET
            embedding = excluded.embedding,
            dimensions = excluded.dimensions,
            source_hash = excluded.source_hash,
            model = excluded.model,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(product_id)
    .bind(encode_vector(vector))
    .bind(vector.len() as i64)
    .bind(source_hash)
    .bind(model)
    .bind(now_timestamp())
    .execute(pool)
    .await?;

    Ok(())
}

/// Little-endian f32 sequence
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_vector(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

// ============================================================================
// External payload cache
// ============================================================================

/// Last stored payload hash for an external record
pub async fn external_hash(
    pool: &SqlitePool,
    object_type: &str,
    external_id: &str,
) -> Result<Option<String>> {
    let hash: Option<String> = sqlx::query_scalar(
        "SELECT payload_hash FROM external_objects WHERE object_type = ? AND external_id = ?",
    )
    .bind(object_type)
    .bind(external_id)
    .fetch_optional(pool)
    .await?;

    Ok(hash)
}

pub async fn store_external_object(
    pool: &SqlitePool,
    object_type: &str,
    external_id: &str,
    payload: &serde_json::Value,
    payload_hash: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO external_objects (object_type, external_id, payload, payload_hash, fetched_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(object_type, external_id) DO UPDATE SET
            payload = excluded.payload,
            payload_hash = excluded.payload_hash,
            fetched_at = excluded.fetched_at
        "#,
    )
    .bind(object_type)
    .bind(external_id)
    .bind(payload.to_string())
    .bind(payload_hash)
    .bind(now_timestamp())
    .execute(pool)
    .await?;

    Ok(())
}

// ============================================================================
// Identifier maps (external id -> local id)
// ============================================================================

async fn id_map(pool: &SqlitePool, sql: &'static str) -> Result<HashMap<String, String>> {
    let rows: Vec<(String, String)> = sqlx::query_as(sql).fetch_all(pool).await?;
    Ok(rows.into_iter().collect())
}

pub async fn store_ids(pool: &SqlitePool) -> Result<HashMap<String, String>> {
    id_map(pool, "SELECT external_id, id FROM stores").await
}

pub async fn unit_ids(pool: &SqlitePool) -> Result<HashMap<String, String>> {
    id_map(pool, "SELECT external_id, id FROM measure_units").await
}

pub async fn category_ids(pool: &SqlitePool) -> Result<HashMap<String, String>> {
    id_map(pool, "SELECT external_id, id FROM categories").await
}

pub async fn product_ids(pool: &SqlitePool) -> Result<HashMap<String, String>> {
    id_map(
        pool,
        "SELECT external_id, id FROM products WHERE external_id IS NOT NULL",
    )
    .await
}

// ============================================================================
// Upserts
// ============================================================================

pub async fn upsert_store(
    pool: &SqlitePool,
    external_id: &str,
    name: &str,
    is_active: bool,
) -> Result<String> {
    let now = now_timestamp();
    let id: String = sqlx::query_scalar(
        r#"
        INSERT INTO stores (id, external_id, name, is_active, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(external_id) DO UPDATE SET
            name = excluded.name,
            is_active = excluded.is_active,
            updated_at = excluded.updated_at
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(external_id)
    .bind(name)
    .bind(is_active)
    .bind(&now)
    .bind(&now)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// First pass of unit sync; `base_unit_id` is linked afterwards
pub async fn upsert_unit(
    pool: &SqlitePool,
    external_id: &str,
    name: &str,
    symbol: Option<&str>,
    conversion_factor: Option<f64>,
) -> Result<String> {
    let now = now_timestamp();
    let id: String = sqlx::query_scalar(
        r#"
        INSERT INTO measure_units (id, external_id, name, symbol, conversion_factor, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(external_id) DO UPDATE SET
            name = excluded.name,
            symbol = excluded.symbol,
            conversion_factor = excluded.conversion_factor,
            updated_at = excluded.updated_at
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(external_id)
    .bind(name)
    .bind(symbol)
    .bind(conversion_factor)
    .bind(&now)
    .bind(&now)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// Second pass: link a unit to its base unit (None clears the link)
pub async fn link_unit_base(pool: &SqlitePool, unit_id: &str, base_id: Option<&str>) -> Result<()> {
    sqlx::query("UPDATE measure_units SET base_unit_id = ? WHERE id = ? AND base_unit_id IS NOT ?")
        .bind(base_id)
        .bind(unit_id)
        .bind(base_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// First pass of category sync; `parent_id` is linked afterwards
pub async fn upsert_category(
    pool: &SqlitePool,
    external_id: &str,
    name: &str,
    is_active: bool,
) -> Result<String> {
    let now = now_timestamp();
    let id: String = sqlx::query_scalar(
        r#"
        INSERT INTO categories (id, external_id, name, is_active, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(external_id) DO UPDATE SET
            name = excluded.name,
            is_active = excluded.is_active,
            updated_at = excluded.updated_at
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(external_id)
    .bind(name)
    .bind(is_active)
    .bind(&now)
    .bind(&now)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// Second pass: link a category to its parent (None clears the link)
pub async fn link_category_parent(
    pool: &SqlitePool,
    category_id: &str,
    parent_id: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE categories SET parent_id = ? WHERE id = ? AND parent_id IS NOT ?")
        .bind(parent_id)
        .bind(category_id)
        .bind(parent_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Product fields written by sync, references already resolved to local ids
#[derive(Debug, Clone, Default)]
pub struct ProductUpsert {
    pub external_id: String,
    pub name: String,
    pub producer: Option<String>,
    pub vintage: Option<i32>,
    pub volume_ml: Option<i32>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub category_id: Option<String>,
    pub unit_id: Option<String>,
    pub is_active: bool,
}

pub async fn upsert_product(pool: &SqlitePool, product: &ProductUpsert) -> Result<String> {
    let now = now_timestamp();
    let id: String = sqlx::query_scalar(
        r#"
        INSERT INTO products (
            id, external_id, name, producer, vintage, volume_ml, region, country,
            category_id, unit_id, is_active, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(external_id) DO UPDATE SET
            name = excluded.name,
            producer = excluded.producer,
            vintage = excluded.vintage,
            volume_ml = excluded.volume_ml,
            region = excluded.region,
            country = excluded.country,
            category_id = excluded.category_id,
            unit_id = excluded.unit_id,
            is_active = excluded.is_active,
            updated_at = excluded.updated_at
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&product.external_id)
    .bind(&product.name)
    .bind(&product.producer)
    .bind(product.vintage)
    .bind(product.volume_ml)
    .bind(&product.region)
    .bind(&product.country)
    .bind(&product.category_id)
    .bind(&product.unit_id)
    .bind(product.is_active)
    .bind(&now)
    .bind(&now)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// Make the product's barcode set equal to `barcodes`; returns the set size
pub async fn replace_barcodes(pool: &SqlitePool, product_id: &str, barcodes: &[String]) -> Result<u64> {
    let wanted: HashSet<&str> = barcodes
        .iter()
        .map(|b| b.trim())
        .filter(|b| !b.is_empty())
        .collect();

    let mut tx = pool.begin().await?;

    let existing: Vec<String> =
        sqlx::query_scalar("SELECT barcode FROM product_barcodes WHERE product_id = ?")
            .bind(product_id)
            .fetch_all(&mut *tx)
            .await?;

    for stale in existing.iter().filter(|b| !wanted.contains(b.as_str())) {
        sqlx::query("DELETE FROM product_barcodes WHERE product_id = ? AND barcode = ?")
            .bind(product_id)
            .bind(stale)
            .execute(&mut *tx)
            .await?;
    }

    for barcode in &wanted {
        sqlx::query("INSERT OR IGNORE INTO product_barcodes (product_id, barcode) VALUES (?, ?)")
            .bind(product_id)
            .bind(*barcode)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    Ok(wanted.len() as u64)
}

/// Returns false when the price was already current
pub async fn update_price(pool: &SqlitePool, product_id: &str, price: f64) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE products SET price = ?, updated_at = ? WHERE id = ? AND price IS NOT ?",
    )
    .bind(price)
    .bind(now_timestamp())
    .bind(product_id)
    .bind(price)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn upsert_stock(
    pool: &SqlitePool,
    product_id: &str,
    store_id: &str,
    quantity: f64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO stock_levels (product_id, store_id, quantity, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(product_id, store_id) DO UPDATE SET
            quantity = excluded.quantity,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(product_id)
    .bind(store_id)
    .bind(quantity)
    .bind(now_timestamp())
    .execute(pool)
    .await?;

    Ok(())
}

// ============================================================================
// Reimport policies and wipes
// ============================================================================

/// Local products (with an external id) that are not in `imported`
async fn missing_products(
    pool: &SqlitePool,
    imported: &HashSet<String>,
    active_only: bool,
) -> Result<Vec<(String, String)>> {
    let sql = if active_only {
        "SELECT id, external_id FROM products WHERE external_id IS NOT NULL AND is_active = 1"
    } else {
        "SELECT id, external_id FROM products WHERE external_id IS NOT NULL"
    };
    let rows: Vec<(String, String)> = sqlx::query_as(sql).fetch_all(pool).await?;

    Ok(rows
        .into_iter()
        .filter(|(_, external_id)| !imported.contains(external_id))
        .collect())
}

/// Soft-deactivate products absent from the import
///
/// Their cached payload hash is dropped so a later reappearance is re-imported
/// (and reactivated) instead of being skipped as unchanged.
pub async fn deactivate_products_not_in(pool: &SqlitePool, imported: &HashSet<String>) -> Result<u64> {
    let missing = missing_products(pool, imported, true).await?;
    let now = now_timestamp();

    let mut tx = pool.begin().await?;
    for (id, external_id) in &missing {
        sqlx::query("UPDATE products SET is_active = 0, updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM external_objects WHERE object_type = 'product' AND external_id = ?")
            .bind(external_id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    Ok(missing.len() as u64)
}

/// Hard-delete products absent from the import, children first
pub async fn delete_products_not_in(pool: &SqlitePool, imported: &HashSet<String>) -> Result<u64> {
    let missing = missing_products(pool, imported, false).await?;

    let mut tx = pool.begin().await?;
    for (id, external_id) in &missing {
        for sql in [
            "DELETE FROM stock_levels WHERE product_id = ?",
            "DELETE FROM product_barcodes WHERE product_id = ?",
            "DELETE FROM product_embeddings WHERE product_id = ?",
            "DELETE FROM products WHERE id = ?",
        ] {
            sqlx::query(sql).bind(id).execute(&mut *tx).await?;
        }
        sqlx::query(
            "DELETE FROM external_objects WHERE object_type IN ('product', 'price') AND external_id = ?",
        )
        .bind(external_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM external_objects WHERE object_type = 'stock' AND external_id LIKE ?")
            .bind(format!("{}:%", external_id))
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    Ok(missing.len() as u64)
}

/// Wipe product-dependent tables and the payload cache, children before parents
pub async fn wipe_product_data(pool: &SqlitePool) -> Result<()> {
    let mut tx = pool.begin().await?;
    for table in [
        "stock_levels",
        "product_barcodes",
        "product_embeddings",
        "products",
        "external_objects",
    ] {
        sqlx::query(&format!("DELETE FROM {}", table))
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    Ok(())
}

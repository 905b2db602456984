//! Catalog embedding backfill
//!
//! Keeps `product_embeddings` in step with the catalog. A product is
//! (re)embedded when it has no vector yet or when the hash of its search text
//! and the model name no longer matches the stored `source_hash`.

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use cellar_common::hash::sha256_hex;
use cellar_common::Result;

use crate::db::catalog;
use crate::services::embedding_client::EmbeddingProvider;

/// Counters of one refresh pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EmbeddingRefresh {
    pub embedded: u64,
    pub unchanged: u64,
    pub failed: u64,
}

/// Hash identifying what a stored vector was computed from
pub fn source_hash(search_text: &str, model: &str) -> String {
    sha256_hex(format!("{}\n{}", model, search_text).as_bytes())
}

/// Embed every active product whose vector is missing or stale
///
/// Provider failures are counted per product; database failures abort.
pub async fn refresh_embeddings(
    pool: &SqlitePool,
    provider: &dyn EmbeddingProvider,
) -> Result<EmbeddingRefresh> {
    let products = catalog::load_active_products(pool).await?;
    let stored = catalog::embedding_source_hashes(pool).await?;
    let mut refresh = EmbeddingRefresh::default();

    for product in &products {
        let text = product.search_text();
        let hash = source_hash(&text, provider.model());

        if stored.get(&product.id) == Some(&hash) {
            refresh.unchanged += 1;
            continue;
        }

        match provider.embed(&text).await {
            Ok(vector) => {
                catalog::upsert_embedding(pool, &product.id, &vector, &hash, provider.model()).await?;
                debug!(product_id = %product.id, dimensions = vector.len(), "Product embedded");
                refresh.embedded += 1;
            }
            Err(e) => {
                warn!(product_id = %product.id, "Embedding failed: {}", e);
                refresh.failed += 1;
            }
        }
    }

    info!(
        embedded = refresh.embedded,
        unchanged = refresh.unchanged,
        failed = refresh.failed,
        "Catalog embedding refresh finished"
    );
    Ok(refresh)
}

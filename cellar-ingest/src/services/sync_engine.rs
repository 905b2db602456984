//! Sync reconciliation engine
//!
//! Pulls full listings from the inventory system and reconciles them into the
//! local catalog. Every record's payload hash is compared with the cached one
//! so unchanged records are skipped without a write. Parent references
//! (unit base units, category parents) are resolved in a second pass against
//! the complete local id map, so listing order never matters.
//!
//! One run at a time system-wide, guarded by the `sync_lock` lease.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use cellar_common::config::TomlConfig;
use cellar_common::content_hash;
use cellar_common::events::{CellarEvent, EventBus};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::resolve_reimport_policy;
use crate::db::catalog::{self, ProductUpsert};
use crate::db::{logs, sync_lock, sync_runs};
use crate::models::{
    ExternalCategory, ExternalPrice, ExternalProduct, ExternalStock, ExternalStore, ExternalUnit,
    ReimportPolicy, SyncRun, SyncRunType, SyncStage, SyncStats,
};
use crate::services::inventory_client::{EntityKind, InventoryError, InventorySession, InventorySystem};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("A sync run is already in progress (held by {})", holder.as_deref().unwrap_or("unknown"))]
    InProgress { holder: Option<String> },

    #[error("Inventory system error: {0}")]
    External(#[from] InventoryError),

    #[error(transparent)]
    Common(#[from] cellar_common::Error),
}

/// Listing fetched for a stage
pub fn entity_kind(stage: SyncStage) -> EntityKind {
    match stage {
        SyncStage::Stores => EntityKind::Stores,
        SyncStage::Units => EntityKind::Units,
        SyncStage::Categories => EntityKind::Categories,
        SyncStage::Products => EntityKind::Products,
        SyncStage::Prices => EntityKind::Prices,
        SyncStage::Stock => EntityKind::Stock,
    }
}

/// Best-effort `id` of a raw record that failed to decode
fn raw_id(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Resolve an optional external reference through `ids`
///
/// Unresolvable and self references come back as `None` with `orphan` set.
fn resolve_reference(
    reference: Option<&str>,
    own_key: &str,
    ids: &HashMap<String, String>,
) -> (Option<String>, bool) {
    match reference {
        None => (None, false),
        Some(key) if key == own_key => (None, true),
        Some(key) => match ids.get(key) {
            Some(local_id) => (Some(local_id.clone()), false),
            None => (None, true),
        },
    }
}

/// A decoded listing record plus its change-detection state
struct Decoded<T> {
    record: T,
    key: String,
    hash: String,
    unchanged: bool,
}

/// External catalog synchronization
#[derive(Clone)]
pub struct SyncEngine {
    db: SqlitePool,
    inventory: Arc<dyn InventorySystem>,
    config: Arc<TomlConfig>,
    event_bus: EventBus,
}

impl SyncEngine {
    pub fn new(
        db: SqlitePool,
        inventory: Arc<dyn InventorySystem>,
        config: Arc<TomlConfig>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            db,
            inventory,
            config,
            event_bus,
        }
    }

    /// Execute one sync run to completion
    ///
    /// Returns the finalized run, failed or not. `Err` only when the run could
    /// not start (lease held elsewhere) or its bookkeeping could not be written.
    pub async fn run(&self, run_type: SyncRunType) -> Result<SyncRun, SyncError> {
        let policy = resolve_reimport_policy(&self.db, &self.config).await?;
        let run_id = Uuid::new_v4();
        let holder = run_id.to_string();

        if !sync_lock::try_acquire(&self.db, &holder, self.config.sync.lock_ttl_secs).await? {
            let holder = sync_lock::current_holder(&self.db).await?;
            info!(
                run_type = run_type.as_str(),
                holder = holder.as_deref().unwrap_or("unknown"),
                "Sync rejected, another run holds the lease"
            );
            return Err(SyncError::InProgress { holder });
        }

        let outcome = self.run_locked(run_id, run_type, policy).await;

        match sync_lock::release(&self.db, &holder).await {
            Ok(true) => debug!(sync_run_id = %run_id, "Sync lease released"),
            Ok(false) => warn!(sync_run_id = %run_id, "Sync lease expired before release"),
            Err(e) => error!(sync_run_id = %run_id, "Failed to release sync lease: {}", e),
        }

        outcome
    }

    async fn run_locked(
        &self,
        run_id: Uuid,
        run_type: SyncRunType,
        policy: ReimportPolicy,
    ) -> Result<SyncRun, SyncError> {
        let mut run = SyncRun::start(run_id, run_type);
        sync_runs::insert_run(&self.db, &run).await?;
        self.audit(
            "sync_started",
            run.id,
            json!({ "run_type": run_type.as_str(), "policy": format!("{:?}", policy).to_lowercase() }),
        )
        .await;
        info!(sync_run_id = %run.id, run_type = run_type.as_str(), ?policy, "Sync run started");

        let result = match self.inventory.open_session().await {
            Ok(session) => {
                let result = self.execute(&mut run, &session, policy).await;
                if let Err(e) = self.inventory.close_session(&session).await {
                    warn!(sync_run_id = %run.id, "Failed to close inventory session: {}", e);
                }
                result
            }
            Err(e) => Err(SyncError::External(e)),
        };

        let stage = run.stats.stage.clone().unwrap_or_else(|| "session".to_string());
        match result {
            Ok(()) => {
                run.succeed();
                sync_runs::finish_run(&self.db, &run).await?;
                self.audit("sync_completed", run.id, json!(run.stats)).await;
                info!(sync_run_id = %run.id, stats = ?run.stats, "Sync run completed");
                self.event_bus.emit_lossy(CellarEvent::SyncCompleted {
                    sync_run_id: run.id,
                    run_type: run_type.as_str().to_string(),
                    timestamp: Utc::now(),
                });
            }
            Err(err) => {
                let message = err.to_string();
                error!(sync_run_id = %run.id, stage = %stage, "Sync run failed: {}", message);
                run.fail(message.clone());
                sync_runs::finish_run(&self.db, &run).await?;
                self.audit(
                    "sync_failed",
                    run.id,
                    json!({ "stage": stage, "error": message }),
                )
                .await;
                self.event_bus.emit_lossy(CellarEvent::SyncFailed {
                    sync_run_id: run.id,
                    stage,
                    error: message,
                    timestamp: Utc::now(),
                });
            }
        }

        Ok(run)
    }

    async fn execute(
        &self,
        run: &mut SyncRun,
        session: &InventorySession,
        policy: ReimportPolicy,
    ) -> Result<(), SyncError> {
        let wipe = run.run_type == SyncRunType::CleanImport
            || (policy == ReimportPolicy::Fresh && run.run_type.includes_products());
        if wipe {
            catalog::wipe_product_data(&self.db).await?;
            self.audit("catalog_wiped", run.id, json!({ "run_type": run.run_type.as_str() }))
                .await;
            info!(sync_run_id = %run.id, "Product data wiped before import");
        }

        let stages = run.run_type.stages();
        for (index, stage) in stages.iter().enumerate() {
            let progress = (index * 100 / stages.len()) as u8;
            run.enter_stage(stage.as_str(), progress);
            sync_runs::update_stats(&self.db, run.id, &run.stats).await?;
            self.event_bus.emit_lossy(CellarEvent::SyncProgress {
                sync_run_id: run.id,
                stage: stage.as_str().to_string(),
                progress,
                timestamp: Utc::now(),
            });

            let records = self.inventory.fetch(session, entity_kind(*stage)).await?;
            debug!(sync_run_id = %run.id, stage = stage.as_str(), count = records.len(), "Listing fetched");

            match stage {
                SyncStage::Stores => self.sync_stores(&records, &mut run.stats).await?,
                SyncStage::Units => self.sync_units(&records, &mut run.stats).await?,
                SyncStage::Categories => self.sync_categories(&records, &mut run.stats).await?,
                SyncStage::Products => {
                    let imported = self.sync_products(&records, &mut run.stats).await?;
                    self.apply_reimport_policy(run.id, policy, &imported, &mut run.stats)
                        .await?;
                }
                SyncStage::Prices => self.sync_prices(&records, &mut run.stats).await?,
                SyncStage::Stock => self.sync_stock(&records, &mut run.stats).await?,
            }

            sync_runs::update_stats(&self.db, run.id, &run.stats).await?;
        }

        Ok(())
    }

    /// Decode one listing record and compare its hash with the cached payload
    ///
    /// Undecodable records are counted as errors and yield `None`.
    async fn decode<T, F>(
        &self,
        kind: EntityKind,
        value: &Value,
        key_of: F,
        stats: &mut SyncStats,
    ) -> Result<Option<Decoded<T>>, SyncError>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> String,
    {
        let record: T = match serde_json::from_value(value.clone()) {
            Ok(record) => record,
            Err(e) => {
                stats.errors += 1;
                warn!(
                    object_type = kind.object_type(),
                    external_id = ?raw_id(value),
                    "Skipping malformed record: {}", e
                );
                return Ok(None);
            }
        };

        let key = key_of(&record);
        let hash = content_hash(value)?;
        let cached = catalog::external_hash(&self.db, kind.object_type(), &key).await?;

        Ok(Some(Decoded {
            unchanged: cached.as_deref() == Some(hash.as_str()),
            record,
            key,
            hash,
        }))
    }

    async fn remember(&self, kind: EntityKind, key: &str, value: &Value, hash: &str) -> Result<(), SyncError> {
        catalog::store_external_object(&self.db, kind.object_type(), key, value, hash).await?;
        Ok(())
    }

    async fn sync_stores(&self, records: &[Value], stats: &mut SyncStats) -> Result<(), SyncError> {
        let kind = EntityKind::Stores;
        let mut ids = catalog::store_ids(&self.db).await?;

        for value in records {
            let Some(d) = self
                .decode::<ExternalStore, _>(kind, value, |s| s.id.to_string(), stats)
                .await?
            else {
                continue;
            };

            if d.unchanged && ids.contains_key(&d.key) {
                stats.skipped += 1;
                continue;
            }

            let id = catalog::upsert_store(&self.db, &d.key, d.record.name.trim(), d.record.is_active)
                .await?;
            self.remember(kind, &d.key, value, &d.hash).await?;
            ids.insert(d.key, id);
            stats.stores += 1;
        }

        Ok(())
    }

    async fn sync_units(&self, records: &[Value], stats: &mut SyncStats) -> Result<(), SyncError> {
        let kind = EntityKind::Units;
        let mut ids = catalog::unit_ids(&self.db).await?;
        let mut links: Vec<(String, Option<String>)> = Vec::with_capacity(records.len());

        for value in records {
            let Some(d) = self
                .decode::<ExternalUnit, _>(kind, value, |u| u.id.to_string(), stats)
                .await?
            else {
                continue;
            };
            links.push((d.key.clone(), d.record.base_unit_id.as_ref().map(|b| b.to_string())));

            if d.unchanged && ids.contains_key(&d.key) {
                stats.skipped += 1;
                continue;
            }

            let id = catalog::upsert_unit(
                &self.db,
                &d.key,
                d.record.name.trim(),
                d.record.symbol.as_deref(),
                d.record.conversion_factor,
            )
            .await?;
            self.remember(kind, &d.key, value, &d.hash).await?;
            ids.insert(d.key, id);
            stats.units += 1;
        }

        let mut orphans = 0u64;
        for (key, base) in &links {
            let Some(unit_id) = ids.get(key) else { continue };
            let (base_id, orphan) = resolve_reference(base.as_deref(), key, &ids);
            if orphan {
                orphans += 1;
                warn!(external_id = %key, base_unit = ?base, "Unit base reference unresolved, cleared");
            }
            catalog::link_unit_base(&self.db, unit_id, base_id.as_deref()).await?;
        }

        if orphans > 0 {
            warn!(orphans, "Units with unresolved base unit");
        }
        stats.orphans += orphans;
        Ok(())
    }

    async fn sync_categories(&self, records: &[Value], stats: &mut SyncStats) -> Result<(), SyncError> {
        let kind = EntityKind::Categories;
        let mut ids = catalog::category_ids(&self.db).await?;
        let mut links: Vec<(String, Option<String>)> = Vec::with_capacity(records.len());

        for value in records {
            let Some(d) = self
                .decode::<ExternalCategory, _>(kind, value, |c| c.id.to_string(), stats)
                .await?
            else {
                continue;
            };
            links.push((d.key.clone(), d.record.parent_id.as_ref().map(|p| p.to_string())));

            if d.unchanged && ids.contains_key(&d.key) {
                stats.skipped += 1;
                continue;
            }

            let id =
                catalog::upsert_category(&self.db, &d.key, d.record.name.trim(), d.record.is_active)
                    .await?;
            self.remember(kind, &d.key, value, &d.hash).await?;
            ids.insert(d.key, id);
            stats.categories += 1;
        }

        let mut orphans = 0u64;
        for (key, parent) in &links {
            let Some(category_id) = ids.get(key) else { continue };
            let (parent_id, orphan) = resolve_reference(parent.as_deref(), key, &ids);
            if orphan {
                orphans += 1;
                warn!(external_id = %key, parent = ?parent, "Category parent unresolved, cleared");
            }
            catalog::link_category_parent(&self.db, category_id, parent_id.as_deref()).await?;
        }

        if orphans > 0 {
            warn!(orphans, "Categories with unresolved parent");
        }
        stats.orphans += orphans;
        Ok(())
    }

    /// Returns the external ids present in the listing
    async fn sync_products(
        &self,
        records: &[Value],
        stats: &mut SyncStats,
    ) -> Result<HashSet<String>, SyncError> {
        let kind = EntityKind::Products;
        let mut ids = catalog::product_ids(&self.db).await?;
        let categories = catalog::category_ids(&self.db).await?;
        let units = catalog::unit_ids(&self.db).await?;
        let mut imported = HashSet::with_capacity(records.len());

        for value in records {
            let Some(d) = self
                .decode::<ExternalProduct, _>(kind, value, |p| p.id.to_string(), stats)
                .await?
            else {
                // A record we cannot read is still present upstream
                if let Some(id) = raw_id(value) {
                    imported.insert(id);
                }
                continue;
            };
            imported.insert(d.key.clone());

            if d.unchanged && ids.contains_key(&d.key) {
                stats.skipped += 1;
                continue;
            }

            let product = d.record;
            let category_ref = product.category_id.as_ref().map(|c| c.to_string());
            let unit_ref = product.unit_id.as_ref().map(|u| u.to_string());
            let (category_id, category_orphan) =
                resolve_reference(category_ref.as_deref(), "", &categories);
            let (unit_id, unit_orphan) = resolve_reference(unit_ref.as_deref(), "", &units);
            if category_orphan || unit_orphan {
                stats.orphans += 1;
                warn!(
                    external_id = %d.key,
                    category = ?category_ref,
                    unit = ?unit_ref,
                    "Product reference unresolved, cleared"
                );
            }

            let id = catalog::upsert_product(
                &self.db,
                &ProductUpsert {
                    external_id: d.key.clone(),
                    name: product.name.trim().to_string(),
                    producer: product.producer,
                    vintage: product.vintage,
                    volume_ml: product.volume_ml,
                    region: product.region,
                    country: product.country,
                    category_id,
                    unit_id,
                    is_active: product.is_active,
                },
            )
            .await?;
            stats.barcodes += catalog::replace_barcodes(&self.db, &id, &product.barcodes).await?;
            self.remember(kind, &d.key, value, &d.hash).await?;
            ids.insert(d.key, id);
            stats.products += 1;
        }

        Ok(imported)
    }

    async fn apply_reimport_policy(
        &self,
        run_id: Uuid,
        policy: ReimportPolicy,
        imported: &HashSet<String>,
        stats: &mut SyncStats,
    ) -> Result<(), SyncError> {
        if imported.is_empty() {
            warn!(sync_run_id = %run_id, "Product listing was empty, reimport policy not applied");
            return Ok(());
        }

        match policy {
            ReimportPolicy::Merge | ReimportPolicy::Hide => {
                let count = catalog::deactivate_products_not_in(&self.db, imported).await?;
                stats.deactivated += count;
                if count > 0 {
                    info!(sync_run_id = %run_id, count, "Products missing upstream deactivated");
                    self.audit("products_deactivated", run_id, json!({ "count": count }))
                        .await;
                }
            }
            ReimportPolicy::Replace => {
                let count = catalog::delete_products_not_in(&self.db, imported).await?;
                stats.deleted += count;
                if count > 0 {
                    info!(sync_run_id = %run_id, count, "Products missing upstream deleted");
                    self.audit("products_deleted", run_id, json!({ "count": count })).await;
                }
            }
            // Already wiped before the import
            ReimportPolicy::Fresh => {}
        }

        Ok(())
    }

    async fn sync_prices(&self, records: &[Value], stats: &mut SyncStats) -> Result<(), SyncError> {
        let kind = EntityKind::Prices;
        let products = catalog::product_ids(&self.db).await?;

        for value in records {
            let Some(d) = self
                .decode::<ExternalPrice, _>(kind, value, |p| p.product_id.to_string(), stats)
                .await?
            else {
                continue;
            };

            if d.unchanged {
                stats.skipped += 1;
                continue;
            }

            let Some(product_id) = products.get(&d.key) else {
                stats.orphans += 1;
                debug!(product = %d.key, "Price for unknown product ignored");
                continue;
            };

            if catalog::update_price(&self.db, product_id, d.record.price).await? {
                stats.prices_updated += 1;
            } else {
                stats.skipped += 1;
            }
            self.remember(kind, &d.key, value, &d.hash).await?;
        }

        Ok(())
    }

    async fn sync_stock(&self, records: &[Value], stats: &mut SyncStats) -> Result<(), SyncError> {
        let kind = EntityKind::Stock;
        let products = catalog::product_ids(&self.db).await?;
        let stores = catalog::store_ids(&self.db).await?;

        for value in records {
            let Some(d) = self
                .decode::<ExternalStock, _>(kind, value, ExternalStock::cache_key, stats)
                .await?
            else {
                continue;
            };

            if d.unchanged {
                stats.skipped += 1;
                continue;
            }

            let product_id = products.get(d.record.product_id.as_str());
            let store_id = stores.get(d.record.store_id.as_str());
            let (Some(product_id), Some(store_id)) = (product_id, store_id) else {
                stats.orphans += 1;
                debug!(key = %d.key, "Stock row for unknown product or store ignored");
                continue;
            };

            catalog::upsert_stock(&self.db, product_id, store_id, d.record.quantity).await?;
            self.remember(kind, &d.key, value, &d.hash).await?;
            stats.stock_updated += 1;
        }

        Ok(())
    }

    async fn audit(&self, action: &str, run_id: Uuid, details: Value) {
        let run_id = run_id.to_string();
        if let Err(e) = logs::audit(&self.db, action, "sync_run", Some(&run_id), details).await {
            warn!(sync_run_id = %run_id, action, "Audit write failed: {}", e);
        }
    }
}

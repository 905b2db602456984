//! External catalog synchronization tests

mod helpers;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::{json, Value};

use cellar_common::config::TomlConfig;
use cellar_common::events::EventBus;
use cellar_ingest::build_router;
use cellar_ingest::db::{sync_lock, sync_runs};
use cellar_ingest::models::{SyncRunType, SyncStatus};
use cellar_ingest::services::{EntityKind, SyncEngine, SyncError};
use helpers::*;

fn engine_with(db: &sqlx::SqlitePool, inventory: &Arc<FakeInventory>, config: TomlConfig) -> SyncEngine {
    SyncEngine::new(db.clone(), inventory.clone(), Arc::new(config), EventBus::new(64))
}

fn engine(db: &sqlx::SqlitePool, inventory: &Arc<FakeInventory>) -> SyncEngine {
    engine_with(db, inventory, test_config())
}

fn config_with_policy(policy: &str) -> TomlConfig {
    let mut config = test_config();
    config.sync.reimport_policy = policy.to_string();
    config
}

fn product_record(id: &str, name: &str, category: Value) -> Value {
    json!({
        "id": id,
        "name": name,
        "producer": "Quinta do Crasto",
        "vintage": 2019,
        "volume_ml": 750,
        "region": "Douro",
        "country": "Portugal",
        "category_id": category,
        "unit_id": 1,
        "barcodes": [format!("560{}", id), format!("561{}", id)],
    })
}

/// Children listed before parents, plus one dangling reference per stage
fn upstream_catalog() -> Arc<FakeInventory> {
    let inventory = FakeInventory::new();
    inventory.set_listing(EntityKind::Stores, vec![json!({ "id": 1, "name": "Lisbon Cellar" })]);
    inventory.set_listing(
        EntityKind::Units,
        vec![
            json!({ "id": 2, "name": "Case of 6", "symbol": "cs", "conversion_factor": 6.0, "base_unit_id": 1 }),
            json!({ "id": 1, "name": "Bottle", "symbol": "btl" }),
        ],
    );
    inventory.set_listing(
        EntityKind::Categories,
        vec![
            json!({ "id": 20, "name": "Douro Reds", "parent_id": 10 }),
            json!({ "id": 10, "name": "Red Wine", "parent_id": null }),
            json!({ "id": 30, "name": "Lost", "parent_id": 99 }),
        ],
    );
    inventory.set_listing(
        EntityKind::Products,
        vec![
            product_record("1001", "Quinta do Crasto Reserva", json!(20)),
            product_record("1002", "Crasto Superior", json!(77)),
        ],
    );
    inventory.set_listing(
        EntityKind::Prices,
        vec![
            json!({ "product_id": "1001", "price": 24.9 }),
            json!({ "product_id": "5555", "price": 9.5 }),
        ],
    );
    inventory.set_listing(
        EntityKind::Stock,
        vec![
            json!({ "product_id": "1001", "store_id": "1", "quantity": 12.0 }),
            json!({ "product_id": "1001", "store_id": "9", "quantity": 3.0 }),
        ],
    );
    inventory
}

#[tokio::test]
async fn test_bootstrap_links_references_regardless_of_order() {
    let db = memory_db().await;
    let inventory = upstream_catalog();

    let run = engine(&db, &inventory).run(SyncRunType::Bootstrap).await.unwrap();

    assert_eq!(run.status, SyncStatus::Success);
    assert_eq!(run.stats.stores, 1);
    assert_eq!(run.stats.units, 2);
    assert_eq!(run.stats.categories, 3);
    assert_eq!(run.stats.products, 2);
    assert_eq!(run.stats.barcodes, 4);
    assert_eq!(run.stats.prices_updated, 1);
    assert_eq!(run.stats.stock_updated, 1);
    // category 30 parent, product 1002 category, price 5555, stock store 9
    assert_eq!(run.stats.orphans, 4);
    assert_eq!(run.stats.errors, 0);
    assert_eq!(run.stats.progress, 100);

    assert_eq!(
        count_rows(
            &db,
            "SELECT COUNT(*) FROM categories c JOIN categories p ON c.parent_id = p.id
             WHERE c.external_id = '20' AND p.external_id = '10'"
        )
        .await,
        1
    );
    assert_eq!(
        count_rows(
            &db,
            "SELECT COUNT(*) FROM measure_units u JOIN measure_units b ON u.base_unit_id = b.id
             WHERE u.external_id = '2' AND b.external_id = '1'"
        )
        .await,
        1
    );
    assert_eq!(
        count_rows(
            &db,
            "SELECT COUNT(*) FROM categories WHERE external_id = '30' AND parent_id IS NULL"
        )
        .await,
        1
    );
    assert_eq!(
        count_rows(
            &db,
            "SELECT COUNT(*) FROM products WHERE external_id = '1002' AND category_id IS NULL"
        )
        .await,
        1
    );
    assert_eq!(
        count_rows(&db, "SELECT COUNT(*) FROM products WHERE price = 24.9").await,
        1
    );
    assert_eq!(count_rows(&db, "SELECT COUNT(*) FROM stock_levels").await, 1);

    let stored = sync_runs::get_run(&db, run.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SyncStatus::Success);
    assert_eq!(stored.stats, run.stats);
    assert!(stored.finished_at.is_some());

    assert_eq!(inventory.opened.load(Ordering::SeqCst), 1);
    assert_eq!(inventory.closed.load(Ordering::SeqCst), 1);
    assert_eq!(sync_lock::current_holder(&db).await.unwrap(), None);
}

#[tokio::test]
async fn test_second_run_skips_unchanged_records() {
    let db = memory_db().await;
    let inventory = upstream_catalog();
    let engine = engine(&db, &inventory);

    engine.run(SyncRunType::Bootstrap).await.unwrap();
    let products_before = count_rows(&db, "SELECT COUNT(*) FROM products").await;
    let rerun = engine.run(SyncRunType::Bootstrap).await.unwrap();

    assert_eq!(rerun.status, SyncStatus::Success);
    assert_eq!(rerun.stats.stores, 0);
    assert_eq!(rerun.stats.units, 0);
    assert_eq!(rerun.stats.categories, 0);
    assert_eq!(rerun.stats.products, 0);
    assert_eq!(rerun.stats.prices_updated, 0);
    assert_eq!(rerun.stats.stock_updated, 0);
    // 1 store + 2 units + 3 categories + 2 products + 1 price + 1 stock row
    assert_eq!(rerun.stats.skipped, 10);
    // Dangling references are reported on every run
    assert_eq!(rerun.stats.orphans, 3);
    assert_eq!(rerun.stats.deactivated, 0);
    assert_eq!(count_rows(&db, "SELECT COUNT(*) FROM products").await, products_before);
}

#[tokio::test]
async fn test_changed_record_is_reapplied() {
    let db = memory_db().await;
    let inventory = upstream_catalog();
    let engine = engine(&db, &inventory);
    engine.run(SyncRunType::Bootstrap).await.unwrap();

    inventory.set_listing(
        EntityKind::Prices,
        vec![json!({ "product_id": "1001", "price": 27.5 })],
    );
    let run = engine.run(SyncRunType::PricesStock).await.unwrap();

    assert_eq!(run.stats.prices_updated, 1);
    assert_eq!(
        count_rows(&db, "SELECT COUNT(*) FROM products WHERE price = 27.5").await,
        1
    );
}

#[tokio::test]
async fn test_malformed_records_are_counted_and_skipped() {
    let db = memory_db().await;
    let inventory = FakeInventory::new();
    inventory.set_listing(
        EntityKind::Products,
        vec![
            product_record("1001", "Quinta do Crasto Reserva", Value::Null),
            json!({ "id": "1003", "vintage": "not a year" }),
            json!({ "name": "No id at all" }),
        ],
    );

    let run = engine(&db, &inventory).run(SyncRunType::Products).await.unwrap();

    assert_eq!(run.status, SyncStatus::Success);
    assert_eq!(run.stats.products, 1);
    assert_eq!(run.stats.errors, 2);
    // Unit 1 was never synced
    assert_eq!(run.stats.orphans, 1);
}

#[tokio::test]
async fn test_merge_policy_deactivates_missing_products() {
    let db = memory_db().await;
    let inventory = upstream_catalog();
    let engine = engine_with(&db, &inventory, config_with_policy("merge"));
    engine.run(SyncRunType::Bootstrap).await.unwrap();

    inventory.set_listing(
        EntityKind::Products,
        vec![product_record("1001", "Quinta do Crasto Reserva", json!(20))],
    );
    let run = engine.run(SyncRunType::Products).await.unwrap();

    assert_eq!(run.stats.deactivated, 1);
    assert_eq!(
        count_rows(
            &db,
            "SELECT COUNT(*) FROM products WHERE external_id = '1002' AND is_active = 0"
        )
        .await,
        1
    );
    assert_eq!(
        count_rows(
            &db,
            "SELECT COUNT(*) FROM audit_log WHERE action = 'products_deactivated'"
        )
        .await,
        1
    );
}

#[tokio::test]
async fn test_replace_policy_deletes_missing_products() {
    let db = memory_db().await;
    let inventory = upstream_catalog();
    let engine = engine_with(&db, &inventory, config_with_policy("replace"));
    engine.run(SyncRunType::Bootstrap).await.unwrap();

    inventory.set_listing(
        EntityKind::Products,
        vec![product_record("1001", "Quinta do Crasto Reserva", json!(20))],
    );
    let run = engine.run(SyncRunType::Products).await.unwrap();

    assert_eq!(run.stats.deleted, 1);
    assert_eq!(
        count_rows(&db, "SELECT COUNT(*) FROM products WHERE external_id = '1002'").await,
        0
    );
    assert_eq!(
        count_rows(&db, "SELECT COUNT(*) FROM product_barcodes").await,
        2
    );
}

#[tokio::test]
async fn test_empty_product_listing_keeps_catalog() {
    let db = memory_db().await;
    let inventory = upstream_catalog();
    let engine = engine_with(&db, &inventory, config_with_policy("replace"));
    engine.run(SyncRunType::Bootstrap).await.unwrap();

    inventory.set_listing(EntityKind::Products, Vec::new());
    let run = engine.run(SyncRunType::Products).await.unwrap();

    assert_eq!(run.status, SyncStatus::Success);
    assert_eq!(run.stats.deleted, 0);
    assert_eq!(count_rows(&db, "SELECT COUNT(*) FROM products").await, 2);
}

#[tokio::test]
async fn test_clean_import_rebuilds_product_data() {
    let db = memory_db().await;
    seed_products(&db, &[product("9999", "Discontinued Rose", "Old Estate", Some(2010))]).await;
    let inventory = upstream_catalog();

    let run = engine(&db, &inventory).run(SyncRunType::CleanImport).await.unwrap();

    assert_eq!(run.status, SyncStatus::Success);
    assert_eq!(run.stats.products, 2);
    assert_eq!(
        count_rows(&db, "SELECT COUNT(*) FROM products WHERE external_id = '9999'").await,
        0
    );
    assert_eq!(
        count_rows(&db, "SELECT COUNT(*) FROM audit_log WHERE action = 'catalog_wiped'").await,
        1
    );
}

#[tokio::test]
async fn test_held_lease_rejects_second_run() {
    let db = memory_db().await;
    let inventory = upstream_catalog();
    assert!(sync_lock::try_acquire(&db, "other-run", 300).await.unwrap());

    let err = engine(&db, &inventory).run(SyncRunType::Bootstrap).await.unwrap_err();

    match &err {
        SyncError::InProgress { holder } => assert_eq!(holder.as_deref(), Some("other-run")),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(count_rows(&db, "SELECT COUNT(*) FROM sync_runs").await, 0);
    assert_eq!(inventory.opened.load(Ordering::SeqCst), 0);
    assert_eq!(
        sync_lock::current_holder(&db).await.unwrap().as_deref(),
        Some("other-run")
    );
}

#[tokio::test]
async fn test_login_failure_is_a_failed_run() {
    let db = memory_db().await;
    let inventory = upstream_catalog();
    *inventory.fail_login.lock().unwrap() = true;

    let run = engine(&db, &inventory).run(SyncRunType::Stores).await.unwrap();

    assert_eq!(run.status, SyncStatus::Failed);
    assert!(run.error.is_some());
    assert_eq!(inventory.closed.load(Ordering::SeqCst), 0);
    assert_eq!(sync_lock::current_holder(&db).await.unwrap(), None);
    assert_eq!(
        count_rows(&db, "SELECT COUNT(*) FROM audit_log WHERE action = 'sync_failed'").await,
        1
    );
}

// ============================================================================
// HTTP surface
// ============================================================================

#[tokio::test]
async fn test_sync_endpoint_runs_and_reports() {
    let db = memory_db().await;
    let inventory = upstream_catalog();
    let state = test_state(db.clone(), FakeVision::replying("{}")).with_inventory(inventory);
    let app = build_router(state);

    let (status, body) = send(&app, post_json("/api/sync", json!({ "sync_type": "stores" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["stats"]["stores"], 1);

    let run_id = body["sync_run_id"].as_str().unwrap();
    let (status, run) = send(&app, get(&format!("/api/sync/runs/{}", run_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["status"], "success");
}

#[tokio::test]
async fn test_sync_endpoint_rejects_unknown_type() {
    let db = memory_db().await;
    let state = test_state(db, FakeVision::replying("{}")).with_inventory(upstream_catalog());
    let app = build_router(state);

    let (status, _) = send(&app, post_json("/api/sync", json!({ "sync_type": "everything" }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_sync_endpoint_requires_sync_type() {
    let db = memory_db().await;
    let inventory = upstream_catalog();
    let state = test_state(db, FakeVision::replying("{}")).with_inventory(inventory.clone());
    let app = build_router(state);

    let (status, body) = send(&app, post_json("/api/sync", json!({}))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    assert_eq!(inventory.opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_sync_endpoint_conflicts_while_leased() {
    let db = memory_db().await;
    sync_lock::try_acquire(&db, "other-run", 300).await.unwrap();
    let state = test_state(db, FakeVision::replying("{}")).with_inventory(upstream_catalog());
    let app = build_router(state);

    let (status, body) = send(&app, post_json("/api/sync", json!({ "sync_type": "bootstrap" }))).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
    assert!(body["error"]["message"].as_str().unwrap().contains("other-run"));
}

#[tokio::test]
async fn test_sync_without_inventory_is_unavailable() {
    let db = memory_db().await;
    let app = build_router(test_state(db, FakeVision::replying("{}")));

    let (status, _) = send(&app, post_json("/api/sync", json!({ "sync_type": "stores" }))).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_run_history_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cellar.db");
    let inventory = upstream_catalog();

    let run_id = {
        let db = cellar_common::db::init_database(&path).await.unwrap();
        let run = engine(&db, &inventory).run(SyncRunType::Stores).await.unwrap();
        db.close().await;
        run.id
    };

    let db = cellar_common::db::init_database(&path).await.unwrap();
    let stored = sync_runs::get_run(&db, run_id).await.unwrap().unwrap();
    assert_eq!(stored.status, SyncStatus::Success);
    assert_eq!(stored.stats.stores, 1);
    assert_eq!(count_rows(&db, "SELECT COUNT(*) FROM stores").await, 1);
}

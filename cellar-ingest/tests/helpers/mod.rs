//! Shared fixtures for cellar-ingest integration tests
//!
//! Fakes stand in for the three external collaborators (vision model,
//! embedding provider, inventory system) so that every test runs against
//! an in-memory database without network access.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::SqlitePool;
use tower::ServiceExt;

use cellar_common::config::TomlConfig;
use cellar_common::events::EventBus;
use cellar_ingest::config::VisionSettings;
use cellar_ingest::db::catalog::{self, ProductUpsert};
use cellar_ingest::services::{
    DeliveryReceipt, EmbeddingError, EmbeddingProvider, EntityKind, ExtractionError,
    InventoryError, InventorySession, InventorySystem, LabelImage, LabelVision, VisionReply,
};
use cellar_ingest::AppState;

/// Caller identity sent by HTTP tests
pub const TEST_USER: &str = "counter-7";

/// Smallest valid PNG signature, base64 encoded
pub const PNG_BASE64: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

// ============================================================================
// Vision
// ============================================================================

/// One scripted vision reply
#[derive(Debug, Clone)]
pub enum VisionScript {
    Text(String),
    RateLimited,
    QuotaExhausted,
    Provider(u16),
}

/// Vision model replaying scripted answers; the last one repeats
pub struct FakeVision {
    script: Mutex<VecDeque<VisionScript>>,
    last: Mutex<VisionScript>,
    pub calls: AtomicUsize,
}

impl FakeVision {
    pub fn replying(text: impl Into<String>) -> Arc<Self> {
        Self::scripted(vec![VisionScript::Text(text.into())])
    }

    pub fn failing(script: VisionScript) -> Arc<Self> {
        Self::scripted(vec![script])
    }

    pub fn scripted(script: Vec<VisionScript>) -> Arc<Self> {
        let last = script
            .last()
            .cloned()
            .unwrap_or_else(|| VisionScript::Text("{}".into()));
        Arc::new(Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(last),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl LabelVision for FakeVision {
    async fn read_label(
        &self,
        _image: &LabelImage,
        _settings: &VisionSettings,
    ) -> Result<VisionReply, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.last.lock().unwrap().clone());

        match next {
            VisionScript::Text(text) => Ok(VisionReply {
                text,
                tokens_used: Some(321),
            }),
            VisionScript::RateLimited => Err(ExtractionError::RateLimited("slow down".into())),
            VisionScript::QuotaExhausted => {
                Err(ExtractionError::QuotaExhausted("no credits left".into()))
            }
            VisionScript::Provider(status) => Err(ExtractionError::Provider {
                status,
                body: "upstream exploded".into(),
            }),
        }
    }
}

/// JSON text a vision model would return for a label
pub fn label_json(name: &str, producer: Option<&str>, vintage: Option<i32>) -> String {
    serde_json::json!({
        "product_name": name,
        "producer": producer,
        "vintage": vintage,
        "region": "Douro",
        "country": "Portugal",
        "confidence": 0.92,
    })
    .to_string()
}

// ============================================================================
// Embeddings
// ============================================================================

/// Deterministic embedding: letter frequencies of the text
pub struct FakeEmbeddings {
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl FakeEmbeddings {
    pub fn working() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn broken() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbeddings {
    fn model(&self) -> &str {
        "letters-26"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(EmbeddingError::Network("connection refused".into()));
        }

        let mut vector = vec![0f32; 26];
        for c in text.to_lowercase().chars().filter(char::is_ascii_lowercase) {
            vector[(c as u8 - b'a') as usize] += 1.0;
        }
        Ok(vector)
    }
}

// ============================================================================
// Inventory system
// ============================================================================

/// In-memory external inventory system
#[derive(Default)]
pub struct FakeInventory {
    listings: Mutex<HashMap<EntityKind, Vec<Value>>>,
    /// Deliveries that fail before the first success
    failing_deliveries: AtomicUsize,
    pub fail_login: Mutex<bool>,
    pub delivered: Mutex<Vec<Value>>,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
}

impl FakeInventory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_listing(&self, kind: EntityKind, records: Vec<Value>) {
        self.listings.lock().unwrap().insert(kind, records);
    }

    pub fn fail_next_deliveries(&self, count: usize) {
        self.failing_deliveries.store(count, Ordering::SeqCst);
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }
}

#[async_trait]
impl InventorySystem for FakeInventory {
    async fn open_session(&self) -> Result<InventorySession, InventoryError> {
        if *self.fail_login.lock().unwrap() {
            return Err(InventoryError::Unauthorized);
        }
        let n = self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(InventorySession {
            token: format!("token-{}", n),
        })
    }

    async fn close_session(&self, _session: &InventorySession) -> Result<(), InventoryError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch(
        &self,
        _session: &InventorySession,
        kind: EntityKind,
    ) -> Result<Vec<Value>, InventoryError> {
        Ok(self
            .listings
            .lock()
            .unwrap()
            .get(&kind)
            .cloned()
            .unwrap_or_default())
    }

    async fn submit_document(
        &self,
        _session: &InventorySession,
        document: &Value,
    ) -> Result<DeliveryReceipt, InventoryError> {
        let remaining = self.failing_deliveries.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_deliveries.store(remaining - 1, Ordering::SeqCst);
            return Err(InventoryError::Api {
                status: 503,
                body: "maintenance".into(),
            });
        }

        self.delivered.lock().unwrap().push(document.clone());
        Ok(DeliveryReceipt { status_code: 201 })
    }
}

// ============================================================================
// Database and app fixtures
// ============================================================================

pub async fn memory_db() -> SqlitePool {
    cellar_common::db::init_memory_database().await.unwrap()
}

/// Config with a vision key so recognition is "configured"
pub fn test_config() -> TomlConfig {
    let mut config = TomlConfig::default();
    config.vision.api_key = Some("test-key".into());
    config
}

pub fn test_state(db: SqlitePool, vision: Arc<FakeVision>) -> AppState {
    AppState::new(db, EventBus::new(64), Arc::new(test_config()), vision)
}

pub fn product(external_id: &str, name: &str, producer: &str, vintage: Option<i32>) -> ProductUpsert {
    ProductUpsert {
        external_id: external_id.into(),
        name: name.into(),
        producer: Some(producer.into()),
        vintage,
        volume_ml: Some(750),
        region: Some("Douro".into()),
        country: Some("Portugal".into()),
        is_active: true,
        ..Default::default()
    }
}

/// Insert products directly; returns their local ids in order
pub async fn seed_products(db: &SqlitePool, products: &[ProductUpsert]) -> Vec<String> {
    let mut ids = Vec::with_capacity(products.len());
    for p in products {
        ids.push(catalog::upsert_product(db, p).await.unwrap());
    }
    ids
}

pub async fn seed_wine_catalog(db: &SqlitePool) -> Vec<String> {
    seed_products(
        db,
        &[
            product("1001", "Quinta do Crasto Reserva", "Quinta do Crasto", Some(2019)),
            product("1002", "Duas Quintas Tinto", "Ramos Pinto", Some(2020)),
            product("1003", "Papa Figos", "Casa Ferreirinha", Some(2021)),
        ],
    )
    .await
}

pub async fn seed_store(db: &SqlitePool, external_id: &str) -> String {
    catalog::upsert_store(db, external_id, "Lisbon Cellar", true)
        .await
        .unwrap()
}

/// Counting session with one count item per `(product_id, counted, expected)`
pub async fn seed_session(
    db: &SqlitePool,
    session_id: &str,
    store_id: Option<&str>,
    status: &str,
    items: &[(&str, f64, Option<f64>)],
) {
    sqlx::query(
        "INSERT INTO counting_sessions (id, store_id, name, status, created_at, approved_at)
         VALUES (?, ?, 'Weekly count', ?, '2026-10-01T09:00:00Z', '2026-10-01T18:00:00Z')",
    )
    .bind(session_id)
    .bind(store_id)
    .bind(status)
    .execute(db)
    .await
    .unwrap();

    for (product_id, counted, expected) in items {
        sqlx::query(
            "INSERT INTO count_items (session_id, product_id, quantity, expected_quantity, counted_at)
             VALUES (?, ?, ?, ?, '2026-10-01T10:00:00Z')",
        )
        .bind(session_id)
        .bind(product_id)
        .bind(counted)
        .bind(expected)
        .execute(db)
        .await
        .unwrap();
    }
}

pub async fn count_rows(db: &SqlitePool, sql: &str) -> i64 {
    sqlx::query_scalar(sql).fetch_one(db).await.unwrap()
}

// ============================================================================
// HTTP
// ============================================================================

pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-user-id", TEST_USER)
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-user-id", TEST_USER)
        .body(Body::empty())
        .unwrap()
}

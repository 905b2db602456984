//! cellar-ingest library interface
//!
//! Exposes the recognition pipeline, sync engine and outbox dispatcher for
//! the binary and for integration testing.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use cellar_common::config::TomlConfig;
use cellar_common::events::EventBus;

use crate::services::{
    EmbeddingProvider, InventorySystem, LabelVision, MatchEngine, OutboxDispatcher, SyncEngine,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    pub config: Arc<TomlConfig>,
    pub vision: Arc<dyn LabelVision>,
    /// None disables semantic retrieval and the embedding refresh endpoint
    pub embeddings: Option<Arc<dyn EmbeddingProvider>>,
    /// None answers sync and outbox requests with 503
    pub inventory: Option<Arc<dyn InventorySystem>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        config: Arc<TomlConfig>,
        vision: Arc<dyn LabelVision>,
    ) -> Self {
        Self {
            db,
            event_bus,
            config,
            vision,
            embeddings: None,
            inventory: None,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_embeddings(mut self, embeddings: Arc<dyn EmbeddingProvider>) -> Self {
        self.embeddings = Some(embeddings);
        self
    }

    pub fn with_inventory(mut self, inventory: Arc<dyn InventorySystem>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    pub fn match_engine(&self) -> MatchEngine {
        MatchEngine::new(
            self.db.clone(),
            self.vision.clone(),
            self.embeddings.clone(),
            self.config.clone(),
            self.event_bus.clone(),
        )
    }

    pub fn sync_engine(&self) -> ApiResult<SyncEngine> {
        Ok(SyncEngine::new(
            self.db.clone(),
            self.inventory()?,
            self.config.clone(),
            self.event_bus.clone(),
        ))
    }

    pub fn outbox_dispatcher(&self) -> ApiResult<OutboxDispatcher> {
        Ok(OutboxDispatcher::new(
            self.db.clone(),
            self.inventory()?,
            self.config.outbox.clone(),
            self.event_bus.clone(),
        ))
    }

    /// Remember an error for `/health`
    pub async fn record_error(&self, message: String) {
        *self.last_error.write().await = Some(message);
    }

    fn inventory(&self) -> ApiResult<Arc<dyn InventorySystem>> {
        self.inventory.clone().ok_or_else(|| {
            ApiError::ServiceUnavailable("Inventory system is not configured".to_string())
        })
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::recognition_routes())
        .merge(api::sync_routes())
        .merge(api::outbox_routes())
        .merge(api::catalog_routes())
        .merge(api::settings_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

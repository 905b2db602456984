//! External inventory system client
//!
//! Session-based JSON API: a session token is opened with credentials,
//! used as a bearer token for listings and document delivery, and released
//! afterwards. The system tolerates one logical session at a time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use cellar_common::config::InventoryConfig;

const USER_AGENT: &str = concat!("cellar-ingest/", env!("CARGO_PKG_VERSION"));
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Document delivery endpoint, as recorded in `api_logs`
pub const DOCUMENTS_PATH: &str = "/documents";

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("Inventory system not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Inventory system rejected the credentials")]
    Unauthorized,

    #[error("Inventory system error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Unexpected inventory response: {0}")]
    Parse(String),
}

impl InventoryError {
    /// HTTP status when the failure came from a response
    pub fn status_code(&self) -> Option<u16> {
        match self {
            InventoryError::Unauthorized => Some(401),
            InventoryError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Listings pulled during sync, in dependency order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Stores,
    Units,
    Categories,
    Products,
    Prices,
    Stock,
}

impl EntityKind {
    pub fn path(&self) -> &'static str {
        match self {
            EntityKind::Stores => "/stores",
            EntityKind::Units => "/units",
            EntityKind::Categories => "/categories",
            EntityKind::Products => "/products",
            EntityKind::Prices => "/prices",
            EntityKind::Stock => "/stock",
        }
    }

    /// `external_objects.object_type`
    pub fn object_type(&self) -> &'static str {
        match self {
            EntityKind::Stores => "store",
            EntityKind::Units => "unit",
            EntityKind::Categories => "category",
            EntityKind::Products => "product",
            EntityKind::Prices => "price",
            EntityKind::Stock => "stock",
        }
    }
}

/// Open session handle
#[derive(Debug, Clone)]
pub struct InventorySession {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReceipt {
    pub status_code: u16,
}

#[async_trait]
pub trait InventorySystem: Send + Sync {
    async fn open_session(&self) -> Result<InventorySession, InventoryError>;

    async fn close_session(&self, session: &InventorySession) -> Result<(), InventoryError>;

    /// Full current listing of one entity type
    async fn fetch(
        &self,
        session: &InventorySession,
        kind: EntityKind,
    ) -> Result<Vec<serde_json::Value>, InventoryError>;

    async fn submit_document(
        &self,
        session: &InventorySession,
        document: &serde_json::Value,
    ) -> Result<DeliveryReceipt, InventoryError>;
}

#[derive(Debug, Serialize)]
struct SessionRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    token: String,
}

/// HTTP implementation of `InventorySystem`
pub struct InventoryClient {
    http_client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl InventoryClient {
    pub fn new(config: &InventoryConfig) -> Result<Self, InventoryError> {
        let base_url = config
            .base_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| InventoryError::NotConfigured("[inventory] base_url is not set".to_string()))?;

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(
                config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            ))
            .build()
            .map_err(|e| InventoryError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: config.username.clone().unwrap_or_default(),
            password: config.password.clone().unwrap_or_default(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, InventoryError> {
        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(InventoryError::Unauthorized);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InventoryError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl InventorySystem for InventoryClient {
    async fn open_session(&self) -> Result<InventorySession, InventoryError> {
        let response = self
            .http_client
            .post(self.url("/session"))
            .json(&SessionRequest {
                username: &self.username,
                password: &self.password,
            })
            .send()
            .await
            .map_err(|e| InventoryError::Network(e.to_string()))?;

        let session: SessionResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| InventoryError::Parse(e.to_string()))?;

        debug!("Inventory session opened");
        Ok(InventorySession {
            token: session.token,
        })
    }

    async fn close_session(&self, session: &InventorySession) -> Result<(), InventoryError> {
        let response = self
            .http_client
            .delete(self.url("/session"))
            .bearer_auth(&session.token)
            .send()
            .await
            .map_err(|e| InventoryError::Network(e.to_string()))?;

        Self::check(response).await?;
        debug!("Inventory session closed");
        Ok(())
    }

    async fn fetch(
        &self,
        session: &InventorySession,
        kind: EntityKind,
    ) -> Result<Vec<serde_json::Value>, InventoryError> {
        let response = self
            .http_client
            .get(self.url(kind.path()))
            .bearer_auth(&session.token)
            .send()
            .await
            .map_err(|e| InventoryError::Network(e.to_string()))?;

        let records: Vec<serde_json::Value> = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| InventoryError::Parse(format!("{}: {}", kind.path(), e)))?;

        debug!(path = kind.path(), count = records.len(), "Fetched inventory listing");
        Ok(records)
    }

    async fn submit_document(
        &self,
        session: &InventorySession,
        document: &serde_json::Value,
    ) -> Result<DeliveryReceipt, InventoryError> {
        let response = self
            .http_client
            .post(self.url(DOCUMENTS_PATH))
            .bearer_auth(&session.token)
            .json(document)
            .send()
            .await
            .map_err(|e| InventoryError::Network(e.to_string()))?;

        let response = Self::check(response).await?;
        Ok(DeliveryReceipt {
            status_code: response.status().as_u16(),
        })
    }
}

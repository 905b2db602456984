//! cellar-ingest - label recognition and inventory sync service
//!
//! Reads wine labels through a vision model, matches them against the local
//! catalog, reconciles the catalog with the external inventory system and
//! delivers approved counts back to it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cellar_common::config::{self as common_config, TomlConfig};
use cellar_common::events::EventBus;
use cellar_ingest::config::resolve_embedding_api_key;
use cellar_ingest::services::{
    EmbeddingClient, EmbeddingProvider, InventoryClient, InventorySystem, VisionClient,
};
use cellar_ingest::AppState;

#[derive(Debug, Parser)]
#[command(name = "cellar-ingest", version, about = "Wine label recognition and inventory sync")]
struct Args {
    /// Root folder holding the database (overrides CELLAR_ROOT and TOML)
    #[arg(long)]
    root_folder: Option<String>,

    /// HTTP port (overrides [server] port)
    #[arg(long, env = "CELLAR_PORT")]
    port: Option<u16>,

    /// TOML configuration file
    #[arg(long, env = "CELLAR_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .or_else(common_config::default_config_path)
        .unwrap_or_else(|| PathBuf::from(common_config::CONFIG_FILE_NAME));
    let toml_config = common_config::load_toml_config(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&toml_config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting cellar-ingest");
    info!(
        "Version: {} ({}, {} build, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_PROFILE"),
        env!("BUILD_TIMESTAMP")
    );
    info!("Config: {}", config_path.display());

    let root_folder = common_config::resolve_root_folder(args.root_folder.as_deref(), Some(&toml_config));
    std::fs::create_dir_all(&root_folder)
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;

    let db_path = root_folder.join("cellar.db");
    info!("Database: {}", db_path.display());
    let db = cellar_common::db::init_database(&db_path).await?;

    let event_bus = EventBus::new(100);
    let vision = Arc::new(VisionClient::new(&toml_config.vision)?);

    let embeddings: Option<Arc<dyn EmbeddingProvider>> = if !toml_config.embedding.enabled {
        info!("Embedding retrieval disabled");
        None
    } else {
        match resolve_embedding_api_key(&db, &toml_config).await? {
            Some(key) => Some(
                Arc::new(EmbeddingClient::new(&toml_config.embedding, key)?) as Arc<dyn EmbeddingProvider>,
            ),
            None => {
                warn!("No embedding API key configured, retrieval runs lexical-only");
                None
            }
        }
    };

    let inventory: Option<Arc<dyn InventorySystem>> = match InventoryClient::new(&toml_config.inventory) {
        Ok(client) => Some(Arc::new(client) as Arc<dyn InventorySystem>),
        Err(e) => {
            warn!("Sync and outbox disabled: {}", e);
            None
        }
    };

    let bind = toml_config.server.bind.clone();
    let port = args.port.unwrap_or(toml_config.server.port);

    let mut state = AppState::new(db, event_bus, Arc::new(toml_config), vision);
    if let Some(embeddings) = embeddings {
        state = state.with_embeddings(embeddings);
    }
    if let Some(inventory) = inventory {
        state = state.with_inventory(inventory);
    }

    let app = cellar_ingest::build_router(state);

    let addr = format!("{}:{}", bind, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

//! Configuration resolution for cellar-ingest
//!
//! Provides multi-tier configuration resolution with Database → ENV → TOML priority
//! for provider secrets and the model name.

use cellar_common::config::TomlConfig;
use cellar_common::{Error, Result};
use sqlx::{Pool, Sqlite};
use tracing::{debug, warn};

use crate::models::ReimportPolicy;

pub const VISION_API_KEY_ENV: &str = "CELLAR_VISION_API_KEY";
pub const VISION_MODEL_ENV: &str = "CELLAR_VISION_MODEL";
pub const EMBEDDING_API_KEY_ENV: &str = "CELLAR_EMBEDDING_API_KEY";

/// Vision settings resolved for one recognition request
#[derive(Debug, Clone)]
pub struct VisionSettings {
    pub api_key: Option<String>,
    pub model: String,
}

/// Resolve vision API key and model name
///
/// Re-read on every request so settings-table overrides apply without restart.
/// A missing key is not an error here; the extractor reports `NotConfigured`.
pub async fn resolve_vision_settings(
    db: &Pool<Sqlite>,
    toml_config: &TomlConfig,
) -> Result<VisionSettings> {
    let api_key = resolve_tiered(
        "Vision API key",
        crate::db::settings::get_vision_api_key(db).await?,
        std::env::var(VISION_API_KEY_ENV).ok(),
        toml_config.vision.api_key.clone(),
    );

    let model = resolve_tiered(
        "Vision model",
        crate::db::settings::get_vision_model(db).await?,
        std::env::var(VISION_MODEL_ENV).ok(),
        Some(toml_config.vision.model.clone()),
    )
    .ok_or_else(|| Error::Config("Vision model name is empty".to_string()))?;

    Ok(VisionSettings { api_key, model })
}

/// Resolve embedding provider API key
pub async fn resolve_embedding_api_key(
    db: &Pool<Sqlite>,
    toml_config: &TomlConfig,
) -> Result<Option<String>> {
    Ok(resolve_tiered(
        "Embedding API key",
        crate::db::settings::get_embedding_api_key(db).await?,
        std::env::var(EMBEDDING_API_KEY_ENV).ok(),
        toml_config.embedding.api_key.clone(),
    ))
}

/// Resolve the reimport policy (Database → TOML)
pub async fn resolve_reimport_policy(
    db: &Pool<Sqlite>,
    toml_config: &TomlConfig,
) -> Result<ReimportPolicy> {
    let raw = crate::db::settings::get_reimport_policy(db)
        .await?
        .unwrap_or_else(|| toml_config.sync.reimport_policy.clone());

    raw.parse::<ReimportPolicy>().map_err(Error::Config)
}

/// Pick the first valid value in priority order, warning on ambiguity
fn resolve_tiered(
    label: &str,
    db_value: Option<String>,
    env_value: Option<String>,
    toml_value: Option<String>,
) -> Option<String> {
    let tiers = [
        ("database", db_value),
        ("environment", env_value),
        ("TOML", toml_value),
    ];

    let valid: Vec<(&str, String)> = tiers
        .into_iter()
        .filter_map(|(source, value)| value.filter(|v| is_valid_key(v)).map(|v| (source, v)))
        .collect();

    // Warn if multiple sources (potential misconfiguration)
    if valid.len() > 1 {
        let sources: Vec<&str> = valid.iter().map(|(s, _)| *s).collect();
        warn!(
            "{} found in multiple sources: {}. Using {} (highest priority).",
            label,
            sources.join(", "),
            sources[0]
        );
    }

    valid.into_iter().next().map(|(source, value)| {
        debug!("{} loaded from {}", label, source);
        value.trim().to_string()
    })
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

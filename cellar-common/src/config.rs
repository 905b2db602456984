//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "CELLAR_ROOT";

/// Name of the per-service TOML file inside the root folder
pub const CONFIG_FILE_NAME: &str = "cellar-ingest.toml";

/// Complete TOML configuration
///
/// Every section is optional in the file; missing sections fall back to
/// their `Default` values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<String>,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub vision: VisionConfig,
    pub embedding: EmbeddingConfig,
    pub inventory: InventoryConfig,
    pub matching: MatchingConfig,
    pub scoring: ScoringWeights,
    pub sync: SyncConfig,
    pub outbox: OutboxConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 5740,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing filter (overridden by RUST_LOG)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Vision-capable chat completion provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// OpenAI-compatible chat completions URL
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub prompt_version: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            model: "google/gemini-2.0-flash-001".to_string(),
            api_key: None,
            prompt_version: "wine-label-v2".to_string(),
            max_tokens: 1000,
            timeout_secs: 60,
        }
    }
}

/// Text embedding provider (soft dependency of candidate retrieval)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub enabled: bool,
    /// OpenAI-compatible embeddings URL
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://api.openai.com/v1/embeddings".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key: None,
            timeout_secs: 20,
        }
    }
}

/// External inventory system connection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    pub base_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Retrieval limits and decision thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Top score at or above which a match is auto-applied
    pub auto_match_threshold: i32,
    /// Merged candidate count below which substring fallback runs
    pub fallback_trigger_count: usize,
    pub trigram_limit: usize,
    pub embedding_limit: usize,
    pub fallback_limit: usize,
    pub trigram_min_similarity: f64,
    pub embedding_min_similarity: f64,
    /// Fixed raw score given to substring hits
    pub ilike_score: f64,
    /// Fixed raw score given to per-word substring hits
    pub word_fallback_score: f64,
    /// Minimum score for a same-vintage candidate to be promoted
    pub variant_vintage_min_score: i32,
    pub vintage_promotion_bonus: i32,
    /// Number of candidates echoed back for manual review
    pub review_candidate_count: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            auto_match_threshold: 50,
            fallback_trigger_count: 5,
            trigram_limit: 15,
            embedding_limit: 15,
            fallback_limit: 20,
            trigram_min_similarity: 0.1,
            embedding_min_similarity: 0.3,
            ilike_score: 0.1,
            word_fallback_score: 0.05,
            variant_vintage_min_score: 30,
            vintage_promotion_bonus: 10,
            review_candidate_count: 5,
        }
    }
}

/// Point weights of the candidate scoring heuristic
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub name_exact: i32,
    pub name_partial: i32,
    pub producer_exact: i32,
    pub producer_partial: i32,
    pub vintage_exact: i32,
    pub region_contains: i32,
    pub hybrid_bonus: i32,
    pub embedding_bonus: i32,
    pub trigram_bonus: i32,
    pub fallback_bonus: i32,
    /// Multiplier applied to the raw retrieval similarity before rounding
    pub raw_score_multiplier: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            name_exact: 40,
            name_partial: 25,
            producer_exact: 30,
            producer_partial: 15,
            vintage_exact: 20,
            region_contains: 10,
            hybrid_bonus: 10,
            embedding_bonus: 5,
            trigram_bonus: 3,
            fallback_bonus: 0,
            raw_score_multiplier: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Lease duration of the global sync lock
    pub lock_ttl_secs: i64,
    /// merge | hide | replace | fresh
    pub reimport_policy: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lock_ttl_secs: 300,
            reimport_policy: "merge".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    pub batch_limit: i64,
    pub max_attempts: i64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            batch_limit: 10,
            max_attempts: 5,
        }
    }
}

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&str>, toml_config: Option<&TomlConfig>) -> PathBuf {
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(root) = toml_config.and_then(|c| c.root_folder.as_deref()) {
        return PathBuf::from(root);
    }

    get_default_root_folder()
}

/// Platform config file location (`~/.config/cellarcount/cellar-ingest.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("cellarcount").join(CONFIG_FILE_NAME))
}

/// Load TOML configuration from a file
///
/// A missing file yields the default configuration; a malformed one is an error.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        tracing::debug!("Config file not found, using defaults: {}", path.display());
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;

    toml::from_str(&content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
}

/// Get OS-dependent default root folder path
fn get_default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("cellarcount"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/cellarcount"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("cellarcount"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/cellarcount"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("cellarcount"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\cellarcount"))
    } else {
        PathBuf::from("./cellarcount_data")
    }
}

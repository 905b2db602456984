//! External catalog synchronization runs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Requested scope of a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunType {
    /// Everything: stores, units, categories, products, prices and stock
    Bootstrap,
    Stores,
    /// Measurement units and categories
    Categories,
    Products,
    PricesStock,
    /// Wipe product-dependent tables, then a full bootstrap
    CleanImport,
}

impl SyncRunType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncRunType::Bootstrap => "bootstrap",
            SyncRunType::Stores => "stores",
            SyncRunType::Categories => "categories",
            SyncRunType::Products => "products",
            SyncRunType::PricesStock => "prices_stock",
            SyncRunType::CleanImport => "clean_import",
        }
    }

    /// Stages executed, in dependency order
    pub fn stages(&self) -> &'static [SyncStage] {
        use SyncStage::*;
        match self {
            SyncRunType::Bootstrap | SyncRunType::CleanImport => {
                &[Stores, Units, Categories, Products, Prices, Stock]
            }
            SyncRunType::Stores => &[Stores],
            SyncRunType::Categories => &[Units, Categories],
            SyncRunType::Products => &[Products],
            SyncRunType::PricesStock => &[Prices, Stock],
        }
    }

    pub fn includes_products(&self) -> bool {
        self.stages().contains(&SyncStage::Products)
    }
}

impl std::str::FromStr for SyncRunType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bootstrap" => Ok(SyncRunType::Bootstrap),
            "stores" => Ok(SyncRunType::Stores),
            "categories" => Ok(SyncRunType::Categories),
            "products" => Ok(SyncRunType::Products),
            "prices_stock" => Ok(SyncRunType::PricesStock),
            "clean_import" => Ok(SyncRunType::CleanImport),
            other => Err(format!("Unknown sync type: {}", other)),
        }
    }
}

/// Unit of work inside a run; also the `stats.stage` shown to operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    Stores,
    Units,
    Categories,
    Products,
    Prices,
    Stock,
}

impl SyncStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStage::Stores => "stores",
            SyncStage::Units => "units",
            SyncStage::Categories => "categories",
            SyncStage::Products => "products",
            SyncStage::Prices => "prices",
            SyncStage::Stock => "stock",
        }
    }
}

/// What happens to local products missing from the latest full listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReimportPolicy {
    /// Soft-deactivate, keep history
    Merge,
    /// Same effect as merge
    Hide,
    /// Hard-delete the product and its barcodes
    Replace,
    /// Wipe all product data before the import
    Fresh,
}

impl std::str::FromStr for ReimportPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "merge" => Ok(ReimportPolicy::Merge),
            "hide" => Ok(ReimportPolicy::Hide),
            "replace" => Ok(ReimportPolicy::Replace),
            "fresh" => Ok(ReimportPolicy::Fresh),
            other => Err(format!("Unknown reimport policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Running,
    Success,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Running => "running",
            SyncStatus::Success => "success",
            SyncStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(SyncStatus::Running),
            "success" => Some(SyncStatus::Success),
            "failed" => Some(SyncStatus::Failed),
            _ => None,
        }
    }
}

/// Counters and live progress, persisted as JSON on the run row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncStats {
    pub stores: u64,
    pub units: u64,
    pub categories: u64,
    pub products: u64,
    pub barcodes: u64,
    pub skipped: u64,
    pub errors: u64,
    pub orphans: u64,
    pub deactivated: u64,
    pub deleted: u64,
    pub prices_updated: u64,
    pub stock_updated: u64,
    pub stage: Option<String>,
    /// 0-100
    pub progress: u8,
}

/// One execution of the external-catalog synchronization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: Uuid,
    pub run_type: SyncRunType,
    pub status: SyncStatus,
    pub stats: SyncStats,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncRun {
    pub fn start(id: Uuid, run_type: SyncRunType) -> Self {
        Self {
            id,
            run_type,
            status: SyncStatus::Running,
            stats: SyncStats::default(),
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn enter_stage(&mut self, stage: &str, progress: u8) {
        self.stats.stage = Some(stage.to_string());
        self.stats.progress = progress.min(100);
    }

    pub fn succeed(&mut self) {
        self.status = SyncStatus::Success;
        self.stats.progress = 100;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: String) {
        self.status = SyncStatus::Failed;
        self.error = Some(error);
        self.finished_at = Some(Utc::now());
    }
}

//! Outbox jobs pushing approved counts to the external system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Counted quantities become the new stock
    InventoryCommit,
    /// Counted vs expected report, stock untouched
    InventoryCheck,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::InventoryCommit => "inventory_commit",
            JobType::InventoryCheck => "inventory_check",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "inventory_commit" => Some(JobType::InventoryCommit),
            "inventory_check" => Some(JobType::InventoryCheck),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processing => "processing",
            OutboxStatus::Success => "success",
            OutboxStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(OutboxStatus::Pending),
            "processing" => Some(OutboxStatus::Processing),
            "success" => Some(OutboxStatus::Success),
            "failed" => Some(OutboxStatus::Failed),
            _ => None,
        }
    }
}

/// A queued unit of work for the external system
///
/// Never deleted; the table doubles as the delivery audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxJob {
    pub id: Uuid,
    pub job_type: JobType,
    pub session_id: String,
    pub payload: serde_json::Value,
    pub payload_hash: String,
    pub status: OutboxStatus,
    pub attempts: i64,
    pub max_attempts: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxJob {
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Per-job outcome of one dispatch pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub job_id: Uuid,
    pub status: OutboxStatus,
    pub attempts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

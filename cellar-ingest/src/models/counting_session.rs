//! Counting sessions as read by the outbox

use serde::{Deserialize, Serialize};

/// Session states written by the counting UI and the dispatcher
pub const SESSION_APPROVED: &str = "approved";
pub const SESSION_COMPLETED: &str = "completed";
pub const SESSION_SYNCED: &str = "synced";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CountingSession {
    pub id: String,
    pub store_id: Option<String>,
    /// Joined from `stores`; None when the session has no synced store
    pub store_external_id: Option<String>,
    pub name: String,
    pub status: String,
    pub approved_at: Option<String>,
}

impl CountingSession {
    /// Only approved or completed sessions may be sent out
    pub fn is_submittable(&self) -> bool {
        self.status == SESSION_APPROVED || self.status == SESSION_COMPLETED
    }
}

/// Per-product totals of a session, joined with catalog identifiers
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct SessionTotal {
    pub product_id: String,
    pub product_external_id: Option<String>,
    pub counted: f64,
    pub expected: Option<f64>,
}

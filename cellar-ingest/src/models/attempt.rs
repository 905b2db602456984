//! Recognition attempt audit record
//!
//! Status transitions are one-directional: `processing` is always the
//! initial state and `success`, `manual_review`, `failed` are terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ExtractionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Processing,
    Success,
    ManualReview,
    Failed,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Processing => "processing",
            AttemptStatus::Success => "success",
            AttemptStatus::ManualReview => "manual_review",
            AttemptStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "processing" => Some(AttemptStatus::Processing),
            "success" => Some(AttemptStatus::Success),
            "manual_review" => Some(AttemptStatus::ManualReview),
            "failed" => Some(AttemptStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptStatus::Processing)
    }
}

/// Durable audit record of one recognition cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionAttempt {
    pub id: Uuid,
    pub user_id: String,
    pub session_id: Option<String>,
    pub model_used: String,
    pub prompt_version: String,
    pub status: AttemptStatus,
    pub extracted_data: Option<ExtractionRecord>,
    /// Model text as received, kept for prompt tuning
    pub raw_response: Option<String>,
    pub matched_product_id: Option<String>,
    pub match_confidence: Option<i32>,
    pub match_method: Option<String>,
    pub tokens_used: Option<i64>,
    pub processing_time_ms: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl RecognitionAttempt {
    /// New attempt in the `processing` state
    pub fn start(
        user_id: String,
        session_id: Option<String>,
        model_used: String,
        prompt_version: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            session_id,
            model_used,
            prompt_version,
            status: AttemptStatus::Processing,
            extracted_data: None,
            raw_response: None,
            matched_product_id: None,
            match_confidence: None,
            match_method: None,
            tokens_used: None,
            processing_time_ms: None,
            error_message: None,
            created_at: Utc::now(),
            processed_at: None,
        }
    }
}

/// Everything written when an attempt reaches its terminal state
#[derive(Debug, Clone, Default)]
pub struct AttemptCompletion {
    pub extracted_data: Option<ExtractionRecord>,
    pub raw_response: Option<String>,
    pub matched_product_id: Option<String>,
    pub match_confidence: Option<i32>,
    pub match_method: Option<String>,
    pub tokens_used: Option<i64>,
    pub processing_time_ms: i64,
    pub error_message: Option<String>,
}

/// Operator decision on a manual-review or select-variant outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionFeedback {
    pub attempt_id: Uuid,
    pub user_id: String,
    pub product_id: Option<String>,
    pub accepted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_attempt_is_processing() {
        let attempt = RecognitionAttempt::start("u1".into(), None, "model".into(), "v1".into());
        assert_eq!(attempt.status, AttemptStatus::Processing);
        assert!(!attempt.status.is_terminal());
        assert!(attempt.processed_at.is_none());
    }

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            AttemptStatus::Processing,
            AttemptStatus::Success,
            AttemptStatus::ManualReview,
            AttemptStatus::Failed,
        ] {
            assert_eq!(AttemptStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AttemptStatus::parse("select_variant"), None);
    }
}

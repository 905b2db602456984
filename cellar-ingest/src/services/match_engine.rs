//! Match decision engine
//!
//! Orchestrates one recognition attempt: extraction, retrieval, scoring and
//! the threshold decision. Every invocation writes exactly one
//! `recognition_attempts` row, inserted as `processing` before any external
//! call and finalized before returning, whatever the outcome.

use std::sync::Arc;
use std::time::Instant;

use cellar_common::config::{MatchingConfig, TomlConfig};
use cellar_common::events::{CellarEvent, EventBus};
use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{resolve_vision_settings, VisionSettings};
use crate::db::{attempts, catalog};
use crate::models::{
    AttemptCompletion, AttemptStatus, CandidateProduct, ExtractionRecord, MatchedProduct,
    RecognitionAttempt,
};
use crate::services::candidate_retriever::CandidateRetriever;
use crate::services::candidate_scorer::rank_candidates;
use crate::services::embedding_client::EmbeddingProvider;
use crate::services::vision_client::{self, Extraction, ExtractionError, LabelImage, LabelVision};

/// Stored as `match_method` when the operator must pick a vintage
pub const SELECT_VARIANT_METHOD: &str = "select_variant";

#[derive(Debug, Error)]
pub enum RecognitionError {
    /// Provider-level failure; the attempt is already recorded as failed
    #[error("{source}")]
    Provider {
        attempt_id: Uuid,
        #[source]
        source: ExtractionError,
    },

    #[error(transparent)]
    Common(#[from] cellar_common::Error),
}

/// Standard requests decide; test mode reports every scored candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionMode {
    Standard,
    Test,
}

#[derive(Debug, Clone)]
pub struct RecognitionRequest {
    pub user_id: String,
    pub session_id: Option<String>,
    pub image: LabelImage,
    pub mode: RecognitionMode,
}

/// Result of thresholding the top candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    Success,
    ManualReview,
    SelectVariant,
    Failed,
}

impl MatchOutcome {
    /// Status word in the response body
    pub fn as_str(&self, mode: RecognitionMode) -> &'static str {
        match (mode, self) {
            (RecognitionMode::Standard, MatchOutcome::Success) => "success",
            (RecognitionMode::Standard, MatchOutcome::ManualReview) => "manual_review",
            (RecognitionMode::Standard, MatchOutcome::SelectVariant) => "select_variant",
            (RecognitionMode::Standard, MatchOutcome::Failed) => "failed",
            (RecognitionMode::Test, MatchOutcome::Success | MatchOutcome::SelectVariant) => {
                "matched"
            }
            (RecognitionMode::Test, MatchOutcome::ManualReview) => "low_confidence",
            (RecognitionMode::Test, MatchOutcome::Failed) => "no_match",
        }
    }

    /// Persisted attempt status (`select_variant` is a manual review)
    pub fn attempt_status(&self) -> AttemptStatus {
        match self {
            MatchOutcome::Success => AttemptStatus::Success,
            MatchOutcome::ManualReview | MatchOutcome::SelectVariant => AttemptStatus::ManualReview,
            MatchOutcome::Failed => AttemptStatus::Failed,
        }
    }
}

/// Threshold the top score: `>= threshold` success, `> 0` review, else failed
pub fn decide(top_score: Option<i32>, auto_match_threshold: i32) -> MatchOutcome {
    match top_score {
        Some(score) if score >= auto_match_threshold => MatchOutcome::Success,
        Some(score) if score > 0 => MatchOutcome::ManualReview,
        _ => MatchOutcome::Failed,
    }
}

/// Response body of a recognition request
#[derive(Debug, Clone, Serialize)]
pub struct RecognitionResult {
    pub status: String,
    pub extracted: Option<ExtractionRecord>,
    /// Top candidate score, 0 without candidates
    pub confidence: i32,
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    pub matched: Option<MatchedProduct>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variants: Option<Vec<MatchedProduct>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<CandidateProduct>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Model text, only returned when it could not be parsed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
    pub attempt_id: Uuid,
    pub processing_time_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<i64>,
}

/// Everything the pipeline decided, before persistence
struct Decision {
    extraction: Extraction,
    ranked: Vec<CandidateProduct>,
    outcome: MatchOutcome,
    variants: Option<Vec<MatchedProduct>>,
}

impl Decision {
    fn top(&self) -> Option<&CandidateProduct> {
        self.ranked.first()
    }

    fn confidence(&self) -> i32 {
        self.top().map(|c| c.score).unwrap_or(0)
    }

    fn match_method(&self) -> Option<String> {
        match self.outcome {
            MatchOutcome::SelectVariant => Some(SELECT_VARIANT_METHOD.to_string()),
            MatchOutcome::Failed => None,
            _ => self.top().map(|c| c.retrieval_method.as_str().to_string()),
        }
    }

    fn failure_reason(&self) -> Option<String> {
        if self.outcome != MatchOutcome::Failed {
            return None;
        }
        Some(if self.extraction.record.is_empty() {
            "No legible label attributes".to_string()
        } else if self.ranked.is_empty() {
            "No catalog candidates found".to_string()
        } else {
            "No candidate scored above zero".to_string()
        })
    }

    fn completion(&self, processing_time_ms: i64) -> AttemptCompletion {
        AttemptCompletion {
            extracted_data: Some(self.extraction.record.clone()),
            raw_response: Some(self.extraction.raw_text.clone()),
            matched_product_id: match self.outcome {
                MatchOutcome::Success => self.top().map(|c| c.id.clone()),
                _ => None,
            },
            match_confidence: Some(self.confidence()),
            match_method: self.match_method(),
            tokens_used: self.extraction.tokens_used,
            processing_time_ms,
            error_message: self.failure_reason(),
        }
    }

    fn into_result(
        self,
        attempt_id: Uuid,
        mode: RecognitionMode,
        processing_time_ms: i64,
        matching: &MatchingConfig,
    ) -> RecognitionResult {
        let confidence = self.confidence();
        let match_method = self.match_method();
        let error = self.failure_reason();

        let matched = match self.outcome {
            MatchOutcome::Success => self.top().map(MatchedProduct::from),
            _ => None,
        };

        let candidates = match (mode, self.outcome) {
            (RecognitionMode::Test, _) => self.ranked,
            (RecognitionMode::Standard, MatchOutcome::ManualReview) => self
                .ranked
                .into_iter()
                .take(matching.review_candidate_count)
                .collect(),
            _ => Vec::new(),
        };

        RecognitionResult {
            status: self.outcome.as_str(mode).to_string(),
            extracted: Some(self.extraction.record),
            confidence,
            matched,
            match_method,
            variants: self.variants,
            candidates,
            error,
            raw_response: None,
            attempt_id,
            processing_time_ms,
            tokens_used: self.extraction.tokens_used,
        }
    }
}

enum PipelineError {
    Extraction(ExtractionError),
    Common(cellar_common::Error),
}

impl From<ExtractionError> for PipelineError {
    fn from(err: ExtractionError) -> Self {
        PipelineError::Extraction(err)
    }
}

impl From<cellar_common::Error> for PipelineError {
    fn from(err: cellar_common::Error) -> Self {
        PipelineError::Common(err)
    }
}

/// Label recognition orchestrator
#[derive(Clone)]
pub struct MatchEngine {
    db: SqlitePool,
    vision: Arc<dyn LabelVision>,
    embeddings: Option<Arc<dyn EmbeddingProvider>>,
    config: Arc<TomlConfig>,
    event_bus: EventBus,
}

impl MatchEngine {
    pub fn new(
        db: SqlitePool,
        vision: Arc<dyn LabelVision>,
        embeddings: Option<Arc<dyn EmbeddingProvider>>,
        config: Arc<TomlConfig>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            db,
            vision,
            embeddings,
            config,
            event_bus,
        }
    }

    /// Run one recognition attempt end to end
    ///
    /// Business outcomes (including unparseable model output) are `Ok`.
    /// Provider failures are recorded on the attempt and returned as
    /// `RecognitionError::Provider`.
    pub async fn recognize(
        &self,
        request: RecognitionRequest,
    ) -> Result<RecognitionResult, RecognitionError> {
        let started = Instant::now();
        let settings = resolve_vision_settings(&self.db, &self.config).await?;

        let prompt_version = match request.mode {
            RecognitionMode::Standard => self.config.vision.prompt_version.clone(),
            RecognitionMode::Test => format!("{}-test", self.config.vision.prompt_version),
        };
        let attempt = RecognitionAttempt::start(
            request.user_id.clone(),
            request.session_id.clone(),
            settings.model.clone(),
            prompt_version,
        );
        attempts::insert_attempt(&self.db, &attempt).await?;

        info!(
            attempt_id = %attempt.id,
            user_id = %attempt.user_id,
            model = %attempt.model_used,
            "Recognition attempt started"
        );

        let pipeline = self.run_pipeline(&request, &settings).await;
        let elapsed_ms = started.elapsed().as_millis() as i64;

        match pipeline {
            Ok(decision) => {
                let completion = decision.completion(elapsed_ms);
                attempts::finalize_attempt(
                    &self.db,
                    attempt.id,
                    decision.outcome.attempt_status(),
                    &completion,
                )
                .await?;

                let result =
                    decision.into_result(attempt.id, request.mode, elapsed_ms, &self.config.matching);

                info!(
                    attempt_id = %attempt.id,
                    status = %result.status,
                    score = result.confidence,
                    elapsed_ms,
                    "Recognition attempt finished"
                );
                self.emit(&attempt, &result.status, completion.matched_product_id, result.confidence);

                Ok(result)
            }
            Err(PipelineError::Extraction(ExtractionError::Parse {
                message,
                raw,
                tokens_used,
            })) => {
                let completion = AttemptCompletion {
                    raw_response: Some(raw.clone()),
                    tokens_used,
                    processing_time_ms: elapsed_ms,
                    error_message: Some(message.clone()),
                    ..Default::default()
                };
                attempts::finalize_attempt(&self.db, attempt.id, AttemptStatus::Failed, &completion)
                    .await?;

                let status = MatchOutcome::Failed.as_str(request.mode).to_string();
                self.emit(&attempt, &status, None, 0);

                Ok(RecognitionResult {
                    status,
                    extracted: None,
                    confidence: 0,
                    matched: None,
                    match_method: None,
                    variants: None,
                    candidates: Vec::new(),
                    error: Some(message),
                    raw_response: Some(raw),
                    attempt_id: attempt.id,
                    processing_time_ms: elapsed_ms,
                    tokens_used,
                })
            }
            Err(PipelineError::Extraction(source)) => {
                warn!(attempt_id = %attempt.id, "Vision provider failed: {}", source);
                let completion = AttemptCompletion {
                    processing_time_ms: elapsed_ms,
                    error_message: Some(source.to_string()),
                    ..Default::default()
                };
                attempts::finalize_attempt(&self.db, attempt.id, AttemptStatus::Failed, &completion)
                    .await?;
                self.emit(&attempt, MatchOutcome::Failed.as_str(request.mode), None, 0);

                Err(RecognitionError::Provider {
                    attempt_id: attempt.id,
                    source,
                })
            }
            Err(PipelineError::Common(err)) => {
                error!(attempt_id = %attempt.id, "Recognition pipeline failed: {}", err);
                let completion = AttemptCompletion {
                    processing_time_ms: elapsed_ms,
                    error_message: Some(err.to_string()),
                    ..Default::default()
                };
                if let Err(finalize_err) =
                    attempts::finalize_attempt(&self.db, attempt.id, AttemptStatus::Failed, &completion)
                        .await
                {
                    error!(
                        attempt_id = %attempt.id,
                        "Could not record failed attempt: {}", finalize_err
                    );
                }

                Err(RecognitionError::Common(err))
            }
        }
    }

    async fn run_pipeline(
        &self,
        request: &RecognitionRequest,
        settings: &VisionSettings,
    ) -> Result<Decision, PipelineError> {
        let extraction = vision_client::extract(self.vision.as_ref(), &request.image, settings).await?;

        let candidates = if extraction.record.is_empty() {
            Vec::new()
        } else {
            CandidateRetriever::new(
                self.db.clone(),
                self.embeddings.clone(),
                self.config.matching.clone(),
            )
            .retrieve(&extraction.record)
            .await?
        };

        let ranked = rank_candidates(
            candidates,
            &extraction.record,
            &self.config.scoring,
            &self.config.matching,
        );

        let mut outcome = decide(
            ranked.first().map(|c| c.score),
            self.config.matching.auto_match_threshold,
        );
        let mut variants = None;

        // Without a legible vintage the operator picks among same-name variants
        if outcome == MatchOutcome::Success
            && request.mode == RecognitionMode::Standard
            && extraction.record.vintage.is_none()
        {
            if let Some(top) = ranked.first() {
                let found = catalog::find_active_variants(&self.db, &top.name).await?;
                if found.len() > 1 {
                    outcome = MatchOutcome::SelectVariant;
                    variants = Some(found.into_iter().map(MatchedProduct::from).collect());
                }
            }
        }

        Ok(Decision {
            extraction,
            ranked,
            outcome,
            variants,
        })
    }

    fn emit(
        &self,
        attempt: &RecognitionAttempt,
        outcome: &str,
        matched_product_id: Option<String>,
        confidence: i32,
    ) {
        self.event_bus.emit_lossy(CellarEvent::LabelRecognized {
            attempt_id: attempt.id,
            user_id: attempt.user_id.clone(),
            session_id: attempt.session_id.clone(),
            outcome: outcome.to_string(),
            matched_product_id,
            confidence,
            timestamp: Utc::now(),
        });
    }
}

//! Vision model client (attribute extraction)
//!
//! Sends one label photo plus a fixed JSON-schema prompt to an
//! OpenAI-compatible chat completions endpoint and parses the reply into an
//! `ExtractionRecord`. Extraction is stateless; nothing is retried here.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use cellar_common::config::VisionConfig;

use crate::config::VisionSettings;
use crate::models::ExtractionRecord;

const USER_AGENT: &str = concat!("cellar-ingest/", env!("CARGO_PKG_VERSION"));

/// Instruction prompt; the field list mirrors `ExtractionRecord`
pub const LABEL_PROMPT: &str = r#"You are reading the label of a wine bottle from a photo. Extract the following fields and respond with ONLY a JSON object, no prose and no markdown.

{
  "product_name": string or null,     // wine name as printed, without producer
  "producer": string or null,         // winery / house / brand
  "vintage": integer or null,         // harvest year, 1900-2100
  "region": string or null,
  "country": string or null,
  "grape_variety": string or null,
  "bottle_size_ml": integer or null,  // e.g. 750
  "appellation": string or null,      // DOC, AOC, DOCG, ...
  "alcohol_content": number or null,  // % ABV, e.g. 13.5
  "confidence": number,               // 0.0-1.0, how legible the label was
  "label_text_raw": string            // all text you can read on the label
}

Use null for anything you cannot read. Never guess a vintage."#;

/// Attribute extraction failures
///
/// 429 and 402 are kept distinct so callers can back off or switch to
/// manual entry.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Vision provider rate limit reached: {0}")]
    RateLimited(String),

    #[error("Vision provider quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("Vision provider error {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Model output could not be parsed: {message}")]
    Parse {
        message: String,
        raw: String,
        tokens_used: Option<i64>,
    },

    #[error("Vision provider not configured: {0}")]
    NotConfigured(String),
}

/// Raw completion text and token usage of one vision call
#[derive(Debug, Clone)]
pub struct VisionReply {
    pub text: String,
    pub tokens_used: Option<i64>,
}

/// Validated extraction plus what is kept for the audit trail
#[derive(Debug, Clone)]
pub struct Extraction {
    pub record: ExtractionRecord,
    pub raw_text: String,
    pub tokens_used: Option<i64>,
}

/// Decoded label photo ready to be sent as a data URI
#[derive(Debug, Clone, PartialEq)]
pub struct LabelImage {
    pub mime_type: &'static str,
    pub base64_data: String,
}

impl LabelImage {
    /// Validate caller-supplied base64 (optionally a `data:` URI)
    pub fn from_base64(input: &str) -> Result<Self, String> {
        let trimmed = input.trim();
        let payload = match trimmed.split_once(";base64,") {
            Some((prefix, data)) if prefix.starts_with("data:") => data,
            _ => trimmed,
        };

        if payload.is_empty() {
            return Err("image_base64 is empty".to_string());
        }

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .map_err(|e| format!("image_base64 is not valid base64: {}", e))?;

        Ok(Self {
            mime_type: sniff_mime_type(&bytes),
            base64_data: payload.to_string(),
        })
    }

    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64_data)
    }
}

fn sniff_mime_type(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else {
        "image/jpeg"
    }
}

/// Vision-capable model behind the extractor
#[async_trait]
pub trait LabelVision: Send + Sync {
    /// Run the label prompt against one image
    async fn read_label(
        &self,
        image: &LabelImage,
        settings: &VisionSettings,
    ) -> Result<VisionReply, ExtractionError>;
}

/// Extract structured attributes from a label photo
///
/// Code fences are stripped before parsing; unparseable output becomes
/// `ExtractionError::Parse` with the raw text attached.
pub async fn extract(
    vision: &dyn LabelVision,
    image: &LabelImage,
    settings: &VisionSettings,
) -> Result<Extraction, ExtractionError> {
    if settings.api_key.is_none() {
        return Err(ExtractionError::NotConfigured(
            "Set CELLAR_VISION_API_KEY, the vision_api_key setting, or [vision] api_key".to_string(),
        ));
    }

    let reply = vision.read_label(image, settings).await?;

    match ExtractionRecord::from_model_output(&reply.text) {
        Ok(record) => {
            debug!(
                product_name = ?record.product_name,
                vintage = ?record.vintage,
                confidence = record.confidence,
                "Label attributes extracted"
            );
            Ok(Extraction {
                record,
                raw_text: reply.text,
                tokens_used: reply.tokens_used,
            })
        }
        Err(failure) => {
            warn!("Vision output rejected: {}", failure.message);
            Err(ExtractionError::Parse {
                message: failure.message,
                raw: failure.raw,
                tokens_used: reply.tokens_used,
            })
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    total_tokens: Option<i64>,
}

/// HTTP client for an OpenAI-compatible chat completions endpoint
pub struct VisionClient {
    http_client: reqwest::Client,
    endpoint: String,
    max_tokens: u32,
}

impl VisionClient {
    pub fn new(config: &VisionConfig) -> Result<Self, ExtractionError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ExtractionError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: config.endpoint.clone(),
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl LabelVision for VisionClient {
    async fn read_label(
        &self,
        image: &LabelImage,
        settings: &VisionSettings,
    ) -> Result<VisionReply, ExtractionError> {
        let api_key = settings
            .api_key
            .as_deref()
            .ok_or_else(|| ExtractionError::NotConfigured("Vision API key missing".to_string()))?;

        let request = ChatRequest {
            model: &settings.model,
            max_tokens: self.max_tokens,
            temperature: 0.0,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: LABEL_PROMPT.to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: image.data_uri(),
                        },
                    },
                ],
            }],
        };

        debug!(model = %settings.model, mime = image.mime_type, "Calling vision model");

        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ExtractionError::Network(e.to_string()))?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::RateLimited(body));
        }

        if status == reqwest::StatusCode::PAYMENT_REQUIRED {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::QuotaExhausted(body));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse = response.json().await.map_err(|e| ExtractionError::Provider {
            status: status.as_u16(),
            body: format!("Invalid completion envelope: {}", e),
        })?;

        let tokens_used = chat.usage.and_then(|u| u.total_tokens);
        let text = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        info!(tokens_used = ?tokens_used, "Vision model replied");

        Ok(VisionReply { text, tokens_used })
    }
}

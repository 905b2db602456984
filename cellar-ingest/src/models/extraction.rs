//! Label extraction record
//!
//! The vision model's output is untrusted: every field is read leniently,
//! type-checked and range-checked on its own. A field that fails validation
//! becomes `None` ("not legible") instead of failing the whole extraction.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Accepted vintage range (inclusive)
pub const VINTAGE_MIN: i32 = 1900;
pub const VINTAGE_MAX: i32 = 2100;

/// Structured attributes read from one photographed label
///
/// Immutable once built; embedded in the recognition attempt snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub product_name: Option<String>,
    pub producer: Option<String>,
    pub vintage: Option<i32>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub grape_variety: Option<String>,
    pub bottle_size_ml: Option<i32>,
    pub appellation: Option<String>,
    pub alcohol_content: Option<f64>,
    /// Model's self-reported reading confidence (0.0-1.0)
    pub confidence: f64,
    pub label_text_raw: Option<String>,
}

/// Why a model response could not become an ExtractionRecord
#[derive(Debug, Clone, PartialEq)]
pub struct ParseFailure {
    pub message: String,
    /// Text as received from the model, before fence stripping
    pub raw: String,
}

impl ExtractionRecord {
    /// Parse raw model output into a validated record
    ///
    /// Markdown code fences are stripped first. The remaining text must be
    /// a JSON object; anything else is a `ParseFailure` carrying the raw text.
    pub fn from_model_output(raw: &str) -> Result<Self, ParseFailure> {
        let body = strip_code_fences(raw);

        let value: Value = serde_json::from_str(body).map_err(|e| ParseFailure {
            message: format!("Model output is not valid JSON: {}", e),
            raw: raw.to_string(),
        })?;

        let object = value.as_object().ok_or_else(|| ParseFailure {
            message: "Model output is not a JSON object".to_string(),
            raw: raw.to_string(),
        })?;

        Ok(Self::from_json_object(object))
    }

    fn from_json_object(obj: &Map<String, Value>) -> Self {
        Self {
            product_name: text_field(obj, &["product_name", "name", "wine_name"]),
            producer: text_field(obj, &["producer", "winery", "brand"]),
            vintage: field(obj, &["vintage", "year"]).and_then(parse_vintage),
            region: text_field(obj, &["region"]),
            country: text_field(obj, &["country"]),
            grape_variety: text_field(obj, &["grape_variety", "grape", "varietal"]),
            bottle_size_ml: field(obj, &["bottle_size_ml", "volume_ml", "bottle_size"])
                .and_then(parse_volume_ml),
            appellation: text_field(obj, &["appellation"]),
            alcohol_content: field(obj, &["alcohol_content", "abv"]).and_then(parse_alcohol),
            confidence: field(obj, &["confidence"])
                .and_then(parse_confidence)
                .unwrap_or(0.0),
            label_text_raw: text_field(obj, &["label_text_raw", "label_text", "raw_text"]),
        }
    }

    /// True when nothing usable for catalog search was read
    pub fn is_empty(&self) -> bool {
        self.product_name.is_none()
            && self.producer.is_none()
            && self.region.is_none()
            && self.grape_variety.is_none()
    }
}

/// Remove a surrounding ```json ... ``` (or bare ```) wrapper
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Drop the info string ("json") on the opening fence line
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };

    rest.trim_end()
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}

fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

fn text_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    let value = field(obj, keys)?;
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };

    let lowered = text.to_lowercase();
    if text.is_empty() || lowered == "null" || lowered == "unknown" || lowered == "n/a" {
        None
    } else {
        Some(text)
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().replace(',', ".").parse().ok(),
        _ => None,
    }
}

fn parse_vintage(value: &Value) -> Option<i32> {
    let year = match value {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };

    if (VINTAGE_MIN as i64..=VINTAGE_MAX as i64).contains(&year) {
        Some(year as i32)
    } else {
        None
    }
}

/// Accepts 750, "750", "750ml", "75cl", "0.75 l", "1.5L"
fn parse_volume_ml(value: &Value) -> Option<i32> {
    let ml = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let lowered = s.trim().to_lowercase().replace(',', ".");
            let split = lowered
                .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                .unwrap_or(lowered.len());
            let (number, unit) = lowered.split_at(split);
            let amount: f64 = number.parse().ok()?;
            match unit.trim() {
                "" | "ml" => amount,
                "cl" => amount * 10.0,
                "l" | "lt" | "ltr" => amount * 1000.0,
                _ => return None,
            }
        }
        _ => return None,
    };

    if ml > 0.0 && ml <= 30_000.0 {
        Some(ml.round() as i32)
    } else {
        None
    }
}

fn parse_alcohol(value: &Value) -> Option<f64> {
    as_f64(value).filter(|abv| *abv > 0.0 && *abv <= 100.0)
}

/// Confidence reported as 0-1 or as a percentage
fn parse_confidence(value: &Value) -> Option<f64> {
    let raw = as_f64(value)?;
    if !(0.0..=100.0).contains(&raw) {
        return None;
    }
    Some(if raw > 1.0 { raw / 100.0 } else { raw })
}

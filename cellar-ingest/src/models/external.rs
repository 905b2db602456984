//! Records as listed by the external inventory system
//!
//! Identifiers arrive as JSON strings or numbers depending on the entity;
//! both are normalized to strings. Unknown fields are ignored.

use serde::{Deserialize, Deserializer};

/// External identifier, normalized to its string form
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalId(pub String);

impl ExternalId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ExternalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Integer(i64),
}

impl<'de> Deserialize<'de> for ExternalId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let id = match RawId::deserialize(deserializer)? {
            RawId::Text(s) => s.trim().to_string(),
            RawId::Integer(n) => n.to_string(),
        };

        if id.is_empty() {
            return Err(serde::de::Error::custom("empty external id"));
        }
        Ok(ExternalId(id))
    }
}

/// Optional reference; null, blank and zero all mean "no reference"
fn optional_reference<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<ExternalId>, D::Error> {
    let raw: Option<RawId> = Option::deserialize(deserializer)?;
    Ok(match raw {
        Some(RawId::Text(s)) if !s.trim().is_empty() => Some(ExternalId(s.trim().to_string())),
        Some(RawId::Integer(n)) if n != 0 => Some(ExternalId(n.to_string())),
        _ => None,
    })
}

fn active_default() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExternalStore {
    pub id: ExternalId,
    pub name: String,
    #[serde(default = "active_default", alias = "active")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExternalUnit {
    pub id: ExternalId,
    pub name: String,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub conversion_factor: Option<f64>,
    #[serde(default, deserialize_with = "optional_reference", alias = "base_unit")]
    pub base_unit_id: Option<ExternalId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExternalCategory {
    pub id: ExternalId,
    pub name: String,
    #[serde(default, deserialize_with = "optional_reference", alias = "parent")]
    pub parent_id: Option<ExternalId>,
    #[serde(default = "active_default", alias = "active")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExternalProduct {
    pub id: ExternalId,
    pub name: String,
    #[serde(default)]
    pub producer: Option<String>,
    #[serde(default)]
    pub vintage: Option<i32>,
    #[serde(default)]
    pub volume_ml: Option<i32>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default, deserialize_with = "optional_reference", alias = "category")]
    pub category_id: Option<ExternalId>,
    #[serde(default, deserialize_with = "optional_reference", alias = "unit")]
    pub unit_id: Option<ExternalId>,
    #[serde(default)]
    pub barcodes: Vec<String>,
    #[serde(default = "active_default", alias = "active")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExternalPrice {
    #[serde(alias = "id")]
    pub product_id: ExternalId,
    pub price: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExternalStock {
    pub product_id: ExternalId,
    pub store_id: ExternalId,
    pub quantity: f64,
}

impl ExternalStock {
    /// Cache key of a stock row in `external_objects`
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.product_id, self.store_id)
    }
}

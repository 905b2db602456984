//! Catalog candidates considered during one recognition attempt

use serde::{Deserialize, Serialize};

/// Retrieval strategy that produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMethod {
    /// Character-trigram fuzzy text similarity
    Trigram,
    /// Vector embedding nearest neighbour
    Embedding,
    /// Returned by both trigram and embedding search
    Hybrid,
    /// Case-insensitive substring match of the whole name/producer
    Ilike,
    /// Substring match of a single significant word
    WordFallback,
}

impl RetrievalMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMethod::Trigram => "trigram",
            RetrievalMethod::Embedding => "embedding",
            RetrievalMethod::Hybrid => "hybrid",
            RetrievalMethod::Ilike => "ilike",
            RetrievalMethod::WordFallback => "word_fallback",
        }
    }
}

impl std::fmt::Display for RetrievalMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Active catalog row as loaded for matching
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct CatalogProduct {
    pub id: String,
    pub name: String,
    pub producer: Option<String>,
    pub vintage: Option<i32>,
    pub volume_ml: Option<i32>,
    pub region: Option<String>,
    pub country: Option<String>,
}

impl CatalogProduct {
    /// Text compared against the label search phrase
    pub fn search_text(&self) -> String {
        [Some(self.name.as_str()), self.producer.as_deref(), self.region.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A catalog entry proposed as a possible match
///
/// Unique by `id` within one retrieval pass. Never persisted except inside
/// the attempt's response payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateProduct {
    pub id: String,
    pub name: String,
    pub producer: Option<String>,
    pub vintage: Option<i32>,
    pub volume_ml: Option<i32>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub retrieval_method: RetrievalMethod,
    /// Method-specific raw similarity
    pub retrieval_score: f64,
    /// Post-scoring confidence (0-100)
    pub score: i32,
}

impl CandidateProduct {
    pub fn from_catalog(product: &CatalogProduct, method: RetrievalMethod, retrieval_score: f64) -> Self {
        Self {
            id: product.id.clone(),
            name: product.name.clone(),
            producer: product.producer.clone(),
            vintage: product.vintage,
            volume_ml: product.volume_ml,
            region: product.region.clone(),
            country: product.country.clone(),
            retrieval_method: method,
            retrieval_score,
            score: 0,
        }
    }
}

/// Identity fields of a matched product returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedProduct {
    pub id: String,
    pub name: String,
    pub producer: Option<String>,
    pub vintage: Option<i32>,
    pub volume_ml: Option<i32>,
    pub region: Option<String>,
    pub country: Option<String>,
}

impl From<&CandidateProduct> for MatchedProduct {
    fn from(c: &CandidateProduct) -> Self {
        Self {
            id: c.id.clone(),
            name: c.name.clone(),
            producer: c.producer.clone(),
            vintage: c.vintage,
            volume_ml: c.volume_ml,
            region: c.region.clone(),
            country: c.country.clone(),
        }
    }
}

impl From<CatalogProduct> for MatchedProduct {
    fn from(p: CatalogProduct) -> Self {
        Self {
            id: p.id,
            name: p.name,
            producer: p.producer,
            vintage: p.vintage,
            volume_ml: p.volume_ml,
            region: p.region,
            country: p.country,
        }
    }
}

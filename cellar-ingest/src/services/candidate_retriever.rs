//! Candidate retrieval
//!
//! Queries the active catalog snapshot with up to three strategies:
//! 1. Trigram similarity over the combined search phrase (always)
//! 2. Embedding nearest neighbour (when a provider is configured)
//! 3. Substring fallback, then per-word fallback, when the merged set is small
//!
//! Results are keyed by catalog id. An id found by both 1 and 2 becomes
//! `hybrid` with the larger of the two raw scores.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use cellar_common::config::MatchingConfig;
use cellar_common::Result;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::db::catalog::{self, StoredEmbedding};
use crate::models::{CandidateProduct, CatalogProduct, ExtractionRecord, RetrievalMethod};
use crate::services::embedding_client::{cosine_similarity, EmbeddingProvider};
use crate::services::trigram;

/// Maximum number of words tried by the per-word fallback
const MAX_FALLBACK_WORDS: usize = 3;
/// Shorter words are too unspecific to search for on their own
const MIN_FALLBACK_WORD_CHARS: usize = 4;

pub struct CandidateRetriever {
    db: SqlitePool,
    embeddings: Option<Arc<dyn EmbeddingProvider>>,
    config: MatchingConfig,
}

impl CandidateRetriever {
    pub fn new(
        db: SqlitePool,
        embeddings: Option<Arc<dyn EmbeddingProvider>>,
        config: MatchingConfig,
    ) -> Self {
        Self {
            db,
            embeddings,
            config,
        }
    }

    /// Deduplicated candidates for one extraction (unscored)
    pub async fn retrieve(&self, extraction: &ExtractionRecord) -> Result<Vec<CandidateProduct>> {
        let Some(phrase) = search_phrase(extraction) else {
            debug!("Nothing legible to search for");
            return Ok(Vec::new());
        };

        let catalog = catalog::load_active_products(&self.db).await?;
        if catalog.is_empty() {
            return Ok(Vec::new());
        }

        let lexical = trigram_candidates(
            &catalog,
            &phrase,
            extraction.product_name.as_deref(),
            &self.config,
        );

        let semantic = match self.embedding_candidates(&catalog, &phrase).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Embedding search failed, continuing with trigram results: {}", e);
                Vec::new()
            }
        };

        let mut merged = merge_candidates(lexical, semantic);

        if merged.len() < self.config.fallback_trigger_count {
            let added = append_fallback_candidates(&mut merged, &catalog, extraction, &phrase, &self.config);
            debug!(added, "Substring fallback ran");
        }

        debug!(
            phrase = %phrase,
            candidates = merged.len(),
            "Candidate retrieval finished"
        );

        Ok(merged)
    }

    async fn embedding_candidates(
        &self,
        catalog: &[CatalogProduct],
        phrase: &str,
    ) -> Result<Vec<CandidateProduct>> {
        let Some(provider) = &self.embeddings else {
            return Ok(Vec::new());
        };

        let stored = catalog::load_active_embeddings(&self.db).await?;
        if stored.is_empty() {
            return Ok(Vec::new());
        }

        let query = match provider.embed(&phrase.to_uppercase()).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!("Embedding provider unavailable: {}", e);
                return Ok(Vec::new());
            }
        };

        Ok(nearest_neighbours(catalog, &stored, &query, &self.config))
    }
}

/// `product_name producer region grape_variety`, whichever are present
pub fn search_phrase(extraction: &ExtractionRecord) -> Option<String> {
    let parts: Vec<&str> = [
        extraction.product_name.as_deref(),
        extraction.producer.as_deref(),
        extraction.region.as_deref(),
        extraction.grape_variety.as_deref(),
    ]
    .into_iter()
    .flatten()
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

/// Best of phrase-vs-search-text and name-vs-name similarity
pub fn trigram_candidates(
    catalog: &[CatalogProduct],
    phrase: &str,
    product_name: Option<&str>,
    config: &MatchingConfig,
) -> Vec<CandidateProduct> {
    let mut hits: Vec<CandidateProduct> = catalog
        .iter()
        .filter_map(|product| {
            let phrase_score = trigram::similarity(phrase, &product.search_text());
            let name_score = product_name
                .map(|name| trigram::similarity(name, &product.name))
                .unwrap_or(0.0);
            let score = phrase_score.max(name_score);

            (score >= config.trigram_min_similarity)
                .then(|| CandidateProduct::from_catalog(product, RetrievalMethod::Trigram, score))
        })
        .collect();

    sort_by_raw_score(&mut hits);
    hits.truncate(config.trigram_limit);
    hits
}

pub fn nearest_neighbours(
    catalog: &[CatalogProduct],
    stored: &[StoredEmbedding],
    query: &[f32],
    config: &MatchingConfig,
) -> Vec<CandidateProduct> {
    let by_id: HashMap<&str, &CatalogProduct> =
        catalog.iter().map(|p| (p.id.as_str(), p)).collect();

    let mut hits: Vec<CandidateProduct> = stored
        .iter()
        .filter_map(|embedding| {
            let product = by_id.get(embedding.product_id.as_str())?;
            let score = cosine_similarity(query, &embedding.vector);
            (score >= config.embedding_min_similarity)
                .then(|| CandidateProduct::from_catalog(product, RetrievalMethod::Embedding, score))
        })
        .collect();

    sort_by_raw_score(&mut hits);
    hits.truncate(config.embedding_limit);
    hits
}

/// Key by id; both-strategy hits become `hybrid` with the max raw score
pub fn merge_candidates(
    lexical: Vec<CandidateProduct>,
    semantic: Vec<CandidateProduct>,
) -> Vec<CandidateProduct> {
    let mut merged: Vec<CandidateProduct> = Vec::with_capacity(lexical.len() + semantic.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for candidate in lexical.into_iter().chain(semantic) {
        match index.get(&candidate.id) {
            Some(&pos) => {
                let existing = &mut merged[pos];
                if existing.retrieval_method != candidate.retrieval_method {
                    existing.retrieval_method = RetrievalMethod::Hybrid;
                }
                existing.retrieval_score = existing.retrieval_score.max(candidate.retrieval_score);
            }
            None => {
                index.insert(candidate.id.clone(), merged.len());
                merged.push(candidate);
            }
        }
    }

    merged
}

/// Substring then per-word fallback; returns the number of candidates added
///
/// Only products not already present are added, and the two fallbacks
/// together add at most `fallback_limit` candidates.
pub fn append_fallback_candidates(
    merged: &mut Vec<CandidateProduct>,
    catalog: &[CatalogProduct],
    extraction: &ExtractionRecord,
    phrase: &str,
    config: &MatchingConfig,
) -> usize {
    let mut seen: HashSet<String> = merged.iter().map(|c| c.id.clone()).collect();
    let mut ordered: Vec<&CatalogProduct> = catalog.iter().collect();
    ordered.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.id.cmp(&b.id))
    });

    let needles: Vec<String> = [extraction.product_name.as_deref(), extraction.producer.as_deref()]
        .into_iter()
        .flatten()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();

    let mut added = add_substring_hits(
        merged,
        &mut seen,
        &ordered,
        &needles,
        RetrievalMethod::Ilike,
        config.ilike_score,
        config.fallback_limit,
    );

    if merged.len() < config.fallback_trigger_count && added < config.fallback_limit {
        let words = significant_words(phrase);
        added += add_substring_hits(
            merged,
            &mut seen,
            &ordered,
            &words,
            RetrievalMethod::WordFallback,
            config.word_fallback_score,
            config.fallback_limit - added,
        );
    }

    added
}

fn add_substring_hits(
    merged: &mut Vec<CandidateProduct>,
    seen: &mut HashSet<String>,
    catalog: &[&CatalogProduct],
    needles: &[String],
    method: RetrievalMethod,
    raw_score: f64,
    limit: usize,
) -> usize {
    let mut added = 0;

    for needle in needles {
        for product in catalog {
            if added >= limit {
                return added;
            }
            if seen.contains(&product.id) {
                continue;
            }

            let in_name = product.name.to_lowercase().contains(needle.as_str());
            let in_producer = product
                .producer
                .as_deref()
                .map(|p| p.to_lowercase().contains(needle.as_str()))
                .unwrap_or(false);

            if in_name || in_producer {
                seen.insert(product.id.clone());
                merged.push(CandidateProduct::from_catalog(product, method, raw_score));
                added += 1;
            }
        }
    }

    added
}

/// Distinct words of at least four characters, longest first, at most three
pub fn significant_words(phrase: &str) -> Vec<String> {
    let mut words: Vec<String> = Vec::new();
    for word in phrase.split(|c: char| !c.is_alphanumeric()) {
        let lowered = word.to_lowercase();
        if lowered.chars().count() >= MIN_FALLBACK_WORD_CHARS && !words.contains(&lowered) {
            words.push(lowered);
        }
    }

    // Stable: equal lengths keep phrase order
    words.sort_by_key(|w| std::cmp::Reverse(w.chars().count()));
    words.truncate(MAX_FALLBACK_WORDS);
    words
}

fn sort_by_raw_score(hits: &mut [CandidateProduct]) {
    hits.sort_by(|a, b| {
        b.retrieval_score
            .total_cmp(&a.retrieval_score)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(id: &str, name: &str, producer: Option<&str>) -> CatalogProduct {
        CatalogProduct {
            id: id.to_string(),
            name: name.to_string(),
            producer: producer.map(String::from),
            vintage: None,
            volume_ml: Some(750),
            region: None,
            country: None,
        }
    }

    fn candidate(id: &str, method: RetrievalMethod, score: f64) -> CandidateProduct {
        CandidateProduct::from_catalog(&product(id, id, None), method, score)
    }

    #[test]
    fn test_search_phrase_skips_missing_fields() {
        let extraction = ExtractionRecord {
            product_name: Some("Barca Velha".into()),
            region: Some("  ".into()),
            grape_variety: Some("Touriga Nacional".into()),
            ..Default::default()
        };
        assert_eq!(
            search_phrase(&extraction).as_deref(),
            Some("Barca Velha Touriga Nacional")
        );
        assert_eq!(search_phrase(&ExtractionRecord::default()), None);
    }

    #[test]
    fn test_merge_promotes_to_hybrid_with_max_score() {
        let lexical = vec![
            candidate("a", RetrievalMethod::Trigram, 0.4),
            candidate("b", RetrievalMethod::Trigram, 0.9),
        ];
        let semantic = vec![
            candidate("a", RetrievalMethod::Embedding, 0.8),
            candidate("c", RetrievalMethod::Embedding, 0.5),
        ];

        let merged = merge_candidates(lexical, semantic);
        assert_eq!(merged.len(), 3);

        let a = merged.iter().find(|c| c.id == "a").unwrap();
        assert_eq!(a.retrieval_method, RetrievalMethod::Hybrid);
        assert_eq!(a.retrieval_score, 0.8);

        let b = merged.iter().find(|c| c.id == "b").unwrap();
        assert_eq!(b.retrieval_method, RetrievalMethod::Trigram);
        assert_eq!(b.retrieval_score, 0.9);
    }

    #[test]
    fn test_merge_keeps_max_when_trigram_is_stronger() {
        let merged = merge_candidates(
            vec![candidate("a", RetrievalMethod::Trigram, 0.95)],
            vec![candidate("a", RetrievalMethod::Embedding, 0.31)],
        );
        assert_eq!(merged[0].retrieval_method, RetrievalMethod::Hybrid);
        assert_eq!(merged[0].retrieval_score, 0.95);
    }

    #[test]
    fn test_trigram_candidates_are_limited_and_ordered() {
        let catalog: Vec<CatalogProduct> = (0..30)
            .map(|i| product(&format!("p{:02}", i), &format!("Quinta Nova {}", i), None))
            .chain(std::iter::once(product("x", "Quinta Nova", Some("Amorim"))))
            .collect();
        let config = MatchingConfig::default();

        let hits = trigram_candidates(&catalog, "Quinta Nova", Some("Quinta Nova"), &config);
        assert_eq!(hits.len(), config.trigram_limit);
        assert_eq!(hits[0].id, "x");
        assert!(hits.windows(2).all(|w| w[0].retrieval_score >= w[1].retrieval_score));
    }

    #[test]
    fn test_significant_words() {
        assert_eq!(
            significant_words("Vinho do Porto Tawny Reserva Porto"),
            vec!["reserva", "vinho", "porto"]
        );
    }

    #[test]
    fn test_fallback_only_adds_new_products_and_respects_cap() {
        let catalog: Vec<CatalogProduct> = (0..30)
            .map(|i| product(&format!("p{:02}", i), &format!("Reserva {}", i), Some("Casa Ferreirinha")))
            .collect();
        let extraction = ExtractionRecord {
            producer: Some("Ferreirinha".into()),
            ..Default::default()
        };
        let mut config = MatchingConfig::default();
        config.fallback_limit = 20;

        let mut merged = vec![CandidateProduct::from_catalog(&catalog[0], RetrievalMethod::Trigram, 0.2)];
        let added = append_fallback_candidates(&mut merged, &catalog, &extraction, "Ferreirinha", &config);

        assert_eq!(added, 20);
        assert_eq!(merged.len(), 21);
        assert!(merged[1..].iter().all(|c| c.retrieval_method == RetrievalMethod::Ilike));
        assert!(merged[1..].iter().all(|c| c.id != "p00"));
    }

    #[test]
    fn test_word_fallback_runs_when_substring_finds_too_little() {
        let catalog = vec![
            product("a", "Mouchão Tinto", Some("Herdade do Mouchão")),
            product("b", "Tonel 3-4", Some("Mouchão")),
        ];
        // OCR noise: full name does not occur anywhere
        let extraction = ExtractionRecord {
            product_name: Some("Mouchao Tonel Alentejo".into()),
            ..Default::default()
        };
        let config = MatchingConfig::default();
        let mut merged = Vec::new();

        append_fallback_candidates(&mut merged, &catalog, &extraction, "Mouchao Tonel Alentejo", &config);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, "b");
        assert_eq!(merged[0].retrieval_method, RetrievalMethod::WordFallback);
        assert_eq!(merged[0].retrieval_score, config.word_fallback_score);
    }
}

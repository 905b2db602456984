//! Candidate scoring
//!
//! Additive, field-independent point scale (weights from `[scoring]`):
//! name exact or partial, producer exact or partial, vintage, region,
//! retrieval-method bonus and `round(retrieval_score * multiplier)`.
//! The total is clamped to 0..=100.

use std::cmp::Ordering;

use cellar_common::config::{MatchingConfig, ScoringWeights};

use crate::models::{CandidateProduct, ExtractionRecord, RetrievalMethod};

/// How two optional text fields relate after trim + lowercase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextMatch {
    Exact,
    Partial,
    None,
}

fn compare_text(extracted: Option<&str>, candidate: Option<&str>) -> TextMatch {
    let (Some(a), Some(b)) = (extracted, candidate) else {
        return TextMatch::None;
    };
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();

    if a.is_empty() || b.is_empty() {
        TextMatch::None
    } else if a == b {
        TextMatch::Exact
    } else if a.contains(&b) || b.contains(&a) {
        TextMatch::Partial
    } else {
        TextMatch::None
    }
}

fn method_bonus(method: RetrievalMethod, weights: &ScoringWeights) -> i32 {
    match method {
        RetrievalMethod::Hybrid => weights.hybrid_bonus,
        RetrievalMethod::Embedding => weights.embedding_bonus,
        RetrievalMethod::Trigram => weights.trigram_bonus,
        RetrievalMethod::Ilike | RetrievalMethod::WordFallback => weights.fallback_bonus,
    }
}

/// Points for one candidate against the extraction
pub fn score_candidate(
    candidate: &CandidateProduct,
    extraction: &ExtractionRecord,
    weights: &ScoringWeights,
) -> i32 {
    let mut score = 0;

    score += match compare_text(extraction.product_name.as_deref(), Some(&candidate.name)) {
        TextMatch::Exact => weights.name_exact,
        TextMatch::Partial => weights.name_partial,
        TextMatch::None => 0,
    };

    score += match compare_text(extraction.producer.as_deref(), candidate.producer.as_deref()) {
        TextMatch::Exact => weights.producer_exact,
        TextMatch::Partial => weights.producer_partial,
        TextMatch::None => 0,
    };

    if let (Some(wanted), Some(actual)) = (extraction.vintage, candidate.vintage) {
        if wanted == actual {
            score += weights.vintage_exact;
        }
    }

    // One-directional: the catalog region may be more specific than the label
    if let (Some(region), Some(candidate_region)) =
        (extraction.region.as_deref(), candidate.region.as_deref())
    {
        let region = region.trim().to_lowercase();
        if !region.is_empty() && candidate_region.to_lowercase().contains(&region) {
            score += weights.region_contains;
        }
    }

    score += method_bonus(candidate.retrieval_method, weights);
    score += (candidate.retrieval_score * weights.raw_score_multiplier).round() as i32;

    score.clamp(0, 100)
}

/// Score every candidate and sort best first, then apply vintage refinement
pub fn rank_candidates(
    mut candidates: Vec<CandidateProduct>,
    extraction: &ExtractionRecord,
    weights: &ScoringWeights,
    matching: &MatchingConfig,
) -> Vec<CandidateProduct> {
    for candidate in candidates.iter_mut() {
        candidate.score = score_candidate(candidate, extraction, weights);
    }

    candidates.sort_by(compare_ranked);
    refine_by_vintage(&mut candidates, extraction, matching);
    candidates
}

/// Score desc, raw similarity desc, then name and id for determinism
fn compare_ranked(a: &CandidateProduct, b: &CandidateProduct) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| b.retrieval_score.total_cmp(&a.retrieval_score))
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.id.cmp(&b.id))
}

/// Promote a same-vintage candidate when the top one has another vintage
///
/// The first same-vintage candidate scoring at least
/// `variant_vintage_min_score` moves to the top with
/// `min(score + vintage_promotion_bonus, 100)`.
pub fn refine_by_vintage(
    candidates: &mut Vec<CandidateProduct>,
    extraction: &ExtractionRecord,
    matching: &MatchingConfig,
) {
    let Some(vintage) = extraction.vintage else {
        return;
    };
    let Some(top) = candidates.first() else {
        return;
    };
    if top.vintage == Some(vintage) {
        return;
    }

    let promoted = candidates.iter().position(|c| {
        c.vintage == Some(vintage) && c.score >= matching.variant_vintage_min_score
    });

    if let Some(pos) = promoted {
        let mut candidate = candidates.remove(pos);
        candidate.score = (candidate.score + matching.vintage_promotion_bonus).min(100);
        candidates.insert(0, candidate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CatalogProduct;

    fn candidate(
        id: &str,
        name: &str,
        producer: Option<&str>,
        vintage: Option<i32>,
        method: RetrievalMethod,
        raw: f64,
    ) -> CandidateProduct {
        let product = CatalogProduct {
            id: id.into(),
            name: name.into(),
            producer: producer.map(String::from),
            vintage,
            volume_ml: Some(750),
            region: Some("Douro".into()),
            country: Some("Portugal".into()),
        };
        CandidateProduct::from_catalog(&product, method, raw)
    }

    fn barca_velha_2011() -> ExtractionRecord {
        ExtractionRecord {
            product_name: Some("Barca Velha".into()),
            producer: Some("Ferreira".into()),
            vintage: Some(2011),
            ..Default::default()
        }
    }

    #[test]
    fn test_exact_fields_score_ninety_plus_bonuses() {
        let weights = ScoringWeights::default();
        let c = candidate("p1", "barca velha", Some("FERREIRA"), Some(2011), RetrievalMethod::Hybrid, 0.82);

        // 40 + 30 + 20 + hybrid 10 + round(8.2) = 108, clamped
        assert_eq!(score_candidate(&c, &barca_velha_2011(), &weights), 100);

        let c = candidate("p1", "Barca Velha", Some("Ferreira"), Some(2011), RetrievalMethod::Ilike, 0.0);
        assert_eq!(score_candidate(&c, &barca_velha_2011(), &weights), 90);
    }

    #[test]
    fn test_exact_name_excludes_partial_bonus() {
        let weights = ScoringWeights::default();
        let extraction = ExtractionRecord {
            product_name: Some("Pera Manca".into()),
            ..Default::default()
        };

        let exact = candidate("a", "Pera Manca", None, None, RetrievalMethod::Ilike, 0.0);
        let partial = candidate("b", "Pera Manca Branco", None, None, RetrievalMethod::Ilike, 0.0);

        assert_eq!(score_candidate(&exact, &extraction, &weights), 40);
        assert_eq!(score_candidate(&partial, &extraction, &weights), 25);
    }

    #[test]
    fn test_score_monotonicity() {
        let weights = ScoringWeights::default();
        let extraction = barca_velha_2011();

        let full = candidate("a", "Barca Velha", Some("Ferreira"), Some(2011), RetrievalMethod::Ilike, 0.0);
        let partial = candidate("b", "Barca Velha Reserva", None, Some(1999), RetrievalMethod::Ilike, 0.0);

        assert!(score_candidate(&full, &extraction, &weights) >= 90);
        assert!(score_candidate(&partial, &extraction, &weights) <= 25);
    }

    #[test]
    fn test_region_containment_is_one_directional() {
        let weights = ScoringWeights::default();
        let mut extraction = ExtractionRecord {
            region: Some("douro".into()),
            ..Default::default()
        };
        let mut c = candidate("a", "X", None, None, RetrievalMethod::Ilike, 0.0);
        c.region = Some("Douro Superior".into());
        assert_eq!(score_candidate(&c, &extraction, &weights), 10);

        extraction.region = Some("Douro Superior".into());
        c.region = Some("Douro".into());
        assert_eq!(score_candidate(&c, &extraction, &weights), 0);
    }

    #[test]
    fn test_method_bonus_and_raw_score() {
        let weights = ScoringWeights::default();
        let extraction = ExtractionRecord::default();

        let score = |method, raw| {
            score_candidate(&candidate("a", "X", None, None, method, raw), &extraction, &weights)
        };
        assert_eq!(score(RetrievalMethod::Hybrid, 0.46), 15);
        assert_eq!(score(RetrievalMethod::Embedding, 0.5), 10);
        assert_eq!(score(RetrievalMethod::Trigram, 0.04), 3);
        assert_eq!(score(RetrievalMethod::WordFallback, 0.06), 1);
    }

    #[test]
    fn test_ranking_is_descending() {
        let ranked = rank_candidates(
            vec![
                candidate("weak", "Other", None, None, RetrievalMethod::Trigram, 0.2),
                candidate("strong", "Barca Velha", Some("Ferreira"), Some(2011), RetrievalMethod::Trigram, 0.9),
            ],
            &barca_velha_2011(),
            &ScoringWeights::default(),
            &MatchingConfig::default(),
        );

        assert_eq!(ranked[0].id, "strong");
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn test_vintage_refinement_promotes_matching_vintage() {
        let matching = MatchingConfig::default();
        let extraction = ExtractionRecord {
            vintage: Some(2015),
            ..Default::default()
        };

        let mut top = candidate("v2011", "Pera Manca", None, Some(2011), RetrievalMethod::Trigram, 0.0);
        top.score = 60;
        let mut same = candidate("v2015", "Pera Manca", None, Some(2015), RetrievalMethod::Trigram, 0.0);
        same.score = 45;
        let mut ranked = vec![top, same];

        refine_by_vintage(&mut ranked, &extraction, &matching);

        assert_eq!(ranked[0].id, "v2015");
        assert_eq!(ranked[0].score, 55);
        assert_eq!(ranked[1].id, "v2011");
    }

    #[test]
    fn test_vintage_refinement_requires_minimum_score() {
        let matching = MatchingConfig::default();
        let extraction = ExtractionRecord {
            vintage: Some(2015),
            ..Default::default()
        };

        let mut top = candidate("v2011", "A", None, Some(2011), RetrievalMethod::Trigram, 0.0);
        top.score = 60;
        let mut weak = candidate("v2015", "B", None, Some(2015), RetrievalMethod::Trigram, 0.0);
        weak.score = 29;
        let mut ranked = vec![top, weak];

        refine_by_vintage(&mut ranked, &extraction, &matching);
        assert_eq!(ranked[0].id, "v2011");
    }

    #[test]
    fn test_promotion_is_capped_at_hundred() {
        let matching = MatchingConfig::default();
        let extraction = ExtractionRecord {
            vintage: Some(2015),
            ..Default::default()
        };
        let mut top = candidate("a", "A", None, Some(2011), RetrievalMethod::Trigram, 0.0);
        top.score = 100;
        let mut same = candidate("b", "B", None, Some(2015), RetrievalMethod::Trigram, 0.0);
        same.score = 95;
        let mut ranked = vec![top, same];

        refine_by_vintage(&mut ranked, &extraction, &matching);
        assert_eq!(ranked[0].score, 100);
    }
}

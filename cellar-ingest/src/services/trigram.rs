//! Character trigram similarity
//!
//! Words are lowercased and padded with two leading blanks and one trailing
//! blank before trigrams are taken, so short words and word starts weigh
//! more than word ends. Similarity is |A ∩ B| / |A ∪ B| over trigram sets.

use std::collections::HashSet;

/// Distinct trigrams of every alphanumeric word in `text`
pub fn trigrams(text: &str) -> HashSet<String> {
    let mut set = HashSet::new();

    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let padded: Vec<char> = format!("  {} ", word.to_lowercase()).chars().collect();
        for window in padded.windows(3) {
            set.insert(window.iter().collect());
        }
    }

    set
}

/// Similarity in 0.0..=1.0; 0.0 when either side has no words
pub fn similarity(a: &str, b: &str) -> f64 {
    let left = trigrams(a);
    let right = trigrams(b);

    if left.is_empty() || right.is_empty() {
        return 0.0;
    }

    let shared = left.intersection(&right).count();
    let union = left.len() + right.len() - shared;

    shared as f64 / union as f64
}

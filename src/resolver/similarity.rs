//! Name similarity scoring for fuzzy team resolution.
//!
//! Blends character-level edit distance with token overlap. Token overlap
//! gets more weight as names grow more words, which tolerates punctuation
//! and ordering differences without letting short names false-positive.

use std::collections::HashSet;

/// Classic Levenshtein distance over characters.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }

    prev[b.len()]
}

/// Edit-distance similarity in `[0, 1]`.
///
/// Short-circuits to 0 when the length difference alone exceeds half of the
/// longer string: obviously dissimilar names skip the quadratic DP.
pub fn levenshtein_similarity(a: &str, b: &str) -> f64 {
    let a_len = a.chars().count();
    let b_len = b.chars().count();
    let max_len = a_len.max(b_len);
    if max_len == 0 {
        return 1.0;
    }
    if a_len.abs_diff(b_len) * 2 > max_len {
        return 0.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

/// Tokens longer than two characters, split on non-alphanumeric boundaries.
fn tokens(name: &str) -> HashSet<String> {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() > 2)
        .map(|token| token.to_lowercase())
        .collect()
}

/// Jaccard similarity over significant name tokens.
pub fn token_jaccard(a: &str, b: &str) -> f64 {
    let ta = tokens(a);
    let tb = tokens(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    intersection as f64 / union as f64
}

/// Blended similarity used for fuzzy matching.
///
/// The token weight grows with word count and caps at 0.6, so multi-word
/// names lean on overlap while single words stay edit-distance driven.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    let words = tokens(&a).len().max(tokens(&b).len()).max(1);
    let w = (0.2 * words as f64).min(0.6);
    levenshtein_similarity(&a, &b) * (1.0 - w) + token_jaccard(&a, &b) * w
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_basics() {
        assert_eq!(levenshtein("arsenal", "arsenal"), 0);
        assert_eq!(levenshtein("arsenal", "arsenl"), 1);
        assert_eq!(levenshtein("", "abc"), 3);
    }

    #[test]
    fn length_gap_short_circuits() {
        // 4 vs 12 characters: the gap alone rules out a match.
        assert_eq!(levenshtein_similarity("ajax", "borussia dortmund"), 0.0);
    }

    #[test]
    fn identical_names_score_one() {
        assert!((name_similarity("Arsenal", "Arsenal") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn hyphenation_difference_scores_high() {
        let score = name_similarity("Paris Saint Germain", "Paris Saint-Germain");
        assert!(score > 0.9, "got {score}");
    }

    #[test]
    fn short_tokens_are_ignored_by_jaccard() {
        // "la" falls under the 3-char token floor on both sides.
        assert!((token_jaccard("Deportivo La Coruna", "Coruna Deportivo") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn unrelated_names_score_low() {
        assert!(name_similarity("Arsenal", "Chelsea") < 0.5);
        assert!(name_similarity("Bayern Munich", "Real Madrid") < 0.3);
    }
}

//! Token-overlap (Jaccard) confidence.

use std::collections::HashSet;

/// Tokenize: lowercase, split on whitespace, drop empty tokens.
fn tokenize(text: &str) -> HashSet<&str> {
    text.split_whitespace()
        .filter(|t| !t.is_empty())
        .collect()
}

fn jaccard_similarity(a: &HashSet<&str>, b: &HashSet<&str>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Token-overlap confidence over a set of texts:
/// - tokenize each text (lowercase, whitespace split, drop empties)
/// - mean pairwise Jaccard similarity, rounded to 0..100
/// - if fewer than 2 texts: 100 if non-empty, else 0
pub fn jaccard_confidence(texts: &[String]) -> u8 {
    let lowered: Vec<String> = texts.iter().map(|t| t.to_lowercase()).collect();

    if lowered.len() < 2 {
        return match lowered.first() {
            Some(t) if !t.trim().is_empty() => 100,
            _ => 0,
        };
    }

    let token_sets: Vec<HashSet<&str>> = lowered.iter().map(|t| tokenize(t)).collect();

    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..token_sets.len() {
        for j in (i + 1)..token_sets.len() {
            total += jaccard_similarity(&token_sets[i], &token_sets[j]);
            pairs += 1;
        }
    }

    if pairs == 0 {
        return 0;
    }

    (100.0 * (total / pairs as f64)).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_non_empty_text_is_100() {
        assert_eq!(jaccard_confidence(&["hello world".to_string()]), 100);
    }

    #[test]
    fn empty_text_list_is_0() {
        assert_eq!(jaccard_confidence(&[]), 0);
    }

    #[test]
    fn single_empty_text_is_0() {
        assert_eq!(jaccard_confidence(&["   ".to_string()]), 0);
    }

    #[test]
    fn identical_texts_score_100() {
        let texts = vec!["the quick brown fox".to_string(), "the quick brown fox".to_string()];
        assert_eq!(jaccard_confidence(&texts), 100);
    }

    #[test]
    fn disjoint_texts_score_0() {
        let texts = vec!["alpha beta".to_string(), "gamma delta".to_string()];
        assert_eq!(jaccard_confidence(&texts), 0);
    }

    #[test]
    fn confidence_is_symmetric_in_input_order() {
        let texts_a = vec!["alpha beta gamma".to_string(), "beta gamma delta".to_string()];
        let texts_b = vec!["beta gamma delta".to_string(), "alpha beta gamma".to_string()];
        assert_eq!(jaccard_confidence(&texts_a), jaccard_confidence(&texts_b));
    }

    #[test]
    fn case_is_normalized() {
        let texts = vec!["Hello World".to_string(), "hello world".to_string()];
        assert_eq!(jaccard_confidence(&texts), 100);
    }
}

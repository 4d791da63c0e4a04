//! Best-of-N selection.

use std::collections::HashSet;

fn tokens_of(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// For each candidate, count how many of its tokens appear in at least
/// ⌈50%⌉ of the *other* outputs; return the index of the best candidate.
/// Ties go to the lowest index. Returns `None` for an empty slice.
pub fn best_of_n(outputs: &[String]) -> Option<usize> {
    if outputs.is_empty() {
        return None;
    }
    if outputs.len() == 1 {
        return Some(0);
    }

    let token_sets: Vec<HashSet<String>> = outputs.iter().map(|o| tokens_of(o)).collect();

    let mut best_idx = 0;
    let mut best_score = -1i64;

    for (i, tokens) in token_sets.iter().enumerate() {
        let others: Vec<&HashSet<String>> = token_sets
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, s)| s)
            .collect();
        let other_count = others.len();
        // ceil(50%) of the other outputs.
        let required = other_count.div_ceil(2);

        let score = tokens
            .iter()
            .filter(|tok| {
                let appearances = others.iter().filter(|s| s.contains(*tok)).count();
                appearances >= required
            })
            .count() as i64;

        if score > best_score {
            best_score = score;
            best_idx = i;
        }
    }

    Some(best_idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_slice_returns_none() {
        assert_eq!(best_of_n(&[]), None);
    }

    #[test]
    fn single_output_wins_trivially() {
        assert_eq!(best_of_n(&["anything".to_string()]), Some(0));
    }

    #[test]
    fn majority_shared_tokens_wins() {
        let outputs = vec![
            "alpha beta gamma".to_string(),
            "alpha beta gamma".to_string(),
            "totally different words".to_string(),
        ];
        assert_eq!(best_of_n(&outputs), Some(0));
    }

    #[test]
    fn ties_resolve_to_lowest_index() {
        let outputs = vec![
            "alpha beta".to_string(),
            "alpha beta".to_string(),
        ];
        assert_eq!(best_of_n(&outputs), Some(0));
    }
}

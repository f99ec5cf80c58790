//! Convergence scoring for the editorial loop.
//!
//! Measures how much a revision changed relative to the previous draft:
//! `score = 1 - similarity`, where similarity is the matched-token ratio
//! `2*M / (len_a + len_b)` over whitespace-tokenized text and `M` is the
//! total size of the longest matching blocks (the same quantity
//! `SequenceMatcher.ratio()` computes). 0.0 means identical, 1.0 means
//! completely different. Used purely as a stopping heuristic.

use std::collections::HashMap;

/// Change fraction between two revisions, in `[0, 1]`.
pub fn convergence_score(previous: &str, current: &str) -> f64 {
    let a: Vec<&str> = previous.split_whitespace().collect();
    let b: Vec<&str> = current.split_whitespace().collect();

    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    if a.is_empty() || b.is_empty() {
        return 1.0;
    }

    let matched = matched_tokens(&a, &b);
    let ratio = 2.0 * matched as f64 / (a.len() + b.len()) as f64;
    1.0 - ratio
}

/// Total length of matching blocks, found by recursively splitting around
/// the longest matching block.
fn matched_tokens(a: &[&str], b: &[&str]) -> usize {
    let (i, j, size) = longest_match(a, b);
    if size == 0 {
        return 0;
    }
    size + matched_tokens(&a[..i], &b[..j]) + matched_tokens(&a[i + size..], &b[j + size..])
}

/// Longest contiguous matching block between `a` and `b`, earliest on ties.
fn longest_match(a: &[&str], b: &[&str]) -> (usize, usize, usize) {
    let mut b2j: HashMap<&str, Vec<usize>> = HashMap::new();
    for (j, tok) in b.iter().enumerate() {
        b2j.entry(*tok).or_default().push(j);
    }

    let mut best = (0usize, 0usize, 0usize);
    let mut j2len: HashMap<usize, usize> = HashMap::new();
    for (i, tok) in a.iter().enumerate() {
        let mut row: HashMap<usize, usize> = HashMap::new();
        if let Some(positions) = b2j.get(tok) {
            for &j in positions {
                let k = if j == 0 {
                    1
                } else {
                    j2len.get(&(j - 1)).copied().unwrap_or(0) + 1
                };
                row.insert(j, k);
                if k > best.2 {
                    best = (i + 1 - k, j + 1 - k, k);
                }
            }
        }
        j2len = row;
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_texts_score_zero() {
        let text = "The ship slipped its mooring at dawn.";
        assert_eq!(convergence_score(text, text), 0.0);
    }

    #[test]
    fn disjoint_texts_score_one() {
        assert_eq!(convergence_score("alpha beta gamma", "delta epsilon zeta"), 1.0);
    }

    #[test]
    fn both_empty_scores_zero() {
        assert_eq!(convergence_score("", ""), 0.0);
        assert_eq!(convergence_score("  \n ", "\t"), 0.0);
    }

    #[test]
    fn one_empty_scores_one() {
        assert_eq!(convergence_score("", "some words here"), 1.0);
        assert_eq!(convergence_score("some words here", ""), 1.0);
    }

    #[test]
    fn single_token_change_matches_sequence_ratio() {
        // a = [a b c d], b = [a b x d]: blocks "a b" and "d", M = 3,
        // ratio = 2*3/8 = 0.75, score = 0.25.
        let score = convergence_score("a b c d", "a b x d");
        assert!((score - 0.25).abs() < 1e-9, "got {score}");
    }

    #[test]
    fn small_edit_in_long_text_scores_low() {
        let prev: String = (0..200).map(|i| format!("word{i} ")).collect();
        let mut curr = prev.clone();
        curr = curr.replace("word100 ", "changed ");

        let score = convergence_score(&prev, &curr);
        assert!(score > 0.0);
        assert!(score < 0.05, "one word in 200 should converge, got {score}");
    }

    #[test]
    fn reordered_halves_still_partially_match() {
        let prev = "one two three four five six";
        let curr = "four five six one two three";
        let score = convergence_score(prev, curr);
        // Half the text matches as one block plus smaller blocks around it.
        assert!(score > 0.0 && score < 1.0);
    }

    #[test]
    fn score_is_symmetric_for_equal_lengths() {
        let a = "the quick brown fox jumps";
        let b = "the slow brown fox rests";
        let ab = convergence_score(a, b);
        let ba = convergence_score(b, a);
        assert!((ab - ba).abs() < 1e-9);
    }

    #[test]
    fn whitespace_normalization_ignores_spacing() {
        let a = "hello   world\nagain";
        let b = "hello world again";
        assert_eq!(convergence_score(a, b), 0.0);
    }

    #[test]
    fn longest_match_prefers_earliest_on_ties() {
        let a = vec!["x", "y", "x", "y"];
        let b = vec!["x", "y"];
        let (i, j, size) = longest_match(&a, &b);
        assert_eq!((i, j, size), (0, 0, 2));
    }
}

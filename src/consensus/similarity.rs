//! Token-set Jaccard similarity between response texts.

use std::collections::HashSet;

/// Tokens of this many characters or fewer are ignored.
const MIN_TOKEN_CHARS: usize = 3;

/// Lowercase, strip punctuation, split on whitespace, drop short tokens.
pub fn tokenize(text: &str) -> HashSet<String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '_')
        .collect();

    cleaned
        .split_whitespace()
        .filter(|token| token.chars().count() >= MIN_TOKEN_CHARS)
        .map(String::from)
        .collect()
}

/// `|a ∩ b| / |a ∪ b|` over token sets.
///
/// Two empty sets are identical (1.0); one empty set shares nothing (0.0).
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => return 1.0,
        (true, false) | (false, true) => return 0.0,
        _ => {}
    }

    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// Similarity of two texts.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    jaccard(&tokenize(a), &tokenize(b))
}

/// Symmetric N×N similarity matrix with a unit diagonal.
pub fn similarity_matrix<S: AsRef<str>>(texts: &[S]) -> Vec<Vec<f64>> {
    let tokens: Vec<HashSet<String>> = texts.iter().map(|t| tokenize(t.as_ref())).collect();
    let n = tokens.len();
    let mut matrix = vec![vec![0.0; n]; n];

    for i in 0..n {
        matrix[i][i] = 1.0;
        for j in (i + 1)..n {
            let sim = jaccard(&tokens[i], &tokens[j]);
            matrix[i][j] = sim;
            matrix[j][i] = sim;
        }
    }

    matrix
}

/// Each row's mean similarity to every other row.
///
/// A single row has nothing to disagree with and averages 1.0.
pub fn row_averages(matrix: &[Vec<f64>]) -> Vec<f64> {
    let n = matrix.len();
    if n == 1 {
        return vec![1.0];
    }

    matrix
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let sum: f64 = row
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, sim)| sim)
                .sum();
            sum / (n - 1) as f64
        })
        .collect()
}

/// Index and value of the maximum; the first index wins ties.
pub fn argmax(values: &[f64]) -> Option<(usize, f64)> {
    values.iter().copied().enumerate().fold(None, |best, (i, v)| match best {
        Some((_, best_v)) if v <= best_v => best,
        _ => Some((i, v)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_normalizes() {
        let tokens = tokenize("The Parser, handles JSON! a an of");
        assert!(tokens.contains("the"));
        assert!(tokens.contains("parser"));
        assert!(tokens.contains("handles"));
        assert!(tokens.contains("json"));
        assert!(!tokens.contains("an"));
        assert!(!tokens.contains("of"));
        assert_eq!(tokens.len(), 4);
    }

    #[test]
    fn test_jaccard_is_reflexive_and_symmetric() {
        let samples = [
            "The scheduler dispatches chunks to worker slots",
            "Worker slots receive chunks from the scheduler queue",
            "Completely unrelated sentence about gardening tomatoes",
            "",
        ];
        for a in &samples {
            assert_eq!(text_similarity(a, a), 1.0);
            for b in &samples {
                assert_eq!(text_similarity(a, b), text_similarity(b, a));
            }
        }
    }

    #[test]
    fn test_jaccard_empty_conventions() {
        assert_eq!(text_similarity("", ""), 1.0);
        assert_eq!(text_similarity("a an", "of to"), 1.0);
        assert_eq!(text_similarity("", "something meaningful"), 0.0);
    }

    #[test]
    fn test_jaccard_value() {
        // {alpha, beta, gamma} vs {beta, gamma, delta}: 2 / 4
        assert_eq!(text_similarity("alpha beta gamma", "beta gamma delta"), 0.5);
    }

    #[test]
    fn test_matrix_and_row_averages() {
        let matrix = similarity_matrix(&["alpha beta", "alpha beta", "gamma delta"]);
        assert_eq!(matrix[0][1], 1.0);
        assert_eq!(matrix[0][2], 0.0);
        assert_eq!(matrix[2][2], 1.0);

        let averages = row_averages(&matrix);
        assert_eq!(averages, vec![0.5, 0.5, 0.0]);
        assert_eq!(argmax(&averages), Some((0, 0.5)));
    }

    #[test]
    fn test_single_row_average() {
        let matrix = similarity_matrix(&["anything here"]);
        assert_eq!(row_averages(&matrix), vec![1.0]);
    }

    #[test]
    fn test_argmax_first_wins_ties() {
        assert_eq!(argmax(&[0.2, 0.7, 0.7]), Some((1, 0.7)));
        assert_eq!(argmax(&[]), None);
    }
}

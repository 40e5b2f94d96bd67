//! Response aggregation and comparison.
//!
//! Stateless: every function is a pure function of the responses it is given.

use super::similarity::{argmax, row_averages, similarity_matrix};
use crate::error::LlmError;
use crate::models::{AggregatedResponse, AggregationStrategy, ProviderResponse};
use serde::{Deserialize, Serialize};

/// Row-average similarity at which responses count as agreeing.
pub const CONSENSUS_THRESHOLD: f64 = 0.7;

/// Pairs below this similarity are flagged as significant differences.
pub const DIFFERENCE_THRESHOLD: f64 = 0.5;

/// Latency at which the latency bonus reaches zero.
const LATENCY_CEILING_MS: f64 = 60_000.0;

mod scoring {
    pub const BASE: f64 = 0.5;
    pub const ERROR_PENALTY: f64 = 0.3;
    pub const MAX_LATENCY_BONUS: f64 = 0.2;
    pub const USAGE_BONUS: f64 = 0.1;
    pub const LENGTH_BONUS: f64 = 0.1;
    pub const JSON_BONUS: f64 = 0.1;
    pub const MIN_GOOD_LENGTH: usize = 50;
    pub const MAX_GOOD_LENGTH: usize = 10_000;
}

/// Reduce N responses to one decision using `strategy`.
pub fn aggregate(
    responses: Vec<ProviderResponse>,
    strategy: AggregationStrategy,
) -> Result<AggregatedResponse, LlmError> {
    if responses.is_empty() {
        return Err(LlmError::NoResponses);
    }

    let latency_ms = responses.iter().map(|r| r.latency_ms).max().unwrap_or(0);

    let aggregated = match strategy {
        AggregationStrategy::First => {
            let confidence = 1.0 / responses.len() as f64;
            let (primary, alternatives) = split_at_index(responses, 0);
            AggregatedResponse {
                strategy,
                primary,
                alternatives,
                consensus_text: None,
                confidence: Some(confidence),
                latency_ms,
            }
        }
        AggregationStrategy::All => {
            let (primary, alternatives) = split_at_index(responses, 0);
            AggregatedResponse {
                strategy,
                primary,
                alternatives,
                consensus_text: None,
                confidence: None,
                latency_ms,
            }
        }
        AggregationStrategy::Best => {
            let scores: Vec<f64> = responses.iter().map(quality_score).collect();
            let (index, score) = argmax(&scores).unwrap_or((0, 0.0));
            let (primary, alternatives) = split_at_index(responses, index);
            AggregatedResponse {
                strategy,
                primary,
                alternatives,
                consensus_text: None,
                confidence: Some(score),
                latency_ms,
            }
        }
        AggregationStrategy::Consensus => {
            let matrix = similarity_matrix(
                &responses.iter().map(|r| r.content.as_str()).collect::<Vec<_>>(),
            );
            let (index, agreement) = argmax(&row_averages(&matrix)).unwrap_or((0, 0.0));
            let (primary, alternatives) = split_at_index(responses, index);

            // The primary's own text stands in for the consensus
            let consensus_text = if agreement >= CONSENSUS_THRESHOLD {
                Some(primary.content.clone())
            } else {
                None
            };

            AggregatedResponse {
                strategy,
                primary,
                alternatives,
                consensus_text,
                confidence: Some(agreement),
                latency_ms,
            }
        }
    };

    Ok(aggregated)
}

/// Remove the element at `index` as primary; the rest keep their order.
fn split_at_index(
    mut responses: Vec<ProviderResponse>,
    index: usize,
) -> (ProviderResponse, Vec<ProviderResponse>) {
    let primary = responses.remove(index);
    (primary, responses)
}

/// Heuristic quality score in `[0, 1]`.
pub fn quality_score(response: &ProviderResponse) -> f64 {
    let mut score = scoring::BASE;

    if response.error.is_some() {
        score -= scoring::ERROR_PENALTY;
    }

    let latency_factor = (1.0 - response.latency_ms as f64 / LATENCY_CEILING_MS).max(0.0);
    score += scoring::MAX_LATENCY_BONUS * latency_factor;

    if response.usage.is_some() {
        score += scoring::USAGE_BONUS;
    }

    let length = response.content.chars().count();
    if length > scoring::MIN_GOOD_LENGTH && length < scoring::MAX_GOOD_LENGTH {
        score += scoring::LENGTH_BONUS;
    }

    let trimmed = response.content.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if serde_json::from_str::<serde_json::Value>(response.content.trim()).is_ok() {
            score += scoring::JSON_BONUS;
        } else {
            score -= scoring::JSON_BONUS;
        }
    }

    score.clamp(0.0, 1.0)
}

/// Two providers whose answers diverge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseDifference {
    pub first: String,
    pub second: String,
    pub similarity: f64,
}

/// Diagnostic comparison of several responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    /// Mean similarity over all unordered pairs.
    pub average_similarity: f64,
    pub significant_differences: Vec<ResponseDifference>,
    pub recommendations: Vec<String>,
    /// Providers that returned an error, in or alongside their response.
    pub errored_providers: Vec<String>,
}

/// Pairwise comparison using the consensus similarity matrix.
pub fn compare_responses(responses: &[ProviderResponse]) -> ComparisonReport {
    let matrix =
        similarity_matrix(&responses.iter().map(|r| r.content.as_str()).collect::<Vec<_>>());

    let mut pair_sum = 0.0;
    let mut pair_count = 0usize;
    let mut significant_differences = Vec::new();

    for i in 0..responses.len() {
        for j in (i + 1)..responses.len() {
            let similarity = matrix[i][j];
            pair_sum += similarity;
            pair_count += 1;

            if similarity < DIFFERENCE_THRESHOLD {
                significant_differences.push(ResponseDifference {
                    first: responses[i].provider.clone(),
                    second: responses[j].provider.clone(),
                    similarity,
                });
            }
        }
    }

    let average_similarity = if pair_count == 0 {
        1.0
    } else {
        pair_sum / pair_count as f64
    };

    let errored_providers: Vec<String> = responses
        .iter()
        .filter(|r| r.error.is_some())
        .map(|r| r.provider.clone())
        .collect();

    let mut report = ComparisonReport {
        average_similarity,
        significant_differences,
        recommendations: Vec::new(),
        errored_providers,
    };
    report.recommendations = recommendations(&report);
    report
}

/// Qualitative advice derived from agreement and errors.
pub(crate) fn recommendations(report: &ComparisonReport) -> Vec<String> {
    let mut recommendations = Vec::new();

    if report.average_similarity > 0.8 {
        recommendations
            .push("High consensus between providers - results are likely reliable.".to_string());
    } else if report.average_similarity >= 0.6 {
        recommendations
            .push("Moderate consensus - review the differences before relying on them.".to_string());
    } else {
        recommendations.push(
            "Low consensus between providers - manual review of the results is advised."
                .to_string(),
        );
    }

    if !report.errored_providers.is_empty() {
        recommendations.push(format!(
            "Providers with errors: {}",
            report.errored_providers.join(", ")
        ));
    }

    recommendations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TokenUsage;

    fn response(provider: &str, content: &str, latency_ms: u64) -> ProviderResponse {
        ProviderResponse::new(provider, "m", content, latency_ms)
    }

    #[test]
    fn test_empty_input_fails_for_every_strategy() {
        for strategy in [
            AggregationStrategy::First,
            AggregationStrategy::Consensus,
            AggregationStrategy::Best,
            AggregationStrategy::All,
        ] {
            assert!(matches!(
                aggregate(vec![], strategy),
                Err(LlmError::NoResponses)
            ));
        }
    }

    #[test]
    fn test_first_is_deterministic() {
        let responses = vec![
            response("a", "one", 30),
            response("b", "two", 10),
            response("c", "three", 20),
            response("d", "four", 5),
        ];
        for _ in 0..3 {
            let aggregated = aggregate(responses.clone(), AggregationStrategy::First).unwrap();
            assert_eq!(aggregated.primary, responses[0]);
            assert_eq!(aggregated.confidence, Some(0.25));
            assert_eq!(aggregated.alternatives.len(), 3);
        }
    }

    #[test]
    fn test_all_keeps_every_response() {
        let responses = vec![response("a", "one", 1), response("b", "two", 2)];
        let aggregated = aggregate(responses.clone(), AggregationStrategy::All).unwrap();
        assert_eq!(aggregated.primary, responses[0]);
        assert_eq!(aggregated.alternatives, responses[1..].to_vec());
        assert!(aggregated.confidence.is_none());
        assert!(aggregated.consensus_text.is_none());
        assert_eq!(aggregated.latency_ms, 2);
    }

    #[test]
    fn test_consensus_single_response() {
        let only = response("a", "the only answer available", 5);
        let aggregated = aggregate(vec![only.clone()], AggregationStrategy::Consensus).unwrap();
        assert_eq!(aggregated.primary, only);
        assert_eq!(aggregated.confidence, Some(1.0));
    }

    #[test]
    fn test_consensus_identical_responses() {
        let text = "The module schedules analysis tasks across worker slots";
        let aggregated = aggregate(
            vec![response("a", text, 5), response("b", text, 9)],
            AggregationStrategy::Consensus,
        )
        .unwrap();
        assert_eq!(aggregated.confidence, Some(1.0));
        assert_eq!(aggregated.consensus_text.as_deref(), Some(text));
        assert_eq!(aggregated.primary.provider, "a");
    }

    #[test]
    fn test_consensus_picks_the_central_response() {
        let aggregated = aggregate(
            vec![
                response("outlier", "gardening tomatoes sunlight watering", 1),
                response("center", "parser lexer tokens grammar", 1),
                response("near", "parser lexer tokens syntax", 1),
            ],
            AggregationStrategy::Consensus,
        )
        .unwrap();

        // center and near tie; the first index wins
        assert_eq!(aggregated.primary.provider, "center");
        assert_eq!(aggregated.alternatives.len(), 2);
        // (0.6 + 0.0) / 2 is below the agreement threshold
        assert!(aggregated.consensus_text.is_none());
        assert!((aggregated.confidence.unwrap() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_consensus_text_is_primary_content_not_a_fusion() {
        let aggregated = aggregate(
            vec![
                response("a", "alpha beta gamma delta epsilon", 1),
                response("b", "alpha beta gamma delta epsilon", 1),
                response("c", "alpha beta gamma delta epsilon zeta", 1),
            ],
            AggregationStrategy::Consensus,
        )
        .unwrap();
        let text = aggregated.consensus_text.unwrap();
        assert_eq!(text, aggregated.primary.content);
    }

    #[test]
    fn test_quality_score_components() {
        let mut r = response("a", "short", 0);
        // base + full latency bonus
        assert!((quality_score(&r) - 0.7).abs() < 1e-9);

        r.usage = Some(TokenUsage::default());
        assert!((quality_score(&r) - 0.8).abs() < 1e-9);

        r.error = Some("oops".to_string());
        assert!((quality_score(&r) - 0.5).abs() < 1e-9);

        let slow = response("b", "short", 120_000);
        assert!((quality_score(&slow) - 0.5).abs() < 1e-9);

        let broken_json = response("c", "{ not json", 60_000);
        assert!((quality_score(&broken_json) - 0.4).abs() < 1e-9);

        let good_json = response("d", r#"{"purpose": "x"}"#, 60_000);
        assert!((quality_score(&good_json) - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_quality_score_is_clamped() {
        let mut r = response("a", &format!(r#"{{"text": "{}"}}"#, "x".repeat(100)), 0);
        r.usage = Some(TokenUsage::default());
        let score = quality_score(&r);
        assert!(score <= 1.0);
        assert!(score > 0.99);
    }

    #[test]
    fn test_best_prefers_higher_score() {
        let mut errored = response("errored", "some text", 100);
        errored.error = Some("rate limited".to_string());
        let mut good = response("good", "some text", 100);
        good.usage = Some(TokenUsage::default());

        let aggregated =
            aggregate(vec![errored, good], AggregationStrategy::Best).unwrap();
        assert_eq!(aggregated.primary.provider, "good");
        assert_eq!(aggregated.alternatives[0].provider, "errored");
    }

    #[test]
    fn test_best_first_occurrence_wins_ties() {
        let aggregated = aggregate(
            vec![response("a", "same", 10), response("b", "same", 10)],
            AggregationStrategy::Best,
        )
        .unwrap();
        assert_eq!(aggregated.primary.provider, "a");
    }

    #[test]
    fn test_compare_responses() {
        let mut errored = response("c", "gardening tomatoes sunlight", 1);
        errored.error = Some("partial".to_string());
        let report = compare_responses(&[
            response("a", "parser lexer tokens", 1),
            response("b", "parser lexer tokens", 1),
            errored,
        ]);

        // pairs: (a,b)=1.0, (a,c)=0.0, (b,c)=0.0
        assert!((report.average_similarity - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.significant_differences.len(), 2);
        assert_eq!(report.errored_providers, vec!["c"]);
        assert!(report.recommendations[0].starts_with("Low consensus"));
        assert!(report.recommendations[1].contains("c"));
    }

    #[test]
    fn test_compare_high_consensus() {
        let report = compare_responses(&[
            response("a", "parser lexer tokens", 1),
            response("b", "parser lexer tokens", 1),
        ]);
        assert_eq!(report.average_similarity, 1.0);
        assert!(report.significant_differences.is_empty());
        assert!(report.recommendations[0].starts_with("High consensus"));
    }
}

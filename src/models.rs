//! Data models for the analyzer.
//!
//! This module contains the core data structures shared by the scheduler,
//! the provider layer and the report generator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// A single source file carried inside a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkFile {
    /// Path relative to the analyzed root.
    pub path: String,
    /// File content (possibly truncated by the chunker).
    pub content: String,
}

/// One independently analyzable unit of work.
///
/// Tasks are immutable once handed to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkTask {
    /// Stable identifier, unique within a batch.
    pub id: String,
    /// Category assigned by the scanner (e.g. "api", "data").
    pub category: String,
    /// Files included in this chunk.
    pub files: Vec<ChunkFile>,
    /// Free-form context passed through to the prompt.
    pub context: String,
}

impl ChunkTask {
    /// Total content size in bytes.
    pub fn byte_len(&self) -> usize {
        self.files.iter().map(|f| f.content.len()).sum()
    }

    /// Paths of every file in the chunk.
    pub fn file_paths(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.path.as_str()).collect()
    }
}

/// Token accounting reported by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Per-call options for a completion request.
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    /// Provider to use; the registry default when `None`.
    pub provider: Option<String>,
    /// Model to use; the provider's default model when `None`.
    pub model: Option<String>,
    /// Caller timeout; the provider's configured timeout when `None`.
    pub timeout: Option<Duration>,
    /// Sampling temperature override.
    pub temperature: Option<f32>,
    /// Optional system prompt.
    pub system: Option<String>,
}

impl CompletionOptions {
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A single backend's answer.
///
/// `content` and `error` may both be set when a backend returns partial output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Name of the provider that produced this response.
    pub provider: String,
    /// Model that produced this response.
    pub model: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the registry had to fall back to another provider.
    #[serde(default)]
    pub fallback: bool,
    /// The provider originally requested, when `fallback` is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_provider: Option<String>,
}

impl ProviderResponse {
    /// Creates a successful response with no usage data.
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        content: impl Into<String>,
        latency_ms: u64,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            content: content.into(),
            usage: None,
            latency_ms,
            error: None,
            fallback: false,
            original_provider: None,
        }
    }

    /// A response is usable unless it carries an error and no content.
    pub fn is_usable(&self) -> bool {
        self.error.is_none() || !self.content.trim().is_empty()
    }
}

/// Strategy used to reconcile several backend responses.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum AggregationStrategy {
    /// First response wins
    #[default]
    First,
    /// Response most similar to all others wins
    Consensus,
    /// Highest quality score wins
    Best,
    /// Keep every response, no merging
    All,
}

impl fmt::Display for AggregationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationStrategy::First => write!(f, "first"),
            AggregationStrategy::Consensus => write!(f, "consensus"),
            AggregationStrategy::Best => write!(f, "best"),
            AggregationStrategy::All => write!(f, "all"),
        }
    }
}

/// The outcome of aggregating several responses into one decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResponse {
    pub strategy: AggregationStrategy,
    pub primary: ProviderResponse,
    pub alternatives: Vec<ProviderResponse>,
    /// Present only for consensus above the agreement threshold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consensus_text: Option<String>,
    /// Strategy-defined confidence in `[0, 1]`; unset for `all`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub latency_ms: u64,
}

impl AggregatedResponse {
    /// Text to use downstream: the consensus text if present, else the primary.
    pub fn text(&self) -> &str {
        self.consensus_text
            .as_deref()
            .unwrap_or(self.primary.content.as_str())
    }
}

/// What a chunk processor produced for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkAnalysis {
    /// Structured answer for the chunk's category.
    pub payload: Value,
    /// Provider (or providers, comma-joined) that answered.
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub latency_ms: u64,
}

/// How a chunk was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    /// Analyzed by a backend.
    Resolved,
    /// Replaced by the category fallback payload.
    Fallback,
}

/// Per-chunk bookkeeping carried in the merged result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkOutcome {
    pub task_id: String,
    pub category: String,
    pub status: ChunkStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The merged result of a scheduled batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergedAnalysis {
    /// Merged payload per category.
    pub sections: BTreeMap<String, Value>,
    /// Outcome of every chunk, in completion order.
    pub outcomes: Vec<ChunkOutcome>,
    /// Human-readable warnings for degraded chunks.
    pub warnings: Vec<String>,
}

impl MergedAnalysis {
    /// Number of chunks that used a fallback payload.
    pub fn fallback_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == ChunkStatus::Fallback)
            .count()
    }

    /// Number of chunks analyzed by a backend.
    pub fn resolved_count(&self) -> usize {
        self.outcomes.len() - self.fallback_count()
    }
}

/// Metadata about the analysis report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Root directory that was analyzed.
    pub root: String,
    /// Date and time of the analysis.
    pub analysis_date: DateTime<Utc>,
    /// Providers that took part.
    pub providers: Vec<String>,
    /// Dispatch mode description (e.g. "fan-out (consensus)").
    pub dispatch: String,
    /// Number of files scanned.
    pub files_scanned: usize,
    /// Number of chunks scheduled.
    pub chunks: usize,
    /// Duration of the analysis in seconds.
    pub duration_seconds: f64,
}

/// The complete analysis report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub analysis: MergedAnalysis,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_task_byte_len() {
        let task = ChunkTask {
            id: "api-0".to_string(),
            category: "api".to_string(),
            files: vec![
                ChunkFile {
                    path: "src/a.rs".to_string(),
                    content: "abcd".to_string(),
                },
                ChunkFile {
                    path: "src/b.rs".to_string(),
                    content: "ef".to_string(),
                },
            ],
            context: String::new(),
        };
        assert_eq!(task.byte_len(), 6);
        assert_eq!(task.file_paths(), vec!["src/a.rs", "src/b.rs"]);
    }

    #[test]
    fn test_response_usability() {
        let mut response = ProviderResponse::new("a", "m", "", 10);
        assert!(response.is_usable());

        response.error = Some("boom".to_string());
        assert!(!response.is_usable());

        response.content = "partial answer".to_string();
        assert!(response.is_usable());
    }

    #[test]
    fn test_aggregated_text_prefers_consensus() {
        let primary = ProviderResponse::new("a", "m", "primary", 1);
        let mut aggregated = AggregatedResponse {
            strategy: AggregationStrategy::First,
            primary,
            alternatives: vec![],
            consensus_text: None,
            confidence: Some(1.0),
            latency_ms: 1,
        };
        assert_eq!(aggregated.text(), "primary");

        aggregated.consensus_text = Some("agreed".to_string());
        assert_eq!(aggregated.text(), "agreed");
    }

    #[test]
    fn test_strategy_serde() {
        let json = serde_json::to_string(&AggregationStrategy::Consensus).unwrap();
        assert_eq!(json, "\"consensus\"");
        let parsed: AggregationStrategy = serde_json::from_str("\"best\"").unwrap();
        assert_eq!(parsed, AggregationStrategy::Best);
    }

    #[test]
    fn test_merged_counts() {
        let outcome = |status| ChunkOutcome {
            task_id: "t".to_string(),
            category: "core".to_string(),
            status,
            attempts: 1,
            provider: None,
            confidence: None,
            error: None,
        };
        let merged = MergedAnalysis {
            sections: BTreeMap::new(),
            outcomes: vec![
                outcome(ChunkStatus::Resolved),
                outcome(ChunkStatus::Fallback),
                outcome(ChunkStatus::Resolved),
            ],
            warnings: vec![],
        };
        assert_eq!(merged.fallback_count(), 1);
        assert_eq!(merged.resolved_count(), 2);
    }
}

//! Chunk processor backed by the provider layer.

use super::prompt::{build_prompt, SYSTEM_PROMPT};
use crate::consensus::{FanOutExecutor, FanOutRequest};
use crate::models::{AggregationStrategy, ChunkAnalysis, ChunkTask, CompletionOptions};
use crate::providers::ProviderRegistry;
use crate::scheduler::ChunkProcessor;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// How each chunk reaches the backends.
#[derive(Debug, Clone)]
pub enum Dispatch {
    /// One provider through the registry, with its fallback chain.
    Single(CompletionOptions),
    /// Several providers at once, reconciled by the request's strategy.
    FanOut(FanOutRequest),
}

pub struct LlmChunkProcessor {
    registry: Arc<ProviderRegistry>,
    executor: FanOutExecutor,
    dispatch: Dispatch,
}

impl LlmChunkProcessor {
    pub fn new(registry: Arc<ProviderRegistry>, dispatch: Dispatch) -> Self {
        let dispatch = match dispatch {
            Dispatch::Single(options) => Dispatch::Single(with_system_prompt(options)),
            Dispatch::FanOut(mut request) => {
                request.options = with_system_prompt(request.options);
                Dispatch::FanOut(request)
            }
        };
        Self {
            executor: FanOutExecutor::new(registry.clone()),
            registry,
            dispatch,
        }
    }
}

fn with_system_prompt(mut options: CompletionOptions) -> CompletionOptions {
    if options.system.is_none() {
        options.system = Some(SYSTEM_PROMPT.to_string());
    }
    options
}

#[async_trait]
impl ChunkProcessor for LlmChunkProcessor {
    async fn process(&self, task: &ChunkTask) -> anyhow::Result<ChunkAnalysis> {
        let prompt = build_prompt(task);
        debug!("Analyzing {} ({} bytes)", task.id, task.byte_len());

        match &self.dispatch {
            Dispatch::Single(options) => {
                let response = self.registry.complete(&prompt, options).await?;
                Ok(ChunkAnalysis {
                    payload: parse_payload(&response.content),
                    provider: response.provider,
                    confidence: None,
                    latency_ms: response.latency_ms,
                })
            }
            Dispatch::FanOut(request) => {
                let aggregated = self.executor.execute_parallel(&prompt, request).await?;

                let provider = if aggregated.strategy == AggregationStrategy::All {
                    std::iter::once(&aggregated.primary)
                        .chain(aggregated.alternatives.iter())
                        .map(|r| r.provider.as_str())
                        .collect::<Vec<_>>()
                        .join(",")
                } else {
                    aggregated.primary.provider.clone()
                };

                Ok(ChunkAnalysis {
                    payload: parse_payload(aggregated.text()),
                    provider,
                    confidence: aggregated.confidence,
                    latency_ms: aggregated.latency_ms,
                })
            }
        }
    }
}

/// Extract the JSON object from a model answer.
///
/// Code fences and surrounding prose are tolerated; an answer with no JSON
/// object becomes `{"summary": <answer>}`.
pub fn parse_payload(answer: &str) -> Value {
    let text = strip_code_fence(answer.trim());

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(text) {
        return value;
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&text[start..=end])
            {
                return value;
            }
        }
    }

    json!({ "summary": text })
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the language tag line
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

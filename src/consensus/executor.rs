//! Fan-out execution of one prompt against several providers.
//!
//! Each provider call runs in its own task, raced against its own timer.
//! A call that loses the race is detached: it may finish in the background
//! but its result is dropped.

use super::aggregator::{aggregate, compare_responses, recommendations, ComparisonReport};
use crate::error::{LlmError, ProviderFailure};
use crate::models::{AggregatedResponse, AggregationStrategy, CompletionOptions, ProviderResponse};
use crate::providers::ProviderRegistry;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Default per-provider timeout for a fan-out call.
pub const DEFAULT_FAN_OUT_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Parameters for a fan-out call.
#[derive(Debug, Clone)]
pub struct FanOutRequest {
    /// Providers to contact; every available provider when empty.
    pub providers: Vec<String>,
    pub strategy: AggregationStrategy,
    /// Independent bound for each provider.
    pub timeout: Duration,
    /// Options forwarded to every provider (provider field is ignored).
    pub options: CompletionOptions,
}

impl Default for FanOutRequest {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            strategy: AggregationStrategy::First,
            timeout: DEFAULT_FAN_OUT_TIMEOUT,
            options: CompletionOptions::default(),
        }
    }
}

/// Settled outcome of every provider in a batch.
#[derive(Debug, Default)]
struct Settled {
    successes: Vec<ProviderResponse>,
    failures: Vec<ProviderFailure>,
}

/// Side-by-side diagnostic output of `compare_providers`.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderComparison {
    pub aggregated: AggregatedResponse,
    pub report: ComparisonReport,
}

/// Issues one logical request against many providers.
#[derive(Clone)]
pub struct FanOutExecutor {
    registry: Arc<ProviderRegistry>,
}

impl FanOutExecutor {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    fn targets(&self, providers: &[String]) -> Vec<String> {
        if providers.is_empty() {
            self.registry.available_names()
        } else {
            providers.to_vec()
        }
    }

    /// Call every provider concurrently and wait for all of them to settle.
    async fn settle(
        &self,
        prompt: &str,
        providers: &[String],
        timeout: Duration,
        options: &CompletionOptions,
    ) -> Settled {
        let prompt: Arc<str> = Arc::from(prompt);
        // Adapters keep their own timeout unless the caller set one; the
        // fan-out timer bounds every call either way.
        let options = CompletionOptions {
            provider: None,
            ..options.clone()
        };

        let calls = self.targets(providers).into_iter().map(|name| {
            let registry = self.registry.clone();
            let prompt = prompt.clone();
            let options = options.clone();
            async move {
                let task_name = name.clone();
                let handle = tokio::spawn(async move {
                    registry.attempt(&task_name, &prompt, &options).await
                });

                let outcome = match tokio::time::timeout(timeout, handle).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(join_error)) => Err(LlmError::CompletionFailed {
                        provider: name.clone(),
                        reason: format!("provider task aborted: {}", join_error),
                    }),
                    Err(_) => Err(LlmError::Timeout {
                        provider: name.clone(),
                        timeout_ms: timeout.as_millis() as u64,
                    }),
                };
                (name, outcome)
            }
        });

        let mut settled = Settled::default();
        for (name, outcome) in join_all(calls).await {
            match outcome {
                Ok(response) => {
                    debug!("{} settled in {}ms", name, response.latency_ms);
                    settled.successes.push(response);
                }
                Err(e) => {
                    warn!("{} failed during fan-out: {}", name, e);
                    settled.failures.push(ProviderFailure::new(name, &e));
                }
            }
        }
        settled
    }

    /// Fan out, then aggregate the successful responses with `request.strategy`.
    ///
    /// `latency_ms` is the slowest successful contributor's latency.
    pub async fn execute_parallel(
        &self,
        prompt: &str,
        request: &FanOutRequest,
    ) -> Result<AggregatedResponse, LlmError> {
        let settled = self
            .settle(prompt, &request.providers, request.timeout, &request.options)
            .await;

        if settled.successes.is_empty() {
            return Err(LlmError::AllProvidersFailed {
                failures: settled.failures,
            });
        }

        let latency_ms = settled
            .successes
            .iter()
            .map(|r| r.latency_ms)
            .max()
            .unwrap_or(0);
        let contributors = settled.successes.len();

        let mut aggregated = aggregate(settled.successes, request.strategy)?;
        aggregated.latency_ms = latency_ms;

        debug!(
            "Fan-out ({}) settled: {} succeeded, {} failed, confidence {:?}",
            request.strategy,
            contributors,
            settled.failures.len(),
            aggregated.confidence
        );
        Ok(aggregated)
    }

    /// Fan out with the `all` strategy and compare the answers pairwise.
    ///
    /// `timeout` bounds each provider independently.
    pub async fn compare_providers(
        &self,
        prompt: &str,
        providers: Option<&[String]>,
        timeout: Duration,
    ) -> Result<ProviderComparison, LlmError> {
        let settled = self
            .settle(
                prompt,
                providers.unwrap_or(&[]),
                timeout,
                &CompletionOptions::default(),
            )
            .await;

        if settled.successes.is_empty() {
            return Err(LlmError::AllProvidersFailed {
                failures: settled.failures,
            });
        }

        let mut report = compare_responses(&settled.successes);
        for failure in &settled.failures {
            if !report.errored_providers.contains(&failure.provider) {
                report.errored_providers.push(failure.provider.clone());
            }
        }
        report.recommendations = recommendations(&report);

        let aggregated = aggregate(settled.successes, AggregationStrategy::All)?;
        info!(
            "Compared {} providers: average similarity {:.2}",
            1 + aggregated.alternatives.len(),
            report.average_similarity
        );

        Ok(ProviderComparison { aggregated, report })
    }

    /// Try providers one at a time in priority order; the first success wins.
    ///
    /// With a `sink`, each attempt streams its fragments there as they arrive.
    /// A provider that fails mid-stream may already have sent some.
    pub async fn execute_with_best_provider(
        &self,
        prompt: &str,
        providers: &[String],
        options: &CompletionOptions,
        sink: Option<&mpsc::Sender<String>>,
    ) -> Result<ProviderResponse, LlmError> {
        let ordered: Vec<String> = self
            .registry
            .names()
            .into_iter()
            .filter(|name| providers.is_empty() || providers.contains(name))
            .collect();

        let mut failures = Vec::new();
        for name in ordered {
            let result = match sink {
                Some(sink) => self.stream_once(&name, prompt, options, sink.clone()).await,
                None => self.registry.attempt(&name, prompt, options).await,
            };
            match result {
                Ok(response) => return Ok(response),
                Err(e) => {
                    debug!("{} failed, trying next provider: {}", name, e);
                    failures.push(ProviderFailure::new(name, &e));
                }
            }
        }

        Err(LlmError::AllProvidersFailed { failures })
    }

    async fn stream_once(
        &self,
        name: &str,
        prompt: &str,
        options: &CompletionOptions,
        sink: mpsc::Sender<String>,
    ) -> Result<ProviderResponse, LlmError> {
        let provider = self
            .registry
            .get(name)
            .ok_or_else(|| LlmError::UnknownProvider(name.to_string()))?;
        if !provider.is_available() {
            return Err(LlmError::NotAvailable {
                provider: name.to_string(),
            });
        }
        let options = options.clone().with_provider(name);
        provider.stream_complete(prompt, &options, sink).await
    }
}

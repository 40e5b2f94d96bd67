//! Scripted providers for tests.

use super::Provider;
use crate::error::LlmError;
use crate::models::{CompletionOptions, ProviderResponse, TokenUsage};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What a [`FakeProvider`] does when called.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Answer with this content.
    Answer(String),
    /// Fail with this error.
    Fail(LlmError),
    /// Fail this many times, then answer.
    FailTimes(usize, String),
}

pub struct FakeProvider {
    name: String,
    behavior: Behavior,
    delay: Duration,
    reported_latency_ms: u64,
    usage: Option<TokenUsage>,
    fail_initialize: bool,
    available: AtomicBool,
    calls: AtomicUsize,
    shutdowns: AtomicUsize,
}

impl FakeProvider {
    pub fn answering(name: &str, content: &str) -> Self {
        Self::new(name, Behavior::Answer(content.to_string()))
    }

    pub fn failing(name: &str) -> Self {
        Self::new(
            name,
            Behavior::Fail(LlmError::CompletionFailed {
                provider: name.to_string(),
                reason: "scripted failure".to_string(),
            }),
        )
    }

    pub fn new(name: &str, behavior: Behavior) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            delay: Duration::ZERO,
            reported_latency_ms: 10,
            usage: None,
            fail_initialize: false,
            available: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.reported_latency_ms = latency_ms;
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> Result<(), LlmError> {
        if self.fail_initialize {
            return Err(LlmError::NotAvailable {
                provider: self.name.clone(),
            });
        }
        self.available.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn list_models(&self) -> Vec<String> {
        vec!["fake-model".to_string()]
    }

    async fn complete(
        &self,
        _prompt: &str,
        _options: &CompletionOptions,
    ) -> Result<ProviderResponse, LlmError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let content = match &self.behavior {
            Behavior::Answer(content) => content.clone(),
            Behavior::Fail(error) => return Err(error.clone()),
            Behavior::FailTimes(times, content) => {
                if call < *times {
                    return Err(LlmError::CompletionFailed {
                        provider: self.name.clone(),
                        reason: format!("scripted failure {}", call + 1),
                    });
                }
                content.clone()
            }
        };

        let mut response =
            ProviderResponse::new(&self.name, "fake-model", content, self.reported_latency_ms);
        response.usage = self.usage;
        Ok(response)
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.available.store(false, Ordering::SeqCst);
    }
}

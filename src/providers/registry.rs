//! Provider registry with priority ordering and a sequential fallback chain.

use super::{create_provider, Provider};
use crate::config::{Config, ProviderConfig};
use crate::error::{LlmError, ProviderFailure};
use crate::models::{CompletionOptions, ProviderResponse};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Linear backoff step between retries of the same provider.
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

struct RegisteredProvider {
    name: String,
    config: ProviderConfig,
    adapter: Arc<dyn Provider>,
    initialized: bool,
}

/// Owns every initialized adapter for the lifetime of the process.
pub struct ProviderRegistry {
    /// Sorted by ascending priority, then name.
    providers: Vec<RegisteredProvider>,
    fallback_enabled: bool,
}

impl ProviderRegistry {
    pub fn new(fallback_enabled: bool) -> Self {
        Self {
            providers: Vec::new(),
            fallback_enabled,
        }
    }

    /// Build adapters for every enabled, selected provider in the config.
    pub fn from_config(config: &Config) -> Result<Self, LlmError> {
        let mut registry = Self::new(config.dispatch.fallback_enabled);
        for name in config.enabled_providers() {
            let provider_config = &config.providers[&name];
            let adapter = create_provider(&name, provider_config)?;
            registry.register(adapter, provider_config.clone());
        }
        Ok(registry)
    }

    /// Add an adapter. Re-registering a name replaces the previous entry.
    pub fn register(&mut self, adapter: Arc<dyn Provider>, config: ProviderConfig) {
        let name = adapter.name().to_string();
        self.providers.retain(|p| p.name != name);
        self.providers.push(RegisteredProvider {
            name,
            config,
            adapter,
            initialized: false,
        });
        self.providers.sort_by(|a, b| {
            a.config
                .priority
                .cmp(&b.config.priority)
                .then_with(|| a.name.cmp(&b.name))
        });
    }

    /// Initialize every not-yet-initialized adapter.
    ///
    /// Tolerates partial failure; fails only when no adapter is usable.
    /// Returns the number of initialized adapters.
    pub async fn initialize(&mut self) -> Result<usize, LlmError> {
        for entry in self.providers.iter_mut().filter(|p| !p.initialized) {
            match entry.adapter.initialize().await {
                Ok(()) => {
                    entry.initialized = true;
                    debug!("Initialized provider {}", entry.name);
                }
                Err(e) => warn!("Provider {} failed to initialize: {}", entry.name, e),
            }
        }

        let ready = self.providers.iter().filter(|p| p.initialized).count();
        if ready == 0 {
            return Err(LlmError::NoProvidersInitialized);
        }

        info!(
            "Provider registry ready: {}/{} providers initialized",
            ready,
            self.providers.len()
        );
        Ok(ready)
    }

    /// All registered names in priority order.
    pub fn names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name.clone()).collect()
    }

    /// Initialized and currently available names in priority order.
    pub fn available_names(&self) -> Vec<String> {
        self.providers
            .iter()
            .filter(|p| p.initialized && p.adapter.is_available())
            .map(|p| p.name.clone())
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.entry(name).map(|p| p.adapter.clone())
    }

    /// The highest-priority available provider.
    pub fn default_provider(&self) -> Option<&str> {
        self.providers
            .iter()
            .find(|p| p.initialized && p.adapter.is_available())
            .map(|p| p.name.as_str())
    }

    fn entry(&self, name: &str) -> Option<&RegisteredProvider> {
        self.providers.iter().find(|p| p.name == name)
    }

    /// Complete with the requested (or default) provider, falling back through
    /// the remaining providers in priority order when enabled.
    pub async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<ProviderResponse, LlmError> {
        let requested = match options.provider.as_deref() {
            Some(name) => {
                if self.entry(name).is_none() {
                    return Err(LlmError::UnknownProvider(name.to_string()));
                }
                name.to_string()
            }
            None => self
                .default_provider()
                .ok_or(LlmError::NoProvidersInitialized)?
                .to_string(),
        };

        let mut chain = vec![requested.clone()];
        if self.fallback_enabled {
            chain.extend(
                self.providers
                    .iter()
                    .filter(|p| p.name != requested)
                    .map(|p| p.name.clone()),
            );
        }

        let mut failures = Vec::new();
        for name in &chain {
            match self.attempt(name, prompt, options).await {
                Ok(mut response) => {
                    if *name != requested {
                        warn!("Fell back from {} to {}", requested, name);
                        response.fallback = true;
                        response.original_provider = Some(requested.clone());
                    }
                    return Ok(response);
                }
                Err(e) => {
                    debug!("Provider {} failed: {}", name, e);
                    failures.push(ProviderFailure::new(name.clone(), &e));
                }
            }
        }

        Err(LlmError::AllProvidersFailed { failures })
    }

    /// Try one provider, retrying retryable failures up to its `max_retries`.
    pub async fn attempt(
        &self,
        name: &str,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<ProviderResponse, LlmError> {
        let entry = self
            .entry(name)
            .ok_or_else(|| LlmError::UnknownProvider(name.to_string()))?;

        if !entry.initialized {
            return Err(LlmError::NotAvailable {
                provider: name.to_string(),
            });
        }

        let mut last_error = None;
        for attempt in 0..=entry.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                debug!("Retrying {} (attempt {})", name, attempt + 1);
            }

            let error = match entry.adapter.complete(prompt, options).await {
                Ok(response) if response.is_usable() => return Ok(response),
                Ok(response) => LlmError::CompletionFailed {
                    provider: name.to_string(),
                    reason: response.error.unwrap_or_default(),
                },
                Err(e) => e,
            };

            if !error.is_retryable() {
                return Err(error);
            }
            last_error = Some(error);
        }

        Err(last_error.unwrap_or(LlmError::NotAvailable {
            provider: name.to_string(),
        }))
    }

    /// Shut down every adapter.
    pub async fn shutdown(&self) {
        for entry in &self.providers {
            entry.adapter.shutdown().await;
        }
        info!("Shut down {} providers", self.providers.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::{Behavior, FakeProvider};

    fn config(priority: u32, max_retries: u32) -> ProviderConfig {
        ProviderConfig {
            priority,
            max_retries,
            ..ProviderConfig::default()
        }
    }

    #[tokio::test]
    async fn test_fallback_annotates_response() {
        let mut registry = ProviderRegistry::new(true);
        registry.register(FakeProvider::failing("A").arc(), config(1, 0));
        registry.register(FakeProvider::answering("B", "from b").arc(), config(2, 0));
        registry.initialize().await.unwrap();

        let response = registry
            .complete("prompt", &CompletionOptions::default())
            .await
            .unwrap();

        assert_eq!(response.content, "from b");
        assert!(response.fallback);
        assert_eq!(response.original_provider.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn test_no_annotation_without_fallback() {
        let mut registry = ProviderRegistry::new(true);
        registry.register(FakeProvider::answering("A", "from a").arc(), config(1, 0));
        registry.register(FakeProvider::answering("B", "from b").arc(), config(2, 0));
        registry.initialize().await.unwrap();

        let response = registry
            .complete("prompt", &CompletionOptions::default())
            .await
            .unwrap();
        assert_eq!(response.provider, "A");
        assert!(!response.fallback);
        assert!(response.original_provider.is_none());
    }

    #[tokio::test]
    async fn test_fallback_follows_priority_not_registration_order() {
        let c = FakeProvider::answering("C", "from c").arc();
        let b = FakeProvider::answering("B", "from b").arc();
        let mut registry = ProviderRegistry::new(true);
        registry.register(c.clone(), config(3, 0));
        registry.register(FakeProvider::failing("A").arc(), config(1, 0));
        registry.register(b.clone(), config(2, 0));
        registry.initialize().await.unwrap();

        assert_eq!(registry.names(), vec!["A", "B", "C"]);

        let response = registry
            .complete("prompt", &CompletionOptions::default())
            .await
            .unwrap();
        assert_eq!(response.provider, "B");
        assert_eq!(c.calls(), 0);
    }

    #[tokio::test]
    async fn test_requested_provider_falls_back_to_others() {
        let mut registry = ProviderRegistry::new(true);
        registry.register(FakeProvider::answering("A", "from a").arc(), config(1, 0));
        registry.register(FakeProvider::failing("B").arc(), config(2, 0));
        registry.initialize().await.unwrap();

        let options = CompletionOptions::default().with_provider("B");
        let response = registry.complete("prompt", &options).await.unwrap();
        assert_eq!(response.provider, "A");
        assert_eq!(response.original_provider.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn test_fallback_disabled_fails_fast() {
        let b = FakeProvider::answering("B", "from b").arc();
        let mut registry = ProviderRegistry::new(false);
        registry.register(FakeProvider::failing("A").arc(), config(1, 0));
        registry.register(b.clone(), config(2, 0));
        registry.initialize().await.unwrap();

        let result = registry
            .complete("prompt", &CompletionOptions::default())
            .await;
        assert!(matches!(result, Err(LlmError::AllProvidersFailed { .. })));
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn test_all_failed_enumerates_every_provider() {
        let mut registry = ProviderRegistry::new(true);
        registry.register(FakeProvider::failing("A").arc(), config(1, 0));
        registry.register(FakeProvider::failing("B").arc(), config(2, 0));
        registry.initialize().await.unwrap();

        match registry
            .complete("prompt", &CompletionOptions::default())
            .await
        {
            Err(LlmError::AllProvidersFailed { failures }) => {
                let names: Vec<_> = failures.iter().map(|f| f.provider.as_str()).collect();
                assert_eq!(names, vec!["A", "B"]);
            }
            other => panic!("expected AllProvidersFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_initialize_tolerates_partial_failure() {
        let mut registry = ProviderRegistry::new(true);
        registry.register(
            FakeProvider::answering("down", "x").unreachable().arc(),
            config(1, 0),
        );
        registry.register(FakeProvider::answering("up", "from up").arc(), config(2, 0));

        assert_eq!(registry.initialize().await.unwrap(), 1);
        assert_eq!(registry.available_names(), vec!["up"]);
        assert_eq!(registry.default_provider(), Some("up"));

        // Idempotent
        assert_eq!(registry.initialize().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_initialize_fails_when_nothing_initializes() {
        let mut registry = ProviderRegistry::new(true);
        registry.register(
            FakeProvider::answering("down", "x").unreachable().arc(),
            config(1, 0),
        );
        assert!(matches!(
            registry.initialize().await,
            Err(LlmError::NoProvidersInitialized)
        ));
    }

    #[tokio::test]
    async fn test_retries_retryable_failures() {
        let flaky = FakeProvider::new("flaky", Behavior::FailTimes(2, "finally".to_string())).arc();
        let mut registry = ProviderRegistry::new(false);
        registry.register(flaky.clone(), config(1, 2));
        registry.initialize().await.unwrap();

        let response = registry
            .complete("prompt", &CompletionOptions::default())
            .await
            .unwrap();
        assert_eq!(response.content, "finally");
        assert_eq!(flaky.calls(), 3);
    }

    #[tokio::test]
    async fn test_model_not_found_is_not_retried() {
        let strict = FakeProvider::new(
            "strict",
            Behavior::Fail(LlmError::ModelNotFound {
                provider: "strict".to_string(),
                model: "m".to_string(),
            }),
        )
        .arc();
        let mut registry = ProviderRegistry::new(false);
        registry.register(strict.clone(), config(1, 3));
        registry.initialize().await.unwrap();

        assert!(registry
            .complete("prompt", &CompletionOptions::default())
            .await
            .is_err());
        assert_eq!(strict.calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let mut registry = ProviderRegistry::new(true);
        registry.register(FakeProvider::answering("A", "a").arc(), config(1, 0));
        registry.initialize().await.unwrap();

        let options = CompletionOptions::default().with_provider("nope");
        assert!(matches!(
            registry.complete("prompt", &options).await,
            Err(LlmError::UnknownProvider(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_reaches_every_adapter() {
        let a = FakeProvider::answering("A", "a").arc();
        let b = FakeProvider::answering("B", "b").arc();
        let mut registry = ProviderRegistry::new(true);
        registry.register(a.clone(), config(1, 0));
        registry.register(b.clone(), config(2, 0));
        registry.initialize().await.unwrap();

        registry.shutdown().await;
        assert_eq!(a.shutdowns(), 1);
        assert_eq!(b.shutdowns(), 1);
        assert!(registry.available_names().is_empty());
    }
}

//! LLM provider adapters.
//!
//! Every backend is wrapped in a [`Provider`] so the registry, the fan-out
//! executor and the scheduler never depend on HTTP or process details:
//! - **ollama**: Ollama-compatible HTTP model server
//! - **command**: subprocess tool that reads the prompt on stdin

pub mod command;
pub mod ollama;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

pub use command::CommandProvider;
pub use ollama::OllamaProvider;
pub use registry::ProviderRegistry;

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::LlmError;
use crate::models::{CompletionOptions, ProviderResponse};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Uniform contract over one analysis backend.
///
/// Implementations are shared across worker slots and must be safe for
/// concurrent calls.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Registry name of this provider.
    fn name(&self) -> &str;

    /// Probe the backend and mark the provider available.
    async fn initialize(&self) -> Result<(), LlmError>;

    fn is_available(&self) -> bool;

    /// Models this provider can serve.
    fn list_models(&self) -> Vec<String>;

    /// Run one completion. Partial output is never returned on `Err`.
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<ProviderResponse, LlmError>;

    /// Stream a completion, forwarding fragments to `sink` as they arrive.
    ///
    /// The returned response carries the full content.
    async fn stream_complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
        sink: mpsc::Sender<String>,
    ) -> Result<ProviderResponse, LlmError> {
        let response = self.complete(prompt, options).await?;
        // A closed receiver only means nobody is listening
        let _ = sink.send(response.content.clone()).await;
        Ok(response)
    }

    /// Release processes and connections held by the provider.
    async fn shutdown(&self) {}
}

/// Resolve the model for a call and check it against the allowed list.
pub(crate) fn resolve_model(
    provider: &str,
    config: &ProviderConfig,
    available: &[String],
    options: &CompletionOptions,
) -> Result<String, LlmError> {
    let model = options
        .model
        .clone()
        .or_else(|| config.default_model.clone())
        .or_else(|| config.models.first().cloned())
        .or_else(|| available.first().cloned())
        .unwrap_or_default();

    let allowed: &[String] = if config.models.is_empty() {
        available
    } else {
        &config.models
    };

    if !allowed.is_empty() && !model.is_empty() && !allowed.contains(&model) {
        return Err(LlmError::ModelNotFound {
            provider: provider.to_string(),
            model,
        });
    }

    Ok(model)
}

/// Effective timeout for a call.
pub(crate) fn effective_timeout(config: &ProviderConfig, options: &CompletionOptions) -> Duration {
    options
        .timeout
        .unwrap_or_else(|| Duration::from_millis(config.timeout_ms))
}

/// Build the adapter described by a provider config entry.
pub fn create_provider(name: &str, config: &ProviderConfig) -> Result<Arc<dyn Provider>, LlmError> {
    match config.kind {
        ProviderKind::Ollama => Ok(Arc::new(OllamaProvider::new(name, config.clone())?)),
        ProviderKind::Command => Ok(Arc::new(CommandProvider::new(name, config.clone())?)),
    }
}

//! Error types for provider dispatch and chunk scheduling.

use std::fmt;

/// Errors raised by provider adapters, the registry, the fan-out executor
/// and the aggregator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} is not available")]
    NotAvailable { provider: String },

    #[error("Provider {provider} timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },

    #[error("Completion failed on {provider}: {reason}")]
    CompletionFailed { provider: String, reason: String },

    #[error("Model {model} not found on {provider}")]
    ModelNotFound { provider: String, model: String },

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("All providers failed: {}", format_failures(.failures))]
    AllProvidersFailed { failures: Vec<ProviderFailure> },

    #[error("No responses to aggregate")]
    NoResponses,

    #[error("No providers could be initialized")]
    NoProvidersInitialized,
}

impl LlmError {
    /// Whether retrying the same provider may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Timeout { .. } | LlmError::CompletionFailed { .. }
        )
    }
}

/// One adapter's failure inside a fallback chain or fan-out batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderFailure {
    pub provider: String,
    pub reason: String,
}

impl ProviderFailure {
    pub fn new(provider: impl Into<String>, error: &LlmError) -> Self {
        Self {
            provider: provider.into(),
            reason: error.to_string(),
        }
    }
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider, self.reason)
    }
}

fn format_failures(failures: &[ProviderFailure]) -> String {
    if failures.is_empty() {
        return "no providers were attempted".to_string();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors surfaced by the chunk scheduler to its caller.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Scheduler has been shut down")]
    ShutDown,

    #[error("Invalid scheduler configuration: {0}")]
    InvalidConfig(String),
}

/// A slot failure. Drives the restart policy and is never returned to callers.
#[derive(Debug, thiserror::Error)]
#[error("Worker slot {slot} failed on task {task_id} (attempt {attempt}): {reason}")]
pub(crate) struct WorkerHealthError {
    pub slot: usize,
    pub task_id: String,
    pub attempt: u32,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_providers_failed_lists_every_reason() {
        let err = LlmError::AllProvidersFailed {
            failures: vec![
                ProviderFailure::new(
                    "ollama",
                    &LlmError::Timeout {
                        provider: "ollama".to_string(),
                        timeout_ms: 100,
                    },
                ),
                ProviderFailure::new(
                    "claude",
                    &LlmError::NotAvailable {
                        provider: "claude".to_string(),
                    },
                ),
            ],
        };

        let message = err.to_string();
        assert!(message.contains("ollama: Provider ollama timed out after 100ms"));
        assert!(message.contains("claude: Provider claude is not available"));
    }

    #[test]
    fn test_retryable_errors() {
        assert!(LlmError::Timeout {
            provider: "a".to_string(),
            timeout_ms: 1
        }
        .is_retryable());
        assert!(!LlmError::ModelNotFound {
            provider: "a".to_string(),
            model: "m".to_string()
        }
        .is_retryable());
        assert!(!LlmError::NoResponses.is_retryable());
    }
}

//! Subprocess provider.
//!
//! Runs a CLI tool per completion: the prompt is written to stdin and the
//! answer is read from stdout, either as plain text or as a JSON envelope
//! with a `result`, `response` or `content` field.

use super::{effective_timeout, resolve_model, Provider};
use crate::config::ProviderConfig;
use crate::error::LlmError;
use crate::models::{CompletionOptions, ProviderResponse, TokenUsage};
use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Timeout for the availability probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum stderr excerpt carried in an error.
const MAX_STDERR_EXCERPT: usize = 500;

/// Placeholder in `args` replaced by the resolved model.
const MODEL_PLACEHOLDER: &str = "{model}";

/// Provider backed by an external command.
pub struct CommandProvider {
    name: String,
    config: ProviderConfig,
    program: String,
    available: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl CommandProvider {
    pub fn new(name: &str, config: ProviderConfig) -> Result<Self, LlmError> {
        let program = config
            .command
            .clone()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| LlmError::CompletionFailed {
                provider: name.to_string(),
                reason: "No command configured".to_string(),
            })?;

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            name: name.to_string(),
            config,
            program,
            available: AtomicBool::new(false),
            shutdown_tx,
        })
    }

    fn build_args(&self, model: &str) -> Vec<String> {
        self.config
            .args
            .iter()
            .map(|arg| arg.replace(MODEL_PLACEHOLDER, model))
            .collect()
    }

    async fn run(&self, args: &[String], prompt: &str, timeout: Duration) -> Result<String, LlmError> {
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.completion_failed(format!("Failed to spawn {}: {}", self.program, e)))?;

        let stdin = child.stdin.take();
        let input = prompt.as_bytes().to_vec();
        let write_prompt = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&input).await?;
                stdin.shutdown().await?;
            }
            Ok::<_, std::io::Error>(())
        };

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let exchange = async {
            let (written, output) = tokio::join!(write_prompt, child.wait_with_output());
            (written, output)
        };

        // Dropping `exchange` drops the child, which kills it
        let (written, output) = tokio::select! {
            result = tokio::time::timeout(timeout, exchange) => match result {
                Ok(pair) => pair,
                Err(_) => {
                    return Err(LlmError::Timeout {
                        provider: self.name.clone(),
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
            },
            _ = shutdown_rx.changed() => {
                return Err(LlmError::NotAvailable { provider: self.name.clone() });
            }
        };

        let output = output
            .map_err(|e| self.completion_failed(format!("Command execution failed: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let excerpt: String = stderr.trim().chars().take(MAX_STDERR_EXCERPT).collect();
            return Err(self.completion_failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status.code().unwrap_or(-1),
                excerpt
            )));
        }

        if let Err(e) = written {
            // The tool may legitimately stop reading early
            debug!("{}: prompt write ended early: {}", self.name, e);
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn completion_failed(&self, reason: impl Into<String>) -> LlmError {
        LlmError::CompletionFailed {
            provider: self.name.clone(),
            reason: reason.into(),
        }
    }
}

/// Answer extracted from a tool's stdout.
#[derive(Debug, PartialEq)]
pub(crate) struct ParsedOutput {
    pub content: String,
    pub usage: Option<TokenUsage>,
    pub error: Option<String>,
}

/// Unwrap a JSON envelope if present, else use the trimmed text.
pub(crate) fn parse_output(stdout: &str) -> ParsedOutput {
    let trimmed = stdout.trim();

    if trimmed.starts_with('{') {
        if let Ok(json) = serde_json::from_str::<Value>(trimmed) {
            let content = ["result", "response", "content"]
                .iter()
                .find_map(|key| json[*key].as_str());

            if let Some(content) = content {
                let usage = json.get("usage").map(|u| TokenUsage {
                    prompt_tokens: u["input_tokens"]
                        .as_u64()
                        .or_else(|| u["prompt_tokens"].as_u64())
                        .unwrap_or(0),
                    completion_tokens: u["output_tokens"]
                        .as_u64()
                        .or_else(|| u["completion_tokens"].as_u64())
                        .unwrap_or(0),
                });
                let error = if json["is_error"].as_bool().unwrap_or(false) {
                    Some(json["error"].as_str().unwrap_or("tool reported an error").to_string())
                } else {
                    json["error"].as_str().map(String::from)
                };

                return ParsedOutput {
                    content: content.trim().to_string(),
                    usage,
                    error,
                };
            }
        }
    }

    ParsedOutput {
        content: trimmed.to_string(),
        usage: None,
        error: None,
    }
}

#[async_trait]
impl Provider for CommandProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> Result<(), LlmError> {
        let probe_args = self
            .config
            .health_args
            .clone()
            .unwrap_or_else(|| vec!["--version".to_string()]);

        let probe = Command::new(&self.program)
            .args(&probe_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(PROBE_TIMEOUT, probe).await {
            Ok(Ok(status)) if status.success() => {
                info!("Provider {} available ({})", self.name, self.program);
                self.available.store(true, Ordering::SeqCst);
                Ok(())
            }
            Ok(Ok(status)) => {
                warn!("Probe for {} exited with {}", self.name, status);
                Err(LlmError::NotAvailable {
                    provider: self.name.clone(),
                })
            }
            Ok(Err(e)) => {
                warn!("Cannot run {} for {}: {}", self.program, self.name, e);
                Err(LlmError::NotAvailable {
                    provider: self.name.clone(),
                })
            }
            Err(_) => Err(LlmError::Timeout {
                provider: self.name.clone(),
                timeout_ms: PROBE_TIMEOUT.as_millis() as u64,
            }),
        }
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn list_models(&self) -> Vec<String> {
        let mut models = self.config.models.clone();
        if let Some(ref default) = self.config.default_model {
            if !models.contains(default) {
                models.insert(0, default.clone());
            }
        }
        models
    }

    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<ProviderResponse, LlmError> {
        if !self.is_available() {
            return Err(LlmError::NotAvailable {
                provider: self.name.clone(),
            });
        }

        let model = resolve_model(&self.name, &self.config, &[], options)?;
        let timeout = effective_timeout(&self.config, options);
        let args = self.build_args(&model);

        // Tools without a system flag get the system prompt prepended
        let full_prompt = match options.system {
            Some(ref system) => format!("{}\n\n{}", system, prompt),
            None => prompt.to_string(),
        };

        let started = Instant::now();
        let stdout = self.run(&args, &full_prompt, timeout).await?;
        let latency_ms = started.elapsed().as_millis() as u64;

        let parsed = parse_output(&stdout);
        if parsed.content.is_empty() && parsed.error.is_none() {
            return Err(self.completion_failed("Command produced no output"));
        }

        debug!("{} answered in {}ms", self.name, latency_ms);

        Ok(ProviderResponse {
            provider: self.name.clone(),
            model,
            content: parsed.content,
            usage: parsed.usage,
            latency_ms,
            error: parsed.error,
            fallback: false,
            original_provider: None,
        })
    }

    async fn shutdown(&self) {
        self.available.store(false, Ordering::SeqCst);
        // Wakes every in-flight call so its child is dropped and killed
        self.shutdown_tx.send_replace(true);
        debug!("Provider {} shut down", self.name);
    }
}

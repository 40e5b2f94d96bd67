//! Ollama HTTP provider.
//!
//! Talks to an Ollama-compatible server using `/api/tags` for the availability
//! probe and `/api/generate` for completions.

use super::{effective_timeout, resolve_model, Provider};
use crate::config::{default_ollama_url, ProviderConfig};
use crate::error::LlmError;
use crate::models::{CompletionOptions, ProviderResponse, TokenUsage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Timeout for the `/api/tags` probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Ollama generate API request.
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

/// Ollama generate API response (also one NDJSON line when streaming).
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

impl GenerateResponse {
    fn usage(&self) -> Option<TokenUsage> {
        if self.prompt_eval_count.is_none() && self.eval_count.is_none() {
            return None;
        }
        Some(TokenUsage {
            prompt_tokens: self.prompt_eval_count.unwrap_or(0),
            completion_tokens: self.eval_count.unwrap_or(0),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

/// Provider backed by an Ollama server.
pub struct OllamaProvider {
    name: String,
    config: ProviderConfig,
    base_url: String,
    http_client: reqwest::Client,
    available: AtomicBool,
    served_models: RwLock<Vec<String>>,
}

impl OllamaProvider {
    pub fn new(name: &str, config: ProviderConfig) -> Result<Self, LlmError> {
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(default_ollama_url)
            .trim_end_matches('/')
            .to_string();

        let http_client = reqwest::Client::builder()
            .connect_timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|e| LlmError::CompletionFailed {
                provider: name.to_string(),
                reason: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            name: name.to_string(),
            config,
            base_url,
            http_client,
            available: AtomicBool::new(false),
            served_models: RwLock::new(Vec::new()),
        })
    }

    fn served_models(&self) -> Vec<String> {
        self.served_models
            .read()
            .map(|models| models.clone())
            .unwrap_or_default()
    }

    fn map_send_error(&self, e: reqwest::Error, timeout: Duration) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout {
                provider: self.name.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }
        } else if e.is_connect() {
            LlmError::NotAvailable {
                provider: self.name.clone(),
            }
        } else {
            LlmError::CompletionFailed {
                provider: self.name.clone(),
                reason: format!("Failed to send request: {}", e),
            }
        }
    }

    fn completion_failed(&self, reason: impl Into<String>) -> LlmError {
        LlmError::CompletionFailed {
            provider: self.name.clone(),
            reason: reason.into(),
        }
    }

    /// Prepare a generate call: availability, model and timeout.
    fn prepare(&self, options: &CompletionOptions) -> Result<(String, Duration), LlmError> {
        if !self.is_available() {
            return Err(LlmError::NotAvailable {
                provider: self.name.clone(),
            });
        }
        let model = resolve_model(&self.name, &self.config, &self.served_models(), options)?;
        Ok((model, effective_timeout(&self.config, options)))
    }

    async fn send_generate(
        &self,
        model: &str,
        prompt: &str,
        options: &CompletionOptions,
        stream: bool,
        timeout: Duration,
    ) -> Result<reqwest::Response, LlmError> {
        let request = GenerateRequest {
            model,
            prompt,
            system: options.system.as_deref(),
            stream,
            options: GenerateOptions {
                temperature: options.temperature.unwrap_or(self.config.temperature),
            },
        };

        let response = self
            .http_client
            .post(format!("{}/api/generate", self.base_url))
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e, timeout))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(LlmError::ModelNotFound {
                provider: self.name.clone(),
                model: model.to_string(),
            });
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(self.completion_failed(format!("Ollama API error {}: {}", status, body)));
        }

        Ok(response)
    }

    /// Parse one NDJSON line. Blank lines yield `None`; an `error` field fails the call.
    fn parse_stream_line(&self, line: &[u8]) -> Result<Option<GenerateResponse>, LlmError> {
        let line = String::from_utf8_lossy(line);
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let fragment: GenerateResponse = serde_json::from_str(line)
            .map_err(|e| self.completion_failed(format!("Malformed stream line: {}", e)))?;
        if let Some(error) = fragment.error {
            return Err(self.completion_failed(error));
        }
        Ok(Some(fragment))
    }
}

/// Append a fragment's text and forward it to `sink`. Returns whether the stream is done.
async fn absorb_fragment(
    fragment: GenerateResponse,
    content: &mut String,
    usage: &mut Option<TokenUsage>,
    sink: &mpsc::Sender<String>,
) -> bool {
    if fragment.done {
        *usage = fragment.usage();
    }
    if !fragment.response.is_empty() {
        content.push_str(&fragment.response);
        let _ = sink.send(fragment.response).await;
    }
    fragment.done
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> Result<(), LlmError> {
        let url = format!("{}/api/tags", self.base_url);
        debug!("Probing {} at {}", self.name, url);

        let response = self
            .http_client
            .get(&url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                warn!("Cannot reach Ollama at {}: {}", self.base_url, e);
                LlmError::NotAvailable {
                    provider: self.name.clone(),
                }
            })?;

        if !response.status().is_success() {
            warn!("Ollama probe for {} returned {}", self.name, response.status());
            return Err(LlmError::NotAvailable {
                provider: self.name.clone(),
            });
        }

        let tags: TagsResponse = response.json().await.map_err(|e| {
            self.completion_failed(format!("Failed to parse /api/tags response: {}", e))
        })?;

        let models: Vec<String> = tags.models.into_iter().map(|m| m.name).collect();
        info!(
            "Provider {} available with {} served models",
            self.name,
            models.len()
        );

        if let Ok(mut served) = self.served_models.write() {
            *served = models;
        }
        self.available.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn list_models(&self) -> Vec<String> {
        if self.config.models.is_empty() {
            self.served_models()
        } else {
            self.config.models.clone()
        }
    }

    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<ProviderResponse, LlmError> {
        let (model, timeout) = self.prepare(options)?;
        let started = Instant::now();

        let response = self
            .send_generate(&model, prompt, options, false, timeout)
            .await?;

        let body: GenerateResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                self.map_send_error(e, timeout)
            } else {
                self.completion_failed(format!("Failed to parse Ollama response: {}", e))
            }
        })?;

        if let Some(error) = body.error.clone() {
            if body.response.is_empty() {
                return Err(self.completion_failed(error));
            }
        }

        let latency_ms = started.elapsed().as_millis() as u64;
        debug!("{} answered in {}ms (done={})", self.name, latency_ms, body.done);

        Ok(ProviderResponse {
            provider: self.name.clone(),
            model,
            usage: body.usage(),
            content: body.response,
            latency_ms,
            error: body.error,
            fallback: false,
            original_provider: None,
        })
    }

    async fn stream_complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
        sink: mpsc::Sender<String>,
    ) -> Result<ProviderResponse, LlmError> {
        let (model, timeout) = self.prepare(options)?;
        let started = Instant::now();

        let mut response = self
            .send_generate(&model, prompt, options, true, timeout)
            .await?;

        let mut buffer: Vec<u8> = Vec::new();
        let mut content = String::new();
        let mut usage = None;
        let mut done = false;

        'read: loop {
            let chunk = response
                .chunk()
                .await
                .map_err(|e| self.map_send_error(e, timeout))?;
            let Some(bytes) = chunk else { break };
            buffer.extend_from_slice(&bytes);

            // Ollama emits one JSON object per line
            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let Some(fragment) = self.parse_stream_line(&line)? else {
                    continue;
                };
                done = absorb_fragment(fragment, &mut content, &mut usage, &sink).await;
                if done {
                    break 'read;
                }
            }
        }

        // The final object may arrive without a trailing newline
        if !done {
            if let Some(fragment) = self.parse_stream_line(&buffer)? {
                absorb_fragment(fragment, &mut content, &mut usage, &sink).await;
            }
        }

        Ok(ProviderResponse {
            provider: self.name.clone(),
            model,
            content,
            usage,
            latency_ms: started.elapsed().as_millis() as u64,
            error: None,
            fallback: false,
            original_provider: None,
        })
    }

    async fn shutdown(&self) {
        self.available.store(false, Ordering::SeqCst);
        debug!("Provider {} shut down", self.name);
    }
}

//! Configuration file handling.
//!
//! This module handles loading, validating and merging configuration from
//! `.codelens.toml` files.

use crate::models::AggregationStrategy;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Name of the configuration file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = ".codelens.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Worker pool settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// How chunks are dispatched to providers.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Scanner and chunker settings.
    #[serde(default)]
    pub scanner: ScannerConfig,

    /// Provider adapters keyed by name.
    #[serde(default = "default_providers")]
    pub providers: BTreeMap<String, ProviderConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            scheduler: SchedulerConfig::default(),
            dispatch: DispatchConfig::default(),
            scanner: ScannerConfig::default(),
            providers: default_providers(),
        }
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
        }
    }
}

fn default_output() -> String {
    "codelens_report.md".to_string()
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of worker slots.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Extra attempts for a failed chunk before its fallback payload is used.
    #[serde(default)]
    pub task_retries: u32,

    /// How long shutdown waits for each slot to acknowledge termination.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,

    /// Delay before retrying admission while the pending queue is saturated.
    #[serde(default = "default_backpressure_delay")]
    pub backpressure_delay_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            task_retries: 0,
            shutdown_grace_ms: default_shutdown_grace(),
            backpressure_delay_ms: default_backpressure_delay(),
        }
    }
}

/// Available parallelism, capped at 4 concurrent backend calls.
pub fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(4)
}

fn default_shutdown_grace() -> u64 {
    5_000
}

fn default_backpressure_delay() -> u64 {
    10
}

/// Dispatch mode for each chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// One provider through the registry, with fallback.
    #[default]
    Single,
    /// Every selected provider concurrently, then aggregated.
    FanOut,
}

/// Provider dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub mode: DispatchMode,

    /// Aggregation strategy for fan-out.
    #[serde(default)]
    pub strategy: AggregationStrategy,

    /// Try other providers when the selected one fails.
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,

    /// Per-provider timeout during fan-out.
    #[serde(default = "default_timeout_ms")]
    pub fan_out_timeout_ms: u64,

    /// Providers to use; every enabled provider when empty.
    #[serde(default)]
    pub providers: Vec<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::Single,
            strategy: AggregationStrategy::First,
            fallback_enabled: true,
            fan_out_timeout_ms: default_timeout_ms(),
            providers: Vec::new(),
        }
    }
}

/// Which adapter implementation backs a provider entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Ollama-compatible HTTP model server.
    #[default]
    Ollama,
    /// Subprocess reading the prompt on stdin.
    Command,
}

/// Settings for one provider adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Lower numbers are tried first.
    #[serde(default = "default_priority")]
    pub priority: u32,

    /// Allowed models; any model is accepted when empty.
    #[serde(default)]
    pub models: Vec<String>,

    #[serde(default)]
    pub default_model: Option<String>,

    /// Request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Retries on timeout or completion failure.
    #[serde(default = "default_retries")]
    pub max_retries: u32,

    /// Base URL (ollama).
    #[serde(default)]
    pub url: Option<String>,

    /// Executable (command).
    #[serde(default)]
    pub command: Option<String>,

    /// Arguments passed before the prompt is written to stdin (command).
    #[serde(default)]
    pub args: Vec<String>,

    /// Arguments for the availability probe (command). Defaults to `--version`.
    #[serde(default)]
    pub health_args: Option<Vec<String>>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Ollama,
            enabled: true,
            priority: default_priority(),
            models: Vec::new(),
            default_model: Some(default_model()),
            timeout_ms: default_timeout_ms(),
            max_retries: default_retries(),
            url: Some(default_ollama_url()),
            command: None,
            args: Vec::new(),
            health_args: None,
            temperature: default_temperature(),
        }
    }
}

fn default_providers() -> BTreeMap<String, ProviderConfig> {
    let mut providers = BTreeMap::new();
    providers.insert("ollama".to_string(), ProviderConfig::default());
    providers
}

fn default_true() -> bool {
    true
}

fn default_priority() -> u32 {
    1
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

pub fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_retries() -> u32 {
    2
}

fn default_temperature() -> f32 {
    0.1
}

/// File scanner and chunker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Maximum files to analyze.
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// Maximum content bytes per chunk.
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: usize,

    /// File extensions to include.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Patterns to exclude.
    #[serde(default = "default_excludes")]
    pub excludes: Vec<String>,

    /// Maximum file size in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
            max_chunk_bytes: default_max_chunk_bytes(),
            extensions: default_extensions(),
            excludes: default_excludes(),
            max_file_size: default_max_file_size(),
        }
    }
}

fn default_max_files() -> usize {
    200
}

fn default_max_chunk_bytes() -> usize {
    32 * 1024
}

fn default_extensions() -> Vec<String> {
    vec![
        "rs", "py", "js", "ts", "jsx", "tsx", "go", "java", "c", "cpp", "h", "hpp", "cs", "rb",
        "php", "swift", "kt", "scala", "vue", "svelte", "toml", "yaml", "yml", "json", "sql",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_excludes() -> Vec<String> {
    vec![
        ".git",
        "target",
        "node_modules",
        "vendor",
        "dist",
        "build",
        "__pycache__",
        ".venv",
        "venv",
        ".idea",
        ".vscode",
        "package-lock.json",
        "Cargo.lock",
        "yarn.lock",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_max_file_size() -> usize {
    256 * 1024
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE_NAME);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only when
    /// they were explicitly provided.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }
        if args.verbose {
            self.general.verbose = true;
        }

        if let Some(max_workers) = args.max_workers {
            self.scheduler.max_workers = max_workers;
        }
        if let Some(retries) = args.task_retries {
            self.scheduler.task_retries = retries;
        }

        if args.fan_out {
            self.dispatch.mode = DispatchMode::FanOut;
        }
        if let Some(strategy) = args.strategy {
            self.dispatch.strategy = strategy;
        }
        if args.no_fallback {
            self.dispatch.fallback_enabled = false;
        }
        if let Some(ref providers) = args.providers {
            self.dispatch.providers = providers.clone();
        }
        if let Some(timeout) = args.timeout_ms {
            self.dispatch.fan_out_timeout_ms = timeout;
            for provider in self.providers.values_mut() {
                provider.timeout_ms = timeout;
            }
        }

        // Backend overrides only touch ollama-kind providers
        for provider in self.providers.values_mut() {
            if provider.kind != ProviderKind::Ollama {
                continue;
            }
            if let Some(ref url) = args.ollama_url {
                provider.url = Some(url.clone());
            }
            if let Some(ref model) = args.model {
                provider.default_model = Some(model.clone());
            }
        }

        if let Some(max_files) = args.max_files {
            self.scanner.max_files = max_files;
        }
        if let Some(ref extensions) = args.extensions {
            self.scanner.extensions = extensions.clone();
        }
        if let Some(ref excludes) = args.exclude {
            self.scanner.excludes = excludes.clone();
        }
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_workers == 0 {
            bail!("scheduler.max_workers must be at least 1");
        }
        if self.scanner.max_chunk_bytes == 0 {
            bail!("scanner.max_chunk_bytes must be at least 1");
        }

        for name in &self.dispatch.providers {
            if !self.providers.contains_key(name) {
                bail!("dispatch.providers references unknown provider '{}'", name);
            }
        }

        for (name, provider) in &self.providers {
            if provider.kind == ProviderKind::Command && provider.command.is_none() {
                bail!("provider '{}' has kind = \"command\" but no command", name);
            }
            if provider.timeout_ms == 0 {
                bail!("provider '{}' timeout_ms must be at least 1", name);
            }
        }

        if self.enabled_providers().is_empty() {
            bail!("at least one provider must be enabled");
        }

        Ok(())
    }

    /// `validate`, plus the checks that depend on which flags were given.
    /// Runs after `merge_with_args`.
    pub fn validate_with_args(&self, args: &crate::cli::Args) -> Result<()> {
        self.validate()?;

        if args.strategy.is_some() && self.dispatch.mode != DispatchMode::FanOut {
            bail!("--strategy needs fan-out dispatch (--fan-out or dispatch.mode = \"fan_out\")");
        }

        Ok(())
    }

    /// Names of enabled providers selected for dispatch, in priority order.
    pub fn enabled_providers(&self) -> Vec<String> {
        let mut selected: Vec<(&String, &ProviderConfig)> = self
            .providers
            .iter()
            .filter(|(name, cfg)| {
                cfg.enabled
                    && (self.dispatch.providers.is_empty() || self.dispatch.providers.contains(name))
            })
            .collect();
        selected.sort_by(|a, b| a.1.priority.cmp(&b.1.priority).then_with(|| a.0.cmp(b.0)));
        selected.into_iter().map(|(name, _)| name.clone()).collect()
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.scheduler.max_workers >= 1);
        assert!(config.scheduler.max_workers <= 4);
        assert_eq!(config.dispatch.strategy, AggregationStrategy::First);
        assert!(config.dispatch.fallback_enabled);
        assert_eq!(config.providers["ollama"].timeout_ms, 60_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
output = "custom_report.md"
verbose = true

[scheduler]
max_workers = 3
task_retries = 1

[dispatch]
mode = "fan_out"
strategy = "consensus"
fallback_enabled = false

[providers.local]
kind = "ollama"
priority = 2
url = "http://10.0.0.2:11434"
models = ["qwen2.5-coder:7b"]
default_model = "qwen2.5-coder:7b"

[providers.claude]
kind = "command"
priority = 1
command = "claude"
args = ["-p"]
timeout_ms = 120000
max_retries = 0
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.output, "custom_report.md");
        assert!(config.general.verbose);
        assert_eq!(config.scheduler.max_workers, 3);
        assert_eq!(config.scheduler.task_retries, 1);
        assert_eq!(config.dispatch.mode, DispatchMode::FanOut);
        assert_eq!(config.dispatch.strategy, AggregationStrategy::Consensus);
        assert!(!config.dispatch.fallback_enabled);
        assert!(!config.providers.contains_key("ollama"));

        let claude = &config.providers["claude"];
        assert_eq!(claude.kind, ProviderKind::Command);
        assert_eq!(claude.timeout_ms, 120_000);
        assert_eq!(claude.max_retries, 0);

        assert_eq!(config.enabled_providers(), vec!["claude", "local"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_strategy_flag_needs_fan_out_mode() {
        use clap::Parser;
        let args = crate::cli::Args::try_parse_from(["codelens", "--strategy", "best"]).unwrap();

        let mut single = Config::default();
        single.merge_with_args(&args);
        assert!(single.validate_with_args(&args).is_err());

        // Fan-out chosen in the config file, strategy on the command line
        let mut fan_out: Config = toml::from_str("[dispatch]\nmode = \"fan_out\"\n").unwrap();
        fan_out.merge_with_args(&args);
        assert!(fan_out.validate_with_args(&args).is_ok());
        assert_eq!(fan_out.dispatch.strategy, AggregationStrategy::Best);
    }

    #[test]
    fn test_validate_rejects_bad_configs() {
        let mut config = Config::default();
        config.scheduler.max_workers = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.dispatch.providers = vec!["missing".to_string()];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.providers.insert(
            "tool".to_string(),
            ProviderConfig {
                kind: ProviderKind::Command,
                command: None,
                ..ProviderConfig::default()
            },
        );
        assert!(config.validate().is_err());

        let mut config = Config::default();
        for provider in config.providers.values_mut() {
            provider.enabled = false;
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[scheduler]"));
        assert!(toml_str.contains("[dispatch]"));
        assert!(toml_str.contains("[providers.ollama]"));

        let reparsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(reparsed.providers.len(), 1);
    }
}

//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::AggregationStrategy;
use clap::Parser;
use std::path::PathBuf;

/// CodeLens - multi-backend LLM codebase analyzer
///
/// Splits a codebase into chunks, analyzes each chunk with one or more
/// LLM backends and merges the answers into a single report.
///
/// Examples:
///   codelens --path ./my-project
///   codelens --path . --fan-out --strategy consensus --providers ollama,claude
///   codelens --path . --dry-run
///   codelens --compare "Summarize what a B-tree is"
///   codelens --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Directory to analyze
    #[arg(short, long, default_value = ".", value_name = "DIR")]
    pub path: PathBuf,

    /// Output file path for the report
    ///
    /// Defaults to the config's general.output (codelens_report.md).
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Path to configuration file
    ///
    /// If not specified, looks for .codelens.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Number of worker slots (concurrent chunk analyses)
    #[arg(long, value_name = "NUM", env = "CODELENS_MAX_WORKERS")]
    pub max_workers: Option<usize>,

    /// Extra attempts for a failed chunk before its fallback is used
    #[arg(long, value_name = "NUM")]
    pub task_retries: Option<u32>,

    /// Send every chunk to all selected providers concurrently
    #[arg(long)]
    pub fan_out: bool,

    /// Aggregation strategy for fan-out (first, consensus, best, all)
    #[arg(long, value_name = "STRATEGY")]
    pub strategy: Option<AggregationStrategy>,

    /// Providers to use (comma-separated names from the config)
    #[arg(long, value_name = "NAMES", value_delimiter = ',')]
    pub providers: Option<Vec<String>>,

    /// Disable the fallback chain for single-provider dispatch
    #[arg(long)]
    pub no_fallback: bool,

    /// Per-provider timeout in milliseconds
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Ollama API endpoint URL
    #[arg(long, env = "OLLAMA_URL")]
    pub ollama_url: Option<String>,

    /// Default model for Ollama providers
    #[arg(short, long, env = "CODELENS_MODEL")]
    pub model: Option<String>,

    /// Maximum number of files to analyze
    #[arg(long, value_name = "COUNT")]
    pub max_files: Option<usize>,

    /// File extensions to include (comma-separated)
    ///
    /// Example: --extensions rs,py,js
    #[arg(long, value_name = "EXTS", value_delimiter = ',')]
    pub extensions: Option<Vec<String>>,

    /// Patterns to exclude from analysis (comma-separated)
    #[arg(long, value_name = "PATTERNS", value_delimiter = ',')]
    pub exclude: Option<Vec<String>>,

    /// Scan and chunk without contacting any backend
    #[arg(long)]
    pub dry_run: bool,

    /// Send one prompt to every provider and print a comparison
    #[arg(long, value_name = "PROMPT", conflicts_with = "dry_run")]
    pub compare: Option<String>,

    /// Stream one answer from the highest-priority provider
    #[arg(long, value_name = "PROMPT", conflicts_with_all = ["dry_run", "compare"])]
    pub ask: Option<String>,

    /// Exit with code 2 if any chunk had to use a fallback payload
    #[arg(long)]
    pub fail_on_fallback: bool,

    /// Generate a default .codelens.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if self.compare.is_none() && self.ask.is_none() {
            if !self.path.exists() {
                return Err(format!("Directory does not exist: {}", self.path.display()));
            }
            if !self.path.is_dir() {
                return Err(format!("Path is not a directory: {}", self.path.display()));
            }
        }

        if let Some(ref url) = self.ollama_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if self.max_workers == Some(0) {
            return Err("Max workers must be at least 1".to_string());
        }

        if self.max_files == Some(0) {
            return Err("Max files must be at least 1".to_string());
        }

        if self.timeout_ms == Some(0) {
            return Err("Timeout must be at least 1ms".to_string());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.strategy.is_some() && self.compare.is_some() {
            return Err("--compare always collects every answer; drop --strategy".to_string());
        }

        if let Some(ref providers) = self.providers {
            if providers.iter().any(|p| p.trim().is_empty()) {
                return Err("Provider names must not be empty".to_string());
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

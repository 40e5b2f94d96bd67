//! CodeLens - multi-backend LLM codebase analyzer
//!
//! Splits a codebase into chunks, schedules them on a bounded worker pool and
//! sends each one to one or more LLM backends, then merges the answers into a
//! single report.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (configuration, no usable provider, I/O, etc.)
//!   2 - Some chunks fell back and --fail-on-fallback was set

mod analysis;
mod cli;
mod config;
mod consensus;
mod error;
mod models;
mod providers;
mod report;
mod scanner;
mod scheduler;

use analysis::{build_chunks, CategoryMerger, Dispatch, LlmChunkProcessor};
use anyhow::{Context, Result};
use chrono::Utc;
use cli::{Args, OutputFormat};
use config::{Config, DispatchMode, CONFIG_FILE_NAME};
use consensus::{FanOutExecutor, FanOutRequest};
use indicatif::{ProgressBar, ProgressStyle};
use models::{CompletionOptions, MergedAnalysis, Report, ReportMetadata};
use providers::ProviderRegistry;
use scheduler::{ChunkScheduler, Progress};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args, config_requests_verbose(&args));

    info!("CodeLens v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            error!("Analysis failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .codelens.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE_NAME
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE_NAME);
    println!("   Edit it to add providers, tune the worker pool and more.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
///
/// `general.verbose` in the config raises the default level unless --quiet is set.
fn init_logging(args: &Args, config_verbose: bool) {
    let level = if config_verbose && !args.quiet {
        tracing::Level::DEBUG
    } else {
        args.log_level()
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run the selected workflow. Returns the exit code.
async fn run(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    config
        .validate_with_args(&args)
        .context("Invalid configuration")?;

    if let Some(ref prompt) = args.compare {
        return handle_compare(&config, &args, prompt).await;
    }

    if let Some(ref prompt) = args.ask {
        return handle_ask(&config, prompt).await;
    }

    let root = args.path.clone();
    let scan_config = scanner::ScanConfig::from(&config.scanner);
    let file_scanner = scanner::FileScanner::new(root.clone(), scan_config);

    println!("🔍 Scanning {}", file_scanner.root().display());
    let files = file_scanner.collect_files()?;
    let files_scanned = files.len();
    let chunks = build_chunks(files, config.scanner.max_chunk_bytes);
    info!("{} files in {} chunks", files_scanned, chunks.len());

    if args.dry_run {
        return handle_dry_run(&chunks, files_scanned);
    }

    if chunks.is_empty() {
        warn!("No source files found to analyze");
    }

    let registry = Arc::new(init_registry(&config).await?);
    let providers = registry.available_names();
    let dispatch_label = dispatch_label(&config);

    let processor = Arc::new(LlmChunkProcessor::new(
        registry.clone(),
        build_dispatch(&config),
    ));
    let mut chunk_scheduler = ChunkScheduler::new(
        config.scheduler.clone(),
        processor,
        Box::new(CategoryMerger),
    )?;

    println!("🤖 Providers: {}", providers.join(", "));
    println!("   Dispatch: {}", dispatch_label);
    println!("   Workers: {}", chunk_scheduler.max_workers());

    let progress_bar = (!args.quiet).then(|| progress_bar(chunks.len()));
    if let Some(ref bar) = progress_bar {
        let bar = bar.clone();
        chunk_scheduler.add_observer(move |progress: &Progress| {
            bar.set_position(progress.processed as u64);
            if progress.is_complete() {
                bar.set_message("done");
            } else {
                bar.set_message(format!(
                    "{} active, {} pending",
                    progress.active_workers, progress.pending_work
                ));
            }
        });
    }

    println!("\n🔬 Analyzing {} chunks...", chunks.len());
    let chunk_count = chunks.len();
    let outcome = chunk_scheduler.submit(chunks).await;

    let restarts: u32 = chunk_scheduler.health().iter().map(|h| h.restarts).sum();
    if restarts > 0 {
        warn!("Worker slots were restarted {} times", restarts);
    }
    chunk_scheduler.shutdown().await;
    registry.shutdown().await;
    if let Some(bar) = progress_bar {
        bar.finish_and_clear();
    }
    let merged = outcome?;

    println!("\n📝 Generating report...");
    let report = Report {
        metadata: ReportMetadata {
            root: root.display().to_string(),
            analysis_date: Utc::now(),
            providers,
            dispatch: dispatch_label,
            files_scanned,
            chunks: chunk_count,
            duration_seconds: start_time.elapsed().as_secs_f64(),
        },
        analysis: merged,
    };

    let output_path = PathBuf::from(&config.general.output);
    write_report(&report, args.format, &output_path)?;
    print_summary(&report.analysis, report.metadata.duration_seconds);
    println!(
        "\n✅ Analysis complete! Report saved to: {}",
        output_path.display()
    );

    if args.fail_on_fallback && report.analysis.fallback_count() > 0 {
        eprintln!(
            "\n⛔ {} chunks used fallback results. Failing (exit code 2).",
            report.analysis.fallback_count()
        );
        return Ok(2);
    }

    Ok(0)
}

/// Build and initialize the providers selected by the configuration.
async fn init_registry(config: &Config) -> Result<ProviderRegistry> {
    let mut registry =
        ProviderRegistry::from_config(config).context("Failed to create providers")?;
    let initialized = registry
        .initialize()
        .await
        .context("No provider could be initialized")?;
    info!("{} providers ready", initialized);
    Ok(registry)
}

fn build_dispatch(config: &Config) -> Dispatch {
    match config.dispatch.mode {
        DispatchMode::Single => Dispatch::Single(CompletionOptions::default()),
        DispatchMode::FanOut => Dispatch::FanOut(FanOutRequest {
            providers: config.dispatch.providers.clone(),
            strategy: config.dispatch.strategy,
            timeout: Duration::from_millis(config.dispatch.fan_out_timeout_ms),
            options: CompletionOptions::default(),
        }),
    }
}

fn dispatch_label(config: &Config) -> String {
    match config.dispatch.mode {
        DispatchMode::Single if config.dispatch.fallback_enabled => {
            "single (with fallback)".to_string()
        }
        DispatchMode::Single => "single".to_string(),
        DispatchMode::FanOut => format!("fan-out ({})", config.dispatch.strategy),
    }
}

fn progress_bar(total: usize) -> ProgressBar {
    let bar = ProgressBar::new(total as u64);
    match ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        Ok(style) => bar.set_style(style.progress_chars("#>-")),
        Err(e) => debug!("Invalid progress template: {}", e),
    }
    bar
}

/// Handle --compare: one prompt to every provider, printed side by side.
async fn handle_compare(config: &Config, args: &Args, prompt: &str) -> Result<i32> {
    let registry = Arc::new(init_registry(config).await?);
    let executor = FanOutExecutor::new(registry.clone());

    println!("⚖️  Comparing providers: {}", registry.available_names().join(", "));
    let selected = (!config.dispatch.providers.is_empty()).then_some(&config.dispatch.providers[..]);
    let timeout = Duration::from_millis(config.dispatch.fan_out_timeout_ms);
    let comparison = executor.compare_providers(prompt, selected, timeout).await;
    registry.shutdown().await;
    let comparison = comparison?;

    if args.format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&comparison)?);
        return Ok(0);
    }

    let responses = std::iter::once(&comparison.aggregated.primary)
        .chain(comparison.aggregated.alternatives.iter());
    for response in responses {
        println!(
            "\n── {} ({}, {}ms) ──",
            response.provider, response.model, response.latency_ms
        );
        println!("{}", response.content.trim());
    }

    println!(
        "\n📊 Average similarity: {:.2}",
        comparison.report.average_similarity
    );
    for difference in &comparison.report.significant_differences {
        println!(
            "   {} vs {}: {:.2}",
            difference.first, difference.second, difference.similarity
        );
    }
    for recommendation in &comparison.report.recommendations {
        println!("   • {}", recommendation);
    }

    Ok(0)
}

/// Handle --ask: stream one answer to stdout as it arrives, trying providers
/// in priority order until one succeeds.
async fn handle_ask(config: &Config, prompt: &str) -> Result<i32> {
    let registry = Arc::new(init_registry(config).await?);
    let executor = FanOutExecutor::new(registry.clone());

    let (sink, mut fragments) = tokio::sync::mpsc::channel::<String>(64);
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(fragment) = fragments.recv().await {
            print!("{}", fragment);
            let _ = std::io::Write::flush(&mut stdout);
        }
    });

    let response = executor
        .execute_with_best_provider(
            prompt,
            &config.dispatch.providers,
            &CompletionOptions::default(),
            Some(&sink),
        )
        .await;
    drop(sink);
    let _ = printer.await;
    registry.shutdown().await;
    let response = response?;

    println!();
    info!(
        "{} ({}) answered in {}ms",
        response.provider, response.model, response.latency_ms
    );
    if let Some(usage) = response.usage {
        debug!("Tokens used: {}", usage.total());
    }
    Ok(0)
}

/// Handle --dry-run: print the chunk plan and exit.
fn handle_dry_run(chunks: &[models::ChunkTask], files_scanned: usize) -> Result<i32> {
    println!("\n🔍 Dry run: chunk plan (no LLM calls)...\n");

    if chunks.is_empty() {
        println!("   No matching source files found.");
    } else {
        for chunk in chunks {
            println!(
                "   📦 {} ({} files, {} bytes)",
                chunk.id,
                chunk.files.len(),
                chunk.byte_len()
            );
            for path in chunk.file_paths() {
                println!("      📄 {}", path);
            }
        }
        println!(
            "\n   Total: {} files in {} chunks",
            files_scanned,
            chunks.len()
        );
    }

    println!("\n✅ Dry run complete. No LLM calls were made.");
    Ok(0)
}

fn write_report(report: &Report, format: OutputFormat, path: &Path) -> Result<()> {
    let output = match format {
        OutputFormat::Json => report::generate_json_report(report)?,
        OutputFormat::Markdown => report::generate_markdown_report(report),
    };

    std::fs::write(path, &output)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}

fn print_summary(analysis: &MergedAnalysis, duration_seconds: f64) {
    println!("\n📊 Analysis Summary:");
    println!("   Sections: {}", analysis.sections.len());
    println!(
        "   Chunks: {} resolved, {} fallback",
        analysis.resolved_count(),
        analysis.fallback_count()
    );
    for warning in &analysis.warnings {
        println!("   ⚠️  {}", warning);
    }
    println!("   Duration: {:.1}s", duration_seconds);
}

/// Peek at `general.verbose` before logging exists. Load errors are reported
/// later by `load_config`.
fn config_requests_verbose(args: &Args) -> bool {
    let loaded = match args.config {
        Some(ref path) => Config::load(path).ok(),
        None => Config::load_default().ok().flatten(),
    };
    loaded.map(|c| c.general.verbose).unwrap_or(false)
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE_NAME);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}

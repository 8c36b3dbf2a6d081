//! hnkw: keyword extraction and cached embeddings for Hacker News stories
//!
//! `hnkw extract` runs resumable keyword extraction over a JSON Lines story
//! dump, `hnkw embed` resolves every extracted keyword to a vector through the
//! persistent embedding cache, and `hnkw export` hands the cache to
//! downstream analysis.

mod config;

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hnkw_ledger::{Ledger, read_markers_at};
use hnkw_pipeline::{
    BatchResolver, ChatKeywordExtractor, OpenAiEmbedder, ResolverConfig, RunDriver,
    collect_keywords, read_stories,
};
use hnkw_store::{EmbeddingStore, StoreStats};
use serde::Serialize;
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use config::{CONFIG_FILE, Config, DEFAULT_CONFIG, HNKW_DIR};

/// Keyword extraction and cached embeddings for Hacker News stories
#[derive(Parser)]
#[command(name = "hnkw")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to .hnkw directory (default: search for .hnkw/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write logs to .hnkw/logs/ instead of stderr
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new .hnkw directory with config file
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Extract keywords from stories, skipping those already in the ledger
    Extract {
        /// JSON Lines file with one story per line
        #[arg(long)]
        stories: PathBuf,
    },

    /// Embed every keyword in the ledger that is not cached yet
    Embed {
        /// Keywords per embedding request (overrides config)
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Show ledger and cache statistics without changing either
    Stats,

    /// Export the embedding cache as JSON Lines
    ///
    /// Fails if any stored vector holds NaN or infinity, which JSON cannot carry.
    Export {
        /// Output file
        #[arg(long, short)]
        output: PathBuf,
    },
}

fn env_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Initialize logging to stderr for interactive use.
fn init_logging(verbose: bool) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter(verbose))
        .init();
}

/// Initialize logging to rotating files in .hnkw/logs/ with daily rotation.
fn init_file_logging(hnkw_dir: &Path, verbose: bool) {
    let logs_dir = hnkw_dir.join("logs");

    if let Err(e) = std::fs::create_dir_all(&logs_dir) {
        eprintln!("Warning: Failed to create logs directory: {}", e);
        // Fall back to stderr logging
        init_logging(verbose);
        return;
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "hnkw.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Dropping the guard would stop logging
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(env_filter(verbose))
        .init();
}

/// Load configuration from an explicit .hnkw directory or by discovery.
///
/// Returns the config and the .hnkw directory it belongs to, if any.
fn load_config(override_path: Option<&PathBuf>) -> Result<(Config, Option<PathBuf>)> {
    if let Some(path) = override_path {
        let config_file = if path.is_dir() {
            path.join(CONFIG_FILE)
        } else {
            path.clone()
        };
        let hnkw_dir = config_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| path.clone());

        let config = if config_file.exists() {
            Config::from_file(&config_file)?
        } else {
            Config::default()
        };
        return Ok((config, Some(hnkw_dir)));
    }

    match Config::find_and_load()? {
        Some((config, hnkw_dir)) => Ok((config, Some(hnkw_dir))),
        None => Ok((Config::default(), None)),
    }
}

fn validate(config: &Config) -> Result<()> {
    let errors = config.validate();
    if errors.is_empty() {
        return Ok(());
    }
    for error in &errors {
        tracing::error!("Invalid configuration: {}", error);
    }
    anyhow::bail!("configuration has {} error(s)", errors.len())
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, hnkw_dir) = load_config(cli.config.as_ref())?;

    if cli.log_file {
        let dir = hnkw_dir.clone().unwrap_or_else(|| PathBuf::from(HNKW_DIR));
        init_file_logging(&dir, cli.verbose);
    } else {
        init_logging(cli.verbose);
    }

    match &hnkw_dir {
        Some(dir) => tracing::debug!("Using config directory {}", dir.display()),
        None => tracing::debug!("No .hnkw/config.toml found, using defaults"),
    }

    match cli.command {
        Commands::Init { force } => init(hnkw_dir.as_deref(), force),
        Commands::Extract { stories } => {
            validate(&config)?;
            extract(&config, hnkw_dir.as_deref(), &stories).await
        }
        Commands::Embed { batch_size } => {
            validate(&config)?;
            embed(&config, hnkw_dir.as_deref(), batch_size).await
        }
        Commands::Stats => stats(&config, hnkw_dir.as_deref()),
        Commands::Export { output } => export(&config, hnkw_dir.as_deref(), &output),
    }
}

fn init(hnkw_dir: Option<&Path>, force: bool) -> Result<()> {
    let hnkw_dir = hnkw_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(HNKW_DIR));
    let config_path = hnkw_dir.join(CONFIG_FILE);

    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists. Use --force to overwrite.",
            config_path.display()
        );
    }

    std::fs::create_dir_all(&hnkw_dir)
        .with_context(|| format!("Failed to create {}", hnkw_dir.display()))?;
    std::fs::write(&config_path, DEFAULT_CONFIG)?;

    info!("Created {}", config_path.display());
    info!("Next steps:");
    info!("  1. Set LLM_BASE_URL and LLM_API_KEY, or edit {}", config_path.display());
    info!("  2. Run 'hnkw extract --stories stories.jsonl' to extract keywords");
    info!("  3. Run 'hnkw embed' to embed the extracted keywords");
    Ok(())
}

async fn extract(config: &Config, hnkw_dir: Option<&Path>, stories_path: &Path) -> Result<()> {
    let file = File::open(stories_path)
        .with_context(|| format!("Failed to open stories file: {}", stories_path.display()))?;
    let stories = read_stories(BufReader::new(file))
        .with_context(|| format!("Failed to read stories from {}", stories_path.display()))?;

    let ledger_path = config.resolve_ledger_path(hnkw_dir);
    let ledger = Ledger::open(&ledger_path)
        .with_context(|| format!("Failed to open ledger: {}", ledger_path.display()))?;

    let extractor = ChatKeywordExtractor::new(config.extraction_api(env_var), config.chat_options())?;
    let mut driver = RunDriver::new(ledger, Arc::new(extractor))?;
    let report = driver.run(&stories).await?;

    for failure in &report.failures {
        tracing::warn!("{}", failure);
    }
    println!(
        "extracted {} stories, {} failed, {} already done",
        report.done, report.failed, report.skipped
    );
    if report.failed > 0 {
        println!("re-run the same command to retry failed stories");
    }
    Ok(())
}

async fn embed(config: &Config, hnkw_dir: Option<&Path>, batch_size: Option<usize>) -> Result<()> {
    let ledger_path = config.resolve_ledger_path(hnkw_dir);
    let ledger = Ledger::open(&ledger_path)
        .with_context(|| format!("Failed to open ledger: {}", ledger_path.display()))?;
    let keywords = collect_keywords(&ledger.read_markers()?);
    info!(keywords = keywords.len(), "Collected keywords from ledger");

    let store_path = config.resolve_store_path(hnkw_dir);
    let store = EmbeddingStore::open(&store_path, config.store_config())
        .with_context(|| format!("Failed to open embedding store: {}", store_path.display()))?;

    let embedder = OpenAiEmbedder::new(config.embedding_api(env_var))?;
    let resolver_config =
        ResolverConfig::default().with_batch_size(batch_size.unwrap_or(config.embedding.batch_size));
    let mut resolver = BatchResolver::new(store, Arc::new(embedder), resolver_config)?;

    let resolution = resolver.resolve_with_stats(&keywords).await?;
    resolver.into_store().close()?;

    println!(
        "{} keywords: {} cached, {} computed in {} requests",
        resolution.embeddings.len(),
        resolution.stats.cached,
        resolution.stats.computed,
        resolution.stats.compute_calls
    );
    Ok(())
}

#[derive(Serialize)]
struct Summary {
    ledger: PathBuf,
    completed_stories: usize,
    distinct_keywords: usize,
    store: PathBuf,
    cached_keywords: usize,
    dimensions: Vec<usize>,
    missing_keywords: usize,
}

fn stats(config: &Config, hnkw_dir: Option<&Path>) -> Result<()> {
    let ledger_path = config.resolve_ledger_path(hnkw_dir);
    let markers = if ledger_path.exists() {
        read_markers_at(&ledger_path)?
    } else {
        Vec::new()
    };
    let keywords = collect_keywords(&markers);

    let store_path = config.resolve_store_path(hnkw_dir);
    let (store_stats, cached) = if store_path.exists() {
        let mut store = EmbeddingStore::open_read_only(&store_path, config.store_config())
            .with_context(|| format!("Failed to open embedding store: {}", store_path.display()))?;
        let found = store.get_embeddings(&keywords)?.len();
        let store_stats = store.stats()?;
        store.close()?;
        (store_stats, found)
    } else {
        (StoreStats::default(), 0)
    };

    let summary = Summary {
        ledger: ledger_path,
        completed_stories: markers.len(),
        distinct_keywords: keywords.len(),
        store: store_path,
        cached_keywords: store_stats.record_count,
        dimensions: store_stats.dimensions,
        missing_keywords: keywords.len() - cached,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[derive(Serialize)]
struct ExportRecord<'a> {
    keyword: &'a str,
    embedding: &'a [f32],
}

fn export(config: &Config, hnkw_dir: Option<&Path>, output: &Path) -> Result<()> {
    let store_path = config.resolve_store_path(hnkw_dir);
    if !store_path.exists() {
        anyhow::bail!("No embedding store at {}", store_path.display());
    }
    let mut store = EmbeddingStore::open_read_only(&store_path, config.store_config())?;
    let records = store.all_embeddings()?;
    store.close()?;

    // JSON has no NaN or infinity; serde_json would write them as null
    if let Some((keyword, _)) = records
        .iter()
        .find(|(_, embedding)| embedding.iter().any(|v| !v.is_finite()))
    {
        anyhow::bail!("Embedding for '{}' has non-finite values, cannot export as JSON", keyword);
    }

    let file = File::create(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    let mut writer = BufWriter::new(file);
    for (keyword, embedding) in &records {
        serde_json::to_writer(&mut writer, &ExportRecord { keyword, embedding })?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;

    info!(records = records.len(), output = %output.display(), "Exported embeddings");
    Ok(())
}

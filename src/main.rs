//! Catalog Harvester main entry point
//!
//! This is the command-line interface for the catalog crawling engine.

use anyhow::{bail, Context};
use catalog_harvester::config::{load_config_with_hash, Config};
use catalog_harvester::output::{load_statistics, print_statistics};
use catalog_harvester::progress::open_progress_store;
use catalog_harvester::storage::open_catalog_store;
use catalog_harvester::supervisor::{PipelineLauncher, WorkerStatus, WorkerSupervisor};
use catalog_harvester::{SessionOutcome, WorkerState};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// How often the crawl mode checks whether every category has finished
const COMPLETION_POLL: Duration = Duration::from_secs(5);

/// Catalog Harvester: an adaptive catalog crawler
///
/// Crawls a paginated catalog API one category at a time, skipping items it
/// already has, slowing down when the source starts throttling, and resuming
/// from the last page after an interruption.
#[derive(Parser, Debug)]
#[command(name = "catalog-harvester")]
#[command(version = "1.0.0")]
#[command(about = "An adaptive catalog crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Only crawl these categories (repeatable; defaults to all enabled ones)
    #[arg(long = "category", value_name = "NAME")]
    categories: Vec<String>,

    /// Forget saved cursors and error logs before crawling
    #[arg(long)]
    fresh: bool,

    /// Show record counts and per-category progress, then exit
    #[arg(long, conflicts_with_all = ["dry_run", "errors", "reset", "cleanup"])]
    status: bool,

    /// Show the logged failures of a category, then exit
    #[arg(long, value_name = "CATEGORY")]
    errors: Option<String>,

    /// Reset a category's cursor and error log, then exit
    #[arg(long, value_name = "CATEGORY")]
    reset: Option<String>,

    /// Remove progress entries older than DAYS, then exit
    #[arg(long, value_name = "DAYS")]
    cleanup: Option<u32>,

    /// Validate config and show what would be crawled without crawling
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let categories = select_categories(&config, &cli.categories)?;

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(&config, &categories);
    } else if cli.status {
        handle_status(&config, &categories)?;
    } else if let Some(category) = &cli.errors {
        handle_errors(&config, category)?;
    } else if let Some(category) = &cli.reset {
        handle_reset(&config, category)?;
    } else if let Some(days) = cli.cleanup {
        handle_cleanup(&config, days)?;
    } else {
        handle_crawl(config, config_hash, categories, cli.fresh).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("catalog_harvester=info,warn"),
            1 => EnvFilter::new("catalog_harvester=debug,info"),
            2 => EnvFilter::new("catalog_harvester=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Resolves `--category` flags against the configured categories
fn select_categories(config: &Config, requested: &[String]) -> anyhow::Result<Vec<String>> {
    if requested.is_empty() {
        return Ok(config.enabled_categories());
    }

    for name in requested {
        if !config.categories.iter().any(|c| &c.name == name) {
            bail!("category '{}' is not configured", name);
        }
    }
    Ok(requested.to_vec())
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config, categories: &[String]) {
    println!("=== Catalog Harvester Dry Run ===\n");

    println!("Source API:");
    println!("  Base URL: {}", config.api.base_url);
    println!("  Listing: {}", config.api.listing_path);
    println!("  Detail: {}", config.api.detail_path);
    println!("  Sub-record: {}", config.api.sub_record_path);
    println!("  Request timeout: {}s", config.api.request_timeout);

    println!("\nCrawler Configuration:");
    println!("  Batch size: {}", config.crawler.batch_size);
    println!(
        "  Sub-record batch size: {} (concurrency {})",
        config.crawler.sub_record_batch_size, config.crawler.sub_record_concurrency
    );
    println!("  Max empty pages: {}", config.crawler.max_empty_pages);
    match config.crawler.max_pages {
        Some(max) => println!("  Max pages per session: {}", max),
        None => println!("  Max pages per session: unlimited"),
    }
    println!(
        "  Max session duration: {}s",
        config.crawler.max_session_duration
    );
    println!("  Queue limit: {}", config.crawler.queue_limit);

    println!("\nRate Control:");
    println!("  Base delay: {}ms", config.rate.base_delay);
    println!("  Max delay: {}ms", config.rate.max_delay);

    println!("\nUser Agent:");
    println!("  Name: {}", config.user_agent.crawler_name);
    println!("  Version: {}", config.user_agent.crawler_version);
    println!("  Contact URL: {}", config.user_agent.contact_url);

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);
    println!("  Progress cache: {}", config.storage.cache_path);

    println!("\nCategories ({}):", categories.len());
    for category in categories {
        println!("  - {}", category);
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Would start {} workers", categories.len());
}

/// Handles the --status mode: shows statistics from the database
fn handle_status(config: &Config, categories: &[String]) -> anyhow::Result<()> {
    println!("Database: {}\n", config.storage.database_path);

    let store = open_catalog_store(Path::new(&config.storage.database_path))
        .context("failed to open catalog database")?;
    let progress =
        open_progress_store(&config.storage).context("failed to open progress cache")?;

    let stats = load_statistics(&store, &progress, categories)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --errors mode: lists a category's logged failures
fn handle_errors(config: &Config, category: &str) -> anyhow::Result<()> {
    let progress =
        open_progress_store(&config.storage).context("failed to open progress cache")?;
    let failed = progress.get_failed_pages(category)?;

    println!("=== Logged failures for '{}' ===\n", category);
    if failed.errors.is_empty() {
        println!("No failures logged");
        return Ok(());
    }

    for entry in &failed.errors {
        let location = match (&entry.page, &entry.item) {
            (Some(page), _) => format!("page {}", page),
            (None, Some(item)) => format!("item {}", item),
            (None, None) => "-".to_string(),
        };
        println!(
            "  {} [{}] {}: {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.error_type,
            location,
            entry.message
        );
    }

    if !failed.pages.is_empty() {
        let pages: Vec<String> = failed.pages.iter().map(|p| p.to_string()).collect();
        println!("\nFailed pages: {}", pages.join(", "));
    }

    Ok(())
}

/// Handles the --reset mode
fn handle_reset(config: &Config, category: &str) -> anyhow::Result<()> {
    let progress =
        open_progress_store(&config.storage).context("failed to open progress cache")?;
    progress.reset_progress(category)?;
    println!("✓ Progress for '{}' reset", category);
    Ok(())
}

/// Handles the --cleanup mode
fn handle_cleanup(config: &Config, days: u32) -> anyhow::Result<()> {
    let progress =
        open_progress_store(&config.storage).context("failed to open progress cache")?;
    let removed = progress.cleanup(days)?;
    println!("✓ Removed {} entries older than {} days", removed, days);
    Ok(())
}

/// Handles the main crawl operation
///
/// Runs until Ctrl-C, or until every category has completed when no rerun
/// interval is configured.
async fn handle_crawl(
    config: Config,
    config_hash: String,
    categories: Vec<String>,
    fresh: bool,
) -> anyhow::Result<()> {
    if categories.is_empty() {
        bail!("no enabled categories to crawl");
    }

    let progress =
        open_progress_store(&config.storage).context("failed to open progress cache")?;
    if fresh {
        tracing::info!("Starting fresh crawl (ignoring saved cursors)");
        for category in &categories {
            progress.reset_progress(category)?;
        }
    } else {
        tracing::info!("Starting crawl (will resume saved cursors)");
    }

    // Creates the schema once before workers open their own connections
    open_catalog_store(Path::new(&config.storage.database_path))
        .context("failed to open catalog database")?;

    let rerun = config.supervisor.rerun_interval();
    let config = Arc::new(config);
    let launcher = Arc::new(PipelineLauncher::new(Arc::clone(&config), Some(config_hash)));
    let (supervisor, crawler) = WorkerSupervisor::new(
        config.supervisor.clone(),
        categories,
        launcher,
        Some(progress),
    );
    let supervisor = tokio::spawn(supervisor.run());

    let mut poll = tokio::time::interval(COMPLETION_POLL);
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                tracing::info!("Interrupt received, stopping workers");
                break;
            }
            _ = poll.tick() => {
                if rerun.is_none() && all_completed(&crawler.status().await?) {
                    tracing::info!("All categories completed");
                    break;
                }
            }
        }
    }

    let statuses = crawler.shutdown().await?;
    supervisor.await.context("supervisor task failed")?;

    for status in &statuses {
        let counters = status.counters;
        tracing::info!(
            "[{}] {} - {} pages, {} new, {} updated, {} skipped, {} errors, {} restarts",
            status.category,
            status.state,
            counters.pages,
            counters.new_items,
            counters.updated_items,
            counters.skipped_duplicates,
            counters.errors,
            status.restart_count
        );
    }

    Ok(())
}

/// Paused sessions are resumed by the supervisor, so they are not finished
fn all_completed(statuses: &[WorkerStatus]) -> bool {
    statuses.iter().all(|status| {
        status.state == WorkerState::Completed
            && status.last_outcome != Some(SessionOutcome::Paused)
    })
}

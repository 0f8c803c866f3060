//! Shoal main entry point
//!
//! This is the command-line interface for the Shoal crawl orchestrator.

use anyhow::Context;
use clap::Parser;
use shoal::config::{load_config_with_hash, Config};
use shoal::crawler::crawl;
use shoal::output::{open_sinks, print_report};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Shoal: a polite crawl-job orchestrator
///
/// Shoal fetches pages concurrently while respecting robots.txt and per-host
/// rate limits, extracts structured records with CSS selectors, and streams
/// them as JSON Lines or into SQLite.
#[derive(Parser, Debug)]
#[command(name = "shoal")]
#[command(version)]
#[command(about = "A polite crawl-job orchestrator", long_about = None)]
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

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        print_dry_run(&config);
        return Ok(());
    }

    handle_crawl(&config, &config_hash, cli.quiet).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("shoal=info,warn"),
            1 => EnvFilter::new("shoal=debug,info"),
            2 => EnvFilter::new("shoal=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    // Logs go to stderr; stdout may carry the record stream
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows what would be crawled
fn print_dry_run(config: &Config) {
    let crawler = &config.crawler;

    println!("=== Shoal Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Workers: {}", crawler.worker_count);
    println!("  Min interval per host: {}ms", crawler.min_interval_per_host);
    println!("  Fetch timeout: {}ms", crawler.fetch_timeout);
    println!(
        "  Retries: {} (backoff {}ms, max {}ms)",
        crawler.max_retries, crawler.backoff_base, crawler.backoff_max
    );
    println!("  Max depth: {}", crawler.max_depth);
    match crawler.page_budget() {
        Some(budget) => println!("  Page budget: {}", budget),
        None => println!("  Page budget: unlimited"),
    }
    println!("  Respect robots.txt: {}", crawler.respect_robots);

    println!("\nUser Agent: {}", config.user_agent.header_value());

    println!("\nOutput:");
    match &config.output.database_path {
        Some(path) => println!("  Database: {}", path),
        None => {
            println!("  Records: {}", config.output.records_path);
            println!("  Failures: {}", config.output.failures_path);
        }
    }

    println!("\nSeeds ({}):", config.seeds.len());
    for seed in &config.seeds {
        println!("  - {} (priority {})", seed.url, seed.priority);
    }

    if !config.scope.allowed_hosts.is_empty() {
        println!("\nAllowed hosts: {}", config.scope.allowed_hosts.join(", "));
    }
    if !config.scope.blocked_hosts.is_empty() {
        println!("Blocked hosts: {}", config.scope.blocked_hosts.join(", "));
    }

    println!("\nExtraction:");
    println!(
        "  Item selector: {}",
        config.extract.item.as_deref().unwrap_or("(whole page)")
    );
    println!("  Follow selector: {}", config.extract.follow);
    for field in &config.extract.fields {
        println!("  - {}", field.name);
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the main crawl operation
async fn handle_crawl(config: &Config, config_hash: &str, quiet: bool) -> anyhow::Result<()> {
    let (records, failures) =
        open_sinks(&config.output, config_hash).context("failed to open output sinks")?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, draining crawl");
                cancel.cancel();
            }
        });
    }

    tracing::info!("Starting crawl with {} seed URLs", config.seeds.len());
    let report = crawl(config, records, failures, cancel)
        .await
        .context("crawl failed")?;

    if !quiet {
        print_report(&report);
    }

    if report.cancelled {
        tracing::warn!("Crawl was cancelled; {} URLs discarded", report.discarded);
    } else {
        tracing::info!("Crawl completed successfully");
    }

    Ok(())
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use mdharvest_client::{DEFAULT_BASE_URL, FirecrawlService};
use mdharvest_core::{
    AggregateOptions, AppError, Boundary, CircuitBreakerConfig, CrawlConfig, CrawlMode,
    CrawlResult, Crawler, RetryPolicy, TracingCrawlReporter,
};

#[derive(Parser)]
#[command(name = "mdharvest", version, about = "Harvest a documentation site into Markdown")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl a site section and write one Markdown file per page
    Crawl(CrawlArgs),
}

#[derive(Args)]
struct CrawlArgs {
    /// Start URL; also defines the default boundary
    #[arg(short, long)]
    url: String,

    /// Directory the Markdown tree is written into
    #[arg(short, long, default_value = "output")]
    output_dir: PathBuf,

    /// Host pages must belong to (defaults to the start URL's host)
    #[arg(long)]
    allowed_host: Option<String>,

    /// Path prefix pages must fall under (defaults to the start URL's directory)
    #[arg(long)]
    allowed_prefix: Option<String>,

    /// crawl, discover or single
    #[arg(short, long, default_value_t = CrawlMode::Crawl)]
    mode: CrawlMode,

    #[arg(long, default_value_t = 200)]
    max_pages: usize,

    /// Overall time budget in seconds
    #[arg(long, default_value_t = 120)]
    timeout: u64,

    /// Per-request HTTP timeout in seconds
    #[arg(long, default_value_t = 60)]
    request_timeout: u64,

    /// Seconds between job status polls
    #[arg(long, default_value_t = 2.0)]
    poll_interval: f64,

    /// Concurrent page fetches in discover mode
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Retries after the first attempt of each service call
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Delay before the first retry, in seconds
    #[arg(long, default_value_t = 1.0)]
    retry_delay: f64,

    #[arg(long, default_value_t = 2.0)]
    backoff_factor: f64,

    /// Consecutive failures before an endpoint's circuit opens
    #[arg(long, default_value_t = 5)]
    breaker_threshold: u32,

    /// Seconds an open circuit waits before probing
    #[arg(long, default_value_t = 60)]
    breaker_cooldown: u64,

    /// Replace existing files instead of skipping them
    #[arg(long, default_value_t = false)]
    overwrite: bool,

    #[arg(long, default_value_t = false)]
    no_frontmatter: bool,

    /// Do not fall back to local discovery when job submission fails
    #[arg(long, default_value_t = false)]
    no_fallback: bool,

    /// Write every page into one `<title>_aggregated.md` instead of a tree
    #[arg(long, default_value_t = false)]
    aggregate: bool,

    /// Put a table of contents at the top of the aggregated file
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    include_toc: bool,

    /// Deepest heading level listed in the table of contents
    #[arg(long, default_value_t = 3)]
    toc_max_level: usize,

    /// Push every page after the first one heading level down
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    normalize_headings: bool,

    /// Write the full result as JSON to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Content service base URL
    #[arg(long, env = "MDHARVEST_API_URL", default_value = DEFAULT_BASE_URL)]
    api_url: String,

    /// API key (reads from MDHARVEST_API_KEY if not provided)
    #[arg(long, env = "MDHARVEST_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let directive = if cli.verbose {
        "mdharvest=debug"
    } else {
        "mdharvest=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Crawl(args) => cmd_crawl(args).await,
    }
}

async fn cmd_crawl(args: CrawlArgs) -> Result<()> {
    let config = build_config(&args)?;

    tracing::info!(
        url = %config.start_url(),
        mode = %config.mode(),
        output = %config.output_dir().display(),
        "Starting crawl"
    );

    let service = FirecrawlService::with_base_url(args.api_key.as_deref(), &args.api_url)
        .and_then(|service| service.with_timeout(request_timeout(&args)?))
        .context("Failed to create content service client")?;
    let crawler = Crawler::new(config, service);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing with partial results");
            ctrl_c.cancel();
        }
    });

    let result = crawler.run(cancel, &TracingCrawlReporter).await;

    println!("{}", result.summary());

    if let Some(path) = &args.report {
        write_report(&result, path)?;
        tracing::info!(path = %path.display(), "Report written");
    }

    Ok(())
}

fn build_config(args: &CrawlArgs) -> Result<CrawlConfig> {
    let retry = RetryPolicy {
        max_retries: args.max_retries,
        base_delay: seconds(args.retry_delay, "--retry-delay")?,
        backoff_factor: args.backoff_factor,
        ..Default::default()
    };
    let breaker = CircuitBreakerConfig {
        failure_threshold: args.breaker_threshold,
        cool_down: Duration::from_secs(args.breaker_cooldown),
    };

    let mut builder = CrawlConfig::builder(&args.url)
        .with_output_dir(&args.output_dir)
        .with_mode(args.mode)
        .with_max_pages(args.max_pages)
        .with_timeout(Duration::from_secs(args.timeout))
        .with_poll_interval(seconds(args.poll_interval, "--poll-interval")?)
        .with_workers(args.workers)
        .with_overwrite(args.overwrite)
        .with_frontmatter(!args.no_frontmatter)
        .with_fallback(!args.no_fallback)
        .with_retry_policy(retry)
        .with_breaker_config(breaker);

    if let Some(boundary) = boundary_override(args)? {
        builder = builder.with_boundary(boundary);
    }
    if args.aggregate {
        builder = builder.with_aggregate(AggregateOptions {
            include_toc: args.include_toc,
            toc_max_level: args.toc_max_level,
            normalize_headings: args.normalize_headings,
        });
    }

    builder.build().context("Invalid crawl configuration")
}

/// Explicit host/prefix flags; whichever is missing comes from the start URL.
fn boundary_override(args: &CrawlArgs) -> Result<Option<Boundary>> {
    if args.allowed_host.is_none() && args.allowed_prefix.is_none() {
        return Ok(None);
    }

    let derived = Boundary::from_start_url(&args.url).context("Cannot derive crawl boundary")?;
    let host = args
        .allowed_host
        .clone()
        .unwrap_or_else(|| derived.host().to_string());
    let prefix = args
        .allowed_prefix
        .clone()
        .unwrap_or_else(|| derived.path_prefix().to_string());

    Ok(Some(Boundary::new(host, prefix)))
}

/// HTTP timeout for single requests; never longer than the whole run.
fn request_timeout(args: &CrawlArgs) -> Result<Duration, AppError> {
    if args.request_timeout == 0 {
        return Err(AppError::ConfigError(
            "--request-timeout must be greater than zero".into(),
        ));
    }
    Ok(Duration::from_secs(args.request_timeout.min(args.timeout.max(1))))
}

fn seconds(value: f64, flag: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("{flag} must be a non-negative number"))
}

fn write_report(result: &CrawlResult, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(result).context("Failed to serialize crawl report")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report: {}", path.display()))
}

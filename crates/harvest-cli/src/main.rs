use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use harvest_client::{HtmlArticleExtractor, ParquetSink, ReqwestTransport, WhatlangDetector};
use harvest_core::index::DEFAULT_BASE_URL;
use harvest_core::traits::{NullSink, OutputSink};
use harvest_core::{
    ArchiveIndex, ArticleField, DateWindow, Dispatcher, FilterCriteria, HarvestConfig,
    TracingReporter, UrlPatterns,
};

#[derive(Parser)]
#[command(name = "harvest", version, about = "Extract news articles from CC-NEWS archives")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download archive files in a date window and extract their articles
    Run(RunArgs),

    /// List the archive files captured in a date window
    List(WindowArgs),
}

#[derive(Args)]
struct WindowArgs {
    /// Start of the window, inclusive (YYYY-MM-DD or RFC 3339)
    #[arg(long, env = "HARVEST_START", value_parser = parse_timestamp)]
    start: DateTime<Utc>,

    /// End of the window, exclusive (YYYY-MM-DD or RFC 3339)
    #[arg(long, env = "HARVEST_END", value_parser = parse_timestamp)]
    end: DateTime<Utc>,

    /// Archive host (e.g. a mirror of data.commoncrawl.org)
    #[arg(long, env = "HARVEST_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    window: WindowArgs,

    /// URL glob to keep, e.g. "*.bbc.co.uk/*" (repeatable)
    #[arg(short, long = "pattern")]
    patterns: Vec<String>,

    /// File with one URL glob per line (`#` starts a comment)
    #[arg(long, env = "HARVEST_PATTERNS_FILE")]
    patterns_file: Option<PathBuf>,

    /// Directory receiving one dataset per archive file
    #[arg(short, long, env = "HARVEST_OUTPUT_DIR")]
    output_dir: PathBuf,

    /// Stop each job after this many records
    #[arg(long, env = "HARVEST_LIMIT")]
    limit: Option<u64>,

    /// Concurrent jobs (defaults to the number of CPUs)
    #[arg(short, long, env = "HARVEST_WORKERS")]
    workers: Option<usize>,

    /// Log counters and progress every N records
    #[arg(long, env = "HARVEST_REPORT_EVERY", default_value_t = harvest_core::config::DEFAULT_REPORT_EVERY)]
    report_every: u64,

    /// Write buffered articles every N articles instead of once per job
    #[arg(long, env = "HARVEST_FLUSH_EVERY")]
    flush_every: Option<usize>,

    /// Partition output by these columns (comma separated)
    #[arg(
        long,
        env = "HARVEST_PARTITION_BY",
        value_delimiter = ',',
        default_values_t = [ArticleField::DateCrawled, ArticleField::Language]
    )]
    partition_by: Vec<ArticleField>,

    /// Write each dataset without partition directories
    #[arg(long, default_value_t = false, conflicts_with = "partition_by")]
    unpartitioned: bool,

    /// Extract but do not write any output
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("harvest=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => cmd_run(args).await,
        Commands::List(args) => cmd_list(args).await,
    }
}

async fn cmd_list(args: WindowArgs) -> Result<()> {
    let window = DateWindow::new(args.start, args.end)?;
    let index = ArchiveIndex::with_base_url(transport()?, &args.base_url)?;

    for reference in index.resolve(&window, &TracingReporter).await {
        println!("{}", reference.locator());
    }
    Ok(())
}

async fn cmd_run(args: RunArgs) -> Result<()> {
    let window = DateWindow::new(args.window.start, args.window.end)?;

    let mut patterns = args.patterns;
    if let Some(path) = &args.patterns_file {
        patterns.extend(read_patterns(path)?);
    }
    let criteria = FilterCriteria::new(UrlPatterns::new(patterns)?, window);

    let partition_by = if args.unpartitioned {
        Vec::new()
    } else {
        args.partition_by
    };
    let mut builder = HarvestConfig::builder(&args.output_dir)
        .report_every(args.report_every)
        .partition_by(partition_by);
    if let Some(limit) = args.limit {
        builder = builder.record_limit(limit);
    }
    if let Some(workers) = args.workers {
        builder = builder.workers(workers);
    }
    if let Some(n) = args.flush_every {
        builder = builder.flush_every(n);
    }
    let config = builder.build()?;

    let transport = transport()?;
    let index = ArchiveIndex::with_base_url(transport.clone(), &args.window.base_url)?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, finishing running jobs");
                cancel.cancel();
            }
        }
    });

    tracing::info!(
        output_dir = %config.output_dir().display(),
        workers = config.workers(),
        "Starting harvest"
    );

    if args.dry_run {
        harvest(transport, NullSink, config, &index, &criteria, cancel).await
    } else {
        harvest(transport, ParquetSink::new(), config, &index, &criteria, cancel).await
    }
}

async fn harvest<S: OutputSink + 'static>(
    transport: ReqwestTransport,
    sink: S,
    config: HarvestConfig,
    index: &ArchiveIndex<ReqwestTransport>,
    criteria: &FilterCriteria,
    cancel: CancellationToken,
) -> Result<()> {
    let dispatcher = Dispatcher::new(
        transport,
        HtmlArticleExtractor::new(),
        WhatlangDetector::new(),
        sink,
        config,
    );
    let report = dispatcher
        .harvest(index, criteria, cancel, TracingReporter)
        .await;

    tracing::info!(
        locations = report.locations.len(),
        failed = report.failed_jobs.len(),
        "Harvest finished {}",
        report.counters
    );

    // Report JSON to stdout
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn transport() -> Result<ReqwestTransport> {
    ReqwestTransport::new().context("Failed to create HTTP client")
}

/// URL globs from a file, one per line. Blank lines and `#` comments are skipped.
fn read_patterns(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read patterns file: {}", path.display()))?;
    Ok(parse_patterns(&content))
}

fn parse_patterns(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM:SS` (taken as UTC) or `YYYY-MM-DD`.
fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(ts.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
        .ok_or_else(|| format!("invalid timestamp '{s}', expected YYYY-MM-DD or RFC 3339"))
}

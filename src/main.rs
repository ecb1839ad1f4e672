use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use edgescout::config::{
    LogFormat, LogLevel, DEFAULT_DAEMON_INTERVAL_SECS, DEFAULT_SCAN_COUNT, DEFAULT_SCAN_RATE_MS,
};
use edgescout::fetcher::{default_providers, filter_providers, named_sources};
use edgescout::{
    export, initialization, Fetcher, JsonlStore, MemoryStore, Prober, Sampler, Scheduler, Scorer,
    SourceRange, Store,
};

/// Continuously evaluates Cloudflare edge IPs for reachability, latency,
/// throughput, and integrity.
#[derive(Parser)]
#[command(name = "edgescout", version, about)]
struct Cli {
    /// Log level
    #[arg(long, value_enum, default_value = "info", global = true)]
    log_level: LogLevel,

    /// Log format
    #[arg(long, value_enum, default_value = "plain", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Perform a one-off scan of Cloudflare edges
    Scan {
        /// Target domain to probe
        #[arg(long)]
        domain: String,
        /// Number of candidates to probe
        #[arg(long, default_value_t = DEFAULT_SCAN_COUNT)]
        count: usize,
        /// Probe retries on failure
        #[arg(long, default_value_t = 1)]
        retries: u32,
        /// Delay between probes in milliseconds
        #[arg(long, default_value_t = DEFAULT_SCAN_RATE_MS)]
        rate_ms: u64,
        /// Concurrent probe workers
        #[arg(long, default_value_t = 1)]
        parallelism: usize,
        /// HTTPS port to probe
        #[arg(long, default_value_t = 443)]
        port: u16,
        /// Providers to fetch ranges from (default: all enabled)
        #[arg(long, value_delimiter = ',')]
        providers: Vec<String>,
        /// Expected origin host for validation
        #[arg(long, default_value = "")]
        expected_origin: String,
        /// Trusted certificate CNs for validation
        #[arg(long, value_delimiter = ',')]
        trusted_cn: Vec<String>,
        /// Persist results to a JSONL file
        #[arg(long)]
        jsonl: Option<PathBuf>,
        /// Export results to a CSV file after the scan
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Continuously run scans at an interval
    Daemon {
        /// Target domain to probe
        #[arg(long)]
        domain: String,
        /// Number of candidates per scan
        #[arg(long, default_value_t = DEFAULT_SCAN_COUNT)]
        count: usize,
        /// Probe retries on failure
        #[arg(long, default_value_t = 1)]
        retries: u32,
        /// Delay between probes in milliseconds
        #[arg(long, default_value_t = DEFAULT_SCAN_RATE_MS)]
        rate_ms: u64,
        /// Concurrent probe workers
        #[arg(long, default_value_t = 1)]
        parallelism: usize,
        /// Interval between scans in seconds
        #[arg(long, default_value_t = DEFAULT_DAEMON_INTERVAL_SECS)]
        interval_secs: u64,
        /// Providers to fetch ranges from (default: all enabled)
        #[arg(long, value_delimiter = ',')]
        providers: Vec<String>,
        /// Path to the JSONL store
        #[arg(long, default_value = "edges.jsonl")]
        jsonl: PathBuf,
    },
    /// Fetch, aggregate, and print the configured range catalogs
    Ranges {
        /// Sources to aggregate (default: all built-in)
        #[arg(long, value_delimiter = ',')]
        sources: Vec<String>,
        /// Directory for the ranges.json snapshot and failure fallback
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
    /// Export a JSONL store to CSV or JSONL
    Export {
        /// Path to the JSONL store to read
        #[arg(long, default_value = "edges.jsonl")]
        jsonl: PathBuf,
        /// Output file (stdout when omitted)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Output format
        #[arg(long, value_enum, default_value = "csv")]
        format: ExportFormat,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ExportFormat {
    Csv,
    Jsonl,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    initialization::init_logger(cli.log_level.into(), cli.log_format)
        .context("Failed to initialize logger")?;
    initialization::init_crypto_provider();

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, shutting down");
            signal_token.cancel();
        }
    });

    match cli.command {
        Command::Scan {
            domain,
            count,
            retries,
            rate_ms,
            parallelism,
            port,
            providers,
            expected_origin,
            trusted_cn,
            jsonl,
            csv,
        } => {
            let client = initialization::init_client()?;
            let fetcher = Fetcher::new(client);
            let selected = filter_providers(&default_providers(), &providers)?;
            let outcome = fetcher.fetch_all(&cancel, &selected).await?;
            if let Some(partial) = &outcome.partial {
                warn!("{partial}");
            }
            let sources = apply_validation_policy(outcome.sources, &expected_origin, &trusted_cn);

            let store: Arc<dyn Store> = match &jsonl {
                Some(path) => Arc::new(JsonlStore::new(path)),
                None => Arc::new(MemoryStore::new()),
            };
            let scheduler = Scheduler::new(
                Arc::new(Sampler::new(&[])),
                Arc::new(Prober::new().with_port(port)),
                Arc::new(Scorer::new()),
                Arc::clone(&store),
            )
            .with_rate_limit(Duration::from_millis(rate_ms))
            .with_retries(retries)
            .with_parallelism(parallelism);

            let records = scheduler.scan(&cancel, &sources, &domain, count).await?;
            println!("scanned {} candidates", records.len());

            if let Some(csv_path) = csv {
                let records = store.list(&cancel).await?;
                let file = std::fs::File::create(&csv_path)
                    .with_context(|| format!("create {}", csv_path.display()))?;
                export::to_csv(&records, file)?;
                println!("exported CSV to {}", csv_path.display());
            }
        }
        Command::Daemon {
            domain,
            count,
            retries,
            rate_ms,
            parallelism,
            interval_secs,
            providers,
            jsonl,
        } => {
            let client = initialization::init_client()?;
            let fetcher = Arc::new(Fetcher::new(client));
            let selected = Arc::new(filter_providers(&default_providers(), &providers)?);

            let scheduler = Scheduler::new(
                Arc::new(Sampler::new(&[])),
                Arc::new(Prober::new()),
                Arc::new(Scorer::new()),
                Arc::new(JsonlStore::new(&jsonl)),
            )
            .with_rate_limit(Duration::from_millis(rate_ms))
            .with_retries(retries)
            .with_parallelism(parallelism);

            let interval = Duration::from_secs(interval_secs);
            info!("starting daemon with interval {interval_secs}s");
            let fetch = {
                let fetcher = Arc::clone(&fetcher);
                let selected = Arc::clone(&selected);
                move |token: CancellationToken| {
                    let fetcher = Arc::clone(&fetcher);
                    let selected = Arc::clone(&selected);
                    async move {
                        let outcome = fetcher.fetch_all(&token, &selected).await?;
                        if let Some(partial) = &outcome.partial {
                            warn!("{partial}");
                        }
                        Ok(outcome.sources)
                    }
                }
            };
            scheduler
                .run_daemon(&cancel, fetch, &domain, count, interval)
                .await?;
        }
        Command::Ranges { sources, cache_dir } => {
            let client = initialization::init_client()?;
            let mut fetcher = Fetcher::new(client);
            if !sources.is_empty() {
                fetcher.use_sources(named_sources(&sources)?)?;
            }
            if let Some(dir) = cache_dir {
                fetcher = fetcher.with_cache_dir(dir);
            }
            let set = fetcher.fetch_aggregated(&cancel).await?;
            println!("aggregated {} unique ranges", set.entries.len());
            for entry in &set.entries {
                let contributors: Vec<&str> =
                    entry.metadata.iter().map(|m| m.source.as_str()).collect();
                println!("{}\t{}", entry.network, contributors.join(","));
            }
        }
        Command::Export {
            jsonl,
            output,
            format,
        } => {
            let store = JsonlStore::new(&jsonl);
            let records = store.list(&cancel).await?;
            let writer: Box<dyn std::io::Write> = match &output {
                Some(path) => Box::new(
                    std::fs::File::create(path)
                        .with_context(|| format!("create {}", path.display()))?,
                ),
                None => Box::new(std::io::stdout()),
            };
            match format {
                ExportFormat::Csv => export::to_csv(&records, writer)?,
                ExportFormat::Jsonl => export::to_jsonl(&records, writer)?,
            }
            info!("exported {} records", records.len());
        }
    }
    Ok(())
}

/// Copies the CLI validation policy onto every fetched source so it flows
/// through candidates into post-probe validation.
fn apply_validation_policy(
    mut sources: Vec<SourceRange>,
    expected_origin: &str,
    trusted_cns: &[String],
) -> Vec<SourceRange> {
    if expected_origin.is_empty() && trusted_cns.is_empty() {
        return sources;
    }
    for source in &mut sources {
        source.provider.expected_origin = expected_origin.to_string();
        source.provider.trusted_cns = trusted_cns.to_vec();
    }
    sources
}

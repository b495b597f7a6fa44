use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use flightagg_core::{
    benchmark_json, AggregateOptions, CombineReport, Combiner, FlightBatchSource,
};
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

mod report;
mod settings;

use settings::{FileSettings, Overrides};

#[derive(Parser)]
#[command(name = "flightagg")]
#[command(about = "Fetch datasets over Arrow Flight and report combined statistics", long_about = None)]
struct Cli {
    /// Config file (TOML). Default: ~/.flightaggrc if it exists
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Clone, Debug, Default)]
struct ConnectArgs {
    /// Flight service address (host:port or grpc://host:port). Default: localhost:8888
    #[arg(short = 'H', long)]
    host: Option<String>,
    /// Dataset to fetch; repeat for several. Default: postgres, mongo, duckdb
    #[arg(short, long = "dataset")]
    datasets: Vec<String>,
    /// Float64 column to aggregate. Default: value
    #[arg(short, long)]
    column: Option<String>,
    /// Per-read timeout in milliseconds
    #[arg(long)]
    read_timeout_ms: Option<u64>,
    /// Whole-stream timeout in milliseconds
    #[arg(long)]
    stream_timeout_ms: Option<u64>,
    /// Maximum gRPC message size in MiB. Default: 100
    #[arg(long)]
    max_message_mb: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every dataset, then print per-dataset and combined statistics
    Stats {
        #[command(flatten)]
        connect: ConnectArgs,
        /// Datasets fetched at once (1 = one after another)
        #[arg(long)]
        concurrency: Option<usize>,
        /// Report failed datasets and combine the rest instead of aborting
        #[arg(long)]
        continue_on_error: bool,
    },
    /// Compare Arrow transfer against the JSON rendition of each dataset
    BenchJson {
        #[command(flatten)]
        connect: ConnectArgs,
    },
}

impl ConnectArgs {
    fn into_overrides(self) -> Overrides {
        Overrides {
            host: self.host,
            datasets: self.datasets,
            column: self.column,
            read_timeout_ms: self.read_timeout_ms,
            stream_timeout_ms: self.stream_timeout_ms,
            max_message_mb: self.max_message_mb,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let file = FileSettings::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Stats {
        connect: ConnectArgs::default(),
        concurrency: None,
        continue_on_error: false,
    }) {
        Commands::Stats {
            connect,
            concurrency,
            continue_on_error,
        } => {
            let overrides = Overrides {
                concurrency,
                continue_on_error,
                ..connect.into_overrides()
            };
            run_stats(file, overrides).await
        }
        Commands::BenchJson { connect } => run_bench_json(file, connect.into_overrides()).await,
    }
}

async fn run_stats(file: FileSettings, overrides: Overrides) -> Result<()> {
    let config = settings::resolve(file, overrides)?;
    let source = FlightBatchSource::connect(&config)
        .await
        .with_context(|| format!("Failed to connect to {}", config.address))?;
    info!(endpoint = source.endpoint(), datasets = config.datasets.len(), "connected");

    let report = Combiner::from_config(source, &config)
        .run(&config.datasets)
        .await?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    report::write_combine_report(&mut out, &report)?;
    out.flush()?;
    ensure_combined(&report)
}

/// Every dataset failing under continue-on-error is still a failed run.
fn ensure_combined(report: &CombineReport) -> Result<()> {
    if report.combined.is_none() {
        anyhow::bail!("all {} datasets failed", report.datasets.len());
    }
    Ok(())
}

async fn run_bench_json(file: FileSettings, overrides: Overrides) -> Result<()> {
    let config = settings::resolve(file, overrides)?;
    let source = FlightBatchSource::connect(&config)
        .await
        .with_context(|| format!("Failed to connect to {}", config.address))?;
    let options = AggregateOptions::from(&config);

    let stdout = std::io::stdout();
    for dataset in &config.datasets {
        let bench = benchmark_json(&source, dataset, &options).await?;
        let mut out = stdout.lock();
        report::write_json_benchmark(&mut out, &bench)?;
        writeln!(out)?;
    }
    Ok(())
}

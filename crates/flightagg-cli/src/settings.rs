use anyhow::{anyhow, Context, Result};
use flightagg_core::{Config, ExecutionMode, FailurePolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings loaded from ~/.flightaggrc or `--config`.
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileSettings {
    /// Flight service address
    #[serde(default)]
    pub host: Option<String>,
    /// Datasets to fetch, in report order
    #[serde(default)]
    pub datasets: Option<Vec<String>>,
    /// Float64 column to aggregate
    #[serde(default)]
    pub column: Option<String>,
    /// Datasets fetched at once (1 = sequential)
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Keep going when a dataset fails
    #[serde(default)]
    pub continue_on_error: Option<bool>,
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,
    #[serde(default)]
    pub stream_timeout_ms: Option<u64>,
    /// Maximum gRPC message size in MiB
    #[serde(default)]
    pub max_message_mb: Option<usize>,
}

impl FileSettings {
    /// Load `path`, or ~/.flightaggrc when no path is given.
    ///
    /// A missing default file yields empty settings; a missing explicit file
    /// is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::read(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::read(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    fn default_path() -> Option<PathBuf> {
        dirs_next::home_dir().map(|h| h.join(".flightaggrc"))
    }

    fn read(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| anyhow!("{}", e))
    }
}

/// Values given on the command line. `None` means "not given".
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub host: Option<String>,
    pub datasets: Vec<String>,
    pub column: Option<String>,
    pub concurrency: Option<usize>,
    pub continue_on_error: bool,
    pub read_timeout_ms: Option<u64>,
    pub stream_timeout_ms: Option<u64>,
    pub max_message_mb: Option<usize>,
}

/// Build the client config: command line over file over defaults.
pub fn resolve(file: FileSettings, cli: Overrides) -> Result<Config> {
    let mut builder = Config::builder();

    if let Some(host) = cli.host.or(file.host) {
        builder = builder.address(host);
    }
    let datasets = if cli.datasets.is_empty() {
        file.datasets
    } else {
        Some(cli.datasets)
    };
    if let Some(datasets) = datasets {
        builder = builder.datasets(datasets);
    }
    if let Some(column) = cli.column.or(file.column) {
        builder = builder.column(column);
    }
    if let Some(n) = cli.concurrency.or(file.concurrency) {
        builder = builder.mode(ExecutionMode::with_concurrency(n));
    }
    if cli.continue_on_error || file.continue_on_error.unwrap_or(false) {
        builder = builder.failure_policy(FailurePolicy::ContinueOnError);
    }
    if let Some(ms) = file.connect_timeout_ms {
        builder = builder.connect_timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = cli.read_timeout_ms.or(file.read_timeout_ms) {
        builder = builder.read_timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = cli.stream_timeout_ms.or(file.stream_timeout_ms) {
        builder = builder.stream_timeout(Duration::from_millis(ms));
    }
    if let Some(mb) = cli.max_message_mb.or(file.max_message_mb) {
        let bytes = mb
            .checked_mul(1024 * 1024)
            .ok_or_else(|| anyhow!("max_message_mb too large: {}", mb))?;
        builder = builder.max_message_size(bytes);
    }

    let config = builder.build();
    config.validate()?;
    Ok(config)
}

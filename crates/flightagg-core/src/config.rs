use crate::combine::{ExecutionMode, FailurePolicy};
use crate::dataset::{DatasetId, DEFAULT_DATASETS};
use crate::error::{Error, Result};
use std::time::Duration;

/// Default Flight endpoint of the sensor data service.
pub const DEFAULT_ADDRESS: &str = "localhost:8888";

/// Default numeric column aggregated in every dataset.
pub const DEFAULT_COLUMN: &str = "value";

/// Maximum gRPC message size in both directions (100 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Configuration options for the flightagg client.
#[derive(Clone, Debug)]
pub struct Config {
    /// Flight service address (`host:port` or a `grpc://` URI).
    pub address: String,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// Deadline for each individual batch read. `None` waits indefinitely.
    pub read_timeout: Option<Duration>,

    /// Deadline for consuming one whole dataset stream.
    pub stream_timeout: Option<Duration>,

    /// Maximum encoded/decoded gRPC message size.
    pub max_message_size: usize,

    /// Name of the Float64 column to aggregate.
    pub column: String,

    /// Datasets to fetch, in report order.
    pub datasets: Vec<DatasetId>,

    /// Sequential or concurrent fetching.
    pub mode: ExecutionMode,

    /// What to do when one dataset fails.
    pub failure_policy: FailurePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: None,
            stream_timeout: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            column: DEFAULT_COLUMN.to_string(),
            datasets: DEFAULT_DATASETS.iter().copied().map(DatasetId::from).collect(),
            mode: ExecutionMode::Sequential,
            failure_policy: FailurePolicy::AbortRun,
        }
    }
}

impl Config {
    /// Create a new Config builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check the settings that cannot be expressed in the types.
    pub fn validate(&self) -> Result<()> {
        if self.datasets.is_empty() {
            return Err(Error::Config("at least one dataset is required".into()));
        }
        if self.column.is_empty() {
            return Err(Error::Config("column name must not be empty".into()));
        }
        if self.max_message_size == 0 {
            return Err(Error::Config("max_message_size must be positive".into()));
        }
        if let ExecutionMode::Concurrent { max_in_flight: 0 } = self.mode {
            return Err(Error::Config("max_in_flight must be positive".into()));
        }
        Ok(())
    }
}

/// Builder for Config.
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the service address.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.config.address = address.into();
        self
    }

    /// Set connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set per-read timeout.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = Some(timeout);
        self
    }

    /// Set whole-stream timeout.
    pub fn stream_timeout(mut self, timeout: Duration) -> Self {
        self.config.stream_timeout = Some(timeout);
        self
    }

    /// Set maximum message size in bytes.
    pub fn max_message_size(mut self, bytes: usize) -> Self {
        self.config.max_message_size = bytes;
        self
    }

    /// Set the aggregated column.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.config.column = column.into();
        self
    }

    /// Replace the dataset list.
    pub fn datasets<I, S>(mut self, datasets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<DatasetId>,
    {
        self.config.datasets = datasets.into_iter().map(Into::into).collect();
        self
    }

    /// Set execution mode.
    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Set failure policy.
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    /// Build the Config.
    pub fn build(self) -> Config {
        self.config
    }
}

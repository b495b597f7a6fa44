//! # flightagg-core
//!
//! Streaming aggregation over Arrow Flight datasets.
//!
//! Each dataset is fetched with a `DoGet` whose ticket is the dataset name.
//! While the batches stream in, the non-null values of one Float64 column are
//! summed and counted; nothing else is kept in memory. Per-dataset results
//! are then combined into a row-weighted mean and an unweighted mean of
//! means.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flightagg_core::{Combiner, Config, FlightBatchSource};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), flightagg_core::Error> {
//!     let config = Config::default();
//!     let source = FlightBatchSource::connect(&config).await?;
//!
//!     let report = Combiner::from_config(source, &config)
//!         .run(&config.datasets)
//!         .await?;
//!     for fetched in report.fetched() {
//!         println!("{}: mean {:.2}", fetched.dataset, fetched.aggregate.mean);
//!     }
//!     Ok(())
//! }
//! ```

mod aggregate;
mod bench;
mod client;
mod column;
mod combine;
mod config;
mod dataset;
mod error;
mod memory;
mod stream;

pub use aggregate::{
    aggregate_dataset, AggregateOptions, AggregatorState, DatasetAggregate, DatasetReport,
    RunningAggregate, StreamingAggregator,
};
pub use bench::{benchmark_json, count_json_rows, JsonBenchmark, JSON_SUFFIX};
pub use client::{normalize_address, stream_from_flight, FlightBatchSource};
pub use column::{float64_column, resolve_column, resolve_float64_column};
pub use combine::{
    CombineReport, CombinedResult, Combiner, DatasetOutcome, ExecutionMode, FailurePolicy,
};
pub use config::{Config, ConfigBuilder, DEFAULT_ADDRESS, DEFAULT_COLUMN, DEFAULT_MAX_MESSAGE_SIZE};
pub use dataset::{DatasetId, DEFAULT_DATASETS};
pub use error::{Error, Result, Stage};
pub use memory::MemoryBatchSource;
pub use stream::{BatchSource, BatchStream};

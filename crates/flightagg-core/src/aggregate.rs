//! Streaming aggregation
//!
//! Consumes one dataset stream batch by batch and keeps a running sum and
//! count of the non-null values in the aggregation column. Nothing but the
//! running totals is retained between batches.

use crate::column::{float64_column, resolve_float64_column};
use crate::dataset::DatasetId;
use crate::error::{Error, Result, Stage};
use crate::stream::{BatchSource, BatchStream};
use arrow_array::{Float64Array, RecordBatch};
use arrow_schema::Schema;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info};

/// Per-dataset fetch options.
#[derive(Debug, Clone)]
pub struct AggregateOptions {
    pub column: String,
    pub read_timeout: Option<Duration>,
    pub stream_timeout: Option<Duration>,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            column: crate::config::DEFAULT_COLUMN.to_string(),
            read_timeout: None,
            stream_timeout: None,
        }
    }
}

impl From<&crate::config::Config> for AggregateOptions {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            column: config.column.clone(),
            read_timeout: config.read_timeout,
            stream_timeout: config.stream_timeout,
        }
    }
}

/// Running totals over the non-null values seen so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunningAggregate {
    sum: f64,
    valid_rows: i64,
    total_rows: i64,
    batches: u64,
}

impl RunningAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one column chunk into the totals.
    ///
    /// Values are added one at a time in row order, so the result does not
    /// depend on where batch boundaries fall.
    pub fn update(&mut self, values: &Float64Array) {
        for value in values.iter().flatten() {
            self.sum += value;
            self.valid_rows += 1;
        }
        self.total_rows += values.len() as i64;
        self.batches += 1;
    }

    pub fn valid_rows(&self) -> i64 {
        self.valid_rows
    }

    pub fn finish(self) -> DatasetAggregate {
        DatasetAggregate::new(self.sum, self.valid_rows, self.total_rows, self.batches)
    }
}

/// Final per-dataset statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DatasetAggregate {
    /// Sum of non-null values.
    pub sum: f64,
    /// Number of non-null values.
    pub valid_rows: i64,
    /// `sum / valid_rows`, or 0 when there are no valid rows.
    pub mean: f64,
    /// Rows received, nulls included.
    pub total_rows: i64,
    /// Batches received.
    pub batches: u64,
}

impl DatasetAggregate {
    pub fn new(sum: f64, valid_rows: i64, total_rows: i64, batches: u64) -> Self {
        let mean = if valid_rows > 0 {
            sum / valid_rows as f64
        } else {
            0.0
        };
        Self {
            sum,
            valid_rows,
            mean,
            total_rows,
            batches,
        }
    }

    /// Rows whose value was null.
    pub fn null_rows(&self) -> i64 {
        self.total_rows - self.valid_rows
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    Accumulating,
    Done,
    Failed,
}

/// Aggregation state machine for a single stream.
#[derive(Debug)]
pub struct StreamingAggregator {
    column: String,
    index: usize,
    running: RunningAggregate,
    state: AggregatorState,
}

impl StreamingAggregator {
    /// Resolve `column` against the stream schema. Fails before any row is
    /// read if the column is missing or not Float64.
    pub fn new(schema: &Schema, column: &str) -> Result<Self> {
        let index = resolve_float64_column(schema, column)?;
        Ok(Self {
            column: column.to_string(),
            index,
            running: RunningAggregate::new(),
            state: AggregatorState::Accumulating,
        })
    }

    pub fn state(&self) -> AggregatorState {
        self.state
    }

    pub fn running(&self) -> &RunningAggregate {
        &self.running
    }

    /// Fold one batch in. Any error moves the aggregator to `Failed`.
    pub fn push(&mut self, batch: &RecordBatch) -> Result<()> {
        if self.state != AggregatorState::Accumulating {
            return Err(Error::Stream(format!(
                "aggregator is {:?}, cannot accept batches",
                self.state
            )));
        }
        match float64_column(batch, self.index, &self.column) {
            Ok(values) => {
                self.running.update(values);
                Ok(())
            }
            Err(e) => {
                self.state = AggregatorState::Failed;
                Err(e)
            }
        }
    }

    /// Mark the aggregator failed, e.g. after a transport error.
    pub fn fail(&mut self) {
        self.state = AggregatorState::Failed;
    }

    /// Finalize after the stream ended cleanly. Moves the aggregator to
    /// `Done`; a second call is an error.
    pub fn finish(&mut self) -> Result<DatasetAggregate> {
        match self.state {
            AggregatorState::Accumulating => {
                self.state = AggregatorState::Done;
                Ok(std::mem::take(&mut self.running).finish())
            }
            AggregatorState::Failed => Err(Error::Stream(
                "aggregator failed earlier in the stream".into(),
            )),
            AggregatorState::Done => Err(Error::Stream("aggregator already finished".into())),
        }
    }

    /// Consume `stream` to its end.
    pub async fn consume(mut self, stream: &mut BatchStream) -> Result<DatasetAggregate> {
        loop {
            match stream.next_batch().await {
                Ok(Some(batch)) => {
                    self.push(&batch)?;
                    debug!(
                        batch = stream.position(),
                        rows = batch.num_rows(),
                        valid_rows = self.running.valid_rows(),
                        "batch aggregated"
                    );
                }
                Ok(None) => return self.finish(),
                Err(e) => {
                    self.fail();
                    return Err(e);
                }
            }
        }
    }
}

/// Result of fetching and aggregating one dataset.
#[derive(Debug, Clone)]
pub struct DatasetReport {
    pub dataset: DatasetId,
    pub aggregate: DatasetAggregate,
    pub elapsed: Duration,
}

/// Open `dataset` on `source` and aggregate its column.
///
/// Failures are attributed to the dataset and the stage that failed.
pub async fn aggregate_dataset<S>(
    source: &S,
    dataset: &DatasetId,
    options: &AggregateOptions,
) -> Result<DatasetReport>
where
    S: BatchSource + ?Sized,
{
    let start = Instant::now();
    let deadline = options.stream_timeout.map(|limit| start + limit);

    // The wait for the schema counts as a read.
    let open_limit = shortest(options.read_timeout, remaining(deadline));
    let mut stream = within(open_limit, "stream open", source.open_stream(dataset))
        .await
        .map_err(|e| e.at(dataset.as_str(), Stage::OpenStream))?
        .with_read_timeout(options.read_timeout);

    let aggregator = StreamingAggregator::new(stream.schema(), &options.column)
        .map_err(|e| e.at(dataset.as_str(), Stage::ResolveColumn))?;

    let aggregate = within(remaining(deadline), "stream", aggregator.consume(&mut stream))
        .await
        .map_err(|e| e.at(dataset.as_str(), Stage::ReadBatch))?;

    let elapsed = start.elapsed();
    info!(
        dataset = %dataset,
        rows = aggregate.valid_rows,
        batches = aggregate.batches,
        elapsed_secs = elapsed.as_secs_f64(),
        "dataset aggregated"
    );

    Ok(DatasetReport {
        dataset: dataset.clone(),
        aggregate,
        elapsed,
    })
}

/// Await `fut`, failing with `Error::Timeout` once `limit` has passed.
pub(crate) async fn within<T, F>(limit: Option<Duration>, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => timeout(limit, fut).await.map_err(|_| {
            Error::Timeout(format!("{} not finished within {:?}", what, limit))
        })?,
        None => fut.await,
    }
}

fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|d| d.saturating_duration_since(Instant::now()))
}

fn shortest(a: Option<Duration>, b: Option<Duration>) -> Option<Duration> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

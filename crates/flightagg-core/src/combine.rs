//! Multi-dataset combination
//!
//! Runs the streaming aggregator once per dataset and merges the results
//! into two cross-dataset statistics:
//!
//! - the weighted mean, `Σ sum / Σ valid_rows`, which is the mean of all
//!   values as if the datasets were concatenated;
//! - the mean of means, the plain average of each dataset's own mean,
//!   which gives every dataset the same weight regardless of its size.

use crate::aggregate::{aggregate_dataset, AggregateOptions, DatasetAggregate, DatasetReport};
use crate::dataset::DatasetId;
use crate::error::{Error, Result};
use crate::stream::BatchSource;
use futures::StreamExt;
use tracing::warn;

/// How datasets are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// One dataset at a time, in the given order.
    #[default]
    Sequential,
    /// Up to `max_in_flight` streams open at once. Results are still
    /// reported in the given dataset order.
    Concurrent { max_in_flight: usize },
}

impl ExecutionMode {
    /// `Sequential` for a concurrency of 1 (or 0), `Concurrent` otherwise.
    pub fn with_concurrency(n: usize) -> Self {
        if n <= 1 {
            ExecutionMode::Sequential
        } else {
            ExecutionMode::Concurrent { max_in_flight: n }
        }
    }
}

/// What happens when one dataset fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// The whole run fails with the first dataset error.
    #[default]
    AbortRun,
    /// Failed datasets are reported; statistics cover the rest.
    ContinueOnError,
}

/// Cross-dataset statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CombinedResult {
    pub datasets: usize,
    pub total_rows: i64,
    pub total_sum: f64,
    pub weighted_mean: f64,
    pub mean_of_means: f64,
}

impl CombinedResult {
    /// Combine per-dataset aggregates.
    ///
    /// When no dataset has a valid row the weighted mean is 0, the same
    /// fallback the per-dataset mean uses.
    pub fn from_aggregates(aggregates: &[DatasetAggregate]) -> Result<Self> {
        if aggregates.is_empty() {
            return Err(Error::NoDatasets);
        }

        let total_rows: i64 = aggregates.iter().map(|a| a.valid_rows).sum();
        let total_sum: f64 = aggregates.iter().map(|a| a.sum).sum();
        let weighted_mean = if total_rows > 0 {
            total_sum / total_rows as f64
        } else {
            warn!("no valid rows across all datasets, weighted mean falls back to 0");
            0.0
        };
        let mean_of_means =
            aggregates.iter().map(|a| a.mean).sum::<f64>() / aggregates.len() as f64;

        Ok(Self {
            datasets: aggregates.len(),
            total_rows,
            total_sum,
            weighted_mean,
            mean_of_means,
        })
    }
}

/// Outcome of one dataset in a combine run.
#[derive(Debug)]
pub enum DatasetOutcome {
    Fetched(DatasetReport),
    Failed { dataset: DatasetId, error: Error },
}

impl DatasetOutcome {
    pub fn dataset(&self) -> &DatasetId {
        match self {
            DatasetOutcome::Fetched(report) => &report.dataset,
            DatasetOutcome::Failed { dataset, .. } => dataset,
        }
    }

    pub fn report(&self) -> Option<&DatasetReport> {
        match self {
            DatasetOutcome::Fetched(report) => Some(report),
            DatasetOutcome::Failed { .. } => None,
        }
    }
}

/// Everything a run produced, in the given dataset order.
#[derive(Debug)]
pub struct CombineReport {
    pub datasets: Vec<DatasetOutcome>,
    /// `None` only when every dataset failed under `ContinueOnError`.
    pub combined: Option<CombinedResult>,
}

impl CombineReport {
    pub fn fetched(&self) -> impl Iterator<Item = &DatasetReport> {
        self.datasets.iter().filter_map(DatasetOutcome::report)
    }

    pub fn failures(&self) -> impl Iterator<Item = (&DatasetId, &Error)> {
        self.datasets.iter().filter_map(|outcome| match outcome {
            DatasetOutcome::Failed { dataset, error } => Some((dataset, error)),
            DatasetOutcome::Fetched(_) => None,
        })
    }
}

/// Fetches every dataset from a source and combines the results.
pub struct Combiner<S> {
    source: S,
    options: AggregateOptions,
    mode: ExecutionMode,
    policy: FailurePolicy,
}

impl<S: BatchSource> Combiner<S> {
    pub fn new(source: S, options: AggregateOptions) -> Self {
        Self {
            source,
            options,
            mode: ExecutionMode::default(),
            policy: FailurePolicy::default(),
        }
    }

    /// Combiner configured from `config`.
    pub fn from_config(source: S, config: &crate::config::Config) -> Self {
        Self::new(source, AggregateOptions::from(config))
            .with_mode(config.mode)
            .with_failure_policy(config.failure_policy)
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetch and aggregate `datasets`, then combine.
    pub async fn run(&self, datasets: &[DatasetId]) -> Result<CombineReport> {
        if datasets.is_empty() {
            return Err(Error::NoDatasets);
        }

        let outcomes = match self.mode {
            ExecutionMode::Sequential => self.run_sequential(datasets).await?,
            ExecutionMode::Concurrent { max_in_flight } => {
                self.run_concurrent(datasets, max_in_flight.max(1)).await?
            }
        };

        let aggregates: Vec<DatasetAggregate> = outcomes
            .iter()
            .filter_map(DatasetOutcome::report)
            .map(|r| r.aggregate)
            .collect();
        let combined = if aggregates.is_empty() {
            None
        } else {
            Some(CombinedResult::from_aggregates(&aggregates)?)
        };

        Ok(CombineReport {
            datasets: outcomes,
            combined,
        })
    }

    async fn run_sequential(&self, datasets: &[DatasetId]) -> Result<Vec<DatasetOutcome>> {
        let mut outcomes = Vec::with_capacity(datasets.len());
        for dataset in datasets {
            let result = aggregate_dataset(&self.source, dataset, &self.options).await;
            outcomes.push(self.settle(dataset, result)?);
        }
        Ok(outcomes)
    }

    async fn run_concurrent(
        &self,
        datasets: &[DatasetId],
        max_in_flight: usize,
    ) -> Result<Vec<DatasetOutcome>> {
        let mut results = futures::stream::iter(datasets.iter().enumerate().map(
            |(slot, dataset)| async move {
                let result = aggregate_dataset(&self.source, dataset, &self.options).await;
                (slot, dataset, result)
            },
        ))
        .buffer_unordered(max_in_flight);

        // Completion order is arbitrary; slots restore the given order.
        let mut slots: Vec<Option<DatasetOutcome>> = datasets.iter().map(|_| None).collect();
        while let Some((slot, dataset, result)) = results.next().await {
            // Returning here drops the in-flight fetches with their streams.
            slots[slot] = Some(self.settle(dataset, result)?);
        }
        Ok(slots.into_iter().flatten().collect())
    }

    fn settle(&self, dataset: &DatasetId, result: Result<DatasetReport>) -> Result<DatasetOutcome> {
        match (result, self.policy) {
            (Ok(report), _) => Ok(DatasetOutcome::Fetched(report)),
            (Err(e), FailurePolicy::AbortRun) => Err(e),
            (Err(e), FailurePolicy::ContinueOnError) => {
                warn!(dataset = %dataset, error = %e, "dataset failed, continuing");
                Ok(DatasetOutcome::Failed {
                    dataset: dataset.clone(),
                    error: e,
                })
            }
        }
    }
}

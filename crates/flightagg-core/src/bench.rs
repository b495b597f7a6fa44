//! Arrow vs JSON transfer comparison
//!
//! The data service exposes every dataset twice: as Arrow record batches
//! under its own name, and as a single-row table under `<name>_json` whose
//! first column holds the whole dataset serialized as one JSON array of row
//! objects. Fetching both and decoding the JSON shows what the columnar
//! transfer saves.

use crate::aggregate::{aggregate_dataset, within, AggregateOptions};
use crate::dataset::DatasetId;
use crate::error::{Error, Result, Stage};
use crate::stream::BatchSource;
use arrow_array::{Array, LargeStringArray, RecordBatch, StringArray};
use arrow_schema::DataType;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::info;

/// Ticket suffix of the JSON rendition of a dataset.
pub const JSON_SUFFIX: &str = "json";

/// Timings for one dataset.
#[derive(Debug, Clone)]
pub struct JsonBenchmark {
    pub dataset: DatasetId,
    pub arrow_elapsed: Duration,
    pub arrow_rows: i64,
    pub json_elapsed: Duration,
    pub json_rows: usize,
}

impl JsonBenchmark {
    /// How many times slower the JSON path was.
    pub fn speedup(&self) -> f64 {
        let arrow = self.arrow_elapsed.as_secs_f64();
        if arrow > 0.0 {
            self.json_elapsed.as_secs_f64() / arrow
        } else {
            0.0
        }
    }
}

/// Fetch `dataset` as Arrow and as JSON, timing both.
pub async fn benchmark_json<S>(
    source: &S,
    dataset: &DatasetId,
    options: &AggregateOptions,
) -> Result<JsonBenchmark>
where
    S: BatchSource + ?Sized,
{
    let arrow = aggregate_dataset(source, dataset, options).await?;

    let json_dataset = dataset.with_suffix(JSON_SUFFIX);
    let start = Instant::now();
    let batches = within(options.read_timeout, "stream open", source.open_stream(&json_dataset))
        .await
        .map_err(|e| e.at(json_dataset.as_str(), Stage::OpenStream))?
        .with_read_timeout(options.read_timeout)
        .collect()
        .await
        .map_err(|e| e.at(json_dataset.as_str(), Stage::ReadBatch))?;
    let json_rows = count_json_rows(&batches).map_err(|e| e.at(json_dataset.as_str(), Stage::ReadBatch))?;
    let json_elapsed = start.elapsed();

    let result = JsonBenchmark {
        dataset: dataset.clone(),
        arrow_elapsed: arrow.elapsed,
        arrow_rows: arrow.aggregate.total_rows,
        json_elapsed,
        json_rows,
    };
    info!(
        dataset = %dataset,
        arrow_secs = result.arrow_elapsed.as_secs_f64(),
        json_secs = result.json_elapsed.as_secs_f64(),
        "json benchmark finished"
    );
    Ok(result)
}

/// Parse the JSON document in the first cell and count its rows.
pub fn count_json_rows(batches: &[RecordBatch]) -> Result<usize> {
    let batch = batches
        .iter()
        .find(|b| b.num_rows() > 0)
        .ok_or_else(|| Error::Stream("JSON dataset returned no rows".into()))?;
    if batch.num_columns() == 0 {
        return Err(Error::Stream("JSON dataset has no columns".into()));
    }

    let column = batch.column(0);
    let document = match column.data_type() {
        DataType::Utf8 => column
            .as_any()
            .downcast_ref::<StringArray>()
            .filter(|a| a.is_valid(0))
            .map(|a| a.value(0)),
        DataType::LargeUtf8 => column
            .as_any()
            .downcast_ref::<LargeStringArray>()
            .filter(|a| a.is_valid(0))
            .map(|a| a.value(0)),
        other => {
            return Err(Error::ColumnType {
                column: batch.schema().field(0).name().clone(),
                expected: DataType::Utf8,
                actual: other.clone(),
            })
        }
    }
    .ok_or_else(|| Error::Stream("JSON document is null".into()))?;

    match serde_json::from_str::<Value>(document)? {
        Value::Array(rows) => Ok(rows.len()),
        _ => Err(Error::Stream("JSON document is not an array of rows".into())),
    }
}

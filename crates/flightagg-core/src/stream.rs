//! Batch streams
//!
//! A [`BatchSource`] turns a [`DatasetId`] into a [`BatchStream`]: the schema
//! of the dataset followed by an ordered sequence of record batches that all
//! share it. The schema is known as soon as the stream is open, before the
//! first batch is read.
//!
//! Dropping a `BatchStream` releases the underlying transport stream, so a
//! consumer that bails out early (error, timeout, cancelled task) never
//! leaks it.

use crate::dataset::DatasetId;
use crate::error::{Error, Result};
use arrow_array::RecordBatch;
use arrow_schema::SchemaRef;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::time::Duration;
use tokio::time::timeout;

/// Something that can open a named dataset as a stream of batches.
#[async_trait]
pub trait BatchSource: Send + Sync {
    /// Open the stream for `dataset` and wait for its schema.
    async fn open_stream(&self, dataset: &DatasetId) -> Result<BatchStream>;
}

/// An open dataset stream.
pub struct BatchStream {
    /// Schema shared by every batch of the stream
    schema: SchemaRef,
    /// Remaining batches
    batches: BoxStream<'static, Result<RecordBatch>>,
    /// Per-read deadline
    read_timeout: Option<Duration>,
    /// Batches handed out so far
    position: usize,
}

impl std::fmt::Debug for BatchStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchStream")
            .field("schema", &self.schema)
            .field("read_timeout", &self.read_timeout)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

impl BatchStream {
    pub fn new(schema: SchemaRef, batches: BoxStream<'static, Result<RecordBatch>>) -> Self {
        Self {
            schema,
            batches,
            read_timeout: None,
            position: 0,
        }
    }

    /// Fail any single read that takes longer than `read_timeout`.
    pub fn with_read_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Number of batches returned by [`BatchStream::next_batch`] so far.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Next batch, or `None` once the stream has ended cleanly.
    pub async fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        let next = match self.read_timeout {
            Some(limit) => timeout(limit, self.batches.next())
                .await
                .map_err(|_| {
                    Error::Timeout(format!(
                        "no batch received within {:?} (after {} batches)",
                        limit, self.position
                    ))
                })?,
            None => self.batches.next().await,
        };

        match next {
            Some(Ok(batch)) => {
                self.position += 1;
                Ok(Some(batch))
            }
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    /// Drain the stream into memory.
    pub async fn collect(mut self) -> Result<Vec<RecordBatch>> {
        let mut out = Vec::new();
        while let Some(batch) = self.next_batch().await? {
            out.push(batch);
        }
        Ok(out)
    }
}

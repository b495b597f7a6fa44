//! In-process batch source
//!
//! Serves prepared record batches under dataset names. Open failures,
//! mid-stream failures and stalled streams can be injected per dataset, and
//! the number of currently open streams is tracked so callers can check that
//! every stream is released.

use crate::dataset::DatasetId;
use crate::error::{Error, Result};
use crate::stream::{BatchSource, BatchStream};
use arrow_array::RecordBatch;
use arrow_schema::SchemaRef;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Entry {
    Batches {
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
        fail_after: Option<(usize, String)>,
        open_delay: Option<Duration>,
    },
    Stalled {
        schema: SchemaRef,
    },
    StalledOpen,
    OpenFailure(String),
}

/// Batch source backed by in-memory batches.
#[derive(Debug, Default, Clone)]
pub struct MemoryBatchSource {
    entries: HashMap<String, Entry>,
    open_streams: Arc<AtomicUsize>,
    opened_total: Arc<AtomicUsize>,
}

/// Decrements the open stream counter when the stream is dropped.
struct OpenGuard(Arc<AtomicUsize>);

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryBatchSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `batches` under `dataset`.
    pub fn insert(&mut self, dataset: impl Into<String>, schema: SchemaRef, batches: Vec<RecordBatch>) {
        self.entries.insert(
            dataset.into(),
            Entry::Batches {
                schema,
                batches,
                fail_after: None,
                open_delay: None,
            },
        );
    }

    /// Serve `batches` under `dataset`, but only after `delay` has passed.
    pub fn insert_delayed(
        &mut self,
        dataset: impl Into<String>,
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
        delay: Duration,
    ) {
        self.entries.insert(
            dataset.into(),
            Entry::Batches {
                schema,
                batches,
                fail_after: None,
                open_delay: Some(delay),
            },
        );
    }

    /// Serve the first `after` batches, then fail the stream with `message`.
    pub fn insert_failing(
        &mut self,
        dataset: impl Into<String>,
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
        after: usize,
        message: impl Into<String>,
    ) {
        self.entries.insert(
            dataset.into(),
            Entry::Batches {
                schema,
                batches,
                fail_after: Some((after, message.into())),
                open_delay: None,
            },
        );
    }

    /// Open succeeds with `schema` but no batch ever arrives.
    pub fn insert_stalled(&mut self, dataset: impl Into<String>, schema: SchemaRef) {
        self.entries.insert(dataset.into(), Entry::Stalled { schema });
    }

    /// Opening `dataset` never completes; no schema is ever sent.
    pub fn insert_stalled_open(&mut self, dataset: impl Into<String>) {
        self.entries.insert(dataset.into(), Entry::StalledOpen);
    }

    /// Opening `dataset` fails with `message`.
    pub fn fail_open(&mut self, dataset: impl Into<String>, message: impl Into<String>) {
        self.entries
            .insert(dataset.into(), Entry::OpenFailure(message.into()));
    }

    /// Streams opened and not yet dropped.
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    /// Streams opened since creation.
    pub fn opened_total(&self) -> usize {
        self.opened_total.load(Ordering::SeqCst)
    }

    fn guard(&self) -> OpenGuard {
        self.open_streams.fetch_add(1, Ordering::SeqCst);
        self.opened_total.fetch_add(1, Ordering::SeqCst);
        OpenGuard(self.open_streams.clone())
    }
}

#[async_trait]
impl BatchSource for MemoryBatchSource {
    async fn open_stream(&self, dataset: &DatasetId) -> Result<BatchStream> {
        let entry = self
            .entries
            .get(dataset.as_str())
            .ok_or_else(|| Error::Stream(format!("unknown dataset '{}'", dataset)))?;

        match entry {
            Entry::OpenFailure(message) => Err(Error::Stream(message.clone())),
            Entry::StalledOpen => futures::future::pending().await,
            Entry::Stalled { schema } => {
                let guard = self.guard();
                let batches = futures::stream::pending::<Result<RecordBatch>>().map(move |item| {
                    let _held = &guard;
                    item
                });
                Ok(BatchStream::new(schema.clone(), batches.boxed()))
            }
            Entry::Batches {
                schema,
                batches,
                fail_after,
                open_delay,
            } => {
                if let Some(delay) = open_delay {
                    tokio::time::sleep(*delay).await;
                }
                let mut items: Vec<Result<RecordBatch>> = match fail_after {
                    Some((after, _)) => batches.iter().take(*after).cloned().map(Ok).collect(),
                    None => batches.iter().cloned().map(Ok).collect(),
                };
                if let Some((_, message)) = fail_after {
                    items.push(Err(Error::Stream(message.clone())));
                }

                let guard = self.guard();
                let batches = futures::stream::iter(items).map(move |item| {
                    let _held = &guard;
                    item
                });
                Ok(BatchStream::new(schema.clone(), batches.boxed()))
            }
        }
    }
}

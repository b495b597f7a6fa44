use arrow_flight::error::FlightError;
use arrow_schema::DataType;
use std::fmt;
use thiserror::Error;

/// Stage of a dataset fetch at which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Opening the stream and waiting for its schema.
    OpenStream,
    /// Locating and type-checking the aggregation column.
    ResolveColumn,
    /// Reading or aggregating a batch.
    ReadBatch,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::OpenStream => f.write_str("open-stream"),
            Stage::ResolveColumn => f.write_str("resolve-column"),
            Stage::ReadBatch => f.write_str("read-batch"),
        }
    }
}

/// Error type for flightagg operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Arrow Flight transport error.
    #[error("Flight error: {0}")]
    Flight(#[from] FlightError),

    /// Stream-level failure reported by a batch source.
    #[error("Stream error: {0}")]
    Stream(String),

    /// Timeout error.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The stream terminated before a schema message arrived.
    #[error("Stream ended before a schema was received")]
    MissingSchema,

    /// Required column absent from the schema.
    #[error("Column '{column}' not found (schema fields: [{available}])")]
    ColumnNotFound { column: String, available: String },

    /// Column present but not of the expected type.
    #[error("Column '{column}' has type {actual}, expected {expected}")]
    ColumnType {
        column: String,
        expected: DataType,
        actual: DataType,
    },

    /// Nothing to combine.
    #[error("No datasets to combine")]
    NoDatasets,

    /// Invalid configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// A failure attributed to one dataset and stage.
    #[error("dataset '{dataset}' failed during {stage}: {source}")]
    Dataset {
        dataset: String,
        stage: Stage,
        #[source]
        source: Box<Error>,
    },

    /// JSON deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Attribute this error to a dataset and stage.
    ///
    /// Errors that already carry an attribution are returned unchanged.
    pub fn at(self, dataset: impl Into<String>, stage: Stage) -> Self {
        match self {
            Error::Dataset { .. } => self,
            other => Error::Dataset {
                dataset: dataset.into(),
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Stage of an attributed error.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Dataset { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Dataset of an attributed error.
    pub fn dataset(&self) -> Option<&str> {
        match self {
            Error::Dataset { dataset, .. } => Some(dataset),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

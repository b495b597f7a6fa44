use arrow_flight::Ticket;
use std::fmt;

/// Datasets served by the sensor data service.
pub const DEFAULT_DATASETS: [&str; 3] = ["postgres", "mongo", "duckdb"];

/// Opaque name of a logical dataset. Sent verbatim as the Flight ticket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetId(String);

impl DatasetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Ticket naming this dataset.
    pub fn ticket(&self) -> Ticket {
        Ticket::new(self.0.clone())
    }

    /// Sibling dataset, e.g. `postgres` -> `postgres_json`.
    pub fn with_suffix(&self, suffix: &str) -> Self {
        Self(format!("{}_{}", self.0, suffix))
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DatasetId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DatasetId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for DatasetId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

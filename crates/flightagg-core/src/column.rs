use crate::error::{Error, Result};
use arrow_array::{Array, Float64Array, RecordBatch};
use arrow_schema::{DataType, Schema};

/// Position of the first field named `name` in `schema`.
pub fn resolve_column(schema: &Schema, name: &str) -> Result<usize> {
    schema
        .fields()
        .iter()
        .position(|field| field.name() == name)
        .ok_or_else(|| Error::ColumnNotFound {
            column: name.to_string(),
            available: schema
                .fields()
                .iter()
                .map(|f| f.name().as_str())
                .collect::<Vec<_>>()
                .join(", "),
        })
}

/// Like [`resolve_column`], but also requires the field to be Float64.
pub fn resolve_float64_column(schema: &Schema, name: &str) -> Result<usize> {
    let index = resolve_column(schema, name)?;
    let actual = schema.field(index).data_type();
    if actual != &DataType::Float64 {
        return Err(Error::ColumnType {
            column: name.to_string(),
            expected: DataType::Float64,
            actual: actual.clone(),
        });
    }
    Ok(index)
}

/// Checked view of column `index` of `batch` as a Float64 array.
pub fn float64_column<'a>(batch: &'a RecordBatch, index: usize, name: &str) -> Result<&'a Float64Array> {
    let column = batch.columns().get(index).ok_or_else(|| Error::ColumnNotFound {
        column: name.to_string(),
        available: format!("{} columns in batch", batch.num_columns()),
    })?;

    column
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| Error::ColumnType {
            column: name.to_string(),
            expected: DataType::Float64,
            actual: column.data_type().clone(),
        })
}

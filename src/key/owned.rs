//! Owned primary-key values used for interval bounds and resumption markers.

use std::fmt;

use arrow::{
    array::{ArrayRef, RecordBatch},
    datatypes::SchemaRef,
    util::display::array_value_to_string,
};

use crate::error::ReadError;

/// One-row batch holding the primary-key columns of a single row.
#[derive(Clone, PartialEq)]
pub struct SortKey {
    batch: RecordBatch,
}

impl SortKey {
    /// Wrap a batch that holds exactly one row.
    pub fn try_new(batch: RecordBatch) -> Result<Self, ReadError> {
        if batch.num_rows() != 1 {
            return Err(ReadError::InvalidSortKey(batch.num_rows()));
        }
        Ok(Self { batch })
    }

    /// Build a key from one single-element array per key column.
    pub fn from_columns(schema: SchemaRef, columns: Vec<ArrayRef>) -> Result<Self, ReadError> {
        Self::try_new(RecordBatch::try_new(schema, columns)?)
    }

    /// Copy the `key_schema` columns of `row` out of `batch`.
    pub fn from_row(
        batch: &RecordBatch,
        row: usize,
        key_schema: &SchemaRef,
    ) -> Result<Self, ReadError> {
        let columns = key_schema
            .fields()
            .iter()
            .map(|field| {
                batch
                    .column_by_name(field.name())
                    .map(|column| column.slice(row, 1))
                    .ok_or_else(|| ReadError::MissingSortColumn(field.name().clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_columns(key_schema.clone(), columns)
    }

    /// Key columns as a one-row batch.
    pub fn as_batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// Key schema.
    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    /// Render each component; unprintable values render as `?`.
    pub fn values(&self) -> Vec<String> {
        self.batch
            .columns()
            .iter()
            .map(|column| array_value_to_string(column, 0).unwrap_or_else(|_| "?".to_string()))
            .collect()
    }
}

impl fmt::Debug for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SortKey").field(&self.values()).finish()
    }
}

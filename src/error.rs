use arrow::error::ArrowError;
use parquet::errors::ParquetError;

use crate::{blob::BlobRange, mvcc::Snapshot};

/// Error returned by a scan.
///
/// Most variants describe a broken upstream contract. Once the reader
/// returns one of them the scan is poisoned and every later call fails with
/// [`ReadError::Aborted`].
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// Bytes were supplied for a range no source is waiting for.
    #[error("blob range {0} is not owned by any source")]
    UnknownBlobRange(BlobRange),
    /// Two sources tried to request the same range.
    #[error("blob range {0} is already queued")]
    DuplicateBlobRange(BlobRange),
    /// The full-fetch column set does not contain every early-filter column.
    #[error("full-fetch columns do not cover early-filter columns {missing:?}")]
    EarlyFilterNotCovered {
        /// Early-filter columns absent from the full-fetch set.
        missing: Vec<String>,
    },
    /// A merged position does not match the output builder layout.
    #[error("builder expects {expected} columns, position carries {actual}")]
    BuilderArity {
        /// Columns in the builder.
        expected: usize,
        /// Columns attached to the position.
        actual: usize,
    },
    /// A merged position was emitted without its data columns.
    #[error("merged position carries no data columns")]
    PositionWithoutData,
    /// Rows sharing a key did not arrive with strictly decreasing versions.
    #[error("versions for key {key} are not strictly decreasing: {previous} then {next}")]
    VersionOrder {
        /// Rendered key.
        key: String,
        /// Version popped first.
        previous: Snapshot,
        /// Version popped after it.
        next: Snapshot,
    },
    /// A second control point was pushed while one is active.
    #[error("a control point is already active in the merge stream")]
    ControlPointReentrancy,
    /// A column name or id is not part of the table schema.
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    /// A batch handed to the sort machinery lacks a sort-key column.
    #[error("sort column {0} missing from batch")]
    MissingSortColumn(String),
    /// A stored column has a different type than expected.
    #[error("column {column} has type {actual}, expected {expected}")]
    ColumnType {
        /// Column name.
        column: String,
        /// Expected Arrow type.
        expected: String,
        /// Stored Arrow type.
        actual: String,
    },
    /// Reassembled columns disagree with the recorded row count.
    #[error("{origin} materialized {actual} rows for column {column}, expected {expected}")]
    RowCountMismatch {
        /// Source that produced the column.
        origin: String,
        /// Column name.
        column: String,
        /// Recorded row count.
        expected: usize,
        /// Decoded row count.
        actual: usize,
    },
    /// A sort key was built from a batch that is not exactly one row long.
    #[error("sort key must hold exactly one row, got {0}")]
    InvalidSortKey(usize),
    /// The reader already failed.
    #[error("scan aborted after a previous failure")]
    Aborted,
    /// Arrow kernel or codec failure.
    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),
    /// Parquet decode failure.
    #[error("parquet error: {0}")]
    Parquet(#[from] ParquetError),
}

impl ReadError {
    /// Whether the error reports a broken engine or upstream invariant rather
    /// than undecodable data.
    pub fn is_invariant(&self) -> bool {
        !matches!(
            self,
            ReadError::Arrow(_) | ReadError::Parquet(_) | ReadError::ColumnType { .. }
        )
    }
}

//! Merge machinery: source batches, the k-way merge heap and output assembly.

pub(crate) mod merge;
pub(crate) mod package;
pub(crate) mod record_batch;

pub(crate) use merge::MergeStream;
pub(crate) use package::RecordBatchBuilder;
pub(crate) use record_batch::{BatchRange, SourceBatch};

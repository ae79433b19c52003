use std::{fmt, io::Cursor, sync::Arc};

use arrow::{
    array::{new_empty_array, ArrayRef, RecordBatch, RecordBatchReader},
    compute::{concat, concat_batches},
    datatypes::{FieldRef, Schema},
    ipc::{reader::StreamReader, writer::StreamWriter},
};
use bytes::Bytes;
use parquet::arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter, ProjectionMask};
use ulid::Ulid;

use crate::error::ReadError;

/// Identifier of a stored blob.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct BlobId(Ulid);

impl BlobId {
    /// Fresh id.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Wrap an existing ulid.
    pub const fn from_ulid(id: Ulid) -> Self {
        Self(id)
    }

    /// Underlying ulid.
    pub fn ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for BlobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Byte range inside a blob; the unit of the fetch protocol.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct BlobRange {
    blob_id: BlobId,
    offset: u64,
    size: u64,
}

impl BlobRange {
    /// `size` bytes of `blob_id` starting at `offset`.
    pub const fn new(blob_id: BlobId, offset: u64, size: u64) -> Self {
        Self {
            blob_id,
            offset,
            size,
        }
    }

    /// Blob the range points into.
    pub fn blob_id(&self) -> BlobId {
        self.blob_id
    }

    /// First byte.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Length in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl fmt::Display for BlobRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}+{}]", self.blob_id, self.offset, self.size)
    }
}

/// Encode one column chunk of a portion as an Arrow IPC stream.
pub fn encode_column_chunk(field: &FieldRef, array: ArrayRef) -> Result<Bytes, ReadError> {
    let schema = Arc::new(Schema::new(vec![Arc::clone(field)]));
    let batch = RecordBatch::try_new(Arc::clone(&schema), vec![array])?;
    let mut writer = StreamWriter::try_new(Vec::new(), &schema)?;
    writer.write(&batch)?;
    writer.finish()?;
    Ok(Bytes::from(writer.into_inner()?))
}

/// Decode a column chunk written by [`encode_column_chunk`].
pub fn decode_column_chunk(data: Bytes) -> Result<ArrayRef, ReadError> {
    let reader = StreamReader::try_new(Cursor::new(data), None)?;
    let schema = reader.schema();
    let column = schema.field(0).clone();
    let mut arrays = reader
        .map(|batch| batch.map(|batch| Arc::clone(batch.column(0))))
        .collect::<Result<Vec<_>, _>>()?;
    match arrays.len() {
        0 => Ok(new_empty_array(column.data_type())),
        1 => Ok(arrays.remove(0)),
        _ => {
            let refs: Vec<_> = arrays.iter().map(|a| a.as_ref()).collect();
            Ok(concat(&refs)?)
        }
    }
}

/// Encode a committed batch as a single Parquet blob.
pub fn encode_committed_batch(batch: &RecordBatch) -> Result<Bytes, ReadError> {
    let mut writer = ArrowWriter::try_new(Vec::new(), batch.schema(), None)?;
    writer.write(batch)?;
    Ok(Bytes::from(writer.into_inner()?))
}

/// Decode the columns of a committed Parquet blob named in `columns`.
///
/// Requested columns the blob does not store are skipped; the caller decides
/// how to fill them.
pub fn decode_committed_blob<S: AsRef<str>>(
    data: Bytes,
    columns: &[S],
) -> Result<RecordBatch, ReadError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(data)?;
    let stored = Arc::clone(builder.schema());
    let roots: Vec<usize> = columns
        .iter()
        .filter_map(|name| stored.index_of(name.as_ref()).ok())
        .collect();
    let mask = ProjectionMask::roots(builder.parquet_schema(), roots);
    let reader = builder.with_projection(mask).build()?;
    let schema = reader.schema();
    let batches = reader.collect::<Result<Vec<_>, _>>()?;
    Ok(concat_batches(&schema, &batches)?)
}

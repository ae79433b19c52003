use std::{fmt, sync::Arc};

use arrow::{
    array::RecordBatch,
    datatypes::{Schema, SchemaRef},
    error::ArrowError,
};

use crate::{
    blob::BlobRange,
    columns::{ColumnId, ColumnSet, IndexInfo},
    error::ReadError,
    filter::Predicate,
    key::SortKey,
    mvcc::Snapshot,
};

/// Location of one chunk of one column of a portion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColumnRecord {
    column_id: ColumnId,
    chunk: u16,
    blob_range: BlobRange,
}

impl ColumnRecord {
    /// Chunk `chunk` of `column_id`, stored at `blob_range`.
    pub fn new(column_id: ColumnId, chunk: u16, blob_range: BlobRange) -> Self {
        Self {
            column_id,
            chunk,
            blob_range,
        }
    }

    /// Column.
    pub fn column_id(&self) -> ColumnId {
        self.column_id
    }

    /// Chunk ordinal; chunks concatenate in ascending order.
    pub fn chunk(&self) -> u16 {
        self.chunk
    }

    /// Stored bytes.
    pub fn blob_range(&self) -> BlobRange {
        self.blob_range
    }
}

/// Immutable, compacted unit of column-chunked data.
#[derive(Clone, Debug)]
pub struct PortionInfo {
    portion_id: u64,
    min_snapshot: Snapshot,
    num_rows: usize,
    index_key_start: SortKey,
    index_key_end: SortKey,
    records: Vec<ColumnRecord>,
}

impl PortionInfo {
    /// Portion without column records.
    pub fn new(
        portion_id: u64,
        min_snapshot: Snapshot,
        num_rows: usize,
        index_key_start: SortKey,
        index_key_end: SortKey,
    ) -> Self {
        Self {
            portion_id,
            min_snapshot,
            num_rows,
            index_key_start,
            index_key_end,
            records: Vec::new(),
        }
    }

    /// Add a column chunk.
    pub fn with_record(mut self, record: ColumnRecord) -> Self {
        self.records.push(record);
        self
    }

    /// Portion id.
    pub fn portion_id(&self) -> u64 {
        self.portion_id
    }

    /// Snapshot every row of the portion is visible from.
    pub fn min_snapshot(&self) -> Snapshot {
        self.min_snapshot
    }

    /// Recorded row count.
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Smallest primary key.
    pub fn index_key_start(&self) -> &SortKey {
        &self.index_key_start
    }

    /// Greatest primary key.
    pub fn index_key_end(&self) -> &SortKey {
        &self.index_key_end
    }

    /// All column chunks.
    pub fn records(&self) -> &[ColumnRecord] {
        &self.records
    }

    /// Chunks of `column_id` in chunk order.
    pub fn records_for(&self, column_id: ColumnId) -> Vec<&ColumnRecord> {
        let mut records: Vec<_> = self
            .records
            .iter()
            .filter(|record| record.column_id == column_id)
            .collect();
        records.sort_by_key(|record| record.chunk);
        records
    }

    /// Total stored bytes.
    pub fn blobs_bytes(&self) -> u64 {
        self.records
            .iter()
            .map(|record| record.blob_range.size())
            .sum()
    }

    /// Number of column chunks.
    pub fn num_blobs(&self) -> usize {
        self.records.len()
    }
}

/// Recently committed data held in one Parquet blob.
#[derive(Clone, Debug)]
pub struct CommittedBlob {
    blob_range: BlobRange,
    snapshot: Snapshot,
    first: SortKey,
    last: SortKey,
}

impl CommittedBlob {
    /// Blob committed at `snapshot` with keys in `[first, last]`.
    pub fn new(blob_range: BlobRange, snapshot: Snapshot, first: SortKey, last: SortKey) -> Self {
        Self {
            blob_range,
            snapshot,
            first,
            last,
        }
    }

    /// Stored bytes.
    pub fn blob_range(&self) -> BlobRange {
        self.blob_range
    }

    /// Commit snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot
    }

    /// Smallest primary key.
    pub fn first(&self) -> &SortKey {
        &self.first
    }

    /// Greatest primary key.
    pub fn last(&self) -> &SortKey {
        &self.last
    }
}

/// Transform applied to every merged batch after projection.
pub trait ResultProgram: Send + Sync {
    /// Transform one batch.
    fn apply(&self, batch: RecordBatch) -> Result<RecordBatch, ArrowError>;

    /// Columns the transform reads beyond the result columns.
    fn required_columns(&self) -> Vec<String> {
        Vec::new()
    }
}

impl<F> ResultProgram for F
where
    F: Fn(RecordBatch) -> Result<RecordBatch, ArrowError> + Send + Sync,
{
    fn apply(&self, batch: RecordBatch) -> Result<RecordBatch, ArrowError> {
        self(batch)
    }
}

/// Everything a scan needs from the catalog, read-only for its duration.
pub struct ReadMetadata {
    index: Arc<IndexInfo>,
    pk_ids: Vec<ColumnId>,
    primary_key: ColumnSet,
    result_columns: ColumnSet,
    program_columns: ColumnSet,
    early_filter: Option<Predicate>,
    early_filter_columns: ColumnSet,
    full_fetch: ColumnSet,
    program: Option<Arc<dyn ResultProgram>>,
    portions: Vec<PortionInfo>,
    committed: Vec<CommittedBlob>,
}

impl ReadMetadata {
    /// Table schema.
    pub fn index(&self) -> &Arc<IndexInfo> {
        &self.index
    }

    /// Primary-key columns.
    pub fn primary_key(&self) -> &ColumnSet {
        &self.primary_key
    }

    /// Primary-key fields in key order.
    pub fn sort_schema(&self) -> SchemaRef {
        let fields: Vec<_> = self
            .pk_ids
            .iter()
            .filter_map(|id| self.index.field(*id).cloned())
            .collect();
        Arc::new(Schema::new(fields))
    }

    /// Columns visible to the consumer.
    pub fn result_columns(&self) -> &ColumnSet {
        &self.result_columns
    }

    /// Schema visible to the consumer.
    pub fn result_schema(&self) -> SchemaRef {
        self.result_columns.arrow_schema()
    }

    /// Columns handed to the program: the result columns plus whatever the
    /// program reads on top of them.
    pub fn program_columns(&self) -> &ColumnSet {
        &self.program_columns
    }

    /// Predicate evaluated before full materialization.
    pub fn early_filter(&self) -> Option<&Predicate> {
        self.early_filter.as_ref()
    }

    /// Columns the early filter reads.
    pub fn early_filter_columns(&self) -> &ColumnSet {
        &self.early_filter_columns
    }

    /// Columns needed to produce the result.
    pub fn full_fetch_columns(&self) -> &ColumnSet {
        &self.full_fetch
    }

    /// Post-merge transform.
    pub fn program(&self) -> Option<&Arc<dyn ResultProgram>> {
        self.program.as_ref()
    }

    /// Portions in ascending key order.
    pub fn portions(&self) -> &[PortionInfo] {
        &self.portions
    }

    /// Committed blobs in ascending key order.
    pub fn committed(&self) -> &[CommittedBlob] {
        &self.committed
    }

    /// Counters known before the scan starts.
    pub fn stats(&self) -> ReadStats {
        ReadStats {
            index_portions: self.portions.len(),
            index_batches: self.portions.iter().map(PortionInfo::num_blobs).sum(),
            committed_batches: self.committed.len(),
            schema_columns: self.full_fetch.len(),
            portions_bytes: self.portions.iter().map(PortionInfo::blobs_bytes).sum(),
            ..ReadStats::default()
        }
    }
}

impl fmt::Debug for ReadMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadMetadata")
            .field("primary_key", &self.primary_key)
            .field("result_columns", &self.result_columns)
            .field("early_filter", &self.early_filter)
            .field("full_fetch", &self.full_fetch)
            .field("has_program", &self.program.is_some())
            .field("portions", &self.portions.len())
            .field("committed", &self.committed.len())
            .finish()
    }
}

/// Builder of [`ReadMetadata`].
pub struct ReadMetadataBuilder {
    index: Arc<IndexInfo>,
    pk_ids: Vec<ColumnId>,
    result_ids: Option<Vec<ColumnId>>,
    early_filter: Option<Predicate>,
    program: Option<Arc<dyn ResultProgram>>,
    full_fetch_ids: Option<Vec<ColumnId>>,
    portions: Vec<PortionInfo>,
    committed: Vec<CommittedBlob>,
}

impl ReadMetadataBuilder {
    /// Scan over `index` keyed by `pk_ids` (in key order). Every column is a
    /// result column unless [`Self::result_columns`] narrows it.
    pub fn new(index: Arc<IndexInfo>, pk_ids: Vec<ColumnId>) -> Self {
        Self {
            index,
            pk_ids,
            result_ids: None,
            early_filter: None,
            program: None,
            full_fetch_ids: None,
            portions: Vec::new(),
            committed: Vec::new(),
        }
    }

    /// Columns visible to the consumer.
    pub fn result_columns(self, result_ids: Vec<ColumnId>) -> Self {
        ReadMetadataBuilder {
            result_ids: Some(result_ids),
            ..self
        }
    }

    /// Predicate applied before full materialization.
    pub fn early_filter(self, early_filter: Predicate) -> Self {
        ReadMetadataBuilder {
            early_filter: Some(early_filter),
            ..self
        }
    }

    /// Post-merge transform.
    pub fn program(self, program: Arc<dyn ResultProgram>) -> Self {
        ReadMetadataBuilder {
            program: Some(program),
            ..self
        }
    }

    /// Replace the derived full-fetch set. Primary-key columns are always
    /// added.
    pub fn full_fetch_columns(self, full_fetch_ids: Vec<ColumnId>) -> Self {
        ReadMetadataBuilder {
            full_fetch_ids: Some(full_fetch_ids),
            ..self
        }
    }

    /// Portions, sorted by start key.
    pub fn portions(self, portions: Vec<PortionInfo>) -> Self {
        ReadMetadataBuilder { portions, ..self }
    }

    /// Committed blobs, sorted by first key.
    pub fn committed(self, committed: Vec<CommittedBlob>) -> Self {
        ReadMetadataBuilder { committed, ..self }
    }

    /// Resolve column sets.
    pub fn build(self) -> Result<ReadMetadata, ReadError> {
        let index = self.index;
        let primary_key = ColumnSet::new(self.pk_ids.iter().copied(), &index)?;
        let result_columns = match self.result_ids {
            Some(ids) => ColumnSet::new(ids, &index)?,
            None => ColumnSet::new(index.column_ids().iter().copied(), &index)?,
        };
        let early_filter_columns = match &self.early_filter {
            Some(predicate) => ColumnSet::from_names(predicate.columns().iter(), &index)?,
            None => ColumnSet::empty(&index),
        };
        let required = match &self.program {
            Some(program) => ColumnSet::from_names(program.required_columns(), &index)?,
            None => ColumnSet::empty(&index),
        };
        let program_columns = &result_columns | &required;
        let full_fetch = match self.full_fetch_ids {
            Some(ids) => ColumnSet::new(ids, &index)?,
            None => program_columns.clone(),
        };
        let full_fetch = &full_fetch | &primary_key;
        Ok(ReadMetadata {
            index,
            pk_ids: self.pk_ids,
            primary_key,
            result_columns,
            program_columns,
            early_filter: self.early_filter,
            early_filter_columns,
            full_fetch,
            program: self.program,
            portions: self.portions,
            committed: self.committed,
        })
    }
}

/// Scan counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadStats {
    /// Portions taking part in the scan.
    pub index_portions: usize,
    /// Column chunks stored by those portions.
    pub index_batches: usize,
    /// Committed blobs taking part in the scan.
    pub committed_batches: usize,
    /// Columns fetched for a full materialization.
    pub schema_columns: usize,
    /// Bytes stored by the portions.
    pub portions_bytes: u64,
    /// Blob ranges handed to the driver.
    pub requested_blobs: usize,
    /// Bytes delivered by the driver.
    pub delivered_bytes: u64,
    /// Intervals built.
    pub intervals: usize,
    /// Rows returned to the consumer.
    pub emitted_rows: usize,
}

#[cfg(test)]
mod tests {
    use arrow::datatypes::{DataType, Field};

    use super::*;
    use crate::{blob::BlobId, filter::Predicate};

    fn index() -> Arc<IndexInfo> {
        Arc::new(IndexInfo::new(Arc::new(Schema::new(vec![
            Field::new("k", DataType::Int64, false),
            Field::new("a", DataType::Int64, true),
            Field::new("b", DataType::Utf8, true),
        ]))))
    }

    #[test]
    fn full_fetch_adds_primary_key_and_program_columns() {
        let index = index();
        let program = Arc::new(|batch: RecordBatch| -> Result<RecordBatch, ArrowError> { Ok(batch) })
            as Arc<dyn ResultProgram>;
        struct NeedsB;
        impl ResultProgram for NeedsB {
            fn apply(&self, batch: RecordBatch) -> Result<RecordBatch, ArrowError> {
                Ok(batch)
            }

            fn required_columns(&self) -> Vec<String> {
                vec!["b".to_string()]
            }
        }

        let metadata = ReadMetadataBuilder::new(Arc::clone(&index), vec![ColumnId::new(1)])
            .result_columns(vec![ColumnId::new(2)])
            .program(program)
            .build()
            .expect("metadata");
        assert_eq!(metadata.full_fetch_columns().field_names(), vec!["k", "a"]);
        assert_eq!(metadata.result_schema().fields().len(), 1);

        let metadata = ReadMetadataBuilder::new(Arc::clone(&index), vec![ColumnId::new(1)])
            .result_columns(vec![ColumnId::new(2)])
            .program(Arc::new(NeedsB))
            .early_filter(Predicate::gt("a", 0))
            .build()
            .expect("metadata");
        assert_eq!(
            metadata.full_fetch_columns().field_names(),
            vec!["k", "a", "b"]
        );
        assert_eq!(metadata.early_filter_columns().field_names(), vec!["a"]);
        assert_eq!(metadata.program_columns().field_names(), vec!["a", "b"]);
        assert_eq!(metadata.sort_schema().field(0).name(), "k");
    }

    #[test]
    fn stats_count_portion_blobs() {
        let index = index();
        let key_schema = Arc::new(Schema::new(vec![Field::new("k", DataType::Int64, false)]));
        let key = |v: i64| {
            SortKey::from_columns(
                Arc::clone(&key_schema),
                vec![Arc::new(arrow::array::Int64Array::from(vec![v]))],
            )
            .expect("key")
        };
        let blob = BlobId::new();
        let portion = PortionInfo::new(7, Snapshot::new(1, 1), 2, key(1), key(2))
            .with_record(ColumnRecord::new(ColumnId::new(1), 1, BlobRange::new(blob, 10, 5)))
            .with_record(ColumnRecord::new(ColumnId::new(1), 0, BlobRange::new(blob, 0, 10)))
            .with_record(ColumnRecord::new(ColumnId::new(2), 0, BlobRange::new(blob, 15, 3)));
        let chunks: Vec<u16> = portion
            .records_for(ColumnId::new(1))
            .iter()
            .map(|record| record.chunk())
            .collect();
        assert_eq!(chunks, vec![0, 1]);

        let metadata = ReadMetadataBuilder::new(index, vec![ColumnId::new(1)])
            .portions(vec![portion])
            .build()
            .expect("metadata");
        let stats = metadata.stats();
        assert_eq!(stats.index_portions, 1);
        assert_eq!(stats.index_batches, 3);
        assert_eq!(stats.portions_bytes, 18);
        assert_eq!(stats.schema_columns, 3);
        assert_eq!(stats.requested_blobs, 0);
    }

    #[test]
    fn unknown_filter_column_is_rejected() {
        let result = ReadMetadataBuilder::new(index(), vec![ColumnId::new(1)])
            .early_filter(Predicate::eq("missing", 1))
            .build();
        assert!(matches!(result, Err(ReadError::UnknownColumn(_))));
    }
}

//! Common test utilities for integration tests.
#![allow(dead_code)]

use std::{collections::HashMap, sync::Arc};

use arrow::{
    array::{Array, ArrayRef, AsArray, BooleanArray, Int64Array, RecordBatch, StringArray, UInt64Array},
    datatypes::{DataType, Field, Int64Type, Schema, SchemaRef},
};
use bytes::Bytes;
use portion_scan::{
    blob::{encode_column_chunk, encode_committed_batch, BlobId, BlobRange},
    columns::{ColumnId, IndexInfo},
    key::SortKey,
    metadata::{ColumnRecord, CommittedBlob, PortionInfo},
    mvcc::{Snapshot, DELETED_COL, PLAN_STEP_COL, TX_ID_COL},
    PartialReadResult, PlainReader, ReadError,
};

/// One table row: key `k`, number `a`, text `v`.
pub type Row = (i64, i64, &'static str);

/// Table `k: Int64 (pk), a: Int64, v: Utf8` plus an in-memory blob store.
pub struct Table {
    index: Arc<IndexInfo>,
    blobs: HashMap<BlobRange, Bytes>,
}

impl Table {
    pub fn new() -> Self {
        let schema = Arc::new(Schema::new(vec![
            Field::new("k", DataType::Int64, false),
            Field::new("a", DataType::Int64, true),
            Field::new("v", DataType::Utf8, true),
        ]));
        Self {
            index: Arc::new(IndexInfo::new(schema)),
            blobs: HashMap::new(),
        }
    }

    pub fn index(&self) -> Arc<IndexInfo> {
        Arc::clone(&self.index)
    }

    pub fn id(&self, name: &str) -> ColumnId {
        self.index.column_id(name).expect("column id")
    }

    pub fn pk(&self) -> Vec<ColumnId> {
        vec![self.id("k")]
    }

    pub fn key(&self, key: i64) -> SortKey {
        SortKey::from_columns(
            Arc::new(Schema::new(vec![Field::new("k", DataType::Int64, false)])),
            vec![Arc::new(Int64Array::from(vec![key]))],
        )
        .expect("sort key")
    }

    /// Store a portion: one blob, one chunk per column except `v`, which is
    /// split in two chunks once there are at least two rows.
    pub fn portion(&mut self, portion_id: u64, snapshot: (u64, u64), rows: &[Row]) -> PortionInfo {
        assert!(!rows.is_empty(), "portions are never empty");
        let batch = table_batch(self.index.schema(), rows);
        let blob = BlobId::new();
        let (first, last) = (rows[0].0, rows[rows.len() - 1].0);
        let mut portion = PortionInfo::new(
            portion_id,
            Snapshot::from(snapshot),
            rows.len(),
            self.key(first),
            self.key(last),
        );
        let mut offset = 0;
        for (pos, field) in self.index.schema().fields().iter().enumerate() {
            let column = batch.column(pos);
            let chunks: Vec<ArrayRef> = if field.name() == "v" && rows.len() >= 2 {
                let half = rows.len() / 2;
                vec![column.slice(0, half), column.slice(half, rows.len() - half)]
            } else {
                vec![Arc::clone(column)]
            };
            for (chunk, array) in chunks.into_iter().enumerate() {
                let data = encode_column_chunk(field, array).expect("encode chunk");
                let range = BlobRange::new(blob, offset, data.len() as u64);
                offset += data.len() as u64;
                self.blobs.insert(range, data);
                portion = portion.with_record(ColumnRecord::new(
                    self.id(field.name()),
                    chunk as u16,
                    range,
                ));
            }
        }
        portion
    }

    /// Store a committed blob whose rows all carry `snapshot`.
    pub fn committed(&mut self, snapshot: (u64, u64), rows: &[Row]) -> CommittedBlob {
        let batch = table_batch(self.index.schema(), rows);
        let (first, last) = (rows[0].0, rows[rows.len() - 1].0);
        self.committed_batch(&batch, Snapshot::from(snapshot), first, last)
    }

    /// Store a committed blob with a version and tombstone flag per row.
    pub fn committed_versioned(&mut self, rows: &[(Row, (u64, u64), bool)]) -> CommittedBlob {
        let plain: Vec<Row> = rows.iter().map(|(row, _, _)| *row).collect();
        let data = table_batch(self.index.schema(), &plain);
        let mut fields: Vec<Field> = data
            .schema()
            .fields()
            .iter()
            .map(|field| field.as_ref().clone())
            .collect();
        fields.extend([
            Field::new(PLAN_STEP_COL, DataType::UInt64, false),
            Field::new(TX_ID_COL, DataType::UInt64, false),
            Field::new(DELETED_COL, DataType::Boolean, false),
        ]);
        let mut columns = data.columns().to_vec();
        columns.push(Arc::new(UInt64Array::from_iter_values(
            rows.iter().map(|(_, (plan_step, _), _)| *plan_step),
        )));
        columns.push(Arc::new(UInt64Array::from_iter_values(
            rows.iter().map(|(_, (_, tx_id), _)| *tx_id),
        )));
        columns.push(Arc::new(BooleanArray::from(
            rows.iter().map(|(_, _, deleted)| *deleted).collect::<Vec<_>>(),
        )));
        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).expect("batch");
        let (first, last) = (plain[0].0, plain[plain.len() - 1].0);
        self.committed_batch(&batch, Snapshot::MIN, first, last)
    }

    /// Store an arbitrary batch as a committed blob spanning `[first, last]`.
    pub fn committed_batch(
        &mut self,
        batch: &RecordBatch,
        snapshot: Snapshot,
        first: i64,
        last: i64,
    ) -> CommittedBlob {
        let data = encode_committed_batch(batch).expect("encode committed");
        let range = BlobRange::new(BlobId::new(), 0, data.len() as u64);
        self.blobs.insert(range, data);
        CommittedBlob::new(range, snapshot, self.key(first), self.key(last))
    }

    pub fn blob(&self, range: &BlobRange) -> Bytes {
        self.blobs.get(range).cloned().expect("stored blob")
    }

    /// Feed one blob at a time and collect results until the reader finishes.
    pub fn drive(
        &self,
        reader: &mut PlainReader,
        max_rows: usize,
    ) -> Result<Vec<PartialReadResult>, ReadError> {
        let mut results = Vec::new();
        for _ in 0..100_000 {
            if let Some(range) = reader.extract_next_blob()? {
                reader.add_data(&range, self.blob(&range))?;
            }
            results.extend(reader.extract_ready_results(max_rows)?);
            if reader.is_finished() {
                return Ok(results);
            }
        }
        panic!("reader did not finish: {reader:?}");
    }
}

pub fn table_batch(schema: &SchemaRef, rows: &[Row]) -> RecordBatch {
    RecordBatch::try_new(
        Arc::clone(schema),
        vec![
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|row| row.0))),
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|row| row.1))),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|row| row.2))),
        ],
    )
    .expect("table batch")
}

pub fn keys(results: &[PartialReadResult]) -> Vec<i64> {
    results
        .iter()
        .flat_map(|result| {
            result
                .batch()
                .column_by_name("k")
                .expect("key column")
                .as_primitive::<Int64Type>()
                .values()
                .to_vec()
        })
        .collect()
}

/// `(k, v)` pairs in result order; null values read as empty strings.
pub fn key_values(results: &[PartialReadResult]) -> Vec<(i64, String)> {
    let mut rows = Vec::new();
    for result in results {
        let batch = result.batch();
        let keys = batch
            .column_by_name("k")
            .expect("key column")
            .as_primitive::<Int64Type>();
        let values = batch.column_by_name("v").expect("value column").as_string::<i32>();
        for row in 0..batch.num_rows() {
            let value = if values.is_null(row) {
                String::new()
            } else {
                values.value(row).to_string()
            };
            rows.push((keys.value(row), value));
        }
    }
    rows
}

pub fn pairs(rows: &[(i64, &str)]) -> Vec<(i64, String)> {
    rows.iter().map(|(k, v)| (*k, v.to_string())).collect()
}

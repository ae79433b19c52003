//! Test-only helpers for building keyed batches and merge sources.

use std::sync::Arc;

use arrow::{
    array::{Array, AsArray, BooleanArray, Int64Array, RecordBatch, StringArray, UInt64Array},
    datatypes::{DataType, Field, Int64Type, Schema, SchemaRef},
};

use crate::{
    key::{KeyConverter, SortKey, SortableBatchPosition},
    mvcc::{Snapshot, VersionColumns, DELETED_COL, PLAN_STEP_COL, TX_ID_COL},
    stream::SourceBatch,
};

/// Key-only schema: `k: Int64`.
pub(crate) fn sort_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![Field::new("k", DataType::Int64, false)]))
}

/// Merge schema: `k: Int64, v: Utf8`.
pub(crate) fn merge_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("k", DataType::Int64, false),
        Field::new("v", DataType::Utf8, true),
    ]))
}

pub(crate) fn key_converter() -> KeyConverter {
    KeyConverter::new(sort_schema()).expect("converter")
}

pub(crate) fn merge_batch(rows: &[(i64, &str)]) -> RecordBatch {
    RecordBatch::try_new(
        merge_schema(),
        vec![
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|(k, _)| *k))),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|(_, v)| *v))),
        ],
    )
    .expect("batch")
}

/// Source whose rows all carry `version` and none is deleted.
pub(crate) fn merge_source(
    converter: &KeyConverter,
    rows: &[(i64, &str)],
    version: (u64, u64),
    reverse: bool,
) -> Arc<SourceBatch> {
    let versions = VersionColumns::stamped(Snapshot::from(version), rows.len());
    Arc::new(
        SourceBatch::try_new(converter, merge_batch(rows), versions, None, reverse)
            .expect("source"),
    )
}

/// Source with a version and tombstone flag per row.
pub(crate) fn source_with_versions(
    converter: &KeyConverter,
    rows: &[(i64, &str)],
    versions: &[((u64, u64), bool)],
    reverse: bool,
) -> Arc<SourceBatch> {
    let schema = Arc::new(Schema::new(vec![
        Field::new(PLAN_STEP_COL, DataType::UInt64, false),
        Field::new(TX_ID_COL, DataType::UInt64, false),
        Field::new(DELETED_COL, DataType::Boolean, false),
    ]));
    let system = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(UInt64Array::from_iter_values(
                versions.iter().map(|((plan_step, _), _)| *plan_step),
            )),
            Arc::new(UInt64Array::from_iter_values(
                versions.iter().map(|((_, tx_id), _)| *tx_id),
            )),
            Arc::new(BooleanArray::from(
                versions.iter().map(|(_, deleted)| *deleted).collect::<Vec<_>>(),
            )),
        ],
    )
    .expect("system columns");
    let versions = VersionColumns::from_batch(&system, Snapshot::MIN).expect("versions");
    Arc::new(
        SourceBatch::try_new(converter, merge_batch(rows), versions, None, reverse)
            .expect("source"),
    )
}

pub(crate) fn key_position(converter: &KeyConverter, key: i64, reverse: bool) -> SortableBatchPosition {
    let key = SortKey::from_columns(sort_schema(), vec![Arc::new(Int64Array::from(vec![key]))])
        .expect("key");
    SortableBatchPosition::new(converter.key_view(&key).expect("view"), 0, reverse)
}

pub(crate) fn keys_of(batch: &RecordBatch) -> Vec<i64> {
    batch
        .column_by_name("k")
        .expect("key column")
        .as_primitive::<Int64Type>()
        .values()
        .to_vec()
}

pub(crate) fn rows_of(batch: &RecordBatch) -> Vec<(i64, String)> {
    let values = batch
        .column_by_name("v")
        .expect("value column")
        .as_string::<i32>();
    keys_of(batch)
        .into_iter()
        .enumerate()
        .map(|(row, key)| {
            let value = if values.is_null(row) {
                String::new()
            } else {
                values.value(row).to_string()
            };
            (key, value)
        })
        .collect()
}

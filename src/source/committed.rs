use arrow::{
    array::{new_null_array, RecordBatch},
    datatypes::SchemaRef,
};
use bytes::Bytes;

use crate::{
    blob::decode_committed_blob,
    context::ScanContext,
    error::ReadError,
    metadata::CommittedBlob,
    mvcc::{VersionColumns, DELETED_COL, PLAN_STEP_COL, TX_ID_COL},
    stream::SourceBatch,
};

/// Rebuild a committed blob into a merge-ready batch.
///
/// Returns `None` when the early filter denies every row.
pub(super) fn materialize(
    blob: &CommittedBlob,
    data: Bytes,
    ctx: &ScanContext,
) -> Result<Option<SourceBatch>, ReadError> {
    let schema = ctx.merge_schema();
    let mut wanted: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    wanted.extend([PLAN_STEP_COL, TX_ID_COL, DELETED_COL]);
    let stored = decode_committed_blob(data, &wanted)?;

    let versions = VersionColumns::from_batch(&stored, blob.snapshot())?;
    let batch = project(&stored, schema, &blob.blob_range().to_string())?;
    let filter = match ctx.early_filter() {
        Some(predicate) => {
            // tombstones carry no data to test but must still shadow older rows
            let mut filter = predicate.row_filter(&batch)?;
            if let Some(tombstones) = versions.tombstones() {
                filter = filter.allow_also(tombstones)?;
            }
            if filter.is_total_deny() {
                return Ok(None);
            }
            Some(filter)
        }
        None => None,
    };
    Ok(Some(SourceBatch::try_new(
        ctx.converter(),
        batch,
        versions,
        filter,
        ctx.is_reverse(),
    )?))
}

/// Reorder `stored` into `schema`, filling absent columns with nulls.
fn project(stored: &RecordBatch, schema: &SchemaRef, origin: &str) -> Result<RecordBatch, ReadError> {
    let rows = stored.num_rows();
    let columns = schema
        .fields()
        .iter()
        .map(|field| match stored.column_by_name(field.name()) {
            Some(column) if column.data_type() == field.data_type() => Ok(column.clone()),
            Some(column) => Err(ReadError::ColumnType {
                column: format!("{origin}.{}", field.name()),
                expected: field.data_type().to_string(),
                actual: column.data_type().to_string(),
            }),
            None => Ok(new_null_array(field.data_type(), rows)),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RecordBatch::try_new(schema.clone(), columns)?)
}

use std::collections::{HashMap, HashSet};

use arrow::{
    array::{new_null_array, Array, ArrayRef, RecordBatch},
    compute::concat,
};
use bytes::Bytes;

use crate::{
    blob::{decode_column_chunk, BlobRange},
    columns::{ColumnId, ColumnSet},
    context::ScanContext,
    error::ReadError,
    filter::RowFilter,
    metadata::PortionInfo,
    mvcc::VersionColumns,
    plan::FetchingPlan,
    stream::SourceBatch,
};

/// What a completed fetch phase leads to.
pub(super) enum PhaseOutcome {
    /// More ranges must be delivered.
    Pending(Vec<BlobRange>),
    /// The source is materialized; `None` when the filter denied every row.
    Ready(Option<SourceBatch>),
}

/// Collects the column chunks of one portion across up to two phases.
pub(super) struct PortionAssembler {
    plan: FetchingPlan,
    second_phase: bool,
    pending: HashSet<BlobRange>,
    received: HashMap<BlobRange, Bytes>,
    columns: HashMap<ColumnId, ArrayRef>,
    filter: Option<RowFilter>,
}

impl PortionAssembler {
    pub(super) fn new(plan: FetchingPlan) -> Self {
        Self {
            plan,
            second_phase: false,
            pending: HashSet::new(),
            received: HashMap::new(),
            columns: HashMap::new(),
            filter: None,
        }
    }

    /// Ranges of the first phase.
    pub(super) fn start(
        &mut self,
        portion: &PortionInfo,
        ctx: &ScanContext,
    ) -> Result<PhaseOutcome, ReadError> {
        let columns = self.plan.fetch_now().clone();
        self.request(portion, &columns, ctx)
    }

    pub(super) fn add_data(
        &mut self,
        portion: &PortionInfo,
        range: BlobRange,
        data: Bytes,
        ctx: &ScanContext,
    ) -> Result<PhaseOutcome, ReadError> {
        if !self.pending.remove(&range) {
            return Err(ReadError::UnknownBlobRange(range));
        }
        self.received.insert(range, data);
        if self.pending.is_empty() {
            self.complete_phase(portion, ctx)
        } else {
            Ok(PhaseOutcome::Pending(Vec::new()))
        }
    }

    fn request(
        &mut self,
        portion: &PortionInfo,
        columns: &ColumnSet,
        ctx: &ScanContext,
    ) -> Result<PhaseOutcome, ReadError> {
        let ranges: Vec<BlobRange> = columns
            .column_ids()
            .into_iter()
            .flat_map(|column| portion.records_for(column))
            .map(|record| record.blob_range())
            .collect();
        if ranges.is_empty() {
            return self.complete_phase(portion, ctx);
        }
        self.pending.extend(ranges.iter().copied());
        Ok(PhaseOutcome::Pending(ranges))
    }

    fn complete_phase(
        &mut self,
        portion: &PortionInfo,
        ctx: &ScanContext,
    ) -> Result<PhaseOutcome, ReadError> {
        let phase_columns = if self.second_phase {
            self.plan.fetch_conditional().clone()
        } else {
            self.plan.fetch_now().clone()
        };
        self.assemble(portion, &phase_columns)?;

        if !self.second_phase && self.plan.is_two_phase() {
            if let Some(predicate) = ctx.early_filter() {
                let batch = self.batch_of(ctx.planner().early_filter())?;
                let filter = predicate.row_filter(&batch)?;
                if filter.is_total_deny() {
                    self.received.clear();
                    self.columns.clear();
                    return Ok(PhaseOutcome::Ready(None));
                }
                self.filter = Some(filter);
            }
            self.second_phase = true;
            let conditional = self.plan.fetch_conditional().clone();
            return self.request(portion, &conditional, ctx);
        }

        let data = self.batch_of(ctx.planner().merge_columns())?;
        let filter = match (self.filter.take(), ctx.early_filter()) {
            (Some(filter), _) => Some(filter),
            (None, Some(predicate)) => Some(predicate.row_filter(&data)?),
            (None, None) => None,
        };
        if filter.as_ref().is_some_and(RowFilter::is_total_deny) {
            return Ok(PhaseOutcome::Ready(None));
        }
        let versions = VersionColumns::stamped(portion.min_snapshot(), data.num_rows());
        let batch = SourceBatch::try_new(ctx.converter(), data, versions, filter, ctx.is_reverse())?;
        Ok(PhaseOutcome::Ready(Some(batch)))
    }

    /// Decode every column of `columns` from the received chunks.
    fn assemble(&mut self, portion: &PortionInfo, columns: &ColumnSet) -> Result<(), ReadError> {
        let index = columns.index();
        for column in columns.column_ids() {
            let field = index
                .field(column)
                .ok_or_else(|| ReadError::UnknownColumn(column.to_string()))?;
            let mut chunks = portion
                .records_for(column)
                .into_iter()
                .map(|record| {
                    let range = record.blob_range();
                    self.received
                        .remove(&range)
                        .ok_or(ReadError::UnknownBlobRange(range))
                        .and_then(decode_column_chunk)
                })
                .collect::<Result<Vec<_>, _>>()?;
            let array = match chunks.len() {
                0 => new_null_array(field.data_type(), portion.num_rows()),
                1 => chunks.remove(0),
                _ => {
                    let refs: Vec<&dyn Array> = chunks.iter().map(|chunk| chunk.as_ref()).collect();
                    concat(&refs)?
                }
            };
            if array.data_type() != field.data_type() {
                return Err(ReadError::ColumnType {
                    column: field.name().clone(),
                    expected: field.data_type().to_string(),
                    actual: array.data_type().to_string(),
                });
            }
            if array.len() != portion.num_rows() {
                return Err(ReadError::RowCountMismatch {
                    origin: format!("portion {}", portion.portion_id()),
                    column: field.name().clone(),
                    expected: portion.num_rows(),
                    actual: array.len(),
                });
            }
            self.columns.insert(column, array);
        }
        Ok(())
    }

    fn batch_of(&self, columns: &ColumnSet) -> Result<RecordBatch, ReadError> {
        let arrays = columns
            .column_ids()
            .into_iter()
            .map(|column| {
                self.columns
                    .get(&column)
                    .cloned()
                    .ok_or_else(|| ReadError::UnknownColumn(column.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RecordBatch::try_new(columns.arrow_schema(), arrays)?)
    }
}

use std::{
    fmt::{self, Debug, Formatter},
    sync::Arc,
};

use arrow::{
    array::{RecordBatch, UInt32Array},
    compute::take_record_batch,
};

use crate::{
    error::ReadError,
    filter::RowFilter,
    key::{find_position, KeyConverter, SortableBatchPosition, SortingView},
    mvcc::{Snapshot, VersionColumns},
};

/// Materialized batch of one source, ordered in scan direction.
pub(crate) struct SourceBatch {
    sorting: Arc<SortingView>,
    data: Arc<RecordBatch>,
    versions: VersionColumns,
    filter: Option<RowFilter>,
    reverse: bool,
}

impl SourceBatch {
    /// `data` arrives in ascending key order and is flipped for reverse scans.
    pub(crate) fn try_new(
        converter: &KeyConverter,
        data: RecordBatch,
        versions: VersionColumns,
        filter: Option<RowFilter>,
        reverse: bool,
    ) -> Result<Self, ReadError> {
        debug_assert_eq!(data.num_rows(), versions.len());
        let (data, versions, filter) = if reverse && data.num_rows() > 1 {
            let rows = data.num_rows() as u32;
            let indices = UInt32Array::from_iter_values((0..rows).rev());
            let filter = match filter {
                Some(filter) => Some(filter.take(&indices)?),
                None => None,
            };
            (
                take_record_batch(&data, &indices)?,
                versions.take(&indices)?,
                filter,
            )
        } else {
            (data, versions, filter)
        };
        let sorting = converter.view(&data)?;
        debug_assert!(sorting.is_sorted(reverse), "source batch is not sorted");
        Ok(Self {
            sorting,
            data: Arc::new(data),
            versions,
            filter,
            reverse,
        })
    }

    pub(crate) fn num_rows(&self) -> usize {
        self.data.num_rows()
    }

    pub(crate) fn data(&self) -> &Arc<RecordBatch> {
        &self.data
    }

    pub(crate) fn version(&self, row: usize) -> Snapshot {
        self.versions.version(row)
    }

    pub(crate) fn is_deleted(&self, row: usize) -> bool {
        self.versions.is_deleted(row)
    }

    pub(crate) fn filter(&self) -> Option<&RowFilter> {
        self.filter.as_ref()
    }

    /// Position of `row` with the data columns attached.
    pub(crate) fn position(&self, row: usize) -> SortableBatchPosition {
        SortableBatchPosition::new(Arc::clone(&self.sorting), row, self.reverse)
            .with_data(Arc::clone(&self.data))
    }

    /// Rows with keys in `[from, to)`; an absent bound is open.
    pub(crate) fn range(
        self: &Arc<Self>,
        from: Option<&SortableBatchPosition>,
        to: Option<&SortableBatchPosition>,
    ) -> BatchRange {
        let rows = self.num_rows();
        let begin = match from {
            Some(from) => find_position(&self.sorting, from, true, true).unwrap_or(rows),
            None => 0,
        };
        let end = match to {
            Some(to) => find_position(&self.sorting, to, false, false).map_or(0, |last| last + 1),
            None => rows,
        };
        BatchRange {
            batch: Arc::clone(self),
            begin,
            end: end.max(begin),
        }
    }
}

impl Debug for SourceBatch {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceBatch")
            .field("rows", &self.num_rows())
            .field("filtered", &self.filter.is_some())
            .field("reverse", &self.reverse)
            .finish()
    }
}

/// How a batch filter treats a row range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FilterState {
    AllowAll,
    DenyAll,
    Partial,
}

/// Rows `[begin, end)` of a shared source batch.
#[derive(Clone)]
pub(crate) struct BatchRange {
    batch: Arc<SourceBatch>,
    begin: usize,
    end: usize,
}

impl BatchRange {
    /// Every row of `batch`.
    pub(crate) fn full(batch: Arc<SourceBatch>) -> Self {
        let end = batch.num_rows();
        Self {
            batch,
            begin: 0,
            end,
        }
    }

    pub(crate) fn batch(&self) -> &Arc<SourceBatch> {
        &self.batch
    }

    pub(crate) fn begin(&self) -> usize {
        self.begin
    }

    pub(crate) fn end(&self) -> usize {
        self.end
    }

    pub(crate) fn len(&self) -> usize {
        self.end - self.begin
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    pub(crate) fn filter_state(&self) -> FilterState {
        match self.batch.filter() {
            None => FilterState::AllowAll,
            Some(filter) => {
                let allowed = filter.count_in(self.begin, self.end);
                if allowed == self.len() {
                    FilterState::AllowAll
                } else if allowed == 0 {
                    FilterState::DenyAll
                } else {
                    FilterState::Partial
                }
            }
        }
    }
}

impl Debug for BatchRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchRange")
            .field("begin", &self.begin)
            .field("end", &self.end)
            .field("batch", &self.batch)
            .finish()
    }
}

//! Row positions inside sorted batches and directional binary search.

use std::{cmp::Ordering, fmt, sync::Arc};

use arrow::{
    array::RecordBatch,
    datatypes::SchemaRef,
    row::{Row, RowConverter, Rows, SortField},
    util::display::array_value_to_string,
};

use super::SortKey;
use crate::error::ReadError;

/// Scan-wide encoder of sort-key columns into comparable rows.
#[derive(Debug)]
pub struct KeyConverter {
    schema: SchemaRef,
    converter: RowConverter,
}

impl KeyConverter {
    /// Build a converter for the given sort schema.
    pub fn new(sort_schema: SchemaRef) -> Result<Self, ReadError> {
        let fields = sort_schema
            .fields()
            .iter()
            .map(|field| SortField::new(field.data_type().clone()))
            .collect();
        Ok(Self {
            converter: RowConverter::new(fields)?,
            schema: sort_schema,
        })
    }

    /// Sort schema.
    pub fn sort_schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Project the sort columns of `batch` (by name) and encode them.
    pub fn view(&self, batch: &RecordBatch) -> Result<Arc<SortingView>, ReadError> {
        let columns = self
            .schema
            .fields()
            .iter()
            .map(|field| {
                batch
                    .column_by_name(field.name())
                    .cloned()
                    .ok_or_else(|| ReadError::MissingSortColumn(field.name().clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let rows = self.converter.convert_columns(&columns)?;
        let columns = RecordBatch::try_new(self.schema.clone(), columns)?;
        Ok(Arc::new(SortingView { columns, rows }))
    }

    /// View over a single key.
    pub fn key_view(&self, key: &SortKey) -> Result<Arc<SortingView>, ReadError> {
        self.view(key.as_batch())
    }
}

/// Sort-key columns of one batch together with their row encoding.
pub struct SortingView {
    columns: RecordBatch,
    rows: Rows,
}

impl SortingView {
    /// Number of rows.
    pub fn num_rows(&self) -> usize {
        self.columns.num_rows()
    }

    /// Whether the view has no rows.
    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    /// Sort columns as a batch.
    pub fn columns(&self) -> &RecordBatch {
        &self.columns
    }

    fn row(&self, position: usize) -> Row<'_> {
        self.rows.row(position)
    }

    /// Whether rows never decrease in the given direction.
    pub fn is_sorted(&self, reverse: bool) -> bool {
        (1..self.num_rows()).all(|idx| {
            let ord = self.row(idx - 1).cmp(&self.row(idx));
            let ord = if reverse { ord.reverse() } else { ord };
            ord != Ordering::Greater
        })
    }

    fn describe(&self, position: usize) -> String {
        let values: Vec<String> = self
            .columns
            .columns()
            .iter()
            .map(|column| {
                array_value_to_string(column, position).unwrap_or_else(|_| "?".to_string())
            })
            .collect();
        format!("({})", values.join(", "))
    }
}

impl fmt::Debug for SortingView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortingView")
            .field("rows", &self.num_rows())
            .finish()
    }
}

/// A row inside a sorted batch, comparable across batches of the same scan.
///
/// The batch is shared, never owned exclusively: cloning a position is cheap.
/// An optional data view carries the output columns of the same batch.
#[derive(Clone)]
pub struct SortableBatchPosition {
    sorting: Arc<SortingView>,
    data: Option<Arc<RecordBatch>>,
    position: usize,
    reverse: bool,
}

impl SortableBatchPosition {
    /// Position `position` of `sorting`.
    pub fn new(sorting: Arc<SortingView>, position: usize, reverse: bool) -> Self {
        debug_assert!(
            position < sorting.num_rows(),
            "position {position} outside of {} rows",
            sorting.num_rows()
        );
        Self {
            sorting,
            data: None,
            position,
            reverse,
        }
    }

    /// Attach the data columns of the same batch.
    pub fn with_data(mut self, data: Arc<RecordBatch>) -> Self {
        debug_assert_eq!(data.num_rows(), self.sorting.num_rows());
        self.data = Some(data);
        self
    }

    /// Same sort schema and direction, pointing into another batch.
    pub fn build_same(&self, sorting: Arc<SortingView>, position: usize) -> Self {
        Self::new(sorting, position, self.reverse)
    }

    /// Move to `position`; returns false when it is out of range.
    pub fn init_position(&mut self, position: usize) -> bool {
        if position >= self.sorting.num_rows() {
            return false;
        }
        self.position = position;
        true
    }

    /// Row index inside the batch.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Rows in the underlying batch.
    pub fn records_count(&self) -> usize {
        self.sorting.num_rows()
    }

    /// Whether comparisons are flipped.
    pub fn is_reverse(&self) -> bool {
        self.reverse
    }

    /// Sort view of the underlying batch.
    pub fn sorting(&self) -> &Arc<SortingView> {
        &self.sorting
    }

    /// Attached data columns.
    pub fn data(&self) -> Option<&Arc<RecordBatch>> {
        self.data.as_ref()
    }

    /// Three-way comparison of the sort keys, flipped under reverse order.
    pub fn compare(&self, other: &SortableBatchPosition) -> Ordering {
        debug_assert_eq!(self.reverse, other.reverse, "mixed sort directions");
        let ord = self
            .sorting
            .row(self.position)
            .cmp(&other.sorting.row(other.position));
        if self.reverse {
            ord.reverse()
        } else {
            ord
        }
    }

    /// Copy the key at this position.
    pub fn to_sort_key(&self) -> Result<SortKey, ReadError> {
        SortKey::try_new(self.sorting.columns.slice(self.position, 1))
    }

    /// Human-readable key.
    pub fn describe(&self) -> String {
        self.sorting.describe(self.position)
    }
}

impl fmt::Debug for SortableBatchPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortableBatchPosition")
            .field("key", &self.describe())
            .field("position", &self.position)
            .field("records_count", &self.records_count())
            .field("reverse", &self.reverse)
            .field("has_data", &self.data.is_some())
            .finish()
    }
}

/// Locate the boundary row of `sorting` relative to `reference`.
///
/// With `greater` the result is the first row ordered after the reference,
/// otherwise the last row ordered before it. `include` lets a row equal to
/// the reference satisfy the search. Rows must already be sorted in the
/// reference's direction.
pub fn find_position(
    sorting: &Arc<SortingView>,
    reference: &SortableBatchPosition,
    greater: bool,
    include: bool,
) -> Option<usize> {
    let rows = sorting.num_rows();
    if rows == 0 {
        return None;
    }
    debug_assert!(
        sorting.is_sorted(reference.is_reverse()),
        "binary search over an unsorted batch"
    );

    let check_equal_border = |position: usize| -> Option<usize> {
        if include {
            Some(position)
        } else if greater {
            (position + 1 < rows).then_some(position + 1)
        } else {
            position.checked_sub(1)
        }
    };

    let mut start = 0;
    let mut finish = rows - 1;
    let mut probe = reference.build_same(Arc::clone(sorting), start);
    match probe.compare(reference) {
        Ordering::Greater => return greater.then_some(start),
        Ordering::Equal => return check_equal_border(start),
        Ordering::Less => {}
    }
    probe.init_position(finish);
    match probe.compare(reference) {
        Ordering::Less => return (!greater).then_some(finish),
        Ordering::Equal => return check_equal_border(finish),
        Ordering::Greater => {}
    }
    while finish > start + 1 {
        let middle = start + (finish - start) / 2;
        probe.init_position(middle);
        match probe.compare(reference) {
            Ordering::Less => start = middle,
            Ordering::Greater => finish = middle,
            Ordering::Equal => return check_equal_border(middle),
        }
    }
    debug_assert_ne!(start, finish);
    if greater {
        Some(finish)
    } else {
        Some(start)
    }
}

//! MVCC version keys and the system columns that carry them through a scan.

use std::fmt;

use arrow::{
    array::{Array, ArrayRef, AsArray, BooleanArray, RecordBatch, UInt32Array, UInt64Array},
    compute::take,
    datatypes::{DataType, UInt64Type},
};

use crate::error::ReadError;

/// Column holding the plan step of the commit that wrote a row.
pub const PLAN_STEP_COL: &str = "_plan_step";
/// Column holding the transaction id of the commit that wrote a row.
pub const TX_ID_COL: &str = "_tx_id";
/// Optional column flagging tombstone rows.
pub const DELETED_COL: &str = "_deleted";

/// Version key of a row: the `(plan step, transaction id)` of its commit.
///
/// Versions only break ties between rows sharing a sort key; a greater
/// snapshot is a later write.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Snapshot {
    plan_step: u64,
    tx_id: u64,
}

impl Snapshot {
    /// Least possible snapshot.
    pub const MIN: Self = Self::new(0, 0);
    /// Greatest possible snapshot.
    pub const MAX: Self = Self::new(u64::MAX, u64::MAX);

    /// Build a snapshot from its parts.
    #[inline]
    pub const fn new(plan_step: u64, tx_id: u64) -> Self {
        Self { plan_step, tx_id }
    }

    /// Plan step component.
    #[inline]
    pub const fn plan_step(self) -> u64 {
        self.plan_step
    }

    /// Transaction id component.
    #[inline]
    pub const fn tx_id(self) -> u64 {
        self.tx_id
    }
}

impl From<(u64, u64)> for Snapshot {
    fn from((plan_step, tx_id): (u64, u64)) -> Self {
        Self::new(plan_step, tx_id)
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Snapshot")
            .field(&self.plan_step)
            .field(&self.tx_id)
            .finish()
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.plan_step, self.tx_id)
    }
}

/// Per-row versions and tombstone flags of a materialized batch.
#[derive(Debug, Clone)]
pub(crate) struct VersionColumns {
    plan_step: UInt64Array,
    tx_id: UInt64Array,
    deleted: Option<BooleanArray>,
}

impl VersionColumns {
    /// Every row carries `snapshot` and none is deleted.
    pub(crate) fn stamped(snapshot: Snapshot, rows: usize) -> Self {
        Self {
            plan_step: UInt64Array::from(vec![snapshot.plan_step; rows]),
            tx_id: UInt64Array::from(vec![snapshot.tx_id; rows]),
            deleted: None,
        }
    }

    /// Read the system columns stored in `batch`, stamping `fallback` when
    /// the version columns are absent.
    pub(crate) fn from_batch(batch: &RecordBatch, fallback: Snapshot) -> Result<Self, ReadError> {
        let rows = batch.num_rows();
        let mut versions = match (
            batch.column_by_name(PLAN_STEP_COL),
            batch.column_by_name(TX_ID_COL),
        ) {
            (Some(plan_step), Some(tx_id)) => Self {
                plan_step: as_u64(PLAN_STEP_COL, plan_step)?,
                tx_id: as_u64(TX_ID_COL, tx_id)?,
                deleted: None,
            },
            _ => Self::stamped(fallback, rows),
        };
        if let Some(deleted) = batch.column_by_name(DELETED_COL) {
            let flags = deleted
                .as_boolean_opt()
                .ok_or_else(|| ReadError::ColumnType {
                    column: DELETED_COL.to_string(),
                    expected: DataType::Boolean.to_string(),
                    actual: deleted.data_type().to_string(),
                })?;
            versions.deleted = Some(flags.clone());
        }
        Ok(versions)
    }

    pub(crate) fn len(&self) -> usize {
        self.plan_step.len()
    }

    pub(crate) fn version(&self, row: usize) -> Snapshot {
        Snapshot::new(self.plan_step.value(row), self.tx_id.value(row))
    }

    /// Null tombstone flags count as live rows.
    pub(crate) fn is_deleted(&self, row: usize) -> bool {
        self.deleted
            .as_ref()
            .is_some_and(|flags| flags.is_valid(row) && flags.value(row))
    }

    /// Tombstone flags, when the rows carry any.
    pub(crate) fn tombstones(&self) -> Option<&BooleanArray> {
        self.deleted.as_ref()
    }

    pub(crate) fn take(&self, indices: &UInt32Array) -> Result<Self, ReadError> {
        let plan_step = take(&self.plan_step, indices, None)?;
        let tx_id = take(&self.tx_id, indices, None)?;
        let deleted = match &self.deleted {
            Some(flags) => Some(take(flags, indices, None)?.as_boolean().clone()),
            None => None,
        };
        Ok(Self {
            plan_step: plan_step.as_primitive::<UInt64Type>().clone(),
            tx_id: tx_id.as_primitive::<UInt64Type>().clone(),
            deleted,
        })
    }
}

fn as_u64(name: &str, column: &ArrayRef) -> Result<UInt64Array, ReadError> {
    column
        .as_primitive_opt::<UInt64Type>()
        .cloned()
        .ok_or_else(|| ReadError::ColumnType {
            column: name.to_string(),
            expected: DataType::UInt64.to_string(),
            actual: column.data_type().to_string(),
        })
}

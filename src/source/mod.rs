//! Data sources: one bounded, sorted, versioned key range each.

mod committed;
mod portion;

use std::{fmt, sync::Arc};

use bytes::Bytes;
use portion::{PhaseOutcome, PortionAssembler};

use crate::{
    blob::BlobRange,
    context::ScanContext,
    error::ReadError,
    key::SortableBatchPosition,
    metadata::{CommittedBlob, PortionInfo},
    observability::SourceOrigin,
    stream::{BatchRange, SourceBatch},
};

enum SourceKind {
    Portion(PortionInfo),
    Committed(CommittedBlob),
}

enum SourceState {
    Idle,
    FetchingPortion(PortionAssembler),
    FetchingCommitted,
    Ready(Option<Arc<SourceBatch>>),
    Released,
}

/// One portion or committed blob taking part in a scan.
///
/// `start` and `finish` are the first and last keys in scan order.
pub(crate) struct DataSource {
    source_idx: u32,
    origin: SourceOrigin,
    start: SortableBatchPosition,
    finish: SortableBatchPosition,
    exclusive: bool,
    kind: SourceKind,
    state: SourceState,
}

impl DataSource {
    pub(crate) fn portion(
        source_idx: u32,
        portion: PortionInfo,
        ctx: &ScanContext,
    ) -> Result<Self, ReadError> {
        let first = ctx.position(portion.index_key_start())?;
        let last = ctx.position(portion.index_key_end())?;
        Ok(Self::assemble(
            source_idx,
            SourceOrigin::Portion(portion.portion_id()),
            first,
            last,
            SourceKind::Portion(portion),
            ctx.is_reverse(),
        ))
    }

    pub(crate) fn committed(
        source_idx: u32,
        blob: CommittedBlob,
        ctx: &ScanContext,
    ) -> Result<Self, ReadError> {
        let first = ctx.position(blob.first())?;
        let last = ctx.position(blob.last())?;
        Ok(Self::assemble(
            source_idx,
            SourceOrigin::Committed(blob.blob_range().blob_id()),
            first,
            last,
            SourceKind::Committed(blob),
            ctx.is_reverse(),
        ))
    }

    fn assemble(
        source_idx: u32,
        origin: SourceOrigin,
        first: SortableBatchPosition,
        last: SortableBatchPosition,
        kind: SourceKind,
        reverse: bool,
    ) -> Self {
        let (start, finish) = if reverse { (last, first) } else { (first, last) };
        Self {
            source_idx,
            origin,
            start,
            finish,
            exclusive: false,
            kind,
            state: SourceState::Idle,
        }
    }

    pub(crate) fn source_idx(&self) -> u32 {
        self.source_idx
    }

    pub(crate) fn origin(&self) -> &SourceOrigin {
        &self.origin
    }

    pub(crate) fn start(&self) -> &SortableBatchPosition {
        &self.start
    }

    pub(crate) fn finish(&self) -> &SortableBatchPosition {
        &self.finish
    }

    pub(crate) fn set_exclusive(&mut self, exclusive: bool) {
        self.exclusive = exclusive;
    }

    pub(crate) fn is_idle(&self) -> bool {
        matches!(self.state, SourceState::Idle)
    }

    /// Whether the source is materialized (possibly to nothing).
    pub(crate) fn is_ready(&self) -> bool {
        matches!(self.state, SourceState::Ready(_))
    }

    /// Ranges of the first fetch phase.
    pub(crate) fn start_fetching(&mut self, ctx: &ScanContext) -> Result<Vec<BlobRange>, ReadError> {
        debug_assert!(self.is_idle(), "source {} fetched twice", self.source_idx);
        match &self.kind {
            SourceKind::Committed(blob) => {
                self.state = SourceState::FetchingCommitted;
                Ok(vec![blob.blob_range()])
            }
            SourceKind::Portion(portion) => {
                let plan = ctx.planner().fetching_plan(self.exclusive);
                let mut assembler = PortionAssembler::new(plan);
                let outcome = assembler.start(portion, ctx)?;
                self.state = SourceState::FetchingPortion(assembler);
                Ok(self.apply(outcome))
            }
        }
    }

    /// Deliver the bytes of `range`; returns ranges of a follow-up phase.
    pub(crate) fn add_data(
        &mut self,
        range: BlobRange,
        data: Bytes,
        ctx: &ScanContext,
    ) -> Result<Vec<BlobRange>, ReadError> {
        let outcome = match (&self.kind, &mut self.state) {
            (SourceKind::Portion(portion), SourceState::FetchingPortion(assembler)) => {
                assembler.add_data(portion, range, data, ctx)?
            }
            (SourceKind::Committed(blob), SourceState::FetchingCommitted) => {
                if range != blob.blob_range() {
                    return Err(ReadError::UnknownBlobRange(range));
                }
                PhaseOutcome::Ready(committed::materialize(blob, data, ctx)?)
            }
            _ => return Err(ReadError::UnknownBlobRange(range)),
        };
        Ok(self.apply(outcome))
    }

    fn apply(&mut self, outcome: PhaseOutcome) -> Vec<BlobRange> {
        match outcome {
            PhaseOutcome::Pending(ranges) => ranges,
            PhaseOutcome::Ready(batch) => {
                self.state = SourceState::Ready(batch.map(Arc::new));
                Vec::new()
            }
        }
    }

    /// Rows with keys in `[from, to)`, `to` open when absent. `None` while
    /// the source has no data.
    pub(crate) fn range_for(
        &self,
        from: &SortableBatchPosition,
        to: Option<&SortableBatchPosition>,
    ) -> Option<BatchRange> {
        match &self.state {
            SourceState::Ready(Some(batch)) => Some(batch.range(Some(from), to)),
            _ => None,
        }
    }

    /// Drop materialized data once the source's last segment is merged.
    pub(crate) fn release(&mut self) {
        self.state = SourceState::Released;
    }
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSource")
            .field("source_idx", &self.source_idx)
            .field("origin", &self.origin)
            .field("start", &self.start.describe())
            .field("finish", &self.finish.describe())
            .field("exclusive", &self.exclusive)
            .finish()
    }
}

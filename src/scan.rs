//! Scan orchestration: key-space segmentation, the blob fetch queue and the
//! interval-by-interval merge.
//!
//! Every source start and finish is a border point. Segment `k` covers keys
//! in `[b_k, b_{k+1})` (the last one is open), and a source `[s, f]` takes
//! part in segment `k` when `s <= b_k <= f`. Segments are merged strictly in
//! order, each as soon as all of its sources are materialized.

use std::{
    cmp::Ordering,
    collections::{BTreeSet, HashMap, VecDeque},
    sync::Arc,
};

use arrow::array::RecordBatch;
use bytes::Bytes;

use crate::{
    blob::BlobRange,
    context::ScanContext,
    error::ReadError,
    key::SortableBatchPosition,
    source::DataSource,
    stream::{MergeStream, RecordBatchBuilder},
};

/// Blob ranges waiting to be handed out, with the source owning each.
#[derive(Debug, Default)]
pub(crate) struct FetchQueue {
    queue: VecDeque<BlobRange>,
    owners: HashMap<BlobRange, u32>,
}

impl FetchQueue {
    /// Queue `ranges` on behalf of `owner`. A range may be owned only once.
    pub(crate) fn enqueue(&mut self, owner: u32, ranges: Vec<BlobRange>) -> Result<(), ReadError> {
        for range in ranges {
            if self.owners.insert(range, owner).is_some() {
                return Err(ReadError::DuplicateBlobRange(range));
            }
            self.queue.push_back(range);
        }
        Ok(())
    }

    pub(crate) fn pop_front(&mut self) -> Option<BlobRange> {
        self.queue.pop_front()
    }

    /// Remove and return the owner of a delivered range.
    pub(crate) fn take_owner(&mut self, range: &BlobRange) -> Result<u32, ReadError> {
        self.owners
            .remove(range)
            .ok_or(ReadError::UnknownBlobRange(*range))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Ranges handed out or queued but not delivered yet.
    pub(crate) fn outstanding(&self) -> usize {
        self.owners.len()
    }
}

struct BorderPoint {
    position: SortableBatchPosition,
    starting: Vec<u32>,
    finishing: Vec<u32>,
}

/// One segment of the key space and the sources covering it.
struct FetchingInterval {
    idx: usize,
    start: SortableBatchPosition,
    finish: Option<SortableBatchPosition>,
    sources: Vec<u32>,
    finishing: Vec<u32>,
}

/// Drives sources through fetching and merges them segment by segment.
pub(crate) struct ScanHead {
    ctx: Arc<ScanContext>,
    sources: Vec<DataSource>,
    borders: Vec<BorderPoint>,
    next_border: usize,
    live: BTreeSet<u32>,
    intervals: VecDeque<FetchingInterval>,
    intervals_built: usize,
    merge: MergeStream,
    builder: RecordBatchBuilder,
}

impl ScanHead {
    /// `sources[i]` must carry source index `i`.
    pub(crate) fn new(ctx: Arc<ScanContext>, sources: Vec<DataSource>) -> Self {
        debug_assert!(sources
            .iter()
            .enumerate()
            .all(|(idx, source)| source.source_idx() as usize == idx));
        let borders = build_borders(&sources);
        let merge = MergeStream::new(ctx.is_reverse());
        let builder = RecordBatchBuilder::new(Arc::clone(ctx.merge_schema()));
        Self {
            ctx,
            sources,
            borders,
            next_border: 0,
            live: BTreeSet::new(),
            intervals: VecDeque::new(),
            intervals_built: 0,
            merge,
            builder,
        }
    }

    /// Advance one border: start newly live sources and record the segment.
    /// Returns false once every border is consumed.
    pub(crate) fn build_next_interval(&mut self, queue: &mut FetchQueue) -> Result<bool, ReadError> {
        let Some(border) = self.borders.get(self.next_border) else {
            return Ok(false);
        };
        for &idx in &border.starting {
            self.live.insert(idx);
            let source = &mut self.sources[idx as usize];
            let ranges = source.start_fetching(&self.ctx)?;
            queue.enqueue(idx, ranges)?;
        }
        if !self.live.is_empty() {
            let interval = FetchingInterval {
                idx: self.intervals_built,
                start: border.position.clone(),
                finish: self
                    .borders
                    .get(self.next_border + 1)
                    .map(|next| next.position.clone()),
                sources: self.live.iter().copied().collect(),
                finishing: border.finishing.clone(),
            };
            self.ctx
                .observer()
                .on_interval_built(interval.idx, &interval.sources);
            self.intervals_built += 1;
            self.intervals.push_back(interval);
        }
        for idx in &border.finishing {
            self.live.remove(idx);
        }
        self.next_border += 1;
        Ok(true)
    }

    /// Deliver bytes to the owning source and queue any follow-up ranges.
    pub(crate) fn add_data(
        &mut self,
        owner: u32,
        range: BlobRange,
        data: Bytes,
        queue: &mut FetchQueue,
    ) -> Result<(), ReadError> {
        let source = self
            .sources
            .get_mut(owner as usize)
            .ok_or(ReadError::UnknownBlobRange(range))?;
        let follow_up = source.add_data(range, data, &self.ctx)?;
        queue.enqueue(owner, follow_up)
    }

    /// Merge every leading segment whose sources are all materialized.
    pub(crate) fn drain_results(&mut self) -> Result<Vec<RecordBatch>, ReadError> {
        let mut results = Vec::new();
        while let Some(interval) = self.intervals.front() {
            let ready = interval
                .sources
                .iter()
                .all(|idx| self.sources[*idx as usize].is_ready());
            if !ready {
                break;
            }
            let Some(interval) = self.intervals.pop_front() else {
                break;
            };
            for &idx in &interval.sources {
                let source = &self.sources[idx as usize];
                if let Some(range) = source.range_for(&interval.start, interval.finish.as_ref()) {
                    self.merge.add_pool_source(Some(idx), range);
                }
            }
            match interval.finish {
                Some(finish) => {
                    self.merge.drain_current_to(&mut self.builder, finish, false)?;
                }
                None => self.merge.drain_all(&mut self.builder)?,
            }
            debug_assert!(self.merge.is_empty(), "rows left behind the segment border");
            let batch = self.builder.finish()?;
            self.ctx
                .observer()
                .on_interval_merged(interval.idx, batch.num_rows());
            for &idx in &interval.finishing {
                self.sources[idx as usize].release();
            }
            if batch.num_rows() > 0 {
                results.push(batch);
            }
        }
        Ok(results)
    }

    /// Whether every border is consumed and every segment merged.
    pub(crate) fn is_finished(&self) -> bool {
        self.next_border >= self.borders.len() && self.intervals.is_empty()
    }

    pub(crate) fn intervals_built(&self) -> usize {
        self.intervals_built
    }
}

/// Group source starts and finishes into border points in scan order.
fn build_borders(sources: &[DataSource]) -> Vec<BorderPoint> {
    let mut marks: Vec<(&SortableBatchPosition, u32, bool)> = sources
        .iter()
        .flat_map(|source| {
            [
                (source.start(), source.source_idx(), true),
                (source.finish(), source.source_idx(), false),
            ]
        })
        .collect();
    marks.sort_by(|left, right| left.0.compare(right.0));

    let mut borders: Vec<BorderPoint> = Vec::new();
    for (position, idx, is_start) in marks {
        let same = borders
            .last()
            .is_some_and(|last| last.position.compare(position) == Ordering::Equal);
        if !same {
            borders.push(BorderPoint {
                position: position.clone(),
                starting: Vec::new(),
                finishing: Vec::new(),
            });
        }
        if let Some(border) = borders.last_mut() {
            if is_start {
                border.starting.push(idx);
            } else {
                border.finishing.push(idx);
            }
        }
    }
    borders
}

use std::{
    cmp::Ordering,
    collections::{
        binary_heap::{BinaryHeap, PeekMut},
        HashMap, HashSet, VecDeque,
    },
    sync::Arc,
};

use super::{
    package::RecordBatchBuilder,
    record_batch::{BatchRange, FilterState, SourceBatch},
};
use crate::{error::ReadError, key::SortableBatchPosition, mvcc::Snapshot};

/// Outcome of draining the heap top.
#[derive(Debug)]
pub(crate) enum Drained {
    /// The winning row of a key.
    Row(SortableBatchPosition),
    /// The winning row of a key was a tombstone.
    Tombstone,
    /// The active control point surfaced.
    ControlPoint,
}

/// Cursor over the allowed rows of one batch range.
struct DataCursor {
    pool: Option<u32>,
    batch: Arc<SourceBatch>,
    position: SortableBatchPosition,
    end: usize,
    filtered: bool,
}

impl DataCursor {
    fn new(pool: Option<u32>, range: BatchRange, filtered: bool) -> Option<Self> {
        let batch = Arc::clone(range.batch());
        let first = next_allowed(&batch, range.begin(), range.end(), filtered)?;
        Some(Self {
            pool,
            position: batch.position(first),
            batch,
            end: range.end(),
            filtered,
        })
    }

    fn version(&self) -> Snapshot {
        self.batch.version(self.position.position())
    }

    fn is_deleted(&self) -> bool {
        self.batch.is_deleted(self.position.position())
    }

    /// Step to the next allowed row; false once the range is exhausted.
    fn advance(&mut self) -> bool {
        match next_allowed(
            &self.batch,
            self.position.position() + 1,
            self.end,
            self.filtered,
        ) {
            Some(row) => self.position.init_position(row),
            None => false,
        }
    }
}

fn next_allowed(batch: &SourceBatch, from: usize, end: usize, filtered: bool) -> Option<usize> {
    match (filtered, batch.filter()) {
        (true, Some(filter)) => (from..end).find(|row| filter.allows(*row)),
        _ => (from < end).then_some(from),
    }
}

fn next_in_pool(
    pools: &mut HashMap<u32, VecDeque<BatchRange>>,
    pool: u32,
) -> Option<DataCursor> {
    let queue = pools.get_mut(&pool)?;
    while let Some(range) = queue.pop_front() {
        let filtered = range.filter_state() == FilterState::Partial;
        if let Some(cursor) = DataCursor::new(Some(pool), range, filtered) {
            return Some(cursor);
        }
    }
    None
}

/// Heap element: a data cursor or a caller boundary.
enum BatchIterator {
    Data(DataCursor),
    ControlPoint {
        position: SortableBatchPosition,
        include_finish: bool,
    },
}

impl BatchIterator {
    fn position(&self) -> &SortableBatchPosition {
        match self {
            BatchIterator::Data(cursor) => &cursor.position,
            BatchIterator::ControlPoint { position, .. } => position,
        }
    }

    /// Tie-break among equal keys; the greater rank surfaces first.
    fn rank(&self) -> (u8, Snapshot) {
        match self {
            BatchIterator::ControlPoint {
                include_finish: false,
                ..
            } => (2, Snapshot::MAX),
            BatchIterator::Data(cursor) => (1, cursor.version()),
            BatchIterator::ControlPoint {
                include_finish: true,
                ..
            } => (0, Snapshot::MIN),
        }
    }
}

impl PartialEq for BatchIterator {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for BatchIterator {}

impl PartialOrd for BatchIterator {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BatchIterator {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .position()
            .compare(self.position())
            .then_with(|| self.rank().cmp(&other.rank()))
    }
}

/// K-way merge of sorted, versioned batch ranges.
///
/// Among rows sharing a key only the highest version survives, and a
/// surviving tombstone hides the key altogether. Ranges added under the same
/// pool id form one logical stream: only one of them sits in the heap at a
/// time, the rest wait in the pool queue.
pub(crate) struct MergeStream {
    reverse: bool,
    heap: BinaryHeap<BatchIterator>,
    pools: HashMap<u32, VecDeque<BatchRange>>,
    active_pools: HashSet<u32>,
    control_points: usize,
    #[cfg(debug_assertions)]
    last_emitted: Option<SortableBatchPosition>,
}

impl MergeStream {
    pub(crate) fn new(reverse: bool) -> Self {
        Self {
            reverse,
            heap: BinaryHeap::new(),
            pools: HashMap::new(),
            active_pools: HashSet::new(),
            control_points: 0,
            #[cfg(debug_assertions)]
            last_emitted: None,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Add `range` under `pool`. Empty and fully denied ranges are dropped.
    pub(crate) fn add_pool_source(&mut self, pool: Option<u32>, range: BatchRange) {
        if range.is_empty() {
            return;
        }
        let filtered = match range.filter_state() {
            FilterState::DenyAll => return,
            FilterState::AllowAll => false,
            FilterState::Partial => true,
        };
        if let Some(pool) = pool {
            if self.active_pools.contains(&pool) {
                self.pools.entry(pool).or_default().push_back(range);
                return;
            }
        }
        if let Some(cursor) = DataCursor::new(pool, range, filtered) {
            if let Some(pool) = pool {
                self.active_pools.insert(pool);
            }
            self.heap.push(BatchIterator::Data(cursor));
        }
    }

    pub(crate) fn put_control_point(
        &mut self,
        position: SortableBatchPosition,
        include_finish: bool,
    ) -> Result<(), ReadError> {
        if self.control_points > 0 {
            return Err(ReadError::ControlPointReentrancy);
        }
        debug_assert_eq!(position.is_reverse(), self.reverse);
        self.control_points += 1;
        self.heap.push(BatchIterator::ControlPoint {
            position,
            include_finish,
        });
        Ok(())
    }

    pub(crate) fn remove_control_point(&mut self) {
        if self.control_points == 0 {
            return;
        }
        self.heap
            .retain(|entry| !matches!(entry, BatchIterator::ControlPoint { .. }));
        self.control_points = 0;
    }

    /// Emit merged rows ordered before `target` (and equal to it when
    /// `include_finish` is set). Returns whether rows remain in the stream.
    pub(crate) fn drain_current_to(
        &mut self,
        builder: &mut RecordBatchBuilder,
        target: SortableBatchPosition,
        include_finish: bool,
    ) -> Result<bool, ReadError> {
        self.put_control_point(target, include_finish)?;
        while let Some(step) = self.drain_current_position()? {
            match step {
                Drained::Row(position) => builder.add_record(&position)?,
                Drained::Tombstone => {}
                Drained::ControlPoint => break,
            }
        }
        self.remove_control_point();
        Ok(!self.heap.is_empty())
    }

    /// Emit every remaining merged row.
    pub(crate) fn drain_all(&mut self, builder: &mut RecordBatchBuilder) -> Result<(), ReadError> {
        self.remove_control_point();
        while let Some(step) = self.drain_current_position()? {
            if let Drained::Row(position) = step {
                builder.add_record(&position)?;
            }
        }
        Ok(())
    }

    /// Resolve the key at the heap top; `None` once the heap is empty.
    pub(crate) fn drain_current_position(&mut self) -> Result<Option<Drained>, ReadError> {
        let (winner, deleted, mut previous) = match self.heap.peek() {
            None => return Ok(None),
            Some(BatchIterator::ControlPoint { .. }) => {
                if let Some(top) = self.heap.peek_mut() {
                    PeekMut::pop(top);
                }
                self.control_points = self.control_points.saturating_sub(1);
                return Ok(Some(Drained::ControlPoint));
            }
            Some(BatchIterator::Data(cursor)) => (
                cursor.position.clone(),
                cursor.is_deleted(),
                cursor.version(),
            ),
        };
        self.advance_top();

        loop {
            let next = match self.heap.peek() {
                Some(BatchIterator::Data(cursor))
                    if cursor.position.compare(&winner) == Ordering::Equal =>
                {
                    cursor.version()
                }
                _ => break,
            };
            if next >= previous {
                return Err(ReadError::VersionOrder {
                    key: winner.describe(),
                    previous,
                    next,
                });
            }
            previous = next;
            self.advance_top();
        }

        if deleted {
            return Ok(Some(Drained::Tombstone));
        }
        #[cfg(debug_assertions)]
        self.check_sequence(&winner);
        Ok(Some(Drained::Row(winner)))
    }

    /// Move the top data cursor forward, falling back to its pool.
    fn advance_top(&mut self) {
        let Some(mut top) = self.heap.peek_mut() else {
            return;
        };
        let BatchIterator::Data(cursor) = &mut *top else {
            return;
        };
        if cursor.advance() {
            return;
        }
        let pool = cursor.pool;
        match pool.and_then(|pool| next_in_pool(&mut self.pools, pool)) {
            Some(next) => *cursor = next,
            None => {
                PeekMut::pop(top);
                if let Some(pool) = pool {
                    self.active_pools.remove(&pool);
                }
            }
        }
    }

    #[cfg(debug_assertions)]
    fn check_sequence(&mut self, position: &SortableBatchPosition) {
        if let Some(last) = &self.last_emitted {
            let ord = position.compare(last);
            debug_assert!(
                ord == Ordering::Greater || (ord == Ordering::Less && position.position() == 0),
                "merge output out of order: {} after {}",
                position.describe(),
                last.describe()
            );
        }
        self.last_emitted = Some(position.clone());
    }
}

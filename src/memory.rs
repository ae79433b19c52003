use std::{
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

#[derive(Debug)]
struct Counters {
    limit: usize,
    allocated: AtomicUsize,
    peak: AtomicUsize,
}

/// Byte budget shared by the results of one or more scans.
///
/// The budget only accounts: reservations never fail, and the driver is
/// expected to consult [`MemoryBudget::is_exhausted`] before fetching more.
#[derive(Clone)]
pub struct MemoryBudget {
    counters: Arc<Counters>,
}

impl MemoryBudget {
    /// Budget of `limit` bytes.
    pub fn new(limit: usize) -> Self {
        Self {
            counters: Arc::new(Counters {
                limit,
                allocated: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        }
    }

    /// Budget that never runs out.
    pub fn unlimited() -> Self {
        Self::new(usize::MAX)
    }

    /// Limit in bytes.
    pub fn limit(&self) -> usize {
        self.counters.limit
    }

    /// Bytes held by live reservations.
    pub fn allocated(&self) -> usize {
        self.counters.allocated.load(Ordering::Acquire)
    }

    /// Bytes left before the limit.
    pub fn available(&self) -> usize {
        self.limit().saturating_sub(self.allocated())
    }

    /// Whether live reservations reached the limit.
    pub fn is_exhausted(&self) -> bool {
        self.allocated() >= self.limit()
    }

    /// Highest value `allocated` ever reached.
    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::Acquire)
    }

    /// Reserve `bytes` until the guard is dropped.
    pub fn reserve(&self, bytes: usize) -> MemoryGuard {
        let allocated = self.counters.allocated.fetch_add(bytes, Ordering::AcqRel) + bytes;
        self.counters.peak.fetch_max(allocated, Ordering::AcqRel);
        MemoryGuard {
            budget: self.clone(),
            bytes,
        }
    }
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl fmt::Debug for MemoryBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBudget")
            .field("limit", &self.limit())
            .field("allocated", &self.allocated())
            .field("peak", &self.peak())
            .finish()
    }
}

/// Reservation against a [`MemoryBudget`], released on drop.
#[derive(Debug)]
pub struct MemoryGuard {
    budget: MemoryBudget,
    bytes: usize,
}

impl MemoryGuard {
    /// Reserved bytes.
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for MemoryGuard {
    fn drop(&mut self) {
        self.budget
            .counters
            .allocated
            .fetch_sub(self.bytes, Ordering::AcqRel);
    }
}

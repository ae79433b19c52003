use std::{fmt, sync::Arc};

use crate::{
    memory::MemoryBudget,
    observability::{ScanObserver, TracingObserver},
};

/// Per-scan settings.
#[derive(Clone)]
pub struct ReadOptions {
    pub(crate) reverse: bool,
    pub(crate) internal_read: bool,
    pub(crate) memory_budget: MemoryBudget,
    pub(crate) observer: Arc<dyn ScanObserver>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            reverse: false,
            internal_read: false,
            memory_budget: MemoryBudget::unlimited(),
            observer: Arc::new(TracingObserver),
        }
    }
}

impl ReadOptions {
    /// Emit keys in descending order.
    pub fn reverse(self, reverse: bool) -> Self {
        ReadOptions { reverse, ..self }
    }

    /// Bypass the early filter and fetch every column in one phase.
    pub fn internal_read(self, internal_read: bool) -> Self {
        ReadOptions {
            internal_read,
            ..self
        }
    }

    /// Budget every result reserves against.
    pub fn memory_budget(self, memory_budget: MemoryBudget) -> Self {
        ReadOptions {
            memory_budget,
            ..self
        }
    }

    /// Receiver of scan events.
    pub fn observer(self, observer: Arc<dyn ScanObserver>) -> Self {
        ReadOptions { observer, ..self }
    }

    /// Whether keys are emitted in descending order.
    pub fn is_reverse(&self) -> bool {
        self.reverse
    }

    /// Whether the early filter is bypassed.
    pub fn is_internal_read(&self) -> bool {
        self.internal_read
    }
}

impl fmt::Debug for ReadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadOptions")
            .field("reverse", &self.reverse)
            .field("internal_read", &self.internal_read)
            .field("memory_budget", &self.memory_budget)
            .finish_non_exhaustive()
    }
}

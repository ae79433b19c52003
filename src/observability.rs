//! Logging and scan events.
//!
//! Events use target "portion_scan" and carry an `event` field for filtering.
//! The crate never installs a global subscriber.
//!
//! ## Conventions
//!
//! - `event`: snake_case event name (required)
//! - `component`: subsystem (e.g. "reader", "scan")
//! - Use `%` for Display, `?` for Debug formatting

use std::fmt;

use crate::blob::{BlobId, BlobRange};

/// Target for all log events of the crate.
pub(crate) const SCAN_TARGET: &str = "portion_scan";

/// Macro for debug-level log events.
///
/// # Example
/// ```ignore
/// log_debug!(
///     component = "reader",
///     event = "add_data",
///     range = %range,
///     bytes = data.len(),
/// );
/// ```
macro_rules! log_debug {
    ($($field:tt)*) => {
        ::tracing::debug!(target: $crate::observability::SCAN_TARGET, $($field)*)
    };
}

/// Macro for trace-level log events.
macro_rules! log_trace {
    ($($field:tt)*) => {
        ::tracing::trace!(target: $crate::observability::SCAN_TARGET, $($field)*)
    };
}

/// Macro for warn-level log events.
macro_rules! log_warn {
    ($($field:tt)*) => {
        ::tracing::warn!(target: $crate::observability::SCAN_TARGET, $($field)*)
    };
}

pub(crate) use log_debug;
pub(crate) use log_trace;
pub(crate) use log_warn;

/// Where a data source comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceOrigin {
    /// Compacted portion.
    Portion(u64),
    /// Committed, not yet compacted blob.
    Committed(BlobId),
}

impl fmt::Display for SourceOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceOrigin::Portion(id) => write!(f, "portion {id}"),
            SourceOrigin::Committed(blob) => write!(f, "committed {blob}"),
        }
    }
}

/// Receiver of structured scan events.
///
/// Every method defaults to doing nothing.
pub trait ScanObserver: Send + Sync {
    /// A source joined the scan with interval `[start, finish]` rendered in
    /// scan order.
    fn on_source_registered(
        &self,
        _source_idx: u32,
        _origin: &SourceOrigin,
        _start: &str,
        _finish: &str,
    ) {
    }

    /// Interval `interval_idx` covers `sources`.
    fn on_interval_built(&self, _interval_idx: usize, _sources: &[u32]) {}

    /// Interval `interval_idx` produced `rows` merged rows.
    fn on_interval_merged(&self, _interval_idx: usize, _rows: usize) {}

    /// The driver was handed `range`; `None` means nothing is pending.
    fn on_blob_requested(&self, _range: Option<&BlobRange>) {}

    /// The driver delivered `bytes` for `range`.
    fn on_data(&self, _range: &BlobRange, _bytes: usize) {}

    /// Results were returned to the consumer.
    fn on_results(&self, _batches: usize, _rows: usize, _finished: bool) {}
}

/// Observer that drops every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl ScanObserver for NoopObserver {}

/// Observer that forwards events to `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl ScanObserver for TracingObserver {
    fn on_source_registered(&self, source_idx: u32, origin: &SourceOrigin, start: &str, finish: &str) {
        let event = match origin {
            SourceOrigin::Portion(_) => "portions_for_merge",
            SourceOrigin::Committed(_) => "committed_for_merge",
        };
        log_debug!(
            component = "reader",
            event = event,
            source_idx,
            origin = %origin,
            start,
            finish,
        );
    }

    fn on_interval_built(&self, interval_idx: usize, sources: &[u32]) {
        log_debug!(
            component = "scan",
            event = "interval_built",
            interval_idx,
            sources = ?sources,
        );
    }

    fn on_interval_merged(&self, interval_idx: usize, rows: usize) {
        log_trace!(
            component = "scan",
            event = "interval_merged",
            interval_idx,
            rows,
        );
    }

    fn on_blob_requested(&self, range: Option<&BlobRange>) {
        match range {
            Some(range) => log_trace!(
                component = "reader",
                event = "extract_next_blob",
                range = %range,
            ),
            None => log_trace!(component = "reader", event = "extract_next_blob", range = "none"),
        }
    }

    fn on_data(&self, range: &BlobRange, bytes: usize) {
        log_trace!(
            component = "reader",
            event = "add_data",
            range = %range,
            bytes,
        );
    }

    fn on_results(&self, batches: usize, rows: usize, finished: bool) {
        log_debug!(
            component = "reader",
            event = "extract_ready_results",
            batches,
            rows,
            finished,
        );
    }
}

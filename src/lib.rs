#![warn(missing_docs)]
//! Read-path merge engine for a columnar storage layer.
//!
//! A scan combines immutable, compacted *portions* with recently committed
//! blobs that have not been compacted yet. Every source is a sorted,
//! versioned Arrow batch covering a closed key interval. The engine splits
//! the key space at source borders, fetches only the columns each source
//! needs (in two phases when an early filter can prune rows), and merges the
//! sources through a k-way heap that keeps the newest version of each key and
//! hides tombstoned keys.
//!
//! The reader is a single-threaded, externally driven state machine: the
//! caller pulls blob ranges with [`PlainReader::extract_next_blob`], pushes
//! their bytes with [`PlainReader::add_data`] and collects merged batches
//! with [`PlainReader::extract_ready_results`].

/// Blob identifiers, ranges and payload codecs.
pub mod blob;
/// Column identifiers and column-set algebra.
pub mod columns;
mod context;
mod error;
/// Early-filter predicates and row-level filters.
pub mod filter;
/// Sort keys, sortable positions and binary search.
pub mod key;
mod memory;
/// Read metadata supplied by the catalog.
pub mod metadata;
/// MVCC version keys and system columns.
pub mod mvcc;
mod observability;
mod option;
/// Column fetching plans.
pub mod plan;
mod reader;
mod result;
mod scan;
mod source;
mod stream;

#[cfg(test)]
mod test_util;

pub use crate::{
    error::ReadError,
    memory::{MemoryBudget, MemoryGuard},
    observability::{NoopObserver, ScanObserver, SourceOrigin, TracingObserver},
    option::ReadOptions,
    reader::PlainReader,
    result::PartialReadResult,
};

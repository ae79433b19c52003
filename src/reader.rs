use std::{cmp::Ordering, sync::Arc};

use bytes::Bytes;

use crate::{
    blob::BlobRange,
    context::ScanContext,
    error::ReadError,
    key::{SortKey, SortableBatchPosition},
    metadata::{ReadMetadata, ReadStats},
    observability::log_warn,
    option::ReadOptions,
    result::PartialReadResult,
    scan::{FetchQueue, ScanHead},
    source::DataSource,
};

/// Single-scan read coordinator.
///
/// The caller drives the scan: it pulls ranges with
/// [`extract_next_blob`](Self::extract_next_blob), pushes their bytes with
/// [`add_data`](Self::add_data) and collects merged rows with
/// [`extract_ready_results`](Self::extract_ready_results). After any error
/// the reader is poisoned and every call returns [`ReadError::Aborted`].
pub struct PlainReader {
    ctx: Arc<ScanContext>,
    scan: ScanHead,
    queue: FetchQueue,
    ready: Vec<PartialReadResult>,
    ready_rows: usize,
    stats: ReadStats,
    aborted: bool,
}

impl PlainReader {
    /// Register every portion and committed blob of `metadata` as a source.
    pub fn try_new(metadata: Arc<ReadMetadata>, options: ReadOptions) -> Result<Self, ReadError> {
        let stats = metadata.stats();
        let ctx = Arc::new(ScanContext::new(metadata, &options)?);
        let mut sources = order_sources(&ctx)?;
        mark_exclusive(&mut sources);
        for source in &sources {
            ctx.observer().on_source_registered(
                source.source_idx(),
                source.origin(),
                &source.start().describe(),
                &source.finish().describe(),
            );
        }
        let scan = ScanHead::new(Arc::clone(&ctx), sources);
        Ok(Self {
            ctx,
            scan,
            queue: FetchQueue::default(),
            ready: Vec::new(),
            ready_rows: 0,
            stats,
            aborted: false,
        })
    }

    /// Next range the driver should fetch; `None` when nothing is pending.
    pub fn extract_next_blob(&mut self) -> Result<Option<BlobRange>, ReadError> {
        self.guarded(|reader| {
            while reader.queue.is_empty() {
                if !reader.scan.build_next_interval(&mut reader.queue)? {
                    break;
                }
            }
            let range = reader.queue.pop_front();
            if range.is_some() {
                reader.stats.requested_blobs += 1;
            }
            reader.ctx.observer().on_blob_requested(range.as_ref());
            Ok(range)
        })
    }

    /// Deliver the bytes of a range handed out by
    /// [`extract_next_blob`](Self::extract_next_blob).
    pub fn add_data(&mut self, range: &BlobRange, data: Bytes) -> Result<(), ReadError> {
        self.guarded(|reader| {
            let owner = reader.queue.take_owner(range)?;
            reader.stats.delivered_bytes += data.len() as u64;
            reader.ctx.observer().on_data(range, data.len());
            reader.scan.add_data(owner, *range, data, &mut reader.queue)
        })
    }

    /// Merged results, once at least `max_rows` rows are ready or the scan is
    /// finished. Results hold exactly `max_rows` rows except possibly the
    /// last; zero puts everything into one result.
    pub fn extract_ready_results(
        &mut self,
        max_rows: usize,
    ) -> Result<Vec<PartialReadResult>, ReadError> {
        self.guarded(|reader| {
            for batch in reader.scan.drain_results()? {
                reader.ready_rows += batch.num_rows();
                reader
                    .ready
                    .push(PartialReadResult::new(reader.ctx.budget(), batch));
            }
            let finished = reader.scan.is_finished();
            if reader.ready.is_empty() || (reader.ready_rows < max_rows && !finished) {
                return Ok(Vec::new());
            }

            let ready = std::mem::take(&mut reader.ready);
            reader.ready_rows = 0;
            let mut results =
                PartialReadResult::split_results(ready, max_rows, reader.ctx.budget())?;
            let metadata = Arc::clone(reader.ctx.metadata());
            let sort_schema = metadata.sort_schema();
            let result_schema = metadata.result_schema();
            let program_schema = metadata.program_columns().arrow_schema();
            let program_only =
                (metadata.program_columns() - metadata.result_columns()).field_names();
            for result in &mut results {
                result.build_last_key(&sort_schema)?;
                match metadata.program() {
                    Some(program) => {
                        result.strip_columns(&program_schema)?;
                        result.apply_program(program)?;
                        result.drop_columns(&program_only)?;
                    }
                    None => result.strip_columns(&result_schema)?,
                }
            }
            let rows: usize = results.iter().map(PartialReadResult::records_count).sum();
            reader.stats.emitted_rows += rows;
            reader
                .ctx
                .observer()
                .on_results(results.len(), rows, finished);
            Ok(results)
        })
    }

    /// Whether every row has been handed to the consumer.
    pub fn is_finished(&self) -> bool {
        self.aborted || (self.scan.is_finished() && self.ready.is_empty())
    }

    /// Whether an earlier call failed.
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Ranges handed out or queued but not delivered yet.
    pub fn outstanding_blobs(&self) -> usize {
        self.queue.outstanding()
    }

    /// Scan counters.
    pub fn stats(&self) -> ReadStats {
        ReadStats {
            intervals: self.scan.intervals_built(),
            ..self.stats
        }
    }

    fn guarded<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ReadError>,
    ) -> Result<T, ReadError> {
        if self.aborted {
            return Err(ReadError::Aborted);
        }
        let result = f(self);
        if let Err(err) = &result {
            self.aborted = true;
            log_warn!(
                component = "reader",
                event = "scan_aborted",
                invariant = err.is_invariant(),
                error = %err,
            );
        }
        result
    }
}

impl std::fmt::Debug for PlainReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlainReader")
            .field("ready_rows", &self.ready_rows)
            .field("outstanding_blobs", &self.queue.outstanding())
            .field("aborted", &self.aborted)
            .field("stats", &self.stats)
            .finish()
    }
}

/// Two-pointer merge of portions and committed blobs by start key in scan
/// order. On equal starts the committed blob goes first.
fn order_sources(ctx: &ScanContext) -> Result<Vec<DataSource>, ReadError> {
    let metadata = ctx.metadata();
    let reverse = ctx.is_reverse();
    let scan_start = |first: &SortKey, last: &SortKey| -> Result<SortableBatchPosition, ReadError> {
        ctx.position(if reverse { last } else { first })
    };

    let mut portions = metadata
        .portions()
        .iter()
        .map(|portion| {
            scan_start(portion.index_key_start(), portion.index_key_end())
                .map(|start| (start, portion))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let mut committed = metadata
        .committed()
        .iter()
        .map(|blob| scan_start(blob.first(), blob.last()).map(|start| (start, blob)))
        .collect::<Result<Vec<_>, _>>()?;
    portions.sort_by(|left, right| left.0.compare(&right.0));
    committed.sort_by(|left, right| left.0.compare(&right.0));

    let mut sources = Vec::with_capacity(portions.len() + committed.len());
    let (mut p, mut c) = (0, 0);
    while p < portions.len() || c < committed.len() {
        let take_committed = match (portions.get(p), committed.get(c)) {
            (Some(portion), Some(blob)) => blob.0.compare(&portion.0) != Ordering::Greater,
            (None, Some(_)) => true,
            _ => false,
        };
        let idx = sources.len() as u32;
        if take_committed {
            sources.push(DataSource::committed(idx, committed[c].1.clone(), ctx)?);
            c += 1;
        } else {
            sources.push(DataSource::portion(idx, portions[p].1.clone(), ctx)?);
            p += 1;
        }
    }
    Ok(sources)
}

/// A source is exclusive when no other source interval intersects it.
/// `sources` must be ordered by start in scan order.
fn mark_exclusive(sources: &mut [DataSource]) {
    let mut max_finish: Option<SortableBatchPosition> = None;
    for idx in 0..sources.len() {
        let clear_before = max_finish
            .as_ref()
            .map_or(true, |max| max.compare(sources[idx].start()) == Ordering::Less);
        let clear_after = sources.get(idx + 1).map_or(true, |next| {
            sources[idx].finish().compare(next.start()) == Ordering::Less
        });
        let finish = sources[idx].finish().clone();
        let extends = max_finish
            .as_ref()
            .map_or(true, |max| finish.compare(max) == Ordering::Greater);
        if extends {
            max_finish = Some(finish);
        }
        sources[idx].set_exclusive(clear_before && clear_after);
    }
}

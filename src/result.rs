use std::{fmt, sync::Arc};

use arrow::{
    array::RecordBatch,
    compute::concat_batches,
    datatypes::SchemaRef,
};

use crate::{
    error::ReadError,
    key::SortKey,
    memory::{MemoryBudget, MemoryGuard},
    metadata::ResultProgram,
};

/// A batch handed to the consumer, holding its memory reservation.
pub struct PartialReadResult {
    guard: MemoryGuard,
    batch: RecordBatch,
    last_key: Option<SortKey>,
}

impl PartialReadResult {
    pub(crate) fn new(budget: &MemoryBudget, batch: RecordBatch) -> Self {
        let guard = budget.reserve(batch.get_array_memory_size());
        Self {
            guard,
            batch,
            last_key: None,
        }
    }

    /// Result rows.
    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// Take the rows; the reservation is released.
    pub fn into_batch(self) -> RecordBatch {
        self.batch
    }

    /// Number of rows.
    pub fn records_count(&self) -> usize {
        self.batch.num_rows()
    }

    /// Primary key of the last row, to resume a scan after this result.
    pub fn last_key(&self) -> Option<&SortKey> {
        self.last_key.as_ref()
    }

    /// Bytes reserved against the scan budget.
    pub fn memory_bytes(&self) -> usize {
        self.guard.bytes()
    }

    /// Re-chunk `results` into batches of `max_rows` rows (the last may be
    /// shorter). Zero keeps everything in one chunk. Every chunk takes a
    /// fresh reservation and the reservations of `results` are released.
    pub(crate) fn split_results(
        results: Vec<PartialReadResult>,
        max_rows: usize,
        budget: &MemoryBudget,
    ) -> Result<Vec<PartialReadResult>, ReadError> {
        let Some(schema) = results.first().map(|result| result.batch.schema()) else {
            return Ok(Vec::new());
        };
        let total: usize = results.iter().map(PartialReadResult::records_count).sum();
        let chunk = if max_rows == 0 { total.max(1) } else { max_rows };

        let mut chunks = Vec::with_capacity(total.div_ceil(chunk));
        let mut pending: Vec<RecordBatch> = Vec::new();
        let mut pending_rows = 0;
        for result in results {
            let batch = result.into_batch();
            let mut offset = 0;
            while offset < batch.num_rows() {
                let take = (chunk - pending_rows).min(batch.num_rows() - offset);
                pending.push(batch.slice(offset, take));
                pending_rows += take;
                offset += take;
                if pending_rows == chunk {
                    chunks.push(Self::new(budget, concat_batches(&schema, &pending)?));
                    pending.clear();
                    pending_rows = 0;
                }
            }
        }
        if pending_rows > 0 {
            chunks.push(Self::new(budget, concat_batches(&schema, &pending)?));
        }
        Ok(chunks)
    }

    /// Remember the primary key of the last row.
    pub(crate) fn build_last_key(&mut self, pk_schema: &SchemaRef) -> Result<(), ReadError> {
        let rows = self.batch.num_rows();
        if rows > 0 {
            self.last_key = Some(SortKey::from_row(&self.batch, rows - 1, pk_schema)?);
        }
        Ok(())
    }

    /// Project to the columns visible to the consumer.
    pub(crate) fn strip_columns(&mut self, result_schema: &SchemaRef) -> Result<(), ReadError> {
        let indices = result_schema
            .fields()
            .iter()
            .map(|field| {
                self.batch
                    .schema()
                    .index_of(field.name())
                    .map_err(|_| ReadError::UnknownColumn(field.name().clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.batch = self.batch.project(&indices)?;
        Ok(())
    }

    /// Remove `columns` wherever the batch still carries them.
    pub(crate) fn drop_columns(&mut self, columns: &[String]) -> Result<(), ReadError> {
        let schema = self.batch.schema();
        let keep: Vec<usize> = schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(_, field)| !columns.contains(field.name()))
            .map(|(idx, _)| idx)
            .collect();
        if keep.len() != schema.fields().len() {
            self.batch = self.batch.project(&keep)?;
        }
        Ok(())
    }

    /// Run the transform over the rows.
    pub(crate) fn apply_program(&mut self, program: &Arc<dyn ResultProgram>) -> Result<(), ReadError> {
        let placeholder = RecordBatch::new_empty(self.batch.schema());
        let batch = std::mem::replace(&mut self.batch, placeholder);
        self.batch = program.apply(batch)?;
        Ok(())
    }
}

impl fmt::Debug for PartialReadResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartialReadResult")
            .field("rows", &self.records_count())
            .field("memory_bytes", &self.memory_bytes())
            .field("last_key", &self.last_key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util;

    #[test]
    fn split_cuts_exact_chunks_across_batches() {
        let budget = MemoryBudget::new(1 << 20);
        let results: Vec<_> = [
            test_util::merge_batch(&[(1, "a"), (2, "b"), (3, "c")]),
            test_util::merge_batch(&[(4, "d"), (5, "e")]),
            test_util::merge_batch(&[(6, "f")]),
        ]
        .into_iter()
        .map(|batch| PartialReadResult::new(&budget, batch))
        .collect();
        let held = budget.allocated();
        assert!(held > 0);
        let chunks = PartialReadResult::split_results(results, 4, &budget).expect("split");
        let sizes: Vec<usize> = chunks.iter().map(PartialReadResult::records_count).collect();
        assert_eq!(sizes, vec![4, 2]);
        assert_eq!(test_util::keys_of(chunks[1].batch()), vec![5, 6]);
        let rechunked: usize = chunks.iter().map(PartialReadResult::memory_bytes).sum();
        assert_eq!(budget.allocated(), rechunked);

        drop(chunks);
        assert_eq!(budget.allocated(), 0);
    }

    #[test]
    fn zero_threshold_keeps_one_chunk() {
        let budget = MemoryBudget::unlimited();
        let results = vec![
            PartialReadResult::new(&budget, test_util::merge_batch(&[(1, "a")])),
            PartialReadResult::new(&budget, test_util::merge_batch(&[(2, "b")])),
        ];
        let chunks = PartialReadResult::split_results(results, 0, &budget).expect("split");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].records_count(), 2);
        assert!(PartialReadResult::split_results(Vec::new(), 3, &budget)
            .expect("split")
            .is_empty());
    }

    #[test]
    fn finalization_sets_last_key_and_strips() {
        let budget = MemoryBudget::unlimited();
        let mut result = PartialReadResult::new(&budget, test_util::merge_batch(&[(1, "a"), (9, "z")]));
        result.build_last_key(&test_util::sort_schema()).expect("last key");
        assert_eq!(result.last_key().map(SortKey::values), Some(vec!["9".to_string()]));

        let visible = Arc::new(arrow::datatypes::Schema::new(vec![
            test_util::merge_schema().field(1).clone(),
        ]));
        result.strip_columns(&visible).expect("strip");
        assert_eq!(result.batch().num_columns(), 1);
        assert_eq!(result.batch().schema().field(0).name(), "v");
    }

    #[test]
    fn dropping_absent_columns_keeps_the_batch() {
        let budget = MemoryBudget::unlimited();
        let mut result = PartialReadResult::new(&budget, test_util::merge_batch(&[(1, "a")]));
        result.drop_columns(&["zzz".to_string()]).expect("drop");
        assert_eq!(result.batch().num_columns(), 2);
        result.drop_columns(&["k".to_string()]).expect("drop");
        assert_eq!(result.batch().num_columns(), 1);
        assert_eq!(result.batch().schema().field(0).name(), "v");
    }
}

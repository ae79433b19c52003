use std::{collections::HashMap, sync::Arc};

use arrow::{
    array::{Array, ArrayRef, RecordBatch, RecordBatchOptions},
    compute::interleave,
    datatypes::SchemaRef,
};

use crate::{error::ReadError, key::SortableBatchPosition};

/// Collects merged rows and materializes them into one batch.
///
/// Rows are remembered as `(batch, row)` pairs and gathered column by
/// column on [`RecordBatchBuilder::finish`].
pub(crate) struct RecordBatchBuilder {
    schema: SchemaRef,
    batches: Vec<Arc<RecordBatch>>,
    by_ptr: HashMap<usize, usize>,
    indices: Vec<(usize, usize)>,
}

impl RecordBatchBuilder {
    pub(crate) fn new(schema: SchemaRef) -> Self {
        Self {
            schema,
            batches: Vec::new(),
            by_ptr: HashMap::new(),
            indices: Vec::new(),
        }
    }

    pub(crate) fn num_rows(&self) -> usize {
        self.indices.len()
    }

    /// Append the row under `position`.
    pub(crate) fn add_record(&mut self, position: &SortableBatchPosition) -> Result<(), ReadError> {
        let data = position.data().ok_or(ReadError::PositionWithoutData)?;
        if data.num_columns() != self.schema.fields().len() {
            return Err(ReadError::BuilderArity {
                expected: self.schema.fields().len(),
                actual: data.num_columns(),
            });
        }
        debug_assert!(
            data.schema()
                .fields()
                .iter()
                .zip(self.schema.fields().iter())
                .all(|(left, right)| left.name() == right.name()),
            "merged position fields differ from the builder"
        );
        let key = Arc::as_ptr(data) as usize;
        let batch_idx = match self.by_ptr.get(&key) {
            Some(idx) => *idx,
            None => {
                let idx = self.batches.len();
                self.batches.push(Arc::clone(data));
                self.by_ptr.insert(key, idx);
                idx
            }
        };
        self.indices.push((batch_idx, position.position()));
        Ok(())
    }

    /// Materialize collected rows and reset the builder.
    pub(crate) fn finish(&mut self) -> Result<RecordBatch, ReadError> {
        let indices = std::mem::take(&mut self.indices);
        let batches = std::mem::take(&mut self.batches);
        self.by_ptr.clear();
        if indices.is_empty() {
            return Ok(RecordBatch::new_empty(Arc::clone(&self.schema)));
        }
        let columns = (0..self.schema.fields().len())
            .map(|column| {
                let arrays: Vec<&dyn Array> = batches
                    .iter()
                    .map(|batch| batch.column(column).as_ref())
                    .collect();
                interleave(&arrays, &indices)
            })
            .collect::<Result<Vec<ArrayRef>, _>>()?;
        let options = RecordBatchOptions::new().with_row_count(Some(indices.len()));
        Ok(RecordBatch::try_new_with_options(
            Arc::clone(&self.schema),
            columns,
            &options,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util;

    #[test]
    fn rows_from_several_batches_interleave_in_order() {
        let converter = test_util::key_converter();
        let left = test_util::merge_source(&converter, &[(1, "a"), (3, "c")], (1, 1), false);
        let right = test_util::merge_source(&converter, &[(2, "b")], (1, 1), false);

        let mut builder = RecordBatchBuilder::new(test_util::merge_schema());
        builder.add_record(&left.position(0)).expect("add");
        builder.add_record(&right.position(0)).expect("add");
        builder.add_record(&left.position(1)).expect("add");
        assert_eq!(builder.num_rows(), 3);

        let batch = builder.finish().expect("finish");
        assert_eq!(
            test_util::rows_of(&batch),
            vec![
                (1, "a".to_string()),
                (2, "b".to_string()),
                (3, "c".to_string())
            ]
        );
        assert_eq!(builder.num_rows(), 0);
        assert_eq!(builder.finish().expect("empty").num_rows(), 0);
    }

    #[test]
    fn arity_mismatch_is_fatal() {
        let converter = test_util::key_converter();
        let source = test_util::merge_source(&converter, &[(1, "a")], (1, 1), false);
        let mut builder = RecordBatchBuilder::new(test_util::sort_schema());
        assert!(matches!(
            builder.add_record(&source.position(0)),
            Err(ReadError::BuilderArity {
                expected: 1,
                actual: 2
            })
        ));
    }
}

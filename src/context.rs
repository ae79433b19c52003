use std::sync::Arc;

use arrow::datatypes::SchemaRef;

use crate::{
    error::ReadError,
    filter::Predicate,
    key::{KeyConverter, SortKey, SortableBatchPosition},
    memory::MemoryBudget,
    metadata::ReadMetadata,
    observability::ScanObserver,
    option::ReadOptions,
    plan::ColumnsPlanner,
};

/// Scan-wide state shared by sources, the scan head and the reader.
pub(crate) struct ScanContext {
    metadata: Arc<ReadMetadata>,
    planner: ColumnsPlanner,
    converter: KeyConverter,
    merge_schema: SchemaRef,
    reverse: bool,
    internal_read: bool,
    observer: Arc<dyn ScanObserver>,
    budget: MemoryBudget,
}

impl ScanContext {
    pub(crate) fn new(metadata: Arc<ReadMetadata>, options: &ReadOptions) -> Result<Self, ReadError> {
        let planner = ColumnsPlanner::new(
            metadata.early_filter_columns().clone(),
            metadata.primary_key().clone(),
            metadata.full_fetch_columns().clone(),
            options.internal_read,
        )?;
        let converter = KeyConverter::new(metadata.sort_schema())?;
        let merge_schema = planner.merge_columns().arrow_schema();
        Ok(Self {
            metadata,
            planner,
            converter,
            merge_schema,
            reverse: options.reverse,
            internal_read: options.internal_read,
            observer: Arc::clone(&options.observer),
            budget: options.memory_budget.clone(),
        })
    }

    pub(crate) fn metadata(&self) -> &Arc<ReadMetadata> {
        &self.metadata
    }

    pub(crate) fn planner(&self) -> &ColumnsPlanner {
        &self.planner
    }

    pub(crate) fn converter(&self) -> &KeyConverter {
        &self.converter
    }

    /// Columns every materialized source carries into the merge.
    pub(crate) fn merge_schema(&self) -> &SchemaRef {
        &self.merge_schema
    }

    pub(crate) fn is_reverse(&self) -> bool {
        self.reverse
    }

    /// Filter applied to sources; internal reads see every row.
    pub(crate) fn early_filter(&self) -> Option<&Predicate> {
        if self.internal_read {
            None
        } else {
            self.metadata.early_filter()
        }
    }

    pub(crate) fn observer(&self) -> &dyn ScanObserver {
        self.observer.as_ref()
    }

    pub(crate) fn budget(&self) -> &MemoryBudget {
        &self.budget
    }

    /// Position of `key` in scan direction.
    pub(crate) fn position(&self, key: &SortKey) -> Result<SortableBatchPosition, ReadError> {
        let view = self.converter.key_view(key)?;
        Ok(SortableBatchPosition::new(view, 0, self.reverse))
    }
}

use crate::{columns::ColumnSet, error::ReadError};

/// Columns to materialize for one source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchingPlan {
    fetch_now: ColumnSet,
    fetch_conditional: ColumnSet,
    exclusive: bool,
}

impl FetchingPlan {
    /// Columns fetched unconditionally.
    pub fn fetch_now(&self) -> &ColumnSet {
        &self.fetch_now
    }

    /// Columns fetched only for rows that survive the early filter.
    pub fn fetch_conditional(&self) -> &ColumnSet {
        &self.fetch_conditional
    }

    /// Whether the plan was built for a source that overlaps no other source.
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// Whether the plan fetches in two phases.
    pub fn is_two_phase(&self) -> bool {
        !self.fetch_conditional.is_empty()
    }
}

/// Precomputed column sets deciding what each source fetches.
///
/// Built once per scan from the early-filter (EF), primary-key (PK) and
/// full-fetch (FF) sets.
#[derive(Clone, Debug)]
pub struct ColumnsPlanner {
    early_filter: ColumnSet,
    primary_key: ColumnSet,
    full_fetch: ColumnSet,
    pk_ff: ColumnSet,
    ef_pk: ColumnSet,
    ff_minus_ef: ColumnSet,
    ff_minus_ef_pk: ColumnSet,
    empty: ColumnSet,
    trivial_early_filter: bool,
    internal_read: bool,
}

impl ColumnsPlanner {
    /// Fails when FF does not contain EF.
    pub fn new(
        early_filter: ColumnSet,
        primary_key: ColumnSet,
        full_fetch: ColumnSet,
        internal_read: bool,
    ) -> Result<Self, ReadError> {
        if !full_fetch.contains(&early_filter) {
            return Err(ReadError::EarlyFilterNotCovered {
                missing: (&early_filter - &full_fetch).field_names(),
            });
        }
        let trivial_early_filter =
            early_filter.is_empty() || early_filter.columns_only(full_fetch.field_names().as_slice());
        let pk_ff = &primary_key | &full_fetch;
        let ef_pk = &early_filter | &primary_key;
        let ff_minus_ef = &full_fetch - &early_filter;
        let ff_minus_ef_pk = &ff_minus_ef - &primary_key;
        let empty = ColumnSet::empty(full_fetch.index());
        Ok(Self {
            early_filter,
            primary_key,
            full_fetch,
            pk_ff,
            ef_pk,
            ff_minus_ef,
            ff_minus_ef_pk,
            empty,
            trivial_early_filter,
            internal_read,
        })
    }

    /// Plan for a source; `exclusive_source` means no other source overlaps
    /// its key interval.
    pub fn fetching_plan(&self, exclusive_source: bool) -> FetchingPlan {
        let single_phase = self.internal_read || self.trivial_early_filter;
        let (fetch_now, fetch_conditional) = match (exclusive_source, single_phase) {
            (true, true) => (&self.full_fetch, &self.empty),
            (true, false) => (&self.early_filter, &self.ff_minus_ef),
            (false, true) => (&self.pk_ff, &self.empty),
            (false, false) => (&self.ef_pk, &self.ff_minus_ef_pk),
        };
        FetchingPlan {
            fetch_now: fetch_now.clone(),
            fetch_conditional: fetch_conditional.clone(),
            exclusive: exclusive_source,
        }
    }

    /// Early-filter columns.
    pub fn early_filter(&self) -> &ColumnSet {
        &self.early_filter
    }

    /// Primary-key columns.
    pub fn primary_key(&self) -> &ColumnSet {
        &self.primary_key
    }

    /// Full-fetch columns.
    pub fn full_fetch(&self) -> &ColumnSet {
        &self.full_fetch
    }

    /// Columns every materialized source carries into the merge.
    pub fn merge_columns(&self) -> &ColumnSet {
        &self.pk_ff
    }

    /// Whether the early filter costs no extra fetch.
    pub fn is_trivial_early_filter(&self) -> bool {
        self.trivial_early_filter
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::datatypes::{DataType, Field, Schema};

    use super::*;
    use crate::columns::IndexInfo;

    fn index() -> Arc<IndexInfo> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("colA", DataType::Int64, true),
            Field::new("colB", DataType::Int64, false),
            Field::new("colC", DataType::Utf8, true),
        ]));
        Arc::new(IndexInfo::new(schema))
    }

    fn set(index: &Arc<IndexInfo>, names: &[&str]) -> ColumnSet {
        ColumnSet::from_names(names.iter().copied(), index).expect("set")
    }

    fn planner(internal_read: bool) -> (Arc<IndexInfo>, ColumnsPlanner) {
        let index = index();
        let planner = ColumnsPlanner::new(
            set(&index, &["colA"]),
            set(&index, &["colB"]),
            set(&index, &["colA", "colB", "colC"]),
            internal_read,
        )
        .expect("planner");
        (index, planner)
    }

    #[test]
    fn exclusive_external_read_fetches_filter_columns_first() {
        let (index, planner) = planner(false);
        assert!(!planner.is_trivial_early_filter());

        let plan = planner.fetching_plan(true);
        assert_eq!(plan.fetch_now(), &set(&index, &["colA"]));
        assert_eq!(plan.fetch_conditional(), &set(&index, &["colB", "colC"]));
        assert!(plan.is_exclusive());
        assert!(plan.is_two_phase());
    }

    #[test]
    fn shared_external_read_adds_primary_key_to_first_phase() {
        let (index, planner) = planner(false);
        let plan = planner.fetching_plan(false);
        assert_eq!(plan.fetch_now(), &set(&index, &["colA", "colB"]));
        assert_eq!(plan.fetch_conditional(), &set(&index, &["colC"]));
        assert!(!plan.is_exclusive());
    }

    #[test]
    fn internal_reads_fetch_everything_at_once() {
        let (index, planner) = planner(true);
        let all = set(&index, &["colA", "colB", "colC"]);

        let exclusive = planner.fetching_plan(true);
        assert_eq!(exclusive.fetch_now(), &all);
        assert!(exclusive.fetch_conditional().is_empty());

        let shared = planner.fetching_plan(false);
        assert_eq!(shared.fetch_now(), &all);
        assert!(!shared.is_two_phase());
    }

    #[test]
    fn trivial_filter_skips_second_phase() {
        let index = index();
        let everything = set(&index, &["colA", "colB", "colC"]);
        let planner = ColumnsPlanner::new(
            everything.clone(),
            set(&index, &["colB"]),
            everything.clone(),
            false,
        )
        .expect("planner");
        assert!(planner.is_trivial_early_filter());
        assert_eq!(planner.fetching_plan(true).fetch_now(), &everything);
        assert!(!planner.fetching_plan(false).is_two_phase());

        let unfiltered = ColumnsPlanner::new(
            ColumnSet::empty(&index),
            set(&index, &["colB"]),
            everything,
            false,
        )
        .expect("planner");
        assert!(unfiltered.is_trivial_early_filter());
    }

    #[test]
    fn full_fetch_must_cover_early_filter() {
        let index = index();
        let err = ColumnsPlanner::new(
            set(&index, &["colA", "colC"]),
            set(&index, &["colB"]),
            set(&index, &["colA", "colB"]),
            false,
        )
        .expect_err("uncovered filter");
        match err {
            ReadError::EarlyFilterNotCovered { missing } => assert_eq!(missing, vec!["colC"]),
            other => panic!("unexpected error {other:?}"),
        }
    }
}

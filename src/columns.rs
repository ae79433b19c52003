use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    ops::{BitOr, Sub},
    sync::Arc,
};

use arrow::datatypes::{FieldRef, Schema, SchemaRef};

use crate::error::ReadError;

/// Stable identifier of a table column.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ColumnId(u32);

impl ColumnId {
    /// Wrap a raw id.
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw id.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Table schema with stable column ids.
#[derive(Debug)]
pub struct IndexInfo {
    schema: SchemaRef,
    ids: Vec<ColumnId>,
    by_id: HashMap<ColumnId, usize>,
    by_name: HashMap<String, ColumnId>,
}

impl IndexInfo {
    /// Assign ids `1..=n` to the schema fields in order.
    pub fn new(schema: SchemaRef) -> Self {
        let ids = (1..=schema.fields().len() as u32).map(ColumnId::new).collect();
        Self::assemble(schema, ids)
    }

    /// Use explicit ids, one per field in order.
    pub fn with_ids(schema: SchemaRef, ids: Vec<ColumnId>) -> Result<Self, ReadError> {
        if ids.len() != schema.fields().len() {
            return Err(ReadError::UnknownColumn(format!(
                "{} ids for {} fields",
                ids.len(),
                schema.fields().len()
            )));
        }
        let distinct: BTreeSet<_> = ids.iter().collect();
        if distinct.len() != ids.len() {
            return Err(ReadError::UnknownColumn("duplicate column id".to_string()));
        }
        Ok(Self::assemble(schema, ids))
    }

    fn assemble(schema: SchemaRef, ids: Vec<ColumnId>) -> Self {
        let by_id = ids.iter().enumerate().map(|(pos, id)| (*id, pos)).collect();
        let by_name = schema
            .fields()
            .iter()
            .zip(ids.iter())
            .map(|(field, id)| (field.name().clone(), *id))
            .collect();
        Self {
            schema,
            ids,
            by_id,
            by_name,
        }
    }

    /// Full table schema.
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Ids in field order.
    pub fn column_ids(&self) -> &[ColumnId] {
        &self.ids
    }

    /// Id of the column named `name`.
    pub fn column_id(&self, name: &str) -> Option<ColumnId> {
        self.by_name.get(name).copied()
    }

    /// Field of the column `id`.
    pub fn field(&self, id: ColumnId) -> Option<&FieldRef> {
        self.by_id.get(&id).map(|pos| &self.schema.fields()[*pos])
    }

    /// Resolve a list of names to ids.
    pub fn ids_for_names<I, S>(&self, names: I) -> Result<Vec<ColumnId>, ReadError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .map(|name| {
                self.column_id(name.as_ref())
                    .ok_or_else(|| ReadError::UnknownColumn(name.as_ref().to_string()))
            })
            .collect()
    }
}

/// Immutable set of column ids bound to an [`IndexInfo`].
///
/// Fields are always rendered in table order, whatever order the ids were
/// supplied in.
#[derive(Clone)]
pub struct ColumnSet {
    ids: BTreeSet<ColumnId>,
    index: Arc<IndexInfo>,
}

impl ColumnSet {
    /// Build a set, rejecting ids the schema does not know.
    pub fn new<I>(ids: I, index: &Arc<IndexInfo>) -> Result<Self, ReadError>
    where
        I: IntoIterator<Item = ColumnId>,
    {
        let ids = ids
            .into_iter()
            .map(|id| {
                index
                    .field(id)
                    .map(|_| id)
                    .ok_or_else(|| ReadError::UnknownColumn(id.to_string()))
            })
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(Self {
            ids,
            index: Arc::clone(index),
        })
    }

    /// Build a set from column names.
    pub fn from_names<I, S>(names: I, index: &Arc<IndexInfo>) -> Result<Self, ReadError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(index.ids_for_names(names)?, index)
    }

    /// The empty set.
    pub fn empty(index: &Arc<IndexInfo>) -> Self {
        Self {
            ids: BTreeSet::new(),
            index: Arc::clone(index),
        }
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the set holds no column.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether `id` is part of the set.
    pub fn contains_column(&self, id: ColumnId) -> bool {
        self.ids.contains(&id)
    }

    /// Whether every column of `other` is part of this set.
    pub fn contains(&self, other: &ColumnSet) -> bool {
        other.ids.is_subset(&self.ids)
    }

    /// Whether the sets share a column.
    pub fn intersects(&self, other: &ColumnSet) -> bool {
        !self.ids.is_disjoint(&other.ids)
    }

    /// Columns of either set.
    pub fn union(&self, other: &ColumnSet) -> ColumnSet {
        self.debug_same_index(other);
        Self {
            ids: self.ids.union(&other.ids).copied().collect(),
            index: Arc::clone(&self.index),
        }
    }

    /// Columns of this set absent from `other`.
    pub fn difference(&self, other: &ColumnSet) -> ColumnSet {
        self.debug_same_index(other);
        Self {
            ids: self.ids.difference(&other.ids).copied().collect(),
            index: Arc::clone(&self.index),
        }
    }

    /// Whether the distinct `names` resolve to exactly the members of the
    /// set.
    pub fn columns_only<S: AsRef<str>>(&self, names: &[S]) -> bool {
        let mut ids = BTreeSet::new();
        for name in names {
            match self.index.column_id(name.as_ref()) {
                Some(id) => ids.insert(id),
                None => return false,
            };
        }
        ids == self.ids
    }

    /// Ids in table order.
    pub fn column_ids(&self) -> Vec<ColumnId> {
        self.index
            .column_ids()
            .iter()
            .filter(|id| self.ids.contains(id))
            .copied()
            .collect()
    }

    /// Field names in table order.
    pub fn field_names(&self) -> Vec<String> {
        self.fields().map(|field| field.name().clone()).collect()
    }

    /// Arrow schema of the set in table order.
    pub fn arrow_schema(&self) -> SchemaRef {
        Arc::new(Schema::new(self.fields().cloned().collect::<Vec<_>>()))
    }

    /// Schema the set is bound to.
    pub fn index(&self) -> &Arc<IndexInfo> {
        &self.index
    }

    fn fields(&self) -> impl Iterator<Item = &FieldRef> + '_ {
        self.index
            .column_ids()
            .iter()
            .zip(self.index.schema().fields().iter())
            .filter(|(id, _)| self.ids.contains(id))
            .map(|(_, field)| field)
    }

    fn debug_same_index(&self, other: &ColumnSet) {
        debug_assert!(
            Arc::ptr_eq(&self.index, &other.index),
            "column sets bound to different schemas"
        );
    }
}

impl BitOr for &ColumnSet {
    type Output = ColumnSet;

    fn bitor(self, rhs: &ColumnSet) -> ColumnSet {
        self.union(rhs)
    }
}

impl Sub for &ColumnSet {
    type Output = ColumnSet;

    fn sub(self, rhs: &ColumnSet) -> ColumnSet {
        self.difference(rhs)
    }
}

impl PartialEq for ColumnSet {
    fn eq(&self, other: &Self) -> bool {
        self.ids == other.ids
    }
}

impl Eq for ColumnSet {}

impl fmt::Debug for ColumnSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.field_names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use arrow::datatypes::{DataType, Field};

    use super::*;

    fn index() -> Arc<IndexInfo> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int64, false),
            Field::new("b", DataType::Utf8, true),
            Field::new("c", DataType::Int32, true),
            Field::new("d", DataType::Boolean, true),
        ]));
        Arc::new(IndexInfo::new(schema))
    }

    fn set(index: &Arc<IndexInfo>, names: &[&str]) -> ColumnSet {
        ColumnSet::from_names(names.iter().copied(), index).expect("set")
    }

    #[test]
    fn set_algebra_laws_hold_for_every_pair() {
        let index = index();
        let names = ["a", "b", "c", "d"];
        let subsets: Vec<ColumnSet> = (0u32..16)
            .map(|mask| {
                let picked: Vec<&str> = names
                    .iter()
                    .enumerate()
                    .filter(|(bit, _)| mask & (1 << bit) != 0)
                    .map(|(_, name)| *name)
                    .collect();
                set(&index, &picked)
            })
            .collect();

        for a in &subsets {
            assert!(a.contains(a));
            for b in &subsets {
                let union = a | b;
                assert!(b.contains(&(&union - a)));
                assert!(union.contains(a) && union.contains(b));
                for c in &subsets {
                    if c.intersects(b) {
                        assert!(!(a - b).contains(c));
                    }
                }
            }
        }
    }

    #[test]
    fn fields_render_in_table_order() {
        let index = index();
        let set = set(&index, &["d", "a", "c"]);
        assert_eq!(set.field_names(), vec!["a", "c", "d"]);
        let schema = set.arrow_schema();
        assert_eq!(schema.field(1).data_type(), &DataType::Int32);
        assert_eq!(
            set.column_ids(),
            vec![ColumnId::new(1), ColumnId::new(3), ColumnId::new(4)]
        );
    }

    #[test]
    fn columns_only_requires_exact_cover() {
        let index = index();
        let set = set(&index, &["a", "b"]);
        assert!(set.columns_only(&["b", "a"]));
        assert!(!set.columns_only(&["a"]));
        assert!(!set.columns_only(&["a", "b", "c"]));
        assert!(!set.columns_only(&["a", "zzz"]));
        assert!(!set.columns_only(&["a", "a"]));
        assert!(set.columns_only(&["a", "b", "a"]));
        assert!(ColumnSet::empty(&index).columns_only::<&str>(&[]));
    }

    #[test]
    fn unknown_columns_are_rejected() {
        let index = index();
        assert!(matches!(
            ColumnSet::from_names(["missing"], &index),
            Err(ReadError::UnknownColumn(name)) if name == "missing"
        ));
        assert!(ColumnSet::new([ColumnId::new(42)], &index).is_err());
    }

    #[test]
    fn explicit_ids_must_match_fields() {
        let schema = Arc::clone(index().schema());
        let ids = vec![10, 20, 30, 40].into_iter().map(ColumnId::new).collect();
        let info = IndexInfo::with_ids(Arc::clone(&schema), ids).expect("index");
        assert_eq!(info.column_id("c"), Some(ColumnId::new(30)));
        assert_eq!(
            info.field(ColumnId::new(20)).map(|f| f.name().as_str()),
            Some("b")
        );
        assert!(IndexInfo::with_ids(schema, vec![ColumnId::new(1)]).is_err());
    }
}

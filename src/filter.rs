use std::{collections::BTreeSet, fmt, sync::Arc};

use arrow::{
    array::{
        Array, ArrayRef, AsArray, BooleanArray, Float64Array, Int32Array, Int64Array,
        RecordBatch, Scalar, StringArray, UInt32Array, UInt64Array,
    },
    compute::{
        cast,
        kernels::{
            boolean::{and_kleene, is_not_null, is_null, not, or_kleene},
            cmp,
        },
        prep_null_mask_filter, take,
    },
};

use crate::error::ReadError;

/// Per-row allow/deny decision over one batch. Rows whose predicate result
/// was null are denied.
#[derive(Clone, Debug, PartialEq)]
pub struct RowFilter {
    mask: BooleanArray,
}

impl RowFilter {
    /// Wrap a predicate result.
    pub fn new(mask: BooleanArray) -> Self {
        let mask = if mask.null_count() > 0 {
            prep_null_mask_filter(&mask)
        } else {
            mask
        };
        Self { mask }
    }

    /// Allow every one of `rows`.
    pub fn allow_all(rows: usize) -> Self {
        Self::new(BooleanArray::from(vec![true; rows]))
    }

    /// Deny every one of `rows`.
    pub fn deny_all(rows: usize) -> Self {
        Self::new(BooleanArray::from(vec![false; rows]))
    }

    /// Rows covered.
    pub fn len(&self) -> usize {
        self.mask.len()
    }

    /// Whether the filter covers no row.
    pub fn is_empty(&self) -> bool {
        self.mask.is_empty()
    }

    /// Whether every row is allowed.
    pub fn is_total_allow(&self) -> bool {
        self.mask.true_count() == self.mask.len()
    }

    /// Whether every row is denied.
    pub fn is_total_deny(&self) -> bool {
        self.mask.true_count() == 0
    }

    /// Whether `row` survives.
    pub fn allows(&self, row: usize) -> bool {
        self.mask.value(row)
    }

    /// Allowed rows in `[begin, end)`.
    pub fn count_in(&self, begin: usize, end: usize) -> usize {
        if begin >= end {
            return 0;
        }
        self.mask.slice(begin, end - begin).true_count()
    }

    /// Reorder along `indices`.
    pub fn take(&self, indices: &UInt32Array) -> Result<Self, ReadError> {
        let mask = take(&self.mask, indices, None)?;
        Ok(Self::new(mask.as_boolean().clone()))
    }

    /// Additionally allow every row set in `rows`.
    pub(crate) fn allow_also(self, rows: &BooleanArray) -> Result<Self, ReadError> {
        Ok(Self::new(or_kleene(&self.mask, rows)?))
    }

    /// Underlying mask.
    pub fn mask(&self) -> &BooleanArray {
        &self.mask
    }
}

/// Comparison operator of a [`Predicate::Compare`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComparisonOp {
    /// `=`
    Eq,
    /// `<>`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::NotEq => "<>",
            ComparisonOp::Lt => "<",
            ComparisonOp::LtEq => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::GtEq => ">=",
        })
    }
}

/// Single-value literal; cast to the column type on evaluation.
#[derive(Clone, Debug)]
pub struct Literal(ArrayRef);

impl Literal {
    /// Wrap a one-element array.
    pub fn from_array(array: ArrayRef) -> Self {
        debug_assert_eq!(array.len(), 1, "literal must hold exactly one value");
        Self(array)
    }
}

macro_rules! literal_from {
    ($($ty:ty => $array:ty),* $(,)?) => {
        $(
            impl From<$ty> for Literal {
                fn from(value: $ty) -> Self {
                    Literal(Arc::new(<$array>::from(vec![value])))
                }
            }
        )*
    };
}

literal_from!(
    i64 => Int64Array,
    i32 => Int32Array,
    u64 => UInt64Array,
    f64 => Float64Array,
    bool => BooleanArray,
    &str => StringArray,
    String => StringArray,
);

/// Early-filter expression evaluated against materialized columns.
#[derive(Clone, Debug)]
pub enum Predicate {
    /// `column <op> value`
    Compare {
        /// Column name.
        column: Arc<str>,
        /// Operator.
        op: ComparisonOp,
        /// Right-hand side.
        value: Literal,
    },
    /// `column IS [NOT] NULL`
    IsNull {
        /// Column name.
        column: Arc<str>,
        /// `IS NOT NULL` when set.
        negated: bool,
    },
    /// Logical negation.
    Not(Box<Predicate>),
    /// Conjunction; empty is true.
    And(Vec<Predicate>),
    /// Disjunction; empty is false.
    Or(Vec<Predicate>),
}

impl Predicate {
    /// `column <op> value`
    pub fn compare(column: &str, op: ComparisonOp, value: impl Into<Literal>) -> Self {
        Predicate::Compare {
            column: Arc::from(column),
            op,
            value: value.into(),
        }
    }

    /// `column = value`
    pub fn eq(column: &str, value: impl Into<Literal>) -> Self {
        Self::compare(column, ComparisonOp::Eq, value)
    }

    /// `column < value`
    pub fn lt(column: &str, value: impl Into<Literal>) -> Self {
        Self::compare(column, ComparisonOp::Lt, value)
    }

    /// `column > value`
    pub fn gt(column: &str, value: impl Into<Literal>) -> Self {
        Self::compare(column, ComparisonOp::Gt, value)
    }

    /// `column IS NULL`
    pub fn is_null(column: &str) -> Self {
        Predicate::IsNull {
            column: Arc::from(column),
            negated: false,
        }
    }

    /// `column IS NOT NULL`
    pub fn is_not_null(column: &str) -> Self {
        Predicate::IsNull {
            column: Arc::from(column),
            negated: true,
        }
    }

    /// Columns referenced anywhere in the expression.
    pub fn columns(&self) -> BTreeSet<Arc<str>> {
        let mut columns = BTreeSet::new();
        self.collect_columns(&mut columns);
        columns
    }

    fn collect_columns(&self, columns: &mut BTreeSet<Arc<str>>) {
        match self {
            Predicate::Compare { column, .. } | Predicate::IsNull { column, .. } => {
                columns.insert(Arc::clone(column));
            }
            Predicate::Not(inner) => inner.collect_columns(columns),
            Predicate::And(children) | Predicate::Or(children) => {
                for child in children {
                    child.collect_columns(columns);
                }
            }
        }
    }

    /// Evaluate over `batch`; the result may contain nulls.
    pub fn evaluate(&self, batch: &RecordBatch) -> Result<BooleanArray, ReadError> {
        match self {
            Predicate::Compare { column, op, value } => {
                let array = column_of(batch, column)?;
                let literal = cast(&value.0, array.data_type())?;
                let literal = Scalar::new(literal);
                let result = match op {
                    ComparisonOp::Eq => cmp::eq(array, &literal)?,
                    ComparisonOp::NotEq => cmp::neq(array, &literal)?,
                    ComparisonOp::Lt => cmp::lt(array, &literal)?,
                    ComparisonOp::LtEq => cmp::lt_eq(array, &literal)?,
                    ComparisonOp::Gt => cmp::gt(array, &literal)?,
                    ComparisonOp::GtEq => cmp::gt_eq(array, &literal)?,
                };
                Ok(result)
            }
            Predicate::IsNull { column, negated } => {
                let array = column_of(batch, column)?;
                if *negated {
                    Ok(is_not_null(array.as_ref())?)
                } else {
                    Ok(is_null(array.as_ref())?)
                }
            }
            Predicate::Not(inner) => Ok(not(&inner.evaluate(batch)?)?),
            Predicate::And(children) => {
                let mut acc = BooleanArray::from(vec![true; batch.num_rows()]);
                for child in children {
                    acc = and_kleene(&acc, &child.evaluate(batch)?)?;
                }
                Ok(acc)
            }
            Predicate::Or(children) => {
                let mut acc = BooleanArray::from(vec![false; batch.num_rows()]);
                for child in children {
                    acc = or_kleene(&acc, &child.evaluate(batch)?)?;
                }
                Ok(acc)
            }
        }
    }

    /// Evaluate and turn the result into a [`RowFilter`].
    pub fn row_filter(&self, batch: &RecordBatch) -> Result<RowFilter, ReadError> {
        Ok(RowFilter::new(self.evaluate(batch)?))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Compare { column, op, .. } => write!(f, "{column} {op} ?"),
            Predicate::IsNull { column, negated } => {
                if *negated {
                    write!(f, "{column} IS NOT NULL")
                } else {
                    write!(f, "{column} IS NULL")
                }
            }
            Predicate::Not(inner) => write!(f, "NOT ({inner})"),
            Predicate::And(children) => join(f, children, " AND "),
            Predicate::Or(children) => join(f, children, " OR "),
        }
    }
}

fn join(f: &mut fmt::Formatter<'_>, children: &[Predicate], sep: &str) -> fmt::Result {
    f.write_str("(")?;
    for (idx, child) in children.iter().enumerate() {
        if idx > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{child}")?;
    }
    f.write_str(")")
}

fn column_of<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef, ReadError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| ReadError::UnknownColumn(name.to_string()))
}

//! Per-column ordered selection.
//!
//! A scheme is bound to one `(table, column)` pair by table id. Every
//! operation receives the table it's bound to and errors if handed a
//! different one. Schemes never hold a reference to their table, so tables
//! may cache their own schemes without creating cycles.

pub mod blind;
pub mod insert;
pub mod range;

use std::fmt::Debug;
use std::sync::Arc;

use strata_error::{DbError, Result};

use self::range::SelectableRangeSet;
use crate::expr::ComparisonOperator;
use crate::scalar::ScalarValue;
use crate::table::{Table, TableId};

pub type SchemeRef = Arc<dyn SelectableScheme>;

pub trait SelectableScheme: Debug + Send + Sync {
    /// Table this scheme is bound to.
    fn table_id(&self) -> TableId;

    /// Column this scheme is bound to.
    fn column(&self) -> usize;

    /// Short name for explain/debug output.
    fn name(&self) -> &'static str;

    /// Rows whose column value falls within any of the ranges.
    ///
    /// Rows are returned in ascending value order. Rows with equal values
    /// keep the table's row order.
    fn select_range(&self, table: &dyn Table, ranges: &SelectableRangeSet) -> Result<Vec<usize>>;

    /// Build a scheme for `subset_column` of `subset`, a descendant of
    /// `own_table` that exposes this scheme's column.
    fn subset_scheme(
        &self,
        own_table: &dyn Table,
        subset: &dyn Table,
        subset_column: usize,
    ) -> Result<SchemeRef>;

    /// Bind this scheme to a table with identical row numbering and values.
    fn rebind(&self, table_id: TableId, column: usize) -> SchemeRef;

    /// All rows, ordered by value.
    fn select_all(&self, table: &dyn Table) -> Result<Vec<usize>> {
        self.select_range(table, &SelectableRangeSet::full())
    }

    fn select_op(
        &self,
        table: &dyn Table,
        op: ComparisonOperator,
        value: &ScalarValue,
    ) -> Result<Vec<usize>> {
        if value.is_null() {
            return Ok(Vec::new());
        }
        self.select_range(table, &SelectableRangeSet::full().intersect(op, value))
    }

    fn select_equal(&self, table: &dyn Table, value: &ScalarValue) -> Result<Vec<usize>> {
        self.select_op(table, ComparisonOperator::Eq, value)
    }

    fn select_not_equal(&self, table: &dyn Table, value: &ScalarValue) -> Result<Vec<usize>> {
        self.select_op(table, ComparisonOperator::NotEq, value)
    }

    fn select_greater(&self, table: &dyn Table, value: &ScalarValue) -> Result<Vec<usize>> {
        self.select_op(table, ComparisonOperator::Gt, value)
    }

    fn select_greater_or_equal(
        &self,
        table: &dyn Table,
        value: &ScalarValue,
    ) -> Result<Vec<usize>> {
        self.select_op(table, ComparisonOperator::GtEq, value)
    }

    fn select_less(&self, table: &dyn Table, value: &ScalarValue) -> Result<Vec<usize>> {
        self.select_op(table, ComparisonOperator::Lt, value)
    }

    fn select_less_or_equal(&self, table: &dyn Table, value: &ScalarValue) -> Result<Vec<usize>> {
        self.select_op(table, ComparisonOperator::LtEq, value)
    }

    /// Rows holding the smallest non-null value.
    fn select_first(&self, table: &dyn Table) -> Result<Vec<usize>> {
        let rows = self.select_range(table, &SelectableRangeSet::non_nulls())?;
        take_edge_run(table, self.column(), rows, false)
    }

    /// Rows holding the largest non-null value.
    fn select_last(&self, table: &dyn Table) -> Result<Vec<usize>> {
        let rows = self.select_range(table, &SelectableRangeSet::non_nulls())?;
        take_edge_run(table, self.column(), rows, true)
    }
}

/// Keep only the run of rows equal to the first (or last) row's value.
fn take_edge_run(
    table: &dyn Table,
    column: usize,
    mut rows: Vec<usize>,
    last: bool,
) -> Result<Vec<usize>> {
    let edge_row = if last { rows.last() } else { rows.first() };
    let edge = match edge_row {
        Some(&row) => table.get_value(column, row)?,
        None => return Ok(rows),
    };
    if last {
        let mut start = rows.len();
        while start > 0 && table.get_value(column, rows[start - 1])?.sort_cmp(&edge).is_eq() {
            start -= 1;
        }
        Ok(rows.split_off(start))
    } else {
        let mut end = 0;
        while end < rows.len() && table.get_value(column, rows[end])?.sort_cmp(&edge).is_eq() {
            end += 1;
        }
        rows.truncate(end);
        Ok(rows)
    }
}

/// Error if `table` isn't the table this scheme is bound to.
pub(crate) fn check_bound(scheme: &dyn SelectableScheme, table: &dyn Table) -> Result<()> {
    if scheme.table_id() != table.table_id() {
        return Err(
            DbError::precondition("Selectable scheme used with a table it isn't bound to")
                .with_field("scheme", scheme.name())
                .with_field("bound_table", scheme.table_id())
                .with_field("table", table.table_id()),
        );
    }
    Ok(())
}

/// Get the scheme for a column in the table's own row domain.
pub fn column_scheme(table: &dyn Table, column: usize) -> Result<SchemeRef> {
    table.scheme_for(column, column, table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::memory::{IndexKind, MemoryTable};
    use crate::testutil::int_table;

    #[test]
    fn equal_is_subset_of_ge_and_le() {
        for kind in [IndexKind::Sorted, IndexKind::Blind] {
            let table = int_table("t", kind, &[Some(4), Some(1), None, Some(4), Some(9), Some(1)]);
            let scheme = column_scheme(table.as_ref(), 0).unwrap();

            for v in [0, 1, 4, 5, 9, 10] {
                let v = ScalarValue::from(v);
                let eq = scheme.select_equal(table.as_ref(), &v).unwrap();
                let ge = scheme.select_greater_or_equal(table.as_ref(), &v).unwrap();
                let le = scheme.select_less_or_equal(table.as_ref(), &v).unwrap();
                for row in &eq {
                    assert!(ge.contains(row), "{kind:?} {v}");
                    assert!(le.contains(row), "{kind:?} {v}");
                }
                let both: Vec<_> = ge.iter().filter(|r| le.contains(r)).copied().collect();
                let mut eq_sorted = eq.clone();
                eq_sorted.sort_unstable();
                let mut both = both;
                both.sort_unstable();
                assert_eq!(eq_sorted, both, "{kind:?} {v}");
            }
        }
    }

    #[test]
    fn first_and_last_skip_nulls() {
        for kind in [IndexKind::Sorted, IndexKind::Blind] {
            let table = int_table("t", kind, &[Some(4), None, Some(1), Some(9), Some(1)]);
            let scheme = column_scheme(table.as_ref(), 0).unwrap();
            assert_eq!(vec![2, 4], scheme.select_first(table.as_ref()).unwrap());
            assert_eq!(vec![3], scheme.select_last(table.as_ref()).unwrap());
        }
    }

    #[test]
    fn empty_table_selects_nothing() {
        for kind in [IndexKind::Sorted, IndexKind::Blind] {
            let table = int_table("t", kind, &[]);
            let scheme = column_scheme(table.as_ref(), 0).unwrap();
            assert!(scheme.select_all(table.as_ref()).unwrap().is_empty());
            assert!(scheme.select_first(table.as_ref()).unwrap().is_empty());
            assert!(
                scheme
                    .select_greater(table.as_ref(), &1.into())
                    .unwrap()
                    .is_empty()
            );
        }
    }

    #[test]
    fn wrong_table_is_precondition_error() {
        let a = int_table("a", IndexKind::Sorted, &[Some(1)]);
        let b = MemoryTable::single_row();
        let scheme = column_scheme(a.as_ref(), 0).unwrap();
        let err = scheme.select_all(&b).unwrap_err();
        assert!(err.is_precondition());
    }
}

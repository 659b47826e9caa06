//! Relational operators over tables.
//!
//! Every operator returns a new table composed over its inputs. Selections,
//! sorts and distinct produce a `VirtualTable` over the input; joins produce
//! tables over both inputs.

use std::sync::Arc;

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use strata_error::{DbError, Result};
use tracing::trace;

use super::joined::NaturallyJoinedTable;
use super::outer::OuterTable;
use super::raw::{RawTableInformation, compare_value_tuples, unique_indices};
use super::resolver::TableRowResolver;
use super::virtual_table::VirtualTable;
use super::{Table, TableRef, collect_column};
use crate::context::QueryContext;
use crate::expr::eval::quantified_compare;
use crate::expr::like::{like_pattern_to_regex, like_prefix, prefix_upper_bound};
use crate::expr::{ComparisonOperator, Expression};
use crate::scalar::ScalarValue;
use crate::scheme::column_scheme;
use crate::scheme::range::SelectableRangeSet;

/// Select rows where `column op value`.
pub fn simple_select(
    table: &TableRef,
    column: usize,
    op: ComparisonOperator,
    value: &ScalarValue,
) -> Result<TableRef> {
    let rows = column_scheme(table.as_ref(), column)?.select_op(table.as_ref(), op, value)?;
    Ok(Arc::new(VirtualTable::single(table.clone(), rows)))
}

/// Select rows whose `column` value falls in any of the ranges.
pub fn range_select(
    table: &TableRef,
    column: usize,
    ranges: &SelectableRangeSet,
) -> Result<TableRef> {
    let rows = column_scheme(table.as_ref(), column)?.select_range(table.as_ref(), ranges)?;
    Ok(Arc::new(VirtualTable::single(table.clone(), rows)))
}

/// Select rows where `column [NOT] LIKE pattern`.
///
/// A literal prefix in the pattern narrows the candidates with a range
/// select before the pattern is matched.
pub fn pattern_select(
    table: &TableRef,
    column: usize,
    pattern: &str,
    negated: bool,
) -> Result<TableRef> {
    let regex = like_pattern_to_regex(pattern)?;

    let mut ranges = SelectableRangeSet::non_nulls();
    if !negated {
        let prefix = like_prefix(pattern);
        if !prefix.is_empty() {
            ranges = ranges.intersect(ComparisonOperator::GtEq, &prefix.as_str().into());
            if let Some(upper) = prefix_upper_bound(&prefix) {
                ranges = ranges.intersect(ComparisonOperator::Lt, &upper.into());
            }
        }
    }

    let candidates =
        column_scheme(table.as_ref(), column)?.select_range(table.as_ref(), &ranges)?;
    let mut rows = Vec::with_capacity(candidates.len());
    for row in candidates {
        let value = table.get_value(column, row)?;
        if let Some(s) = value.try_as_str()? {
            if regex.is_match(s) != negated {
                rows.push(row);
            }
        }
    }
    Ok(Arc::new(VirtualTable::single(table.clone(), rows)))
}

/// Rows of `table` for which `predicate` is true, in enumeration order.
pub fn matching_rows(
    table: &dyn Table,
    predicate: &Expression,
    ctx: &QueryContext,
) -> Result<Vec<usize>> {
    let mut rows = Vec::new();
    for row in table.row_enumerator().iter() {
        let resolver = TableRowResolver::new(table, row);
        if predicate.evaluate_predicate(None, &resolver, ctx)? {
            rows.push(row);
        }
    }
    Ok(rows)
}

/// Select rows by evaluating `predicate` against every row.
pub fn exhaustive_select(
    table: &TableRef,
    predicate: &Expression,
    ctx: &QueryContext,
) -> Result<TableRef> {
    let rows = matching_rows(table.as_ref(), predicate, ctx)?;
    trace!(input = table.row_count(), output = rows.len(), "exhaustive select");
    Ok(Arc::new(VirtualTable::single(table.clone(), rows)))
}

/// Select every row or no rows.
pub fn constant_select(table: &TableRef, keep: bool) -> TableRef {
    if keep {
        table.clone()
    } else {
        Arc::new(VirtualTable::single(table.clone(), Vec::new()))
    }
}

/// Join rows of `left` and `right` where `left_column op right_column`.
///
/// Output rows follow the left table's enumeration order.
pub fn simple_join(
    left: &TableRef,
    left_column: usize,
    op: ComparisonOperator,
    right: &TableRef,
    right_column: usize,
) -> Result<TableRef> {
    let scheme = column_scheme(right.as_ref(), right_column)?;
    // `l op r` is `r flip(op) l`.
    let op = op.flip();

    let mut left_rows = Vec::new();
    let mut right_rows = Vec::new();
    for row in left.row_enumerator().iter() {
        let value = left.get_value(left_column, row)?;
        for matched in scheme.select_op(right.as_ref(), op, &value)? {
            left_rows.push(row);
            right_rows.push(matched);
        }
    }

    trace!(
        left = left.row_count(),
        right = right.row_count(),
        output = left_rows.len(),
        "simple join"
    );
    Ok(Arc::new(VirtualTable::try_new(
        vec![left.clone(), right.clone()],
        vec![left_rows, right_rows],
    )?))
}

/// Unrestricted cross product.
pub fn cross_join(left: &TableRef, right: &TableRef) -> TableRef {
    Arc::new(NaturallyJoinedTable::new(left.clone(), right.clone()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OuterJoinType {
    Left,
    Right,
    Full,
}

impl OuterJoinType {
    fn keeps_left(self) -> bool {
        matches!(self, Self::Left | Self::Full)
    }

    fn keeps_right(self) -> bool {
        matches!(self, Self::Right | Self::Full)
    }
}

/// Outer join of `left` and `right` on `on`.
///
/// Matched rows and unmatched left rows follow the left table's
/// enumeration order. Unmatched right rows are appended after.
pub fn outer_join(
    left: &TableRef,
    right: &TableRef,
    join_type: OuterJoinType,
    on: &Expression,
    ctx: &QueryContext,
) -> Result<TableRef> {
    let pairs = matching_pairs(left, right, on, ctx)?;

    let mut left_list = Vec::with_capacity(pairs.len());
    let mut right_list = Vec::with_capacity(pairs.len());
    let mut matched_right = HashSet::new();
    let mut idx = 0;
    for row in left.row_enumerator().iter() {
        let start = idx;
        while idx < pairs.len() && pairs[idx].0 == row {
            left_list.push(Some(row));
            right_list.push(Some(pairs[idx].1));
            matched_right.insert(pairs[idx].1);
            idx += 1;
        }
        if start == idx && join_type.keeps_left() {
            left_list.push(Some(row));
            right_list.push(None);
        }
    }

    let mut outer = OuterTable::try_new(
        vec![left.clone(), right.clone()],
        vec![left_list, right_list],
    )?;

    if join_type.keeps_right() {
        let unmatched: Vec<_> = right
            .row_enumerator()
            .iter()
            .filter(|row| !matched_right.contains(row))
            .map(Some)
            .collect();
        outer.merge_in(vec![vec![None; unmatched.len()], unmatched])?;
    }

    trace!(?join_type, output = outer.row_count(), "outer join");
    Ok(Arc::new(outer))
}

/// `(left row, right row)` pairs satisfying `on`, grouped by left row in the
/// left table's enumeration order.
fn matching_pairs(
    left: &TableRef,
    right: &TableRef,
    on: &Expression,
    ctx: &QueryContext,
) -> Result<Vec<(usize, usize)>> {
    let mut conjuncts = on.clone().into_conjuncts();

    // Narrow with the first column comparison spanning both sides.
    let mut candidates = None;
    for idx in 0..conjuncts.len() {
        if let Some((l, op, r)) = spanning_comparison(&conjuncts[idx], left, right)? {
            candidates = Some(simple_join(left, l, op, right, r)?);
            conjuncts.remove(idx);
            break;
        }
    }
    let candidates = match candidates {
        Some(candidates) => candidates,
        None => cross_join(left, right),
    };

    let rows = match Expression::and_all(conjuncts) {
        Some(rest) => matching_rows(candidates.as_ref(), &rest, ctx)?,
        None => candidates.row_enumerator().to_vec(),
    };

    let mut left_rows = rows.clone();
    let mut right_rows = rows;
    candidates.rows_in_parent(0, &mut left_rows)?;
    candidates.rows_in_parent(1, &mut right_rows)?;
    Ok(left_rows.into_iter().zip(right_rows).collect())
}

/// Columns of `expr` if it's `left.col op right.col` (either way round).
fn spanning_comparison(
    expr: &Expression,
    left: &TableRef,
    right: &TableRef,
) -> Result<Option<(usize, ComparisonOperator, usize)>> {
    let (op, a, b) = match expr {
        Expression::Comparison { op, left, right } => match (left.as_variable(), right.as_variable()) {
            (Some(a), Some(b)) => (*op, a, b),
            _ => return Ok(None),
        },
        _ => return Ok(None),
    };

    let left_info = left.table_info();
    let right_info = right.table_info();
    if let (Some(l), Some(r)) = (left_info.find_column(a, false)?, right_info.find_column(b, false)?) {
        return Ok(Some((l, op, r)));
    }
    if let (Some(l), Some(r)) = (left_info.find_column(b, false)?, right_info.find_column(a, false)?) {
        return Ok(Some((l, op.flip(), r)));
    }
    Ok(None)
}

/// A column to order by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: usize,
    pub ascending: bool,
}

impl SortKey {
    pub const fn asc(column: usize) -> Self {
        SortKey {
            column,
            ascending: true,
        }
    }

    pub const fn desc(column: usize) -> Self {
        SortKey {
            column,
            ascending: false,
        }
    }
}

/// Rows of `table` ordered by `keys`. Ties keep enumeration order.
///
/// Sorts once per key from the last key to the first. Each pass is stable,
/// so earlier keys take precedence.
pub fn sorted_rows(table: &TableRef, keys: &[SortKey]) -> Result<Vec<usize>> {
    let mut rows = table.row_enumerator().to_vec();
    for key in keys.iter().rev() {
        let work = VirtualTable::single(table.clone(), rows.clone());
        let mut positions = column_scheme(&work, key.column)?.select_all(&work)?;
        if !key.ascending {
            positions = reverse_runs(&work, key.column, positions)?;
        }
        rows = positions.into_iter().map(|pos| rows[pos]).collect();
    }
    Ok(rows)
}

/// Reverse the order of runs of equal values, keeping the order within
/// each run.
fn reverse_runs(table: &dyn Table, column: usize, rows: Vec<usize>) -> Result<Vec<usize>> {
    let mut runs: Vec<Vec<usize>> = Vec::new();
    let mut prev: Option<ScalarValue> = None;
    for row in rows {
        let value = table.get_value(column, row)?;
        match (&prev, runs.last_mut()) {
            (Some(prev), Some(run)) if prev.sort_cmp(&value).is_eq() => run.push(row),
            _ => runs.push(vec![row]),
        }
        prev = Some(value);
    }
    Ok(runs.into_iter().rev().flatten().collect())
}

/// Rows of `table` ascending by `columns`.
pub fn ordered_row_list(table: &TableRef, columns: &[usize]) -> Result<Vec<usize>> {
    let keys: Vec<_> = columns.iter().map(|&c| SortKey::asc(c)).collect();
    sorted_rows(table, &keys)
}

/// Order `table` by `keys`.
pub fn order_by_columns(table: &TableRef, keys: &[SortKey]) -> Result<TableRef> {
    let rows = sorted_rows(table, keys)?;
    let mut sorted = VirtualTable::single(table.clone(), rows);
    if let Some(first) = keys.first() {
        if first.ascending {
            sorted = sorted.with_sorted_column(first.column);
        }
    }
    Ok(Arc::new(sorted))
}

/// Remove rows with equal values in `columns`, keeping the first of each.
///
/// Kept rows stay in enumeration order.
pub fn distinct(table: &TableRef, columns: &[usize]) -> Result<TableRef> {
    let rows = table.row_enumerator().to_vec();
    let tuples = rows
        .iter()
        .map(|&row| {
            columns
                .iter()
                .map(|&col| table.get_value(col, row))
                .collect::<Result<Vec<_>>>()
        })
        .collect::<Result<Vec<_>>>()?;

    let keep: Vec<_> = unique_indices(&tuples, |a, b| compare_value_tuples(a, b))
        .into_iter()
        .map(|idx| rows[idx])
        .collect();
    trace!(input = rows.len(), output = keep.len(), "distinct");
    Ok(Arc::new(VirtualTable::single(table.clone(), keep)))
}

/// Select rows where `column op ANY (values)` or `column op ALL (values)`,
/// with values read from the first column of `subquery`.
pub fn any_all_select(
    table: &TableRef,
    column: usize,
    op: ComparisonOperator,
    subquery: &TableRef,
    all: bool,
) -> Result<TableRef> {
    let values = collect_column(subquery.as_ref(), 0)?;
    let has_null = values.iter().any(|v| v.is_null());
    let non_null: Vec<_> = values.into_iter().filter(|v| !v.is_null()).collect();

    if non_null.is_empty() && !has_null {
        // ALL over nothing is true, ANY over nothing is false.
        return Ok(constant_select(table, all));
    }
    if all && has_null {
        // Every comparison is false or unknown.
        return Ok(constant_select(table, false));
    }

    let min = non_null.iter().min_by(|a, b| a.sort_cmp(b)).cloned();
    let max = non_null.iter().max_by(|a, b| a.sort_cmp(b)).cloned();
    let bound = match (op, all) {
        (ComparisonOperator::Gt | ComparisonOperator::GtEq, false) => min,
        (ComparisonOperator::Lt | ComparisonOperator::LtEq, false) => max,
        (ComparisonOperator::Gt | ComparisonOperator::GtEq, true) => max,
        (ComparisonOperator::Lt | ComparisonOperator::LtEq, true) => min,
        _ => None,
    };
    if let Some(bound) = bound {
        return simple_select(table, column, op, &bound);
    }
    if non_null.is_empty() {
        // ANY over only nulls.
        return Ok(constant_select(table, false));
    }

    if op == ComparisonOperator::Eq && !all {
        let mut ranges = SelectableRangeSet::empty();
        for v in &non_null {
            ranges = ranges.union(&SelectableRangeSet::full().intersect(op, v));
        }
        return range_select(table, column, &ranges);
    }

    let mut rows = Vec::new();
    for row in table.row_enumerator().iter() {
        let value = table.get_value(column, row)?;
        if quantified_compare(&value, op, subquery.as_ref(), all)? == Some(true) {
            rows.push(row);
        }
    }
    Ok(Arc::new(VirtualTable::single(table.clone(), rows)))
}

/// Union of selections over the same `source`, without duplicate rows.
///
/// Each branch must be a (possibly nested) selection of `source`. Rows
/// appear in the order of the first branch containing them.
pub fn logical_union(source: &TableRef, branches: &[TableRef]) -> Result<TableRef> {
    if source.column_count() == 0 {
        return Err(DbError::precondition(
            "Logical union requires a source with at least one column",
        ));
    }

    let mut union: Option<RawTableInformation> = None;
    for branch in branches {
        let mut rows = branch.row_enumerator().to_vec();
        branch.set_to_row_table_domain(0, &mut rows, source.table_id())?;
        let mut raw = RawTableInformation::new();
        raw.add(source.clone(), rows)?;
        union = Some(match union {
            Some(acc) => acc.union(&raw)?,
            None => {
                raw.remove_duplicates();
                raw
            }
        });
    }

    let rows = union
        .and_then(|raw| raw.elements().first().map(|e| e.rows.clone()))
        .unwrap_or_default();
    Ok(Arc::new(VirtualTable::single(source.clone(), rows)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnInfo, TableInfo, TableName};
    use crate::scalar::datatype::DataType;
    use crate::table::collect_rows;
    use crate::table::memory::{IndexKind, MemoryTable};
    use crate::testutil::{int_table, test_context, two_col_table};

    fn ints(table: &TableRef) -> Vec<ScalarValue> {
        collect_column(table.as_ref(), 0).unwrap()
    }

    fn keyed(name: &str, rows: &[(i32, &str)]) -> TableRef {
        let info = TableInfo::new(
            TableName::new(name),
            [
                ColumnInfo::new("id", DataType::Int32),
                ColumnInfo::new("val", DataType::Utf8),
            ],
        );
        let table = MemoryTable::new(info);
        for (id, val) in rows {
            table.insert(vec![(*id).into(), (*val).into()]).unwrap();
        }
        Arc::new(table)
    }

    #[test]
    fn selections() {
        for kind in [IndexKind::Sorted, IndexKind::Blind] {
            let t: TableRef = int_table("t", kind, &[Some(5), None, Some(1), Some(3)]);
            let gt = simple_select(&t, 0, ComparisonOperator::Gt, &2.into()).unwrap();
            assert_eq!(vec![ScalarValue::from(3), ScalarValue::from(5)], ints(&gt));

            let ranges = SelectableRangeSet::full()
                .intersect(ComparisonOperator::GtEq, &1.into())
                .intersect(ComparisonOperator::Lt, &5.into());
            let r = range_select(&t, 0, &ranges).unwrap();
            assert_eq!(vec![ScalarValue::from(1), ScalarValue::from(3)], ints(&r));
        }
    }

    #[test]
    fn patterns() {
        let t = two_col_table();
        let x = pattern_select(&t, 1, "x%", false).unwrap();
        assert_eq!(2, x.row_count());
        let not_x = pattern_select(&t, 1, "x", true).unwrap();
        assert_eq!(vec![vec![ScalarValue::from(2), ScalarValue::from("y")]], collect_rows(not_x.as_ref()).unwrap());
    }

    #[test]
    fn exhaustive_and_constant() {
        let ctx = test_context();
        let t = two_col_table();
        let pred = Expression::or(
            Expression::eq(Expression::col("t.a"), Expression::lit(3)),
            Expression::eq(Expression::col("t.b"), Expression::lit("y")),
        );
        let sel = exhaustive_select(&t, &pred, &ctx).unwrap();
        assert_eq!(vec![ScalarValue::from(2), ScalarValue::from(3)], ints(&sel));

        assert_eq!(0, constant_select(&t, false).row_count());
        assert_eq!(3, constant_select(&t, true).row_count());
    }

    #[test]
    fn equi_join_cardinality() {
        let t1: TableRef = int_table("t1", IndexKind::Sorted, &[Some(1), Some(2), Some(3)]);
        let t2 = keyed("t2", &[(2, "x"), (3, "y")]);
        let joined = simple_join(&t1, 0, ComparisonOperator::Eq, &t2, 0).unwrap();
        assert_eq!(
            vec![
                vec![ScalarValue::from(2), 2.into(), "x".into()],
                vec![3.into(), 3.into(), "y".into()],
            ],
            collect_rows(joined.as_ref()).unwrap()
        );
    }

    #[test]
    fn left_outer_join_extends_with_typed_null() {
        let ctx = test_context();
        let t1: TableRef = int_table("t1", IndexKind::Sorted, &[Some(1), Some(2)]);
        let t2 = keyed("t2", &[(2, "x")]);
        let on = Expression::eq(Expression::col("t1.a"), Expression::col("t2.id"));
        let joined = outer_join(&t1, &t2, OuterJoinType::Left, &on, &ctx).unwrap();
        assert_eq!(
            vec![
                vec![1.into(), ScalarValue::Null, ScalarValue::Null],
                vec![2.into(), 2.into(), "x".into()],
            ],
            collect_rows(joined.as_ref()).unwrap()
        );
        let val = &joined.table_info().columns()[2];
        assert_eq!(DataType::Utf8, val.datatype);
        assert!(val.nullable);
    }

    #[test]
    fn right_and_full_outer_joins() {
        let ctx = test_context();
        let t1: TableRef = int_table("t1", IndexKind::Sorted, &[Some(1), Some(2)]);
        let t2 = keyed("t2", &[(2, "x"), (4, "z")]);
        // Reversed operands exercise the flipped comparison.
        let on = Expression::eq(Expression::col("t2.id"), Expression::col("t1.a"));

        let right = outer_join(&t1, &t2, OuterJoinType::Right, &on, &ctx).unwrap();
        assert_eq!(
            vec![
                vec![2.into(), 2.into(), "x".into()],
                vec![ScalarValue::Null, 4.into(), "z".into()],
            ],
            collect_rows(right.as_ref()).unwrap()
        );

        let full = outer_join(&t1, &t2, OuterJoinType::Full, &on, &ctx).unwrap();
        assert_eq!(3, full.row_count());
    }

    #[test]
    fn outer_join_with_non_equi_condition() {
        let ctx = test_context();
        let t1: TableRef = int_table("t1", IndexKind::Sorted, &[Some(1), Some(5)]);
        let t2 = keyed("t2", &[(3, "x")]);
        let on = Expression::compare(
            ComparisonOperator::Gt,
            Expression::col("t1.a"),
            Expression::col("t2.id"),
        );
        let joined = outer_join(&t1, &t2, OuterJoinType::Left, &on, &ctx).unwrap();
        assert_eq!(
            vec![
                vec![1.into(), ScalarValue::Null, ScalarValue::Null],
                vec![5.into(), 3.into(), "x".into()],
            ],
            collect_rows(joined.as_ref()).unwrap()
        );
    }

    #[test]
    fn multi_key_ordering() {
        let t = keyed("t", &[(2, "b"), (1, "a"), (2, "a"), (1, "b")]);
        let sorted = order_by_columns(&t, &[SortKey::desc(0), SortKey::asc(1)]).unwrap();
        assert_eq!(
            vec![
                vec![ScalarValue::from(2), "a".into()],
                vec![2.into(), "b".into()],
                vec![1.into(), "a".into()],
                vec![1.into(), "b".into()],
            ],
            collect_rows(sorted.as_ref()).unwrap()
        );
        assert_eq!(vec![1, 2, 3, 0], ordered_row_list(&t, &[1, 0]).unwrap());
    }

    #[test]
    fn distinct_is_idempotent() {
        let t = keyed("t", &[(1, "a"), (2, "b"), (1, "a"), (1, "c")]);
        let once = distinct(&t, &[0, 1]).unwrap();
        let twice = distinct(&once, &[0, 1]).unwrap();
        assert_eq!(3, once.row_count());
        assert_eq!(
            collect_rows(once.as_ref()).unwrap(),
            collect_rows(twice.as_ref()).unwrap()
        );

        let by_id = distinct(&t, &[0]).unwrap();
        assert_eq!(2, by_id.row_count());
    }

    #[test]
    fn any_all() {
        let t: TableRef = int_table("t", IndexKind::Sorted, &[Some(1), Some(2), Some(3), None]);
        let sub: TableRef = int_table("s", IndexKind::Sorted, &[Some(2), Some(3)]);
        let select = |op, all| ints(&any_all_select(&t, 0, op, &sub, all).unwrap());

        assert_eq!(vec![ScalarValue::from(3)], select(ComparisonOperator::Gt, false));
        assert_eq!(Vec::<ScalarValue>::new(), select(ComparisonOperator::Gt, true));
        assert_eq!(
            vec![ScalarValue::from(2), ScalarValue::from(3)],
            select(ComparisonOperator::Eq, false)
        );
        assert_eq!(vec![ScalarValue::from(1)], select(ComparisonOperator::NotEq, true));

        let empty: TableRef = int_table("s", IndexKind::Sorted, &[]);
        let all = any_all_select(&t, 0, ComparisonOperator::Eq, &empty, true).unwrap();
        assert_eq!(4, all.row_count());
        let any = any_all_select(&t, 0, ComparisonOperator::Eq, &empty, false).unwrap();
        assert_eq!(0, any.row_count());
    }

    #[test]
    fn union_of_selections() {
        let t: TableRef = int_table("t", IndexKind::Sorted, &[Some(1), Some(2), Some(3), Some(4)]);
        let low = simple_select(&t, 0, ComparisonOperator::LtEq, &2.into()).unwrap();
        let mid = simple_select(&t, 0, ComparisonOperator::Eq, &2.into()).unwrap();
        let nested = simple_select(&mid, 0, ComparisonOperator::Eq, &2.into()).unwrap();
        let high = simple_select(&t, 0, ComparisonOperator::Gt, &3.into()).unwrap();

        let union = logical_union(&t, &[low, nested, high]).unwrap();
        assert_eq!(
            vec![ScalarValue::from(1), ScalarValue::from(2), ScalarValue::from(4)],
            ints(&union)
        );
    }
}

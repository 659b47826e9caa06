//! Tables of computed columns.
//!
//! A function table shares the row numbering of its reference table. Each
//! column is an expression evaluated against the reference row, or against
//! the row's group when grouping is set up.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::{Mutex, const_mutex};
use strata_error::{DbError, Result};
use tracing::{debug, trace};

use super::ops::ordered_row_list;
use super::outer::OuterTable;
use super::resolver::{GroupResolver, NoVariables, NullResolver, TableRowResolver, find_variable};
use super::virtual_table::VirtualTable;
use super::{
    RowEnumerator, SchemeCache, Table, TableId, TableRef, no_parent, root_scheme_for,
    root_set_to_row_table_domain, row_out_of_bounds,
};
use crate::context::QueryContext;
use crate::expr::Expression;
use crate::expr::discover::is_constant;
use crate::scalar::ScalarValue;
use crate::scheme::SchemeRef;
use crate::scheme::blind::BlindSearch;
use crate::schema::{ColumnInfo, TableInfo, TableName, Variable};

/// Reserved bit marking function table ids.
pub const FUNCTION_TABLE_ID_BIT: u64 = 1 << 62;

/// Marks the last row of a group in the link list.
const GROUP_END: u64 = 1 << 63;

static FUNCTION_TABLE_IDS: Mutex<u64> = const_mutex(0);

/// Allocate a function table id. Ids are never reused.
fn next_function_table_id() -> TableId {
    let mut next = FUNCTION_TABLE_IDS.lock();
    *next += 1;
    TableId(*next | FUNCTION_TABLE_ID_BIT)
}

/// Name under which computed columns are exposed.
pub const FUNCTION_TABLE_NAME: &str = "FUNCTIONTABLE";

#[derive(Debug)]
enum FunctionColumn {
    /// Folded at construction.
    Constant(ScalarValue),
    Dynamic(Expression),
}

#[derive(Debug)]
enum Grouping {
    None,
    /// All rows are a single group. `rows` is only materialized when the
    /// reference's rows aren't `0..n`.
    WholeTable { rows: Option<Arc<[usize]>> },
    Matrix(GroupMatrix),
}

/// Groups of rows as runs in a single link list.
#[derive(Debug)]
struct GroupMatrix {
    /// Reference rows ordered by group. The last row of each group has
    /// `GROUP_END` set.
    links: Vec<u64>,
    /// Index into `links` of each group's first row.
    group_starts: Vec<usize>,
    /// Reference row to group number.
    row_groups: HashMap<usize, usize>,
}

impl GroupMatrix {
    fn group_rows(&self, group: usize) -> Result<Vec<usize>> {
        let start = *self.group_starts.get(group).ok_or_else(|| {
            DbError::precondition("Group number out of bounds")
                .with_field("group", group)
                .with_field("groups", self.group_starts.len())
        })?;
        let mut rows = Vec::new();
        for &link in &self.links[start..] {
            rows.push((link & !GROUP_END) as usize);
            if link & GROUP_END != 0 {
                break;
            }
        }
        Ok(rows)
    }
}

#[derive(Debug)]
pub struct FunctionTable {
    id: TableId,
    info: Arc<TableInfo>,
    /// Single element, the reference table.
    parents: Vec<TableRef>,
    columns: Vec<FunctionColumn>,
    grouping: Grouping,
    ctx: QueryContext,
    schemes: SchemeCache,
}

impl FunctionTable {
    /// Create a function table computing `exprs` over `reference`.
    ///
    /// Column references in the expressions must be qualified the way the
    /// reference table exposes them.
    pub fn try_new(
        reference: TableRef,
        exprs: Vec<Expression>,
        names: Vec<Variable>,
        ctx: &QueryContext,
    ) -> Result<Self> {
        if exprs.len() != names.len() {
            return Err(DbError::precondition("Function names and expressions differ in count")
                .with_field("exprs", exprs.len())
                .with_field("names", names.len()));
        }

        let ref_info = reference.table_info().clone();
        let lookup = |var: &Variable| {
            let col = find_variable(reference.as_ref(), var)?;
            Ok(ref_info.column(col)?.datatype)
        };

        let mut infos = Vec::with_capacity(exprs.len());
        let mut columns = Vec::with_capacity(exprs.len());
        for (expr, name) in exprs.into_iter().zip(names) {
            let mut col = ColumnInfo::new(name.column, expr.datatype(&lookup)?);
            col.qualifier = Some(
                name.table
                    .unwrap_or_else(|| TableName::new(FUNCTION_TABLE_NAME)),
            );
            infos.push(col);

            if is_constant(&expr) {
                let value = expr.evaluate(None, &NoVariables, ctx)?;
                columns.push(FunctionColumn::Constant(value));
            } else {
                columns.push(FunctionColumn::Dynamic(expr));
            }
        }

        let mut info = TableInfo::new_composed(TableName::new(FUNCTION_TABLE_NAME), infos);
        info.set_read_only();

        Ok(FunctionTable {
            id: next_function_table_id(),
            info: Arc::new(info),
            parents: vec![reference],
            columns,
            grouping: Grouping::None,
            ctx: ctx.clone(),
            schemes: SchemeCache::default(),
        })
    }

    pub fn reference(&self) -> &TableRef {
        &self.parents[0]
    }

    /// Treat the whole reference table as one group.
    pub fn set_whole_table_as_group(&mut self) {
        let enumerator = self.reference().row_enumerator();
        let rows = match enumerator {
            RowEnumerator::Dense(_) => None,
            RowEnumerator::Sparse(rows) => Some(rows),
        };
        self.grouping = Grouping::WholeTable { rows };
    }

    /// Group reference rows with equal values in `columns`.
    pub fn create_group_matrix(&mut self, columns: &[usize]) -> Result<()> {
        let reference = self.reference().clone();
        let ordered = ordered_row_list(&reference, columns)?;

        let mut links: Vec<u64> = Vec::with_capacity(ordered.len());
        let mut group_starts = Vec::new();
        let mut row_groups = HashMap::with_capacity(ordered.len());
        let mut prev: Option<Vec<ScalarValue>> = None;

        for row in ordered {
            let key = columns
                .iter()
                .map(|&col| reference.get_value(col, row))
                .collect::<Result<Vec<_>>>()?;
            let same_group = match &prev {
                Some(prev) => prev
                    .iter()
                    .zip(&key)
                    .all(|(a, b)| a.sort_cmp(b).is_eq()),
                None => false,
            };
            if !same_group {
                if let Some(last) = links.last_mut() {
                    *last |= GROUP_END;
                }
                group_starts.push(links.len());
            }
            row_groups.insert(row, group_starts.len() - 1);
            links.push(row as u64);
            prev = Some(key);
        }
        if let Some(last) = links.last_mut() {
            *last |= GROUP_END;
        }

        debug!(
            rows = links.len(),
            groups = group_starts.len(),
            "created group matrix"
        );

        self.grouping = Grouping::Matrix(GroupMatrix {
            links,
            group_starts,
            row_groups,
        });
        Ok(())
    }

    /// Number of groups, or `None` if the table isn't grouped.
    pub fn group_count(&self) -> Option<usize> {
        match &self.grouping {
            Grouping::None => None,
            Grouping::WholeTable { .. } => Some(1),
            Grouping::Matrix(matrix) => Some(matrix.group_starts.len()),
        }
    }

    /// Reference rows in a group.
    pub fn group_rows(&self, group: usize) -> Result<Vec<usize>> {
        match &self.grouping {
            Grouping::None => Err(DbError::precondition("Function table is not grouped")),
            Grouping::WholeTable { .. } if group == 0 => {
                Ok(self.reference().row_enumerator().to_vec())
            }
            Grouping::WholeTable { .. } => Err(DbError::precondition("Group number out of bounds")
                .with_field("group", group)
                .with_field("groups", 1)),
            Grouping::Matrix(matrix) => matrix.group_rows(group),
        }
    }

    /// If this is an aggregate over an empty reference. The table then has
    /// a single row that isn't a reference row.
    fn is_empty_aggregate(&self) -> bool {
        matches!(self.grouping, Grouping::WholeTable { .. }) && self.reference().row_count() == 0
    }

    /// Produce one row per group (or per reference row if ungrouped) with
    /// the reference columns followed by this table's columns.
    ///
    /// The representative row of a group is its first row, or the row
    /// holding the largest value of `group_max` if given.
    pub fn merge_with_reference(self: Arc<Self>, group_max: Option<usize>) -> Result<TableRef> {
        let reference = self.reference().clone();
        let this: TableRef = self.clone();

        let reps = match &self.grouping {
            Grouping::None => reference.row_enumerator().to_vec(),
            Grouping::WholeTable { .. } if reference.row_count() == 0 => {
                // One row with every reference column null.
                let outer = OuterTable::try_new(
                    vec![reference, this],
                    vec![vec![None], vec![Some(0)]],
                )?;
                return Ok(Arc::new(outer));
            }
            Grouping::WholeTable { .. } => {
                let rows = reference.row_enumerator().to_vec();
                vec![representative(reference.as_ref(), &rows, group_max)?]
            }
            Grouping::Matrix(matrix) => {
                let mut reps = Vec::with_capacity(matrix.group_starts.len());
                for group in 0..matrix.group_starts.len() {
                    let rows = matrix.group_rows(group)?;
                    reps.push(representative(reference.as_ref(), &rows, group_max)?);
                }
                reps
            }
        };

        trace!(rows = reps.len(), "merged function table with reference");
        let merged = VirtualTable::try_new(vec![reference, this], vec![reps.clone(), reps])?;
        Ok(Arc::new(merged))
    }

    fn compute(&self, expr: &Expression, row: usize) -> Result<ScalarValue> {
        let reference = self.reference().as_ref();
        if self.is_empty_aggregate() {
            let group = RowsGroup {
                table: reference,
                rows: GroupRows::Dense(0),
            };
            return expr.evaluate(Some(&group), &NullResolver, &self.ctx);
        }

        let resolver = TableRowResolver::new(reference, row);
        match &self.grouping {
            Grouping::None => expr.evaluate(None, &resolver, &self.ctx),
            Grouping::WholeTable { rows } => {
                let rows = match rows {
                    Some(rows) => GroupRows::List(rows.to_vec()),
                    None => GroupRows::Dense(reference.row_count()),
                };
                let group = RowsGroup {
                    table: reference,
                    rows,
                };
                expr.evaluate(Some(&group), &resolver, &self.ctx)
            }
            Grouping::Matrix(matrix) => {
                let group = *matrix
                    .row_groups
                    .get(&row)
                    .ok_or_else(|| row_out_of_bounds(self, row))?;
                let group = RowsGroup {
                    table: reference,
                    rows: GroupRows::List(matrix.group_rows(group)?),
                };
                expr.evaluate(Some(&group), &resolver, &self.ctx)
            }
        }
    }
}

/// Row in `rows` holding the largest non-null value of `max_column`, or the
/// first row.
fn representative(table: &dyn Table, rows: &[usize], max_column: Option<usize>) -> Result<usize> {
    let first = *rows
        .first()
        .ok_or_else(|| DbError::precondition("Group has no rows"))?;
    let column = match max_column {
        Some(column) => column,
        None => return Ok(first),
    };

    let mut best: Option<(usize, ScalarValue)> = None;
    for &row in rows {
        let value = table.get_value(column, row)?;
        let is_better = match &best {
            Some((_, current)) => value.compare(current)?.is_some_and(|ord| ord.is_gt()),
            None => !value.is_null(),
        };
        if is_better {
            best = Some((row, value));
        }
    }
    Ok(best.map(|(row, _)| row).unwrap_or(first))
}

#[derive(Debug)]
enum GroupRows {
    /// Rows `0..n`.
    Dense(usize),
    List(Vec<usize>),
}

struct RowsGroup<'a> {
    table: &'a dyn Table,
    rows: GroupRows,
}

impl GroupResolver for RowsGroup<'_> {
    fn size(&self) -> usize {
        match &self.rows {
            GroupRows::Dense(n) => *n,
            GroupRows::List(rows) => rows.len(),
        }
    }

    fn resolve(&self, var: &Variable, member: usize) -> Result<ScalarValue> {
        let row = match &self.rows {
            GroupRows::Dense(n) if member < *n => member,
            GroupRows::List(rows) if member < rows.len() => rows[member],
            _ => {
                return Err(DbError::precondition("Group member out of bounds")
                    .with_field("member", member)
                    .with_field("size", self.size()));
            }
        };
        let col = find_variable(self.table, var)?;
        self.table.get_value(col, row)
    }
}

impl Table for FunctionTable {
    fn table_id(&self) -> TableId {
        self.id
    }

    fn table_info(&self) -> &Arc<TableInfo> {
        &self.info
    }

    fn row_count(&self) -> usize {
        if self.is_empty_aggregate() {
            1
        } else {
            self.reference().row_count()
        }
    }

    fn row_enumerator(&self) -> RowEnumerator {
        if self.is_empty_aggregate() {
            RowEnumerator::Dense(1)
        } else {
            self.reference().row_enumerator()
        }
    }

    fn get_value(&self, column: usize, row: usize) -> Result<ScalarValue> {
        let expr = match self.columns.get(column) {
            Some(FunctionColumn::Constant(v)) => return Ok(v.clone()),
            Some(FunctionColumn::Dynamic(expr)) => expr,
            None => {
                return Err(DbError::precondition("Column index out of range")
                    .with_field("table", self.variant_name())
                    .with_field("column", column));
            }
        };

        let use_cache = self.ctx.config().enable_cell_cache;
        if use_cache {
            if let Some(v) = self.ctx.cell_cache().get(self.id.0, row, column) {
                return Ok(v);
            }
        }
        let value = self.compute(expr, row)?;
        if use_cache {
            self.ctx
                .cell_cache()
                .set(self.id.0, row, column, value.clone());
        }
        Ok(value)
    }

    fn is_root(&self) -> bool {
        true
    }

    fn parents(&self) -> &[TableRef] {
        &self.parents
    }

    fn rows_in_parent(&self, parent: usize, _rows: &mut [usize]) -> Result<()> {
        if parent != 0 {
            return Err(no_parent(self, parent));
        }
        if self.is_empty_aggregate() {
            return Err(DbError::precondition(
                "Aggregate row over an empty table has no reference row",
            ));
        }
        // Rows share the reference's numbering.
        Ok(())
    }

    fn scheme_for(
        &self,
        column: usize,
        original_column: usize,
        domain: &dyn Table,
    ) -> Result<SchemeRef> {
        let own = self
            .schemes
            .get_or_try_insert(column, || Ok(Arc::new(BlindSearch::new(self.id, column))))?;
        root_scheme_for(self, own, original_column, domain)
    }

    fn set_to_row_table_domain(
        &self,
        _column: usize,
        _rows: &mut [usize],
        ancestor: TableId,
    ) -> Result<()> {
        root_set_to_row_table_domain(self, ancestor)
    }

    fn variant_name(&self) -> &'static str {
        "FunctionTable"
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::seq::SliceRandom;
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::expr::AggregateFunction;
    use crate::scalar::datatype::DataType;
    use crate::table::collect_rows;
    use crate::table::memory::MemoryTable;
    use crate::testutil::{int_table, test_context, two_col_table};
    use crate::table::memory::IndexKind;

    fn fname(n: usize) -> Variable {
        Variable::qualified(TableName::new(FUNCTION_TABLE_NAME), n.to_string())
    }

    #[test]
    fn ids_are_in_reserved_range() {
        let ctx = test_context();
        let t = two_col_table();
        let a = FunctionTable::try_new(t.clone(), vec![], vec![], &ctx).unwrap();
        let b = FunctionTable::try_new(t, vec![], vec![], &ctx).unwrap();
        assert_ne!(a.table_id(), b.table_id());
        assert_ne!(0, a.table_id().0 & FUNCTION_TABLE_ID_BIT);
    }

    #[test]
    fn per_row_and_constant_columns() {
        let ctx = test_context();
        let t = two_col_table();
        let exprs = vec![
            Expression::arith(
                crate::expr::ArithOperator::Mul,
                Expression::col("t.a"),
                Expression::lit(10),
            ),
            Expression::arith(
                crate::expr::ArithOperator::Add,
                Expression::lit(1),
                Expression::lit(2),
            ),
        ];
        let ft = FunctionTable::try_new(t, exprs, vec![fname(0), fname(1)], &ctx).unwrap();
        assert!(matches!(ft.columns[1], FunctionColumn::Constant(_)));
        assert_eq!(DataType::Int32, ft.table_info().columns()[0].datatype);
        assert_eq!(ScalarValue::from(20), ft.get_value(0, 1).unwrap());
        // Second read hits the cell cache.
        assert_eq!(ScalarValue::from(20), ft.get_value(0, 1).unwrap());
        assert_eq!(ScalarValue::from(3), ft.get_value(1, 2).unwrap());
    }

    fn grouped_sum(rows: &[(&str, i32)]) -> Vec<Vec<ScalarValue>> {
        let ctx = test_context();
        let info = TableInfo::new(
            TableName::new("g"),
            [
                ColumnInfo::new("k", DataType::Utf8),
                ColumnInfo::new("v", DataType::Int32),
            ],
        );
        let table = MemoryTable::new(info);
        for (k, v) in rows {
            table.insert(vec![(*k).into(), (*v).into()]).unwrap();
        }
        let table: TableRef = Arc::new(table);

        let sum = Expression::aggregate(AggregateFunction::Sum, Some(Expression::col("g.v")));
        let mut ft = FunctionTable::try_new(table, vec![sum], vec![fname(0)], &ctx).unwrap();
        ft.create_group_matrix(&[0]).unwrap();
        let merged = Arc::new(ft).merge_with_reference(None).unwrap();

        collect_rows(merged.as_ref())
            .unwrap()
            .into_iter()
            .map(|row| vec![row[0].clone(), row[2].clone()])
            .collect()
    }

    #[test]
    fn group_sums_independent_of_order() {
        let mut rows = vec![("a", 1), ("a", 2), ("b", 3)];
        let expected = vec![
            vec![ScalarValue::from("a"), ScalarValue::Int64(3)],
            vec![ScalarValue::from("b"), ScalarValue::Int64(3)],
        ];
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..8 {
            rows.shuffle(&mut rng);
            assert_eq!(expected, grouped_sum(&rows));
        }
    }

    #[test]
    fn group_rows_walk_links() {
        let ctx = test_context();
        let t = int_table("t", IndexKind::Blind, &[Some(2), Some(1), Some(2), None]);
        let mut ft = FunctionTable::try_new(t, vec![], vec![], &ctx).unwrap();
        ft.create_group_matrix(&[0]).unwrap();
        assert_eq!(Some(3), ft.group_count());
        assert_eq!(vec![3], ft.group_rows(0).unwrap());
        assert_eq!(vec![1], ft.group_rows(1).unwrap());
        assert_eq!(vec![0, 2], ft.group_rows(2).unwrap());
        assert!(ft.group_rows(3).unwrap_err().is_precondition());
    }

    #[test]
    fn group_max_picks_row() {
        let ctx = test_context();
        let t = two_col_table();
        let mut ft = FunctionTable::try_new(t, vec![], vec![], &ctx).unwrap();
        ft.create_group_matrix(&[1]).unwrap();
        let merged = Arc::new(ft).merge_with_reference(Some(0)).unwrap();
        // Groups 'x' (rows 0, 2) and 'y' (row 1). Max of a picks row 2.
        assert_eq!(
            vec![
                vec![ScalarValue::from(3), ScalarValue::from("x")],
                vec![ScalarValue::from(2), ScalarValue::from("y")],
            ],
            collect_rows(merged.as_ref()).unwrap()
        );
    }

    #[test]
    fn empty_table_aggregate_has_one_row() {
        let ctx = test_context();
        let t = int_table("t", IndexKind::Sorted, &[]);
        let exprs = vec![
            Expression::count_star(),
            Expression::aggregate(AggregateFunction::Max, Some(Expression::col("t.a"))),
        ];
        let mut ft = FunctionTable::try_new(t, exprs, vec![fname(0), fname(1)], &ctx).unwrap();
        ft.set_whole_table_as_group();
        let merged = Arc::new(ft).merge_with_reference(None).unwrap();
        assert_eq!(1, merged.row_count());
        assert_eq!(
            vec![vec![ScalarValue::Null, ScalarValue::Int64(0), ScalarValue::Null]],
            collect_rows(merged.as_ref()).unwrap()
        );
    }

    #[test]
    fn whole_table_over_sparse_rows() {
        let ctx = test_context();
        let t = int_table("t", IndexKind::Sorted, &[Some(1), Some(2), Some(4)]);
        t.delete(1).unwrap();
        let sum = Expression::aggregate(AggregateFunction::Sum, Some(Expression::col("t.a")));
        let mut ft = FunctionTable::try_new(t, vec![sum], vec![fname(0)], &ctx).unwrap();
        ft.set_whole_table_as_group();
        let merged = Arc::new(ft).merge_with_reference(None).unwrap();
        assert_eq!(
            vec![vec![ScalarValue::from(1), ScalarValue::Int64(5)]],
            collect_rows(merged.as_ref()).unwrap()
        );
    }
}

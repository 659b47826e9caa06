use std::sync::Arc;

use strata_error::{DbError, Result};

use super::{SchemeCache, Table, TableId, TableRef, no_parent};
use crate::scalar::ScalarValue;
use crate::scheme::SchemeRef;
use crate::scheme::insert::InsertSearch;
use crate::schema::{JoinedTableInfo, TableInfo};

/// State shared by tables composed from several parents.
///
/// Variants supply the row translation. Everything else (value access,
/// scheme routing, domain translation) is common.
#[derive(Debug)]
pub(crate) struct JoinedCore {
    pub id: TableId,
    pub parents: Vec<TableRef>,
    pub info: JoinedTableInfo,
    schemes: SchemeCache,
    /// Column the table's rows are known to be sorted by.
    sorted_column: Option<usize>,
}

impl JoinedCore {
    pub fn new(parents: Vec<TableRef>) -> Self {
        let infos: Vec<&TableInfo> = parents.iter().map(|p| p.table_info().as_ref()).collect();
        let info = JoinedTableInfo::new(&infos);
        JoinedCore {
            id: TableId::next(),
            parents,
            info,
            schemes: SchemeCache::default(),
            sorted_column: None,
        }
    }

    pub fn set_sorted_column(&mut self, column: usize) {
        self.sorted_column = Some(column);
    }

    pub fn table_info(&self) -> &Arc<TableInfo> {
        self.info.table_info()
    }

    /// Parent index and parent column for an output column.
    pub fn route(&self, column: usize) -> Result<(usize, usize)> {
        Ok((
            self.info.table_of(column)?,
            self.info.column_in_table(column)?,
        ))
    }

    pub fn get_value(
        &self,
        column: usize,
        row: usize,
        resolve: impl Fn(usize, usize) -> Result<usize>,
    ) -> Result<ScalarValue> {
        let (table_idx, parent_col) = self.route(column)?;
        let parent_row = resolve(row, table_idx)?;
        self.parents[table_idx].get_value(parent_col, parent_row)
    }

    pub fn rows_in_parent(
        &self,
        table: &dyn Table,
        parent: usize,
        rows: &mut [usize],
        resolve: impl Fn(usize, usize) -> Result<usize>,
    ) -> Result<()> {
        if parent >= self.parents.len() {
            return Err(no_parent(table, parent));
        }
        for row in rows.iter_mut() {
            *row = resolve(*row, parent)?;
        }
        Ok(())
    }

    pub fn scheme_for(
        &self,
        table: &dyn Table,
        column: usize,
        original_column: usize,
        domain: &dyn Table,
    ) -> Result<SchemeRef> {
        let (table_idx, parent_col) = self.route(column)?;
        if domain.table_id() == self.id {
            self.schemes.get_or_try_insert(column, || {
                if self.sorted_column == Some(column) {
                    let order: Vec<_> = (0..table.row_count()).collect();
                    return Ok(Arc::new(InsertSearch::new(self.id, column, order)));
                }
                self.parents[table_idx].scheme_for(parent_col, column, table)
            })
        } else {
            self.parents[table_idx].scheme_for(parent_col, original_column, domain)
        }
    }

    pub fn set_to_row_table_domain(
        &self,
        column: usize,
        rows: &mut [usize],
        ancestor: TableId,
        resolve: impl Fn(usize, usize) -> Result<usize>,
    ) -> Result<()> {
        if ancestor == self.id {
            return Ok(());
        }
        let (table_idx, parent_col) = self.route(column)?;
        for row in rows.iter_mut() {
            *row = resolve(*row, table_idx)?;
        }
        self.parents[table_idx].set_to_row_table_domain(parent_col, rows, ancestor)
    }
}

/// Unrestricted cross product of two tables.
///
/// Rows are laid out row-major with the right table varying fastest.
#[derive(Debug)]
pub struct NaturallyJoinedTable {
    core: JoinedCore,
    left_count: usize,
    right_count: usize,
    /// Parent rows for parents with sparse enumerators.
    left_rows: Option<Arc<[usize]>>,
    right_rows: Option<Arc<[usize]>>,
}

impl NaturallyJoinedTable {
    pub fn new(left: TableRef, right: TableRef) -> Self {
        let left_enum = left.row_enumerator();
        let right_enum = right.row_enumerator();

        let left_count = left_enum.len();
        let right_count = right_enum.len();
        let left_rows = (!left_enum.is_dense()).then(|| Arc::from(left_enum.to_vec()));
        let right_rows = (!right_enum.is_dense()).then(|| Arc::from(right_enum.to_vec()));

        NaturallyJoinedTable {
            core: JoinedCore::new(vec![left, right]),
            left_count,
            right_count,
            left_rows,
            right_rows,
        }
    }

    fn resolve_row(&self, row: usize, table_idx: usize) -> Result<usize> {
        if row >= self.left_count * self.right_count {
            return Err(DbError::precondition("Row index out of bounds for cross product")
                .with_field("row", row)
                .with_field("left_count", self.left_count)
                .with_field("right_count", self.right_count));
        }
        let (idx, rows) = match table_idx {
            0 => (row / self.right_count, &self.left_rows),
            1 => (row % self.right_count, &self.right_rows),
            other => return Err(no_parent(self, other)),
        };
        Ok(match rows {
            Some(rows) => rows[idx],
            None => idx,
        })
    }
}

impl Table for NaturallyJoinedTable {
    fn table_id(&self) -> TableId {
        self.core.id
    }

    fn table_info(&self) -> &Arc<TableInfo> {
        self.core.table_info()
    }

    fn row_count(&self) -> usize {
        self.left_count * self.right_count
    }

    fn get_value(&self, column: usize, row: usize) -> Result<ScalarValue> {
        self.core
            .get_value(column, row, |row, t| self.resolve_row(row, t))
    }

    fn is_root(&self) -> bool {
        false
    }

    fn parents(&self) -> &[TableRef] {
        &self.core.parents
    }

    fn rows_in_parent(&self, parent: usize, rows: &mut [usize]) -> Result<()> {
        self.core
            .rows_in_parent(self, parent, rows, |row, t| self.resolve_row(row, t))
    }

    fn scheme_for(
        &self,
        column: usize,
        original_column: usize,
        domain: &dyn Table,
    ) -> Result<SchemeRef> {
        self.core.scheme_for(self, column, original_column, domain)
    }

    fn set_to_row_table_domain(
        &self,
        column: usize,
        rows: &mut [usize],
        ancestor: TableId,
    ) -> Result<()> {
        self.core
            .set_to_row_table_domain(column, rows, ancestor, |row, t| self.resolve_row(row, t))
    }

    fn variant_name(&self) -> &'static str {
        "NaturallyJoinedTable"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::column_scheme;
    use crate::table::collect_rows;
    use crate::table::memory::{IndexKind, MemoryTable};
    use crate::testutil::int_table;

    #[test]
    fn cross_product_row_major() {
        let left: TableRef = int_table("l", IndexKind::Sorted, &[Some(1), Some(2)]);
        let right: TableRef = int_table("r", IndexKind::Sorted, &[Some(10), Some(20), Some(30)]);
        let joined = NaturallyJoinedTable::new(left, right);

        assert_eq!(6, joined.row_count());
        let rows = collect_rows(&joined).unwrap();
        let pairs: Vec<_> = rows
            .iter()
            .map(|r| (r[0].clone(), r[1].clone()))
            .collect();
        assert_eq!(
            vec![
                (ScalarValue::from(1), ScalarValue::from(10)),
                (1.into(), 20.into()),
                (1.into(), 30.into()),
                (2.into(), 10.into()),
                (2.into(), 20.into()),
                (2.into(), 30.into()),
            ],
            pairs
        );
    }

    #[test]
    fn cross_product_with_sparse_parent() {
        let left = int_table("l", IndexKind::Sorted, &[Some(1), Some(2), Some(3)]);
        left.delete(1).unwrap();
        let left: TableRef = left;
        let right: TableRef = int_table("r", IndexKind::Sorted, &[Some(10)]);
        let joined = NaturallyJoinedTable::new(left, right);

        assert_eq!(2, joined.row_count());
        assert_eq!(ScalarValue::from(3), joined.get_value(0, 1).unwrap());

        let mut rows = vec![0, 1];
        joined.rows_in_parent(0, &mut rows).unwrap();
        assert_eq!(vec![0, 2], rows);
    }

    #[test]
    fn scheme_through_cross_product() {
        let left: TableRef = int_table("l", IndexKind::Sorted, &[Some(2), Some(1)]);
        let right: TableRef = int_table("r", IndexKind::Blind, &[Some(5), Some(4)]);
        let joined = NaturallyJoinedTable::new(left, right);

        let scheme = column_scheme(&joined, 0).unwrap();
        assert_eq!(
            vec![2, 3],
            scheme.select_equal(&joined, &1.into()).unwrap()
        );
        let scheme = column_scheme(&joined, 1).unwrap();
        assert_eq!(vec![1, 3], scheme.select_equal(&joined, &4.into()).unwrap());
    }

    #[test]
    fn empty_side_is_empty() {
        let left: TableRef = int_table("l", IndexKind::Sorted, &[Some(2)]);
        let right: TableRef = Arc::new(MemoryTable::new(TableInfo::new(
            crate::schema::TableName::new("r"),
            [],
        )));
        let joined = NaturallyJoinedTable::new(left, right);
        assert_eq!(0, joined.row_count());
        assert!(joined.get_value(0, 0).is_err());
    }
}

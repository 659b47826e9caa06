use std::sync::Arc;

use strata_error::{DbError, Result};

use super::joined::JoinedCore;
use super::{Table, TableId, TableRef, no_parent, row_out_of_bounds};
use crate::scalar::ScalarValue;
use crate::scheme::SchemeRef;
use crate::schema::TableInfo;

/// Table whose rows are explicit row lists over one or more parents.
///
/// Every selection, sort and join result is one of these.
#[derive(Debug)]
pub struct VirtualTable {
    core: JoinedCore,
    row_lists: Vec<Arc<[usize]>>,
    row_count: usize,
}

impl VirtualTable {
    /// Create a virtual table where `row_lists[i]` holds the rows of
    /// `tables[i]`. All lists must have the same length.
    pub fn try_new(tables: Vec<TableRef>, row_lists: Vec<Vec<usize>>) -> Result<Self> {
        if tables.len() != row_lists.len() {
            return Err(DbError::precondition("Table and row list counts differ")
                .with_field("tables", tables.len())
                .with_field("row_lists", row_lists.len()));
        }
        let row_count = row_lists.first().map(|l| l.len()).unwrap_or(0);
        if let Some(bad) = row_lists.iter().find(|l| l.len() != row_count) {
            return Err(DbError::precondition("Row lists differ in length")
                .with_field("expected", row_count)
                .with_field("got", bad.len()));
        }

        Ok(VirtualTable {
            core: JoinedCore::new(tables),
            row_lists: row_lists.into_iter().map(Arc::from).collect(),
            row_count,
        })
    }

    /// Select `rows` from a single table.
    pub fn single(table: TableRef, rows: Vec<usize>) -> Self {
        let row_count = rows.len();
        VirtualTable {
            core: JoinedCore::new(vec![table]),
            row_lists: vec![Arc::from(rows)],
            row_count,
        }
    }

    /// Mark the rows of this table as sorted by `column`, letting scheme
    /// lookups for it skip re-sorting.
    pub fn with_sorted_column(mut self, column: usize) -> Self {
        self.core.set_sorted_column(column);
        self
    }

    pub fn row_list(&self, table_idx: usize) -> Option<&[usize]> {
        self.row_lists.get(table_idx).map(|l| l.as_ref())
    }

    fn resolve_row(&self, row: usize, table_idx: usize) -> Result<usize> {
        let list = self
            .row_lists
            .get(table_idx)
            .ok_or_else(|| no_parent(self, table_idx))?;
        list.get(row)
            .copied()
            .ok_or_else(|| row_out_of_bounds(self, row))
    }
}

impl Table for VirtualTable {
    fn table_id(&self) -> TableId {
        self.core.id
    }

    fn table_info(&self) -> &Arc<TableInfo> {
        self.core.table_info()
    }

    fn row_count(&self) -> usize {
        self.row_count
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
        "VirtualTable"
    }
}

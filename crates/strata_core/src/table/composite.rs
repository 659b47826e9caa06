use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strata_error::{DbError, Result};
use tracing::debug;

use super::raw::{compare_value_tuples, tuple_runs};
use super::{
    SchemeCache, Table, TableId, TableRef, no_parent, root_scheme_for,
    root_set_to_row_table_domain,
};
use crate::scalar::ScalarValue;
use crate::scheme::SchemeRef;
use crate::scheme::blind::BlindSearch;
use crate::schema::TableInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompositeFunction {
    Union,
    Intersect,
    Except,
}

impl fmt::Display for CompositeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Union => write!(f, "UNION"),
            Self::Intersect => write!(f, "INTERSECT"),
            Self::Except => write!(f, "EXCEPT"),
        }
    }
}

/// Set operation over same-shaped tables.
///
/// The first table defines the output schema. Rows are addressed by
/// position in the concatenation of all tables' rows, optionally narrowed to
/// a list of kept positions.
#[derive(Debug)]
pub struct CompositeTable {
    id: TableId,
    info: Arc<TableInfo>,
    tables: Vec<TableRef>,
    /// Enumerated rows of each table.
    row_lists: Vec<Vec<usize>>,
    /// Kept positions in the concatenation, ascending. `None` keeps all.
    kept: Option<Vec<usize>>,
    schemes: SchemeCache,
}

impl CompositeTable {
    /// Combine `tables` with a set function. For INTERSECT and EXCEPT the
    /// first table is the left side and the remaining tables the right.
    pub fn try_new(tables: Vec<TableRef>, function: CompositeFunction, all: bool) -> Result<Self> {
        let master = tables
            .first()
            .ok_or_else(|| DbError::precondition("Composite table requires at least one table"))?;
        let column_count = master.column_count();
        if let Some(bad) = tables.iter().find(|t| t.column_count() != column_count) {
            return Err(DbError::precondition("Composite tables differ in column count")
                .with_field("expected", column_count)
                .with_field("got", bad.column_count()));
        }

        let info = master.table_info().clone();
        let row_lists: Vec<Vec<usize>> = tables.iter().map(|t| t.row_enumerator().to_vec()).collect();

        let mut table = CompositeTable {
            id: TableId::next(),
            info,
            tables,
            row_lists,
            kept: None,
            schemes: SchemeCache::default(),
        };
        table.setup_indexes(function, all)?;

        debug!(%function, all, rows = table.row_count(), "built composite table");

        Ok(table)
    }

    fn total_rows(&self) -> usize {
        self.row_lists.iter().map(|l| l.len()).sum()
    }

    fn setup_indexes(&mut self, function: CompositeFunction, all: bool) -> Result<()> {
        if function == CompositeFunction::Union && all {
            self.kept = None;
            return Ok(());
        }

        let total = self.total_rows();
        let left_rows = self.row_lists.first().map(|l| l.len()).unwrap_or(0);
        let columns = self.info.column_count();
        let tuples = (0..total)
            .map(|pos| {
                (0..columns)
                    .map(|col| self.value_at_position(col, pos))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        let mut kept = Vec::new();
        for run in tuple_runs(&tuples, |a, b| compare_value_tuples(a, b)) {
            // Runs list members in ascending position, so left members come
            // first.
            let left = run.iter().take_while(|&&pos| pos < left_rows).count();
            let right = run.len() - left;
            match (function, all) {
                (CompositeFunction::Union, _) => kept.push(run[0]),
                (CompositeFunction::Intersect, false) => {
                    if left > 0 && right > 0 {
                        kept.push(run[0]);
                    }
                }
                (CompositeFunction::Intersect, true) => {
                    kept.extend_from_slice(&run[..left.min(right)]);
                }
                (CompositeFunction::Except, false) => {
                    if left > 0 && right == 0 {
                        kept.push(run[0]);
                    }
                }
                (CompositeFunction::Except, true) => {
                    kept.extend_from_slice(&run[..left.saturating_sub(right)]);
                }
            }
        }
        kept.sort_unstable();
        self.kept = Some(kept);

        Ok(())
    }

    /// Walk the per-table row counts to find the owning table.
    fn locate(&self, pos: usize) -> Result<(usize, usize)> {
        let mut local = pos;
        for (idx, rows) in self.row_lists.iter().enumerate() {
            if local < rows.len() {
                return Ok((idx, rows[local]));
            }
            local -= rows.len();
        }
        Err(DbError::precondition("Composite row out of bounds")
            .with_field("position", pos)
            .with_field("total_rows", self.total_rows()))
    }

    fn value_at_position(&self, column: usize, pos: usize) -> Result<ScalarValue> {
        let (table_idx, row) = self.locate(pos)?;
        self.tables[table_idx].get_value(column, row)
    }
}

impl Table for CompositeTable {
    fn table_id(&self) -> TableId {
        self.id
    }

    fn table_info(&self) -> &Arc<TableInfo> {
        &self.info
    }

    fn row_count(&self) -> usize {
        match &self.kept {
            Some(kept) => kept.len(),
            None => self.total_rows(),
        }
    }

    fn get_value(&self, column: usize, row: usize) -> Result<ScalarValue> {
        let pos = match &self.kept {
            Some(kept) => *kept.get(row).ok_or_else(|| {
                DbError::precondition("Composite row out of bounds")
                    .with_field("row", row)
                    .with_field("row_count", kept.len())
            })?,
            None => row,
        };
        self.value_at_position(column, pos)
    }

    fn is_root(&self) -> bool {
        true
    }

    fn parents(&self) -> &[TableRef] {
        &self.tables
    }

    fn rows_in_parent(&self, parent: usize, _rows: &mut [usize]) -> Result<()> {
        Err(no_parent(self, parent))
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
        "CompositeTable"
    }
}

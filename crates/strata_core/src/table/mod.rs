//! Table abstraction and the composed table variants.
//!
//! Every variant implements [`Table`]. Composed tables hold shared
//! references to their parents and never to their children, so a plan's
//! tables form a DAG.

pub mod composite;
pub mod filter;
pub mod function;
pub mod joined;
pub mod memory;
pub mod ops;
pub mod outer;
pub mod raw;
pub mod resolver;
pub mod virtual_table;

use std::fmt::{self, Debug};
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use strata_error::{DbError, Result};

use crate::scalar::ScalarValue;
use crate::scheme::SchemeRef;
use crate::schema::TableInfo;

pub type TableRef = Arc<dyn Table>;

/// Process-unique table identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId(pub u64);

static NEXT_TABLE_ID: AtomicU64 = AtomicU64::new(1);

impl TableId {
    /// Allocate a new id. Never reused for the lifetime of the process.
    pub fn next() -> Self {
        TableId(NEXT_TABLE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Row ids of a table in enumeration order.
#[derive(Debug, Clone)]
pub enum RowEnumerator {
    /// Rows `0..n`.
    Dense(usize),
    /// Explicit row ids, e.g. a storage table after deletes.
    Sparse(Arc<[usize]>),
}

impl RowEnumerator {
    pub fn len(&self) -> usize {
        match self {
            Self::Dense(n) => *n,
            Self::Sparse(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_dense(&self) -> bool {
        matches!(self, Self::Dense(_))
    }

    pub fn iter(&self) -> RowIter<'_> {
        match self {
            Self::Dense(n) => RowIter::Dense(0..*n),
            Self::Sparse(rows) => RowIter::Sparse(rows.iter()),
        }
    }

    pub fn to_vec(&self) -> Vec<usize> {
        self.iter().collect()
    }

    /// Row at position `idx` in enumeration order.
    pub fn get(&self, idx: usize) -> Option<usize> {
        match self {
            Self::Dense(n) => (idx < *n).then_some(idx),
            Self::Sparse(rows) => rows.get(idx).copied(),
        }
    }
}

#[derive(Debug)]
pub enum RowIter<'a> {
    Dense(Range<usize>),
    Sparse(std::slice::Iter<'a, usize>),
}

impl Iterator for RowIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Dense(r) => r.next(),
            Self::Sparse(r) => r.next().copied(),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self {
            Self::Dense(r) => r.size_hint(),
            Self::Sparse(r) => r.size_hint(),
        }
    }
}

pub trait Table: Debug + Send + Sync {
    fn table_id(&self) -> TableId;

    fn table_info(&self) -> &Arc<TableInfo>;

    fn row_count(&self) -> usize;

    /// Value at `(column, row)`. `row` must come from this table's
    /// enumerator.
    fn get_value(&self, column: usize, row: usize) -> Result<ScalarValue>;

    fn row_enumerator(&self) -> RowEnumerator {
        RowEnumerator::Dense(self.row_count())
    }

    /// If provenance flattening stops at this table.
    fn is_root(&self) -> bool;

    /// Tables this table reads rows from, in column order.
    fn parents(&self) -> &[TableRef];

    /// Translate rows of this table into the row numbering of the parent at
    /// index `parent`.
    fn rows_in_parent(&self, parent: usize, rows: &mut [usize]) -> Result<()>;

    /// Get a scheme for `column` valid in the row domain of `domain`.
    ///
    /// `domain` is either this table or a descendant of it, in which case
    /// `original_column` is the descendant's column exposing `column`.
    fn scheme_for(
        &self,
        column: usize,
        original_column: usize,
        domain: &dyn Table,
    ) -> Result<SchemeRef>;

    /// Translate rows of this table (read through `column`) into the row
    /// numbering of `ancestor`.
    fn set_to_row_table_domain(
        &self,
        column: usize,
        rows: &mut [usize],
        ancestor: TableId,
    ) -> Result<()>;

    /// Name of the table variant.
    fn variant_name(&self) -> &'static str;

    fn column_count(&self) -> usize {
        self.table_info().column_count()
    }
}

/// Scheme lookup for tables at which scheme routing stops.
pub(crate) fn root_scheme_for(
    table: &dyn Table,
    own: SchemeRef,
    original_column: usize,
    domain: &dyn Table,
) -> Result<SchemeRef> {
    if domain.table_id() == table.table_id() {
        Ok(own)
    } else {
        own.subset_scheme(table, domain, original_column)
    }
}

/// Row domain translation for tables with no parents to route through.
pub(crate) fn root_set_to_row_table_domain(table: &dyn Table, ancestor: TableId) -> Result<()> {
    if ancestor == table.table_id() {
        Ok(())
    } else {
        Err(incorrect_routing(table, ancestor))
    }
}

pub(crate) fn incorrect_routing(table: &dyn Table, ancestor: TableId) -> DbError {
    DbError::precondition("Incorrect row-table domain routing")
        .with_field("table", table.variant_name())
        .with_field("table_id", table.table_id())
        .with_field("ancestor", ancestor)
}

pub(crate) fn no_parent(table: &dyn Table, parent: usize) -> DbError {
    DbError::precondition("Table has no parent at index")
        .with_field("table", table.variant_name())
        .with_field("parent", parent)
}

pub(crate) fn row_out_of_bounds(table: &dyn Table, row: usize) -> DbError {
    DbError::precondition("Row index out of bounds")
        .with_field("table", table.variant_name())
        .with_field("row", row)
        .with_field("row_count", table.row_count())
}

/// Per-table cache of column schemes.
///
/// Lookups compute outside the lock and store the result. Two threads
/// racing on the same column both compute equivalent schemes, the last
/// store wins.
#[derive(Debug, Default)]
pub(crate) struct SchemeCache {
    schemes: RwLock<HashMap<usize, SchemeRef>>,
}

impl SchemeCache {
    pub fn get_or_try_insert(
        &self,
        column: usize,
        f: impl FnOnce() -> Result<SchemeRef>,
    ) -> Result<SchemeRef> {
        if let Some(scheme) = self.schemes.read().get(&column) {
            return Ok(scheme.clone());
        }
        let scheme = f()?;
        self.schemes.write().insert(column, scheme.clone());
        Ok(scheme)
    }

    pub fn clear(&self) {
        self.schemes.write().clear();
    }
}

/// Collect every row of a table in enumeration order.
pub fn collect_rows(table: &dyn Table) -> Result<Vec<Vec<ScalarValue>>> {
    let cols = table.column_count();
    table
        .row_enumerator()
        .iter()
        .map(|row| (0..cols).map(|col| table.get_value(col, row)).collect())
        .collect()
}

/// Collect a single column in enumeration order.
pub fn collect_column(table: &dyn Table, column: usize) -> Result<Vec<ScalarValue>> {
    table
        .row_enumerator()
        .iter()
        .map(|row| table.get_value(column, row))
        .collect()
}

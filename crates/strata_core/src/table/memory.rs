use std::sync::Arc;

use parking_lot::RwLock;
use strata_error::{DbError, Result};
use tracing::trace;

use super::{
    RowEnumerator, SchemeCache, Table, TableId, TableRef, root_scheme_for,
    root_set_to_row_table_domain,
};
use crate::scalar::ScalarValue;
use crate::scheme::SchemeRef;
use crate::scheme::blind::BlindSearch;
use crate::scheme::insert::{InsertSearch, SearchResult, search_last};
use crate::schema::{TableInfo, TableName};

/// How a storage column answers selection queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexKind {
    /// Sort order maintained on every insert.
    #[default]
    Sorted,
    /// Linear scan.
    Blind,
}

/// In-memory storage table.
///
/// Row ids are stable for the life of a row. Deleting a row leaves a hole,
/// so the row enumerator becomes sparse.
#[derive(Debug)]
pub struct MemoryTable {
    id: TableId,
    info: Arc<TableInfo>,
    indexes: Vec<IndexKind>,
    state: RwLock<MemoryTableState>,
    schemes: SchemeCache,
}

#[derive(Debug, Default)]
struct MemoryTableState {
    rows: Vec<Option<Vec<ScalarValue>>>,
    live: usize,
    /// Rows in value order for each sorted column.
    orders: Vec<Option<Vec<usize>>>,
}

impl MemoryTable {
    /// Create an empty table with sorted indexes on every column.
    pub fn new(info: TableInfo) -> Self {
        let indexes = vec![IndexKind::Sorted; info.column_count()];
        Self::with_indexes(info, indexes)
    }

    pub fn with_indexes(mut info: TableInfo, indexes: Vec<IndexKind>) -> Self {
        info.set_read_only();
        let orders = indexes
            .iter()
            .map(|kind| match kind {
                IndexKind::Sorted => Some(Vec::new()),
                IndexKind::Blind => None,
            })
            .collect();
        MemoryTable {
            id: TableId::next(),
            info: Arc::new(info),
            indexes,
            state: RwLock::new(MemoryTableState {
                rows: Vec::new(),
                live: 0,
                orders,
            }),
            schemes: SchemeCache::default(),
        }
    }

    /// A table with no columns and exactly one row.
    pub fn single_row() -> Self {
        let table = Self::new(TableInfo::new(TableName::new("#SINGLE_ROW"), []));
        table.state.write().rows.push(Some(Vec::new()));
        table.state.write().live = 1;
        table
    }

    pub fn into_table_ref(self) -> TableRef {
        Arc::new(self)
    }

    /// Insert a row, returning its row id.
    ///
    /// Values are cast to the column types.
    pub fn insert(&self, values: Vec<ScalarValue>) -> Result<usize> {
        let columns = self.info.columns();
        if values.len() != columns.len() {
            return Err(DbError::new(format!(
                "Expected {} values for table '{}', got {}",
                columns.len(),
                self.info.name(),
                values.len()
            )));
        }

        let mut row = Vec::with_capacity(values.len());
        for (col, value) in columns.iter().zip(values) {
            let value = if value.is_null() {
                col.default.clone().unwrap_or(ScalarValue::Null)
            } else {
                value.cast(col.datatype)?
            };
            if value.is_null() && !col.nullable {
                return Err(DbError::new(format!(
                    "NULL value in non-null column '{}'",
                    col.name
                )));
            }
            row.push(value);
        }

        let mut guard = self.state.write();
        let state = &mut *guard;
        let row_id = state.rows.len();

        for (col, order) in state.orders.iter_mut().enumerate() {
            let order = match order {
                Some(order) => order,
                None => continue,
            };
            let value = &row[col];
            let rows = &state.rows;
            // Insert after any equal values so ties stay in insertion order.
            let pos = match search_last(order.len(), |i| {
                let existing = rows[order[i]]
                    .as_ref()
                    .map(|r| &r[col])
                    .unwrap_or(&ScalarValue::Null);
                Ok(existing.sort_cmp(value))
            })? {
                SearchResult::Found(i) => i + 1,
                SearchResult::NotFound(i) => i,
            };
            order.insert(pos, row_id);
        }

        state.rows.push(Some(row));
        state.live += 1;
        self.schemes.clear();
        drop(guard);

        trace!(table = %self.info.name(), row_id, "inserted row");

        Ok(row_id)
    }

    /// Insert many rows.
    pub fn insert_all(&self, rows: impl IntoIterator<Item = Vec<ScalarValue>>) -> Result<()> {
        for row in rows {
            self.insert(row)?;
        }
        Ok(())
    }

    pub fn delete(&self, row: usize) -> Result<()> {
        let mut state = self.state.write();
        match state.rows.get_mut(row) {
            Some(slot @ Some(_)) => *slot = None,
            _ => {
                return Err(DbError::new("Cannot delete missing row").with_field("row", row));
            }
        }
        state.live -= 1;
        for order in state.orders.iter_mut().flatten() {
            order.retain(|&r| r != row);
        }
        self.schemes.clear();
        drop(state);

        Ok(())
    }

    pub fn index_kind(&self, column: usize) -> Option<IndexKind> {
        self.indexes.get(column).copied()
    }

    fn own_scheme(&self, column: usize) -> Result<SchemeRef> {
        // The state lock is held across build and store, and writers clear
        // the cache before releasing theirs, so a cached scheme always
        // matches the current rows. Lock order is state, then schemes.
        let state = self.state.read();
        self.schemes.get_or_try_insert(column, || {
            match state.orders.get(column) {
                Some(Some(order)) => Ok(Arc::new(InsertSearch::new(
                    self.id,
                    column,
                    order.clone(),
                )) as SchemeRef),
                Some(None) => Ok(Arc::new(BlindSearch::new(self.id, column)) as SchemeRef),
                None => Err(DbError::precondition("Column index out of range")
                    .with_field("table", self.info.name())
                    .with_field("column", column)),
            }
        })
    }
}

impl Table for MemoryTable {
    fn table_id(&self) -> TableId {
        self.id
    }

    fn table_info(&self) -> &Arc<TableInfo> {
        &self.info
    }

    fn row_count(&self) -> usize {
        self.state.read().live
    }

    fn get_value(&self, column: usize, row: usize) -> Result<ScalarValue> {
        let state = self.state.read();
        let values = match state.rows.get(row) {
            Some(Some(values)) => values,
            _ => {
                return Err(DbError::precondition("Row out of bounds or deleted")
                    .with_field("table", self.info.name())
                    .with_field("row", row));
            }
        };
        let value = values.get(column).ok_or_else(|| {
            DbError::precondition("Column index out of range")
                .with_field("table", self.info.name())
                .with_field("column", column)
        })?;
        if value.is_null() && !self.info.column(column)?.nullable {
            return Err(DbError::precondition("Null value in non-null column")
                .with_field("table", self.info.name())
                .with_field("column", column)
                .with_field("row", row));
        }
        Ok(value.clone())
    }

    fn row_enumerator(&self) -> RowEnumerator {
        let state = self.state.read();
        if state.live == state.rows.len() {
            RowEnumerator::Dense(state.live)
        } else {
            let rows: Vec<_> = state
                .rows
                .iter()
                .enumerate()
                .filter_map(|(idx, row)| row.as_ref().map(|_| idx))
                .collect();
            RowEnumerator::Sparse(rows.into())
        }
    }

    fn is_root(&self) -> bool {
        true
    }

    fn parents(&self) -> &[TableRef] {
        &[]
    }

    fn rows_in_parent(&self, parent: usize, _rows: &mut [usize]) -> Result<()> {
        Err(super::no_parent(self, parent))
    }

    fn scheme_for(
        &self,
        column: usize,
        original_column: usize,
        domain: &dyn Table,
    ) -> Result<SchemeRef> {
        let own = self.own_scheme(column)?;
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
        "MemoryTable"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scalar::datatype::DataType;
    use crate::scheme::column_scheme;
    use crate::schema::ColumnInfo;

    fn table() -> MemoryTable {
        MemoryTable::new(TableInfo::new(
            TableName::new("t"),
            [
                ColumnInfo::new("id", DataType::Int32).not_null(),
                ColumnInfo::new("name", DataType::Utf8),
            ],
        ))
    }

    #[test]
    fn insert_keeps_sorted_order() {
        let t = table();
        t.insert(vec![3.into(), "c".into()]).unwrap();
        t.insert(vec![1.into(), "a".into()]).unwrap();
        t.insert(vec![3.into(), "b".into()]).unwrap();
        t.insert(vec![2.into(), ScalarValue::Null]).unwrap();

        let scheme = column_scheme(&t, 0).unwrap();
        assert_eq!(vec![1, 3, 0, 2], scheme.select_all(&t).unwrap());

        let scheme = column_scheme(&t, 1).unwrap();
        assert_eq!(vec![3, 1, 2, 0], scheme.select_all(&t).unwrap());
    }

    #[test]
    fn insert_casts_values() {
        let t = table();
        t.insert(vec![ScalarValue::Int64(4), "x".into()]).unwrap();
        assert_eq!(ScalarValue::Int32(4), t.get_value(0, 0).unwrap());
    }

    #[test]
    fn insert_rejects_null_in_not_null() {
        let t = table();
        t.insert(vec![ScalarValue::Null, "x".into()]).unwrap_err();
        assert_eq!(0, t.row_count());
    }

    #[test]
    fn delete_makes_sparse() {
        let t = table();
        for i in 0..4 {
            t.insert(vec![i.into(), ScalarValue::Null]).unwrap();
        }
        t.delete(1).unwrap();

        assert_eq!(3, t.row_count());
        assert_eq!(vec![0, 2, 3], t.row_enumerator().to_vec());
        assert!(t.get_value(0, 1).unwrap_err().is_precondition());

        let scheme = column_scheme(&t, 0).unwrap();
        assert_eq!(vec![0, 2, 3], scheme.select_all(&t).unwrap());
        t.delete(1).unwrap_err();
    }

    #[test]
    fn scheme_refreshed_after_insert_and_delete() {
        let t = table();
        t.insert(vec![2.into(), ScalarValue::Null]).unwrap();
        let before = column_scheme(&t, 0).unwrap();
        assert_eq!(vec![0], before.select_all(&t).unwrap());

        t.insert(vec![1.into(), ScalarValue::Null]).unwrap();
        let after = column_scheme(&t, 0).unwrap();
        assert_eq!(vec![1, 0], after.select_all(&t).unwrap());

        t.delete(0).unwrap();
        assert_eq!(vec![1], column_scheme(&t, 0).unwrap().select_all(&t).unwrap());
    }

    #[test]
    fn concurrent_lookups_never_cache_stale_order() {
        let t = table();
        std::thread::scope(|s| {
            s.spawn(|| {
                for i in 0..200 {
                    t.insert(vec![ScalarValue::from(200 - i), ScalarValue::Null]).unwrap();
                }
            });
            for _ in 0..2 {
                s.spawn(|| {
                    for _ in 0..200 {
                        column_scheme(&t, 0).unwrap();
                    }
                });
            }
        });

        let order = column_scheme(&t, 0).unwrap().select_all(&t).unwrap();
        assert_eq!(200, order.len());
        assert_eq!(199, order[0]);
        assert_eq!(0, order[199]);
    }

    #[test]
    fn single_row_table() {
        let t = MemoryTable::single_row();
        assert_eq!(1, t.row_count());
        assert_eq!(0, t.column_count());
    }
}

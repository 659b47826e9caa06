use std::sync::Arc;

use strata_error::{DbError, Result};

use super::joined::JoinedCore;
use super::{
    SchemeCache, Table, TableId, TableRef, no_parent, root_scheme_for,
    root_set_to_row_table_domain, row_out_of_bounds,
};
use crate::scalar::ScalarValue;
use crate::scheme::SchemeRef;
use crate::scheme::blind::BlindSearch;
use crate::schema::TableInfo;

/// Virtual table where a row may have no row at all in some parents.
///
/// Reading a column of a parent with no row yields `ScalarValue::Null`.
/// Nulls are untyped values; the type of a null-extended cell is the column's
/// `DataType` in this table's schema, which keeps the parent's declared
/// type. Used for outer joins and for the
/// single result row of an aggregate over an empty table.
#[derive(Debug)]
pub struct OuterTable {
    core: JoinedCore,
    row_lists: Vec<Vec<Option<usize>>>,
    row_count: usize,
    schemes: SchemeCache,
}

impl OuterTable {
    pub fn try_new(tables: Vec<TableRef>, row_lists: Vec<Vec<Option<usize>>>) -> Result<Self> {
        if tables.len() != row_lists.len() {
            return Err(DbError::precondition("Table and row list counts differ")
                .with_field("tables", tables.len())
                .with_field("row_lists", row_lists.len()));
        }
        let row_count = row_lists.first().map(|l| l.len()).unwrap_or(0);
        if row_lists.iter().any(|l| l.len() != row_count) {
            return Err(DbError::precondition("Row lists differ in length"));
        }

        let mut core = JoinedCore::new(tables);
        // Columns may now hold nulls regardless of the parent's schema.
        let info = core.table_info().as_ref();
        let columns = info
            .columns()
            .iter()
            .map(|c| {
                let mut c = c.clone();
                c.nullable = true;
                c
            })
            .collect();
        let mut info = TableInfo::new_composed(info.name().clone(), columns);
        info.set_read_only();
        core.info = core.info.with_table_info(info);

        Ok(OuterTable {
            core,
            row_lists,
            row_count,
            schemes: SchemeCache::default(),
        })
    }

    /// Append rows, e.g. unmatched rows of an outer join.
    pub fn merge_in(&mut self, rows: Vec<Vec<Option<usize>>>) -> Result<()> {
        if rows.len() != self.row_lists.len() {
            return Err(DbError::precondition("Merged row list count differs"));
        }
        let added = rows.first().map(|l| l.len()).unwrap_or(0);
        if rows.iter().any(|l| l.len() != added) {
            return Err(DbError::precondition("Merged row lists differ in length"));
        }
        for (list, extra) in self.row_lists.iter_mut().zip(rows) {
            list.extend(extra);
        }
        self.row_count += added;
        Ok(())
    }

    fn slot(&self, row: usize, table_idx: usize) -> Result<Option<usize>> {
        let list = self
            .row_lists
            .get(table_idx)
            .ok_or_else(|| no_parent(self, table_idx))?;
        list.get(row)
            .copied()
            .ok_or_else(|| row_out_of_bounds(self, row))
    }
}

impl Table for OuterTable {
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
        let (table_idx, parent_col) = self.core.route(column)?;
        match self.slot(row, table_idx)? {
            Some(parent_row) => self.core.parents[table_idx].get_value(parent_col, parent_row),
            // Typed by `table_info().columns()[column].datatype`.
            None => Ok(ScalarValue::Null),
        }
    }

    fn is_root(&self) -> bool {
        true
    }

    fn parents(&self) -> &[TableRef] {
        &self.core.parents
    }

    fn rows_in_parent(&self, parent: usize, rows: &mut [usize]) -> Result<()> {
        for row in rows.iter_mut() {
            *row = self.slot(*row, parent)?.ok_or_else(|| {
                DbError::precondition("Outer row has no row in parent")
                    .with_field("row", *row)
                    .with_field("parent", parent)
            })?;
        }
        Ok(())
    }

    fn scheme_for(
        &self,
        column: usize,
        original_column: usize,
        domain: &dyn Table,
    ) -> Result<SchemeRef> {
        // Null-extended rows have no parent row to route through, so
        // selection on this table always scans.
        let own = self.schemes.get_or_try_insert(column, || {
            Ok(Arc::new(BlindSearch::new(self.core.id, column)))
        })?;
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
        "OuterTable"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scalar::datatype::DataType;
    use crate::scheme::column_scheme;
    use crate::schema::Variable;
    use crate::table::filter::SubsetColumnTable;
    use crate::table::memory::IndexKind;
    use crate::table::raw::resolve_to_raw_table;
    use crate::testutil::{int_table, two_col_table};

    fn left_joined() -> Arc<OuterTable> {
        let l: TableRef = int_table("l", IndexKind::Sorted, &[Some(1), Some(2)]);
        let r = two_col_table();
        // l.a = 1 matches r row 0, l.a = 2 has no match.
        let outer = OuterTable::try_new(
            vec![l, r],
            vec![vec![Some(0), Some(1)], vec![Some(0), None]],
        )
        .unwrap();
        Arc::new(outer)
    }

    #[test]
    fn null_slots_read_as_null() {
        let l: TableRef = int_table("l", IndexKind::Sorted, &[Some(1), Some(2)]);
        let r: TableRef = int_table("r", IndexKind::Sorted, &[Some(2)]);
        let mut outer =
            OuterTable::try_new(vec![l, r], vec![vec![Some(1)], vec![Some(0)]]).unwrap();
        outer.merge_in(vec![vec![Some(0)], vec![None]]).unwrap();

        assert_eq!(2, outer.row_count());
        assert_eq!(ScalarValue::from(2), outer.get_value(1, 0).unwrap());
        assert_eq!(ScalarValue::Null, outer.get_value(1, 1).unwrap());
        assert!(outer.table_info().columns()[1].nullable);

        let scheme = column_scheme(&outer, 1).unwrap();
        assert_eq!(vec![1, 0], scheme.select_all(&outer).unwrap());

        let mut rows = vec![1];
        assert!(outer.rows_in_parent(1, &mut rows).unwrap_err().is_precondition());
    }

    #[test]
    fn null_slot_type_comes_from_schema() {
        let outer = left_joined();
        let columns = outer.table_info().columns();
        assert_eq!(DataType::Int32, columns[1].datatype);
        assert_eq!(DataType::Utf8, columns[2].datatype);
        assert_eq!(ScalarValue::Null, outer.get_value(2, 1).unwrap());
        assert_eq!(ScalarValue::from("x"), outer.get_value(2, 0).unwrap());
    }

    #[test]
    fn subset_over_outer_resolves_to_outer_root() {
        let outer = left_joined();
        let subset: TableRef = Arc::new(
            SubsetColumnTable::try_new(
                outer.clone(),
                vec![0, 2],
                vec![Variable::parse("s.a"), Variable::parse("s.b")],
            )
            .unwrap(),
        );

        assert_eq!(ScalarValue::Null, subset.get_value(1, 1).unwrap());
        assert_eq!(DataType::Utf8, subset.table_info().columns()[1].datatype);

        // Provenance stops at the outer table, so null-extended rows keep
        // reading null after flattening.
        let raw = resolve_to_raw_table(&subset).unwrap();
        assert_eq!(1, raw.elements().len());
        assert_eq!(outer.table_id(), raw.elements()[0].table.table_id());
        assert_eq!(vec![0, 1], raw.elements()[0].rows);

        let rebuilt = raw.to_table().unwrap();
        assert_eq!(ScalarValue::Null, rebuilt.get_value(2, 1).unwrap());
    }
}

//! Single-parent views that keep the parent's row identity.

use std::sync::Arc;

use strata_error::{DbError, Result};

use super::{RowEnumerator, SchemeCache, Table, TableId, TableRef, no_parent};
use crate::scalar::ScalarValue;
use crate::scheme::{SchemeRef, column_scheme};
use crate::schema::{ColumnInfo, TableInfo, TableName, Variable};

/// Scheme lookup shared by the filter variants.
///
/// Requests for this table's own domain are cached. Requests for any other
/// domain are forwarded to the parent uncached, since they're in a different
/// row numbering.
fn filter_scheme_for(
    table: &dyn Table,
    parent: &TableRef,
    cache: &SchemeCache,
    column: usize,
    parent_column: usize,
    original_column: usize,
    domain: &dyn Table,
) -> Result<SchemeRef> {
    if domain.table_id() == table.table_id() {
        cache.get_or_try_insert(column, || {
            let scheme = column_scheme(parent.as_ref(), parent_column)?;
            Ok(scheme.rebind(table.table_id(), column))
        })
    } else {
        parent.scheme_for(parent_column, original_column, domain)
    }
}

/// Row numbering is identical to the parent's, so nothing to translate
/// unless the ancestor is further up.
fn filter_set_to_row_table_domain(
    table: &dyn Table,
    parent: &TableRef,
    parent_column: usize,
    rows: &mut [usize],
    ancestor: TableId,
) -> Result<()> {
    if ancestor == table.table_id() || ancestor == parent.table_id() {
        return Ok(());
    }
    parent.set_to_row_table_domain(parent_column, rows, ancestor)
}

/// Pass-through view over a single parent.
#[derive(Debug)]
pub struct FilterTable {
    id: TableId,
    parent: TableRef,
    schemes: SchemeCache,
}

impl FilterTable {
    pub fn new(parent: TableRef) -> Self {
        FilterTable {
            id: TableId::next(),
            parent,
            schemes: SchemeCache::default(),
        }
    }

    pub fn parent(&self) -> &TableRef {
        &self.parent
    }
}

impl Table for FilterTable {
    fn table_id(&self) -> TableId {
        self.id
    }

    fn table_info(&self) -> &Arc<TableInfo> {
        self.parent.table_info()
    }

    fn row_count(&self) -> usize {
        self.parent.row_count()
    }

    fn get_value(&self, column: usize, row: usize) -> Result<ScalarValue> {
        self.parent.get_value(column, row)
    }

    fn row_enumerator(&self) -> RowEnumerator {
        self.parent.row_enumerator()
    }

    fn is_root(&self) -> bool {
        false
    }

    fn parents(&self) -> &[TableRef] {
        std::slice::from_ref(&self.parent)
    }

    fn rows_in_parent(&self, parent: usize, _rows: &mut [usize]) -> Result<()> {
        if parent != 0 {
            return Err(no_parent(self, parent));
        }
        Ok(())
    }

    fn scheme_for(
        &self,
        column: usize,
        original_column: usize,
        domain: &dyn Table,
    ) -> Result<SchemeRef> {
        filter_scheme_for(
            self,
            &self.parent,
            &self.schemes,
            column,
            column,
            original_column,
            domain,
        )
    }

    fn set_to_row_table_domain(
        &self,
        column: usize,
        rows: &mut [usize],
        ancestor: TableId,
    ) -> Result<()> {
        filter_set_to_row_table_domain(self, &self.parent, column, rows, ancestor)
    }

    fn variant_name(&self) -> &'static str {
        "FilterTable"
    }
}

/// Aliases a whole table under a new name, e.g. `FROM foo AS bar`.
///
/// Opaque origin for provenance.
#[derive(Debug)]
pub struct ReferenceTable {
    id: TableId,
    parent: TableRef,
    info: Arc<TableInfo>,
    schemes: SchemeCache,
}

impl ReferenceTable {
    pub fn new(parent: TableRef, alias: TableName) -> Self {
        let info = Arc::new(parent.table_info().aliased(alias));
        ReferenceTable {
            id: TableId::next(),
            parent,
            info,
            schemes: SchemeCache::default(),
        }
    }
}

impl Table for ReferenceTable {
    fn table_id(&self) -> TableId {
        self.id
    }

    fn table_info(&self) -> &Arc<TableInfo> {
        &self.info
    }

    fn row_count(&self) -> usize {
        self.parent.row_count()
    }

    fn get_value(&self, column: usize, row: usize) -> Result<ScalarValue> {
        self.parent.get_value(column, row)
    }

    fn row_enumerator(&self) -> RowEnumerator {
        self.parent.row_enumerator()
    }

    fn is_root(&self) -> bool {
        true
    }

    fn parents(&self) -> &[TableRef] {
        std::slice::from_ref(&self.parent)
    }

    fn rows_in_parent(&self, parent: usize, _rows: &mut [usize]) -> Result<()> {
        if parent != 0 {
            return Err(no_parent(self, parent));
        }
        Ok(())
    }

    fn scheme_for(
        &self,
        column: usize,
        original_column: usize,
        domain: &dyn Table,
    ) -> Result<SchemeRef> {
        filter_scheme_for(
            self,
            &self.parent,
            &self.schemes,
            column,
            column,
            original_column,
            domain,
        )
    }

    fn set_to_row_table_domain(
        &self,
        column: usize,
        rows: &mut [usize],
        ancestor: TableId,
    ) -> Result<()> {
        filter_set_to_row_table_domain(self, &self.parent, column, rows, ancestor)
    }

    fn variant_name(&self) -> &'static str {
        "ReferenceTable"
    }
}

/// Projects, reorders and renames a subset of the parent's columns.
///
/// Opaque origin for provenance.
#[derive(Debug)]
pub struct SubsetColumnTable {
    id: TableId,
    parent: TableRef,
    info: Arc<TableInfo>,
    /// Output column to parent column.
    mapping: Vec<usize>,
    schemes: SchemeCache,
}

impl SubsetColumnTable {
    /// Create a subset with `mapping[i]` naming the parent column exposed as
    /// output column `i` under `aliases[i]`.
    pub fn try_new(parent: TableRef, mapping: Vec<usize>, aliases: Vec<Variable>) -> Result<Self> {
        if mapping.len() != aliases.len() {
            return Err(DbError::precondition("Subset mapping and alias lengths differ")
                .with_field("mapping", mapping.len())
                .with_field("aliases", aliases.len()));
        }

        let parent_info = parent.table_info();
        let mut columns = Vec::with_capacity(mapping.len());
        for (&idx, alias) in mapping.iter().zip(aliases) {
            let source = parent_info.column(idx)?;
            columns.push(ColumnInfo {
                name: alias.column,
                qualifier: alias.table,
                ..source.clone()
            });
        }

        let name = columns
            .iter()
            .find_map(|c| c.qualifier.clone())
            .unwrap_or_else(|| TableName::new("#SUBSET"));
        let mut info = TableInfo::new_composed(name, columns);
        info.set_read_only();

        Ok(SubsetColumnTable {
            id: TableId::next(),
            parent,
            info: Arc::new(info),
            mapping,
            schemes: SchemeCache::default(),
        })
    }

    pub fn mapping(&self) -> &[usize] {
        &self.mapping
    }

    fn parent_column(&self, column: usize) -> Result<usize> {
        self.mapping.get(column).copied().ok_or_else(|| {
            DbError::precondition("Column index out of range for subset")
                .with_field("column", column)
        })
    }
}

impl Table for SubsetColumnTable {
    fn table_id(&self) -> TableId {
        self.id
    }

    fn table_info(&self) -> &Arc<TableInfo> {
        &self.info
    }

    fn row_count(&self) -> usize {
        self.parent.row_count()
    }

    fn get_value(&self, column: usize, row: usize) -> Result<ScalarValue> {
        self.parent.get_value(self.parent_column(column)?, row)
    }

    fn row_enumerator(&self) -> RowEnumerator {
        self.parent.row_enumerator()
    }

    fn is_root(&self) -> bool {
        true
    }

    fn parents(&self) -> &[TableRef] {
        std::slice::from_ref(&self.parent)
    }

    fn rows_in_parent(&self, parent: usize, _rows: &mut [usize]) -> Result<()> {
        if parent != 0 {
            return Err(no_parent(self, parent));
        }
        Ok(())
    }

    fn scheme_for(
        &self,
        column: usize,
        original_column: usize,
        domain: &dyn Table,
    ) -> Result<SchemeRef> {
        let parent_column = self.parent_column(column)?;
        filter_scheme_for(
            self,
            &self.parent,
            &self.schemes,
            column,
            parent_column,
            original_column,
            domain,
        )
    }

    fn set_to_row_table_domain(
        &self,
        column: usize,
        rows: &mut [usize],
        ancestor: TableId,
    ) -> Result<()> {
        let parent_column = self.parent_column(column)?;
        filter_set_to_row_table_domain(self, &self.parent, parent_column, rows, ancestor)
    }

    fn variant_name(&self) -> &'static str {
        "SubsetColumnTable"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::column_scheme;
    use crate::table::collect_rows;
    use crate::table::memory::IndexKind;
    use crate::table::virtual_table::VirtualTable;
    use crate::testutil::{int_table, two_col_table};

    #[test]
    fn filter_passes_through() {
        let base: TableRef = int_table("t", IndexKind::Sorted, &[Some(3), Some(1)]);
        let filter = FilterTable::new(base.clone());
        assert_eq!(2, filter.row_count());
        assert_eq!(ScalarValue::from(1), filter.get_value(0, 1).unwrap());
        assert!(!filter.is_root());

        let scheme = column_scheme(&filter, 0).unwrap();
        assert_eq!(filter.table_id(), scheme.table_id());
        assert_eq!(vec![1, 0], scheme.select_all(&filter).unwrap());
    }

    #[test]
    fn reference_renames() {
        let base: TableRef = int_table("t", IndexKind::Sorted, &[Some(3)]);
        let reference = ReferenceTable::new(base, TableName::new("x"));
        assert!(reference.is_root());
        assert!(reference.table_info().is_read_only());
        assert_eq!(
            Some(0),
            reference
                .table_info()
                .find_column(&Variable::parse("x.a"), true)
                .unwrap()
        );
    }

    #[test]
    fn subset_maps_columns() {
        let base = two_col_table();
        let subset = SubsetColumnTable::try_new(
            base,
            vec![1, 0],
            vec![Variable::new("second"), Variable::new("first")],
        )
        .unwrap();

        let rows = collect_rows(&subset).unwrap();
        assert_eq!(
            vec![
                vec![ScalarValue::from("x"), ScalarValue::from(1)],
                vec![ScalarValue::from("y"), ScalarValue::from(2)],
                vec![ScalarValue::from("x"), ScalarValue::from(3)],
            ],
            rows
        );

        let scheme = column_scheme(&subset, 0).unwrap();
        assert_eq!(vec![0, 2, 1], scheme.select_all(&subset).unwrap());
    }

    #[test]
    fn scheme_routes_through_filter() {
        let base: TableRef = int_table("t", IndexKind::Sorted, &[Some(3), Some(1), Some(2)]);
        let filter: TableRef = Arc::new(FilterTable::new(base.clone()));
        let selected = VirtualTable::single(filter.clone(), vec![0, 2]);

        let scheme = column_scheme(&selected, 0).unwrap();
        assert_eq!(vec![1, 0], scheme.select_all(&selected).unwrap());
    }

    #[test]
    fn incorrect_routing_is_precondition() {
        let base: TableRef = int_table("t", IndexKind::Sorted, &[Some(3)]);
        let other: TableRef = int_table("o", IndexKind::Sorted, &[Some(3)]);
        let filter = FilterTable::new(base);
        let mut rows = vec![0];
        let err = filter
            .set_to_row_table_domain(0, &mut rows, other.table_id())
            .unwrap_err();
        assert!(err.is_precondition());
    }
}

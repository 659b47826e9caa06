//! Row provenance.
//!
//! Flattening walks composed tables down to their root tables, translating
//! row ids at each level, so a derived table's rows can be expressed as row
//! ids of the tables that actually hold the data.

use std::cmp::Ordering;
use std::sync::Arc;

use strata_error::{DbError, Result};

use super::virtual_table::VirtualTable;
use super::{Table, TableRef};
use crate::scalar::ScalarValue;

/// Sort `0..tuples.len()` by tuple and group equal tuples into runs.
///
/// Sorting is stable, so each run lists its members in ascending index
/// order.
pub(crate) fn tuple_runs<T>(tuples: &[T], cmp: impl Fn(&T, &T) -> Ordering) -> Vec<Vec<usize>> {
    let mut idx: Vec<usize> = (0..tuples.len()).collect();
    idx.sort_by(|&a, &b| cmp(&tuples[a], &tuples[b]));

    let mut runs: Vec<Vec<usize>> = Vec::new();
    for i in idx {
        match runs.last_mut() {
            Some(run) if cmp(&tuples[run[0]], &tuples[i]) == Ordering::Equal => run.push(i),
            _ => runs.push(vec![i]),
        }
    }
    runs
}

/// Indices of the first occurrence of each distinct tuple, ascending.
pub(crate) fn unique_indices<T>(tuples: &[T], cmp: impl Fn(&T, &T) -> Ordering) -> Vec<usize> {
    let mut keep: Vec<usize> = tuple_runs(tuples, cmp)
        .into_iter()
        .map(|run| run[0])
        .collect();
    keep.sort_unstable();
    keep
}

/// Lexicographic comparison of value tuples using the total sort order.
pub(crate) fn compare_value_tuples(a: &[ScalarValue], b: &[ScalarValue]) -> Ordering {
    for (a, b) in a.iter().zip(b) {
        match a.sort_cmp(b) {
            Ordering::Equal => (),
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

#[derive(Debug, Clone)]
pub struct RawTableElement {
    pub table: TableRef,
    pub rows: Vec<usize>,
}

/// Root tables and row ids making up a derived table.
///
/// Position `i` across every element's rows is one logical row.
#[derive(Debug, Clone, Default)]
pub struct RawTableInformation {
    elements: Vec<RawTableElement>,
}

impl RawTableInformation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, table: TableRef, rows: Vec<usize>) -> Result<()> {
        if let Some(first) = self.elements.first() {
            if first.rows.len() != rows.len() {
                return Err(DbError::precondition("Raw table rows differ in length")
                    .with_field("expected", first.rows.len())
                    .with_field("got", rows.len()));
            }
        }
        self.elements.push(RawTableElement { table, rows });
        Ok(())
    }

    pub fn elements(&self) -> &[RawTableElement] {
        &self.elements
    }

    pub fn row_count(&self) -> usize {
        self.elements.first().map(|e| e.rows.len()).unwrap_or(0)
    }

    /// Build a table over the root tables with these rows.
    pub fn to_table(&self) -> Result<TableRef> {
        let (tables, rows) = self
            .elements
            .iter()
            .map(|e| (e.table.clone(), e.rows.clone()))
            .unzip();
        Ok(Arc::new(VirtualTable::try_new(tables, rows)?))
    }

    fn row_tuples(&self) -> Vec<Vec<usize>> {
        (0..self.row_count())
            .map(|i| self.elements.iter().map(|e| e.rows[i]).collect())
            .collect()
    }

    fn retain_rows(&mut self, keep: &[usize]) {
        for element in &mut self.elements {
            element.rows = keep.iter().map(|&i| element.rows[i]).collect();
        }
    }

    /// Remove rows that reference the same root rows as an earlier row.
    pub fn remove_duplicates(&mut self) {
        let keep = unique_indices(&self.row_tuples(), |a, b| a.cmp(b));
        self.retain_rows(&keep);
    }

    /// Union of two flattenings over the same root tables, without
    /// duplicates.
    pub fn union(&self, other: &RawTableInformation) -> Result<RawTableInformation> {
        let same_roots = self.elements.len() == other.elements.len()
            && self
                .elements
                .iter()
                .zip(&other.elements)
                .all(|(a, b)| a.table.table_id() == b.table.table_id());
        if !same_roots {
            return Err(DbError::precondition(
                "Cannot union raw table information over different root tables",
            ));
        }

        let mut merged = self.clone();
        for (element, extra) in merged.elements.iter_mut().zip(&other.elements) {
            element.rows.extend_from_slice(&extra.rows);
        }
        merged.remove_duplicates();
        Ok(merged)
    }
}

/// Flatten a table into its root tables and row ids.
pub fn resolve_to_raw_table(table: &TableRef) -> Result<RawTableInformation> {
    let mut info = RawTableInformation::new();
    let rows = table.row_enumerator().to_vec();
    flatten(table, rows, &mut info)?;
    Ok(info)
}

fn flatten(table: &TableRef, rows: Vec<usize>, info: &mut RawTableInformation) -> Result<()> {
    if table.is_root() {
        return info.add(table.clone(), rows);
    }
    for (idx, parent) in table.parents().iter().enumerate() {
        let mut parent_rows = rows.clone();
        table.rows_in_parent(idx, &mut parent_rows)?;
        flatten(parent, parent_rows, info)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableName;
    use crate::table::collect_rows;
    use crate::table::filter::{FilterTable, ReferenceTable};
    use crate::table::joined::NaturallyJoinedTable;
    use crate::table::memory::IndexKind;
    use crate::testutil::{int_table, two_col_table};

    #[test]
    fn runs_group_equal_tuples() {
        let tuples = vec![3, 1, 3, 2, 1];
        let runs = tuple_runs(&tuples, |a, b| a.cmp(b));
        assert_eq!(vec![vec![1, 4], vec![3], vec![0, 2]], runs);
        assert_eq!(vec![0, 1, 3], unique_indices(&tuples, |a, b| a.cmp(b)));
    }

    #[test]
    fn flatten_stops_at_roots() {
        let base = two_col_table();
        let aliased: TableRef = Arc::new(ReferenceTable::new(base.clone(), TableName::new("x")));
        let filtered: TableRef = Arc::new(FilterTable::new(base.clone()));
        let joined: TableRef = Arc::new(NaturallyJoinedTable::new(filtered, aliased.clone()));
        let selected: TableRef = Arc::new(VirtualTable::single(joined.clone(), vec![7, 2, 4]));

        let raw = resolve_to_raw_table(&selected).unwrap();
        assert_eq!(2, raw.elements().len());
        assert_eq!(base.table_id(), raw.elements()[0].table.table_id());
        assert_eq!(aliased.table_id(), raw.elements()[1].table.table_id());
        assert_eq!(vec![2, 0, 1], raw.elements()[0].rows);
        assert_eq!(vec![1, 2, 1], raw.elements()[1].rows);

        // Rebuilt table reads the same values.
        let rebuilt = raw.to_table().unwrap();
        assert_eq!(
            collect_rows(selected.as_ref()).unwrap(),
            collect_rows(rebuilt.as_ref()).unwrap()
        );
    }

    #[test]
    fn union_removes_duplicates() {
        let base: TableRef = int_table("t", IndexKind::Sorted, &[Some(1), Some(2), Some(3)]);
        let a: TableRef = Arc::new(VirtualTable::single(base.clone(), vec![0, 2]));
        let b: TableRef = Arc::new(VirtualTable::single(base.clone(), vec![2, 1]));

        let a = resolve_to_raw_table(&a).unwrap();
        let b = resolve_to_raw_table(&b).unwrap();
        let merged = a.union(&b).unwrap();
        assert_eq!(vec![0, 2, 1], merged.elements()[0].rows);
    }

    #[test]
    fn union_over_different_roots_fails() {
        let a: TableRef = int_table("a", IndexKind::Sorted, &[Some(1)]);
        let b: TableRef = int_table("b", IndexKind::Sorted, &[Some(1)]);
        let a = resolve_to_raw_table(&a).unwrap();
        let b = resolve_to_raw_table(&b).unwrap();
        assert!(a.union(&b).unwrap_err().is_precondition());
    }

    #[test]
    fn add_rejects_mismatched_lengths() {
        let a: TableRef = int_table("a", IndexKind::Sorted, &[Some(1)]);
        let mut raw = RawTableInformation::new();
        raw.add(a.clone(), vec![0]).unwrap();
        assert!(raw.add(a, vec![0, 0]).is_err());
    }
}

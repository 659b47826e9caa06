use std::sync::Arc;

use strata_error::Result;

use super::insert::stable_order_by_values;
use super::range::SelectableRangeSet;
use super::{SchemeRef, SelectableScheme, check_bound};
use crate::table::{Table, TableId};

/// Scheme that answers every query with a linear scan of the column.
///
/// Has no preconditions on the table and holds no state beyond its binding.
#[derive(Debug, Clone, Copy)]
pub struct BlindSearch {
    table_id: TableId,
    column: usize,
}

impl BlindSearch {
    pub const fn new(table_id: TableId, column: usize) -> Self {
        BlindSearch { table_id, column }
    }
}

impl SelectableScheme for BlindSearch {
    fn table_id(&self) -> TableId {
        self.table_id
    }

    fn column(&self) -> usize {
        self.column
    }

    fn name(&self) -> &'static str {
        "BlindSearch"
    }

    fn select_range(&self, table: &dyn Table, ranges: &SelectableRangeSet) -> Result<Vec<usize>> {
        check_bound(self, table)?;
        if ranges.is_empty() {
            return Ok(Vec::new());
        }

        let full = ranges.is_full();
        let mut rows = Vec::new();
        let mut values = Vec::new();
        for row in table.row_enumerator().iter() {
            let val = table.get_value(self.column, row)?;
            if full || ranges.ranges().iter().any(|r| r.contains(&val)) {
                rows.push(row);
                values.push(val);
            }
        }

        Ok(stable_order_by_values(&rows, &values))
    }

    fn subset_scheme(
        &self,
        own_table: &dyn Table,
        subset: &dyn Table,
        subset_column: usize,
    ) -> Result<SchemeRef> {
        check_bound(self, own_table)?;
        Ok(Arc::new(BlindSearch::new(subset.table_id(), subset_column)))
    }

    fn rebind(&self, table_id: TableId, column: usize) -> SchemeRef {
        Arc::new(BlindSearch::new(table_id, column))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ComparisonOperator;
    use crate::scalar::ScalarValue;
    use crate::scheme::column_scheme;
    use crate::table::memory::IndexKind;
    use crate::testutil::int_table;

    #[test]
    fn scan_matches_ranges() {
        let table = int_table("t", IndexKind::Blind, &[Some(5), None, Some(2), Some(7), Some(2)]);
        let scheme = column_scheme(table.as_ref(), 0).unwrap();
        assert_eq!("BlindSearch", scheme.name());

        let ranges = SelectableRangeSet::full()
            .intersect(ComparisonOperator::Gt, &ScalarValue::from(1))
            .intersect(ComparisonOperator::Lt, &ScalarValue::from(6));
        assert_eq!(
            vec![2, 4, 0],
            scheme.select_range(table.as_ref(), &ranges).unwrap()
        );
        assert_eq!(
            vec![1],
            scheme
                .select_range(table.as_ref(), &SelectableRangeSet::nulls())
                .unwrap()
        );
        assert!(
            scheme
                .select_range(table.as_ref(), &SelectableRangeSet::empty())
                .unwrap()
                .is_empty()
        );
    }
}

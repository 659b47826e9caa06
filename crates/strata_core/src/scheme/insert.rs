use std::cmp::Ordering;
use std::sync::{Arc, OnceLock};

use hashbrown::HashMap;
use strata_error::{DbError, Result};

use super::range::{RangePoint, SelectableRangeSet};
use super::{SchemeRef, SelectableScheme, check_bound};
use crate::scalar::ScalarValue;
use crate::table::{Table, TableId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResult {
    /// Position of the matching element.
    Found(usize),
    /// Position the key would be inserted at.
    NotFound(usize),
}

/// Binary search for the first element equal to the key.
///
/// `cmp_at(i)` compares the element at position `i` against the key.
pub fn search_first(
    len: usize,
    cmp_at: impl Fn(usize) -> Result<Ordering>,
) -> Result<SearchResult> {
    if len == 0 {
        return Ok(SearchResult::NotFound(0));
    }

    let mut low = 0;
    let mut high = len - 1;
    loop {
        if high - low <= 2 {
            for i in low..=high {
                match cmp_at(i)? {
                    Ordering::Equal => return Ok(SearchResult::Found(i)),
                    Ordering::Greater => return Ok(SearchResult::NotFound(i)),
                    Ordering::Less => (),
                }
            }
            return Ok(SearchResult::NotFound(high + 1));
        }

        let mid = (low + high) / 2;
        match cmp_at(mid)? {
            Ordering::Less => low = mid + 1,
            Ordering::Greater => high = mid - 1,
            // Keep searching left for the first occurrence.
            Ordering::Equal => high = mid,
        }
    }
}

/// Binary search for the last element equal to the key.
pub fn search_last(
    len: usize,
    cmp_at: impl Fn(usize) -> Result<Ordering>,
) -> Result<SearchResult> {
    if len == 0 {
        return Ok(SearchResult::NotFound(0));
    }

    let mut low = 0;
    let mut high = len - 1;
    loop {
        if high - low <= 2 {
            for i in (low..=high).rev() {
                match cmp_at(i)? {
                    Ordering::Equal => return Ok(SearchResult::Found(i)),
                    Ordering::Less => return Ok(SearchResult::NotFound(i + 1)),
                    Ordering::Greater => (),
                }
            }
            return Ok(SearchResult::NotFound(low));
        }

        let mid = (low + high) / 2;
        match cmp_at(mid)? {
            Ordering::Less => low = mid + 1,
            Ordering::Greater => high = mid - 1,
            // Keep searching right for the last occurrence.
            Ordering::Equal => low = mid,
        }
    }
}

/// Scheme backed by a list of rows kept in value order.
#[derive(Debug)]
pub struct InsertSearch {
    table_id: TableId,
    column: usize,
    order: Arc<[usize]>,
    /// Row to run of equal values. Built on first subset request.
    runs: OnceLock<HashMap<usize, usize>>,
}

impl InsertSearch {
    /// Create a scheme from an already sorted row order.
    pub fn new(table_id: TableId, column: usize, order: impl Into<Arc<[usize]>>) -> Self {
        InsertSearch {
            table_id,
            column,
            order: order.into(),
            runs: OnceLock::new(),
        }
    }

    /// Build a scheme by sorting all rows in the table.
    pub fn build(table: &dyn Table, column: usize) -> Result<Self> {
        let rows = table.row_enumerator().to_vec();
        let values = rows
            .iter()
            .map(|&row| table.get_value(column, row))
            .collect::<Result<Vec<_>>>()?;
        let order = stable_order_by_values(&rows, &values);
        Ok(Self::new(table.table_id(), column, order))
    }

    pub fn order(&self) -> &[usize] {
        &self.order
    }

    fn value_at(&self, table: &dyn Table, pos: usize) -> Result<ScalarValue> {
        table.get_value(self.column, self.order[pos])
    }

    /// Number of rows in the order that sort strictly before `point`.
    fn position(&self, table: &dyn Table, point: &RangePoint) -> Result<usize> {
        let len = self.order.len();
        let pos = match point {
            RangePoint::NegInfinity => 0,
            RangePoint::PosInfinity => len,
            RangePoint::Before(v) | RangePoint::At(v) => {
                match search_first(len, |i| Ok(self.value_at(table, i)?.sort_cmp(v)))? {
                    SearchResult::Found(i) | SearchResult::NotFound(i) => i,
                }
            }
            RangePoint::After(v) => {
                match search_last(len, |i| Ok(self.value_at(table, i)?.sort_cmp(v)))? {
                    SearchResult::Found(i) => i + 1,
                    SearchResult::NotFound(i) => i,
                }
            }
        };
        Ok(pos)
    }

    fn runs(&self, table: &dyn Table) -> Result<&HashMap<usize, usize>> {
        if let Some(runs) = self.runs.get() {
            return Ok(runs);
        }

        let mut runs = HashMap::with_capacity(self.order.len());
        let mut run = 0;
        let mut prev: Option<ScalarValue> = None;
        for &row in self.order.iter() {
            let val = table.get_value(self.column, row)?;
            if let Some(prev) = &prev {
                if prev.sort_cmp(&val) != Ordering::Equal {
                    run += 1;
                }
            }
            runs.insert(row, run);
            prev = Some(val);
        }

        // Racing initializers compute identical maps.
        Ok(self.runs.get_or_init(|| runs))
    }
}

impl SelectableScheme for InsertSearch {
    fn table_id(&self) -> TableId {
        self.table_id
    }

    fn column(&self) -> usize {
        self.column
    }

    fn name(&self) -> &'static str {
        "InsertSearch"
    }

    fn select_range(&self, table: &dyn Table, ranges: &SelectableRangeSet) -> Result<Vec<usize>> {
        check_bound(self, table)?;
        if ranges.is_full() {
            return Ok(self.order.to_vec());
        }

        let mut rows = Vec::new();
        for range in ranges.ranges() {
            let start = self.position(table, &range.start_point())?;
            let end = self.position(table, &range.end_point())?;
            if start < end {
                rows.extend_from_slice(&self.order[start..end]);
            }
        }
        Ok(rows)
    }

    fn subset_scheme(
        &self,
        own_table: &dyn Table,
        subset: &dyn Table,
        subset_column: usize,
    ) -> Result<SchemeRef> {
        check_bound(self, own_table)?;

        let subset_rows = subset.row_enumerator().to_vec();
        let mut mapped = subset_rows.clone();
        subset.set_to_row_table_domain(subset_column, &mut mapped, self.table_id)?;

        // Order subset rows by the run of their ancestor row. Equal values
        // share a run, so ties keep the subset's row order.
        let runs = self.runs(own_table)?;
        let mut keyed = Vec::with_capacity(subset_rows.len());
        for (&row, ancestor_row) in subset_rows.iter().zip(mapped) {
            let run = match runs.get(&ancestor_row) {
                Some(run) => *run,
                None => {
                    return Err(DbError::precondition(
                        "Subset row not present in ancestor scheme",
                    )
                    .with_field("ancestor_row", ancestor_row));
                }
            };
            keyed.push((run, row));
        }
        keyed.sort_by_key(|(run, _)| *run);

        let order: Vec<_> = keyed.into_iter().map(|(_, row)| row).collect();
        Ok(Arc::new(InsertSearch::new(
            subset.table_id(),
            subset_column,
            order,
        )))
    }

    fn rebind(&self, table_id: TableId, column: usize) -> SchemeRef {
        Arc::new(InsertSearch::new(table_id, column, self.order.clone()))
    }
}

/// Rows stably sorted by their corresponding values.
pub(crate) fn stable_order_by_values(rows: &[usize], values: &[ScalarValue]) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..rows.len()).collect();
    idx.sort_by(|&a, &b| values[a].sort_cmp(&values[b]));
    idx.into_iter().map(|i| rows[i]).collect()
}

//! Cross-table cache of computed cells.

use std::fmt::Debug;

use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::trace;

use crate::scalar::ScalarValue;

/// Cache of computed cells keyed by `(table id, row, column)`.
///
/// Only function tables write to the cache. Their ids live in a reserved
/// range so keys never collide with other tables.
pub trait CellCache: Debug + Send + Sync {
    fn get(&self, table_id: u64, row: usize, column: usize) -> Option<ScalarValue>;
    fn set(&self, table_id: u64, row: usize, column: usize, value: ScalarValue);
}

/// Bounded in-memory cell cache. Cleared when full.
#[derive(Debug)]
pub struct MemoryCellCache {
    capacity: usize,
    cells: Mutex<HashMap<(u64, usize, usize), ScalarValue>>,
}

impl MemoryCellCache {
    pub fn new(capacity: usize) -> Self {
        MemoryCellCache {
            capacity,
            cells: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.cells.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CellCache for MemoryCellCache {
    fn get(&self, table_id: u64, row: usize, column: usize) -> Option<ScalarValue> {
        self.cells.lock().get(&(table_id, row, column)).cloned()
    }

    fn set(&self, table_id: u64, row: usize, column: usize, value: ScalarValue) {
        if self.capacity == 0 {
            return;
        }
        let mut cells = self.cells.lock();
        if cells.len() >= self.capacity {
            trace!(capacity = self.capacity, "clearing full cell cache");
            cells.clear();
        }
        cells.insert((table_id, row, column), value);
    }
}

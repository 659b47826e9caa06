use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use strata_error::{DbError, Result};

use crate::cache::{CellCache, MemoryCellCache};
use crate::catalog::Catalog;
use crate::config::session::SessionConfig;
use crate::scalar::ScalarValue;
use crate::schema::Variable;
use crate::table::TableRef;

/// State shared by every evaluation of one query.
///
/// Cheap to clone. Evaluating a correlated sub-query clones the context with
/// a new frame of bound outer values pushed.
#[derive(Debug, Clone)]
pub struct QueryContext {
    shared: Arc<ContextShared>,
    correlated: Option<Arc<CorrelatedFrame>>,
    /// Results of cache points whose plans read an enclosing row, by cache
    /// id. Each correlated frame gets its own map since results computed
    /// under one frame's bindings aren't valid under another's.
    frame_cache_points: Arc<Mutex<HashMap<usize, TableRef>>>,
}

#[derive(Debug)]
struct ContextShared {
    catalog: Arc<dyn Catalog>,
    cell_cache: Arc<dyn CellCache>,
    config: SessionConfig,
    /// Results of cache points that don't depend on any enclosing row. Shared
    /// by every frame.
    cache_points: Mutex<HashMap<usize, TableRef>>,
}

/// Values of an enclosing query's current row.
#[derive(Debug)]
struct CorrelatedFrame {
    bindings: Vec<(Variable, ScalarValue)>,
    parent: Option<Arc<CorrelatedFrame>>,
}

impl QueryContext {
    /// Create a context with a cell cache sized from the config.
    pub fn new(catalog: Arc<dyn Catalog>, config: SessionConfig) -> Self {
        let cell_cache = Arc::new(MemoryCellCache::new(config.cell_cache_capacity as usize));
        Self::with_cell_cache(catalog, cell_cache, config)
    }

    pub fn with_cell_cache(
        catalog: Arc<dyn Catalog>,
        cell_cache: Arc<dyn CellCache>,
        config: SessionConfig,
    ) -> Self {
        QueryContext {
            shared: Arc::new(ContextShared {
                catalog,
                cell_cache,
                config,
                cache_points: Mutex::new(HashMap::new()),
            }),
            correlated: None,
            frame_cache_points: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.shared.catalog
    }

    pub fn cell_cache(&self) -> &Arc<dyn CellCache> {
        &self.shared.cell_cache
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Context for evaluating a sub-query with `bindings` as the values of
    /// the directly enclosing query's row.
    pub fn with_frame(&self, bindings: Vec<(Variable, ScalarValue)>) -> QueryContext {
        QueryContext {
            shared: self.shared.clone(),
            correlated: Some(Arc::new(CorrelatedFrame {
                bindings,
                parent: self.correlated.clone(),
            })),
            frame_cache_points: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Value of a variable bound `level` query levels up.
    pub fn resolve_correlated(&self, var: &Variable, level: usize) -> Result<ScalarValue> {
        let missing = || {
            DbError::precondition(format!("Correlated variable '{var}' is not bound"))
                .with_field("level", level)
        };
        if level == 0 {
            return Err(missing());
        }

        let mut frame = self.correlated.as_ref().ok_or_else(missing)?;
        for _ in 1..level {
            frame = frame.parent.as_ref().ok_or_else(missing)?;
        }
        frame
            .bindings
            .iter()
            .find(|(bound, _)| bound == var)
            .map(|(_, value)| value.clone())
            .ok_or_else(missing)
    }

    fn cache_points(&self, frame_local: bool) -> &Mutex<HashMap<usize, TableRef>> {
        if frame_local {
            &self.frame_cache_points
        } else {
            &self.shared.cache_points
        }
    }

    /// Cached result of a cache point. `frame_local` must be set when the
    /// cached plan reads a row of an enclosing query.
    pub fn cached_table(&self, id: usize, frame_local: bool) -> Option<TableRef> {
        self.cache_points(frame_local).lock().get(&id).cloned()
    }

    pub fn cache_table(&self, id: usize, table: TableRef, frame_local: bool) {
        self.cache_points(frame_local).lock().insert(id, table);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{test_context, two_col_table};

    #[test]
    fn correlated_levels() {
        let ctx = test_context();
        let a = Variable::parse("o.a");
        let b = Variable::parse("p.b");

        let outer = ctx.with_frame(vec![(b.clone(), 2.into())]);
        let inner = outer.with_frame(vec![(a.clone(), 1.into())]);

        assert_eq!(ScalarValue::from(1), inner.resolve_correlated(&a, 1).unwrap());
        assert_eq!(ScalarValue::from(2), inner.resolve_correlated(&b, 2).unwrap());
        assert!(inner.resolve_correlated(&b, 1).unwrap_err().is_precondition());
        assert!(inner.resolve_correlated(&a, 3).is_err());
        assert!(ctx.resolve_correlated(&a, 1).is_err());
    }

    #[test]
    fn cache_points_scoped_to_frame() {
        let ctx = test_context();
        let table = two_col_table();
        ctx.cache_table(1, table.clone(), true);
        assert!(ctx.clone().cached_table(1, true).is_some());
        let framed = ctx.with_frame(Vec::new());
        assert!(framed.cached_table(1, true).is_none());
    }

    #[test]
    fn uncorrelated_cache_points_shared_across_frames() {
        let ctx = test_context();
        let framed = ctx.with_frame(vec![(Variable::parse("o.a"), 1.into())]);
        framed.cache_table(2, two_col_table(), false);

        let sibling = ctx.with_frame(vec![(Variable::parse("o.a"), 2.into())]);
        assert!(sibling.cached_table(2, false).is_some());
        assert!(ctx.cached_table(2, false).is_some());
        assert!(sibling.cached_table(2, true).is_none());
    }
}

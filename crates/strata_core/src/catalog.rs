//! Table and view lookup.

use std::fmt::Debug;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;
use strata_error::{DbError, Result};
use tracing::debug;

use crate::planner::ast::TableSelectExpression;
use crate::schema::{TableInfo, TableName};
use crate::table::{Table, TableRef};
use crate::table::memory::{IndexKind, MemoryTable};

/// Source of tables and views for planning and evaluation.
pub trait Catalog: Debug + Send + Sync {
    fn get_table(&self, name: &TableName) -> Option<TableRef>;

    fn table_exists(&self, name: &TableName) -> bool {
        self.get_table(name).is_some()
    }

    fn get_table_info(&self, name: &TableName) -> Option<Arc<TableInfo>> {
        self.get_table(name).map(|t| t.table_info().clone())
    }

    /// Query defining a view.
    fn get_view_plan(&self, name: &TableName) -> Option<TableSelectExpression>;

    /// Names of all tables and views.
    fn table_names(&self) -> Vec<TableName>;
}

#[derive(Debug, Clone)]
enum CatalogEntry {
    Table(Arc<MemoryTable>),
    View {
        name: TableName,
        query: TableSelectExpression,
    },
}

impl CatalogEntry {
    fn name(&self) -> &TableName {
        match self {
            Self::Table(table) => table.table_info().name(),
            Self::View { name, .. } => name,
        }
    }
}

/// Catalog holding tables and views in memory.
///
/// Names are matched case-insensitively. Two entries may not share a name,
/// even in different schemas.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    entries: RwLock<HashMap<String, CatalogEntry>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table with every column sorted.
    pub fn create_table(&self, info: TableInfo) -> Result<Arc<MemoryTable>> {
        let table = Arc::new(MemoryTable::new(info));
        self.insert(CatalogEntry::Table(table.clone()))?;
        Ok(table)
    }

    pub fn create_table_with_indexes(
        &self,
        info: TableInfo,
        indexes: Vec<IndexKind>,
    ) -> Result<Arc<MemoryTable>> {
        let table = Arc::new(MemoryTable::with_indexes(info, indexes));
        self.insert(CatalogEntry::Table(table.clone()))?;
        Ok(table)
    }

    pub fn create_view(&self, name: TableName, query: TableSelectExpression) -> Result<()> {
        self.insert(CatalogEntry::View { name, query })
    }

    /// Drop a table or view.
    pub fn drop_entry(&self, name: &TableName) -> Result<()> {
        let mut entries = self.entries.write();
        let key = entry_key(name);
        match entries.get(&key) {
            Some(ent) if ent.name().matches(name, true) => {
                entries.remove(&key);
                debug!(%name, "dropped catalog entry");
                Ok(())
            }
            _ => Err(DbError::new(format!("Missing table or view '{name}'"))),
        }
    }

    fn insert(&self, entry: CatalogEntry) -> Result<()> {
        let name = entry.name().clone();
        let mut entries = self.entries.write();
        let key = entry_key(&name);
        if entries.contains_key(&key) {
            return Err(DbError::new(format!("Duplicate table or view name '{name}'")));
        }
        entries.insert(key, entry);
        debug!(%name, "created catalog entry");
        Ok(())
    }

    fn get_entry(&self, name: &TableName) -> Option<CatalogEntry> {
        let entries = self.entries.read();
        entries
            .get(&entry_key(name))
            .filter(|ent| ent.name().matches(name, true))
            .cloned()
    }
}

fn entry_key(name: &TableName) -> String {
    name.name.to_lowercase()
}

impl Catalog for MemoryCatalog {
    fn get_table(&self, name: &TableName) -> Option<TableRef> {
        match self.get_entry(name)? {
            CatalogEntry::Table(table) => Some(table as TableRef),
            CatalogEntry::View { .. } => None,
        }
    }

    fn get_view_plan(&self, name: &TableName) -> Option<TableSelectExpression> {
        match self.get_entry(name)? {
            CatalogEntry::View { query, .. } => Some(query),
            CatalogEntry::Table(_) => None,
        }
    }

    fn table_names(&self) -> Vec<TableName> {
        let mut names: Vec<_> = self
            .entries
            .read()
            .values()
            .map(|ent| ent.name().clone())
            .collect();
        names.sort_by(|a, b| a.name.cmp(&b.name));
        names
    }
}

/// Find the candidate most similar to `name`, if any is similar enough.
pub fn find_similar<'a>(candidates: impl IntoIterator<Item = &'a str>, name: &str) -> Option<String> {
    let mut similar: Option<SimilarEntry> = None;
    for candidate in candidates {
        SimilarEntry::maybe_update(&mut similar, candidate, name);
    }
    similar.map(|s| s.entry)
}

#[derive(Debug)]
struct SimilarEntry {
    score: f64,
    entry: String,
}

impl SimilarEntry {
    /// Maybe updates `current` with a new entry if the new entry scores higher
    /// in similarity with `name`.
    fn maybe_update(current: &mut Option<Self>, entry: &str, name: &str) {
        const SIMILARITY_THRESHOLD: f64 = 0.7;

        let score = strsim::jaro(&entry.to_lowercase(), &name.to_lowercase());
        if score > SIMILARITY_THRESHOLD {
            match current {
                Some(existing) => {
                    if score > existing.score {
                        *current = Some(SimilarEntry {
                            score,
                            entry: entry.to_string(),
                        })
                    }
                }
                None => {
                    *current = Some(SimilarEntry {
                        score,
                        entry: entry.to_string(),
                    })
                }
            }
        }
    }
}

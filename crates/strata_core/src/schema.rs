use std::fmt;
use std::sync::{Arc, OnceLock};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use strata_error::{DbError, Result};

use crate::scalar::ScalarValue;
use crate::scalar::datatype::DataType;

/// A possibly schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableName {
    pub schema: Option<String>,
    pub name: String,
}

impl TableName {
    pub fn new(name: impl Into<String>) -> Self {
        TableName {
            schema: None,
            name: name.into(),
        }
    }

    pub fn with_schema(schema: impl Into<String>, name: impl Into<String>) -> Self {
        TableName {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }

    /// Check if `other` refers to this name.
    ///
    /// A schema on `other` must match the schema on this name. A missing
    /// schema on `other` matches any schema.
    pub fn matches(&self, other: &TableName, ignore_case: bool) -> bool {
        if !ident_eq(&self.name, &other.name, ignore_case) {
            return false;
        }
        match (&self.schema, &other.schema) {
            (_, None) => true,
            (Some(a), Some(b)) => ident_eq(a, b, ignore_case),
            (None, Some(_)) => false,
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A reference to a column, optionally qualified with a table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variable {
    pub table: Option<TableName>,
    pub column: String,
}

impl Variable {
    pub fn new(column: impl Into<String>) -> Self {
        Variable {
            table: None,
            column: column.into(),
        }
    }

    pub fn qualified(table: TableName, column: impl Into<String>) -> Self {
        Variable {
            table: Some(table),
            column: column.into(),
        }
    }

    /// Parse a dotted name like `t.a` or `s.t.a`.
    pub fn parse(s: &str) -> Self {
        let parts: Vec<_> = s.rsplitn(3, '.').collect();
        match parts.as_slice() {
            [col] => Variable::new(*col),
            [col, table] => Variable::qualified(TableName::new(*table), *col),
            [col, table, schema] => {
                Variable::qualified(TableName::with_schema(*schema, *table), *col)
            }
            _ => Variable::new(s),
        }
    }

    pub(crate) fn matches(&self, other: &Variable, ignore_case: bool) -> bool {
        if !ident_eq(&self.column, &other.column, ignore_case) {
            return false;
        }
        match (&self.table, &other.table) {
            (_, None) => true,
            (Some(a), Some(b)) => a.matches(b, ignore_case),
            (None, Some(_)) => false,
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{table}.{}", self.column),
            None => write!(f, "{}", self.column),
        }
    }
}

pub(crate) fn ident_eq(a: &str, b: &str, ignore_case: bool) -> bool {
    if ignore_case {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Table this column is exposed under. Used when resolving qualified
    /// variables against composed schemas.
    pub qualifier: Option<TableName>,
    pub datatype: DataType,
    pub nullable: bool,
    pub default: Option<ScalarValue>,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, datatype: DataType) -> Self {
        ColumnInfo {
            name: name.into(),
            qualifier: None,
            datatype,
            nullable: true,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, default: ScalarValue) -> Self {
        self.default = Some(default);
        self
    }

    pub fn variable(&self) -> Variable {
        Variable {
            table: self.qualifier.clone(),
            column: self.name.clone(),
        }
    }
}

/// Ordered column schema for a table.
#[derive(Debug)]
pub struct TableInfo {
    name: TableName,
    columns: Vec<ColumnInfo>,
    read_only: bool,
    /// Lowercased column name to column indices.
    lookup: OnceLock<HashMap<String, Vec<usize>>>,
}

impl TableInfo {
    /// Create a new table schema. Columns without a qualifier are qualified
    /// with the table name.
    pub fn new(name: TableName, columns: impl IntoIterator<Item = ColumnInfo>) -> Self {
        let columns = columns
            .into_iter()
            .map(|mut c| {
                if c.qualifier.is_none() {
                    c.qualifier = Some(name.clone());
                }
                c
            })
            .collect();
        TableInfo {
            name,
            columns,
            read_only: false,
            lookup: OnceLock::new(),
        }
    }

    /// Create a schema that keeps each column's existing qualifier.
    pub fn new_composed(name: TableName, columns: Vec<ColumnInfo>) -> Self {
        TableInfo {
            name,
            columns,
            read_only: false,
            lookup: OnceLock::new(),
        }
    }

    /// Copy of this schema with every column requalified under `alias`.
    pub fn aliased(&self, alias: TableName) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|c| ColumnInfo {
                qualifier: Some(alias.clone()),
                ..c.clone()
            })
            .collect();
        TableInfo {
            name: alias,
            columns,
            read_only: true,
            lookup: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &TableName {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn column(&self, idx: usize) -> Result<&ColumnInfo> {
        self.columns.get(idx).ok_or_else(|| {
            DbError::precondition("Column index out of range")
                .with_field("table", &self.name)
                .with_field("column", idx)
                .with_field("column_count", self.columns.len())
        })
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn set_read_only(&mut self) {
        self.read_only = true;
    }

    pub fn add_column(&mut self, mut column: ColumnInfo) -> Result<()> {
        if self.read_only {
            return Err(DbError::precondition("Cannot modify a read-only table schema")
                .with_field("table", &self.name));
        }
        if column.qualifier.is_none() {
            column.qualifier = Some(self.name.clone());
        }
        if self
            .columns
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(&column.name) && c.qualifier == column.qualifier)
        {
            return Err(DbError::new(format!(
                "Duplicate column name '{}' in table '{}'",
                column.name, self.name
            )));
        }
        self.columns.push(column);
        self.lookup = OnceLock::new();
        Ok(())
    }

    fn lookup(&self) -> &HashMap<String, Vec<usize>> {
        self.lookup.get_or_init(|| {
            let mut map: HashMap<String, Vec<usize>> = HashMap::new();
            for (idx, col) in self.columns.iter().enumerate() {
                map.entry(col.name.to_lowercase()).or_default().push(idx);
            }
            map
        })
    }

    /// Find the index of the column `var` refers to.
    ///
    /// Returns `Ok(None)` if no column matches. Errors if more than one
    /// column matches.
    pub fn find_column(&self, var: &Variable, ignore_case: bool) -> Result<Option<usize>> {
        let candidates = match self.lookup().get(&var.column.to_lowercase()) {
            Some(candidates) => candidates,
            None => return Ok(None),
        };

        let mut found = None;
        for &idx in candidates {
            if self.columns[idx].variable().matches(var, ignore_case) {
                if found.is_some() {
                    return Err(DbError::planning(format!(
                        "Ambiguous column reference '{var}'"
                    )));
                }
                found = Some(idx);
            }
        }
        Ok(found)
    }

    /// Like `find_column`, but errors if the column doesn't exist.
    pub fn resolve_column(&self, var: &Variable, ignore_case: bool) -> Result<usize> {
        self.find_column(var, ignore_case)?.ok_or_else(|| {
            DbError::precondition(format!("Missing column '{var}'"))
                .with_field("table", &self.name)
        })
    }
}

/// Schema of a table composed of several parent tables.
///
/// Routing tables are computed once on construction.
#[derive(Debug)]
pub struct JoinedTableInfo {
    info: Arc<TableInfo>,
    table_indexes: Vec<usize>,
    column_indexes: Vec<usize>,
}

impl JoinedTableInfo {
    pub fn new(infos: &[&TableInfo]) -> Self {
        let mut columns = Vec::new();
        let mut table_indexes = Vec::new();
        let mut column_indexes = Vec::new();

        for (table_idx, info) in infos.iter().enumerate() {
            for (col_idx, col) in info.columns().iter().enumerate() {
                columns.push(col.clone());
                table_indexes.push(table_idx);
                column_indexes.push(col_idx);
            }
        }

        let mut info = TableInfo::new_composed(TableName::new("#JOINED"), columns);
        info.set_read_only();

        JoinedTableInfo {
            info: Arc::new(info),
            table_indexes,
            column_indexes,
        }
    }

    pub fn table_info(&self) -> &Arc<TableInfo> {
        &self.info
    }

    /// Replace the exposed schema, keeping the routing tables. The new
    /// schema must have the same columns in the same order.
    pub fn with_table_info(self, info: TableInfo) -> Self {
        debug_assert_eq!(info.column_count(), self.table_indexes.len());
        JoinedTableInfo {
            info: Arc::new(info),
            ..self
        }
    }

    /// Index of the parent table holding `column`.
    pub fn table_of(&self, column: usize) -> Result<usize> {
        self.table_indexes.get(column).copied().ok_or_else(|| {
            DbError::precondition("Column index out of range for joined table")
                .with_field("column", column)
        })
    }

    /// Column index within the parent table for `column`.
    pub fn column_in_table(&self, column: usize) -> Result<usize> {
        self.column_indexes.get(column).copied().ok_or_else(|| {
            DbError::precondition("Column index out of range for joined table")
                .with_field("column", column)
        })
    }

    pub fn column_count(&self) -> usize {
        self.table_indexes.len()
    }
}

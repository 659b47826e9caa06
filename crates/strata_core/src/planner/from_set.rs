//! Naming scope of a single query level.

use strata_error::{DbError, Result};

use crate::catalog::find_similar;
use crate::expr::{CorrelatedVariable, Expression};
use crate::plan::PlanNode;
use crate::scalar::datatype::DataType;
use crate::schema::{ColumnInfo, TableName, Variable, ident_eq};

/// A table or sub-query visible in FROM.
#[derive(Debug, Clone)]
pub struct FromSource {
    /// Name the source is exposed under, the alias if one was given.
    pub name: TableName,
    /// Columns qualified with `name`.
    pub columns: Vec<ColumnInfo>,
    pub plan: PlanNode,
}

impl FromSource {
    pub fn new(name: TableName, columns: &[ColumnInfo], plan: PlanNode) -> Self {
        let columns = columns
            .iter()
            .map(|c| ColumnInfo {
                qualifier: Some(name.clone()),
                ..c.clone()
            })
            .collect();
        FromSource {
            name,
            columns,
            plan,
        }
    }
}

/// Sources and select aliases of one query level, linked to the enclosing
/// level for correlated references.
#[derive(Debug)]
pub struct FromSet<'p> {
    sources: Vec<FromSource>,
    aliases: Vec<(String, Expression)>,
    parent: Option<&'p FromSet<'p>>,
    ignore_case: bool,
}

impl<'p> FromSet<'p> {
    pub fn new(parent: Option<&'p FromSet<'p>>, ignore_case: bool) -> Self {
        FromSet {
            sources: Vec::new(),
            aliases: Vec::new(),
            parent,
            ignore_case,
        }
    }

    /// Scope of the enclosing query.
    pub fn parent(&self) -> Option<&'p FromSet<'p>> {
        self.parent
    }

    pub fn ignore_case(&self) -> bool {
        self.ignore_case
    }

    pub fn sources(&self) -> &[FromSource] {
        &self.sources
    }

    pub fn add_source(&mut self, source: FromSource) -> Result<()> {
        if self
            .sources
            .iter()
            .any(|s| s.name.matches(&source.name, self.ignore_case))
        {
            return Err(DbError::planning(format!(
                "Duplicate table name '{}' in FROM",
                source.name
            )));
        }
        self.sources.push(source);
        Ok(())
    }

    /// Make a select column's alias resolvable from ORDER BY and HAVING.
    pub fn add_alias(&mut self, name: impl Into<String>, expr: Expression) {
        self.aliases.push((name.into(), expr));
    }

    /// Expression behind a select alias.
    ///
    /// Errors if the alias names more than one distinct expression.
    pub fn find_alias(&self, name: &str) -> Result<Option<&Expression>> {
        let mut found: Option<&Expression> = None;
        for (alias, expr) in &self.aliases {
            if !ident_eq(alias, name, self.ignore_case) {
                continue;
            }
            match found {
                Some(existing) if existing != expr => {
                    return Err(DbError::planning(format!(
                        "Ambiguous reference to alias '{name}'"
                    )));
                }
                _ => found = Some(expr),
            }
        }
        Ok(found)
    }

    /// Columns a glob expands to. `None` expands every source.
    pub fn glob_columns(&self, table: Option<&TableName>) -> Result<Vec<ColumnInfo>> {
        match table {
            None => Ok(self
                .sources
                .iter()
                .flat_map(|s| s.columns.iter().cloned())
                .collect()),
            Some(table) => {
                let source = self
                    .sources
                    .iter()
                    .find(|s| s.name.matches(table, self.ignore_case))
                    .ok_or_else(|| {
                        DbError::planning(format!("Table '{table}' not found in FROM"))
                    })?;
                Ok(source.columns.clone())
            }
        }
    }

    /// Index of the source exposing the fully qualified `var`.
    pub fn source_index(&self, var: &Variable) -> Option<usize> {
        self.sources
            .iter()
            .position(|s| s.columns.iter().any(|c| c.variable() == *var))
    }

    fn find_local(&self, var: &Variable) -> Result<Option<&ColumnInfo>> {
        let mut found = None;
        for column in self.sources.iter().flat_map(|s| s.columns.iter()) {
            if column.variable().matches(var, self.ignore_case) {
                if found.is_some() {
                    return Err(DbError::planning(format!(
                        "Ambiguous column reference '{var}'"
                    )));
                }
                found = Some(column);
            }
        }
        Ok(found)
    }

    /// Resolve a column reference to a fully qualified column of this level
    /// or a correlated reference into an enclosing level.
    pub fn resolve(&self, var: &Variable) -> Result<Expression> {
        if let Some(column) = self.find_local(var)? {
            return Ok(Expression::Column(column.variable()));
        }

        let mut level = 1;
        let mut scope = self.parent;
        while let Some(set) = scope {
            if let Some(column) = set.find_local(var)? {
                return Ok(Expression::Correlated(CorrelatedVariable {
                    var: column.variable(),
                    level,
                    datatype: column.datatype,
                }));
            }
            level += 1;
            scope = set.parent;
        }

        let mut msg = format!("Column '{var}' not found");
        if let Some(similar) = self.similar_column(&var.column) {
            msg.push_str(&format!(", did you mean '{similar}'?"));
        }
        Err(DbError::planning(msg))
    }

    /// Type of a column resolved at this level.
    pub fn datatype_of(&self, var: &Variable) -> Result<DataType> {
        self.find_local(var)?
            .map(|c| c.datatype)
            .ok_or_else(|| DbError::planning(format!("Column '{var}' not found")))
    }

    fn similar_column(&self, name: &str) -> Option<String> {
        let mut names = Vec::new();
        let mut scope = Some(self);
        while let Some(set) = scope {
            names.extend(
                set.sources
                    .iter()
                    .flat_map(|s| s.columns.iter().map(|c| c.name.as_str())),
            );
            scope = set.parent;
        }
        find_similar(names, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(name: &str, columns: &[&str]) -> FromSource {
        let columns: Vec<_> = columns
            .iter()
            .map(|c| ColumnInfo::new(*c, DataType::Int32))
            .collect();
        FromSource::new(
            TableName::new(name),
            &columns,
            PlanNode::FetchTable {
                name: TableName::new(name),
                alias: None,
            },
        )
    }

    #[test]
    fn resolves_unqualified_to_source() {
        let mut set = FromSet::new(None, true);
        set.add_source(source("t", &["a", "b"])).unwrap();
        set.add_source(source("u", &["c"])).unwrap();

        assert_eq!(Expression::col("t.b"), set.resolve(&Variable::new("B")).unwrap());
        assert_eq!(Expression::col("u.c"), set.resolve(&Variable::parse("u.c")).unwrap());
        assert_eq!(Some(1), set.source_index(&Variable::parse("u.c")));
    }

    #[test]
    fn ambiguous_reference() {
        let mut set = FromSet::new(None, true);
        set.add_source(source("t", &["a"])).unwrap();
        set.add_source(source("u", &["a"])).unwrap();

        let err = set.resolve(&Variable::new("a")).unwrap_err();
        assert!(err.is_planning());
        assert!(set.resolve(&Variable::parse("u.a")).is_ok());
    }

    #[test]
    fn duplicate_source_name() {
        let mut set = FromSet::new(None, true);
        set.add_source(source("t", &["a"])).unwrap();
        assert!(set.add_source(source("T", &["b"])).unwrap_err().is_planning());
    }

    #[test]
    fn correlated_levels() {
        let mut outer = FromSet::new(None, true);
        outer.add_source(source("o", &["x"])).unwrap();
        let mut middle = FromSet::new(Some(&outer), true);
        middle.add_source(source("m", &["y"])).unwrap();
        let mut inner = FromSet::new(Some(&middle), true);
        inner.add_source(source("i", &["z"])).unwrap();

        match inner.resolve(&Variable::new("x")).unwrap() {
            Expression::Correlated(c) => {
                assert_eq!(2, c.level);
                assert_eq!(Variable::parse("o.x"), c.var);
            }
            other => panic!("unexpected {other:?}"),
        }
        match inner.resolve(&Variable::new("y")).unwrap() {
            Expression::Correlated(c) => assert_eq!(1, c.level),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_column_suggests() {
        let mut set = FromSet::new(None, true);
        set.add_source(source("t", &["amount"])).unwrap();
        let err = set.resolve(&Variable::new("amont")).unwrap_err();
        assert!(err.is_planning());
        assert!(err.get_msg().contains("did you mean 'amount'"), "{}", err.get_msg());
    }

    #[test]
    fn alias_lookup() {
        let mut set = FromSet::new(None, true);
        set.add_alias("total", Expression::col("t.a"));
        set.add_alias("total", Expression::col("t.a"));
        assert_eq!(Some(&Expression::col("t.a")), set.find_alias("TOTAL").unwrap());
        set.add_alias("total", Expression::col("t.b"));
        assert!(set.find_alias("total").is_err());
    }

    #[test]
    fn globs() {
        let mut set = FromSet::new(None, true);
        set.add_source(source("t", &["a", "b"])).unwrap();
        set.add_source(source("u", &["c"])).unwrap();
        assert_eq!(3, set.glob_columns(None).unwrap().len());
        assert_eq!(1, set.glob_columns(Some(&TableName::new("u"))).unwrap().len());
        assert!(set.glob_columns(Some(&TableName::new("v"))).is_err());
    }
}

//! Variable resolution for expression evaluation.

use strata_error::{DbError, Result};

use super::Table;
use crate::scalar::ScalarValue;
use crate::schema::Variable;

/// Provides values for column references.
pub trait VariableResolver {
    fn resolve(&self, var: &Variable) -> Result<ScalarValue>;
}

/// Provides the members of a group for aggregate evaluation.
pub trait GroupResolver {
    /// Number of rows in the group.
    fn size(&self) -> usize;

    /// Value of `var` for the `member`-th row of the group.
    fn resolve(&self, var: &Variable, member: usize) -> Result<ScalarValue>;
}

/// Resolves variables against one row of a table.
///
/// Variables must be exactly the qualified names the table's schema
/// exposes.
#[derive(Debug, Clone, Copy)]
pub struct TableRowResolver<'a> {
    table: &'a dyn Table,
    row: usize,
}

impl<'a> TableRowResolver<'a> {
    pub fn new(table: &'a dyn Table, row: usize) -> Self {
        TableRowResolver { table, row }
    }
}

impl VariableResolver for TableRowResolver<'_> {
    fn resolve(&self, var: &Variable) -> Result<ScalarValue> {
        let col = find_variable(self.table, var)?;
        self.table.get_value(col, self.row)
    }
}

/// Group made of explicit rows of a table.
#[derive(Debug, Clone, Copy)]
pub struct TableGroupResolver<'a> {
    table: &'a dyn Table,
    rows: &'a [usize],
}

impl<'a> TableGroupResolver<'a> {
    pub fn new(table: &'a dyn Table, rows: &'a [usize]) -> Self {
        TableGroupResolver { table, rows }
    }
}

impl GroupResolver for TableGroupResolver<'_> {
    fn size(&self) -> usize {
        self.rows.len()
    }

    fn resolve(&self, var: &Variable, member: usize) -> Result<ScalarValue> {
        let row = *self.rows.get(member).ok_or_else(|| {
            DbError::precondition("Group member out of bounds")
                .with_field("member", member)
                .with_field("size", self.rows.len())
        })?;
        let col = find_variable(self.table, var)?;
        self.table.get_value(col, row)
    }
}

/// Resolver for a single member of a group.
pub struct GroupMemberResolver<'a> {
    group: &'a dyn GroupResolver,
    member: usize,
}

impl<'a> GroupMemberResolver<'a> {
    pub fn new(group: &'a dyn GroupResolver, member: usize) -> Self {
        GroupMemberResolver { group, member }
    }
}

impl VariableResolver for GroupMemberResolver<'_> {
    fn resolve(&self, var: &Variable) -> Result<ScalarValue> {
        self.group.resolve(var, self.member)
    }
}

/// Resolver for contexts with no row, e.g. constant folding or the
/// aggregate row over an empty table. Every variable is null.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullResolver;

impl VariableResolver for NullResolver {
    fn resolve(&self, _var: &Variable) -> Result<ScalarValue> {
        Ok(ScalarValue::Null)
    }
}

/// Resolver for contexts where no variable can be referenced.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoVariables;

impl VariableResolver for NoVariables {
    fn resolve(&self, var: &Variable) -> Result<ScalarValue> {
        Err(DbError::precondition(format!(
            "Variable '{var}' referenced where no row is in scope"
        )))
    }
}

pub(crate) fn find_variable(table: &dyn Table, var: &Variable) -> Result<usize> {
    table
        .table_info()
        .find_column(var, false)?
        .ok_or_else(|| {
            DbError::precondition(format!("Variable '{var}' not found in table"))
                .with_field("table", table.table_info().name())
        })
}

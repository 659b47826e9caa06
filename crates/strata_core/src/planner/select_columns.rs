//! The SELECT list after glob expansion and qualification.

use strata_error::Result;
use tracing::trace;

use super::Planner;
use super::ast::SelectColumn;
use super::from_set::FromSet;
use crate::expr::Expression;
use crate::expr::discover::{has_aggregate, is_constant};
use crate::scalar::datatype::DataType;
use crate::schema::{ColumnInfo, TableName, Variable};
use crate::table::function::FUNCTION_TABLE_NAME;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// A column of a FROM source.
    Plain,
    Constant,
    /// Computed by a function node.
    Complex,
}

#[derive(Debug, Clone)]
pub struct SelectedColumn {
    pub kind: ColumnKind,
    /// Qualified expression.
    pub expr: Expression,
    /// Column holding the value in the planned table. The source column for
    /// plain columns, `FUNCTIONTABLE.<n>` otherwise.
    pub internal: Variable,
    /// Name exposed in the result.
    pub output: Variable,
    pub datatype: DataType,
    pub aggregate: bool,
}

impl SelectedColumn {
    pub fn output_info(&self) -> ColumnInfo {
        ColumnInfo {
            qualifier: self.output.table.clone(),
            ..ColumnInfo::new(self.output.column.clone(), self.datatype)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SelectColumnSet {
    pub columns: Vec<SelectedColumn>,
    pub aggregate_count: usize,
}

impl SelectColumnSet {
    /// Expand and qualify `items`, registering aliases on `from_set`.
    pub fn build(planner: &Planner, items: &[SelectColumn], from_set: &mut FromSet) -> Result<Self> {
        let mut set = SelectColumnSet::default();
        let mut function_count = 0;

        for item in items {
            match item {
                SelectColumn::Glob(table) => {
                    for column in from_set.glob_columns(table.as_ref())? {
                        let var = column.variable();
                        set.columns.push(SelectedColumn {
                            kind: ColumnKind::Plain,
                            expr: Expression::Column(var.clone()),
                            internal: var.clone(),
                            output: var,
                            datatype: column.datatype,
                            aggregate: false,
                        });
                    }
                }
                SelectColumn::Expr { expr, alias } => {
                    let qualified = planner.qualify(expr.clone(), from_set)?;
                    let datatype = qualified.datatype(&|v| from_set.datatype_of(v))?;
                    let aggregate = has_aggregate(&qualified);

                    let (kind, internal) = match &qualified {
                        Expression::Column(var) => (ColumnKind::Plain, var.clone()),
                        other => {
                            let kind = if is_constant(other) {
                                ColumnKind::Constant
                            } else {
                                ColumnKind::Complex
                            };
                            let name = Variable::qualified(
                                TableName::new(FUNCTION_TABLE_NAME),
                                function_count.to_string(),
                            );
                            function_count += 1;
                            (kind, name)
                        }
                    };
                    let output = match alias {
                        Some(alias) => Variable::new(alias.clone()),
                        None if kind == ColumnKind::Plain => internal.clone(),
                        None => Variable::new(expr.to_string()),
                    };

                    if aggregate {
                        set.aggregate_count += 1;
                    }
                    if let Some(alias) = alias {
                        from_set.add_alias(alias.clone(), qualified.clone());
                    }
                    trace!(%output, %internal, ?kind, "select column");
                    set.columns.push(SelectedColumn {
                        kind,
                        expr: qualified,
                        internal,
                        output,
                        datatype,
                        aggregate,
                    });
                }
            }
        }

        Ok(set)
    }

    pub fn has_aggregates(&self) -> bool {
        self.aggregate_count > 0
    }

    /// Expressions and names for the function node computing every
    /// non-plain column.
    pub fn function_columns(&self) -> (Vec<Expression>, Vec<Variable>) {
        self.columns
            .iter()
            .filter(|c| c.kind != ColumnKind::Plain)
            .map(|c| (c.expr.clone(), c.internal.clone()))
            .unzip()
    }

    /// Internal name of the computed column with exactly this expression.
    pub fn find_computed(&self, expr: &Expression) -> Option<&Variable> {
        self.columns
            .iter()
            .find(|c| c.kind != ColumnKind::Plain && c.expr == *expr)
            .map(|c| &c.internal)
    }

    /// Find an output column by exposed name.
    pub fn find_output(&self, var: &Variable, ignore_case: bool) -> Option<&SelectedColumn> {
        self.columns
            .iter()
            .find(|c| c.output.matches(var, ignore_case))
    }

    pub fn output_infos(&self) -> Vec<ColumnInfo> {
        self.columns.iter().map(|c| c.output_info()).collect()
    }
}

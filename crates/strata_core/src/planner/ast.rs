//! Parsed query structures handed to the planner.
//!
//! These are produced by a parser (or built directly in tests). Names are
//! unresolved; the planner qualifies everything against a from-set.

use crate::expr::Expression;
use crate::schema::{TableName, Variable};
use crate::table::composite::CompositeFunction;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableSelectExpression {
    pub distinct: bool,
    pub columns: Vec<SelectColumn>,
    pub from: FromClause,
    pub where_clause: Option<Expression>,
    pub group_by: Vec<Expression>,
    /// Column whose maximum picks each group's representative row.
    pub group_max: Option<Variable>,
    pub having: Option<Expression>,
    /// Next query in a UNION/INTERSECT/EXCEPT chain.
    pub composite: Option<CompositeClause>,
}

impl TableSelectExpression {
    /// `SELECT <columns> FROM <table>`.
    pub fn select_from(columns: Vec<SelectColumn>, table: impl Into<String>) -> Self {
        TableSelectExpression {
            columns,
            from: FromClause::single(FromTableDef::table(table)),
            ..Default::default()
        }
    }

    pub fn with_where(mut self, expr: Expression) -> Self {
        self.where_clause = Some(expr);
        self
    }

    pub fn with_group_by(mut self, exprs: Vec<Expression>) -> Self {
        self.group_by = exprs;
        self
    }

    pub fn with_having(mut self, expr: Expression) -> Self {
        self.having = Some(expr);
        self
    }

    pub fn with_distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn with_composite(
        mut self,
        function: CompositeFunction,
        all: bool,
        query: TableSelectExpression,
    ) -> Self {
        self.composite = Some(CompositeClause {
            function,
            all,
            query: Box::new(query),
        });
        self
    }
}

/// Tables in FROM along with how consecutive tables are joined.
///
/// `joins[i]` joins everything up to `tables[i]` with `tables[i + 1]`. An
/// empty `joins` means every table is inner joined without an ON
/// expression.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FromClause {
    pub tables: Vec<FromTableDef>,
    pub joins: Vec<JoinPart>,
}

impl FromClause {
    pub fn single(table: FromTableDef) -> Self {
        FromClause {
            tables: vec![table],
            joins: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Append a table joined to everything before it.
    pub fn join(mut self, join_type: JoinType, table: FromTableDef, on: Option<Expression>) -> Self {
        // Earlier tables listed without explicit joins are inner joined.
        while self.joins.len() + 1 < self.tables.len() {
            self.joins.push(JoinPart::default());
        }
        self.tables.push(table);
        self.joins.push(JoinPart { join_type, on });
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FromTableDef {
    Table {
        name: TableName,
        alias: Option<TableName>,
    },
    Subquery {
        query: Box<TableSelectExpression>,
        alias: TableName,
    },
}

impl FromTableDef {
    pub fn table(name: impl Into<String>) -> Self {
        FromTableDef::Table {
            name: TableName::new(name),
            alias: None,
        }
    }

    pub fn aliased(name: impl Into<String>, alias: impl Into<String>) -> Self {
        FromTableDef::Table {
            name: TableName::new(name),
            alias: Some(TableName::new(alias)),
        }
    }

    pub fn subquery(query: TableSelectExpression, alias: impl Into<String>) -> Self {
        FromTableDef::Subquery {
            query: Box::new(query),
            alias: TableName::new(alias),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinType {
    #[default]
    Inner,
    LeftOuter,
    RightOuter,
    FullOuter,
}

impl JoinType {
    pub const fn is_outer(&self) -> bool {
        !matches!(self, JoinType::Inner)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct JoinPart {
    pub join_type: JoinType,
    pub on: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectColumn {
    Expr {
        expr: Expression,
        alias: Option<String>,
    },
    /// `*` or `t.*`.
    Glob(Option<TableName>),
}

impl SelectColumn {
    pub fn expr(expr: Expression) -> Self {
        SelectColumn::Expr { expr, alias: None }
    }

    pub fn aliased(expr: Expression, alias: impl Into<String>) -> Self {
        SelectColumn::Expr {
            expr,
            alias: Some(alias.into()),
        }
    }

    pub fn all() -> Self {
        SelectColumn::Glob(None)
    }

    pub fn all_from(table: impl Into<String>) -> Self {
        SelectColumn::Glob(Some(TableName::new(table)))
    }
}

/// An ORDER BY term.
#[derive(Debug, Clone, PartialEq)]
pub struct ByColumn {
    pub expr: Expression,
    pub ascending: bool,
}

impl ByColumn {
    pub fn asc(expr: Expression) -> Self {
        ByColumn {
            expr,
            ascending: true,
        }
    }

    pub fn desc(expr: Expression) -> Self {
        ByColumn {
            expr,
            ascending: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompositeClause {
    pub function: CompositeFunction,
    pub all: bool,
    pub query: Box<TableSelectExpression>,
}

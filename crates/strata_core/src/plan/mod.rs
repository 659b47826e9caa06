//! Query plan trees.
//!
//! A plan is built once by the planner and evaluated top-down into a single
//! table. Nodes are immutable. Sub-query plans are shared through `Arc` so
//! an expression can hold one without copying the tree.

mod evaluate;

use crate::explain::explainable::{ColumnIndexes, ExplainEntry};
use crate::explain::node::ExplainNode;
use crate::expr::discover::{correlated_variables, outer_references, table_names};
use crate::expr::{ComparisonOperator, CorrelatedVariable, Expression};
use crate::scheme::range::SelectableRangeSet;
use crate::schema::{TableName, Variable};
use crate::table::composite::CompositeFunction;
use crate::table::ops::{OuterJoinType, SortKey};

#[derive(Debug, Clone, PartialEq)]
pub enum PlanNode {
    /// A table with no columns and one row. Source for queries without a
    /// FROM clause.
    SingleRow,
    /// Fetch a base table, optionally exposing it under an alias.
    FetchTable {
        name: TableName,
        alias: Option<TableName>,
    },
    /// A view's planned query.
    FetchView {
        name: TableName,
        child: Box<PlanNode>,
    },
    /// Evaluate the child once per correlated frame and reuse the result.
    CachePoint { id: usize, child: Box<PlanNode> },
    /// Project and rename columns.
    Subset {
        child: Box<PlanNode>,
        columns: Vec<usize>,
        aliases: Vec<Variable>,
    },
    Distinct {
        child: Box<PlanNode>,
        columns: Vec<usize>,
    },
    Sort {
        child: Box<PlanNode>,
        keys: Vec<SortKey>,
    },
    /// `column op value` through the column's scheme. `value` may be a
    /// correlated reference.
    SimpleSelect {
        child: Box<PlanNode>,
        column: Variable,
        op: ComparisonOperator,
        value: Expression,
    },
    RangeSelect {
        child: Box<PlanNode>,
        column: Variable,
        ranges: SelectableRangeSet,
    },
    PatternSelect {
        child: Box<PlanNode>,
        column: Variable,
        pattern: Expression,
        negated: bool,
    },
    /// Evaluate a predicate against every row.
    ExhaustiveSelect {
        child: Box<PlanNode>,
        predicate: Expression,
    },
    /// A predicate that reads no column of the child.
    ConstantSelect {
        child: Box<PlanNode>,
        predicate: Expression,
    },
    /// `left_column op right_column` join.
    Join {
        left: Box<PlanNode>,
        right: Box<PlanNode>,
        left_column: Variable,
        op: ComparisonOperator,
        right_column: Variable,
    },
    /// Cross product.
    NaturalJoin {
        left: Box<PlanNode>,
        right: Box<PlanNode>,
    },
    OuterJoin {
        left: Box<PlanNode>,
        right: Box<PlanNode>,
        join_type: OuterJoinType,
        on: Expression,
    },
    /// Union of selections of `source`. Every branch is a selection plan
    /// over `source`, which is a cache point so each branch reads the same
    /// table.
    LogicalUnion {
        source: Box<PlanNode>,
        branches: Vec<PlanNode>,
    },
    /// `column op ANY/ALL (subquery)` with an uncorrelated sub-query.
    NonCorrelatedAnyAll {
        child: Box<PlanNode>,
        column: Variable,
        op: ComparisonOperator,
        all: bool,
        subquery: Box<PlanNode>,
    },
    /// Computed columns, one output row per input row.
    Functions {
        child: Box<PlanNode>,
        exprs: Vec<Expression>,
        names: Vec<Variable>,
    },
    /// Computed columns over groups, one output row per group. No
    /// `group_by` columns means the whole input is one group.
    Group {
        child: Box<PlanNode>,
        group_by: Vec<Variable>,
        group_max: Option<Variable>,
        exprs: Vec<Expression>,
        names: Vec<Variable>,
    },
    Composite {
        left: Box<PlanNode>,
        right: Box<PlanNode>,
        function: CompositeFunction,
        all: bool,
    },
}

impl PlanNode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SingleRow => "SingleRow",
            Self::FetchTable { .. } => "FetchTable",
            Self::FetchView { .. } => "FetchView",
            Self::CachePoint { .. } => "CachePoint",
            Self::Subset { .. } => "Subset",
            Self::Distinct { .. } => "Distinct",
            Self::Sort { .. } => "Sort",
            Self::SimpleSelect { .. } => "SimpleSelect",
            Self::RangeSelect { .. } => "RangeSelect",
            Self::PatternSelect { .. } => "PatternSelect",
            Self::ExhaustiveSelect { .. } => "ExhaustiveSelect",
            Self::ConstantSelect { .. } => "ConstantSelect",
            Self::Join { .. } => "Join",
            Self::NaturalJoin { .. } => "NaturalJoin",
            Self::OuterJoin { .. } => "OuterJoin",
            Self::LogicalUnion { .. } => "LogicalUnion",
            Self::NonCorrelatedAnyAll { .. } => "NonCorrelatedAnyAll",
            Self::Functions { .. } => "Functions",
            Self::Group { .. } => "Group",
            Self::Composite { .. } => "Composite",
        }
    }

    /// Direct children in evaluation order.
    pub fn children(&self) -> Vec<&PlanNode> {
        match self {
            Self::SingleRow | Self::FetchTable { .. } => Vec::new(),
            Self::FetchView { child, .. }
            | Self::CachePoint { child, .. }
            | Self::Subset { child, .. }
            | Self::Distinct { child, .. }
            | Self::Sort { child, .. }
            | Self::SimpleSelect { child, .. }
            | Self::RangeSelect { child, .. }
            | Self::PatternSelect { child, .. }
            | Self::ExhaustiveSelect { child, .. }
            | Self::ConstantSelect { child, .. }
            | Self::Functions { child, .. }
            | Self::Group { child, .. } => vec![child],
            Self::Join { left, right, .. }
            | Self::NaturalJoin { left, right }
            | Self::OuterJoin { left, right, .. }
            | Self::Composite { left, right, .. } => vec![left, right],
            Self::LogicalUnion { branches, .. } => branches.iter().collect(),
            Self::NonCorrelatedAnyAll {
                child, subquery, ..
            } => vec![child, subquery],
        }
    }

    /// Expressions held directly by this node.
    fn own_expressions(&self) -> Vec<&Expression> {
        match self {
            Self::SimpleSelect { value, .. } => vec![value],
            Self::PatternSelect { pattern, .. } => vec![pattern],
            Self::ExhaustiveSelect { predicate, .. } | Self::ConstantSelect { predicate, .. } => {
                vec![predicate]
            }
            Self::OuterJoin { on, .. } => vec![on],
            Self::Functions { exprs, .. } | Self::Group { exprs, .. } => exprs.iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Call `f` on every expression in this tree.
    ///
    /// Doesn't descend into plans of sub-queries nested in the expressions.
    pub fn for_each_expression(&self, f: &mut dyn FnMut(&Expression)) {
        for expr in self.own_expressions() {
            f(expr);
        }
        for child in self.children() {
            child.for_each_expression(f);
        }
    }

    /// Append the names of every base table and view this plan reads,
    /// including through sub-queries. Each name is added once.
    pub fn discover_table_names(&self, acc: &mut Vec<TableName>) {
        match self {
            Self::FetchTable { name, .. } | Self::FetchView { name, .. } => {
                if !acc.contains(name) {
                    acc.push(name.clone());
                }
            }
            _ => (),
        }
        for expr in self.own_expressions() {
            let mut names = Vec::new();
            table_names(expr, &mut names);
            for name in names {
                if !acc.contains(&name) {
                    acc.push(name);
                }
            }
        }
        for child in self.children() {
            child.discover_table_names(acc);
        }
    }

    /// Append correlated variables bound `level` query levels above this
    /// plan.
    pub fn discover_correlated_variables(&self, level: usize, acc: &mut Vec<CorrelatedVariable>) {
        self.for_each_expression(&mut |expr| correlated_variables(expr, level, acc));
    }

    /// If evaluating this plan reads a row of any enclosing query, at any
    /// depth.
    pub fn has_outer_references(&self) -> bool {
        let mut acc = Vec::new();
        self.for_each_expression(&mut |expr| outer_references(expr, 1, &mut acc));
        !acc.is_empty()
    }

    pub fn explain_entry(&self) -> ExplainEntry {
        let ent = ExplainEntry::new(self.name());
        match self {
            Self::SingleRow | Self::LogicalUnion { .. } => ent,
            Self::FetchTable { name, alias } => {
                let ent = ent.with_value("table", name);
                match alias {
                    Some(alias) => ent.with_value("alias", alias),
                    None => ent,
                }
            }
            Self::FetchView { name, .. } => ent.with_value("view", name),
            Self::CachePoint { id, .. } => ent.with_value("id", id),
            Self::Subset {
                columns, aliases, ..
            } => ent
                .with_value("columns", ColumnIndexes(columns))
                .with_values("aliases", aliases),
            Self::Distinct { columns, .. } => ent.with_value("columns", ColumnIndexes(columns)),
            Self::Sort { keys, .. } => ent.with_values(
                "keys",
                keys.iter().map(|k| {
                    format!("#{} {}", k.column, if k.ascending { "ASC" } else { "DESC" })
                }),
            ),
            Self::SimpleSelect {
                column, op, value, ..
            } => ent.with_value("predicate", format!("{column} {op} {value}")),
            Self::RangeSelect { column, ranges, .. } => ent
                .with_value("column", column)
                .with_value("ranges", ranges),
            Self::PatternSelect {
                column,
                pattern,
                negated,
                ..
            } => {
                let not = if *negated { "NOT " } else { "" };
                ent.with_value("predicate", format!("{column} {not}LIKE {pattern}"))
            }
            Self::ExhaustiveSelect { predicate, .. } | Self::ConstantSelect { predicate, .. } => {
                ent.with_value("predicate", predicate)
            }
            Self::Join {
                left_column,
                op,
                right_column,
                ..
            } => ent.with_value("condition", format!("{left_column} {op} {right_column}")),
            Self::NaturalJoin { .. } => ent,
            Self::OuterJoin { join_type, on, .. } => ent
                .with_value("join_type", format!("{join_type:?}"))
                .with_value("on", on),
            Self::NonCorrelatedAnyAll {
                column, op, all, ..
            } => {
                let quantifier = if *all { "ALL" } else { "ANY" };
                ent.with_value("predicate", format!("{column} {op} {quantifier}"))
            }
            Self::Functions { exprs, names, .. } => ent
                .with_values("expressions", exprs)
                .with_values("names", names),
            Self::Group {
                group_by,
                group_max,
                exprs,
                names,
                ..
            } => {
                let ent = ent
                    .with_values("group_by", group_by)
                    .with_values("expressions", exprs)
                    .with_values("names", names);
                match group_max {
                    Some(max) => ent.with_value("group_max", max),
                    None => ent,
                }
            }
            Self::Composite { function, all, .. } => {
                let all = if *all { " ALL" } else { "" };
                ent.with_value("function", format!("{function}{all}"))
            }
        }
    }

    pub fn explain(&self) -> ExplainNode {
        let children = self.children().into_iter().map(|c| c.explain()).collect();
        ExplainNode::new(self.explain_entry(), children)
    }
}

//! Turns parsed select expressions into plan trees.
//!
//! Planning is rule based. Each query level gets a [`FromSet`] scope, its
//! FROM sources and WHERE clause are planned by the table-set planner, and
//! grouping, DISTINCT, ORDER BY and composition are layered on top.

pub mod ast;
pub mod from_set;
pub mod select_columns;
pub mod table_set;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use strata_error::{DbError, Result};
use tracing::{debug, trace};

use self::ast::{ByColumn, JoinType, TableSelectExpression};
use self::from_set::{FromSet, FromSource};
use self::select_columns::SelectColumnSet;
use self::table_set::{PlanUnit, TableSetPlanner, plan_unit_filter};
use crate::catalog::{Catalog, find_similar};
use crate::config::session::SessionConfig;
use crate::explain::node::ExplainNode;
use crate::expr::discover::{has_aggregate, map_children};
use crate::expr::{Expression, SubqueryExpr, SubqueryKind, SubqueryPlan, SubqueryQuery};
use crate::plan::PlanNode;
use crate::scalar::ScalarValue;
use crate::scalar::datatype::DataType;
use crate::schema::{ColumnInfo, TableName, Variable};
use crate::table::function::FUNCTION_TABLE_NAME;
use crate::table::ops::{OuterJoinType, SortKey};

/// A planned query and the columns it produces.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedQuery {
    pub node: PlanNode,
    pub columns: Vec<ColumnInfo>,
}

impl PlannedQuery {
    pub fn explain(&self) -> ExplainNode {
        self.node.explain()
    }
}

#[derive(Debug)]
pub struct Planner {
    catalog: Arc<dyn Catalog>,
    config: SessionConfig,
    next_cache_id: AtomicUsize,
}

impl Planner {
    pub fn new(catalog: Arc<dyn Catalog>, config: SessionConfig) -> Self {
        Planner {
            catalog,
            config,
            next_cache_id: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Id for a new cache point. Unique within this planner.
    pub(crate) fn next_cache_id(&self) -> usize {
        self.next_cache_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Plan a top-level query.
    pub fn plan_query(
        &self,
        query: &TableSelectExpression,
        order_by: &[ByColumn],
    ) -> Result<PlannedQuery> {
        let from_set = self.generate_from_set(query, None)?;
        let planned = self.form_query_plan(query, from_set, order_by)?;
        debug!(plan = %planned.node.explain().format_text(), "planned query");
        Ok(planned)
    }

    /// Build the naming scope for one query level.
    ///
    /// Sub-queries in FROM are planned here without access to `parent`.
    pub fn generate_from_set<'p>(
        &self,
        query: &TableSelectExpression,
        parent: Option<&'p FromSet<'p>>,
    ) -> Result<FromSet<'p>> {
        let mut set = FromSet::new(parent, self.config.ignore_identifier_case);
        for def in &query.from.tables {
            let source = match def {
                ast::FromTableDef::Table { name, alias } => self.table_source(name, alias.as_ref())?,
                ast::FromTableDef::Subquery { query, alias } => {
                    let planned = self.plan_query(query, &[])?;
                    let node = rename_columns(planned.node, &planned.columns, alias);
                    FromSource::new(alias.clone(), &planned.columns, node)
                }
            };
            set.add_source(source)?;
        }
        Ok(set)
    }

    fn table_source(&self, name: &TableName, alias: Option<&TableName>) -> Result<FromSource> {
        if let Some(info) = self.catalog.get_table_info(name) {
            let exposed = alias.cloned().unwrap_or_else(|| info.name().clone());
            let node = PlanNode::FetchTable {
                name: info.name().clone(),
                alias: alias.cloned(),
            };
            return Ok(FromSource::new(exposed, info.columns(), node));
        }

        if let Some(view) = self.catalog.get_view_plan(name) {
            let planned = self.plan_query(&view, &[])?;
            let exposed = alias.cloned().unwrap_or_else(|| name.clone());
            let node = PlanNode::FetchView {
                name: name.clone(),
                child: Box::new(rename_columns(planned.node, &planned.columns, &exposed)),
            };
            return Ok(FromSource::new(exposed, &planned.columns, node));
        }

        let names = self.catalog.table_names();
        let mut msg = format!("Table '{name}' does not exist");
        if let Some(similar) = find_similar(names.iter().map(|n| n.name.as_str()), &name.name) {
            msg.push_str(&format!(", did you mean '{similar}'?"));
        }
        Err(DbError::planning(msg))
    }

    /// Plan a query level against its from-set, including any composite
    /// chain.
    pub fn form_query_plan(
        &self,
        query: &TableSelectExpression,
        mut from_set: FromSet<'_>,
        order_by: &[ByColumn],
    ) -> Result<PlannedQuery> {
        if query.composite.is_none() {
            return self.plan_select(query, &mut from_set, order_by);
        }

        let parent = from_set.parent();
        let mut planned = self.plan_select(query, &mut from_set, &[])?;
        let mut clause = query.composite.as_ref();
        while let Some(composite) = clause {
            let right_query = TableSelectExpression {
                composite: None,
                ..(*composite.query).clone()
            };
            let mut right_set = self.generate_from_set(&right_query, parent)?;
            let right = self.plan_select(&right_query, &mut right_set, &[])?;
            if right.columns.len() != planned.columns.len() {
                return Err(DbError::planning(format!(
                    "{} operands have different column counts ({} and {})",
                    composite.function,
                    planned.columns.len(),
                    right.columns.len()
                )));
            }
            trace!(function = %composite.function, all = composite.all, "composite operand");
            planned = PlannedQuery {
                node: PlanNode::Composite {
                    left: Box::new(planned.node),
                    right: Box::new(right.node),
                    function: composite.function,
                    all: composite.all,
                },
                columns: planned.columns,
            };
            clause = composite.query.composite.as_ref();
        }

        let columns = planned.columns;
        let mut node = planned.node;
        if !order_by.is_empty() {
            let keys = order_by
                .iter()
                .map(|by| composite_sort_key(by, &columns, self.config.ignore_identifier_case))
                .collect::<Result<Vec<_>>>()?;
            node = PlanNode::Sort {
                child: Box::new(node),
                keys,
            };
        }
        let node = PlanNode::Subset {
            child: Box::new(node),
            columns: (0..columns.len()).collect(),
            aliases: columns.iter().map(|c| c.variable()).collect(),
        };
        Ok(PlannedQuery { node, columns })
    }

    fn plan_select(
        &self,
        query: &TableSelectExpression,
        from_set: &mut FromSet<'_>,
        order_by: &[ByColumn],
    ) -> Result<PlannedQuery> {
        if query.columns.is_empty() {
            return Err(DbError::planning("SELECT list is empty"));
        }

        let select = SelectColumnSet::build(self, &query.columns, from_set)?;
        let mut unit = self.plan_table_set(query, from_set)?;

        let having = query
            .having
            .as_ref()
            .map(|h| self.qualify_with_aliases(h.clone(), from_set))
            .transpose()?;

        let mut order = Vec::with_capacity(order_by.len());
        for by in order_by {
            let expr = match positional(&by.expr) {
                Some(pos) => {
                    let column = pos
                        .checked_sub(1)
                        .and_then(|idx| select.columns.get(idx))
                        .ok_or_else(|| {
                            DbError::planning(format!("ORDER BY position {pos} is out of range"))
                        })?;
                    Expression::Column(column.internal.clone())
                }
                None => self.qualify_with_aliases(by.expr.clone(), from_set)?,
            };
            order.push((expr, by.ascending));
        }

        let grouped = select.has_aggregates()
            || !query.group_by.is_empty()
            || having.is_some()
            || order.iter().any(|(e, _)| has_aggregate(e));

        let (mut exprs, mut names) = select.function_columns();
        if grouped {
            let mut group_by = Vec::with_capacity(query.group_by.len());
            let mut pre_exprs = Vec::new();
            let mut pre_names = Vec::new();
            for (idx, expr) in query.group_by.iter().enumerate() {
                let expr = self.qualify_with_aliases(expr.clone(), from_set)?;
                if has_aggregate(&expr) {
                    return Err(DbError::planning(
                        "Aggregate functions are not allowed in GROUP BY",
                    ));
                }
                match expr {
                    Expression::Column(var) => group_by.push(var),
                    other => {
                        let name = function_name(format!("#GROUPBY-{idx}"));
                        pre_exprs.push(other);
                        pre_names.push(name.clone());
                        group_by.push(name);
                    }
                }
            }
            if !pre_exprs.is_empty() {
                unit = functions_unit(unit, pre_exprs, pre_names)?;
            }

            let group_max = match &query.group_max {
                Some(var) => match from_set.resolve(var)? {
                    Expression::Column(var) => Some(var),
                    _ => {
                        return Err(DbError::planning(format!(
                            "GROUP MAX column '{var}' must belong to this query"
                        )));
                    }
                },
                None => None,
            };

            // Aggregates in HAVING not already computed by a select column.
            let having = match having {
                Some(having) => {
                    let mut lifted = 0;
                    let having = replace_aggregates(having, &mut |agg| {
                        if let Some(var) = select.find_computed(&agg) {
                            return var.clone();
                        }
                        if let Some(pos) = exprs.iter().position(|e| *e == agg) {
                            return names[pos].clone();
                        }
                        let name = function_name(format!("HAVINGAG_{lifted}"));
                        lifted += 1;
                        exprs.push(agg);
                        names.push(name.clone());
                        name
                    })?;
                    Some(having)
                }
                None => None,
            };

            for (idx, (expr, _)) in order.iter_mut().enumerate() {
                if !has_aggregate(expr) {
                    continue;
                }
                let var = match select.find_computed(expr) {
                    Some(var) => var.clone(),
                    None => {
                        let name = function_name(format!("#ORDER-{idx}"));
                        exprs.push(expr.clone());
                        names.push(name.clone());
                        name
                    }
                };
                *expr = Expression::Column(var);
            }

            let mut columns = unit.columns;
            let child = Box::new(unit.node);
            let infos = function_infos(&columns, &exprs, &names)?;
            columns.extend(infos);
            debug!(groups = group_by.len(), functions = exprs.len(), "planned group");
            unit = PlanUnit::new(
                PlanNode::Group {
                    child,
                    group_by,
                    group_max,
                    exprs,
                    names,
                },
                columns,
            );

            if let Some(having) = having {
                unit = plan_unit_filter(self, unit, having.into_conjuncts())?;
            }
        } else if !exprs.is_empty() {
            unit = functions_unit(unit, exprs, names)?;
        }

        if query.distinct {
            let columns = select
                .columns
                .iter()
                .map(|c| unit.column_index(&c.internal))
                .collect::<Result<Vec<_>>>()?;
            unit = unit.map_node(|child| PlanNode::Distinct { child, columns });
        }

        if !order.is_empty() {
            let mut order_exprs = Vec::new();
            let mut order_names = Vec::new();
            let mut sort_vars = Vec::with_capacity(order.len());
            for (idx, (expr, ascending)) in order.into_iter().enumerate() {
                let var = match expr {
                    Expression::Column(var) if unit.has_column(&var) => var,
                    other => match select.find_computed(&other) {
                        Some(var) => var.clone(),
                        None => {
                            let name = function_name(format!("#ORDER-{idx}"));
                            order_exprs.push(other);
                            order_names.push(name.clone());
                            name
                        }
                    },
                };
                sort_vars.push((var, ascending));
            }
            if !order_exprs.is_empty() {
                unit = functions_unit(unit, order_exprs, order_names)?;
            }
            let keys = sort_vars
                .iter()
                .map(|(var, ascending)| {
                    Ok(SortKey {
                        column: unit.column_index(var)?,
                        ascending: *ascending,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            unit = unit.map_node(|child| PlanNode::Sort { child, keys });
        }

        let columns = select
            .columns
            .iter()
            .map(|c| unit.column_index(&c.internal))
            .collect::<Result<Vec<_>>>()?;
        let aliases = select.columns.iter().map(|c| c.output.clone()).collect();
        let node = PlanNode::Subset {
            child: Box::new(unit.node),
            columns,
            aliases,
        };
        Ok(PlannedQuery {
            node,
            columns: select.output_infos(),
        })
    }

    /// Plan FROM sources, join conditions and WHERE into a single unit.
    fn plan_table_set(&self, query: &TableSelectExpression, from_set: &FromSet) -> Result<PlanUnit> {
        let sources = from_set.sources();
        let joins = &query.from.joins;
        if !joins.is_empty() && joins.len() + 1 != sources.len() {
            return Err(DbError::planning(format!(
                "FROM clause has {} tables but {} joins",
                sources.len(),
                joins.len()
            )));
        }

        let mut filters = Vec::new();
        if let Some(expr) = &query.where_clause {
            let expr = self.qualify(expr.clone(), from_set)?;
            if has_aggregate(&expr) {
                return Err(DbError::planning("Aggregate functions are not allowed in WHERE"));
            }
            filters.push(expr);
        }

        let to_unit = |s: &FromSource| PlanUnit::new(s.plan.clone(), s.columns.clone());
        let units = if sources.is_empty() {
            vec![PlanUnit::new(PlanNode::SingleRow, Vec::new())]
        } else if joins.iter().any(|j| j.join_type.is_outer()) {
            // Each step is planned explicitly to keep null extension in the
            // right place.
            let mut acc = to_unit(&sources[0]);
            for (join, source) in joins.iter().zip(&sources[1..]) {
                let right = to_unit(source);
                let on = join
                    .on
                    .clone()
                    .map(|on| self.qualify(on, from_set))
                    .transpose()?;
                acc = match (join.join_type, on) {
                    (JoinType::Inner, None) => acc.cross_join(right),
                    (JoinType::Inner, Some(on)) => {
                        let joined = acc.cross_join(right);
                        plan_unit_filter(self, joined, on.into_conjuncts())?
                    }
                    (join_type, Some(on)) => outer_join_unit(acc, right, join_type, on),
                    (_, None) => {
                        return Err(DbError::planning("OUTER JOIN requires an ON expression"));
                    }
                };
            }
            vec![acc]
        } else {
            for join in joins {
                if let Some(on) = &join.on {
                    filters.push(self.qualify(on.clone(), from_set)?);
                }
            }
            sources.iter().map(to_unit).collect()
        };

        let mut planner = TableSetPlanner::new(self, units);
        if let Some(filter) = Expression::and_all(filters) {
            planner.plan_filter(filter)?;
        }
        planner.finish()
    }

    /// Resolve every column reference in `expr` and plan its sub-queries.
    pub(crate) fn qualify(&self, expr: Expression, from_set: &FromSet) -> Result<Expression> {
        self.qualify_inner(expr, from_set, false)
    }

    /// Like `qualify`, but unqualified names may refer to select aliases.
    fn qualify_with_aliases(&self, expr: Expression, from_set: &FromSet) -> Result<Expression> {
        self.qualify_inner(expr, from_set, true)
    }

    fn qualify_inner(&self, expr: Expression, from_set: &FromSet, aliases: bool) -> Result<Expression> {
        let expr = match expr {
            Expression::Column(var) => {
                if aliases && var.table.is_none() {
                    if let Some(aliased) = from_set.find_alias(&var.column)? {
                        return Ok(aliased.clone());
                    }
                }
                return from_set.resolve(&var);
            }
            Expression::Subquery(SubqueryExpr { kind, lhs, query }) => {
                let lhs = lhs
                    .map(|lhs| self.qualify_inner(*lhs, from_set, aliases))
                    .transpose()?;
                let query = match query {
                    SubqueryQuery::Unplanned(query) => {
                        SubqueryQuery::Planned(self.plan_subquery(&query, kind, from_set)?)
                    }
                    planned @ SubqueryQuery::Planned(_) => planned,
                };
                Expression::Subquery(SubqueryExpr {
                    kind,
                    lhs: lhs.map(Box::new),
                    query,
                })
            }
            other => map_children(other, &mut |child| {
                self.qualify_inner(child, from_set, aliases)
            })?,
        };
        check_operand_types(&expr, from_set)?;
        Ok(expr)
    }

    fn plan_subquery(
        &self,
        query: &TableSelectExpression,
        kind: SubqueryKind,
        from_set: &FromSet,
    ) -> Result<SubqueryPlan> {
        let child_set = self.generate_from_set(query, Some(from_set))?;
        let planned = self.form_query_plan(query, child_set, &[])?;
        if kind != SubqueryKind::Exists && planned.columns.len() != 1 {
            return Err(DbError::unsupported(format!(
                "Sub-query must return exactly one column, got {}",
                planned.columns.len()
            )));
        }
        let datatype = planned
            .columns
            .first()
            .map(|c| c.datatype)
            .unwrap_or(DataType::Null);

        let mut node = planned.node;
        if self.config.cache_uncorrelated_subqueries && !node.has_outer_references() {
            node = PlanNode::CachePoint {
                id: self.next_cache_id(),
                child: Box::new(node),
            };
        }
        Ok(SubqueryPlan {
            node: Arc::new(node),
            datatype,
        })
    }
}

/// Reject comparisons between values that can never be compared.
fn check_operand_types(expr: &Expression, from_set: &FromSet) -> Result<()> {
    let lookup = |var: &Variable| from_set.datatype_of(var);
    let incompatible = |left: DataType, right: DataType| {
        DbError::planning(format!("Cannot compare {left} with {right}"))
    };
    match expr {
        Expression::Comparison { left, right, .. } => {
            let (l, r) = (left.datatype(&lookup)?, right.datatype(&lookup)?);
            if !l.is_comparable_with(&r) {
                return Err(incompatible(l, r));
            }
        }
        Expression::InList { input, list, .. } => {
            let input = input.datatype(&lookup)?;
            for item in list {
                let item = item.datatype(&lookup)?;
                if !input.is_comparable_with(&item) {
                    return Err(incompatible(input, item));
                }
            }
        }
        Expression::Subquery(SubqueryExpr {
            kind: SubqueryKind::Any(_) | SubqueryKind::All(_),
            lhs: Some(lhs),
            query: SubqueryQuery::Planned(plan),
        }) => {
            let l = lhs.datatype(&lookup)?;
            if !l.is_comparable_with(&plan.datatype) {
                return Err(incompatible(l, plan.datatype));
            }
        }
        Expression::Like { input, pattern, .. } => {
            for operand in [input, pattern] {
                let datatype = operand.datatype(&lookup)?;
                if !matches!(datatype, DataType::Utf8 | DataType::Null) {
                    return Err(DbError::planning(format!(
                        "LIKE requires string operands, got {datatype}"
                    )));
                }
            }
        }
        Expression::Arith { .. } => {
            expr.datatype(&lookup)?;
        }
        _ => (),
    }
    Ok(())
}

fn function_name(name: String) -> Variable {
    Variable::qualified(TableName::new(FUNCTION_TABLE_NAME), name)
}

/// Column infos for function columns computed over a table with
/// `reference` columns.
fn function_infos(
    reference: &[ColumnInfo],
    exprs: &[Expression],
    names: &[Variable],
) -> Result<Vec<ColumnInfo>> {
    let lookup = |var: &Variable| {
        reference
            .iter()
            .find(|c| c.variable() == *var)
            .map(|c| c.datatype)
            .ok_or_else(|| DbError::planning(format!("Column '{var}' not found")))
    };
    exprs
        .iter()
        .zip(names)
        .map(|(expr, name)| {
            Ok(ColumnInfo {
                qualifier: name.table.clone(),
                ..ColumnInfo::new(name.column.clone(), expr.datatype(&lookup)?)
            })
        })
        .collect()
}

/// Append an ungrouped function node.
fn functions_unit(unit: PlanUnit, exprs: Vec<Expression>, names: Vec<Variable>) -> Result<PlanUnit> {
    let infos = function_infos(&unit.columns, &exprs, &names)?;
    let mut columns = unit.columns;
    columns.extend(infos);
    Ok(PlanUnit::new(
        PlanNode::Functions {
            child: Box::new(unit.node),
            exprs,
            names,
        },
        columns,
    ))
}

fn outer_join_unit(left: PlanUnit, right: PlanUnit, join_type: JoinType, on: Expression) -> PlanUnit {
    let join_type = match join_type {
        JoinType::LeftOuter => OuterJoinType::Left,
        JoinType::RightOuter => OuterJoinType::Right,
        _ => OuterJoinType::Full,
    };
    let nullable = |mut c: ColumnInfo| {
        c.nullable = true;
        c
    };
    let mut columns: Vec<ColumnInfo> = match join_type {
        OuterJoinType::Left => left.columns,
        _ => left.columns.into_iter().map(nullable).collect(),
    };
    match join_type {
        OuterJoinType::Right => columns.extend(right.columns),
        _ => columns.extend(right.columns.into_iter().map(nullable)),
    }
    PlanUnit::new(
        PlanNode::OuterJoin {
            left: Box::new(left.node),
            right: Box::new(right.node),
            join_type,
            on,
        },
        columns,
    )
}

/// Project `node` to `columns`, requalified under `alias`.
fn rename_columns(node: PlanNode, columns: &[ColumnInfo], alias: &TableName) -> PlanNode {
    PlanNode::Subset {
        child: Box::new(node),
        columns: (0..columns.len()).collect(),
        aliases: columns
            .iter()
            .map(|c| Variable::qualified(alias.clone(), c.name.clone()))
            .collect(),
    }
}

/// Replace each outermost aggregate call with the column computing it.
fn replace_aggregates(
    expr: Expression,
    f: &mut dyn FnMut(Expression) -> Variable,
) -> Result<Expression> {
    match expr {
        agg @ Expression::Aggregate(_) => Ok(Expression::Column(f(agg))),
        other => map_children(other, &mut |child| replace_aggregates(child, &mut *f)),
    }
}

/// One based position from `ORDER BY <n>`.
fn positional(expr: &Expression) -> Option<usize> {
    match expr.as_literal()? {
        ScalarValue::Int32(n) => usize::try_from(*n).ok(),
        ScalarValue::Int64(n) => usize::try_from(*n).ok(),
        _ => None,
    }
}

/// Sort key over a composite's output columns. Only positions and output
/// names are allowed.
fn composite_sort_key(by: &ByColumn, columns: &[ColumnInfo], ignore_case: bool) -> Result<SortKey> {
    let column = match (positional(&by.expr), &by.expr) {
        (Some(pos), _) => pos.checked_sub(1).filter(|idx| *idx < columns.len()),
        (None, Expression::Column(var)) => columns
            .iter()
            .position(|c| c.variable().matches(var, ignore_case)),
        _ => None,
    }
    .ok_or_else(|| {
        DbError::planning(format!(
            "ORDER BY term '{}' must name an output column of a composite query",
            by.expr
        ))
    })?;
    Ok(SortKey {
        column,
        ascending: by.ascending,
    })
}

#[cfg(test)]
mod tests {
    use super::ast::{FromClause, FromTableDef, SelectColumn};
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::expr::{AggregateFunction, ComparisonOperator};
    use crate::schema::TableInfo;
    use crate::table::composite::CompositeFunction;

    fn catalog() -> Arc<MemoryCatalog> {
        let catalog = MemoryCatalog::new();
        catalog
            .create_table(TableInfo::new(
                TableName::new("t"),
                [
                    ColumnInfo::new("a", DataType::Int32),
                    ColumnInfo::new("b", DataType::Utf8),
                ],
            ))
            .unwrap();
        catalog
            .create_table(TableInfo::new(
                TableName::new("u"),
                [
                    ColumnInfo::new("a", DataType::Int32),
                    ColumnInfo::new("c", DataType::Int64),
                ],
            ))
            .unwrap();
        Arc::new(catalog)
    }

    fn planner() -> Planner {
        Planner::new(catalog(), SessionConfig::default())
    }

    fn select(columns: &[&str], table: &str) -> TableSelectExpression {
        TableSelectExpression::select_from(
            columns
                .iter()
                .map(|c| SelectColumn::expr(Expression::col(c)))
                .collect(),
            table,
        )
    }

    #[test]
    fn simple_select_node() {
        let query = select(&["a"], "t").with_where(Expression::compare(
            ComparisonOperator::Gt,
            Expression::col("a"),
            Expression::lit(1),
        ));
        let planned = planner().plan_query(&query, &[]).unwrap();
        let text = planned.explain().format_text();
        assert!(text.contains("SimpleSelect"), "{text}");
        assert_eq!(1, planned.columns.len());
        assert_eq!(Variable::parse("t.a"), planned.columns[0].variable());
    }

    #[test]
    fn range_for_same_column() {
        let query = select(&["a"], "t").with_where(Expression::and(
            Expression::compare(ComparisonOperator::Gt, Expression::col("a"), Expression::lit(1)),
            Expression::compare(ComparisonOperator::Lt, Expression::col("a"), Expression::lit(5)),
        ));
        let text = planner().plan_query(&query, &[]).unwrap().explain().format_text();
        assert!(text.contains("RangeSelect"), "{text}");
    }

    #[test]
    fn equi_join_between_sources() {
        let query = TableSelectExpression {
            columns: vec![SelectColumn::all()],
            from: FromClause {
                tables: vec![FromTableDef::table("t"), FromTableDef::table("u")],
                joins: Vec::new(),
            },
            where_clause: Some(Expression::eq(Expression::col("t.a"), Expression::col("u.a"))),
            ..Default::default()
        };
        let planned = planner().plan_query(&query, &[]).unwrap();
        assert_eq!("Join", planned.node.children()[0].name());
        assert_eq!(4, planned.columns.len());
    }

    #[test]
    fn ambiguous_column() {
        let query = TableSelectExpression {
            columns: vec![SelectColumn::expr(Expression::col("a"))],
            from: FromClause {
                tables: vec![FromTableDef::table("t"), FromTableDef::table("u")],
                joins: Vec::new(),
            },
            ..Default::default()
        };
        assert!(planner().plan_query(&query, &[]).unwrap_err().is_planning());
    }

    #[test]
    fn missing_table_suggests() {
        let err = planner().plan_query(&select(&["a"], "tt"), &[]).unwrap_err();
        assert!(err.is_planning());
        assert!(err.get_msg().contains("did you mean 't'"), "{}", err.get_msg());
    }

    #[test]
    fn outer_join_requires_on() {
        let query = TableSelectExpression {
            columns: vec![SelectColumn::all()],
            from: FromClause::single(FromTableDef::table("t")).join(
                JoinType::LeftOuter,
                FromTableDef::table("u"),
                None,
            ),
            ..Default::default()
        };
        assert!(planner().plan_query(&query, &[]).unwrap_err().is_planning());
    }

    #[test]
    fn aggregate_in_group_by() {
        let query = select(&["a"], "t").with_group_by(vec![Expression::count_star()]);
        assert!(planner().plan_query(&query, &[]).unwrap_err().is_planning());
    }

    #[test]
    fn aggregate_in_where() {
        let query = select(&["a"], "t").with_where(Expression::eq(
            Expression::count_star(),
            Expression::lit(1),
        ));
        assert!(planner().plan_query(&query, &[]).unwrap_err().is_planning());
    }

    #[test]
    fn incompatible_comparison() {
        let query = select(&["a"], "t").with_where(Expression::eq(
            Expression::col("a"),
            Expression::lit("x"),
        ));
        assert!(planner().plan_query(&query, &[]).unwrap_err().is_planning());
    }

    #[test]
    fn multi_column_subquery_unsupported() {
        let sub = select(&["a", "b"], "t");
        let query = select(&["a"], "u").with_where(Expression::subquery(
            SubqueryKind::Any(ComparisonOperator::Eq),
            Some(Expression::col("a")),
            sub,
        ));
        assert!(planner().plan_query(&query, &[]).unwrap_err().is_unsupported());
    }

    #[test]
    fn having_lifts_aggregates() {
        let query = TableSelectExpression::select_from(
            vec![SelectColumn::expr(Expression::col("b"))],
            "t",
        )
        .with_group_by(vec![Expression::col("b")])
        .with_having(Expression::compare(
            ComparisonOperator::Gt,
            Expression::aggregate(AggregateFunction::Sum, Some(Expression::col("a"))),
            Expression::lit(1),
        ));
        let planned = planner().plan_query(&query, &[]).unwrap();
        let text = planned.explain().format_text();
        assert!(text.contains("HAVINGAG_0"), "{text}");
    }

    #[test]
    fn complex_order_by_gets_function_column() {
        let query = select(&["a"], "t");
        let order = [ByColumn::desc(Expression::arith(
            crate::expr::ArithOperator::Mul,
            Expression::col("a"),
            Expression::lit(2),
        ))];
        let text = planner().plan_query(&query, &order).unwrap().explain().format_text();
        assert!(text.contains("#ORDER-0"), "{text}");
        assert!(text.contains("Sort"), "{text}");
    }

    #[test]
    fn composite_column_count_mismatch() {
        let query = select(&["a"], "t").with_composite(
            CompositeFunction::Union,
            false,
            select(&["a", "c"], "u"),
        );
        assert!(planner().plan_query(&query, &[]).unwrap_err().is_planning());
    }

    #[test]
    fn uncorrelated_subquery_is_cached() {
        let sub = select(&["a"], "u");
        let query = select(&["a"], "t").with_where(Expression::compare(
            ComparisonOperator::Gt,
            Expression::col("a"),
            Expression::subquery(SubqueryKind::Scalar, None, sub),
        ));
        let planned = planner().plan_query(&query, &[]).unwrap();
        let mut found = false;
        planned.node.for_each_expression(&mut |e| {
            if let Expression::Subquery(sub) = e {
                if let SubqueryQuery::Planned(plan) = &sub.query {
                    found |= plan.node.name() == "CachePoint";
                }
            }
        });
        assert!(found);
    }
}

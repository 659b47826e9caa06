//! Planning of FROM sources and the filters over them.
//!
//! Each source starts as its own unit. Conjuncts touching one unit become
//! selections on that unit, conjuncts spanning units join them. Whatever
//! is left unjoined at the end is combined with natural joins.

use strata_error::{DbError, Result};
use tracing::debug;

use super::Planner;
use crate::expr::discover::{
    correlated_variables,
    has_aggregate,
    has_correlated,
    has_subquery,
    variables,
};
use crate::expr::{
    ComparisonOperator,
    ConjunctionOperator,
    Expression,
    SubqueryExpr,
    SubqueryKind,
    SubqueryQuery,
};
use crate::plan::PlanNode;
use crate::scheme::range::SelectableRangeSet;
use crate::schema::{ColumnInfo, Variable};

/// A plan along with the columns its output exposes.
#[derive(Debug, Clone)]
pub struct PlanUnit {
    pub node: PlanNode,
    pub columns: Vec<ColumnInfo>,
}

impl PlanUnit {
    pub fn new(node: PlanNode, columns: Vec<ColumnInfo>) -> Self {
        PlanUnit { node, columns }
    }

    pub fn has_column(&self, var: &Variable) -> bool {
        self.columns.iter().any(|c| c.variable() == *var)
    }

    /// Position of a fully qualified column.
    pub fn column_index(&self, var: &Variable) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.variable() == *var)
            .ok_or_else(|| {
                DbError::precondition(format!("Column '{var}' missing from planned table"))
            })
    }

    /// Wrap the node, keeping the columns.
    pub fn map_node(self, f: impl FnOnce(Box<PlanNode>) -> PlanNode) -> Self {
        PlanUnit {
            node: f(Box::new(self.node)),
            columns: self.columns,
        }
    }

    pub fn cross_join(self, right: PlanUnit) -> PlanUnit {
        let mut columns = self.columns;
        columns.extend(right.columns);
        PlanUnit {
            node: PlanNode::NaturalJoin {
                left: Box::new(self.node),
                right: Box::new(right.node),
            },
            columns,
        }
    }
}

/// Columns `expr` reads from the current query level, including those read
/// by correlated sub-queries.
pub fn referenced_columns(expr: &Expression) -> Vec<Variable> {
    let mut vars = Vec::new();
    variables(expr, &mut vars);
    let mut correlated = Vec::new();
    correlated_variables(expr, 0, &mut correlated);
    vars.extend(correlated.into_iter().map(|c| c.var));
    vars
}

/// If the expression is usable as the value side of a column selection.
fn is_value(expr: &Expression) -> bool {
    let mut vars = Vec::new();
    variables(expr, &mut vars);
    vars.is_empty() && !has_subquery(expr) && !has_aggregate(expr)
}

/// Range of a single column the predicate selects, if the predicate only
/// compares one column with literals.
pub fn as_range(expr: &Expression) -> Option<(Variable, SelectableRangeSet)> {
    match expr {
        Expression::Comparison { op, left, right } => match (left.as_ref(), right.as_ref()) {
            (Expression::Column(var), Expression::Literal(value)) => {
                Some((var.clone(), SelectableRangeSet::full().intersect(*op, value)))
            }
            (Expression::Literal(value), Expression::Column(var)) => Some((
                var.clone(),
                SelectableRangeSet::full().intersect(op.flip(), value),
            )),
            _ => None,
        },
        Expression::IsNull { input, negated } => {
            let var = input.as_variable()?;
            let set = if *negated {
                SelectableRangeSet::non_nulls()
            } else {
                SelectableRangeSet::nulls()
            };
            Some((var.clone(), set))
        }
        Expression::InList {
            input,
            list,
            negated: false,
        } => {
            let var = input.as_variable()?;
            let mut set = SelectableRangeSet::empty();
            for item in list {
                let value = item.as_literal()?;
                set = set.union(&SelectableRangeSet::full().intersect(ComparisonOperator::Eq, value));
            }
            Some((var.clone(), set))
        }
        Expression::Conjunction { op, left, right } => {
            let (lvar, lset) = as_range(left)?;
            let (rvar, rset) = as_range(right)?;
            if lvar != rvar {
                return None;
            }
            let set = match op {
                ConjunctionOperator::And => lset.intersect_set(&rset),
                ConjunctionOperator::Or => lset.union(&rset),
            };
            Some((lvar, set))
        }
        _ => None,
    }
}

/// How a single-unit conjunct is applied.
#[derive(Debug)]
enum Selection {
    Range(Variable, SelectableRangeSet, Expression),
    Simple(Variable, ComparisonOperator, Expression),
    Pattern(Variable, Expression, bool),
    AnyAll(Variable, ComparisonOperator, bool, PlanNode),
    Union(Vec<Expression>),
    Exhaustive(Expression),
}

impl Selection {
    /// Order in which selections are applied. Index-backed selections run
    /// first so the exhaustive ones see fewer rows.
    fn rank(&self) -> u8 {
        match self {
            Selection::Range(..) => 0,
            Selection::Simple(..) => 1,
            Selection::Pattern(..) => 2,
            Selection::AnyAll(..) => 3,
            Selection::Union(..) => 4,
            Selection::Exhaustive(e) if has_subquery(e) || has_correlated(e) => 6,
            Selection::Exhaustive(_) => 5,
        }
    }

    fn is_indexed(&self) -> bool {
        matches!(
            self,
            Selection::Range(..) | Selection::Simple(..) | Selection::Pattern(..)
        )
    }
}

fn classify(expr: Expression) -> Selection {
    if let Some((var, set)) = as_range(&expr) {
        return Selection::Range(var, set, expr);
    }
    match expr {
        Expression::Comparison { op, left, right } => match (*left, *right) {
            (Expression::Column(var), value) if is_value(&value) => {
                Selection::Simple(var, op, value)
            }
            (value, Expression::Column(var)) if is_value(&value) => {
                Selection::Simple(var, op.flip(), value)
            }
            (left, right) => Selection::Exhaustive(Expression::compare(op, left, right)),
        },
        Expression::Like {
            input,
            pattern,
            negated,
        } => match *input {
            Expression::Column(var) if is_value(&pattern) => {
                Selection::Pattern(var, *pattern, negated)
            }
            input => Selection::Exhaustive(Expression::Like {
                input: Box::new(input),
                pattern,
                negated,
            }),
        },
        Expression::Subquery(sub) => match non_correlated_any_all(&sub) {
            Some((var, op, all, node)) => Selection::AnyAll(var, op, all, node),
            None => Selection::Exhaustive(Expression::Subquery(sub)),
        },
        expr @ Expression::Conjunction {
            op: ConjunctionOperator::Or,
            ..
        } if !has_subquery(&expr) => {
            let disjuncts = expr.clone().into_disjuncts();
            let indexed = disjuncts.iter().all(|d| {
                d.clone()
                    .into_conjuncts()
                    .into_iter()
                    .any(|c| classify(c).is_indexed())
            });
            if indexed {
                Selection::Union(disjuncts)
            } else {
                Selection::Exhaustive(expr)
            }
        }
        other => Selection::Exhaustive(other),
    }
}

/// `column op ANY/ALL (sub-query)` where the sub-query doesn't depend on
/// the current row.
fn non_correlated_any_all(
    sub: &SubqueryExpr,
) -> Option<(Variable, ComparisonOperator, bool, PlanNode)> {
    let (op, all) = match sub.kind {
        SubqueryKind::Any(op) => (op, false),
        SubqueryKind::All(op) => (op, true),
        SubqueryKind::Scalar | SubqueryKind::Exists => return None,
    };
    let var = sub.lhs.as_ref()?.as_variable()?.clone();
    let plan = match &sub.query {
        SubqueryQuery::Planned(plan) => plan,
        SubqueryQuery::Unplanned(_) => return None,
    };
    if plan.node.has_outer_references() {
        return None;
    }
    Some((var, op, all, plan.node.as_ref().clone()))
}

/// Apply conjuncts that only read columns of `unit`.
pub fn plan_unit_filter(
    planner: &Planner,
    unit: PlanUnit,
    conjuncts: Vec<Expression>,
) -> Result<PlanUnit> {
    let node = plan_node_filter(planner, unit.node, conjuncts)?;
    Ok(PlanUnit::new(node, unit.columns))
}

fn plan_node_filter(planner: &Planner, node: PlanNode, conjuncts: Vec<Expression>) -> Result<PlanNode> {
    let mut selections: Vec<Selection> = Vec::with_capacity(conjuncts.len());
    for conjunct in conjuncts {
        let selection = classify(conjunct);
        // Fold ranges over the same column into one selection.
        if let Selection::Range(var, set, expr) = &selection {
            if let Some(Selection::Range(_, existing, existing_expr)) = selections
                .iter_mut()
                .find(|s| matches!(s, Selection::Range(v, ..) if v == var))
            {
                *existing = existing.intersect_set(set);
                *existing_expr = Expression::and(existing_expr.clone(), expr.clone());
                continue;
            }
        }
        selections.push(selection);
    }
    selections.sort_by_key(|s| s.rank());

    let mut node = node;
    for selection in selections {
        debug!(?selection, "planned selection");
        let child = Box::new(node);
        node = match selection {
            Selection::Range(column, ranges, expr) => match expr {
                // A lone literal comparison reads better as a simple select.
                Expression::Comparison { op, right, .. } if right.as_literal().is_some() => {
                    PlanNode::SimpleSelect {
                        child,
                        column,
                        op,
                        value: *right,
                    }
                }
                Expression::Comparison { op, left, .. } if left.as_literal().is_some() => {
                    PlanNode::SimpleSelect {
                        child,
                        column,
                        op: op.flip(),
                        value: *left,
                    }
                }
                _ => PlanNode::RangeSelect {
                    child,
                    column,
                    ranges,
                },
            },
            Selection::Simple(column, op, value) => PlanNode::SimpleSelect {
                child,
                column,
                op,
                value,
            },
            Selection::Pattern(column, pattern, negated) => PlanNode::PatternSelect {
                child,
                column,
                pattern,
                negated,
            },
            Selection::AnyAll(column, op, all, subquery) => PlanNode::NonCorrelatedAnyAll {
                child,
                column,
                op,
                all,
                subquery: Box::new(subquery),
            },
            Selection::Union(disjuncts) => {
                let source = PlanNode::CachePoint {
                    id: planner.next_cache_id(),
                    child,
                };
                let branches = disjuncts
                    .into_iter()
                    .map(|d| plan_node_filter(planner, source.clone(), d.into_conjuncts()))
                    .collect::<Result<Vec<_>>>()?;
                PlanNode::LogicalUnion {
                    source: Box::new(source),
                    branches,
                }
            }
            Selection::Exhaustive(predicate) => PlanNode::ExhaustiveSelect { child, predicate },
        };
    }
    Ok(node)
}

/// Plans filters over a set of units.
#[derive(Debug)]
pub struct TableSetPlanner<'a> {
    planner: &'a Planner,
    units: Vec<PlanUnit>,
    constant: Vec<Expression>,
}

impl<'a> TableSetPlanner<'a> {
    pub fn new(planner: &'a Planner, units: Vec<PlanUnit>) -> Self {
        TableSetPlanner {
            planner,
            units,
            constant: Vec::new(),
        }
    }

    fn units_of(&self, vars: &[Variable]) -> Result<Vec<usize>> {
        let mut units = Vec::new();
        for var in vars {
            let idx = self
                .units
                .iter()
                .position(|u| u.has_column(var))
                .ok_or_else(|| {
                    DbError::precondition(format!("Column '{var}' is not in any FROM source"))
                })?;
            if !units.contains(&idx) {
                units.push(idx);
            }
        }
        units.sort_unstable();
        Ok(units)
    }

    /// Plan a qualified WHERE expression.
    pub fn plan_filter(&mut self, expr: Expression) -> Result<()> {
        let mut single: Vec<Vec<Expression>> = vec![Vec::new(); self.units.len()];
        let mut spanning = Vec::new();

        for conjunct in expr.into_conjuncts() {
            let vars = referenced_columns(&conjunct);
            let units = self.units_of(&vars)?;
            match units.as_slice() {
                [] => self.constant.push(conjunct),
                [idx] => single[*idx].push(conjunct),
                _ => spanning.push(conjunct),
            }
        }

        let units = std::mem::take(&mut self.units);
        self.units = units
            .into_iter()
            .zip(single)
            .map(|(unit, conjuncts)| {
                if conjuncts.is_empty() {
                    Ok(unit)
                } else {
                    plan_unit_filter(self.planner, unit, conjuncts)
                }
            })
            .collect::<Result<Vec<_>>>()?;

        // Equi-joins first, then other column comparisons, then the rest.
        spanning.sort_by_key(|c| match join_columns(c) {
            Some((_, ComparisonOperator::Eq, _)) => 0,
            Some(_) => 1,
            None => 2,
        });
        for conjunct in spanning {
            self.plan_spanning(conjunct)?;
        }
        Ok(())
    }

    fn plan_spanning(&mut self, conjunct: Expression) -> Result<()> {
        let units = self.units_of(&referenced_columns(&conjunct))?;
        if units.len() < 2 {
            // Already joined by an earlier conjunct.
            let idx = units.first().copied().unwrap_or(0);
            let unit = self.units.remove(idx);
            let unit = plan_unit_filter(self.planner, unit, vec![conjunct])?;
            self.units.insert(idx, unit);
            return Ok(());
        }

        if let Some((left_var, op, right_var)) = join_columns(&conjunct) {
            if units.len() == 2 {
                let (left_idx, right_idx) = (units[0], units[1]);
                // Put the join columns on the side of the unit they belong to.
                let (left_column, op, right_column) = if self.units[left_idx].has_column(&left_var) {
                    (left_var, op, right_var)
                } else {
                    (right_var, op.flip(), left_var)
                };
                let right = self.units.remove(right_idx);
                let left = self.units.remove(left_idx);
                let mut columns = left.columns;
                columns.extend(right.columns);
                let node = PlanNode::Join {
                    left: Box::new(left.node),
                    right: Box::new(right.node),
                    left_column,
                    op,
                    right_column,
                };
                self.units.insert(left_idx, PlanUnit::new(node, columns));
                return Ok(());
            }
        }

        // Join every unit involved, then filter.
        let first = units[0];
        let mut merged = self.units.remove(first);
        // Indices after `first` shifted down by one.
        let mut rest = Vec::with_capacity(units.len() - 1);
        for &idx in units[1..].iter().rev() {
            rest.push(self.units.remove(idx - 1));
        }
        for unit in rest.into_iter().rev() {
            merged = merged.cross_join(unit);
        }
        let merged = plan_unit_filter(self.planner, merged, vec![conjunct])?;
        self.units.insert(first, merged);
        Ok(())
    }

    /// Join what remains and apply constant conjuncts.
    pub fn finish(self) -> Result<PlanUnit> {
        let mut units = self.units.into_iter();
        let mut unit = units
            .next()
            .ok_or_else(|| DbError::precondition("Table set has no sources"))?;
        for next in units {
            unit = unit.cross_join(next);
        }
        if let Some(predicate) = Expression::and_all(self.constant) {
            unit = unit.map_node(|child| PlanNode::ConstantSelect { child, predicate });
        }
        Ok(unit)
    }
}

/// `left op right` where both sides are plain columns.
fn join_columns(expr: &Expression) -> Option<(Variable, ComparisonOperator, Variable)> {
    match expr {
        Expression::Comparison { op, left, right } => {
            Some((left.as_variable()?.clone(), *op, right.as_variable()?.clone()))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scalar::ScalarValue;

    #[test]
    fn range_from_or_of_literals() {
        let expr = Expression::or(
            Expression::compare(ComparisonOperator::Lt, Expression::col("t.a"), Expression::lit(2)),
            Expression::compare(ComparisonOperator::Gt, Expression::lit(10), Expression::col("t.a")),
        );
        let (var, set) = as_range(&expr).unwrap();
        assert_eq!(Variable::parse("t.a"), var);
        assert_eq!(1, set.ranges().len());
        assert!(set.ranges()[0].contains(&ScalarValue::Int32(5)));
    }

    #[test]
    fn range_requires_single_column() {
        let expr = Expression::and(
            Expression::eq(Expression::col("t.a"), Expression::lit(1)),
            Expression::eq(Expression::col("t.b"), Expression::lit(1)),
        );
        assert!(as_range(&expr).is_none());
        let expr = Expression::eq(Expression::col("t.a"), Expression::col("t.b"));
        assert!(as_range(&expr).is_none());
    }

    #[test]
    fn in_list_is_range() {
        let expr = Expression::InList {
            input: Box::new(Expression::col("t.a")),
            list: vec![Expression::lit(1), Expression::lit(5)],
            negated: false,
        };
        let (_, set) = as_range(&expr).unwrap();
        assert_eq!(2, set.ranges().len());
    }

    #[test]
    fn classification() {
        let correlated = Expression::Correlated(crate::expr::CorrelatedVariable {
            var: Variable::parse("o.x"),
            level: 1,
            datatype: crate::scalar::datatype::DataType::Int32,
        });
        assert!(matches!(
            classify(Expression::eq(Expression::col("t.a"), correlated)),
            Selection::Simple(..)
        ));
        assert!(matches!(
            classify(Expression::Like {
                input: Box::new(Expression::col("t.b")),
                pattern: Box::new(Expression::lit("a%")),
                negated: false,
            }),
            Selection::Pattern(..)
        ));
        assert!(matches!(
            classify(Expression::eq(
                Expression::arith(
                    crate::expr::ArithOperator::Add,
                    Expression::col("t.a"),
                    Expression::lit(1)
                ),
                Expression::lit(2)
            )),
            Selection::Exhaustive(_)
        ));
        assert!(matches!(
            classify(Expression::or(
                Expression::eq(Expression::col("t.a"), Expression::lit(1)),
                Expression::eq(Expression::col("t.b"), Expression::lit("x")),
            )),
            Selection::Union(_)
        ));
    }
}

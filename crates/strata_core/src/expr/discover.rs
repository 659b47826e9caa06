//! Analysis passes over expressions.
//!
//! None of these descend into a sub-query's own expressions except where
//! noted. A sub-query's left operand is an ordinary child.

use strata_error::Result;

use super::{AggregateCall, CorrelatedVariable, Expression, SubqueryExpr, SubqueryQuery};
use crate::schema::{TableName, Variable};

/// Call `f` on each direct child of `expr`.
pub fn for_each_child<'a>(expr: &'a Expression, f: &mut dyn FnMut(&'a Expression)) {
    match expr {
        Expression::Literal(_) | Expression::Column(_) | Expression::Correlated(_) => (),
        Expression::Comparison { left, right, .. }
        | Expression::Conjunction { left, right, .. }
        | Expression::Arith { left, right, .. } => {
            f(left);
            f(right);
        }
        Expression::Not(input)
        | Expression::Negate(input)
        | Expression::IsNull { input, .. }
        | Expression::Cast { input, .. } => f(input),
        Expression::Like { input, pattern, .. } => {
            f(input);
            f(pattern);
        }
        Expression::InList { input, list, .. } => {
            f(input);
            for e in list {
                f(e);
            }
        }
        Expression::Aggregate(AggregateCall { input, .. }) => {
            if let Some(input) = input {
                f(input);
            }
        }
        Expression::Subquery(SubqueryExpr { lhs, .. }) => {
            if let Some(lhs) = lhs {
                f(lhs);
            }
        }
    }
}

/// Rebuild `expr` with `f` applied to each direct child.
pub fn map_children(
    expr: Expression,
    f: &mut dyn FnMut(Expression) -> Result<Expression>,
) -> Result<Expression> {
    let mut boxed = |e: Box<Expression>| -> Result<Box<Expression>> { Ok(Box::new(f(*e)?)) };
    Ok(match expr {
        e @ (Expression::Literal(_) | Expression::Column(_) | Expression::Correlated(_)) => e,
        Expression::Comparison { op, left, right } => Expression::Comparison {
            op,
            left: boxed(left)?,
            right: boxed(right)?,
        },
        Expression::Conjunction { op, left, right } => Expression::Conjunction {
            op,
            left: boxed(left)?,
            right: boxed(right)?,
        },
        Expression::Arith { op, left, right } => Expression::Arith {
            op,
            left: boxed(left)?,
            right: boxed(right)?,
        },
        Expression::Not(input) => Expression::Not(boxed(input)?),
        Expression::Negate(input) => Expression::Negate(boxed(input)?),
        Expression::IsNull { input, negated } => Expression::IsNull {
            input: boxed(input)?,
            negated,
        },
        Expression::Cast { input, to } => Expression::Cast {
            input: boxed(input)?,
            to,
        },
        Expression::Like {
            input,
            pattern,
            negated,
        } => Expression::Like {
            input: boxed(input)?,
            pattern: boxed(pattern)?,
            negated,
        },
        Expression::InList {
            input,
            list,
            negated,
        } => {
            let input = boxed(input)?;
            let list = list
                .into_iter()
                .map(|e| boxed(Box::new(e)).map(|e| *e))
                .collect::<Result<Vec<_>>>()?;
            Expression::InList {
                input,
                list,
                negated,
            }
        }
        Expression::Aggregate(AggregateCall {
            function,
            input,
            distinct,
        }) => Expression::Aggregate(AggregateCall {
            function,
            input: input.map(&mut boxed).transpose()?,
            distinct,
        }),
        Expression::Subquery(SubqueryExpr { kind, lhs, query }) => {
            Expression::Subquery(SubqueryExpr {
                kind,
                lhs: lhs.map(&mut boxed).transpose()?,
                query,
            })
        }
    })
}

/// Append every column reference in `expr` to `acc`, in order of appearance.
pub fn variables(expr: &Expression, acc: &mut Vec<Variable>) {
    if let Expression::Column(var) = expr {
        acc.push(var.clone());
        return;
    }
    for_each_child(expr, &mut |child| variables(child, acc));
}

/// Append correlated references bound `level` query levels up.
///
/// Descends into planned sub-queries, where the same variable appears one
/// level further up.
pub fn correlated_variables(expr: &Expression, level: usize, acc: &mut Vec<CorrelatedVariable>) {
    match expr {
        Expression::Correlated(c) => {
            if c.level == level && !acc.contains(c) {
                acc.push(c.clone());
            }
        }
        Expression::Subquery(SubqueryExpr {
            query: SubqueryQuery::Planned(plan),
            ..
        }) => {
            plan.node.discover_correlated_variables(level + 1, acc);
        }
        _ => (),
    }
    for_each_child(expr, &mut |child| correlated_variables(child, level, acc));
}

/// Append correlated references bound `min_level` or more query levels up.
pub fn outer_references(expr: &Expression, min_level: usize, acc: &mut Vec<CorrelatedVariable>) {
    match expr {
        Expression::Correlated(c) => {
            if c.level >= min_level && !acc.contains(c) {
                acc.push(c.clone());
            }
        }
        Expression::Subquery(SubqueryExpr {
            query: SubqueryQuery::Planned(plan),
            ..
        }) => {
            plan.node
                .for_each_expression(&mut |e| outer_references(e, min_level + 1, acc));
        }
        _ => (),
    }
    for_each_child(expr, &mut |child| outer_references(child, min_level, acc));
}

/// If `expr` depends on the row of any enclosing query.
pub fn has_correlated(expr: &Expression) -> bool {
    let mut acc = Vec::new();
    outer_references(expr, 1, &mut acc);
    !acc.is_empty()
}

/// If `expr` contains an aggregate call outside of any sub-query.
pub fn has_aggregate(expr: &Expression) -> bool {
    let mut found = false;
    check(expr, &mut |e| found |= matches!(e, Expression::Aggregate(_)));
    found
}

/// If `expr` contains a sub-query.
pub fn has_subquery(expr: &Expression) -> bool {
    let mut found = false;
    check(expr, &mut |e| found |= matches!(e, Expression::Subquery(_)));
    found
}

/// Outermost aggregate calls in `expr`, deduplicated.
pub fn aggregates(expr: &Expression, acc: &mut Vec<Expression>) {
    if let Expression::Aggregate(_) = expr {
        if !acc.contains(expr) {
            acc.push(expr.clone());
        }
        return;
    }
    for_each_child(expr, &mut |child| aggregates(child, acc));
}

/// If `expr` evaluates to the same value for every row.
///
/// True when it references no columns, correlated variables, aggregates or
/// sub-queries.
pub fn is_constant(expr: &Expression) -> bool {
    let mut constant = true;
    check(expr, &mut |e| {
        if matches!(
            e,
            Expression::Column(_)
                | Expression::Correlated(_)
                | Expression::Aggregate(_)
                | Expression::Subquery(_)
        ) {
            constant = false;
        }
    });
    constant
}

/// Table names read by sub-queries nested in `expr`.
pub fn table_names(expr: &Expression, acc: &mut Vec<TableName>) {
    if let Expression::Subquery(SubqueryExpr {
        query: SubqueryQuery::Planned(plan),
        ..
    }) = expr
    {
        plan.node.discover_table_names(acc);
    }
    for_each_child(expr, &mut |child| table_names(child, acc));
}

fn check(expr: &Expression, f: &mut dyn FnMut(&Expression)) {
    f(expr);
    for_each_child(expr, &mut |child| check(child, f));
}

//! Row-at-a-time expression evaluation with three-valued logic.

use strata_error::{DbError, Result};
use tracing::trace;

use super::aggregate::evaluate_aggregate;
use super::like::like_pattern_to_regex;
use super::{ComparisonOperator, ConjunctionOperator, Expression, SubqueryExpr, SubqueryKind};
use crate::context::QueryContext;
use crate::scalar::ScalarValue;
use crate::table::resolver::{GroupResolver, VariableResolver};
use crate::table::{Table, collect_column};

impl Expression {
    /// Evaluate this expression.
    ///
    /// `group` is required if the expression contains an aggregate. Column
    /// references resolve through `resolver`, correlated references through
    /// the context's bound frames.
    pub fn evaluate(
        &self,
        group: Option<&dyn GroupResolver>,
        resolver: &dyn VariableResolver,
        ctx: &QueryContext,
    ) -> Result<ScalarValue> {
        Ok(match self {
            Expression::Literal(v) => v.clone(),
            Expression::Column(var) => resolver.resolve(var)?,
            Expression::Correlated(c) => ctx.resolve_correlated(&c.var, c.level)?,
            Expression::Comparison { op, left, right } => {
                let left = left.evaluate(group, resolver, ctx)?;
                let right = right.evaluate(group, resolver, ctx)?;
                op.compare(&left, &right)?.into()
            }
            Expression::Conjunction { op, left, right } => {
                let left = left.evaluate(group, resolver, ctx)?.try_as_bool()?;
                // Short circuit on the deciding value.
                match (op, left) {
                    (ConjunctionOperator::And, Some(false)) => return Ok(false.into()),
                    (ConjunctionOperator::Or, Some(true)) => return Ok(true.into()),
                    _ => (),
                }
                let right = right.evaluate(group, resolver, ctx)?.try_as_bool()?;
                match op {
                    ConjunctionOperator::And => and3(left, right).into(),
                    ConjunctionOperator::Or => or3(left, right).into(),
                }
            }
            Expression::Arith { op, left, right } => {
                let left = left.evaluate(group, resolver, ctx)?;
                let right = right.evaluate(group, resolver, ctx)?;
                op.apply(&left, &right)?
            }
            Expression::Not(input) => input
                .evaluate(group, resolver, ctx)?
                .try_as_bool()?
                .map(|b| !b)
                .into(),
            Expression::Negate(input) => input.evaluate(group, resolver, ctx)?.negate()?,
            Expression::IsNull { input, negated } => {
                let v = input.evaluate(group, resolver, ctx)?;
                (v.is_null() != *negated).into()
            }
            Expression::Like {
                input,
                pattern,
                negated,
            } => {
                let v = input.evaluate(group, resolver, ctx)?;
                let p = pattern.evaluate(group, resolver, ctx)?;
                match (v.try_as_str()?, p.try_as_str()?) {
                    (Some(v), Some(p)) => {
                        let matched = like_pattern_to_regex(p)?.is_match(v);
                        (matched != *negated).into()
                    }
                    _ => ScalarValue::Null,
                }
            }
            Expression::InList {
                input,
                list,
                negated,
            } => {
                let v = input.evaluate(group, resolver, ctx)?;
                let mut result = Some(false);
                for item in list {
                    let item = item.evaluate(group, resolver, ctx)?;
                    result = or3(result, ComparisonOperator::Eq.compare(&v, &item)?);
                    if result == Some(true) {
                        break;
                    }
                }
                if *negated {
                    result.map(|b| !b).into()
                } else {
                    result.into()
                }
            }
            Expression::Cast { input, to } => input.evaluate(group, resolver, ctx)?.cast(*to)?,
            Expression::Aggregate(call) => {
                let group = group.ok_or_else(|| {
                    DbError::planning(format!(
                        "Aggregate '{self}' used outside of a grouping context"
                    ))
                })?;
                evaluate_aggregate(call, group, ctx)?
            }
            Expression::Subquery(sub) => evaluate_subquery(sub, group, resolver, ctx)?,
        })
    }

    /// Evaluate as a predicate. Null counts as false.
    pub fn evaluate_predicate(
        &self,
        group: Option<&dyn GroupResolver>,
        resolver: &dyn VariableResolver,
        ctx: &QueryContext,
    ) -> Result<bool> {
        Ok(self
            .evaluate(group, resolver, ctx)?
            .try_as_bool()?
            .unwrap_or(false))
    }
}

fn and3(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

fn or3(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    }
}

fn evaluate_subquery(
    sub: &SubqueryExpr,
    group: Option<&dyn GroupResolver>,
    resolver: &dyn VariableResolver,
    ctx: &QueryContext,
) -> Result<ScalarValue> {
    let plan = sub.plan()?;

    // Bind the current row's values for every variable the sub-query reads
    // from this query level. A frame is pushed even with no bindings when
    // deeper levels are referenced, so frame depth tracks nesting depth.
    let mut correlated = Vec::new();
    plan.node.discover_correlated_variables(1, &mut correlated);
    let table = if correlated.is_empty() && !plan.node.has_outer_references() {
        plan.node.evaluate(ctx)?
    } else {
        let bindings = correlated
            .into_iter()
            .map(|c| {
                let value = resolver.resolve(&c.var)?;
                Ok((c.var, value))
            })
            .collect::<Result<Vec<_>>>()?;
        trace!(bindings = bindings.len(), "evaluating correlated sub-query");
        plan.node.evaluate(&ctx.with_frame(bindings))?
    };

    match sub.kind {
        SubqueryKind::Exists => Ok((table.row_count() > 0).into()),
        SubqueryKind::Scalar => match table.row_count() {
            0 => Ok(ScalarValue::Null),
            1 => {
                let row = table.row_enumerator().get(0).unwrap_or(0);
                table.get_value(0, row)
            }
            n => Err(DbError::new("Scalar sub-query returned more than one row")
                .with_field("rows", n)),
        },
        SubqueryKind::Any(op) | SubqueryKind::All(op) => {
            let lhs = sub
                .lhs
                .as_ref()
                .ok_or_else(|| DbError::precondition("ANY/ALL sub-query missing left operand"))?
                .evaluate(group, resolver, ctx)?;
            let all = matches!(sub.kind, SubqueryKind::All(_));
            Ok(quantified_compare(&lhs, op, table.as_ref(), all)?.into())
        }
    }
}

/// `lhs op ANY (column)` or `lhs op ALL (column)` over the first column of
/// `table`.
pub(crate) fn quantified_compare(
    lhs: &ScalarValue,
    op: ComparisonOperator,
    table: &dyn Table,
    all: bool,
) -> Result<Option<bool>> {
    let mut result = Some(all);
    for v in collect_column(table, 0)? {
        let cmp = op.compare(lhs, &v)?;
        result = if all { and3(result, cmp) } else { or3(result, cmp) };
        if result == Some(!all) {
            break;
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ArithOperator;
    use crate::table::memory::IndexKind;
    use crate::table::resolver::{NoVariables, TableRowResolver};
    use crate::testutil::{int_table, test_context, two_col_table};

    fn eval(expr: &Expression) -> ScalarValue {
        expr.evaluate(None, &NoVariables, &test_context()).unwrap()
    }

    fn null() -> Expression {
        Expression::Literal(ScalarValue::Null)
    }

    #[test]
    fn three_valued_logic() {
        let t = Expression::lit(true);
        let f = Expression::lit(false);
        assert_eq!(ScalarValue::Null, eval(&Expression::and(t.clone(), null())));
        assert_eq!(ScalarValue::from(false), eval(&Expression::and(null(), f.clone())));
        assert_eq!(ScalarValue::from(true), eval(&Expression::or(null(), t.clone())));
        assert_eq!(ScalarValue::Null, eval(&Expression::or(f.clone(), null())));
        assert_eq!(ScalarValue::Null, eval(&Expression::Not(Box::new(null()))));
    }

    #[test]
    fn comparison_with_null_is_null() {
        let expr = Expression::eq(Expression::lit(1), null());
        assert_eq!(ScalarValue::Null, eval(&expr));
        assert!(!expr.evaluate_predicate(None, &NoVariables, &test_context()).unwrap());
    }

    #[test]
    fn in_list_semantics() {
        let in_list = |v: Expression, negated| Expression::InList {
            input: Box::new(v),
            list: vec![Expression::lit(1), null(), Expression::lit(3)],
            negated,
        };
        assert_eq!(ScalarValue::from(true), eval(&in_list(Expression::lit(3), false)));
        assert_eq!(ScalarValue::Null, eval(&in_list(Expression::lit(2), false)));
        assert_eq!(ScalarValue::Null, eval(&in_list(Expression::lit(2), true)));
        assert_eq!(ScalarValue::from(false), eval(&in_list(Expression::lit(1), true)));
    }

    #[test]
    fn like_and_arith() {
        let like = Expression::Like {
            input: Box::new(Expression::lit("hello")),
            pattern: Box::new(Expression::lit("h%o")),
            negated: false,
        };
        assert_eq!(ScalarValue::from(true), eval(&like));
        let add = Expression::arith(ArithOperator::Mul, Expression::lit(6), Expression::lit(7));
        assert_eq!(ScalarValue::from(42), eval(&add));
    }

    #[test]
    fn resolves_columns() {
        let t = two_col_table();
        let resolver = TableRowResolver::new(t.as_ref(), 2);
        let expr = Expression::eq(Expression::col("t.b"), Expression::lit("x"));
        let v = expr.evaluate(None, &resolver, &test_context()).unwrap();
        assert_eq!(ScalarValue::from(true), v);
    }

    #[test]
    fn aggregate_needs_group() {
        let err = Expression::count_star()
            .evaluate(None, &NoVariables, &test_context())
            .unwrap_err();
        assert!(err.is_planning());
    }

    #[test]
    fn quantified_comparisons() {
        let t = int_table("t", IndexKind::Sorted, &[Some(1), Some(5)]);
        let v = ScalarValue::from(3);
        assert_eq!(
            Some(true),
            quantified_compare(&v, ComparisonOperator::Gt, t.as_ref(), false).unwrap()
        );
        assert_eq!(
            Some(false),
            quantified_compare(&v, ComparisonOperator::Gt, t.as_ref(), true).unwrap()
        );

        let with_null = int_table("t", IndexKind::Sorted, &[Some(1), None]);
        assert_eq!(
            None,
            quantified_compare(&v, ComparisonOperator::Gt, with_null.as_ref(), true).unwrap()
        );

        let empty = int_table("t", IndexKind::Sorted, &[]);
        assert_eq!(
            Some(true),
            quantified_compare(&v, ComparisonOperator::Eq, empty.as_ref(), true).unwrap()
        );
        assert_eq!(
            Some(false),
            quantified_compare(&v, ComparisonOperator::Eq, empty.as_ref(), false).unwrap()
        );
    }
}

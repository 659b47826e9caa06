use strata_error::{DbError, Result};

use super::{AggregateCall, AggregateFunction};
use crate::context::QueryContext;
use crate::scalar::ScalarValue;
use crate::scalar::datatype::DataType;
use crate::table::resolver::{GroupMemberResolver, GroupResolver};

/// Result type of an aggregate given its input type.
pub fn return_type(function: AggregateFunction, input: DataType) -> Result<DataType> {
    let check_numeric = || {
        if input.is_numeric() || input.is_null() {
            Ok(())
        } else {
            Err(DbError::planning(format!(
                "Aggregate '{function}' not supported for type {input}"
            )))
        }
    };
    Ok(match function {
        AggregateFunction::Count => DataType::Int64,
        AggregateFunction::Sum => {
            check_numeric()?;
            if input == DataType::Float64 {
                DataType::Float64
            } else {
                DataType::Int64
            }
        }
        AggregateFunction::Avg => {
            check_numeric()?;
            DataType::Float64
        }
        AggregateFunction::Min | AggregateFunction::Max => input,
    })
}

/// Evaluate an aggregate over every member of a group.
///
/// Nulls are skipped. Aggregates other than COUNT produce null for a group
/// with no non-null inputs.
pub fn evaluate_aggregate(
    call: &AggregateCall,
    group: &dyn GroupResolver,
    ctx: &QueryContext,
) -> Result<ScalarValue> {
    let input = match &call.input {
        Some(input) => input,
        None => return Ok(ScalarValue::Int64(group.size() as i64)),
    };

    let mut values = Vec::with_capacity(group.size());
    for member in 0..group.size() {
        let resolver = GroupMemberResolver::new(group, member);
        let v = input.evaluate(None, &resolver, ctx)?;
        if !v.is_null() {
            values.push(v);
        }
    }
    if call.distinct {
        values.sort_by(|a, b| a.sort_cmp(b));
        values.dedup_by(|a, b| a.sort_cmp(b).is_eq());
    }

    match call.function {
        AggregateFunction::Count => Ok(ScalarValue::Int64(values.len() as i64)),
        AggregateFunction::Sum => sum(&values),
        AggregateFunction::Avg => {
            if values.is_empty() {
                return Ok(ScalarValue::Null);
            }
            let mut total = 0.0;
            for v in &values {
                total += v.try_as_f64()?.unwrap_or_default();
            }
            Ok(ScalarValue::Float64(total / values.len() as f64))
        }
        AggregateFunction::Min => Ok(values
            .into_iter()
            .min_by(|a, b| a.sort_cmp(b))
            .unwrap_or(ScalarValue::Null)),
        AggregateFunction::Max => Ok(values
            .into_iter()
            .max_by(|a, b| a.sort_cmp(b))
            .unwrap_or(ScalarValue::Null)),
    }
}

fn sum(values: &[ScalarValue]) -> Result<ScalarValue> {
    if values.is_empty() {
        return Ok(ScalarValue::Null);
    }
    if values.iter().any(|v| matches!(v, ScalarValue::Float64(_))) {
        let mut total = 0.0;
        for v in values {
            total += v.try_as_f64()?.unwrap_or_default();
        }
        return Ok(ScalarValue::Float64(total));
    }
    let mut total: i64 = 0;
    for v in values {
        let v = v.try_as_i64()?.unwrap_or_default();
        total = total
            .checked_add(v)
            .ok_or_else(|| DbError::new("Integer overflow in sum"))?;
    }
    Ok(ScalarValue::Int64(total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expression;
    use crate::table::resolver::TableGroupResolver;
    use crate::testutil::{int_table, test_context};
    use crate::table::memory::IndexKind;

    fn run(call: Expression, values: &[Option<i32>]) -> ScalarValue {
        let t = int_table("t", IndexKind::Sorted, values);
        let rows: Vec<usize> = (0..values.len()).collect();
        let group = TableGroupResolver::new(t.as_ref(), &rows);
        let Expression::Aggregate(call) = call else {
            unreachable!()
        };
        evaluate_aggregate(&call, &group, &test_context()).unwrap()
    }

    fn agg(function: AggregateFunction) -> Expression {
        Expression::aggregate(function, Some(Expression::col("t.a")))
    }

    #[test]
    fn skips_nulls() {
        let values = [Some(3), None, Some(1), Some(3)];
        assert_eq!(ScalarValue::Int64(4), run(Expression::count_star(), &values));
        assert_eq!(ScalarValue::Int64(3), run(agg(AggregateFunction::Count), &values));
        assert_eq!(ScalarValue::Int64(7), run(agg(AggregateFunction::Sum), &values));
        assert_eq!(ScalarValue::from(1), run(agg(AggregateFunction::Min), &values));
        assert_eq!(ScalarValue::from(3), run(agg(AggregateFunction::Max), &values));
        assert_eq!(
            ScalarValue::Float64(7.0 / 3.0),
            run(agg(AggregateFunction::Avg), &values)
        );
    }

    #[test]
    fn distinct_inputs() {
        let Expression::Aggregate(mut call) = agg(AggregateFunction::Sum) else {
            unreachable!()
        };
        call.distinct = true;
        let values = [Some(3), Some(1), Some(3)];
        assert_eq!(ScalarValue::Int64(4), run(Expression::Aggregate(call), &values));
    }

    #[test]
    fn empty_group() {
        assert_eq!(ScalarValue::Int64(0), run(Expression::count_star(), &[]));
        assert_eq!(ScalarValue::Null, run(agg(AggregateFunction::Sum), &[]));
        assert_eq!(ScalarValue::Null, run(agg(AggregateFunction::Max), &[None]));
    }

    #[test]
    fn non_numeric_sum_rejected() {
        assert!(return_type(AggregateFunction::Sum, DataType::Utf8).unwrap_err().is_planning());
        assert_eq!(DataType::Utf8, return_type(AggregateFunction::Max, DataType::Utf8).unwrap());
    }
}

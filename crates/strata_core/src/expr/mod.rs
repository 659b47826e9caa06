//! Scalar expressions.
//!
//! Expressions are a closed sum type. Analysis passes (variable discovery,
//! aggregate detection, constant checks) are free recursive functions in
//! [`discover`], evaluation lives in [`eval`].

pub mod aggregate;
pub mod discover;
pub mod eval;
pub mod like;

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strata_error::{DbError, Result};

use crate::plan::PlanNode;
use crate::planner::ast::TableSelectExpression;
use crate::scalar::ScalarValue;
use crate::scalar::datatype::DataType;
use crate::schema::Variable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOperator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl ComparisonOperator {
    /// Operator to use when the operands are swapped.
    pub const fn flip(self) -> Self {
        match self {
            Self::Eq => Self::Eq,
            Self::NotEq => Self::NotEq,
            Self::Lt => Self::Gt,
            Self::LtEq => Self::GtEq,
            Self::Gt => Self::Lt,
            Self::GtEq => Self::LtEq,
        }
    }

    /// Operator matching exactly the pairs this one doesn't.
    pub const fn negate(self) -> Self {
        match self {
            Self::Eq => Self::NotEq,
            Self::NotEq => Self::Eq,
            Self::Lt => Self::GtEq,
            Self::LtEq => Self::Gt,
            Self::Gt => Self::LtEq,
            Self::GtEq => Self::Lt,
        }
    }

    /// Check if `left op right` holds given `left.cmp(right)`.
    pub fn matches(self, ord: Ordering) -> bool {
        match self {
            Self::Eq => ord.is_eq(),
            Self::NotEq => ord.is_ne(),
            Self::Lt => ord.is_lt(),
            Self::LtEq => ord.is_le(),
            Self::Gt => ord.is_gt(),
            Self::GtEq => ord.is_ge(),
        }
    }

    /// Three-valued comparison of two values.
    pub fn compare(self, left: &ScalarValue, right: &ScalarValue) -> Result<Option<bool>> {
        Ok(left.compare(right)?.map(|ord| self.matches(ord)))
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq => write!(f, "="),
            Self::NotEq => write!(f, "<>"),
            Self::Lt => write!(f, "<"),
            Self::LtEq => write!(f, "<="),
            Self::Gt => write!(f, ">"),
            Self::GtEq => write!(f, ">="),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConjunctionOperator {
    And,
    Or,
}

impl fmt::Display for ConjunctionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOperator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
}

impl ArithOperator {
    pub fn apply(self, left: &ScalarValue, right: &ScalarValue) -> Result<ScalarValue> {
        match self {
            Self::Add => left.add(right),
            Self::Sub => left.sub(right),
            Self::Mul => left.mul(right),
            Self::Div => left.div(right),
            Self::Mod => left.rem(right),
            Self::Concat => left.concat(right),
        }
    }
}

impl fmt::Display for ArithOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "+"),
            Self::Sub => write!(f, "-"),
            Self::Mul => write!(f, "*"),
            Self::Div => write!(f, "/"),
            Self::Mod => write!(f, "%"),
            Self::Concat => write!(f, "||"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count => write!(f, "count"),
            Self::Sum => write!(f, "sum"),
            Self::Avg => write!(f, "avg"),
            Self::Min => write!(f, "min"),
            Self::Max => write!(f, "max"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateCall {
    pub function: AggregateFunction,
    /// Argument to the aggregate. `None` for `COUNT(*)`.
    pub input: Option<Box<Expression>>,
    pub distinct: bool,
}

/// Reference to a column of an enclosing query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelatedVariable {
    pub var: Variable,
    /// Number of query levels up the variable is bound. 1 is the directly
    /// enclosing query.
    pub level: usize,
    pub datatype: DataType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubqueryKind {
    /// Single value of a single-column sub-query.
    Scalar,
    Exists,
    Any(ComparisonOperator),
    All(ComparisonOperator),
}

/// A sub-query's plan along with the type of its first output column.
#[derive(Debug, Clone)]
pub struct SubqueryPlan {
    pub node: Arc<PlanNode>,
    pub datatype: DataType,
}

impl PartialEq for SubqueryPlan {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubqueryQuery {
    /// As produced by the parser.
    Unplanned(Box<TableSelectExpression>),
    /// Replaced by the planner when qualifying the enclosing expression.
    Planned(SubqueryPlan),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubqueryExpr {
    pub kind: SubqueryKind,
    /// Left operand for ANY/ALL.
    pub lhs: Option<Box<Expression>>,
    pub query: SubqueryQuery,
}

impl SubqueryExpr {
    pub fn plan(&self) -> Result<&SubqueryPlan> {
        match &self.query {
            SubqueryQuery::Planned(plan) => Ok(plan),
            SubqueryQuery::Unplanned(_) => {
                Err(DbError::precondition("Sub-query used before it was planned"))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(ScalarValue),
    Column(Variable),
    Correlated(CorrelatedVariable),
    Comparison {
        op: ComparisonOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Conjunction {
        op: ConjunctionOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Arith {
        op: ArithOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Not(Box<Expression>),
    Negate(Box<Expression>),
    IsNull {
        input: Box<Expression>,
        negated: bool,
    },
    Like {
        input: Box<Expression>,
        pattern: Box<Expression>,
        negated: bool,
    },
    InList {
        input: Box<Expression>,
        list: Vec<Expression>,
        negated: bool,
    },
    Cast {
        input: Box<Expression>,
        to: DataType,
    },
    Aggregate(AggregateCall),
    Subquery(SubqueryExpr),
}

impl Expression {
    pub fn lit(value: impl Into<ScalarValue>) -> Self {
        Expression::Literal(value.into())
    }

    /// Column reference parsed from a dotted name.
    pub fn col(name: &str) -> Self {
        Expression::Column(Variable::parse(name))
    }

    pub fn compare(op: ComparisonOperator, left: Expression, right: Expression) -> Self {
        Expression::Comparison {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(left: Expression, right: Expression) -> Self {
        Self::compare(ComparisonOperator::Eq, left, right)
    }

    pub fn and(left: Expression, right: Expression) -> Self {
        Expression::Conjunction {
            op: ConjunctionOperator::And,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn or(left: Expression, right: Expression) -> Self {
        Expression::Conjunction {
            op: ConjunctionOperator::Or,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn arith(op: ArithOperator, left: Expression, right: Expression) -> Self {
        Expression::Arith {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn aggregate(function: AggregateFunction, input: Option<Expression>) -> Self {
        Expression::Aggregate(AggregateCall {
            function,
            input: input.map(Box::new),
            distinct: false,
        })
    }

    pub fn count_star() -> Self {
        Self::aggregate(AggregateFunction::Count, None)
    }

    pub fn subquery(kind: SubqueryKind, lhs: Option<Expression>, query: TableSelectExpression) -> Self {
        Expression::Subquery(SubqueryExpr {
            kind,
            lhs: lhs.map(Box::new),
            query: SubqueryQuery::Unplanned(Box::new(query)),
        })
    }

    /// Join expressions with AND. `None` if the iterator is empty.
    pub fn and_all(exprs: impl IntoIterator<Item = Expression>) -> Option<Expression> {
        exprs.into_iter().reduce(Expression::and)
    }

    /// Split top-level AND into its conjuncts.
    pub fn into_conjuncts(self) -> Vec<Expression> {
        let mut out = Vec::new();
        split_conjunction(self, ConjunctionOperator::And, &mut out);
        out
    }

    /// Split top-level OR into its disjuncts.
    pub fn into_disjuncts(self) -> Vec<Expression> {
        let mut out = Vec::new();
        split_conjunction(self, ConjunctionOperator::Or, &mut out);
        out
    }

    /// Get the variable if this expression is a plain column reference.
    pub fn as_variable(&self) -> Option<&Variable> {
        match self {
            Expression::Column(var) => Some(var),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<&ScalarValue> {
        match self {
            Expression::Literal(v) => Some(v),
            _ => None,
        }
    }

    /// Type of the value this expression produces.
    ///
    /// `lookup` provides the type of a column reference.
    pub fn datatype(&self, lookup: &dyn Fn(&Variable) -> Result<DataType>) -> Result<DataType> {
        Ok(match self {
            Expression::Literal(v) => v.datatype(),
            Expression::Column(var) => lookup(var)?,
            Expression::Correlated(c) => c.datatype,
            Expression::Comparison { .. }
            | Expression::Conjunction { .. }
            | Expression::Not(_)
            | Expression::IsNull { .. }
            | Expression::Like { .. }
            | Expression::InList { .. } => DataType::Boolean,
            Expression::Arith { op, left, right } => {
                let l = left.datatype(lookup)?;
                let r = right.datatype(lookup)?;
                if *op == ArithOperator::Concat {
                    DataType::Utf8
                } else {
                    l.numeric_supertype(&r).ok_or_else(|| {
                        DbError::planning(format!(
                            "Operator '{op}' not supported for types {l} and {r}"
                        ))
                    })?
                }
            }
            Expression::Negate(input) => input.datatype(lookup)?,
            Expression::Cast { to, .. } => *to,
            Expression::Aggregate(agg) => {
                let input = match &agg.input {
                    Some(input) => input.datatype(lookup)?,
                    None => DataType::Int64,
                };
                aggregate::return_type(agg.function, input)?
            }
            Expression::Subquery(sub) => match sub.kind {
                SubqueryKind::Scalar => match &sub.query {
                    SubqueryQuery::Planned(plan) => plan.datatype,
                    SubqueryQuery::Unplanned(_) => DataType::Null,
                },
                _ => DataType::Boolean,
            },
        })
    }
}

fn split_conjunction(expr: Expression, split_op: ConjunctionOperator, out: &mut Vec<Expression>) {
    match expr {
        Expression::Conjunction { op, left, right } if op == split_op => {
            split_conjunction(*left, split_op, out);
            split_conjunction(*right, split_op, out);
        }
        other => out.push(other),
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(ScalarValue::Utf8(s)) => write!(f, "'{s}'"),
            Expression::Literal(v) => write!(f, "{v}"),
            Expression::Column(var) => write!(f, "{var}"),
            Expression::Correlated(c) => write!(f, "{}^{}", c.var, c.level),
            Expression::Comparison { op, left, right } => write!(f, "{left} {op} {right}"),
            Expression::Conjunction { op, left, right } => write!(f, "({left} {op} {right})"),
            Expression::Arith { op, left, right } => write!(f, "({left} {op} {right})"),
            Expression::Not(input) => write!(f, "NOT {input}"),
            Expression::Negate(input) => write!(f, "-{input}"),
            Expression::IsNull { input, negated } => {
                if *negated {
                    write!(f, "{input} IS NOT NULL")
                } else {
                    write!(f, "{input} IS NULL")
                }
            }
            Expression::Like {
                input,
                pattern,
                negated,
            } => {
                if *negated {
                    write!(f, "{input} NOT LIKE {pattern}")
                } else {
                    write!(f, "{input} LIKE {pattern}")
                }
            }
            Expression::InList {
                input,
                list,
                negated,
            } => {
                let list = list
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                if *negated {
                    write!(f, "{input} NOT IN ({list})")
                } else {
                    write!(f, "{input} IN ({list})")
                }
            }
            Expression::Cast { input, to } => write!(f, "CAST({input} AS {to})"),
            Expression::Aggregate(agg) => {
                let distinct = if agg.distinct { "DISTINCT " } else { "" };
                match &agg.input {
                    Some(input) => write!(f, "{}({distinct}{input})", agg.function),
                    None => write!(f, "{}(*)", agg.function),
                }
            }
            Expression::Subquery(sub) => {
                let lhs = || {
                    sub.lhs
                        .as_ref()
                        .map(|e| e.to_string())
                        .unwrap_or_default()
                };
                match sub.kind {
                    SubqueryKind::Scalar => write!(f, "(<subquery>)"),
                    SubqueryKind::Exists => write!(f, "EXISTS (<subquery>)"),
                    SubqueryKind::Any(op) => write!(f, "{} {op} ANY (<subquery>)", lhs()),
                    SubqueryKind::All(op) => write!(f, "{} {op} ALL (<subquery>)", lhs()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flip_and_negate() {
        assert_eq!(ComparisonOperator::Gt, ComparisonOperator::Lt.flip());
        assert_eq!(ComparisonOperator::GtEq, ComparisonOperator::Lt.negate());
        for op in [
            ComparisonOperator::Eq,
            ComparisonOperator::NotEq,
            ComparisonOperator::Lt,
            ComparisonOperator::LtEq,
            ComparisonOperator::Gt,
            ComparisonOperator::GtEq,
        ] {
            for ord in [Ordering::Less, Ordering::Equal, Ordering::Greater] {
                assert_eq!(op.matches(ord), op.flip().matches(ord.reverse()));
                assert_ne!(op.matches(ord), op.negate().matches(ord));
            }
        }
    }

    #[test]
    fn conjunct_splitting() {
        let expr = Expression::and(
            Expression::and(Expression::col("a"), Expression::col("b")),
            Expression::or(Expression::col("c"), Expression::col("d")),
        );
        let conjuncts = expr.into_conjuncts();
        assert_eq!(3, conjuncts.len());
        assert_eq!(2, conjuncts[2].clone().into_disjuncts().len());
    }

    #[test]
    fn display() {
        let expr = Expression::and(
            Expression::eq(Expression::col("t.a"), Expression::lit("x")),
            Expression::IsNull {
                input: Box::new(Expression::col("b")),
                negated: true,
            },
        );
        assert_eq!("(t.a = 'x' AND b IS NOT NULL)", expr.to_string());
        assert_eq!("count(*)", Expression::count_star().to_string());
    }

    #[test]
    fn datatypes() {
        let lookup = |_: &Variable| Ok(DataType::Int32);
        let sum = Expression::aggregate(AggregateFunction::Sum, Some(Expression::col("a")));
        assert_eq!(DataType::Int64, sum.datatype(&lookup).unwrap());
        let avg = Expression::aggregate(AggregateFunction::Avg, Some(Expression::col("a")));
        assert_eq!(DataType::Float64, avg.datatype(&lookup).unwrap());
        let add = Expression::arith(ArithOperator::Add, Expression::col("a"), Expression::lit(1.5));
        assert_eq!(DataType::Float64, add.datatype(&lookup).unwrap());
        let bad = Expression::arith(ArithOperator::Add, Expression::col("a"), Expression::lit("x"));
        assert!(bad.datatype(&lookup).unwrap_err().is_planning());
    }
}

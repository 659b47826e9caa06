pub mod datatype;

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use strata_error::{DbError, Result};

use self::datatype::DataType;

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScalarValue {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Utf8(String),
}

impl ScalarValue {
    pub fn datatype(&self) -> DataType {
        match self {
            Self::Null => DataType::Null,
            Self::Boolean(_) => DataType::Boolean,
            Self::Int32(_) => DataType::Int32,
            Self::Int64(_) => DataType::Int64,
            Self::Float64(_) => DataType::Float64,
            Self::Utf8(_) => DataType::Utf8,
        }
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// Three-valued boolean extraction.
    ///
    /// Returns `Ok(None)` for null.
    pub fn try_as_bool(&self) -> Result<Option<bool>> {
        match self {
            Self::Null => Ok(None),
            Self::Boolean(b) => Ok(Some(*b)),
            other => Err(DbError::new(format!(
                "Expected a boolean value, got {}",
                other.datatype()
            ))),
        }
    }

    pub fn try_as_i64(&self) -> Result<Option<i64>> {
        match self {
            Self::Null => Ok(None),
            Self::Int32(v) => Ok(Some(*v as i64)),
            Self::Int64(v) => Ok(Some(*v)),
            other => Err(DbError::new(format!(
                "Expected an integer value, got {}",
                other.datatype()
            ))),
        }
    }

    pub fn try_as_f64(&self) -> Result<Option<f64>> {
        match self {
            Self::Null => Ok(None),
            Self::Int32(v) => Ok(Some(*v as f64)),
            Self::Int64(v) => Ok(Some(*v as f64)),
            Self::Float64(v) => Ok(Some(*v)),
            other => Err(DbError::new(format!(
                "Expected a numeric value, got {}",
                other.datatype()
            ))),
        }
    }

    pub fn try_as_str(&self) -> Result<Option<&str>> {
        match self {
            Self::Null => Ok(None),
            Self::Utf8(s) => Ok(Some(s.as_str())),
            other => Err(DbError::new(format!(
                "Expected a string value, got {}",
                other.datatype()
            ))),
        }
    }

    /// SQL comparison between two values.
    ///
    /// Returns `Ok(None)` if either side is null. Errors if the types cannot
    /// be compared.
    pub fn compare(&self, other: &ScalarValue) -> Result<Option<Ordering>> {
        if self.is_null() || other.is_null() {
            return Ok(None);
        }
        match (self, other) {
            (Self::Boolean(a), Self::Boolean(b)) => Ok(Some(a.cmp(b))),
            (Self::Utf8(a), Self::Utf8(b)) => Ok(Some(a.cmp(b))),
            (a, b) if a.datatype().is_numeric() && b.datatype().is_numeric() => {
                Ok(Some(compare_numeric(a, b)))
            }
            (a, b) => Err(DbError::planning(format!(
                "Cannot compare values of type {} and {}",
                a.datatype(),
                b.datatype()
            ))),
        }
    }

    /// Total ordering used for sorting and indexing.
    ///
    /// Nulls sort first and compare equal to each other. Numeric values
    /// compare across widths. Values of otherwise incomparable types are
    /// ordered by type.
    pub fn sort_cmp(&self, other: &ScalarValue) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            (Self::Utf8(a), Self::Utf8(b)) => a.cmp(b),
            (a, b) if a.datatype().is_numeric() && b.datatype().is_numeric() => {
                compare_numeric(a, b)
            }
            (a, b) => a.datatype().sort_rank().cmp(&b.datatype().sort_rank()),
        }
    }

    /// Cast this value to another type.
    pub fn cast(&self, datatype: DataType) -> Result<ScalarValue> {
        if self.is_null() {
            return Ok(ScalarValue::Null);
        }
        let err = || {
            DbError::new(format!(
                "Cannot cast value '{self}' of type {} to {datatype}",
                self.datatype()
            ))
        };
        Ok(match (self, datatype) {
            (_, DataType::Null) => ScalarValue::Null,
            (v, dt) if v.datatype() == dt => v.clone(),
            (Self::Int32(v), DataType::Int64) => Self::Int64(*v as i64),
            (Self::Int32(v), DataType::Float64) => Self::Float64(*v as f64),
            (Self::Int64(v), DataType::Int32) => Self::Int32(i32::try_from(*v).map_err(|_| err())?),
            (Self::Int64(v), DataType::Float64) => Self::Float64(*v as f64),
            (Self::Float64(v), DataType::Int32) => Self::Int32(v.trunc() as i32),
            (Self::Float64(v), DataType::Int64) => Self::Int64(v.trunc() as i64),
            (Self::Boolean(v), DataType::Int32) => Self::Int32(*v as i32),
            (Self::Boolean(v), DataType::Int64) => Self::Int64(*v as i64),
            (Self::Utf8(s), DataType::Int32) => Self::Int32(s.trim().parse().map_err(|_| err())?),
            (Self::Utf8(s), DataType::Int64) => Self::Int64(s.trim().parse().map_err(|_| err())?),
            (Self::Utf8(s), DataType::Float64) => {
                Self::Float64(s.trim().parse().map_err(|_| err())?)
            }
            (Self::Utf8(s), DataType::Boolean) => match s.trim().to_lowercase().as_str() {
                "true" | "t" | "1" => Self::Boolean(true),
                "false" | "f" | "0" => Self::Boolean(false),
                _ => return Err(err()),
            },
            (v, DataType::Utf8) => Self::Utf8(v.to_string()),
            _ => return Err(err()),
        })
    }

    pub fn add(&self, other: &ScalarValue) -> Result<ScalarValue> {
        arith(self, other, "+", i32::checked_add, i64::checked_add, |a, b| a + b)
    }

    pub fn sub(&self, other: &ScalarValue) -> Result<ScalarValue> {
        arith(self, other, "-", i32::checked_sub, i64::checked_sub, |a, b| a - b)
    }

    pub fn mul(&self, other: &ScalarValue) -> Result<ScalarValue> {
        arith(self, other, "*", i32::checked_mul, i64::checked_mul, |a, b| a * b)
    }

    pub fn div(&self, other: &ScalarValue) -> Result<ScalarValue> {
        if is_zero(other) {
            return Err(DbError::new("Division by zero"));
        }
        arith(self, other, "/", i32::checked_div, i64::checked_div, |a, b| a / b)
    }

    pub fn rem(&self, other: &ScalarValue) -> Result<ScalarValue> {
        if is_zero(other) {
            return Err(DbError::new("Division by zero"));
        }
        arith(self, other, "%", i32::checked_rem, i64::checked_rem, |a, b| a % b)
    }

    pub fn negate(&self) -> Result<ScalarValue> {
        Ok(match self {
            Self::Null => Self::Null,
            Self::Int32(v) => Self::Int32(
                v.checked_neg()
                    .ok_or_else(|| DbError::new("Integer overflow"))?,
            ),
            Self::Int64(v) => Self::Int64(
                v.checked_neg()
                    .ok_or_else(|| DbError::new("Integer overflow"))?,
            ),
            Self::Float64(v) => Self::Float64(-v),
            other => {
                return Err(DbError::new(format!(
                    "Cannot negate value of type {}",
                    other.datatype()
                )));
            }
        })
    }

    pub fn concat(&self, other: &ScalarValue) -> Result<ScalarValue> {
        if self.is_null() || other.is_null() {
            return Ok(ScalarValue::Null);
        }
        Ok(ScalarValue::Utf8(format!("{self}{other}")))
    }
}

fn is_zero(v: &ScalarValue) -> bool {
    match v {
        ScalarValue::Int32(v) => *v == 0,
        ScalarValue::Int64(v) => *v == 0,
        ScalarValue::Float64(v) => *v == 0.0,
        _ => false,
    }
}

fn compare_numeric(a: &ScalarValue, b: &ScalarValue) -> Ordering {
    match (a, b) {
        (ScalarValue::Int32(a), ScalarValue::Int32(b)) => a.cmp(b),
        (ScalarValue::Int32(a), ScalarValue::Int64(b)) => (*a as i64).cmp(b),
        (ScalarValue::Int64(a), ScalarValue::Int32(b)) => a.cmp(&(*b as i64)),
        (ScalarValue::Int64(a), ScalarValue::Int64(b)) => a.cmp(b),
        (ScalarValue::Float64(a), ScalarValue::Float64(b)) => a.total_cmp(b),
        (ScalarValue::Float64(f), i) => match numeric_as_i64(i) {
            Some(i) => compare_int_float(i, *f).reverse(),
            None => numeric_as_f64(a).total_cmp(&numeric_as_f64(b)),
        },
        (i, ScalarValue::Float64(f)) => match numeric_as_i64(i) {
            Some(i) => compare_int_float(i, *f),
            None => numeric_as_f64(a).total_cmp(&numeric_as_f64(b)),
        },
        (a, b) => numeric_as_f64(a).total_cmp(&numeric_as_f64(b)),
    }
}

fn numeric_as_i64(v: &ScalarValue) -> Option<i64> {
    match v {
        ScalarValue::Int32(v) => Some(i64::from(*v)),
        ScalarValue::Int64(v) => Some(*v),
        _ => None,
    }
}

/// Exact comparison of an integer with a float. Integers above 2^53 aren't
/// representable as f64, so the float's integer part is compared as i64.
fn compare_int_float(i: i64, f: f64) -> Ordering {
    // 2^63, exact in f64.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if f.is_nan() {
        return (i as f64).total_cmp(&f);
    }
    if f >= LIMIT {
        return Ordering::Less;
    }
    if f < -LIMIT {
        return Ordering::Greater;
    }
    let whole = f.trunc();
    match i.cmp(&(whole as i64)) {
        Ordering::Equal if f > whole => Ordering::Less,
        Ordering::Equal if f < whole => Ordering::Greater,
        other => other,
    }
}

fn numeric_as_f64(v: &ScalarValue) -> f64 {
    match v {
        ScalarValue::Int32(v) => *v as f64,
        ScalarValue::Int64(v) => *v as f64,
        ScalarValue::Float64(v) => *v,
        _ => f64::NAN,
    }
}

fn arith(
    left: &ScalarValue,
    right: &ScalarValue,
    op: &str,
    i32_op: fn(i32, i32) -> Option<i32>,
    i64_op: fn(i64, i64) -> Option<i64>,
    f64_op: fn(f64, f64) -> f64,
) -> Result<ScalarValue> {
    if left.is_null() || right.is_null() {
        return Ok(ScalarValue::Null);
    }
    let overflow = || {
        DbError::new("Integer overflow")
            .with_field("left", left)
            .with_field("op", op.to_string())
            .with_field("right", right)
    };
    let supertype = left
        .datatype()
        .numeric_supertype(&right.datatype())
        .ok_or_else(|| {
            DbError::new(format!(
                "Operator '{op}' not supported for types {} and {}",
                left.datatype(),
                right.datatype()
            ))
        })?;

    Ok(match supertype {
        DataType::Int32 => {
            let (ScalarValue::Int32(a), ScalarValue::Int32(b)) = (left, right) else {
                return Err(overflow());
            };
            ScalarValue::Int32(i32_op(*a, *b).ok_or_else(overflow)?)
        }
        DataType::Int64 => {
            let a = left.try_as_i64()?.unwrap_or_default();
            let b = right.try_as_i64()?.unwrap_or_default();
            ScalarValue::Int64(i64_op(a, b).ok_or_else(overflow)?)
        }
        _ => ScalarValue::Float64(f64_op(numeric_as_f64(left), numeric_as_f64(right))),
    })
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Utf8(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        ScalarValue::Boolean(value)
    }
}

impl From<i32> for ScalarValue {
    fn from(value: i32) -> Self {
        ScalarValue::Int32(value)
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        ScalarValue::Int64(value)
    }
}

impl From<f64> for ScalarValue {
    fn from(value: f64) -> Self {
        ScalarValue::Float64(value)
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::Utf8(value.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        ScalarValue::Utf8(value)
    }
}

impl<T: Into<ScalarValue>> From<Option<T>> for ScalarValue {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => ScalarValue::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_with_null_is_unknown() {
        assert_eq!(None, ScalarValue::Null.compare(&1.into()).unwrap());
        assert_eq!(None, ScalarValue::from(1).compare(&ScalarValue::Null).unwrap());
        assert_eq!(None, ScalarValue::Null.compare(&ScalarValue::Null).unwrap());
    }

    #[test]
    fn compare_across_numeric_widths() {
        let a = ScalarValue::Int32(4);
        let b = ScalarValue::Int64(4);
        let c = ScalarValue::Float64(4.5);
        assert_eq!(Some(Ordering::Equal), a.compare(&b).unwrap());
        assert_eq!(Some(Ordering::Less), b.compare(&c).unwrap());
    }

    #[test]
    fn compare_large_int_with_float_is_exact() {
        let big = ScalarValue::Int64((1 << 53) + 1);
        let float = ScalarValue::Float64((1_i64 << 53) as f64);
        assert_eq!(Some(Ordering::Greater), big.compare(&float).unwrap());
        assert_eq!(Some(Ordering::Less), float.compare(&big).unwrap());
        assert_eq!(Ordering::Greater, big.sort_cmp(&float));
        assert_eq!(Ordering::Less, float.sort_cmp(&big));

        let max = ScalarValue::Int64(i64::MAX);
        assert_eq!(
            Some(Ordering::Less),
            max.compare(&ScalarValue::Float64(i64::MAX as f64)).unwrap()
        );
        assert_eq!(
            Some(Ordering::Greater),
            ScalarValue::Int64(-3).compare(&ScalarValue::Float64(-3.5)).unwrap()
        );
        assert_eq!(
            Some(Ordering::Equal),
            ScalarValue::Int32(7).compare(&ScalarValue::Float64(7.0)).unwrap()
        );
    }

    #[test]
    fn compare_incompatible_types_errors() {
        ScalarValue::from("a").compare(&1.into()).unwrap_err();
    }

    #[test]
    fn sort_cmp_nulls_first() {
        let mut vals = vec![
            ScalarValue::from(3),
            ScalarValue::Null,
            ScalarValue::from(1),
            ScalarValue::Null,
        ];
        vals.sort_by(|a, b| a.sort_cmp(b));
        assert_eq!(
            vec![
                ScalarValue::Null,
                ScalarValue::Null,
                ScalarValue::from(1),
                ScalarValue::from(3)
            ],
            vals
        );
    }

    #[test]
    fn arith_promotes_and_propagates_null() {
        assert_eq!(
            ScalarValue::Int64(7),
            ScalarValue::Int32(3).add(&ScalarValue::Int64(4)).unwrap()
        );
        assert_eq!(
            ScalarValue::Float64(1.5),
            ScalarValue::Int32(3).div(&ScalarValue::Float64(2.0)).unwrap()
        );
        assert_eq!(
            ScalarValue::Null,
            ScalarValue::Int32(3).mul(&ScalarValue::Null).unwrap()
        );
    }

    #[test]
    fn arith_overflow_and_div_zero() {
        ScalarValue::Int32(i32::MAX)
            .add(&ScalarValue::Int32(1))
            .unwrap_err();
        ScalarValue::Int64(1).div(&ScalarValue::Int64(0)).unwrap_err();
    }

    #[test]
    fn cast_string_to_int() {
        assert_eq!(
            ScalarValue::Int64(12),
            ScalarValue::from(" 12 ").cast(DataType::Int64).unwrap()
        );
        ScalarValue::from("abc").cast(DataType::Int64).unwrap_err();
    }
}

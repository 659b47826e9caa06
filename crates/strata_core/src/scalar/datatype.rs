use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical type of a column or scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Type of an untyped NULL literal. Castable to any other type.
    Null,
    Boolean,
    Int32,
    Int64,
    Float64,
    Utf8,
}

impl DataType {
    pub const fn is_null(&self) -> bool {
        matches!(self, DataType::Null)
    }

    pub const fn is_numeric(&self) -> bool {
        matches!(self, DataType::Int32 | DataType::Int64 | DataType::Float64)
    }

    pub const fn is_integer(&self) -> bool {
        matches!(self, DataType::Int32 | DataType::Int64)
    }

    /// If values of the two types can be compared with each other.
    ///
    /// Null is comparable with everything.
    pub fn is_comparable_with(&self, other: &DataType) -> bool {
        if self.is_null() || other.is_null() {
            return true;
        }
        if self.is_numeric() && other.is_numeric() {
            return true;
        }
        self == other
    }

    /// Result type of an arithmetic operation between two numeric types.
    pub fn numeric_supertype(&self, other: &DataType) -> Option<DataType> {
        match (self, other) {
            (DataType::Null, other) | (other, DataType::Null) if other.is_numeric() => {
                Some(*other)
            }
            (DataType::Float64, b) | (b, DataType::Float64) if b.is_numeric() => {
                Some(DataType::Float64)
            }
            (DataType::Int64, b) | (b, DataType::Int64) if b.is_integer() => Some(DataType::Int64),
            (DataType::Int32, DataType::Int32) => Some(DataType::Int32),
            _ => None,
        }
    }

    /// Rank used to order values of different types in a total ordering.
    pub(crate) const fn sort_rank(&self) -> u8 {
        match self {
            DataType::Null => 0,
            DataType::Boolean => 1,
            DataType::Int32 | DataType::Int64 | DataType::Float64 => 2,
            DataType::Utf8 => 3,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "Null"),
            Self::Boolean => write!(f, "Boolean"),
            Self::Int32 => write!(f, "Int32"),
            Self::Int64 => write!(f, "Int64"),
            Self::Float64 => write!(f, "Float64"),
            Self::Utf8 => write!(f, "Utf8"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_supertypes() {
        assert_eq!(
            Some(DataType::Int64),
            DataType::Int32.numeric_supertype(&DataType::Int64)
        );
        assert_eq!(
            Some(DataType::Float64),
            DataType::Int64.numeric_supertype(&DataType::Float64)
        );
        assert_eq!(
            Some(DataType::Int32),
            DataType::Null.numeric_supertype(&DataType::Int32)
        );
        assert_eq!(None, DataType::Utf8.numeric_supertype(&DataType::Int32));
    }

    #[test]
    fn comparable() {
        assert!(DataType::Int32.is_comparable_with(&DataType::Float64));
        assert!(DataType::Null.is_comparable_with(&DataType::Utf8));
        assert!(!DataType::Utf8.is_comparable_with(&DataType::Int64));
    }
}

use std::cmp::Ordering;
use std::fmt;

use crate::expr::ComparisonOperator;
use crate::scalar::ScalarValue;

/// How a range bound treats values equal to the bound value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeBound {
    /// Start of a range, inclusive of the first matching value.
    FirstValue,
    /// End of a range, inclusive of the last matching value.
    LastValue,
    /// End of a range, exclusive of every matching value.
    BeforeFirstValue,
    /// Start of a range, exclusive of every matching value.
    AfterLastValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RangeValue {
    /// The smallest value in the column, including nulls.
    FirstInSet,
    /// The largest value in the column.
    LastInSet,
    Value(ScalarValue),
}

/// A single contiguous range over a column's sort order.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectableRange {
    pub start_bound: RangeBound,
    pub start: RangeValue,
    pub end_bound: RangeBound,
    pub end: RangeValue,
}

impl SelectableRange {
    pub const fn full() -> Self {
        SelectableRange {
            start_bound: RangeBound::FirstValue,
            start: RangeValue::FirstInSet,
            end_bound: RangeBound::LastValue,
            end: RangeValue::LastInSet,
        }
    }

    pub fn new(
        start_bound: RangeBound,
        start: RangeValue,
        end_bound: RangeBound,
        end: RangeValue,
    ) -> Self {
        SelectableRange {
            start_bound,
            start,
            end_bound,
            end,
        }
    }

    pub(crate) fn start_point(&self) -> RangePoint {
        RangePoint::new(&self.start, self.start_bound)
    }

    pub(crate) fn end_point(&self) -> RangePoint {
        RangePoint::new(&self.end, self.end_bound)
    }

    fn from_points(start: RangePoint, end: RangePoint) -> Self {
        let (start_bound, start) = start.into_start();
        let (end_bound, end) = end.into_end();
        SelectableRange {
            start_bound,
            start,
            end_bound,
            end,
        }
    }

    fn is_empty(&self) -> bool {
        self.start_point().cmp(&self.end_point()) != Ordering::Less
    }

    /// If `value` falls inside this range.
    pub fn contains(&self, value: &ScalarValue) -> bool {
        let point = RangePoint::At(value.clone());
        self.start_point() < point && point < self.end_point()
    }
}

impl fmt::Display for SelectableRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let open = match self.start_bound {
            RangeBound::AfterLastValue => "(",
            _ => "[",
        };
        let close = match self.end_bound {
            RangeBound::BeforeFirstValue => ")",
            _ => "]",
        };
        write!(f, "{open}{}, {}{close}", self.start, self.end)
    }
}

impl fmt::Display for RangeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FirstInSet => write!(f, "FIRST"),
            Self::LastInSet => write!(f, "LAST"),
            Self::Value(v) => write!(f, "{v}"),
        }
    }
}

/// Position on the total ordering of column values.
///
/// `Before(v)` sits immediately before every occurrence of `v`, `After(v)`
/// immediately after. A range contains `v` iff `start < At(v) < end`.
#[derive(Debug, Clone)]
pub(crate) enum RangePoint {
    NegInfinity,
    Before(ScalarValue),
    At(ScalarValue),
    After(ScalarValue),
    PosInfinity,
}

impl RangePoint {
    fn new(value: &RangeValue, bound: RangeBound) -> Self {
        match value {
            // Set sentinels are resolved without looking at the data, so the
            // bound kind is irrelevant.
            RangeValue::FirstInSet => RangePoint::NegInfinity,
            RangeValue::LastInSet => RangePoint::PosInfinity,
            RangeValue::Value(v) => match bound {
                RangeBound::FirstValue | RangeBound::BeforeFirstValue => {
                    RangePoint::Before(v.clone())
                }
                RangeBound::LastValue | RangeBound::AfterLastValue => RangePoint::After(v.clone()),
            },
        }
    }

    fn into_start(self) -> (RangeBound, RangeValue) {
        match self {
            RangePoint::NegInfinity => (RangeBound::FirstValue, RangeValue::FirstInSet),
            RangePoint::Before(v) | RangePoint::At(v) => (RangeBound::FirstValue, RangeValue::Value(v)),
            RangePoint::After(v) => (RangeBound::AfterLastValue, RangeValue::Value(v)),
            RangePoint::PosInfinity => (RangeBound::LastValue, RangeValue::LastInSet),
        }
    }

    fn into_end(self) -> (RangeBound, RangeValue) {
        match self {
            RangePoint::NegInfinity => (RangeBound::FirstValue, RangeValue::FirstInSet),
            RangePoint::Before(v) | RangePoint::At(v) => {
                (RangeBound::BeforeFirstValue, RangeValue::Value(v))
            }
            RangePoint::After(v) => (RangeBound::LastValue, RangeValue::Value(v)),
            RangePoint::PosInfinity => (RangeBound::LastValue, RangeValue::LastInSet),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            RangePoint::NegInfinity => 0,
            RangePoint::Before(_) => 1,
            RangePoint::At(_) => 2,
            RangePoint::After(_) => 3,
            RangePoint::PosInfinity => 4,
        }
    }

    fn value(&self) -> Option<&ScalarValue> {
        match self {
            RangePoint::Before(v) | RangePoint::At(v) | RangePoint::After(v) => Some(v),
            _ => None,
        }
    }
}

impl PartialEq for RangePoint {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RangePoint {}

impl PartialOrd for RangePoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RangePoint {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.value(), other.value()) {
            (Some(a), Some(b)) => a.sort_cmp(b).then(self.rank().cmp(&other.rank())),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// A normalized set of disjoint, ordered ranges over a column.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectableRangeSet {
    ranges: Vec<SelectableRange>,
}

impl Default for SelectableRangeSet {
    fn default() -> Self {
        Self::full()
    }
}

impl SelectableRangeSet {
    /// A set covering every value in the column, nulls included.
    pub fn full() -> Self {
        SelectableRangeSet {
            ranges: vec![SelectableRange::full()],
        }
    }

    pub fn empty() -> Self {
        SelectableRangeSet { ranges: Vec::new() }
    }

    pub fn from_ranges(ranges: impl IntoIterator<Item = SelectableRange>) -> Self {
        let mut set = SelectableRangeSet {
            ranges: ranges.into_iter().collect(),
        };
        set.normalize();
        set
    }

    /// Set of all null values.
    pub fn nulls() -> Self {
        Self::from_ranges([SelectableRange::new(
            RangeBound::FirstValue,
            RangeValue::Value(ScalarValue::Null),
            RangeBound::LastValue,
            RangeValue::Value(ScalarValue::Null),
        )])
    }

    /// Set of all non-null values.
    pub fn non_nulls() -> Self {
        Self::from_ranges([non_null_range(RangeBound::LastValue, RangeValue::LastInSet)])
    }

    pub fn ranges(&self) -> &[SelectableRange] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.ranges.len() == 1 && self.ranges[0] == SelectableRange::full()
    }

    /// Restrict this set to values satisfying `column op value`.
    ///
    /// Comparisons against null never match, so intersecting with a null
    /// value produces the empty set.
    pub fn intersect(&self, op: ComparisonOperator, value: &ScalarValue) -> Self {
        if value.is_null() {
            return Self::empty();
        }
        let v = || RangeValue::Value(value.clone());
        let with = match op {
            ComparisonOperator::Eq => Self::from_ranges([SelectableRange::new(
                RangeBound::FirstValue,
                v(),
                RangeBound::LastValue,
                v(),
            )]),
            ComparisonOperator::NotEq => Self::from_ranges([
                non_null_range(RangeBound::BeforeFirstValue, v()),
                SelectableRange::new(
                    RangeBound::AfterLastValue,
                    v(),
                    RangeBound::LastValue,
                    RangeValue::LastInSet,
                ),
            ]),
            ComparisonOperator::Gt => Self::from_ranges([SelectableRange::new(
                RangeBound::AfterLastValue,
                v(),
                RangeBound::LastValue,
                RangeValue::LastInSet,
            )]),
            ComparisonOperator::GtEq => Self::from_ranges([SelectableRange::new(
                RangeBound::FirstValue,
                v(),
                RangeBound::LastValue,
                RangeValue::LastInSet,
            )]),
            ComparisonOperator::Lt => {
                Self::from_ranges([non_null_range(RangeBound::BeforeFirstValue, v())])
            }
            ComparisonOperator::LtEq => {
                Self::from_ranges([non_null_range(RangeBound::LastValue, v())])
            }
        };
        self.intersect_set(&with)
    }

    /// Intersection of two range sets.
    pub fn intersect_set(&self, other: &SelectableRangeSet) -> Self {
        let mut out = Vec::new();
        for a in &self.ranges {
            for b in &other.ranges {
                let start = std::cmp::max(a.start_point(), b.start_point());
                let end = std::cmp::min(a.end_point(), b.end_point());
                if start < end {
                    out.push(SelectableRange::from_points(start, end));
                }
            }
        }
        Self::from_ranges(out)
    }

    /// Union of two range sets.
    pub fn union(&self, other: &SelectableRangeSet) -> Self {
        Self::from_ranges(self.ranges.iter().chain(other.ranges.iter()).cloned())
    }

    /// Sort ranges by start and merge any that overlap or touch.
    fn normalize(&mut self) {
        let mut ranges: Vec<_> = std::mem::take(&mut self.ranges)
            .into_iter()
            .filter(|r| !r.is_empty())
            .collect();
        ranges.sort_by(|a, b| a.start_point().cmp(&b.start_point()));

        let mut merged: Vec<SelectableRange> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(last) if range.start_point() <= last.end_point() => {
                    if range.end_point() > last.end_point() {
                        let start = last.start_point();
                        *last = SelectableRange::from_points(start, range.end_point());
                    }
                }
                _ => merged.push(range),
            }
        }
        self.ranges = merged;
    }
}

/// Range starting after all nulls.
fn non_null_range(end_bound: RangeBound, end: RangeValue) -> SelectableRange {
    SelectableRange::new(
        RangeBound::AfterLastValue,
        RangeValue::Value(ScalarValue::Null),
        end_bound,
        end,
    )
}

impl fmt::Display for SelectableRangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (idx, range) in self.ranges.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{range}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contains(set: &SelectableRangeSet, v: impl Into<ScalarValue>) -> bool {
        let v = v.into();
        set.ranges().iter().any(|r| r.contains(&v))
    }

    #[test]
    fn between_is_single_range() {
        let set = SelectableRangeSet::full()
            .intersect(ComparisonOperator::GtEq, &3.into())
            .intersect(ComparisonOperator::Lt, &7.into());
        assert_eq!(1, set.ranges().len());
        assert!(contains(&set, 3));
        assert!(contains(&set, 6));
        assert!(!contains(&set, 7));
        assert!(!contains(&set, ScalarValue::Null));
    }

    #[test]
    fn not_equal_excludes_value_and_nulls() {
        let set = SelectableRangeSet::full().intersect(ComparisonOperator::NotEq, &5.into());
        assert_eq!(2, set.ranges().len());
        assert!(contains(&set, 4));
        assert!(!contains(&set, 5));
        assert!(contains(&set, 6));
        assert!(!contains(&set, ScalarValue::Null));
    }

    #[test]
    fn union_merges_overlapping() {
        let a = SelectableRangeSet::full().intersect(ComparisonOperator::Lt, &5.into());
        let b = SelectableRangeSet::full().intersect(ComparisonOperator::GtEq, &5.into());
        let set = a.union(&b);
        assert_eq!(SelectableRangeSet::non_nulls(), set);
    }

    #[test]
    fn contradictory_is_empty() {
        let set = SelectableRangeSet::full()
            .intersect(ComparisonOperator::Gt, &5.into())
            .intersect(ComparisonOperator::Lt, &2.into());
        assert!(set.is_empty());
    }

    #[test]
    fn null_comparison_is_empty() {
        let set = SelectableRangeSet::full().intersect(ComparisonOperator::Eq, &ScalarValue::Null);
        assert!(set.is_empty());
    }

    #[test]
    fn nulls_range() {
        let set = SelectableRangeSet::nulls();
        assert!(contains(&set, ScalarValue::Null));
        assert!(!contains(&set, 1));
        assert!(SelectableRangeSet::full().is_full());
    }
}

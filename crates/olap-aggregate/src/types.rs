#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

/// Logical type of an input column, as reported by the planner.
///
/// Integer types reserve their minimum bit pattern as the storage NULL, so `TinyInt` covers
/// `-127..=127`, `SmallInt` covers `-32767..=32767`, and so on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Boolean,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    /// Dictionary-encoded text; values arrive as ids in `0..size`.
    Dictionary { size: u32 },
    /// None-encoded text.
    Text,
}

impl ColumnType {
    pub fn is_integer_like(self) -> bool {
        matches!(
            self,
            ColumnType::Boolean
                | ColumnType::TinyInt
                | ColumnType::SmallInt
                | ColumnType::Int
                | ColumnType::BigInt
                | ColumnType::Dictionary { .. }
        )
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ColumnType::TinyInt
                | ColumnType::SmallInt
                | ColumnType::Int
                | ColumnType::BigInt
                | ColumnType::Float
                | ColumnType::Double
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, ColumnType::Float | ColumnType::Double)
    }

    /// The value domain implied by the type alone, for types with a bounded integer mapping.
    pub fn domain(self) -> Option<ValueRange> {
        let (min, max) = match self {
            ColumnType::Boolean => (0, 1),
            ColumnType::TinyInt => (-(i8::MAX as i64), i8::MAX as i64),
            ColumnType::SmallInt => (-(i16::MAX as i64), i16::MAX as i64),
            ColumnType::Int => (-(i32::MAX as i64), i32::MAX as i64),
            ColumnType::BigInt => (-i64::MAX, i64::MAX),
            ColumnType::Dictionary { size } => (0, size as i64 - 1),
            ColumnType::Float | ColumnType::Double | ColumnType::Text => return None,
        };
        Some(ValueRange { min, max })
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Boolean => f.write_str("BOOLEAN"),
            ColumnType::TinyInt => f.write_str("TINYINT"),
            ColumnType::SmallInt => f.write_str("SMALLINT"),
            ColumnType::Int => f.write_str("INT"),
            ColumnType::BigInt => f.write_str("BIGINT"),
            ColumnType::Float => f.write_str("FLOAT"),
            ColumnType::Double => f.write_str("DOUBLE"),
            ColumnType::Dictionary { size } => write!(f, "TEXT ENCODING DICT({size})"),
            ColumnType::Text => f.write_str("TEXT"),
        }
    }
}

/// Inclusive integer range `[min, max]` from column statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ValueRange {
    pub min: i64,
    pub max: i64,
}

impl ValueRange {
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    /// Number of distinct integers in the range, saturating.
    pub fn width(&self) -> u64 {
        if self.max < self.min {
            return 0;
        }
        let span = self.max as i128 - self.min as i128 + 1;
        u64::try_from(span).unwrap_or(u64::MAX)
    }

    /// Largest absolute value in the range.
    pub fn max_abs(&self) -> u64 {
        self.min.unsigned_abs().max(self.max.unsigned_abs())
    }

    pub fn intersect(&self, other: &ValueRange) -> ValueRange {
        ValueRange {
            min: self.min.max(other.min),
            max: self.max.min(other.max),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnSchema {
    pub name: String,
    pub column_type: ColumnType,
    /// Observed `[min, max]` supplied by the statistics collaborator, if known.
    pub range: Option<ValueRange>,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            range: None,
        }
    }

    pub fn with_range(mut self, min: i64, max: i64) -> Self {
        self.range = Some(ValueRange::new(min, max));
        self
    }

    /// Known bounded integer range: the statistics range clipped to the type's domain, or the
    /// domain itself for types that are small by construction (boolean, dictionary).
    pub fn bounded_range(&self) -> Option<ValueRange> {
        let domain = self.column_type.domain()?;
        match (self.range, self.column_type) {
            (Some(range), _) => Some(range.intersect(&domain)),
            (None, ColumnType::Boolean | ColumnType::Dictionary { .. }) => Some(domain),
            (None, _) => None,
        }
    }
}

/// An evaluated scalar.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int(i64),
    Float(f64),
    Text(Arc<str>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view for integer-like columns (booleans map to 0/1).
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Boolean(b) => Some(*b as i64),
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(Arc::from(v))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_range_clips_statistics_to_domain() {
        let col = ColumnSchema::new("x", ColumnType::TinyInt).with_range(-1_000, 5);
        assert_eq!(col.bounded_range(), Some(ValueRange::new(-127, 5)));

        let dict = ColumnSchema::new("s", ColumnType::Dictionary { size: 3 });
        assert_eq!(dict.bounded_range(), Some(ValueRange::new(0, 2)));

        let unbounded = ColumnSchema::new("y", ColumnType::BigInt);
        assert_eq!(unbounded.bounded_range(), None);

        let text = ColumnSchema::new("t", ColumnType::Text).with_range(0, 10);
        assert_eq!(text.bounded_range(), None);
    }

    #[test]
    fn range_width_and_abs() {
        let r = ValueRange::new(-3, 10);
        assert_eq!(r.width(), 14);
        assert_eq!(r.max_abs(), 10);
        assert_eq!(ValueRange::new(-i64::MAX, i64::MAX).width(), u64::MAX);
    }
}

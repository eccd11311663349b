use std::{cmp::Ordering, fmt};

/// Literal values accepted by predicate operands and seek tuples.
#[derive(Clone, Debug, PartialEq)]
pub enum ScalarValue {
    /// Represents SQL `NULL`.
    Null,
    /// Boolean literal.
    Boolean(bool),
    /// Signed 64-bit integer.
    Int64(i64),
    /// Unsigned 64-bit integer.
    UInt64(u64),
    /// 64-bit floating point.
    Float64(f64),
    /// UTF-8 string.
    Utf8(String),
    /// Binary blob.
    Binary(Vec<u8>),
}

impl ScalarValue {
    /// Returns true when the literal is the `Null` variant.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// Compares this scalar with another, returning the ordering when both sides are comparable.
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        self.as_ref().compare(other.as_ref())
    }

    /// Returns a borrowed view over this scalar value.
    #[must_use]
    pub fn as_ref(&self) -> ScalarValueRef<'_> {
        match self {
            ScalarValue::Null => ScalarValueRef::Null,
            ScalarValue::Boolean(value) => ScalarValueRef::Boolean(*value),
            ScalarValue::Int64(value) => ScalarValueRef::Int64(*value),
            ScalarValue::UInt64(value) => ScalarValueRef::UInt64(*value),
            ScalarValue::Float64(value) => ScalarValueRef::Float64(*value),
            ScalarValue::Utf8(value) => ScalarValueRef::Utf8(value.as_str()),
            ScalarValue::Binary(value) => ScalarValueRef::Binary(value.as_slice()),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => f.write_str("NULL"),
            ScalarValue::Boolean(value) => write!(f, "{value}"),
            ScalarValue::Int64(value) => write!(f, "{value}"),
            ScalarValue::UInt64(value) => write!(f, "{value}"),
            ScalarValue::Float64(value) => write!(f, "{value}"),
            ScalarValue::Utf8(value) => write!(f, "'{value}'"),
            ScalarValue::Binary(value) => write!(f, "x'{}'", HexBytes(value)),
        }
    }
}

struct HexBytes<'a>(&'a [u8]);

impl fmt::Display for HexBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Borrowed view over a scalar value.
///
/// Column readers hand out this view for a single cell so evaluation never has
/// to copy strings or byte slices out of the underlying arrays.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ScalarValueRef<'a> {
    /// Represents SQL `NULL`.
    Null,
    /// Boolean value.
    Boolean(bool),
    /// Signed 64-bit integer.
    Int64(i64),
    /// Unsigned 64-bit integer.
    UInt64(u64),
    /// 64-bit floating point.
    Float64(f64),
    /// UTF-8 string slice.
    Utf8(&'a str),
    /// Binary slice.
    Binary(&'a [u8]),
}

impl<'a> ScalarValueRef<'a> {
    /// Returns true when the value is the `Null` variant.
    #[must_use]
    pub fn is_null(self) -> bool {
        matches!(self, ScalarValueRef::Null)
    }

    /// Compares this scalar with another, returning the ordering when both sides are comparable.
    ///
    /// Integers of either signedness compare by value, and integers compare
    /// against floats after widening to `f64`. `NULL` is never comparable.
    pub fn compare(self, other: ScalarValueRef<'_>) -> Option<Ordering> {
        use ScalarValueRef::*;
        match (self, other) {
            (Null, _) | (_, Null) => None,
            (Boolean(lhs), Boolean(rhs)) => Some(lhs.cmp(&rhs)),
            (Int64(lhs), Int64(rhs)) => Some(lhs.cmp(&rhs)),
            (UInt64(lhs), UInt64(rhs)) => Some(lhs.cmp(&rhs)),
            (Int64(lhs), UInt64(rhs)) => Some(i128::from(lhs).cmp(&i128::from(rhs))),
            (UInt64(lhs), Int64(rhs)) => Some(i128::from(lhs).cmp(&i128::from(rhs))),
            (Float64(lhs), Float64(rhs)) => lhs.partial_cmp(&rhs),
            (Float64(lhs), Int64(rhs)) => lhs.partial_cmp(&(rhs as f64)),
            (Float64(lhs), UInt64(rhs)) => lhs.partial_cmp(&(rhs as f64)),
            (Int64(lhs), Float64(rhs)) => (lhs as f64).partial_cmp(&rhs),
            (UInt64(lhs), Float64(rhs)) => (lhs as f64).partial_cmp(&rhs),
            (Utf8(lhs), Utf8(rhs)) => Some(lhs.cmp(rhs)),
            (Binary(lhs), Binary(rhs)) => Some(lhs.cmp(rhs)),
            (Utf8(lhs), Binary(rhs)) => Some(lhs.as_bytes().cmp(rhs)),
            (Binary(lhs), Utf8(rhs)) => Some(lhs.cmp(rhs.as_bytes())),
            _ => None,
        }
    }

    /// Copies the borrowed value into an owned scalar.
    #[must_use]
    pub fn to_owned(self) -> ScalarValue {
        match self {
            ScalarValueRef::Null => ScalarValue::Null,
            ScalarValueRef::Boolean(value) => ScalarValue::Boolean(value),
            ScalarValueRef::Int64(value) => ScalarValue::Int64(value),
            ScalarValueRef::UInt64(value) => ScalarValue::UInt64(value),
            ScalarValueRef::Float64(value) => ScalarValue::Float64(value),
            ScalarValueRef::Utf8(value) => ScalarValue::Utf8(value.to_owned()),
            ScalarValueRef::Binary(value) => ScalarValue::Binary(value.to_vec()),
        }
    }
}

impl<'a> From<&'a ScalarValue> for ScalarValueRef<'a> {
    fn from(value: &'a ScalarValue) -> Self {
        value.as_ref()
    }
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        ScalarValue::Boolean(value)
    }
}

impl From<i32> for ScalarValue {
    fn from(value: i32) -> Self {
        ScalarValue::Int64(i64::from(value))
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        ScalarValue::Int64(value)
    }
}

impl From<u32> for ScalarValue {
    fn from(value: u32) -> Self {
        ScalarValue::UInt64(u64::from(value))
    }
}

impl From<u64> for ScalarValue {
    fn from(value: u64) -> Self {
        ScalarValue::UInt64(value)
    }
}

impl From<f64> for ScalarValue {
    fn from(value: f64) -> Self {
        ScalarValue::Float64(value)
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        ScalarValue::Utf8(value)
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::Utf8(value.to_owned())
    }
}

impl From<Vec<u8>> for ScalarValue {
    fn from(value: Vec<u8>) -> Self {
        ScalarValue::Binary(value)
    }
}

impl From<&[u8]> for ScalarValue {
    fn from(value: &[u8]) -> Self {
        ScalarValue::Binary(value.to_vec())
    }
}

impl<T> From<Option<T>> for ScalarValue
where
    T: Into<ScalarValue>,
{
    fn from(value: Option<T>) -> Self {
        value.map_or(ScalarValue::Null, Into::into)
    }
}

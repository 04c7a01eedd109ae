//! Scalar cell values.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::fmt;
use trellis_protocol::DataType;

/// A single cell value in a frame column.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date(NaiveDate),
    Datetime(NaiveDateTime),
    Time(NaiveTime),
}

impl Scalar {
    pub fn dtype(&self) -> DataType {
        match self {
            Scalar::Null => DataType::Null,
            Scalar::Bool(_) => DataType::Boolean,
            Scalar::Int(_) => DataType::Integer,
            Scalar::Float(_) => DataType::Float,
            Scalar::Str(_) => DataType::String,
            Scalar::Date(_) => DataType::Date,
            Scalar::Datetime(_) => DataType::Datetime,
            Scalar::Time(_) => DataType::Time,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Numeric view: Int and Float only.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(v) => Some(*v as f64),
            Scalar::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Build a scalar from a parsed JSON value. Nested objects and arrays are
    /// encoded as JSON-string scalars; integers that fit i64 stay integral.
    pub fn from_json(value: &JsonValue) -> Scalar {
        match value {
            JsonValue::Null => Scalar::Null,
            JsonValue::Bool(b) => Scalar::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Scalar::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Scalar::Float(f)
                } else {
                    Scalar::Str(n.to_string())
                }
            }
            JsonValue::String(s) => Scalar::Str(s.clone()),
            other => Scalar::Str(other.to_string()),
        }
    }

    /// Render to a JSON value (dates and times as ISO-8601 strings).
    pub fn to_json(&self) -> JsonValue {
        match self {
            Scalar::Null => JsonValue::Null,
            Scalar::Bool(b) => JsonValue::Bool(*b),
            Scalar::Int(v) => JsonValue::from(*v),
            Scalar::Float(v) => serde_json::Number::from_f64(*v)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Scalar::Str(s) => JsonValue::String(s.clone()),
            Scalar::Date(d) => JsonValue::String(d.format("%Y-%m-%d").to_string()),
            Scalar::Datetime(dt) => JsonValue::String(dt.format("%Y-%m-%dT%H:%M:%S").to_string()),
            Scalar::Time(t) => JsonValue::String(t.format("%H:%M:%S").to_string()),
        }
    }

    /// Canonical key used for hash joins, grouping, and deduplication.
    ///
    /// Ints and whole floats collapse to the same key so a coerced column
    /// still joins against its uncoerced counterpart.
    pub fn key(&self) -> String {
        match self {
            Scalar::Null => "n:".to_string(),
            Scalar::Bool(b) => format!("b:{}", b),
            Scalar::Int(v) => format!("f:{}", *v as f64),
            Scalar::Float(v) => format!("f:{}", v),
            Scalar::Str(s) => format!("s:{}", s),
            Scalar::Date(d) => format!("d:{}", d),
            Scalar::Datetime(dt) => format!("t:{}", dt),
            Scalar::Time(t) => format!("c:{}", t),
        }
    }

    /// Ordering used by comparisons in filters, rules, and constraints.
    /// Cross-type comparisons other than Int/Float are not ordered.
    pub fn compare(&self, other: &Scalar) -> Option<Ordering> {
        match (self, other) {
            (Scalar::Null, _) | (_, Scalar::Null) => None,
            (Scalar::Str(a), Scalar::Str(b)) => Some(a.cmp(b)),
            (Scalar::Bool(a), Scalar::Bool(b)) => Some(a.cmp(b)),
            (Scalar::Date(a), Scalar::Date(b)) => Some(a.cmp(b)),
            (Scalar::Datetime(a), Scalar::Datetime(b)) => Some(a.cmp(b)),
            (Scalar::Time(a), Scalar::Time(b)) => Some(a.cmp(b)),
            _ => {
                let a = self.as_f64()?;
                let b = other.as_f64()?;
                a.partial_cmp(&b)
            }
        }
    }

    /// Loose equality: numeric kinds compare by value, everything else by key.
    pub fn loose_eq(&self, other: &Scalar) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, ""),
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Str(s) => write!(f, "{}", s),
            Scalar::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Scalar::Datetime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
            Scalar::Time(t) => write!(f, "{}", t.format("%H:%M:%S")),
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Str(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::Str(s)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

/// Unify two column dtypes observed across values.
pub fn unify_dtypes(a: DataType, b: DataType) -> DataType {
    use DataType::*;
    if a == b {
        return a;
    }
    match (a, b) {
        (Null, other) | (other, Null) => other,
        (Integer, Float) | (Float, Integer) => Float,
        (Date, Datetime) | (Datetime, Date) => Datetime,
        _ => String,
    }
}

/// Infer the column dtype from its values.
pub fn infer_dtype(values: &[Scalar]) -> DataType {
    let mut dtype = DataType::Null;
    for v in values {
        if v.is_null() {
            continue;
        }
        dtype = unify_dtypes(dtype, v.dtype());
        if dtype == DataType::String {
            break;
        }
    }
    dtype
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_scalars() {
        assert_eq!(Scalar::from_json(&serde_json::json!(null)), Scalar::Null);
        assert_eq!(Scalar::from_json(&serde_json::json!(3)), Scalar::Int(3));
        assert_eq!(
            Scalar::from_json(&serde_json::json!(2.5)),
            Scalar::Float(2.5)
        );
        assert_eq!(
            Scalar::from_json(&serde_json::json!({"a": 1})),
            Scalar::Str("{\"a\":1}".to_string())
        );
    }

    #[test]
    fn test_numeric_key_collapses_int_and_float() {
        assert_eq!(Scalar::Int(3).key(), Scalar::Float(3.0).key());
        assert_ne!(Scalar::Int(3).key(), Scalar::Str("3".into()).key());
    }

    #[test]
    fn test_compare_cross_numeric() {
        assert_eq!(
            Scalar::Int(2).compare(&Scalar::Float(2.5)),
            Some(Ordering::Less)
        );
        assert_eq!(Scalar::Null.compare(&Scalar::Int(1)), None);
    }

    #[test]
    fn test_infer_dtype() {
        let values = vec![Scalar::Null, Scalar::Int(1), Scalar::Float(2.0)];
        assert_eq!(infer_dtype(&values), DataType::Float);
        let values = vec![Scalar::Int(1), Scalar::Str("x".into())];
        assert_eq!(infer_dtype(&values), DataType::String);
        assert_eq!(infer_dtype(&[]), DataType::Null);
    }
}

//! Database value types
//!
//! This module defines the scalar values that flow through filters, mutation
//! payloads and result rows.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Database value that can hold different types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DatabaseValue {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// 32-bit integer
    Int(i32),
    /// 64-bit integer
    Long(i64),
    /// 32-bit floating point
    Float(f32),
    /// 64-bit floating point
    Double(f64),
    /// String value
    String(String),
    /// Binary data
    Bytes(Vec<u8>),
    /// Timestamp (Unix timestamp in microseconds)
    Timestamp(i64),
}

impl DatabaseValue {
    /// Boolean reading; integers are true when non-zero and strings accept
    /// `true/false`, `yes/no` and `1/0`
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DatabaseValue::Bool(v) => Some(*v),
            DatabaseValue::Int(_) | DatabaseValue::Long(_) => self.as_long().map(|v| v != 0),
            DatabaseValue::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Integer reading; SQLite hands back every INTEGER column as `Long`
    pub fn as_long(&self) -> Option<i64> {
        match self {
            DatabaseValue::Long(v) | DatabaseValue::Timestamp(v) => Some(*v),
            DatabaseValue::Int(v) => Some(i64::from(*v)),
            DatabaseValue::Bool(v) => Some(i64::from(*v)),
            DatabaseValue::Float(_) | DatabaseValue::Double(_) => {
                self.as_double().map(|v| v as i64)
            }
            DatabaseValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            DatabaseValue::Double(v) => Some(*v),
            DatabaseValue::Float(v) => Some(f64::from(*v)),
            DatabaseValue::Int(v) => Some(f64::from(*v)),
            DatabaseValue::Long(v) => Some(*v as f64),
            DatabaseValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Get the value as a string (zero-copy for String values)
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DatabaseValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Text form of the value, as used in log lines and test assertions
    pub fn as_string(&self) -> String {
        self.to_string()
    }

    /// Get the value as bytes (zero-copy)
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            DatabaseValue::Bytes(b) => Some(b),
            DatabaseValue::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Interpret the value as a UTC timestamp
    ///
    /// `Timestamp` and integer values are read as microseconds since the epoch,
    /// strings as RFC 3339.
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            DatabaseValue::Timestamp(v) | DatabaseValue::Long(v) => {
                Utc.timestamp_micros(*v).single()
            }
            DatabaseValue::Int(v) => Utc.timestamp_micros(*v as i64).single(),
            DatabaseValue::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            _ => None,
        }
    }

    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            DatabaseValue::Null => "null",
            DatabaseValue::Bool(_) => "bool",
            DatabaseValue::Int(_) => "int",
            DatabaseValue::Long(_) => "long",
            DatabaseValue::Float(_) => "float",
            DatabaseValue::Double(_) => "double",
            DatabaseValue::String(_) => "string",
            DatabaseValue::Bytes(_) => "bytes",
            DatabaseValue::Timestamp(_) => "timestamp",
        }
    }

    /// Render the value as plain JSON (no enum tagging)
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            DatabaseValue::Null => serde_json::Value::Null,
            DatabaseValue::Bool(v) => serde_json::Value::Bool(*v),
            DatabaseValue::Int(v) => serde_json::Value::from(*v),
            DatabaseValue::Long(v) | DatabaseValue::Timestamp(v) => serde_json::Value::from(*v),
            DatabaseValue::Float(v) => serde_json::Value::from(*v as f64),
            DatabaseValue::Double(v) => serde_json::Value::from(*v),
            DatabaseValue::String(s) => serde_json::Value::String(s.clone()),
            DatabaseValue::Bytes(b) => serde_json::Value::from(b.clone()),
        }
    }
}

macro_rules! value_from {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$source> for DatabaseValue {
                fn from(v: $source) -> Self {
                    DatabaseValue::$variant(v)
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    String => String,
    Vec<u8> => Bytes,
}

impl From<&str> for DatabaseValue {
    fn from(v: &str) -> Self {
        DatabaseValue::String(v.to_owned())
    }
}

impl From<DateTime<Utc>> for DatabaseValue {
    fn from(v: DateTime<Utc>) -> Self {
        DatabaseValue::Timestamp(v.timestamp_micros())
    }
}

impl<T: Into<DatabaseValue>> From<Option<T>> for DatabaseValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// Scalar JSON maps onto the matching variant; arrays and objects are kept
/// as their JSON text.
impl From<&serde_json::Value> for DatabaseValue {
    fn from(v: &serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => DatabaseValue::Null,
            serde_json::Value::Bool(b) => DatabaseValue::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => DatabaseValue::Long(i),
                None => n
                    .as_f64()
                    .map(DatabaseValue::Double)
                    .unwrap_or(DatabaseValue::Null),
            },
            serde_json::Value::String(s) => DatabaseValue::String(s.clone()),
            other => DatabaseValue::String(other.to_string()),
        }
    }
}

impl From<serde_json::Value> for DatabaseValue {
    fn from(v: serde_json::Value) -> Self {
        DatabaseValue::from(&v)
    }
}

impl fmt::Display for DatabaseValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseValue::Null => f.write_str("null"),
            DatabaseValue::Bool(v) => write!(f, "{}", v),
            DatabaseValue::Int(v) => write!(f, "{}", v),
            DatabaseValue::Long(v) | DatabaseValue::Timestamp(v) => write!(f, "{}", v),
            DatabaseValue::Float(v) => write!(f, "{}", v),
            DatabaseValue::Double(v) => write!(f, "{}", v),
            DatabaseValue::String(s) => f.write_str(s),
            DatabaseValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// Column name -> value payload of a single row to insert or update
pub type RowValues = BTreeMap<String, DatabaseValue>;

/// Build a [`RowValues`] payload from name/value pairs
///
/// ```
/// use rust_data_layer::core::value::{values, DatabaseValue};
///
/// let row = values([("id", DatabaseValue::from(1)), ("status", "a".into())]);
/// assert_eq!(row.len(), 2);
/// ```
pub fn values<K, V, I>(pairs: I) -> RowValues
where
    K: Into<String>,
    V: Into<DatabaseValue>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversions() {
        let val = DatabaseValue::Int(42);
        assert_eq!(val.as_long(), Some(42));
        assert_eq!(val.as_string(), "42");

        let val = DatabaseValue::String("123".to_string());
        assert_eq!(val.as_long(), Some(123));

        let val = DatabaseValue::Bool(true);
        assert_eq!(val.as_bool(), Some(true));
        assert_eq!(val.as_long(), Some(1));
    }

    #[test]
    fn test_value_from_types() {
        let val: DatabaseValue = 42.into();
        assert_eq!(val, DatabaseValue::Int(42));

        let val: DatabaseValue = "hello".into();
        assert_eq!(val, DatabaseValue::String("hello".to_string()));

        let val: DatabaseValue = Option::<i32>::None.into();
        assert_eq!(val, DatabaseValue::Null);
    }

    #[test]
    fn test_value_from_json() {
        assert_eq!(
            DatabaseValue::from(serde_json::json!(7)),
            DatabaseValue::Long(7)
        );
        assert_eq!(
            DatabaseValue::from(serde_json::json!(2.5)),
            DatabaseValue::Double(2.5)
        );
        assert_eq!(
            DatabaseValue::from(serde_json::json!(null)),
            DatabaseValue::Null
        );
        assert_eq!(
            DatabaseValue::from(serde_json::json!({"a": 1})),
            DatabaseValue::String("{\"a\":1}".to_string())
        );
    }

    #[test]
    fn test_value_to_json() {
        assert_eq!(DatabaseValue::Long(3).to_json(), serde_json::json!(3));
        assert_eq!(
            DatabaseValue::String("x".into()).to_json(),
            serde_json::json!("x")
        );
        assert_eq!(DatabaseValue::Null.to_json(), serde_json::Value::Null);
    }

    #[test]
    fn test_datetime_roundtrip() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let val = DatabaseValue::from(now);
        assert_eq!(val.type_name(), "timestamp");
        assert_eq!(val.as_datetime(), Some(now));

        let val = DatabaseValue::from("2024-03-01T12:00:00Z");
        assert_eq!(val.as_datetime(), Some(now));
    }

    #[test]
    fn test_values_helper() {
        let row = values([("b", DatabaseValue::from(2)), ("a", DatabaseValue::from(1))]);
        let keys: Vec<&str> = row.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, WireError};

/// One self-describing value as carried on the wire.
///
/// Numbers, booleans and maps have no dedicated tag; they travel as
/// [`Value::Other`], a JSON document.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// No value at all.
    #[default]
    Absent,
    /// UTF-8 text.
    String(String),
    /// Raw bytes.
    Bytes(Bytes),
    /// Ordered list of values.
    List(Vec<Value>),
    /// Any other structured value.
    Other(serde_json::Value),
}

impl Value {
    /// Serialize any serde value into an `Other` value.
    ///
    /// Strings and `null` map to their dedicated kinds so that a round trip
    /// through [`Value::to_serde`] is lossless.
    pub fn from_serde<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self::from(serde_json::to_value(value)?))
    }

    /// Deserialize this value into a typed serde value.
    pub fn to_serde<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.to_json())?)
    }

    /// Convert into a JSON document. Byte blobs become arrays of numbers.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Absent => serde_json::Value::Null,
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => serde_json::Value::Array(
                b.iter()
                    .map(|byte| serde_json::Value::from(*byte))
                    .collect(),
            ),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Other(v) => v.clone(),
        }
    }

    /// Short kind name, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Absent => "absent",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Other(_) => "other",
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Unsigned integer carried as an `Other` JSON number.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Other(v) => v.as_u64(),
            _ => None,
        }
    }

    /// Signed integer carried as an `Other` JSON number.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Other(v) => v.as_i64(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Value::Bytes(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(Bytes::from(value))
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Absent
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Absent,
            serde_json::Value::String(s) => Value::String(s),
            other => Value::Other(other),
        }
    }
}

macro_rules! impl_from_json_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::Other(serde_json::Value::from(value))
                }
            }
        )*
    };
}

impl_from_json_scalar!(bool, i32, i64, u32, u64, f64);

impl TryFrom<Value> for String {
    type Error = WireError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(WireError::UnexpectedKind {
                expected: "string",
                found: other.kind(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, serde::Deserialize)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[test]
    fn serde_bridge_roundtrip() {
        let value = Value::from_serde(&Point { x: 1, y: -2 }).unwrap();
        assert!(matches!(value, Value::Other(_)));
        assert_eq!(value.to_serde::<Point>().unwrap(), Point { x: 1, y: -2 });
    }

    #[test]
    fn json_strings_and_null_use_dedicated_kinds() {
        assert_eq!(Value::from(serde_json::json!("hi")), Value::from("hi"));
        assert_eq!(Value::from(serde_json::Value::Null), Value::Absent);
    }

    #[test]
    fn numbers_travel_as_other() {
        let value = Value::from(42u64);
        assert_eq!(value.as_u64(), Some(42));
        assert_eq!(value.kind(), "other");
    }

    #[test]
    fn string_conversion_checks_kind() {
        assert_eq!(String::try_from(Value::from("ctx")).unwrap(), "ctx");
        let err = String::try_from(Value::from(1u32)).unwrap_err();
        assert!(matches!(
            err,
            WireError::UnexpectedKind {
                expected: "string",
                found: "other"
            }
        ));
    }

    #[test]
    fn bytes_to_json_is_number_array() {
        let value = Value::from(vec![1u8, 2, 3]);
        assert_eq!(value.to_json(), serde_json::json!([1, 2, 3]));
    }
}

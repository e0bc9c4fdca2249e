//! Value encoding between the memory layer and the remote store.

use serde::Deserialize;
use serde_json::Value;

use crate::error::BackendError;

/// Wire format for values written to the remote store.
///
/// JSON keeps integers as plain decimal strings, which is what `INCRBY` and
/// `HINCRBY` operate on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Serializer {
    #[default]
    Json,
}

impl Serializer {
    /// Encode a value for storage.
    pub fn encode(&self, value: &Value) -> Result<String, BackendError> {
        match self {
            Serializer::Json => Ok(serde_json::to_string(value)?),
        }
    }

    /// Decode a stored value.
    pub fn decode(&self, raw: &str) -> Result<Value, BackendError> {
        match self {
            Serializer::Json => Ok(serde_json::from_str(raw)?),
        }
    }
}

/// Coerce a cached value to an integer counter.
///
/// Integers pass through, floats truncate, numeric strings parse, booleans
/// map to 0/1 and everything else counts as 0.
pub fn counter_value(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|u| i64::try_from(u).unwrap_or(i64::MAX)))
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
                .unwrap_or(0)
        }
        Value::Bool(b) => i64::from(*b),
        Value::Null | Value::Array(_) | Value::Object(_) => 0,
    }
}

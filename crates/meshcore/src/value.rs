use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A dynamically typed payload.
///
/// The same type flows through every slot of a workflow: values written to
/// output ports, constants configured on parameter ports (re-offered to the
/// node on every epoch), the value inside an edge envelope crossing to
/// another peer, and results uploaded to the leader. Its serde form is the
/// tagged `{"type": ..., "value": ...}` object carried in data-pass and
/// result messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    Array(Vec<Value>),
    Object(HashMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Counters and millisecond parameters. Only integral, non-negative
    /// numbers qualify; `1.5` or `-1` give `None`.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Some(*n as u64),
            _ => None,
        }
    }

    /// Tag compared against `PortDefinition::value_type` and reported in
    /// input type errors
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Json(_) => "json",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

/// Human-readable form used in logs and result output
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => f.write_str(s),
            Value::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Value::Json(json) => write!(f, "{}", json),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Object(fields) => {
                let mut keys: Vec<_> = fields.keys().collect();
                keys.sort();
                f.write_str("{")?;
                for (i, key) in keys.into_iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", key, fields[key])?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

/// Epoch numbers become port values through this
impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<serde_json::Value> for Value {
    fn from(j: serde_json::Value) -> Self {
        Value::Json(j)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millisecond_params_must_be_whole() {
        assert_eq!(Value::Number(250.0).as_u64(), Some(250));
        assert_eq!(Value::Number(0.5).as_u64(), None);
        assert_eq!(Value::Number(-1.0).as_u64(), None);
        assert_eq!(Value::from("250").as_u64(), None);
    }

    #[test]
    fn envelope_value_keeps_its_tag_on_the_wire() {
        let json = serde_json::to_string(&Value::from(3u64)).unwrap();
        assert_eq!(json, r#"{"type":"Number","value":3.0}"#);

        let back: Value = serde_json::from_str(r#"{"type":"String","value":"go"}"#).unwrap();
        assert_eq!(back, Value::from("go"));
    }

    #[test]
    fn display_is_plain() {
        assert_eq!(Value::from(4u64).to_string(), "4");
        assert_eq!(Value::from("hi").to_string(), "hi");
        assert_eq!(
            Value::Array(vec![Value::Null, true.into()]).to_string(),
            "[null, true]"
        );
        assert_eq!(Value::Bytes(vec![1, 2, 3]).to_string(), "<3 bytes>");
    }
}

//! Serializers Module
//!
//! The capability interface every value serializer implements, plus the
//! three built-in serializers.

use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::value::Value;

/// Failure raised by a serializer in either direction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct SerializerError(pub String);

// == Serializer Trait ==
/// Converts values to bytes and back.
///
/// `name` is the serializer's identity inside the registry, so two instances
/// with the same name are treated as the same serializer.
pub trait Serializer: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn serialize(&self, value: &Value) -> Result<Vec<u8>, SerializerError>;

    fn deserialize(&self, bytes: &[u8]) -> Result<Value, SerializerError>;
}

/// Shared handle to a serializer.
pub type SerializerRef = Arc<dyn Serializer>;

// == Built-in Serializers ==
/// Serializers available in every registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// MessagePack; round-trips every `Value` variant
    Binary,
    /// Raw bytes, values are stored as their string form
    Passthrough,
    /// JSON text
    Json,
}

impl Builtin {
    pub const ALL: [Builtin; 3] = [Builtin::Binary, Builtin::Passthrough, Builtin::Json];

    /// Fixed registry flag of the built-in.
    pub fn flag(self) -> u8 {
        match self {
            Builtin::Binary => 0x1,
            Builtin::Passthrough => 0x2,
            Builtin::Json => 0x3,
        }
    }

    pub fn shared(self) -> SerializerRef {
        Arc::new(self)
    }

    /// Looks up a built-in by its configuration name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "binary" | "msgpack" | "marshal" => Some(Builtin::Binary),
            "passthrough" | "raw" => Some(Builtin::Passthrough),
            "json" => Some(Builtin::Json),
            _ => None,
        }
    }
}

impl Serializer for Builtin {
    fn name(&self) -> &str {
        match self {
            Builtin::Binary => "binary",
            Builtin::Passthrough => "passthrough",
            Builtin::Json => "json",
        }
    }

    fn serialize(&self, value: &Value) -> Result<Vec<u8>, SerializerError> {
        match self {
            Builtin::Binary => {
                rmp_serde::to_vec(value).map_err(|e| SerializerError(e.to_string()))
            }
            Builtin::Passthrough => Ok(match value {
                Value::Bytes(b) => b.clone(),
                other => other.to_string().into_bytes(),
            }),
            Builtin::Json => {
                serde_json::to_vec(value).map_err(|e| SerializerError(e.to_string()))
            }
        }
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value, SerializerError> {
        match self {
            Builtin::Binary => {
                // Trailing bytes mean the payload was not produced by us
                let mut cursor = Cursor::new(bytes);
                let value = Value::deserialize(&mut rmp_serde::Deserializer::new(&mut cursor))
                    .map_err(|e| SerializerError(e.to_string()))?;
                if cursor.position() as usize != bytes.len() {
                    return Err(SerializerError("trailing bytes after value".to_string()));
                }
                Ok(value)
            }
            Builtin::Passthrough => Ok(match std::str::from_utf8(bytes) {
                Ok(s) => Value::Str(s.to_string()),
                Err(_) => Value::Bytes(bytes.to_vec()),
            }),
            Builtin::Json => {
                serde_json::from_slice(bytes).map_err(|e| SerializerError(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn nested() -> Value {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), Value::Int(1));
        map.insert("b".to_string(), Value::from("2"));
        map.insert(
            "c".to_string(),
            Value::List(vec![Value::Float(1.5), Value::Bool(true), Value::Nil]),
        );
        Value::Map(map)
    }

    #[test]
    fn test_binary_roundtrips_every_variant() {
        let values = vec![
            Value::from("some string"),
            Value::Int(-42),
            Value::Bytes(vec![0, 159, 146, 150]),
            nested(),
        ];
        for value in values {
            let bytes = Builtin::Binary.serialize(&value).unwrap();
            assert_eq!(Builtin::Binary.deserialize(&bytes).unwrap(), value);
        }
    }

    #[test]
    fn test_json_roundtrips_structures() {
        let bytes = Builtin::Json.serialize(&nested()).unwrap();
        assert_eq!(Builtin::Json.deserialize(&bytes).unwrap(), nested());
    }

    #[test]
    fn test_json_dump_is_plain_json() {
        let bytes = Builtin::Json.serialize(&Value::from("some string")).unwrap();
        assert_eq!(bytes, br#""some string""#.to_vec());
    }

    #[test]
    fn test_passthrough_stores_string_form() {
        let bytes = Builtin::Passthrough.serialize(&Value::Int(10)).unwrap();
        assert_eq!(bytes, b"10".to_vec());
        assert_eq!(
            Builtin::Passthrough.deserialize(b"value").unwrap(),
            Value::from("value")
        );
    }

    #[test]
    fn test_binary_rejects_foreign_text() {
        assert!(Builtin::Binary.deserialize(b"not marshalled").is_err());
    }

    #[test]
    fn test_from_name() {
        assert_eq!(Builtin::from_name("JSON"), Some(Builtin::Json));
        assert_eq!(Builtin::from_name("raw"), Some(Builtin::Passthrough));
        assert_eq!(Builtin::from_name("yaml"), None);
    }
}

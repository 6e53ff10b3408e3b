//! Entity Module
//!
//! Dumps values into flag-framed byte strings and loads them back.
//!
//! The flag byte is laid out as:
//!
//! ```text
//! | 0000 | 0 | 000 |
//!   |      |   +---- serializer flag (1-7)
//!   |      +-------- compressed
//!   +--------------- reserved, always zero
//! ```
//!
//! Any first byte below 16 is read as a flag byte. Anything else is an
//! unframed legacy payload decoded with the instance defaults. A legacy
//! payload that happens to start below 16 is misread as framed; that
//! ambiguity is inherent to the format.

use std::sync::Arc;

use tracing::trace;

use crate::codec::compressor;
use crate::codec::registry::Serializers;
use crate::codec::serializers::SerializerRef;
use crate::error::{CacheError, Result};
use crate::options::Options;
use crate::value::Value;

/// Compression bit of the flag byte.
pub const COMPRESSED_FLAG: u8 = 0x8;

/// First bytes at or above this value are never flag bytes.
pub const FRAMED_LIMIT: u8 = 16;

/// Default compression threshold of a bare entity, in bytes.
pub const DEFAULT_THRESHOLD: usize = 8 * 1024;

/// Decoding parameters extracted from a stored entry.
#[derive(Debug, Clone)]
pub struct Decomposed<'a> {
    pub serializer: SerializerRef,
    pub compressed: bool,
    pub payload: &'a [u8],
}

// == Entity ==
/// Encodes and decodes stored cache entries.
#[derive(Debug, Clone)]
pub struct Entity {
    serializers: Arc<Serializers>,
    serializer: SerializerRef,
    compress: bool,
    threshold: usize,
}

impl Entity {
    // == Constructor ==
    /// Creates an entity codec with instance defaults.
    ///
    /// # Arguments
    /// * `serializers` - Registry resolving flags to serializers
    /// * `serializer` - Default serializer for dumps and legacy loads
    /// * `compress` - Whether dumps compress by default
    /// * `threshold` - Minimum serialized size in bytes for compression
    pub fn new(
        serializers: Arc<Serializers>,
        serializer: SerializerRef,
        compress: bool,
        threshold: usize,
    ) -> Self {
        Self {
            serializers,
            serializer,
            compress,
            threshold,
        }
    }

    // == Dump ==
    /// Serializes, optionally compresses and frames a value.
    ///
    /// `Nil` dumps to an empty byte string without touching a serializer.
    pub fn dump(&self, value: &Value, overrides: &Options) -> Result<Vec<u8>> {
        if value.is_nil() {
            return Ok(Vec::new());
        }

        let serializer = overrides
            .serializer
            .clone()
            .unwrap_or_else(|| self.serializer.clone());
        let compress = overrides.compress.unwrap_or(self.compress);
        let threshold = overrides.compression_threshold.unwrap_or(self.threshold);

        let flag = self.serializers.flag_of(serializer.as_ref())?;
        let serialized = serializer
            .serialize(value)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;

        let compressed = compress && serialized.len() >= threshold;
        let payload = if compressed {
            compressor::compress(&serialized)?
        } else {
            serialized
        };

        Ok(Self::compose(payload, flag, compressed))
    }

    // == Load ==
    /// Decodes a stored entry.
    ///
    /// Never fails: undecodable input comes back as `Value::Bytes` holding
    /// the original bytes.
    pub fn load(&self, bytes: &[u8]) -> Value {
        if bytes.is_empty() {
            return Value::Nil;
        }

        let decomposed = match self.decompose(bytes) {
            Ok(decomposed) => decomposed,
            Err(err) => {
                trace!("Unrecognized entity flag, returning raw bytes: {}", err);
                return Value::Bytes(bytes.to_vec());
            }
        };

        let inflated;
        let payload = if decomposed.compressed {
            match compressor::try_decompress(decomposed.payload) {
                Some(out) => {
                    inflated = out;
                    inflated.as_slice()
                }
                None => decomposed.payload,
            }
        } else {
            decomposed.payload
        };

        match decomposed.serializer.deserialize(payload) {
            Ok(value) => value,
            Err(err) => {
                trace!("Entity failed to deserialize, returning raw bytes: {}", err);
                Value::Bytes(bytes.to_vec())
            }
        }
    }

    // == Compose ==
    /// Prepends the flag byte built from `flag` and `compressed`.
    pub fn compose(mut payload: Vec<u8>, flag: u8, compressed: bool) -> Vec<u8> {
        let mut marker = flag;
        if compressed {
            marker |= COMPRESSED_FLAG;
        }
        payload.insert(0, marker);
        payload
    }

    // == Decompose ==
    /// Splits a stored entry into its decoding parameters and payload.
    ///
    /// Unframed input resolves to the instance defaults with nothing stripped.
    pub fn decompose<'a>(&self, bytes: &'a [u8]) -> Result<Decomposed<'a>> {
        match bytes.first() {
            Some(&marker) if marker < FRAMED_LIMIT => Ok(Decomposed {
                serializer: self.serializers.serializer_of(marker)?,
                compressed: marker & COMPRESSED_FLAG != 0,
                payload: &bytes[1..],
            }),
            _ => Ok(Decomposed {
                serializer: self.serializer.clone(),
                compressed: self.compress,
                payload: bytes,
            }),
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::serializers::{Builtin, Serializer};
    use std::collections::BTreeMap;

    fn entity(serializer: Builtin, compress: bool, threshold: usize) -> Entity {
        Entity::new(
            Arc::new(Serializers::new()),
            serializer.shared(),
            compress,
            threshold,
        )
    }

    fn sample_map() -> Value {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), Value::Int(1));
        map.insert("b".to_string(), Value::from("2"));
        Value::Map(map)
    }

    #[test]
    fn test_dump_frames_the_serialized_value() {
        let entity = entity(Builtin::Binary, false, DEFAULT_THRESHOLD);
        let value = Value::from("some string");

        let dumped = entity.dump(&value, &Options::new()).unwrap();

        assert_eq!(dumped[0], 0x1);
        assert_eq!(&dumped[1..], Builtin::Binary.serialize(&value).unwrap().as_slice());
    }

    #[test]
    fn test_dump_uses_override_serializer() {
        let entity = entity(Builtin::Binary, false, DEFAULT_THRESHOLD);
        let opts = Options::new().serializer(Builtin::Json.shared());

        let dumped = entity.dump(&Value::from("still some string"), &opts).unwrap();

        assert_eq!(dumped[0], 0x3);
        assert_eq!(&dumped[1..], br#""still some string""#);
    }

    #[test]
    fn test_dump_applies_compression() {
        let entity = entity(Builtin::Binary, true, 8);
        let value = Value::from("a very large string, huge I tell you");

        let dumped = entity.dump(&value, &Options::new()).unwrap();

        assert_eq!(dumped[0], 0x1 | COMPRESSED_FLAG);
        assert_eq!(entity.load(&dumped), value);
    }

    #[test]
    fn test_threshold_boundary() {
        // Passthrough keeps the serialized length equal to the string length
        let entity = entity(Builtin::Passthrough, true, 16);

        let at = entity.dump(&Value::from("x".repeat(16)), &Options::new()).unwrap();
        assert_eq!(at[0] & COMPRESSED_FLAG, COMPRESSED_FLAG);

        let below = entity.dump(&Value::from("x".repeat(15)), &Options::new()).unwrap();
        assert_eq!(below[0] & COMPRESSED_FLAG, 0);
        assert_eq!(&below[1..], "x".repeat(15).as_bytes());
    }

    #[test]
    fn test_override_threshold_and_compress() {
        let entity = entity(Builtin::Binary, true, 2);
        let value = Value::from("a".repeat(8));
        let dumped = entity.dump(&value, &Options::new()).unwrap();

        let raised = entity
            .dump(&value, &Options::new().compression_threshold(100))
            .unwrap();
        assert_ne!(raised, dumped);

        let disabled = entity.dump(&value, &Options::new().compress(false)).unwrap();
        assert_ne!(disabled, dumped);
        assert_eq!(disabled, raised);
    }

    #[test]
    fn test_roundtrip_nil() {
        let entity = entity(Builtin::Binary, false, DEFAULT_THRESHOLD);
        let dumped = entity.dump(&Value::Nil, &Options::new()).unwrap();

        assert!(dumped.is_empty());
        assert_eq!(entity.load(&dumped), Value::Nil);
    }

    #[test]
    fn test_roundtrip_all_serializers_and_compression() {
        let values = vec![
            Value::from("some string"),
            Value::Int(12),
            Value::Float(0.5),
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
            sample_map(),
        ];

        for serializer in [Builtin::Binary, Builtin::Json] {
            for compress in [false, true] {
                let entity = entity(serializer, compress, 1);
                for value in &values {
                    let dumped = entity.dump(value, &Options::new()).unwrap();
                    assert_eq!(&entity.load(&dumped), value, "{:?}", serializer);
                }
            }
        }
    }

    #[test]
    fn test_load_uses_the_dumped_flags() {
        let custom = entity(Builtin::Json, true, 1);
        let general = entity(Builtin::Binary, false, DEFAULT_THRESHOLD);
        let value = Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);

        let dumped = custom.dump(&value, &Options::new()).unwrap();

        assert_eq!(general.load(&dumped), value);
    }

    #[test]
    fn test_load_unframed_uses_defaults() {
        let entity = entity(Builtin::Json, false, DEFAULT_THRESHOLD);
        assert_eq!(entity.load(br#"{"a":1,"b":"2"}"#), sample_map());
    }

    #[test]
    fn test_load_passes_through_undecodable_values() {
        let entity = entity(Builtin::Binary, false, DEFAULT_THRESHOLD);
        assert_eq!(
            entity.load(b"not marshalled"),
            Value::Bytes(b"not marshalled".to_vec())
        );
    }

    #[test]
    fn test_load_passes_through_incorrectly_deduced_compression() {
        let entity = entity(Builtin::Binary, true, 1);
        let bytes = [120u8, 156, 97, 98, 99];

        assert_eq!(entity.load(&bytes), Value::Bytes(bytes.to_vec()));
    }

    #[test]
    fn test_load_compressed_flag_with_plain_payload() {
        let entity = entity(Builtin::Passthrough, false, DEFAULT_THRESHOLD);
        let framed = Entity::compose(b"plain".to_vec(), 0x2, true);

        assert_eq!(entity.load(&framed), Value::from("plain"));
    }

    #[test]
    fn test_load_unknown_flag_returns_raw() {
        let entity = entity(Builtin::Binary, false, DEFAULT_THRESHOLD);
        let framed = Entity::compose(b"payload".to_vec(), 0x6, false);

        assert_eq!(entity.load(&framed), Value::Bytes(framed.clone()));
    }

    #[test]
    fn test_legacy_payload_below_16_is_misread() {
        // Known ambiguity: unframed data starting with a byte < 16 looks framed
        let entity = entity(Builtin::Passthrough, false, DEFAULT_THRESHOLD);
        let legacy = [0x02u8, b'h', b'i'];

        assert_eq!(entity.load(&legacy), Value::from("hi"));
    }

    #[test]
    fn test_compose_and_decompose() {
        let entity = entity(Builtin::Binary, false, DEFAULT_THRESHOLD);
        let marked = Entity::compose(b"the quick brown fox".to_vec(), 0x3, true);
        assert_eq!(marked[0], 0xB);

        let decomposed = entity.decompose(&marked).unwrap();
        assert_eq!(decomposed.serializer.name(), "json");
        assert!(decomposed.compressed);
        assert_eq!(decomposed.payload, b"the quick brown fox");

        let plain = entity.decompose(b"the quick brown fox").unwrap();
        assert_eq!(plain.serializer.name(), "binary");
        assert!(!plain.compressed);
        assert_eq!(plain.payload, b"the quick brown fox");
    }

    #[test]
    fn test_dump_unregistered_serializer_fails() {
        #[derive(Debug)]
        struct Unregistered;

        impl Serializer for Unregistered {
            fn name(&self) -> &str {
                "unregistered"
            }
            fn serialize(
                &self,
                _: &Value,
            ) -> std::result::Result<Vec<u8>, crate::codec::SerializerError> {
                Ok(Vec::new())
            }
            fn deserialize(
                &self,
                _: &[u8],
            ) -> std::result::Result<Value, crate::codec::SerializerError> {
                Ok(Value::Nil)
            }
        }

        let entity = entity(Builtin::Binary, false, DEFAULT_THRESHOLD);
        let opts = Options::new().serializer(Arc::new(Unregistered));

        assert!(matches!(
            entity.dump(&Value::from("x"), &opts),
            Err(CacheError::UnknownSerializer(_))
        ));
    }
}

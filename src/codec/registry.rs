//! Serializer Registry Module
//!
//! Assigns the 3-bit flag ids stored in every entity's flag byte.
//!
//! Flags are sticky: an entry records the flag of the serializer that wrote
//! it, so every process reading the same keyspace must register the same
//! extra serializers in the same order.

use parking_lot::RwLock;

use crate::codec::serializers::{Builtin, Serializer, SerializerRef};
use crate::error::{CacheError, Result};

/// Hard limit of registered serializers, the largest value of a 3-bit flag.
pub const SERIALIZER_LIMIT: usize = 7;

/// Mask selecting the serializer bits of a flag byte.
pub const SERIALIZER_MASK: u8 = 0x7;

#[derive(Debug)]
struct RegistryState {
    entries: Vec<(SerializerRef, u8)>,
    frozen: bool,
}

impl RegistryState {
    fn builtins() -> Self {
        Self {
            entries: Builtin::ALL.iter().map(|b| (b.shared(), b.flag())).collect(),
            frozen: false,
        }
    }
}

// == Serializers ==
/// Bounded, freezable registry of serializers.
#[derive(Debug)]
pub struct Serializers {
    state: RwLock<RegistryState>,
}

impl Serializers {
    // == Constructor ==
    /// Creates a registry holding only the three built-ins.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::builtins()),
        }
    }

    // == Register ==
    /// Appends a serializer and returns its newly assigned flag.
    ///
    /// Registering a serializer that is already present returns its
    /// existing flag.
    pub fn register(&self, serializer: SerializerRef) -> Result<u8> {
        let mut state = self.state.write();

        if state.frozen {
            return Err(CacheError::RegistryFrozen);
        }
        if let Some((_, flag)) = state
            .entries
            .iter()
            .find(|(s, _)| s.name() == serializer.name())
        {
            return Ok(*flag);
        }
        if state.entries.len() >= SERIALIZER_LIMIT {
            return Err(CacheError::RegistryFull(SERIALIZER_LIMIT));
        }

        let flag = state.entries.iter().map(|(_, f)| *f).max().unwrap_or(0) + 1;
        state.entries.push((serializer, flag));
        Ok(flag)
    }

    // == Flag Of ==
    /// Returns the flag of a registered serializer.
    pub fn flag_of(&self, serializer: &dyn Serializer) -> Result<u8> {
        self.state
            .read()
            .entries
            .iter()
            .find(|(s, _)| s.name() == serializer.name())
            .map(|(_, flag)| *flag)
            .ok_or_else(|| {
                CacheError::UnknownSerializer(format!(
                    "'{}' hasn't been configured",
                    serializer.name()
                ))
            })
    }

    // == Serializer Of ==
    /// Returns the serializer registered under the low 3 bits of `flag`.
    pub fn serializer_of(&self, flag: u8) -> Result<SerializerRef> {
        let masked = flag & SERIALIZER_MASK;
        self.state
            .read()
            .entries
            .iter()
            .find(|(_, f)| *f == masked)
            .map(|(s, _)| s.clone())
            .ok_or_else(|| CacheError::UnknownSerializer(format!("flag {:#x}", masked)))
    }

    /// Prevents any further registration. Idempotent.
    pub fn freeze(&self) {
        self.state.write().frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.state.read().frozen
    }

    /// Restores the pristine state: built-ins only, unfrozen.
    pub fn reset(&self) {
        *self.state.write() = RegistryState::builtins();
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    /// Registered flags in assignment order.
    pub fn flags(&self) -> Vec<u8> {
        self.state.read().entries.iter().map(|(_, f)| *f).collect()
    }
}

impl Default for Serializers {
    fn default() -> Self {
        Self::new()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::serializers::SerializerError;
    use crate::value::Value;
    use std::sync::Arc;

    #[derive(Debug)]
    struct Named(String);

    impl Serializer for Named {
        fn name(&self) -> &str {
            &self.0
        }

        fn serialize(&self, value: &Value) -> std::result::Result<Vec<u8>, SerializerError> {
            Ok(value.to_string().into_bytes())
        }

        fn deserialize(&self, bytes: &[u8]) -> std::result::Result<Value, SerializerError> {
            Ok(Value::Bytes(bytes.to_vec()))
        }
    }

    fn named(name: &str) -> SerializerRef {
        Arc::new(Named(name.to_string()))
    }

    #[test]
    fn test_builtins_present() {
        let serializers = Serializers::new();
        assert_eq!(serializers.flags(), vec![1, 2, 3]);
        assert_eq!(serializers.flag_of(&Builtin::Binary).unwrap(), 1);
        assert_eq!(serializers.flag_of(&Builtin::Passthrough).unwrap(), 2);
        assert_eq!(serializers.flag_of(&Builtin::Json).unwrap(), 3);
    }

    #[test]
    fn test_register_appends_next_flag() {
        let serializers = Serializers::new();
        assert_eq!(serializers.register(named("oj")).unwrap(), 4);
        assert_eq!(serializers.register(named("cbor")).unwrap(), 5);
        assert_eq!(serializers.serializer_of(5).unwrap().name(), "cbor");
    }

    #[test]
    fn test_register_existing_returns_flag() {
        let serializers = Serializers::new();
        assert_eq!(serializers.register(Builtin::Json.shared()).unwrap(), 3);
        assert_eq!(serializers.len(), 3);
    }

    #[test]
    fn test_register_beyond_limit_fails() {
        let serializers = Serializers::new();
        for i in 0..4 {
            serializers.register(named(&format!("s{}", i))).unwrap();
        }
        assert_eq!(serializers.len(), SERIALIZER_LIMIT);

        let result = serializers.register(named("eighth"));
        assert!(matches!(result, Err(CacheError::RegistryFull(7))));
    }

    #[test]
    fn test_register_after_freeze_fails() {
        let serializers = Serializers::new();
        serializers.freeze();
        serializers.freeze();

        let result = serializers.register(named("late"));
        assert!(matches!(result, Err(CacheError::RegistryFrozen)));
    }

    #[test]
    fn test_reset_restores_builtins() {
        let serializers = Serializers::new();
        serializers.register(named("extra")).unwrap();
        serializers.freeze();

        serializers.reset();

        assert_eq!(serializers.flags(), vec![1, 2, 3]);
        assert!(!serializers.is_frozen());
        assert!(serializers.flag_of(&Named("extra".to_string())).is_err());
    }

    #[test]
    fn test_unknown_lookups_fail() {
        let serializers = Serializers::new();
        assert!(matches!(
            serializers.flag_of(&Named("missing".to_string())),
            Err(CacheError::UnknownSerializer(_))
        ));
        assert!(matches!(
            serializers.serializer_of(0),
            Err(CacheError::UnknownSerializer(_))
        ));
        assert!(serializers.serializer_of(6).is_err());
    }

    #[test]
    fn test_serializer_of_masks_compression_bit() {
        let serializers = Serializers::new();
        assert_eq!(serializers.serializer_of(0x8 | 0x3).unwrap().name(), "json");
    }
}

//! Codec Module
//!
//! Entity wire encoding: serializers, their flag registry, and compression.

pub mod compressor;
mod entity;
mod registry;
mod serializers;

pub use entity::{Decomposed, Entity, COMPRESSED_FLAG, DEFAULT_THRESHOLD, FRAMED_LIMIT};
pub use registry::{Serializers, SERIALIZER_LIMIT, SERIALIZER_MASK};
pub use serializers::{Builtin, Serializer, SerializerError, SerializerRef};

//! Readthrough - A Redis-backed caching client
//!
//! Stores typed values behind a single flag byte describing the serializer
//! and compression, with namespacing, atomic bulk writes, TTL refresh and
//! tolerance of backend outages. Also ships a standalone in-process LRU.

pub mod backend;
pub mod cache;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod keys;
pub mod lru;
pub mod options;
pub mod scripts;
pub mod value;

pub use cache::Cache;
pub use config::Config;
pub use context::Context;
pub use error::{CacheError, Result};
pub use keys::CacheKey;
pub use options::Options;
pub use value::Value;

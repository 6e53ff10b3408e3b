//! Cache Module
//!
//! The caching client: single and bulk operations over a pooled backend.

mod service;

pub use service::{coerce_expiration, Cache, DEFAULT_SCAN_COUNT, MAX_EXPIRE_SECS};

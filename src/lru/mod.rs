//! LRU Module
//!
//! Provides the in-process cache with TTL expiration and LRU eviction.

mod entry;
mod store;


// Re-export public types
pub use entry::{current_timestamp_ms, LruEntry};
pub use store::{LruStore, DEFAULT_MAX};

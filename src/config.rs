//! Configuration Module
//!
//! Instance defaults for a cache, loadable from environment variables.

use std::env;
use std::time::Duration;

use crate::codec::{Builtin, SerializerRef};

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Prefix applied to every key as `namespace:key`
    pub namespace: Option<String>,
    /// Default expiration, None = entries never expire
    pub expires_in: Option<Duration>,
    /// Compress payloads at or above `compression_threshold` bytes
    pub compress: bool,
    /// Minimum serialized size in bytes before compression applies
    pub compression_threshold: usize,
    /// Extend an entry's TTL whenever it is read
    pub refresh: bool,
    /// Keep missing keys in `read_multi` results as `Value::Nil`
    pub retain_nils: bool,
    /// Serializer used for writes and for unframed legacy reads
    pub serializer: SerializerRef,
    /// Maximum number of pooled connections
    pub pool_size: usize,
    /// How long an operation waits for a pooled connection
    pub pool_timeout: Duration,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `READTHROUGH_NAMESPACE` - Key namespace (default: none)
    /// - `READTHROUGH_EXPIRES_IN` - Default TTL in seconds (default: none)
    /// - `READTHROUGH_COMPRESS` - Enable compression (default: false)
    /// - `READTHROUGH_COMPRESSION_THRESHOLD` - Compression threshold in bytes (default: 1024)
    /// - `READTHROUGH_REFRESH` - Refresh TTL on read (default: false)
    /// - `READTHROUGH_RETAIN_NILS` - Keep misses in bulk reads (default: false)
    /// - `READTHROUGH_SERIALIZER` - `binary`, `passthrough` or `json` (default: binary)
    /// - `READTHROUGH_POOL_SIZE` - Pooled connections (default: 5)
    /// - `READTHROUGH_POOL_TIMEOUT` - Checkout timeout in seconds (default: 5)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            namespace: env::var("READTHROUGH_NAMESPACE")
                .ok()
                .filter(|v| !v.is_empty()),
            expires_in: parse_env::<f64>("READTHROUGH_EXPIRES_IN")
                .filter(|secs| *secs > 0.0)
                .map(Duration::from_secs_f64),
            compress: parse_flag("READTHROUGH_COMPRESS").unwrap_or(defaults.compress),
            compression_threshold: parse_env("READTHROUGH_COMPRESSION_THRESHOLD")
                .unwrap_or(defaults.compression_threshold),
            refresh: parse_flag("READTHROUGH_REFRESH").unwrap_or(defaults.refresh),
            retain_nils: parse_flag("READTHROUGH_RETAIN_NILS").unwrap_or(defaults.retain_nils),
            serializer: env::var("READTHROUGH_SERIALIZER")
                .ok()
                .and_then(|v| Builtin::from_name(&v))
                .map(Builtin::shared)
                .unwrap_or(defaults.serializer),
            pool_size: parse_env("READTHROUGH_POOL_SIZE")
                .filter(|size| *size > 0)
                .unwrap_or(defaults.pool_size),
            pool_timeout: parse_env::<f64>("READTHROUGH_POOL_TIMEOUT")
                .filter(|secs| *secs >= 0.0)
                .map(Duration::from_secs_f64)
                .unwrap_or(defaults.pool_timeout),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn parse_flag(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .and_then(|v| match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: None,
            expires_in: None,
            compress: false,
            compression_threshold: 1024,
            refresh: false,
            retain_nils: false,
            serializer: Builtin::Binary.shared(),
            pool_size: 5,
            pool_timeout: Duration::from_secs(5),
        }
    }
}

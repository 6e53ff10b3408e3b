//! Error types for the cache client
//!
//! Provides unified error handling using thiserror.

use std::time::Duration;

use thiserror::Error;

// == Backend Error Enum ==
/// Failures reported by a backend transport.
///
/// Only [`BackendError::Connection`] is considered transient; it is the one
/// variant fault tolerance is allowed to swallow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The connection could not be established or was lost mid-command
    #[error("Connection failed: {0}")]
    Connection(String),

    /// EVALSHA referenced a script the server does not know
    #[error("No matching script: {0}")]
    NoScript(String),

    /// The server rejected or failed a command
    #[error("Command failed: {0}")]
    Command(String),
}

/// Convenience Result type for backend transports.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

// == Cache Error Enum ==
/// Unified error type for the cache client.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The serializer registry was frozen before the append
    #[error("Serializers are frozen and can not be modified")]
    RegistryFrozen,

    /// The serializer registry already holds the maximum number of entries
    #[error("Serializer limit of {0} reached")]
    RegistryFull(usize),

    /// A serializer or flag was referenced that has not been registered
    #[error("Unknown serializer: {0}")]
    UnknownSerializer(String),

    /// A named script resource could not be found
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// Connection-level backend failure
    #[error("Backend connection failed: {0}")]
    Connection(String),

    /// No pooled connection became available in time
    #[error("Timed out after {0:?} waiting for a pooled connection")]
    PoolTimeout(Duration),

    /// Non-transient backend failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// A value could not be serialized for storage
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// A payload could not be compressed
    #[error("Compression failed: {0}")]
    Compression(#[from] std::io::Error),
}

impl CacheError {
    /// Returns true for failures fault tolerance may degrade into empty results.
    pub fn is_connection(&self) -> bool {
        matches!(self, CacheError::Connection(_))
    }
}

impl From<BackendError> for CacheError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Connection(msg) => CacheError::Connection(msg),
            other => CacheError::Backend(other.to_string()),
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache client.
pub type Result<T> = std::result::Result<T, CacheError>;

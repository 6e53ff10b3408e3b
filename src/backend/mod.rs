//! Backend Module
//!
//! The command surface the cache consumes from its key-value store, and the
//! pool that hands out connections.
//!
//! # Implementations
//! - [`MemoryBackend`]: in-process store for tests and local development
//! - `RedisConnector`: Redis transport, behind the `redis` feature

mod memory;
mod pool;
#[cfg(feature = "redis")]
mod redis;

use async_trait::async_trait;

use crate::error::BackendResult;

pub use memory::MemoryBackend;
pub use pool::{ConnectionManager, ConnectionPool, PooledConnection};
#[cfg(feature = "redis")]
pub use self::redis::RedisConnector;

/// One SET inside a MULTI/EXEC transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Write {
    pub key: String,
    pub value: Vec<u8>,
    /// Expiration in whole seconds, None = SET without expiry
    pub expire_secs: Option<u64>,
}

// == Connection ==
/// A single backend connection.
///
/// Implementations report transport failures as
/// [`BackendError::Connection`](crate::error::BackendError::Connection).
#[async_trait]
pub trait Connection: Send {
    /// Health check run before a pooled connection is handed out again.
    async fn ping(&mut self) -> BackendResult<()>;

    async fn get(&mut self, key: &str) -> BackendResult<Option<Vec<u8>>>;

    async fn set(&mut self, key: &str, value: &[u8]) -> BackendResult<()>;

    async fn setex(&mut self, key: &str, secs: u64, value: &[u8]) -> BackendResult<()>;

    async fn mget(&mut self, keys: &[String]) -> BackendResult<Vec<Option<Vec<u8>>>>;

    /// Deletes keys, returning how many existed.
    async fn del(&mut self, keys: &[String]) -> BackendResult<u64>;

    async fn exists(&mut self, key: &str) -> BackendResult<bool>;

    /// Remaining TTL in seconds; -1 without expiry, -2 when missing.
    async fn ttl(&mut self, key: &str) -> BackendResult<i64>;

    /// Applies every write atomically (MULTI/EXEC).
    async fn transaction(&mut self, writes: &[Write]) -> BackendResult<()>;

    /// One SCAN round; a returned cursor of 0 ends the iteration.
    async fn scan(
        &mut self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> BackendResult<(u64, Vec<String>)>;

    /// Removes every key in the current database.
    async fn flushdb(&mut self, asynchronous: bool) -> BackendResult<()>;

    /// Registers a script and returns its SHA1 handle.
    async fn script_load(&mut self, source: &str) -> BackendResult<String>;

    async fn evalsha(&mut self, sha: &str, keys: &[String], args: &[String]) -> BackendResult<i64>;
}

// == Connector ==
/// Opens new connections for the pool.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> BackendResult<Box<dyn Connection>>;
}

//! Connection Pool
//!
//! Bounded deadpool pool over any [`Connector`], with a checkout timeout.

use std::sync::Arc;
use std::time::Duration;

use deadpool::managed::{self, Metrics, Object, Pool, PoolError, RecycleError, RecycleResult};
use deadpool::Runtime;

use crate::backend::{Connection, Connector};
use crate::error::{BackendError, CacheError, Result};

/// Creates pooled connections through a [`Connector`].
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
}

impl managed::Manager for ConnectionManager {
    type Type = Box<dyn Connection>;
    type Error = BackendError;

    async fn create(&self) -> std::result::Result<Box<dyn Connection>, BackendError> {
        self.connector.connect().await
    }

    // A connection that fails its ping is discarded and replaced
    async fn recycle(
        &self,
        conn: &mut Box<dyn Connection>,
        _metrics: &Metrics,
    ) -> RecycleResult<BackendError> {
        conn.ping().await.map_err(RecycleError::Backend)
    }
}

/// A checked-out connection, returned to the pool on drop.
pub type PooledConnection = Object<ConnectionManager>;

// == Connection Pool ==
/// Bounded pool shared by every clone of a cache.
#[derive(Clone)]
pub struct ConnectionPool {
    pool: Pool<ConnectionManager>,
    timeout: Duration,
}

impl ConnectionPool {
    /// Builds a pool of at most `size` connections.
    ///
    /// # Arguments
    /// * `connector` - Opens new connections on demand
    /// * `size` - Maximum number of live connections
    /// * `timeout` - How long `checkout` waits for a free connection
    pub fn new(connector: Arc<dyn Connector>, size: usize, timeout: Duration) -> Result<Self> {
        let pool = Pool::builder(ConnectionManager { connector })
            .max_size(size.max(1))
            .wait_timeout(Some(timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| CacheError::Backend(format!("failed to build pool: {}", e)))?;

        Ok(Self { pool, timeout })
    }

    // == Checkout ==
    /// Waits for a connection.
    ///
    /// Running out of time yields [`CacheError::PoolTimeout`]; failing to
    /// open a connection yields [`CacheError::Connection`].
    pub async fn checkout(&self) -> Result<PooledConnection> {
        self.pool.get().await.map_err(|err| match err {
            PoolError::Timeout(_) => CacheError::PoolTimeout(self.timeout),
            PoolError::Backend(e) => e.into(),
            other => CacheError::Backend(other.to_string()),
        })
    }

    pub fn max_size(&self) -> usize {
        self.pool.status().max_size
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.pool.status();
        f.debug_struct("ConnectionPool")
            .field("max_size", &status.max_size)
            .field("size", &status.size)
            .field("available", &status.available)
            .field("timeout", &self.timeout)
            .finish()
    }
}

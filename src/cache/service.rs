//! Cache Service
//!
//! The façade turning single and bulk reads and writes into namespaced
//! backend commands, with TTL refresh and fault tolerance.

use std::future::Future;
use std::slice;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::backend::{Connection, ConnectionPool, Connector, Write};
use crate::codec::Entity;
use crate::config::Config;
use crate::context::Context;
use crate::error::Result;
use crate::keys::{namespace_key, CacheKey};
use crate::options::Options;
use crate::scripts::{ScriptSource, Scripts};
use crate::value::Value;

/// Keys requested per SCAN round when `Options::count` is unset.
pub const DEFAULT_SCAN_COUNT: usize = 1000;

/// Longest TTL sent to the server, about 136 years. Redis rejects expire
/// times whose millisecond deadline overflows.
pub const MAX_EXPIRE_SECS: u64 = u32::MAX as u64;

/// Rounds a TTL up to whole seconds, never below one nor above
/// [`MAX_EXPIRE_SECS`].
pub fn coerce_expiration(ttl: Duration) -> u64 {
    let secs = ttl.as_secs().saturating_add(u64::from(ttl.subsec_nanos() > 0));
    secs.clamp(1, MAX_EXPIRE_SECS)
}

// == Cache ==
/// Caching client over a pooled backend.
///
/// Clones share the pool, the context and the loaded script handles.
#[derive(Debug, Clone)]
pub struct Cache {
    config: Arc<Config>,
    context: Arc<Context>,
    entity: Entity,
    pool: ConnectionPool,
    scripts: Arc<Scripts>,
}

impl Cache {
    // == Constructor ==
    /// Creates a cache with its own fresh [`Context`].
    pub fn new(connector: impl Connector, config: Config) -> Result<Self> {
        Self::with_context(Arc::new(connector), config, Arc::new(Context::new()))
    }

    /// Creates a cache sharing an existing context.
    ///
    /// # Arguments
    /// * `connector` - Opens backend connections for the pool
    /// * `config` - Instance defaults, merged under every call's options
    /// * `context` - Serializer registry and fault-tolerance toggle
    pub fn with_context(
        connector: Arc<dyn Connector>,
        config: Config,
        context: Arc<Context>,
    ) -> Result<Self> {
        let pool = ConnectionPool::new(connector, config.pool_size, config.pool_timeout)?;
        let entity = Entity::new(
            context.serializers().clone(),
            config.serializer.clone(),
            config.compress,
            config.compression_threshold,
        );

        Ok(Self {
            config: Arc::new(config),
            context,
            entity,
            pool,
            scripts: Arc::new(Scripts::default()),
        })
    }

    /// Replaces where server-side scripts are read from.
    pub fn with_script_source(mut self, source: Arc<dyn ScriptSource>) -> Self {
        self.scripts = Arc::new(Scripts::new(source));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    // == Read ==
    /// Reads a single value, refreshing its TTL first when enabled.
    ///
    /// Returns `None` for a missing key.
    pub async fn read<K: CacheKey + ?Sized>(
        &self,
        key: &K,
        options: &Options,
    ) -> Result<Option<Value>> {
        let options = options.merged(&self.config);
        let namespaced = namespace_key(key, options.namespace_ref());

        self.invoke("read", &namespaced, async {
            let mut conn = self.pool.checkout().await?;
            self.refresh(&mut **conn, slice::from_ref(&namespaced), &options)
                .await?;

            let raw = conn.get(&namespaced).await?;
            Ok(raw
                .map(|bytes| self.entity.load(&bytes))
                .filter(|value| !value.is_nil()))
        })
        .await
    }

    // == Write ==
    /// Writes a value, with SETEX when an expiration applies.
    pub async fn write<K: CacheKey + ?Sized>(
        &self,
        key: &K,
        value: &Value,
        options: &Options,
    ) -> Result<()> {
        let options = options.merged(&self.config);
        let namespaced = namespace_key(key, options.namespace_ref());
        let dumped = self.entity.dump(value, &options)?;

        self.invoke("write", &namespaced, async {
            let mut conn = self.pool.checkout().await?;
            match options.expires_in {
                Some(ttl) => conn.setex(&namespaced, coerce_expiration(ttl), &dumped).await?,
                None => conn.set(&namespaced, &dumped).await?,
            }
            Ok(())
        })
        .await
    }

    // == Fetch ==
    /// Reads a value, generating and writing it on a miss.
    ///
    /// The generator receives the expanded key without its namespace. With
    /// `force` set the read is skipped entirely.
    pub async fn fetch<K, F, Fut>(
        &self,
        key: &K,
        options: &Options,
        generate: F,
    ) -> Result<Option<Value>>
    where
        K: CacheKey + ?Sized,
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Value>,
    {
        if !options.force.unwrap_or(false) {
            if let Some(value) = self.read(key, options).await? {
                return Ok(Some(value));
            }
        }

        let value = generate(key.cache_key()).await;
        self.write(key, &value, options).await?;

        Ok(Some(value).filter(|v| !v.is_nil()))
    }

    // == Read Multi ==
    /// Reads many keys with a single MGET.
    ///
    /// Results are keyed by expanded key in request order. Misses are
    /// dropped unless `retain_nils` is set, in which case they appear as
    /// `Value::Nil`.
    pub async fn read_multi<K: CacheKey>(
        &self,
        keys: &[K],
        options: &Options,
    ) -> Result<IndexMap<String, Value>> {
        if keys.is_empty() {
            return Ok(IndexMap::new());
        }

        let options = options.merged(&self.config);
        let expanded: Vec<String> = keys.iter().map(|key| key.cache_key()).collect();
        let mapping: Vec<String> = keys
            .iter()
            .map(|key| namespace_key(key, options.namespace_ref()))
            .collect();
        let label = mapping.join(",");

        self.invoke("read_multi", &label, async {
            let mut conn = self.pool.checkout().await?;
            let raw = conn.mget(&mapping).await?;
            self.refresh(&mut **conn, &mapping, &options).await?;

            let retain_nils = options.retain_nils.unwrap_or(false);
            Ok(expanded
                .into_iter()
                .zip(raw)
                .filter_map(|(key, bytes)| {
                    let value = bytes
                        .map(|bytes| self.entity.load(&bytes))
                        .unwrap_or_default();
                    (retain_nils || !value.is_nil()).then_some((key, value))
                })
                .collect())
        })
        .await
    }

    // == Write Multi ==
    /// Writes every pair inside one MULTI/EXEC transaction.
    pub async fn write_multi<K, I>(&self, entries: I, options: &Options) -> Result<()>
    where
        K: CacheKey,
        I: IntoIterator<Item = (K, Value)>,
    {
        let options = options.merged(&self.config);
        let expire_secs = options.expires_in.map(coerce_expiration);

        let writes = entries
            .into_iter()
            .map(|(key, value)| {
                Ok(Write {
                    key: namespace_key(&key, options.namespace_ref()),
                    value: self.entity.dump(&value, &options)?,
                    expire_secs,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if writes.is_empty() {
            return Ok(());
        }

        let label = writes
            .iter()
            .map(|w| w.key.as_str())
            .collect::<Vec<_>>()
            .join(",");

        self.invoke("write_multi", &label, async {
            let mut conn = self.pool.checkout().await?;
            conn.transaction(&writes).await?;
            Ok(())
        })
        .await
    }

    // == Fetch Multi ==
    /// Reads many keys, generating every miss and writing exactly the
    /// generated values back in one transaction.
    ///
    /// Not atomic: a concurrent writer may be overwritten.
    pub async fn fetch_multi<K, F, Fut>(
        &self,
        keys: &[K],
        options: &Options,
        mut generate: F,
    ) -> Result<IndexMap<String, Value>>
    where
        K: CacheKey,
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Value>,
    {
        let retain_nils = options.retain_nils.unwrap_or(self.config.retain_nils);
        let found = self
            .read_multi(keys, &options.clone().retain_nils(true))
            .await?;

        let mut results = IndexMap::with_capacity(keys.len());
        let mut missing = Vec::new();

        for key in keys {
            let expanded = key.cache_key();
            if results.contains_key(&expanded) {
                continue;
            }

            let value = match found.get(&expanded).filter(|v| !v.is_nil()) {
                Some(value) => value.clone(),
                None => {
                    let value = generate(expanded.clone()).await;
                    missing.push((expanded.clone(), value.clone()));
                    value
                }
            };
            results.insert(expanded, value);
        }

        if !missing.is_empty() {
            self.write_multi(missing, options).await?;
        }

        if !retain_nils {
            results.retain(|_, value| !value.is_nil());
        }
        Ok(results)
    }

    // == Increment / Decrement ==
    /// Adds `amount` to a stored integer and returns the new value.
    ///
    /// Missing or non-numeric values count as 0. Not atomic.
    pub async fn increment<K: CacheKey + ?Sized>(
        &self,
        key: &K,
        amount: i64,
        options: &Options,
    ) -> Result<i64> {
        self.alter("increment", key, amount, options).await
    }

    /// Subtracts `amount` from a stored integer and returns the new value.
    pub async fn decrement<K: CacheKey + ?Sized>(
        &self,
        key: &K,
        amount: i64,
        options: &Options,
    ) -> Result<i64> {
        self.alter("decrement", key, amount.saturating_neg(), options)
            .await
    }

    async fn alter<K: CacheKey + ?Sized>(
        &self,
        operation: &'static str,
        key: &K,
        amount: i64,
        options: &Options,
    ) -> Result<i64> {
        let options = options.merged(&self.config);
        let namespaced = namespace_key(key, options.namespace_ref());

        self.invoke(operation, &namespaced, async {
            let mut conn = self.pool.checkout().await?;

            let current = conn
                .get(&namespaced)
                .await?
                .map(|bytes| self.entity.load(&bytes))
                .unwrap_or_default();
            let changed = current.to_i64_lossy().saturating_add(amount);
            let dumped = self.entity.dump(&Value::Int(changed), &options)?;

            // An explicit TTL wins, otherwise the remaining one is kept
            let expiration = match options.expires_in {
                Some(ttl) => Some(coerce_expiration(ttl)),
                None => {
                    let remaining = conn.ttl(&namespaced).await?;
                    (remaining > 0).then_some(remaining as u64)
                }
            };

            match expiration {
                Some(secs) => conn.setex(&namespaced, secs, &dumped).await?,
                None => conn.set(&namespaced, &dumped).await?,
            }
            Ok(changed)
        })
        .await
    }

    // == Delete ==
    /// Deletes a key, returning whether it existed.
    pub async fn delete<K: CacheKey + ?Sized>(&self, key: &K, options: &Options) -> Result<bool> {
        let options = options.merged(&self.config);
        let namespaced = namespace_key(key, options.namespace_ref());

        self.invoke("delete", &namespaced, async {
            let mut conn = self.pool.checkout().await?;
            Ok(conn.del(slice::from_ref(&namespaced)).await? > 0)
        })
        .await
    }

    /// Deletes every key matching a glob pattern, returning how many went.
    ///
    /// Iterates with SCAN in batches of `count`, so large keyspaces are
    /// never blocked by a single command.
    pub async fn delete_matched(&self, pattern: &str, options: &Options) -> Result<u64> {
        let options = options.merged(&self.config);
        let namespaced = namespace_key(pattern, options.namespace_ref());
        let count = options.count.unwrap_or(DEFAULT_SCAN_COUNT);

        self.invoke("delete_matched", &namespaced, async {
            let mut conn = self.pool.checkout().await?;
            let mut cursor = 0;
            let mut deleted = 0;

            loop {
                let (next, matched) = conn.scan(cursor, &namespaced, count).await?;
                if !matched.is_empty() {
                    deleted += conn.del(&matched).await?;
                }
                cursor = next;
                if cursor == 0 {
                    break;
                }
            }
            Ok(deleted)
        })
        .await
    }

    // == Exists ==
    pub async fn exists<K: CacheKey + ?Sized>(&self, key: &K, options: &Options) -> Result<bool> {
        let options = options.merged(&self.config);
        let namespaced = namespace_key(key, options.namespace_ref());

        self.invoke("exists", &namespaced, async {
            let mut conn = self.pool.checkout().await?;
            Ok(conn.exists(&namespaced).await?)
        })
        .await
    }

    // == Clear ==
    /// Flushes the whole database, not just this cache's namespace.
    pub async fn clear(&self, options: &Options) -> Result<()> {
        let asynchronous = options.async_flush.unwrap_or(false);

        self.invoke("clear", "*", async {
            let mut conn = self.pool.checkout().await?;
            conn.flushdb(asynchronous).await?;
            Ok(())
        })
        .await
    }

    // == Internals ==
    /// Runs one operation, degrading connection failures to the empty
    /// result when the context is fault tolerant.
    async fn invoke<T, F>(&self, operation: &'static str, key: &str, op: F) -> Result<T>
    where
        T: Default,
        F: Future<Output = Result<T>>,
    {
        debug!(operation, key, "Cache operation");

        match op.await {
            Err(err) if err.is_connection() && self.context.is_fault_tolerant() => {
                warn!(operation, key, error = %err, "Backend unavailable, returning empty result");
                Ok(T::default())
            }
            result => result,
        }
    }

    async fn refresh(
        &self,
        conn: &mut dyn Connection,
        keys: &[String],
        options: &Options,
    ) -> Result<()> {
        let (Some(true), Some(ttl)) = (options.refresh, options.expires_in) else {
            return Ok(());
        };

        let args = [coerce_expiration(ttl).to_string()];
        self.scripts.run("mexpire", conn, keys, &args).await?;
        Ok(())
    }
}

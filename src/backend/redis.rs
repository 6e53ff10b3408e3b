//! Redis Backend
//!
//! Transport over `redis-rs` managed connections, which reconnect on their
//! own after the socket drops.

use async_trait::async_trait;
use redis::aio::ConnectionManager as RedisManager;
use redis::{Client, ErrorKind, RedisError};

use crate::backend::{Connection, Connector, Write};
use crate::error::{BackendError, BackendResult};

fn classify(err: RedisError) -> BackendError {
    if err.kind() == ErrorKind::IoError
        || err.is_io_error()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_timeout()
    {
        BackendError::Connection(err.to_string())
    } else if err.kind() == ErrorKind::NoScriptError {
        BackendError::NoScript(err.to_string())
    } else {
        BackendError::Command(err.to_string())
    }
}

/// Opens managed connections to a Redis server.
#[derive(Debug, Clone)]
pub struct RedisConnector {
    client: Client,
}

impl RedisConnector {
    /// # Arguments
    /// * `url` - Server address, e.g. `redis://127.0.0.1:6379/0`
    pub fn new(url: &str) -> BackendResult<Self> {
        let client = Client::open(url).map_err(classify)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Connector for RedisConnector {
    async fn connect(&self) -> BackendResult<Box<dyn Connection>> {
        let conn = RedisManager::new(self.client.clone())
            .await
            .map_err(classify)?;
        Ok(Box::new(RedisConnection { conn }))
    }
}

pub struct RedisConnection {
    conn: RedisManager,
}

#[async_trait]
impl Connection for RedisConnection {
    async fn ping(&mut self) -> BackendResult<()> {
        redis::cmd("PING")
            .query_async::<String>(&mut self.conn)
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn get(&mut self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.conn)
            .await
            .map_err(classify)
    }

    async fn set(&mut self, key: &str, value: &[u8]) -> BackendResult<()> {
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut self.conn)
            .await
            .map_err(classify)
    }

    async fn setex(&mut self, key: &str, secs: u64, value: &[u8]) -> BackendResult<()> {
        redis::cmd("SETEX")
            .arg(key)
            .arg(secs)
            .arg(value)
            .query_async(&mut self.conn)
            .await
            .map_err(classify)
    }

    async fn mget(&mut self, keys: &[String]) -> BackendResult<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut self.conn)
            .await
            .map_err(classify)
    }

    async fn del(&mut self, keys: &[String]) -> BackendResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        redis::cmd("DEL")
            .arg(keys)
            .query_async(&mut self.conn)
            .await
            .map_err(classify)
    }

    async fn exists(&mut self, key: &str) -> BackendResult<bool> {
        redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut self.conn)
            .await
            .map_err(classify)
    }

    async fn ttl(&mut self, key: &str) -> BackendResult<i64> {
        redis::cmd("TTL")
            .arg(key)
            .query_async(&mut self.conn)
            .await
            .map_err(classify)
    }

    async fn transaction(&mut self, writes: &[Write]) -> BackendResult<()> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for write in writes {
            match write.expire_secs {
                Some(secs) => pipe
                    .cmd("SETEX")
                    .arg(&write.key)
                    .arg(secs)
                    .arg(&write.value[..])
                    .ignore(),
                None => pipe.cmd("SET").arg(&write.key).arg(&write.value[..]).ignore(),
            };
        }
        pipe.query_async(&mut self.conn).await.map_err(classify)
    }

    async fn scan(
        &mut self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> BackendResult<(u64, Vec<String>)> {
        redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut self.conn)
            .await
            .map_err(classify)
    }

    async fn flushdb(&mut self, asynchronous: bool) -> BackendResult<()> {
        let mut cmd = redis::cmd("FLUSHDB");
        if asynchronous {
            cmd.arg("ASYNC");
        }
        cmd.query_async(&mut self.conn).await.map_err(classify)
    }

    async fn script_load(&mut self, source: &str) -> BackendResult<String> {
        redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(source)
            .query_async(&mut self.conn)
            .await
            .map_err(classify)
    }

    async fn evalsha(&mut self, sha: &str, keys: &[String], args: &[String]) -> BackendResult<i64> {
        redis::cmd("EVALSHA")
            .arg(sha)
            .arg(keys.len())
            .arg(keys)
            .arg(args)
            .query_async(&mut self.conn)
            .await
            .map_err(classify)
    }
}

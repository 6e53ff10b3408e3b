//! In-Memory Backend
//!
//! Emulates the consumed Redis command surface inside the process. Clones
//! share the same keyspace, so a test can keep a handle for inspection while
//! the cache owns another.
//!
//! Scripts are registered by SHA1 like Redis does, but only the scripts
//! bundled with this crate can be executed; they run as native code.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha1::{Digest, Sha1};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::backend::{Connection, Connector, Write};
use crate::error::{BackendError, BackendResult};
use crate::scripts::{BundledScripts, ScriptSource};

#[derive(Debug, Clone)]
struct StoredValue {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NativeScript {
    Mexpire,
}

impl NativeScript {
    fn for_source(source: &str) -> Option<Self> {
        let bundled = BundledScripts;
        match bundled.source("mexpire") {
            Some(mexpire) if mexpire.trim() == source.trim() => Some(NativeScript::Mexpire),
            _ => None,
        }
    }
}

/// Abandoned SCAN cursors kept before the oldest are forgotten.
const MAX_SCAN_CURSORS: usize = 1024;

/// Deadline `secs` from now, or None when it lies beyond what `Instant` holds.
fn deadline(secs: u64) -> Option<Instant> {
    Instant::now().checked_add(Duration::from_secs(secs))
}

#[derive(Debug, Default)]
struct MemoryState {
    // BTreeMap keeps SCAN order stable
    data: BTreeMap<String, StoredValue>,
    scripts: HashMap<String, String>,
    scan_cursors: BTreeMap<u64, String>,
    next_cursor: u64,
}

impl MemoryState {
    fn live(&mut self, key: &str) -> Option<&StoredValue> {
        let now = Instant::now();
        if self.data.get(key).is_some_and(|v| v.is_expired(now)) {
            self.data.remove(key);
        }
        self.data.get(key)
    }

    fn put(&mut self, key: &str, value: &[u8], expire_secs: Option<u64>) {
        let expires_at = expire_secs.and_then(deadline);
        self.data.insert(
            key.to_string(),
            StoredValue {
                value: value.to_vec(),
                expires_at,
            },
        );
    }

    fn expire(&mut self, key: &str, secs: i64) -> i64 {
        if self.live(key).is_none() {
            return 0;
        }
        if secs <= 0 {
            self.data.remove(key);
        } else if let Some(stored) = self.data.get_mut(key) {
            stored.expires_at = deadline(secs as u64);
        }
        1
    }

    fn remember_cursor(&mut self, last: String) -> u64 {
        while self.scan_cursors.len() >= MAX_SCAN_CURSORS {
            self.scan_cursors.pop_first();
        }
        self.next_cursor += 1;
        self.scan_cursors.insert(self.next_cursor, last);
        self.next_cursor
    }

    fn run_native(&mut self, script: NativeScript, keys: &[String], args: &[String]) -> BackendResult<i64> {
        match script {
            NativeScript::Mexpire => {
                let secs: i64 = args
                    .first()
                    .and_then(|a| a.parse().ok())
                    .ok_or_else(|| BackendError::Command("mexpire expects an integer TTL".to_string()))?;
                Ok(keys.iter().map(|key| self.expire(key, secs)).sum())
            }
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<MemoryState>,
    offline: AtomicBool,
    generation: AtomicU64,
}

// == Memory Backend ==
/// In-process backend implementing [`Connector`].
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an outage: connects and commands fail with a connection error.
    pub fn set_offline(&self, offline: bool) {
        self.shared.offline.store(offline, Ordering::SeqCst);
    }

    /// Simulates a server restart or dropped sockets: every connection
    /// opened so far fails from now on, while new connects succeed.
    pub fn drop_connections(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Forgets every registered script, like `SCRIPT FLUSH`.
    pub async fn flush_scripts(&self) {
        self.shared.state.lock().await.scripts.clear();
    }

    /// Remaining TTL in seconds, with Redis' -1/-2 conventions.
    pub async fn ttl(&self, key: &str) -> i64 {
        ttl_of(&mut *self.shared.state.lock().await, key)
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let mut state = self.shared.state.lock().await;
        state.data.retain(|_, v| !v.is_expired(now));
        state.data.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Raw stored bytes, bypassing the entity codec.
    pub async fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.shared.state.lock().await.live(key).map(|v| v.value.clone())
    }

    fn check_online(&self) -> BackendResult<()> {
        if self.shared.offline.load(Ordering::SeqCst) {
            Err(BackendError::Connection("memory backend is offline".to_string()))
        } else {
            Ok(())
        }
    }
}

fn ttl_of(state: &mut MemoryState, key: &str) -> i64 {
    match state.live(key) {
        None => -2,
        Some(StoredValue { expires_at: None, .. }) => -1,
        Some(StoredValue {
            expires_at: Some(at), ..
        }) => {
            let remaining = at.saturating_duration_since(Instant::now()).as_millis() as i64;
            (remaining + 500) / 1000
        }
    }
}

#[async_trait]
impl Connector for MemoryBackend {
    async fn connect(&self) -> BackendResult<Box<dyn Connection>> {
        self.check_online()?;
        Ok(Box::new(MemoryConnection {
            backend: self.clone(),
            generation: self.shared.generation.load(Ordering::SeqCst),
        }))
    }
}

/// Connection handle onto a [`MemoryBackend`].
#[derive(Debug)]
pub struct MemoryConnection {
    backend: MemoryBackend,
    generation: u64,
}

impl MemoryConnection {
    async fn state(&self) -> BackendResult<tokio::sync::MutexGuard<'_, MemoryState>> {
        self.backend.check_online()?;
        if self.generation != self.backend.shared.generation.load(Ordering::SeqCst) {
            return Err(BackendError::Connection("connection reset by peer".to_string()));
        }
        Ok(self.backend.shared.state.lock().await)
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn ping(&mut self) -> BackendResult<()> {
        self.state().await.map(|_| ())
    }

    async fn get(&mut self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        let mut state = self.state().await?;
        Ok(state.live(key).map(|v| v.value.clone()))
    }

    async fn set(&mut self, key: &str, value: &[u8]) -> BackendResult<()> {
        self.state().await?.put(key, value, None);
        Ok(())
    }

    async fn setex(&mut self, key: &str, secs: u64, value: &[u8]) -> BackendResult<()> {
        if secs == 0 {
            return Err(BackendError::Command("invalid expire time in 'setex' command".to_string()));
        }
        self.state().await?.put(key, value, Some(secs));
        Ok(())
    }

    async fn mget(&mut self, keys: &[String]) -> BackendResult<Vec<Option<Vec<u8>>>> {
        let mut state = self.state().await?;
        Ok(keys
            .iter()
            .map(|key| state.live(key).map(|v| v.value.clone()))
            .collect())
    }

    async fn del(&mut self, keys: &[String]) -> BackendResult<u64> {
        let mut state = self.state().await?;
        let mut removed = 0;
        for key in keys {
            if state.live(key).is_some() {
                state.data.remove(key);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn exists(&mut self, key: &str) -> BackendResult<bool> {
        Ok(self.state().await?.live(key).is_some())
    }

    async fn ttl(&mut self, key: &str) -> BackendResult<i64> {
        Ok(ttl_of(&mut *self.state().await?, key))
    }

    async fn transaction(&mut self, writes: &[Write]) -> BackendResult<()> {
        if writes.iter().any(|w| w.expire_secs == Some(0)) {
            return Err(BackendError::Command("invalid expire time in transaction".to_string()));
        }
        // The state lock is held across every write, so they land together
        let mut state = self.state().await?;
        for write in writes {
            state.put(&write.key, &write.value, write.expire_secs);
        }
        Ok(())
    }

    async fn scan(
        &mut self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> BackendResult<(u64, Vec<String>)> {
        let mut state = self.state().await?;
        let now = Instant::now();

        let after = if cursor == 0 {
            None
        } else {
            match state.scan_cursors.remove(&cursor) {
                Some(last) => Some(last),
                None => return Ok((0, Vec::new())),
            }
        };

        let count = count.max(1);
        // One extra key tells whether another round is needed
        let mut examined: Vec<(String, bool)> = state
            .data
            .iter()
            .filter(|(key, _)| after.as_ref().map_or(true, |last| key.as_str() > last.as_str()))
            .take(count + 1)
            .map(|(key, value)| (key.clone(), value.is_expired(now)))
            .collect();
        let exhausted = examined.len() <= count;
        examined.truncate(count);

        let next = match examined.last() {
            Some((last, _)) if !exhausted => {
                let last = last.clone();
                state.remember_cursor(last)
            }
            _ => 0,
        };

        let matched = examined
            .into_iter()
            .filter(|(key, expired)| !expired && glob_match(pattern.as_bytes(), key.as_bytes()))
            .map(|(key, _)| key)
            .collect();

        Ok((next, matched))
    }

    async fn flushdb(&mut self, _asynchronous: bool) -> BackendResult<()> {
        let mut state = self.state().await?;
        state.data.clear();
        state.scan_cursors.clear();
        Ok(())
    }

    async fn script_load(&mut self, source: &str) -> BackendResult<String> {
        let sha = format!("{:x}", Sha1::digest(source.as_bytes()));
        self.state()
            .await?
            .scripts
            .insert(sha.clone(), source.to_string());
        Ok(sha)
    }

    async fn evalsha(&mut self, sha: &str, keys: &[String], args: &[String]) -> BackendResult<i64> {
        let mut state = self.state().await?;
        let source = state
            .scripts
            .get(sha)
            .cloned()
            .ok_or_else(|| BackendError::NoScript(sha.to_string()))?;
        let script = NativeScript::for_source(&source).ok_or_else(|| {
            BackendError::Command("memory backend only runs bundled scripts".to_string())
        })?;
        state.run_native(script, keys, args)
    }
}

// == Glob Matching ==
/// Redis-style glob: `*`, `?`, `[abc]`, `[^a]`, `[a-z]` and `\` escapes.
pub(crate) fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => (0..=text.len()).any(|skip| glob_match(rest, &text[skip..])),
        Some((b'?', rest)) => !text.is_empty() && glob_match(rest, &text[1..]),
        Some((b'[', rest)) => {
            let Some((&ch, text_rest)) = text.split_first() else {
                return false;
            };
            let (negate, mut class) = match rest.split_first() {
                Some((b'^', tail)) => (true, tail),
                _ => (false, rest),
            };
            let mut matched = false;
            loop {
                match class {
                    [] => break,
                    [b']', tail @ ..] => {
                        class = tail;
                        break;
                    }
                    [b'\\', escaped, tail @ ..] => {
                        matched |= *escaped == ch;
                        class = tail;
                    }
                    [lo, b'-', hi, tail @ ..] if *hi != b']' => {
                        let (lo, hi) = if lo <= hi { (*lo, *hi) } else { (*hi, *lo) };
                        matched |= lo <= ch && ch <= hi;
                        class = tail;
                    }
                    [c, tail @ ..] => {
                        matched |= *c == ch;
                        class = tail;
                    }
                }
            }
            matched != negate && glob_match(class, text_rest)
        }
        Some((b'\\', rest)) if !rest.is_empty() => {
            text.first() == rest.first() && glob_match(&rest[1..], &text[1..])
        }
        Some((c, rest)) => text.first() == Some(c) && glob_match(rest, &text[1..]),
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    async fn connection(backend: &MemoryBackend) -> Box<dyn Connection> {
        backend.connect().await.unwrap()
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match(b"*cat", b"bobcat"));
        assert!(glob_match(b"tomcat", b"tomcat"));
        assert!(!glob_match(b"tomcat", b"wildcat"));
        assert!(glob_match(b"h?llo", b"hallo"));
        assert!(glob_match(b"h[ae]llo", b"hello"));
        assert!(!glob_match(b"h[ae]llo", b"hillo"));
        assert!(glob_match(b"h[^e]llo", b"hallo"));
        assert!(!glob_match(b"h[^e]llo", b"hello"));
        assert!(glob_match(b"h[a-b]llo", b"hbllo"));
        assert!(glob_match(b"feral:tom*", b"feral:tomcat"));
        assert!(glob_match(b"a\\*b", b"a*b"));
        assert!(!glob_match(b"a\\*b", b"axb"));
    }

    #[tokio::test]
    async fn test_set_get_del() {
        let backend = MemoryBackend::new();
        let mut conn = connection(&backend).await;

        conn.set("a", b"1").await.unwrap();
        assert_eq!(conn.get("a").await.unwrap(), Some(b"1".to_vec()));
        assert!(conn.exists("a").await.unwrap());

        assert_eq!(conn.del(&["a".to_string(), "b".to_string()]).await.unwrap(), 1);
        assert_eq!(conn.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_setex_and_ttl() {
        let backend = MemoryBackend::new();
        let mut conn = connection(&backend).await;

        conn.setex("a", 10, b"1").await.unwrap();
        conn.set("b", b"2").await.unwrap();

        assert_eq!(conn.ttl("a").await.unwrap(), 10);
        assert_eq!(conn.ttl("b").await.unwrap(), -1);
        assert_eq!(conn.ttl("c").await.unwrap(), -2);
        assert!(conn.setex("a", 0, b"1").await.is_err());
    }

    #[tokio::test]
    async fn test_scan_visits_every_key_once() {
        let backend = MemoryBackend::new();
        let mut conn = connection(&backend).await;
        for i in 0..10 {
            conn.set(&format!("key{}", i), b"v").await.unwrap();
        }

        let mut cursor = 0;
        let mut seen = Vec::new();
        loop {
            let (next, keys) = conn.scan(cursor, "key*", 3).await.unwrap();
            // Deleting during iteration must not skip keys
            conn.del(&keys).await.unwrap();
            seen.extend(keys);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        assert_eq!(seen.len(), 10);
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn test_scripts_register_by_sha() {
        let backend = MemoryBackend::new();
        let mut conn = connection(&backend).await;
        let source = BundledScripts.source("mexpire").unwrap();

        let sha = conn.script_load(&source).await.unwrap();
        assert_eq!(sha.len(), 40);

        conn.set("a", b"1").await.unwrap();
        let touched = conn
            .evalsha(&sha, &["a".to_string(), "missing".to_string()], &["5".to_string()])
            .await
            .unwrap();
        assert_eq!(touched, 1);
        assert_eq!(backend.ttl("a").await, 5);

        backend.flush_scripts().await;
        let result = conn.evalsha(&sha, &[], &["5".to_string()]).await;
        assert!(matches!(result, Err(BackendError::NoScript(_))));
    }

    #[tokio::test]
    async fn test_unknown_script_source_is_rejected() {
        let backend = MemoryBackend::new();
        let mut conn = connection(&backend).await;

        let sha = conn.script_load("return 1").await.unwrap();
        let result = conn.evalsha(&sha, &[], &[]).await;
        assert!(matches!(result, Err(BackendError::Command(_))));
    }

    #[tokio::test]
    async fn test_offline_fails_with_connection_error() {
        let backend = MemoryBackend::new();
        let mut conn = connection(&backend).await;

        backend.set_offline(true);
        assert!(matches!(
            conn.get("a").await,
            Err(BackendError::Connection(_))
        ));
        assert!(backend.connect().await.is_err());

        backend.set_offline(false);
        assert!(conn.get("a").await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_connection_stays_broken() {
        let backend = MemoryBackend::new();
        let mut stale = connection(&backend).await;
        stale.set("a", b"1").await.unwrap();

        backend.drop_connections();
        assert!(matches!(stale.ping().await, Err(BackendError::Connection(_))));
        assert!(matches!(stale.get("a").await, Err(BackendError::Connection(_))));

        let mut fresh = connection(&backend).await;
        assert!(fresh.ping().await.is_ok());
        assert_eq!(fresh.get("a").await.unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn test_abandoned_scan_cursors_are_bounded() {
        let backend = MemoryBackend::new();
        let mut conn = connection(&backend).await;
        for i in 0..5 {
            conn.set(&format!("key{}", i), b"v").await.unwrap();
        }

        let mut first = 0;
        for i in 0..MAX_SCAN_CURSORS * 2 {
            let (next, _) = conn.scan(0, "*", 1).await.unwrap();
            assert_ne!(next, 0);
            if i == 0 {
                first = next;
            }
        }

        assert!(backend.shared.state.lock().await.scan_cursors.len() <= MAX_SCAN_CURSORS);
        // The oldest cursor was forgotten and ends its iteration
        assert_eq!(conn.scan(first, "*", 1).await.unwrap(), (0, Vec::new()));
    }

    #[tokio::test]
    async fn test_unbounded_expiry_never_expires() {
        let backend = MemoryBackend::new();
        let mut conn = connection(&backend).await;

        conn.setex("a", u64::MAX, b"1").await.unwrap();
        assert_eq!(conn.get("a").await.unwrap(), Some(b"1".to_vec()));

        let source = BundledScripts.source("mexpire").unwrap();
        let sha = conn.script_load(&source).await.unwrap();
        let touched = conn
            .evalsha(&sha, &["a".to_string()], &[i64::MAX.to_string()])
            .await
            .unwrap();
        assert_eq!(touched, 1);
        assert!(conn.exists("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_transaction_writes_all() {
        let backend = MemoryBackend::new();
        let mut conn = connection(&backend).await;

        let writes = vec![
            Write {
                key: "a".to_string(),
                value: b"1".to_vec(),
                expire_secs: None,
            },
            Write {
                key: "b".to_string(),
                value: b"2".to_vec(),
                expire_secs: Some(1),
            },
        ];
        conn.transaction(&writes).await.unwrap();

        assert_eq!(backend.raw("a").await, Some(b"1".to_vec()));
        assert_eq!(backend.ttl("b").await, 1);
    }
}

//! Script Loader
//!
//! Runs named server-side Lua scripts. The first run of a script registers
//! it with SCRIPT LOAD, and later runs refer to it by the returned SHA. Each
//! loader tracks its own handles.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::backend::Connection;
use crate::error::{BackendError, CacheError, Result};

/// Resolves a script name to its source text.
pub trait ScriptSource: Send + Sync + Debug {
    fn source(&self, name: &str) -> Option<Cow<'static, str>>;
}

/// Scripts compiled into the crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct BundledScripts;

impl ScriptSource for BundledScripts {
    fn source(&self, name: &str) -> Option<Cow<'static, str>> {
        match name {
            "mexpire" => Some(Cow::Borrowed(include_str!("../scripts/mexpire.lua"))),
            _ => None,
        }
    }
}

/// Scripts read from `<dir>/<name>.lua` on first use.
#[derive(Debug, Clone)]
pub struct DirectoryScripts {
    dir: PathBuf,
}

impl DirectoryScripts {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ScriptSource for DirectoryScripts {
    fn source(&self, name: &str) -> Option<Cow<'static, str>> {
        if name.contains(['/', '\\']) {
            return None;
        }
        std::fs::read_to_string(self.dir.join(format!("{}.lua", name)))
            .ok()
            .map(Cow::Owned)
    }
}

// == Scripts ==
#[derive(Debug)]
pub struct Scripts {
    source: Arc<dyn ScriptSource>,
    loaded: Mutex<HashMap<String, String>>,
}

impl Default for Scripts {
    fn default() -> Self {
        Self::new(Arc::new(BundledScripts))
    }
}

impl Scripts {
    pub fn new(source: Arc<dyn ScriptSource>) -> Self {
        Self {
            source,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Runs a script by name, loading it on first use.
    ///
    /// If the server no longer knows the cached handle, the script is loaded
    /// again and the call retried once.
    ///
    /// # Arguments
    /// * `name` - Script name, without the `.lua` extension
    /// * `conn` - Connection used both to load and to evaluate
    /// * `keys` - Passed as KEYS
    /// * `args` - Passed as ARGV
    pub async fn run(
        &self,
        name: &str,
        conn: &mut dyn Connection,
        keys: &[String],
        args: &[String],
    ) -> Result<i64> {
        let sha = self.sha(name, conn).await?;

        match conn.evalsha(&sha, keys, args).await {
            Err(BackendError::NoScript(_)) => {
                debug!(script = name, "Script handle unknown to server, reloading");
                self.loaded.lock().remove(name);
                let sha = self.sha(name, conn).await?;
                Ok(conn.evalsha(&sha, keys, args).await?)
            }
            result => Ok(result?),
        }
    }

    /// Whether this loader holds a handle for `name`.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.lock().contains_key(name)
    }

    async fn sha(&self, name: &str, conn: &mut dyn Connection) -> Result<String> {
        let cached = self.loaded.lock().get(name).cloned();
        if let Some(sha) = cached {
            return Ok(sha);
        }

        let source = self
            .source
            .source(name)
            .ok_or_else(|| CacheError::UnknownCommand(name.to_string()))?;
        let sha = conn.script_load(&source).await?;
        info!(script = name, sha = %sha, "Loaded script");

        self.loaded.lock().insert(name.to_string(), sha.clone());
        Ok(sha)
    }
}

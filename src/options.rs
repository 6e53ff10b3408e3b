//! Per-call Options
//!
//! Overrides merged over the instance defaults held in [`Config`].

use std::time::Duration;

use crate::codec::SerializerRef;
use crate::config::Config;

// == Options ==
/// Per-call overrides. Unset fields fall back to the cache's [`Config`].
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub namespace: Option<String>,
    pub expires_in: Option<Duration>,
    pub compress: Option<bool>,
    pub compression_threshold: Option<usize>,
    pub refresh: Option<bool>,
    pub retain_nils: Option<bool>,
    pub serializer: Option<SerializerRef>,
    /// Treat `fetch` as a miss regardless of the stored value
    pub force: Option<bool>,
    /// Keys requested per SCAN round in `delete_matched`
    pub count: Option<usize>,
    /// Flush the database asynchronously in `clear`
    pub async_flush: Option<bool>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn expires_in(mut self, ttl: Duration) -> Self {
        self.expires_in = Some(ttl);
        self
    }

    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = Some(compress);
        self
    }

    pub fn compression_threshold(mut self, bytes: usize) -> Self {
        self.compression_threshold = Some(bytes);
        self
    }

    pub fn refresh(mut self, refresh: bool) -> Self {
        self.refresh = Some(refresh);
        self
    }

    pub fn retain_nils(mut self, retain: bool) -> Self {
        self.retain_nils = Some(retain);
        self
    }

    pub fn serializer(mut self, serializer: SerializerRef) -> Self {
        self.serializer = Some(serializer);
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = Some(force);
        self
    }

    pub fn count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    pub fn async_flush(mut self, async_flush: bool) -> Self {
        self.async_flush = Some(async_flush);
        self
    }

    // == Merge ==
    /// Fills every unset field from the instance defaults.
    pub(crate) fn merged(&self, config: &Config) -> Options {
        Options {
            namespace: self.namespace.clone().or_else(|| config.namespace.clone()),
            expires_in: self.expires_in.or(config.expires_in),
            compress: Some(self.compress.unwrap_or(config.compress)),
            compression_threshold: Some(
                self.compression_threshold
                    .unwrap_or(config.compression_threshold),
            ),
            refresh: Some(self.refresh.unwrap_or(config.refresh)),
            retain_nils: Some(self.retain_nils.unwrap_or(config.retain_nils)),
            serializer: Some(
                self.serializer
                    .clone()
                    .unwrap_or_else(|| config.serializer.clone()),
            ),
            force: self.force,
            count: self.count,
            async_flush: self.async_flush,
        }
    }

    pub(crate) fn namespace_ref(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
}

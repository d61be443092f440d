//! In-memory [`CacheStore`] implementations for tests and single-node use.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;

use super::CacheStore;

/// Hash-map backed cache with real TTL expiry, enforced lazily on access.
#[derive(Clone, Default)]
pub struct MemoryCacheStore {
    entries: Arc<RwLock<HashMap<String, (String, Instant)>>>,
}

impl MemoryCacheStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn setex(&self, key: &str, ttl: Duration, value: String) -> Result<()> {
        self.entries
            .write()
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.write();
        match entries.get(key) {
            Some((value, deadline)) if *deadline > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|(key, (_, deadline))| key.starts_with(prefix) && *deadline > now)
            .map(|(key, _)| key.clone())
            .collect())
    }
}

/// Cache that fails every operation; test support for the degraded path.
pub struct FailingCacheStore;

#[async_trait]
impl CacheStore for FailingCacheStore {
    async fn setex(&self, _key: &str, _ttl: Duration, _value: String) -> Result<()> {
        anyhow::bail!("cache store down")
    }

    async fn get(&self, _key: &str) -> Result<Option<String>> {
        anyhow::bail!("cache store down")
    }

    async fn del(&self, _key: &str) -> Result<()> {
        anyhow::bail!("cache store down")
    }

    async fn keys(&self, _prefix: &str) -> Result<Vec<String>> {
        anyhow::bail!("cache store down")
    }
}

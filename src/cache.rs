//! Cache-aside tier over a best-effort key/value store.
//!
//! Two key spaces share one store:
//! - `coverage:{term}`: ids of recent items mentioning the term, short TTL (the corpus moves)
//! - `source:{source_id}`: source weight + category, long TTL
//!
//! A failing or slow store never fails the caller; lookups fall back to the
//! authoritative loader and the miss is counted as degraded.

use anyhow::Result;
use async_trait::async_trait;
use metrics::counter;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::CacheConfig;

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// In-process TTL cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    inner: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut map = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory cache mutex poisoned"))?;
        match map.get(key) {
            Some((value, expires_at)) if Instant::now() < *expires_at => Ok(Some(value.clone())),
            Some(_) => {
                map.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut map = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory cache mutex poisoned"))?;
        map.insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Always misses; used when caching is switched off.
pub struct DisabledCache;

#[async_trait]
impl CacheStore for DisabledCache {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }
    async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<()> {
        Ok(())
    }
    fn name(&self) -> &'static str {
        "disabled"
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub degraded: u64,
}

pub struct CacheTier {
    store: Arc<dyn CacheStore>,
    cfg: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    degraded: AtomicU64,
}

impl CacheTier {
    pub fn new(store: Arc<dyn CacheStore>, cfg: CacheConfig) -> Self {
        let store: Arc<dyn CacheStore> = if cfg.enabled {
            store
        } else {
            Arc::new(DisabledCache)
        };
        Self {
            store,
            cfg,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            degraded: AtomicU64::new(0),
        }
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    /// Cached ids of recent items mentioning `term`, if the coverage key is warm.
    pub async fn coverage_ids(&self, term: &str) -> Option<BTreeSet<String>> {
        self.lookup(&format!("coverage:{term}")).await
    }

    /// Remember the ids mentioning `term` for the short coverage TTL.
    pub async fn put_coverage_ids(&self, term: &str, ids: &BTreeSet<String>) {
        self.fill(&format!("coverage:{term}"), ids, self.cfg.coverage_ttl())
            .await;
    }

    /// Source metadata, read-through with the long TTL.
    pub async fn source_meta<T, F, Fut>(&self, source_id: &str, load: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let key = format!("source:{source_id}");
        self.get_or_load(&key, self.cfg.source_ttl(), load).await
    }

    /// Cache-aside lookup. Only the loader's error is returned to the caller.
    pub async fn get_or_load<T, F, Fut>(&self, key: &str, ttl: Duration, load: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(v) = self.lookup(key).await {
            return Ok(v);
        }
        let value = load().await?;
        self.fill(key, &value, ttl).await;
        Ok(value)
    }

    /// Read `key`. Misses, undecodable entries and store failures all come back as `None`.
    pub async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match tokio::time::timeout(self.cfg.op_timeout(), self.store.get(key)).await {
            Ok(Ok(Some(raw))) => match serde_json::from_str::<T>(&raw) {
                Ok(v) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    counter!("cache_hits_total").increment(1);
                    return Some(v);
                }
                Err(e) => {
                    tracing::debug!(target: "cache", key, error = %e, "undecodable cache entry, reloading");
                    self.misses.fetch_add(1, Ordering::Relaxed);
                }
            },
            Ok(Ok(None)) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => self.mark_degraded("get", key, &format!("{e:#}")),
            Err(_) => self.mark_degraded("get", key, "timeout"),
        }
        counter!("cache_misses_total").increment(1);
        None
    }

    /// Best-effort write of `value` under `key`.
    pub async fn fill<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!(target: "cache", key, error = %e, "value not cacheable");
                return;
            }
        };
        match tokio::time::timeout(self.cfg.op_timeout(), self.store.set(key, raw, ttl)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.mark_degraded("set", key, &format!("{e:#}")),
            Err(_) => self.mark_degraded("set", key, "timeout"),
        }
    }

    fn mark_degraded(&self, op: &str, key: &str, reason: &str) {
        let before = self.degraded.fetch_add(1, Ordering::Relaxed);
        counter!("cache_degraded_total").increment(1);
        if before == 0 {
            tracing::warn!(target: "cache", op, key, reason, store = self.store.name(), "cache unavailable, falling back to provider");
        } else {
            tracing::debug!(target: "cache", op, key, reason, "cache unavailable");
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
        }
    }

    /// Zero the counters; called at the start of each run.
    pub fn reset_stats(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.degraded.store(0, Ordering::Relaxed);
    }
}

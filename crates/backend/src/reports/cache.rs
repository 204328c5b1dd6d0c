//! Strategy-based dataset cache: in-process map or remote key-value store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::AsyncCommands;
use shared_types::CacheMetrics;

use crate::config::{AppConfig, CacheProvider};

/// Canonical cache key: `<dataset_id>:<branch_id>:<generation_date>`.
pub fn cache_key(dataset_id: &str, branch_id: i32, generation_date: &str) -> String {
    format!("{dataset_id}:{branch_id}:{generation_date}")
}

/// Capability set shared by the cache variants. Writes for one key are
/// last-writer-wins; invalidation matches every dataset of a
/// `(branch, generation)` pair.
#[async_trait]
pub trait DatasetCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<serde_json::Value>;

    async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration);

    /// Drop every key matching `*:<branch_id>:<generation_date>`; returns how
    /// many entries went away.
    async fn invalidate_generation(&self, branch_id: i32, generation_date: &str) -> u64;

    fn metrics(&self) -> CacheMetrics;
}

/// Select the cache variant from configuration.
pub async fn build_cache(config: &AppConfig) -> anyhow::Result<Arc<dyn DatasetCache>> {
    match config.cache_provider {
        CacheProvider::Memory => Ok(Arc::new(MemoryCache::new())),
        CacheProvider::Remote => {
            let url = config
                .redis_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("REDIS_URL is required for the remote cache"))?;
            Ok(Arc::new(RedisCache::connect(&url).await?))
        }
    }
}

fn key_matches(key: &str, branch_id: i32, generation_date: &str) -> bool {
    key.ends_with(&format!(":{branch_id}:{generation_date}"))
}

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (serde_json::Value, Option<Instant>)>>,
    metrics: Mutex<CacheMetrics>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DatasetCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut entries = self.entries.lock().unwrap();
        let mut metrics = self.metrics.lock().unwrap();

        if let Some((_, Some(expires_at))) = entries.get(key) {
            if *expires_at <= Instant::now() {
                entries.remove(key);
                metrics.expirations += 1;
                tracing::debug!(key, "cache entry expired");
            }
        }

        match entries.get(key) {
            Some((value, _)) => {
                metrics.hits += 1;
                tracing::debug!(key, "cache hit");
                Some(value.clone())
            }
            None => {
                metrics.misses += 1;
                tracing::debug!(key, "cache miss");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) {
        if ttl.is_zero() {
            tracing::debug!(key, "zero ttl, write discarded");
            return;
        }
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.to_string(), (value, Some(Instant::now() + ttl)));
        self.metrics.lock().unwrap().writes += 1;
        tracing::debug!(key, ttl_secs = ttl.as_secs(), "cache write");
    }

    async fn invalidate_generation(&self, branch_id: i32, generation_date: &str) -> u64 {
        let mut entries = self.entries.lock().unwrap();
        let doomed: Vec<String> = entries
            .keys()
            .filter(|key| key_matches(key, branch_id, generation_date))
            .cloned()
            .collect();
        for key in &doomed {
            entries.remove(key);
        }
        let count = doomed.len() as u64;
        if count > 0 {
            self.metrics.lock().unwrap().invalidations += count;
            tracing::debug!(branch_id, generation_date, count, "cache invalidated");
        }
        count
    }

    fn metrics(&self) -> CacheMetrics {
        *self.metrics.lock().unwrap()
    }
}

pub struct RedisCache {
    manager: redis::aio::ConnectionManager,
    metrics: Mutex<CacheMetrics>,
}

impl RedisCache {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self {
            manager,
            metrics: Mutex::new(CacheMetrics::default()),
        })
    }
}

#[async_trait]
impl DatasetCache for RedisCache {
    async fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut conn = self.manager.clone();
        let payload: Option<String> = match conn.get(key).await {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(key, error = %error, "cache read failed");
                None
            }
        };

        match payload {
            Some(payload) => match serde_json::from_str(&payload) {
                Ok(value) => {
                    self.metrics.lock().unwrap().hits += 1;
                    tracing::debug!(key, "cache hit");
                    Some(value)
                }
                Err(_) => {
                    // Corrupt payloads behave like misses and are dropped.
                    let _: Result<u64, _> = conn.del(key).await;
                    self.metrics.lock().unwrap().misses += 1;
                    tracing::warn!(key, "corrupt cache payload discarded");
                    None
                }
            },
            None => {
                self.metrics.lock().unwrap().misses += 1;
                tracing::debug!(key, "cache miss");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) {
        if ttl.is_zero() {
            tracing::debug!(key, "zero ttl, write discarded");
            return;
        }
        let payload = match serde_json::to_string(&value) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(key, error = %error, "cache payload serialization failed");
                return;
            }
        };

        let mut conn = self.manager.clone();
        let result: Result<(), redis::RedisError> =
            conn.set_ex(key, payload, ttl.as_secs()).await;
        match result {
            Ok(()) => {
                self.metrics.lock().unwrap().writes += 1;
                tracing::debug!(key, ttl_secs = ttl.as_secs(), "cache write");
            }
            Err(error) => tracing::warn!(key, error = %error, "cache write failed"),
        }
    }

    async fn invalidate_generation(&self, branch_id: i32, generation_date: &str) -> u64 {
        let pattern = format!("*:{branch_id}:{generation_date}");
        let mut conn = self.manager.clone();

        let keys: Vec<String> = {
            let mut scan = match conn.scan_match::<_, String>(&pattern).await {
                Ok(scan) => scan,
                Err(error) => {
                    tracing::warn!(pattern, error = %error, "cache scan failed");
                    return 0;
                }
            };
            let mut keys = Vec::new();
            while let Some(key) = scan.next_item().await {
                keys.push(key);
            }
            keys
        };

        if keys.is_empty() {
            return 0;
        }

        let count = keys.len() as u64;
        let result: Result<u64, redis::RedisError> = conn.del(&keys).await;
        match result {
            Ok(_) => {
                self.metrics.lock().unwrap().invalidations += count;
                tracing::debug!(branch_id, generation_date, count, "cache invalidated");
                count
            }
            Err(error) => {
                tracing::warn!(pattern, error = %error, "cache delete failed");
                0
            }
        }
    }

    fn metrics(&self) -> CacheMetrics {
        *self.metrics.lock().unwrap()
    }
}

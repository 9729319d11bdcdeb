//! Key-value backends for the result cache.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::AsyncCommands;
use regex::Regex;
use tracing::info;

/// Minimal surface the result cache needs from a key-value store.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Round-trip to confirm the backend is reachable.
    async fn probe(&self) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, expiring after `ttl`.
    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Keys matching a glob (`*` any run, `?` one character).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Delete `keys`, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<usize>;
}

pub struct RedisCacheStore {
    manager: ConnectionManager,
}

impl RedisCacheStore {
    pub async fn connect(url: &str, timeout: Duration, response_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url)
            .with_context(|| format!("Invalid cache store url: {}", url))?;

        let config = ConnectionManagerConfig::new()
            .set_connection_timeout(timeout)
            .set_response_timeout(response_timeout);
        let manager = tokio::time::timeout(timeout, client.get_connection_manager_with_config(config))
            .await
            .with_context(|| format!("Timed out connecting to cache store after {:?}", timeout))?
            .context("Failed to connect to cache store")?;

        info!(target: "cache", url = %url, "Connected to cache store");
        Ok(Self { manager })
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn probe(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: bool = conn.exists("sluice:probe").await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        // PSETEX rejects a zero expiry
        let millis = (ttl.as_millis() as u64).max(1);
        let _: () = conn.pset_ex(key, value, millis).await?;
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        let keys: Vec<String> = conn.keys(pattern).await?;
        Ok(keys)
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.manager.clone();
        let removed: usize = conn.del(keys).await?;
        Ok(removed)
    }
}

#[derive(Debug, Clone)]
struct StoredValue {
    body: String,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, StoredValue> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process store for local runs and tests.
pub struct MemoryCacheStore {
    cache: Cache<String, StoredValue>,
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl MemoryCacheStore {
    pub fn new(max_entries: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(PerEntryTtl)
            .build();
        Self { cache }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn probe(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.cache.get(key).await.map(|v| v.body))
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.cache
            .insert(key.to_string(), StoredValue { body: value, ttl })
            .await;
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let matcher = glob_to_regex(pattern)?;
        Ok(self
            .cache
            .iter()
            .filter(|(key, _)| matcher.is_match(key))
            .map(|(key, _)| (*key).clone())
            .collect())
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        let mut removed = 0;
        for key in keys {
            if self.cache.remove(key).await.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).with_context(|| format!("Invalid key pattern: {}", pattern))
}

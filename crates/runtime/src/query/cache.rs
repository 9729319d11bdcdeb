use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use sha2::{Digest, Sha256};
use sluice_common::config::CacheSettings;
use tracing::{debug, info, warn};

use super::cache_store::{CacheStore, RedisCacheStore};
use crate::store::Row;

pub const KEY_PREFIX: &str = "query:";

/// Lowercase, collapse whitespace runs to one space, trim.
pub fn normalize_sql(sql: &str) -> String {
    sql.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Cache key for a SQL text; equal for texts differing only in case or whitespace.
pub fn cache_key(sql: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_sql(sql).as_bytes());
    format!("{}{:x}", KEY_PREFIX, hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub enabled: bool,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub errors: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    errors: AtomicU64,
}

/// TTL cache of query rows keyed by normalized SQL.
///
/// Every backend failure degrades to a miss or a no-op with a warning; no method here
/// returns an error. Each store call is bounded by the configured response timeout.
pub struct ResultCache {
    store: Option<Arc<dyn CacheStore>>,
    default_ttl: Duration,
    response_timeout: Duration,
    counters: Counters,
}

impl ResultCache {
    /// Wrap `store`, probing it once. A failed probe disables the cache for good.
    pub async fn new(settings: &CacheSettings, store: Arc<dyn CacheStore>) -> Self {
        if !settings.enabled {
            info!(target: "cache", "Result cache disabled by configuration");
            return Self::disabled();
        }

        let response_timeout = settings.response_timeout();
        if let Err(e) = bounded(response_timeout, store.probe()).await {
            warn!(
                target: "cache",
                error = %e,
                "Cache store unreachable; result caching disabled"
            );
            return Self::disabled();
        }

        info!(
            target: "cache",
            ttl_seconds = settings.default_ttl_seconds,
            "Result cache enabled"
        );
        Self {
            store: Some(store),
            default_ttl: settings.default_ttl(),
            response_timeout,
            counters: Counters::default(),
        }
    }

    /// Connect to the configured redis endpoint.
    pub async fn connect(settings: &CacheSettings) -> Self {
        if !settings.enabled {
            info!(target: "cache", "Result cache disabled by configuration");
            return Self::disabled();
        }

        let store = RedisCacheStore::connect(
            &settings.redis_url(),
            settings.connect_timeout(),
            settings.response_timeout(),
        )
        .await;
        match store {
            Ok(store) => Self::new(settings, Arc::new(store)).await,
            Err(e) => {
                warn!(
                    target: "cache",
                    host = %settings.host,
                    port = settings.port,
                    error = %e,
                    "Could not connect to cache store; result caching disabled"
                );
                Self::disabled()
            }
        }
    }

    pub fn disabled() -> Self {
        Self {
            store: None,
            default_ttl: Duration::ZERO,
            response_timeout: Duration::ZERO,
            counters: Counters::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub fn key(&self, sql: &str) -> String {
        cache_key(sql)
    }

    pub async fn get(&self, sql: &str) -> Option<Vec<Row>> {
        let store = self.store.as_ref()?;
        let key = cache_key(sql);

        let body = match bounded(self.response_timeout, store.get(&key)).await {
            Ok(Some(body)) => body,
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(target: "cache", key = %key, error = %e, "Cache read failed");
                return None;
            }
        };

        match serde_json::from_str::<Vec<Row>>(&body) {
            Ok(rows) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!(target: "cache", key = %key, rows = rows.len(), "Cache hit");
                Some(rows)
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    target: "cache",
                    key = %key,
                    error = %e,
                    "Cached entry is not a row array; treating as miss"
                );
                None
            }
        }
    }

    pub async fn set(&self, sql: &str, rows: &[Row]) {
        self.set_with_ttl(sql, rows, self.default_ttl).await
    }

    pub async fn set_with_ttl(&self, sql: &str, rows: &[Row], ttl: Duration) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let key = cache_key(sql);

        let body = match serde_json::to_string(rows) {
            Ok(body) => body,
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(target: "cache", key = %key, error = %e, "Failed to serialize rows");
                return;
            }
        };

        match bounded(self.response_timeout, store.set_ex(&key, body, ttl)).await {
            Ok(()) => {
                self.counters.writes.fetch_add(1, Ordering::Relaxed);
                debug!(
                    target: "cache",
                    key = %key,
                    rows = rows.len(),
                    ttl_ms = ttl.as_millis() as u64,
                    "Cached query result"
                );
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(target: "cache", key = %key, error = %e, "Cache write failed");
            }
        }
    }

    /// Delete entries whose key matches `query:<pattern>`; `"*"` clears every entry.
    pub async fn invalidate(&self, pattern: &str) -> usize {
        let Some(store) = self.store.as_ref() else {
            return 0;
        };
        let glob = format!("{}{}", KEY_PREFIX, pattern);

        let result = match bounded(self.response_timeout, store.keys(&glob)).await {
            Ok(keys) => bounded(self.response_timeout, store.delete(&keys)).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(removed) => {
                info!(target: "cache", pattern = %glob, removed, "Invalidated cache entries");
                removed
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(target: "cache", pattern = %glob, error = %e, "Cache invalidation failed");
                0
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            enabled: self.is_enabled(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }
}

async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = anyhow::Result<T>>,
) -> anyhow::Result<T> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| anyhow!("cache store did not respond within {:?}", limit))?
}

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use sluice_common::config::{AppConfig, CacheSettings, RetrySettings};
use sluice_runtime::pool::ConnectionPool;
use sluice_runtime::query::cache::ResultCache;
use sluice_runtime::query::cache_store::MemoryCacheStore;
use sluice_runtime::store::{Connection, ConnectionFactory, ConnectionManager, Row, StoreError};
use sluice_runtime::{EngineContext, QueryPlan, SemanticLayer, SqlRenderer};

pub fn row(id: i64, region: &str) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), json!(id));
    row.insert("region".into(), json!(region));
    row
}

/// Fake relational store: pops scripted outcomes, then answers with `rows`.
#[derive(Default)]
pub struct ScriptedStore {
    script: Mutex<VecDeque<Result<Vec<Row>, StoreError>>>,
    connect_failures: AtomicU32,
    rows: Mutex<Vec<Row>>,
    executed: Mutex<Vec<String>>,
    connects: AtomicU32,
}

impl ScriptedStore {
    pub fn returning(rows: Vec<Row>) -> Arc<Self> {
        let store = Self::default();
        *store.rows.lock() = rows;
        Arc::new(store)
    }

    pub fn push(&self, outcome: Result<Vec<Row>, StoreError>) {
        self.script.lock().push_back(outcome);
    }

    pub fn fail_next_connects(&self, count: u32) {
        self.connect_failures.store(count, Ordering::SeqCst);
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    pub fn query_count(&self) -> usize {
        self.executed.lock().len()
    }

    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    fn next(&self, sql: &str) -> Result<Vec<Row>, StoreError> {
        self.executed.lock().push(sql.to_string());
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(self.rows.lock().clone()))
    }
}

pub struct ScriptedConnection {
    store: Arc<ScriptedStore>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn query(&mut self, sql: &str) -> Result<Vec<Row>, StoreError> {
        tokio::task::yield_now().await;
        self.store.next(sql)
    }
}

pub struct ScriptedFactory(pub Arc<ScriptedStore>);

#[async_trait]
impl ConnectionFactory for ScriptedFactory {
    async fn connect(&self) -> Result<Box<dyn Connection>, StoreError> {
        let pending = self.0.connect_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.0.connect_failures.store(pending - 1, Ordering::SeqCst);
            return Err(StoreError::Connect("connection refused".into()));
        }
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedConnection {
            store: self.0.clone(),
        }))
    }
}

#[derive(Default)]
pub struct ScriptedManager {
    targets: HashMap<String, Arc<ScriptedStore>>,
}

impl ScriptedManager {
    pub fn with_target(mut self, id: &str, store: Arc<ScriptedStore>) -> Self {
        self.targets.insert(id.to_string(), store);
        self
    }
}

#[async_trait]
impl ConnectionManager for ScriptedManager {
    async fn get_connection(
        &self,
        connection_id: &str,
    ) -> Result<Option<Box<dyn Connection>>, StoreError> {
        Ok(self.targets.get(connection_id).map(|store| {
            Box::new(ScriptedConnection {
                store: store.clone(),
            }) as Box<dyn Connection>
        }))
    }
}

/// Plans are SQL strings; anything else fails to render.
pub struct PassthroughRenderer;

impl SqlRenderer for PassthroughRenderer {
    fn render(&self, plan: &QueryPlan, _semantic_layer: &SemanticLayer) -> anyhow::Result<String> {
        plan.0
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("unsupported plan shape: {}", plan.0))
    }
}

pub fn plan(sql: &str) -> QueryPlan {
    QueryPlan(json!(sql))
}

pub fn fast_retry(max_attempts: u32) -> RetrySettings {
    RetrySettings {
        max_attempts,
        base_delay_ms: 10,
        max_delay_ms: 1000,
    }
}

pub async fn memory_cache() -> Arc<ResultCache> {
    Arc::new(ResultCache::new(&CacheSettings::default(), Arc::new(MemoryCacheStore::default())).await)
}

/// Context over an initialized pool of `max` scripted connections and an in-memory cache.
pub async fn engine(
    store: Arc<ScriptedStore>,
    retry: RetrySettings,
    max: usize,
    connections: Option<Arc<dyn ConnectionManager>>,
) -> anyhow::Result<EngineContext> {
    let pool = Arc::new(ConnectionPool::new(Arc::new(ScriptedFactory(store)), true));
    pool.initialize(0, max).await?;

    let settings = AppConfig {
        retry,
        ..Default::default()
    };
    Ok(EngineContext::from_parts(
        settings,
        pool,
        memory_cache().await,
        connections,
    ))
}

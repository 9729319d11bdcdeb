//! Bounded connection pool.
//!
//! A `Semaphore` with `max` permits bounds the number of checked-out connections; idle
//! sessions wait in a mutex-guarded stack. `min` sessions are opened up front and the rest
//! lazily, so the number of open sessions never exceeds `max`.
//!
//! A checked-out session is a [`PooledConnection`] guard. Dropping the guard returns the
//! session, so every exit path (error, early return, unwinding) releases it exactly once.
//! Returned sessions are not health-checked.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use sluice_error::{ErrorCode, ErrorContext, Result, SluiceError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, info, warn};

use crate::store::{Connection, ConnectionFactory, Row, StoreError};

struct PoolShared {
    min: usize,
    max: usize,
    slots: Arc<Semaphore>,
    idle: Mutex<Vec<Box<dyn Connection>>>,
    open: AtomicUsize,
    closed: AtomicBool,
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStatus {
    pub initialized: bool,
    pub min: usize,
    pub max: usize,
    pub open: usize,
    pub idle: usize,
    pub available: usize,
}

pub struct ConnectionPool {
    factory: Arc<dyn ConnectionFactory>,
    block_when_exhausted: bool,
    state: RwLock<Option<Arc<PoolShared>>>,
    init_lock: tokio::sync::Mutex<()>,
}

impl ConnectionPool {
    pub fn new(factory: Arc<dyn ConnectionFactory>, block_when_exhausted: bool) -> Self {
        Self {
            factory,
            block_when_exhausted,
            state: RwLock::new(None),
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Create the pool and open `min` sessions. A second call is a logged no-op.
    pub async fn initialize(&self, min: usize, max: usize) -> Result<()> {
        let _guard = self.init_lock.lock().await;

        if self.state.read().is_some() {
            warn!(target: "pool", "Connection pool already initialized; ignoring");
            return Ok(());
        }

        if max == 0 || min > max {
            return Err(SluiceError::new(
                ErrorCode::InvalidConfig,
                format!("Invalid pool bounds: min={} max={}", min, max),
            )
            .with_hint("Require 1 <= max_connections and min_connections <= max_connections"));
        }

        let mut warm = Vec::with_capacity(min);
        for _ in 0..min {
            let conn = self.factory.connect().await.map_err(acquire_failure)?;
            warm.push(conn);
        }

        let shared = Arc::new(PoolShared {
            min,
            max,
            slots: Arc::new(Semaphore::new(max)),
            open: AtomicUsize::new(warm.len()),
            idle: Mutex::new(warm),
            closed: AtomicBool::new(false),
        });
        *self.state.write() = Some(shared);

        info!(target: "pool", min, max, "Connection pool initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.state.read().is_some()
    }

    fn shared(&self) -> Option<Arc<PoolShared>> {
        self.state.read().clone()
    }

    /// Check out a session, waiting for a free slot when configured to block.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let shared = self.shared().ok_or_else(|| {
            SluiceError::new(
                ErrorCode::PoolNotInitialized,
                "Connection pool used before initialize()",
            )
        })?;

        let permit = if self.block_when_exhausted {
            shared
                .slots
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| pool_unavailable("Connection pool was closed while waiting"))?
        } else {
            shared
                .slots
                .clone()
                .try_acquire_owned()
                .map_err(|e| match e {
                    TryAcquireError::NoPermits => pool_unavailable(format!(
                        "Connection pool exhausted ({} connections in use)",
                        shared.max
                    )),
                    TryAcquireError::Closed => pool_unavailable("Connection pool is closed"),
                })?
        };

        let reused = shared.idle.lock().pop();
        let conn = match reused {
            Some(conn) => conn,
            None => {
                // Permit is released on error, so a failed connect never leaks a slot
                let conn = self.factory.connect().await.map_err(acquire_failure)?;
                let open = shared.open.fetch_add(1, Ordering::SeqCst) + 1;
                debug!(target: "pool", open, max = shared.max, "Opened new pooled connection");
                conn
            }
        };

        Ok(PooledConnection {
            conn: Some(conn),
            shared,
            _permit: permit,
        })
    }

    /// Return a session explicitly. Equivalent to dropping the guard.
    pub fn release(&self, conn: PooledConnection) {
        if !self.is_initialized() {
            warn!(target: "pool", "release() on uninitialized pool; connection discarded");
        }
        drop(conn);
    }

    /// Destroy idle sessions and reset to the uninitialized state.
    ///
    /// Sessions checked out at this point are destroyed when their guards drop, and
    /// callers waiting for a slot fail with `AcquireFailure`.
    pub fn close_all(&self) {
        let Some(shared) = self.state.write().take() else {
            debug!(target: "pool", "close_all() on uninitialized pool");
            return;
        };

        shared.closed.store(true, Ordering::SeqCst);
        shared.slots.close();

        let drained: Vec<Box<dyn Connection>> = shared.idle.lock().drain(..).collect();
        let count = drained.len();
        shared.open.fetch_sub(count, Ordering::SeqCst);
        drop(drained);

        info!(target: "pool", closed = count, "Connection pool closed");
    }

    /// Sessions that can be handed out without waiting.
    pub fn available(&self) -> usize {
        self.shared()
            .map(|s| s.slots.available_permits())
            .unwrap_or(0)
    }

    pub fn status(&self) -> PoolStatus {
        match self.shared() {
            Some(s) => PoolStatus {
                initialized: true,
                min: s.min,
                max: s.max,
                open: s.open.load(Ordering::SeqCst),
                idle: s.idle.lock().len(),
                available: s.slots.available_permits(),
            },
            None => PoolStatus::default(),
        }
    }
}

fn acquire_failure(err: StoreError) -> SluiceError {
    SluiceError::new(
        ErrorCode::AcquireFailure,
        format!("Failed to acquire connection: {}", err),
    )
    .with_context(ErrorContext::Connection {
        target: None,
        reason: err.to_string(),
    })
}

fn pool_unavailable(reason: impl Into<String>) -> SluiceError {
    let reason = reason.into();
    SluiceError::new(ErrorCode::AcquireFailure, reason.clone())
        .with_context(ErrorContext::Connection {
            target: None,
            reason,
        })
        .with_hint("Raise pool.max_connections or enable pool.block_when_exhausted")
}

/// A session checked out of a [`ConnectionPool`]; returned on drop.
pub struct PooledConnection {
    conn: Option<Box<dyn Connection>>,
    shared: Arc<PoolShared>,
    // Dropped after `Drop::drop` has put the session back, so a waiter finds it idle
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub async fn query(&mut self, sql: &str) -> std::result::Result<Vec<Row>, StoreError> {
        match self.conn.as_mut() {
            Some(conn) => conn.query(sql).await,
            None => Err(StoreError::ConnectionLost(
                "pooled connection already released".to_string(),
            )),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.shared.closed.load(Ordering::SeqCst) {
            self.shared.open.fetch_sub(1, Ordering::SeqCst);
            debug!(target: "pool", "Discarding connection returned after close");
            drop(conn);
        } else {
            self.shared.idle.lock().push(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct EchoConnection;

    #[async_trait]
    impl Connection for EchoConnection {
        async fn query(&mut self, _sql: &str) -> std::result::Result<Vec<Row>, StoreError> {
            Ok(vec![Row::new()])
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        connects: AtomicU32,
        fail: AtomicBool,
    }

    #[async_trait]
    impl ConnectionFactory for CountingFactory {
        async fn connect(&self) -> std::result::Result<Box<dyn Connection>, StoreError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Connect("connection refused".into()));
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(EchoConnection))
        }
    }

    fn pool(block: bool) -> (ConnectionPool, Arc<CountingFactory>) {
        let factory = Arc::new(CountingFactory::default());
        (ConnectionPool::new(factory.clone(), block), factory)
    }

    #[tokio::test]
    async fn test_acquire_before_initialize_fails() {
        let (pool, _) = pool(true);
        let err = pool.acquire().await.err().expect("acquire must fail");
        assert_eq!(err.code, ErrorCode::PoolNotInitialized);
    }

    #[tokio::test]
    async fn test_initialize_opens_min_and_is_idempotent() -> Result<()> {
        let (pool, factory) = pool(true);
        pool.initialize(2, 4).await?;
        pool.initialize(3, 8).await?;

        let status = pool.status();
        assert_eq!(status.min, 2);
        assert_eq!(status.max, 4);
        assert_eq!(status.open, 2);
        assert_eq!(factory.connects.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_bounds_rejected() {
        let (pool, _) = pool(true);
        let err = pool.initialize(3, 1).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidConfig);
        assert!(!pool.is_initialized());
    }

    #[tokio::test]
    async fn test_reuses_idle_connections() -> Result<()> {
        let (pool, factory) = pool(true);
        pool.initialize(1, 3).await?;

        for _ in 0..5 {
            let mut conn = pool.acquire().await?;
            conn.query("SELECT 1 LIMIT 1").await.unwrap();
        }
        assert_eq!(factory.connects.load(Ordering::SeqCst), 1);
        assert_eq!(pool.available(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_open_count_never_exceeds_max() -> Result<()> {
        let (pool, factory) = pool(false);
        pool.initialize(0, 2).await?;

        let a = pool.acquire().await?;
        let b = pool.acquire().await?;
        let err = pool.acquire().await.err().expect("pool exhausted");
        assert_eq!(err.code, ErrorCode::AcquireFailure);
        assert_eq!(pool.status().open, 2);

        pool.release(a);
        drop(b);
        assert_eq!(pool.available(), 2);
        assert_eq!(factory.connects.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_blocking_acquire_waits_for_release() -> Result<()> {
        let (pool, _) = pool(true);
        let pool = Arc::new(pool);
        pool.initialize(1, 1).await?;

        let held = pool.acquire().await?;
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.expect("waiter task")?;
        assert_eq!(pool.available(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_connect_does_not_leak_slot() -> Result<()> {
        let (pool, factory) = pool(true);
        pool.initialize(0, 2).await?;
        factory.fail.store(true, Ordering::SeqCst);

        let err = pool.acquire().await.err().expect("connect fails");
        assert_eq!(err.code, ErrorCode::AcquireFailure);
        assert_eq!(pool.available(), 2);
        assert_eq!(pool.status().open, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_close_all_resets_state() -> Result<()> {
        let (pool, _) = pool(true);
        pool.initialize(2, 2).await?;

        let checked_out = pool.acquire().await?;
        pool.close_all();
        assert!(!pool.is_initialized());
        assert_eq!(pool.available(), 0);

        // Returned after close: discarded, not an error
        pool.release(checked_out);

        let err = pool.acquire().await.err().expect("closed pool");
        assert_eq!(err.code, ErrorCode::PoolNotInitialized);

        pool.initialize(1, 2).await?;
        assert_eq!(pool.status().open, 1);
        Ok(())
    }
}

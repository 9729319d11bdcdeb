//! Guarded execution pipeline.
//!
//! `render -> validate (+ one LIMIT correction) -> cache lookup -> execute with retry ->
//! cache store`. The multi-target path skips the cache and runs exactly once.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use sluice_common::config::RetrySettings;
use sluice_common::retry::{retry_async, RetryDecision, RetryError};
use sluice_common::scrubber::redact_literals;
use sluice_error::{ErrorCode, ErrorContext, Result, SluiceError};
use tracing::{debug, info, warn};

use super::cache::ResultCache;
use super::validator::{validation_error, SqlValidator};
use crate::context::EngineContext;
use crate::pool::ConnectionPool;
use crate::store::{classify, ConnectionManager, FailureClass, Row, StoreError};

/// Structured query description produced upstream. Forwarded to the renderer untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryPlan(pub serde_json::Value);

/// Business-name to physical-schema mapping the renderer resolves names against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SemanticLayer(pub serde_json::Value);

/// Turns a plan into SQL text.
pub trait SqlRenderer: Send + Sync {
    fn render(&self, plan: &QueryPlan, semantic_layer: &SemanticLayer) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub row_count: usize,
    pub execution_time_ms: f64,
    pub from_cache: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
}

impl QueryResult {
    /// Zero-row stand-in for a failed batch item.
    pub fn empty() -> Self {
        Self {
            rows: Vec::new(),
            row_count: 0,
            execution_time_ms: 0.0,
            from_cache: false,
            sql: None,
        }
    }

    fn executed(rows: Vec<Row>, execution_time_ms: f64, sql: &str) -> Self {
        Self {
            row_count: rows.len(),
            rows,
            execution_time_ms,
            from_cache: false,
            sql: Some(sql.to_string()),
        }
    }
}

/// Why one execution attempt failed.
#[derive(Debug)]
enum AttemptError {
    /// The pool could not hand out a connection.
    Acquire(SluiceError),
    /// The pool refused for a reason retrying cannot fix (e.g. used before initialize).
    Pool(SluiceError),
    Store(StoreError),
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Acquire(e) | AttemptError::Pool(e) => write!(f, "{}", e),
            AttemptError::Store(e) => write!(f, "{}", e),
        }
    }
}

fn retry_decision(err: &AttemptError) -> RetryDecision {
    match err {
        AttemptError::Acquire(_) => RetryDecision::Retry,
        AttemptError::Pool(_) => RetryDecision::Abort,
        AttemptError::Store(e) => match classify(e) {
            FailureClass::Transient => RetryDecision::Retry,
            FailureClass::Statement | FailureClass::Unexpected => RetryDecision::Abort,
        },
    }
}

struct ActiveQuery<'a>(&'a AtomicUsize);

impl<'a> ActiveQuery<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for ActiveQuery<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

pub struct QueryExecutor {
    renderer: Arc<dyn SqlRenderer>,
    validator: SqlValidator,
    pool: Arc<ConnectionPool>,
    cache: Arc<ResultCache>,
    retry: RetrySettings,
    connections: Option<Arc<dyn ConnectionManager>>,
    active_queries: AtomicUsize,
}

impl QueryExecutor {
    pub fn new(context: &EngineContext, renderer: Arc<dyn SqlRenderer>) -> Self {
        Self {
            renderer,
            validator: context.validator(),
            pool: context.pool(),
            cache: context.cache(),
            retry: context.settings().retry,
            connections: context.connection_manager(),
            active_queries: AtomicUsize::new(0),
        }
    }

    /// Queries currently in flight through this executor.
    pub fn active_queries(&self) -> usize {
        self.active_queries.load(Ordering::Relaxed)
    }

    pub async fn execute_plan(
        &self,
        plan: &QueryPlan,
        semantic_layer: &SemanticLayer,
    ) -> Result<QueryResult> {
        let _active = ActiveQuery::enter(&self.active_queries);
        let sql = self.prepare(plan, semantic_layer)?;
        self.run(&sql).await
    }

    /// Execute SQL text on the pooled path.
    ///
    /// A cache hit is returned as-is. On a miss the text is validated (without correction)
    /// before any connection is acquired.
    pub async fn execute_sql(&self, sql: &str) -> Result<QueryResult> {
        let _active = ActiveQuery::enter(&self.active_queries);
        if let Some(hit) = self.lookup(sql).await {
            return Ok(hit);
        }
        self.validator.validate_or_fail(sql)?;
        self.execute_with_retry(sql).await
    }

    /// Run each plan in order. Failures become zero-row placeholders.
    pub async fn execute_batch(
        &self,
        plans: &[QueryPlan],
        semantic_layer: &SemanticLayer,
    ) -> Vec<QueryResult> {
        let mut results = Vec::with_capacity(plans.len());
        for (index, plan) in plans.iter().enumerate() {
            match self.execute_plan(plan, semantic_layer).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(
                        target: "executor",
                        index,
                        code = %e.code,
                        error = %e.message,
                        "Batch item failed; substituting empty result"
                    );
                    results.push(QueryResult::empty());
                }
            }
        }
        results
    }

    /// Execute against a named external connection: one attempt, no cache.
    pub async fn execute_plan_on(
        &self,
        plan: &QueryPlan,
        semantic_layer: &SemanticLayer,
        connection_id: &str,
    ) -> Result<QueryResult> {
        let _active = ActiveQuery::enter(&self.active_queries);
        let sql = self.prepare(plan, semantic_layer)?;

        let not_found = || {
            SluiceError::new(
                ErrorCode::ConnectionNotFound,
                format!("No connection registered as '{}'", connection_id),
            )
            .with_context(ErrorContext::Connection {
                target: Some(connection_id.to_string()),
                reason: "unknown connection id".to_string(),
            })
            .with_hint("Declare the connection under `targets` in the configuration")
        };

        let manager = self.connections.as_ref().ok_or_else(not_found)?;
        let mut conn = manager
            .get_connection(connection_id)
            .await
            .map_err(|e| single_attempt_error(e, connection_id))?
            .ok_or_else(not_found)?;

        let start = Instant::now();
        let rows = conn
            .query(&sql)
            .await
            .map_err(|e| single_attempt_error(e, connection_id))?;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        info!(
            target: "queries",
            connection_id = %connection_id,
            query = %redact_literals(&sql),
            duration_ms = elapsed_ms as u64,
            rows_returned = rows.len(),
            cache_hit = false,
            success = true
        );
        Ok(QueryResult::executed(rows, elapsed_ms, &sql))
    }

    /// Render and validate, applying the LIMIT correction at most once.
    fn prepare(&self, plan: &QueryPlan, semantic_layer: &SemanticLayer) -> Result<String> {
        let sql = self.renderer.render(plan, semantic_layer).map_err(|e| {
            SluiceError::new(
                ErrorCode::BuildError,
                format!("Failed to build SQL from plan: {:#}", e),
            )
        })?;

        let outcome = self.validator.validate(&sql);
        if outcome.is_valid() {
            return Ok(sql);
        }
        if !outcome.only_missing_limit() {
            return Err(validation_error(&sql, &outcome));
        }

        let corrected = self.validator.correct_missing_limit(&sql);
        let revalidated = self.validator.validate(&corrected);
        if !revalidated.is_valid() {
            return Err(validation_error(&corrected, &revalidated));
        }

        debug!(
            target: "executor",
            query = %redact_literals(&corrected),
            "Appended missing LIMIT"
        );
        Ok(corrected)
    }

    async fn run(&self, sql: &str) -> Result<QueryResult> {
        if let Some(hit) = self.lookup(sql).await {
            return Ok(hit);
        }
        self.execute_with_retry(sql).await
    }

    async fn lookup(&self, sql: &str) -> Option<QueryResult> {
        let rows = self.cache.get(sql).await?;
        info!(
            target: "queries",
            query = %redact_literals(sql),
            duration_ms = 0u64,
            rows_returned = rows.len(),
            cache_hit = true,
            success = true
        );
        Some(QueryResult {
            row_count: rows.len(),
            rows,
            execution_time_ms: 0.0,
            from_cache: true,
            sql: Some(sql.to_string()),
        })
    }

    async fn execute_with_retry(&self, sql: &str) -> Result<QueryResult> {
        let pool = &self.pool;
        let outcome = retry_async("execute_sql", self.retry, retry_decision, |attempt| async move {
            let mut conn = pool.acquire().await.map_err(|e| match e.code {
                ErrorCode::AcquireFailure => AttemptError::Acquire(e),
                _ => AttemptError::Pool(e),
            })?;
            debug!(target: "executor", attempt, "Executing query");

            let start = Instant::now();
            let rows = conn.query(sql).await.map_err(AttemptError::Store)?;
            Ok::<_, AttemptError>((rows, start.elapsed().as_secs_f64() * 1000.0))
        })
        .await;

        match outcome {
            Ok((rows, elapsed_ms)) => {
                self.cache.set(sql, &rows).await;
                info!(
                    target: "queries",
                    query = %redact_literals(sql),
                    duration_ms = elapsed_ms as u64,
                    rows_returned = rows.len(),
                    cache_hit = false,
                    success = true
                );
                Ok(QueryResult::executed(rows, elapsed_ms, sql))
            }
            Err(err) => {
                let err = execution_error(err);
                warn!(
                    target: "queries",
                    query = %redact_literals(sql),
                    code = %err.code,
                    error = %err.message,
                    cache_hit = false,
                    success = false
                );
                Err(err)
            }
        }
    }
}

fn execution_error(err: RetryError<AttemptError>) -> SluiceError {
    match err {
        RetryError::Exhausted { attempts, last } => SluiceError::new(
            ErrorCode::ExecutionExhausted,
            format!("Query failed after {} attempts: {}", attempts, last),
        )
        .with_context(ErrorContext::Retry {
            attempts,
            last_error: last.to_string(),
        }),
        RetryError::Aborted { attempts, error } => {
            let code = match &error {
                AttemptError::Pool(e) => e.code,
                AttemptError::Store(e) if classify(e) == FailureClass::Statement => {
                    ErrorCode::StatementError
                }
                _ => ErrorCode::UnexpectedError,
            };
            SluiceError::new(code, error.to_string()).with_context(ErrorContext::Retry {
                attempts,
                last_error: error.to_string(),
            })
        }
    }
}

fn single_attempt_error(err: StoreError, target: &str) -> SluiceError {
    let code = match classify(&err) {
        FailureClass::Transient => ErrorCode::ExecutionExhausted,
        FailureClass::Statement => ErrorCode::StatementError,
        FailureClass::Unexpected => ErrorCode::UnexpectedError,
    };
    SluiceError::new(code, format!("Target '{}': {}", target, err))
        .with_context(ErrorContext::Retry {
            attempts: 1,
            last_error: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_json_shape() {
        let mut row = Row::new();
        row.insert("region".into(), serde_json::json!("EMEA"));
        let result = QueryResult::executed(vec![row], 12.5, "SELECT region FROM t LIMIT 1");

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["row_count"], 1);
        assert_eq!(json["execution_time_ms"], 12.5);
        assert_eq!(json["from_cache"], false);
        assert_eq!(json["rows"][0]["region"], "EMEA");
        assert_eq!(json["sql"], "SELECT region FROM t LIMIT 1");

        let json = serde_json::to_value(QueryResult::empty()).unwrap();
        assert!(json.get("sql").is_none());
        assert_eq!(json["rows"], serde_json::json!([]));
    }

    #[test]
    fn test_failure_classification() {
        assert_eq!(
            retry_decision(&AttemptError::Store(StoreError::Timeout("t".into()))),
            RetryDecision::Retry
        );
        assert_eq!(
            retry_decision(&AttemptError::Store(StoreError::Syntax("s".into()))),
            RetryDecision::Abort
        );
        assert_eq!(
            retry_decision(&AttemptError::Acquire(SluiceError::new(
                ErrorCode::AcquireFailure,
                "exhausted"
            ))),
            RetryDecision::Retry
        );
        assert_eq!(
            retry_decision(&AttemptError::Pool(SluiceError::new(
                ErrorCode::PoolNotInitialized,
                "not initialized"
            ))),
            RetryDecision::Abort
        );
    }

    #[test]
    fn test_execution_error_codes() {
        let err = execution_error(RetryError::Exhausted {
            attempts: 3,
            last: AttemptError::Store(StoreError::ConnectionLost("reset".into())),
        });
        assert_eq!(err.code, ErrorCode::ExecutionExhausted);
        assert!(matches!(err.context, Some(ErrorContext::Retry { attempts: 3, .. })));

        let err = execution_error(RetryError::Aborted {
            attempts: 1,
            error: AttemptError::Store(StoreError::Permission("orders".into())),
        });
        assert_eq!(err.code, ErrorCode::StatementError);

        let err = execution_error(RetryError::Aborted {
            attempts: 1,
            error: AttemptError::Pool(SluiceError::new(ErrorCode::PoolNotInitialized, "x")),
        });
        assert_eq!(err.code, ErrorCode::PoolNotInitialized);
        assert!(matches!(err.context, Some(ErrorContext::Retry { attempts: 1, .. })));

        let err = execution_error(RetryError::Aborted {
            attempts: 1,
            error: AttemptError::Store(StoreError::Other("out of shared memory".into())),
        });
        assert_eq!(err.code, ErrorCode::UnexpectedError);

        let err = single_attempt_error(StoreError::Timeout("slow".into()), "warehouse");
        assert_eq!(err.code, ErrorCode::ExecutionExhausted);
        assert!(err.message.contains("warehouse"));
    }
}

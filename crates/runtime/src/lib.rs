//! Sluice runtime: the guarded execution boundary between generated SQL and a shared
//! relational store.
//!
//! # Architecture
//!
//! ```text
//! plan ─▶ SqlRenderer ─▶ SqlValidator ─▶ ResultCache ─▶ ConnectionPool ─▶ QueryResult
//!                                          (hit) └────────────────────────▲
//! ```
//!
//! [`EngineContext`](context::EngineContext) owns the pool, cache and validator and is
//! handed to each [`QueryExecutor`](query::executor::QueryExecutor).

pub mod context;
pub mod pool;
pub mod query;
pub mod store;

pub use context::EngineContext;
pub use query::executor::{QueryExecutor, QueryPlan, QueryResult, SemanticLayer, SqlRenderer};

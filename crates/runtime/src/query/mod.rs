//! Query execution path.
//!
//! - **Validator**: pattern-based safety gate and LIMIT correction.
//! - **Cache**: TTL result cache over normalized SQL, with pluggable stores.
//! - **Executor**: the render/validate/cache/retry pipeline.

pub mod cache;
pub mod cache_store;
pub mod executor;
pub mod validator;

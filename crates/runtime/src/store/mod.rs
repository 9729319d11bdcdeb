//! Relational store seam.
//!
//! The executor only ever talks to the store through these traits. Store errors are a
//! closed set of kinds; [`classify`] is the single place that decides whether a failure
//! is worth retrying.

use async_trait::async_trait;

pub mod postgres;

/// One returned record: field name to value, in column order.
pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("could not connect: {0}")]
    Connect(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Connectivity problem; the same read may succeed on a later attempt.
    Transient,
    /// The store rejected the statement itself; retrying cannot help.
    Statement,
    Unexpected,
}

pub fn classify(err: &StoreError) -> FailureClass {
    match err {
        StoreError::ConnectionLost(_) | StoreError::Connect(_) | StoreError::Timeout(_) => {
            FailureClass::Transient
        }
        StoreError::Syntax(_) | StoreError::Permission(_) | StoreError::Constraint(_) => {
            FailureClass::Statement
        }
        StoreError::Other(_) => FailureClass::Unexpected,
    }
}

/// A live session against the relational store.
#[async_trait]
pub trait Connection: Send {
    /// Run a read query and return every row.
    async fn query(&mut self, sql: &str) -> Result<Vec<Row>, StoreError>;
}

/// Opens new sessions for the connection pool.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Connection>, StoreError>;
}

/// Resolves caller-named targets to live connections (multi-target execution).
#[async_trait]
pub trait ConnectionManager: Send + Sync {
    /// `Ok(None)` when no target is registered under `connection_id`.
    async fn get_connection(
        &self,
        connection_id: &str,
    ) -> Result<Option<Box<dyn Connection>>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_errors_are_transient() {
        assert_eq!(
            classify(&StoreError::ConnectionLost("reset".into())),
            FailureClass::Transient
        );
        assert_eq!(
            classify(&StoreError::Connect("refused".into())),
            FailureClass::Transient
        );
        assert_eq!(
            classify(&StoreError::Timeout("statement timeout".into())),
            FailureClass::Transient
        );
    }

    #[test]
    fn test_statement_errors_are_not_retryable() {
        for err in [
            StoreError::Syntax("near FROM".into()),
            StoreError::Permission("table orders".into()),
            StoreError::Constraint("not null".into()),
        ] {
            assert_eq!(classify(&err), FailureClass::Statement);
        }
        assert_eq!(
            classify(&StoreError::Other("weird".into())),
            FailureClass::Unexpected
        );
    }
}

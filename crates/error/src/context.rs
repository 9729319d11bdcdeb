//! # Error Contexts
//!
//! Structured metadata attached to errors for programmatic handling.

use serde::{Deserialize, Serialize};

/// Structured context for a [`SluiceError`](crate::SluiceError).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorContext {
    /// Context for SLUICE-2002 (ValidationFailure)
    Validation {
        sql: String,
        violations: Vec<String>,
    },

    /// Context for SLUICE-5001 (ExecutionExhausted) and single-shot executions
    Retry { attempts: u32, last_error: String },

    /// Context for SLUICE-1002/1003
    Connection {
        target: Option<String>,
        reason: String,
    },

    /// Context for SLUICE-3001
    Config {
        file_path: Option<String>,
        field: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_context_tagging() {
        let ctx = ErrorContext::Validation {
            sql: "SELECT 1".to_string(),
            violations: vec!["Query must include a LIMIT clause".to_string()],
        };

        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["type"], "validation");
        assert_eq!(json["violations"][0], "Query must include a LIMIT clause");

        let de: ErrorContext = serde_json::from_value(json).unwrap();
        match de {
            ErrorContext::Validation { sql, .. } => assert_eq!(sql, "SELECT 1"),
            _ => panic!("Wrong variant"),
        }
    }
}

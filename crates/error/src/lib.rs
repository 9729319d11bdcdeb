//! # sluice-error
//!
//! Unified error types for the sluice query execution boundary.
//!
//! Every error that reaches a caller carries:
//! - A numeric error code (SLUICE-XXXX)
//! - Structured JSON context
//! - An optional actionable hint

mod code;
mod context;
mod convert;

pub use code::{ErrorCategory, ErrorCode};
pub use context::ErrorContext;

use serde::{Deserialize, Serialize};
use std::fmt;

/// The unified error type for all sluice operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SluiceError {
    /// Numeric error code (e.g., "SLUICE-2002")
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Structured context for programmatic handling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ErrorContext>,

    /// Suggestion for correcting the request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl SluiceError {
    /// Create a new error with code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: None,
            hint: None,
        }
    }

    /// Add structured context
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Add a hint
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Violation messages carried by a validation failure, empty otherwise.
    pub fn violations(&self) -> &[String] {
        match &self.context {
            Some(ErrorContext::Validation { violations, .. }) => violations,
            _ => &[],
        }
    }

    /// Serialize to JSON for API responses
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::warn!("Failed to serialize SluiceError: {}", e);
            format!(
                r#"{{"code":"{}","message":"Serialization failed"}}"#,
                self.code
            )
        })
    }
}

impl fmt::Display for SluiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, " (Hint: {})", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for SluiceError {}

/// Result type alias for sluice operations
pub type Result<T> = std::result::Result<T, SluiceError>;

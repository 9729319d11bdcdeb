use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric error codes following SLUICE-XXXX format.
///
/// ## Code Ranges
/// - **1000-1999**: Connection and pool errors
/// - **2000-2999**: Query errors (rendering, validation, statement)
/// - **3000-3999**: Configuration errors
/// - **5000-5999**: Execution/internal errors
///
/// Codes are stable across versions (semver contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
#[non_exhaustive]
pub enum ErrorCode {
    // === Connection Errors (1000-1999) ===
    /// SLUICE-1001: Pool used before `initialize`
    PoolNotInitialized = 1001,
    /// SLUICE-1002: Backend could not hand out a connection
    AcquireFailure = 1002,
    /// SLUICE-1003: Named connection target is unknown
    ConnectionNotFound = 1003,

    // === Query Errors (2000-2999) ===
    /// SLUICE-2001: Renderer failed to produce SQL
    BuildError = 2001,
    /// SLUICE-2002: SQL rejected by the validator
    ValidationFailure = 2002,
    /// SLUICE-2003: Store rejected the statement (syntax, permission, constraint)
    StatementError = 2003,

    // === Configuration Errors (3000-3999) ===
    /// SLUICE-3001: Configuration failed to load or validate
    InvalidConfig = 3001,

    // === Execution Errors (5000-5999) ===
    /// SLUICE-5001: Retry budget spent on transient failures
    ExecutionExhausted = 5001,
    /// SLUICE-5002: Failure outside the known transient/statement classes
    UnexpectedError = 5002,
    /// SLUICE-5003: Serialization/deserialization failed
    SerializationFailed = 5003,

    /// SLUICE-9999: Unknown/unclassified error
    Unknown = 9999,
}

impl ErrorCode {
    /// Get the numeric code value
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Get the formatted code string (e.g., "SLUICE-2002")
    pub fn as_str(&self) -> String {
        format!("SLUICE-{:04}", self.as_u16())
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self.as_u16() {
            1000..=1999 => ErrorCategory::Connection,
            2000..=2999 => ErrorCategory::Query,
            3000..=3999 => ErrorCategory::Config,
            5000..=5999 => ErrorCategory::Execution,
            _ => ErrorCategory::Execution,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> String {
        code.as_str()
    }
}

impl TryFrom<String> for ErrorCode {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        let num: u16 = s
            .strip_prefix("SLUICE-")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| "Invalid format".to_string())?;
        Self::try_from(num).map_err(|_| "Unknown code".to_string())
    }
}

impl TryFrom<u16> for ErrorCode {
    type Error = String;

    fn try_from(n: u16) -> std::result::Result<Self, Self::Error> {
        match n {
            1001 => Ok(Self::PoolNotInitialized),
            1002 => Ok(Self::AcquireFailure),
            1003 => Ok(Self::ConnectionNotFound),
            2001 => Ok(Self::BuildError),
            2002 => Ok(Self::ValidationFailure),
            2003 => Ok(Self::StatementError),
            3001 => Ok(Self::InvalidConfig),
            5001 => Ok(Self::ExecutionExhausted),
            5002 => Ok(Self::UnexpectedError),
            5003 => Ok(Self::SerializationFailed),
            9999 => Ok(Self::Unknown),
            _ => Err(format!("Unknown error code: {}", n)),
        }
    }
}

/// High-level error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ErrorCategory {
    Connection,
    Query,
    Config,
    Execution,
}

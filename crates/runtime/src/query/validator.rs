use once_cell::sync::Lazy;
use regex::Regex;
use sluice_common::config::ValidatorSettings;
use sluice_error::{ErrorCode, ErrorContext, Result, SluiceError};

/// Statements that must never reach the store. Matched as whole words, case-insensitively.
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "DROP",
    "DELETE",
    "TRUNCATE",
    "INSERT",
    "UPDATE",
    "ALTER",
    "CREATE",
    "GRANT",
    "REVOKE",
    "EXEC",
    "EXECUTE",
    "CALL",
    "DECLARE",
    "BEGIN",
    "END",
    "COMMIT",
    "ROLLBACK",
    "SAVEPOINT",
    "SET",
];

static KEYWORD_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    FORBIDDEN_KEYWORDS
        .iter()
        .map(|kw| (*kw, Regex::new(&format!(r"(?i)\b{}\b", kw)).unwrap()))
        .collect()
});

static STACKED_STATEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i);\s*\b(?:{})\b", FORBIDDEN_KEYWORDS.join("|"))).unwrap()
});

static FORBIDDEN_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        ("line comment (--)", Regex::new(r"--").unwrap()),
        ("block comment (/*)", Regex::new(r"/\*").unwrap()),
        ("extended procedure (xp_)", Regex::new(r"(?i)\bxp_").unwrap()),
        ("system procedure (sp_)", Regex::new(r"(?i)\bsp_").unwrap()),
    ]
});

static SELECT_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*SELECT\b").unwrap());

static LIMIT_CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bLIMIT\b(?:\s+(\d+)\b)?").unwrap());

static UNION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bUNION\b").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    ForbiddenKeyword,
    ForbiddenPattern,
    NotSelect,
    MissingLimit,
    InvalidLimit,
    LimitExceeded,
    MultipleStatements,
    Union,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub kind: ViolationKind,
    pub message: String,
}

impl Violation {
    fn new(kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Result of checking one SQL text. Violations are in check order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub violations: Vec<Violation>,
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn errors(&self) -> Vec<String> {
        self.violations.iter().map(|v| v.message.clone()).collect()
    }

    /// True when a missing LIMIT is the only problem, i.e. the query is correctable.
    pub fn only_missing_limit(&self) -> bool {
        matches!(
            self.violations.as_slice(),
            [Violation { kind: ViolationKind::MissingLimit, .. }]
        )
    }
}

/// Pattern-based safety gate for generated read queries.
///
/// This is a blacklist over the raw text. It does not parse SQL, so identifiers or string
/// literals that happen to contain a forbidden word (`CASE ... END`, `'reset'`) are rejected.
#[derive(Debug, Clone, Copy)]
pub struct SqlValidator {
    settings: ValidatorSettings,
}

impl Default for SqlValidator {
    fn default() -> Self {
        Self::new(ValidatorSettings::default())
    }
}

impl SqlValidator {
    pub fn new(settings: ValidatorSettings) -> Self {
        Self { settings }
    }

    pub fn max_row_limit(&self) -> u64 {
        self.settings.max_row_limit
    }

    pub fn validate(&self, sql: &str) -> ValidationOutcome {
        let mut violations = Vec::new();

        for (keyword, pattern) in KEYWORD_PATTERNS.iter() {
            if pattern.is_match(sql) {
                violations.push(Violation::new(
                    ViolationKind::ForbiddenKeyword,
                    format!("Forbidden keyword: {}", keyword),
                ));
            }
        }

        if STACKED_STATEMENT.is_match(sql) {
            violations.push(Violation::new(
                ViolationKind::ForbiddenPattern,
                "Forbidden pattern: statement separator followed by a dangerous keyword",
            ));
        }
        for (name, pattern) in FORBIDDEN_PATTERNS.iter() {
            if pattern.is_match(sql) {
                violations.push(Violation::new(
                    ViolationKind::ForbiddenPattern,
                    format!("Forbidden pattern: {}", name),
                ));
            }
        }

        if !SELECT_PREFIX.is_match(sql) {
            violations.push(Violation::new(
                ViolationKind::NotSelect,
                "Query must be a SELECT statement",
            ));
        }

        self.check_limits(sql, &mut violations);

        if sql.matches(';').count() > 1 {
            violations.push(Violation::new(
                ViolationKind::MultipleStatements,
                "Multiple statements are not allowed",
            ));
        }

        if UNION.is_match(sql) {
            violations.push(Violation::new(
                ViolationKind::Union,
                "UNION queries are not allowed",
            ));
        }

        ValidationOutcome { violations }
    }

    fn check_limits(&self, sql: &str, violations: &mut Vec<Violation>) {
        let mut found = false;
        for caps in LIMIT_CLAUSE.captures_iter(sql) {
            found = true;
            let Some(value) = caps.get(1) else {
                violations.push(Violation::new(
                    ViolationKind::InvalidLimit,
                    "LIMIT must be followed by a numeric row count",
                ));
                continue;
            };
            // Digits too long for u64 are certainly above any configured maximum
            let exceeds = value
                .as_str()
                .parse::<u64>()
                .map(|n| n > self.settings.max_row_limit)
                .unwrap_or(true);
            if exceeds {
                violations.push(Violation::new(
                    ViolationKind::LimitExceeded,
                    format!(
                        "LIMIT {} exceeds maximum of {}",
                        value.as_str(),
                        self.settings.max_row_limit
                    ),
                ));
            }
        }

        if !found {
            violations.push(Violation::new(
                ViolationKind::MissingLimit,
                "Query must include a LIMIT clause",
            ));
        }
    }

    pub fn validate_or_fail(&self, sql: &str) -> Result<()> {
        let outcome = self.validate(sql);
        if outcome.is_valid() {
            return Ok(());
        }
        Err(validation_error(sql, &outcome))
    }

    /// Append the configured correction LIMIT, dropping one trailing `;`.
    pub fn correct_missing_limit(&self, sql: &str) -> String {
        let trimmed = sql.trim_end();
        let body = trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end();
        format!("{} LIMIT {}", body, self.settings.correction_limit)
    }
}

pub(crate) fn validation_error(sql: &str, outcome: &ValidationOutcome) -> SluiceError {
    let violations = outcome.errors();
    SluiceError::new(
        ErrorCode::ValidationFailure,
        format!("SQL validation failed: {}", violations.join("; ")),
    )
    .with_context(ErrorContext::Validation {
        sql: sql.to_string(),
        violations,
    })
}

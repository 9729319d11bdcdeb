use once_cell::sync::Lazy;
use regex::Regex;

/// Literal redaction for SQL text written to logs.
///
/// ### WARNING
/// Regex-based and best-effort: quoted literals and long digit runs are masked, but
/// identifiers and structure are left untouched.
static STRING_LITERAL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'(?:[^']|'')*'").expect("valid literal regex"));

static LONG_NUMBER_REGEX: Lazy<Regex> = Lazy::new(|| {
    // Digit runs of 6+ catch account numbers and phone-like values, not LIMIT 100
    Regex::new(r"\b\d{6,}\b").expect("valid number regex")
});

pub fn redact_literals(sql: &str) -> String {
    let redacted = STRING_LITERAL_REGEX.replace_all(sql, "'?'");
    LONG_NUMBER_REGEX.replace_all(&redacted, "?").into_owned()
}

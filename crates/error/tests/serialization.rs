use serde_json::Value;
use sluice_error::{ErrorCode, ErrorContext, SluiceError};

#[test]
fn test_json_serialization() {
    let error = SluiceError::new(
        ErrorCode::ExecutionExhausted,
        "Query failed after 3 attempts",
    )
    .with_context(ErrorContext::Retry {
        attempts: 3,
        last_error: "connection lost: server closed the connection".to_string(),
    })
    .with_hint("Check database connectivity");

    let json = error.to_json();
    println!("JSON: {}", json);

    let v: Value = serde_json::from_str(&json).expect("valid json");

    assert_eq!(v["code"], "SLUICE-5001");
    assert_eq!(v["message"], "Query failed after 3 attempts");
    assert_eq!(v["hint"], "Check database connectivity");
    assert_eq!(v["context"]["type"], "retry");
    assert_eq!(v["context"]["attempts"], 3);
}

#[test]
fn test_deserialization_roundtrip_keeps_code() {
    let json = r#"{"code":"SLUICE-2002","message":"rejected"}"#;
    let err: SluiceError = serde_json::from_str(json).expect("valid error json");
    assert_eq!(err.code, ErrorCode::ValidationFailure);
    assert!(err.context.is_none());
}

#[test]
fn test_error_code_parsing() {
    let code: ErrorCode = "SLUICE-1002".to_string().try_into().unwrap();
    assert_eq!(code, ErrorCode::AcquireFailure);
}

/*!
 * Tests for error classification and conversion
 */

use robaws_intake::errors::{AppError, ExportError, ProviderError, RobawsError};

#[test]
fn test_robawsError_isTransient_shouldOnlyRetryRecoverableFailures() {
    assert!(RobawsError::Request("reset".to_string()).is_transient());
    assert!(RobawsError::RateLimited { retry_after_secs: Some(3) }.is_transient());
    assert!(RobawsError::Http { status: 502, body: String::new() }.is_transient());

    assert!(!RobawsError::Http { status: 422, body: String::new() }.is_transient());
    assert!(!RobawsError::Unauthorized("bad password".to_string()).is_transient());
    assert!(!RobawsError::NotFound("offers/9".to_string()).is_transient());
}

#[test]
fn test_providerError_isRetryable_shouldSkipAuthAndParseErrors() {
    assert!(ProviderError::ConnectionError("timeout".to_string()).is_retryable());
    assert!(ProviderError::ApiError { status_code: 529, message: "overloaded".to_string() }.is_retryable());
    assert!(!ProviderError::AuthenticationError("invalid key".to_string()).is_retryable());
    assert!(!ProviderError::ParseError("eof".to_string()).is_retryable());
}

#[test]
fn test_appError_conversions_shouldKeepMessages() {
    let from_export: AppError = ExportError::MissingClient("abc".to_string()).into();
    assert_eq!(from_export.to_string(), "Export error: Intake abc has no resolved client");

    let from_io: AppError = std::io::Error::new(std::io::ErrorKind::NotFound, "conf.json").into();
    assert!(matches!(from_io, AppError::File(_)));

    let from_anyhow: AppError = anyhow::anyhow!("boom").into();
    assert_eq!(from_anyhow.to_string(), "Unknown error: boom");
}

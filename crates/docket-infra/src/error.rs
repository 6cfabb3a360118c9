//! Error rendering
//!
//! `ErrorResponse` is the serialized form of an [`AppError`] for anything that
//! reports failures to a client, such as the CLI's JSON output. Sensitive
//! errors only expose their client message.

use docket_core::{AppError, ErrorMetadata, LogLevel};
use serde::Serialize;

/// Standard error response format
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<&'static str>,
}

impl ErrorResponse {
    pub fn from_app_error(err: &AppError) -> Self {
        let details = if err.is_sensitive() {
            None
        } else {
            Some(err.detailed_message())
        };

        Self {
            error: err.client_message(),
            code: err.error_code(),
            status: err.http_status_code(),
            details,
            error_type: Some(err.error_type().to_string()),
            recoverable: err.is_recoverable(),
            suggested_action: err.suggested_action(),
        }
    }
}

impl From<&AppError> for ErrorResponse {
    fn from(err: &AppError) -> Self {
        Self::from_app_error(err)
    }
}

/// Log `err` at the level its metadata asks for.
pub fn log_app_error(err: &AppError) {
    match err.log_level() {
        LogLevel::Error => tracing::error!(error = %err, code = err.error_code(), "Operation failed"),
        LogLevel::Warn => tracing::warn!(error = %err, code = err.error_code(), "Operation failed"),
        LogLevel::Debug => tracing::debug!(error = %err, code = err.error_code(), "Operation failed"),
    }
}

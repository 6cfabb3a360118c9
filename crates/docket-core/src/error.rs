//! Error types module
//!
//! This module provides the error taxonomy used throughout Docket. All failures are
//! unified under the `AppError` enum: validation and index errors are caller bugs,
//! quota errors require the tenant to free space, and store/signer errors are
//! transient external failures that the core never retries on its own.
//!
//! The `Database` variant and `From<sqlx::Error>` are gated behind the `sqlx` feature.

use std::io;

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;
use uuid::Uuid;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues like quota limits
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata for error responses - defines how an error should be presented
/// by whatever layer surfaces it (an HTTP handler, the CLI).
pub trait ErrorMetadata {
    /// HTTP status code to return
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "QUOTA_EXCEEDED")
    fn error_code(&self) -> &'static str;

    /// Whether this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the client
    fn suggested_action(&self) -> Option<&'static str>;

    /// Client-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Whether details should be hidden in production
    fn is_sensitive(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Signer error: {0}")]
    Signer(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage quota exceeded for tenant {tenant_id}: {used} + {requested} bytes exceeds {total} bytes")]
    QuotaExceeded {
        tenant_id: Uuid,
        requested: u64,
        used: u64,
        total: u64,
    },

    #[error("Index error: {0}")]
    Index(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Concurrent modification: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Database(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Store(format!("Malformed stored document: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

/// Static metadata for each variant: (http_status, error_code, recoverable, suggested_action, sensitive, log_level).
fn app_error_static_metadata(
    err: &AppError,
) -> (
    u16,
    &'static str,
    bool,
    Option<&'static str>,
    bool,
    LogLevel,
) {
    match err {
        AppError::Database(_) => (
            500,
            "DATABASE_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::Store(_) => (
            500,
            "STORE_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::Signer(_) => (
            502,
            "SIGNER_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::Validation(_) => (
            400,
            "VALIDATION_ERROR",
            false,
            Some("Check request parameters and try again"),
            false,
            LogLevel::Debug,
        ),
        AppError::QuotaExceeded { .. } => (
            400,
            "QUOTA_EXCEEDED",
            false,
            Some("Delete old files or upgrade your plan"),
            false,
            LogLevel::Warn,
        ),
        AppError::Index(_) => (
            400,
            "INDEX_ERROR",
            false,
            Some("Use an index within the collection"),
            false,
            LogLevel::Debug,
        ),
        AppError::NotFound(_) => (
            404,
            "NOT_FOUND",
            false,
            Some("Verify the resource exists"),
            false,
            LogLevel::Debug,
        ),
        AppError::Conflict(_) => (
            409,
            "CONFLICT",
            true,
            Some("Reload the collection and retry"),
            false,
            LogLevel::Warn,
        ),
        AppError::Config(_) => (
            500,
            "CONFIG_ERROR",
            false,
            Some("Contact support if this error persists"),
            true,
            LogLevel::Error,
        ),
        AppError::Internal(_) | AppError::InternalWithSource { .. } => (
            500,
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
    }
}

impl AppError {
    /// Get the error type name for detailed error responses
    pub fn error_type(&self) -> &str {
        match self {
            AppError::Database(_) => "Database",
            AppError::Store(_) => "Store",
            AppError::Signer(_) => "Signer",
            AppError::Validation(_) => "Validation",
            AppError::QuotaExceeded { .. } => "QuotaExceeded",
            AppError::Index(_) => "Index",
            AppError::NotFound(_) => "NotFound",
            AppError::Conflict(_) => "Conflict",
            AppError::Config(_) => "Config",
            AppError::Internal(_) => "Internal",
            AppError::InternalWithSource { .. } => "Internal",
        }
    }

    /// Get detailed error information including error chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        app_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).2
    }

    fn suggested_action(&self) -> Option<&'static str> {
        app_error_static_metadata(self).3
    }

    fn is_sensitive(&self) -> bool {
        app_error_static_metadata(self).4
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).5
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Database(_) | AppError::Store(_) => "Failed to access storage".to_string(),
            AppError::Signer(_) => "Failed to issue file link".to_string(),
            AppError::Validation(ref msg) => msg.clone(),
            AppError::QuotaExceeded { .. } => {
                "Storage limit exceeded. Please upgrade your plan or delete old files.".to_string()
            }
            AppError::Index(ref msg) => msg.clone(),
            AppError::NotFound(ref msg) => msg.clone(),
            AppError::Conflict(_) => {
                "The collection was modified concurrently, please retry".to_string()
            }
            AppError::Config(_) => "Service misconfigured".to_string(),
            AppError::Internal(_) | AppError::InternalWithSource { .. } => {
                "Internal server error".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_metadata_quota_exceeded() {
        let err = AppError::QuotaExceeded {
            tenant_id: Uuid::nil(),
            requested: 150,
            used: 900,
            total: 1000,
        };
        assert_eq!(err.http_status_code(), 400);
        assert_eq!(err.error_code(), "QUOTA_EXCEEDED");
        assert!(!err.is_recoverable());
        assert!(err.client_message().contains("Storage limit exceeded"));
        assert!(err.to_string().contains("900 + 150"));
        assert!(!err.is_sensitive());
        assert_eq!(err.log_level(), LogLevel::Warn);
    }

    #[test]
    fn test_error_metadata_store_is_sensitive_and_recoverable() {
        let err = AppError::Store("connection reset".to_string());
        assert_eq!(err.http_status_code(), 500);
        assert_eq!(err.error_code(), "STORE_ERROR");
        assert!(err.is_recoverable());
        assert_eq!(err.client_message(), "Failed to access storage");
        assert!(err.is_sensitive());
        assert_eq!(err.log_level(), LogLevel::Error);
    }

    #[test]
    fn test_error_metadata_validation() {
        let err = AppError::Validation("Only images allowed".to_string());
        assert_eq!(err.http_status_code(), 400);
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert_eq!(err.client_message(), "Only images allowed");
        assert_eq!(err.log_level(), LogLevel::Debug);
        assert_eq!(err.error_type(), "Validation");
    }

    #[test]
    fn test_detailed_message_includes_source_chain() {
        let err = AppError::from(anyhow::anyhow!("inner failure").context("outer context"));
        let details = err.detailed_message();
        assert!(details.contains("outer context"));
    }

    #[test]
    fn test_signer_error_suggests_retry() {
        let err = AppError::Signer("timed out".to_string());
        assert_eq!(err.http_status_code(), 502);
        assert_eq!(err.suggested_action(), Some("Retry after a short delay"));
    }
}

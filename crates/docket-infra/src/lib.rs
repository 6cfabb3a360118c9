//! Docket Infrastructure Library
//!
//! Shared infrastructure used by Docket binaries:
//! - Telemetry initialization (tracing subscriber)
//! - Error rendering

#[cfg(feature = "observability-basic")]
pub mod telemetry;

pub mod error;

#[cfg(feature = "observability-basic")]
pub use telemetry::{init_telemetry, shutdown_telemetry, LogFormat};

pub use error::{log_app_error, ErrorResponse};

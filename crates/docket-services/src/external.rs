//! Bounded calls to the object store.
//!
//! Signing calls surface failures and timeouts as `Signer`; every other call
//! surfaces them as `Store`.

use docket_core::AppError;
use docket_storage::{StorageError, StorageResult};
use std::future::Future;
use std::time::Duration;

pub(crate) async fn sign_call<T>(
    timeout: Duration,
    operation: &'static str,
    fut: impl Future<Output = StorageResult<T>>,
) -> Result<T, AppError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(StorageError::InvalidKey(msg))) => Err(AppError::Validation(msg)),
        Ok(Err(e)) => Err(AppError::Signer(format!("{} failed: {}", operation, e))),
        Err(_) => Err(AppError::Signer(format!(
            "{} timed out after {}s",
            operation,
            timeout.as_secs_f64()
        ))),
    }
}

pub(crate) async fn store_call<T>(
    timeout: Duration,
    operation: &'static str,
    fut: impl Future<Output = StorageResult<T>>,
) -> Result<T, AppError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(AppError::from),
        Err(_) => Err(AppError::Store(format!(
            "{} timed out after {}s",
            operation,
            timeout.as_secs_f64()
        ))),
    }
}

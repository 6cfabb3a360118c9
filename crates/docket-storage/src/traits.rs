//! Storage abstraction trait
//!
//! This module defines the Storage trait that all storage backends must implement.

use crate::StorageBackend;
use async_trait::async_trait;
use docket_core::AppError;
use std::time::Duration;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::SigningFailed(msg) => AppError::Signer(msg),
            StorageError::NotFound(key) => AppError::NotFound(format!("Object {}", key)),
            StorageError::InvalidKey(msg) | StorageError::InvalidSignature(msg) => {
                AppError::Validation(msg)
            }
            StorageError::ConfigError(msg) => AppError::Config(msg),
            other => AppError::Store(other.to_string()),
        }
    }
}

/// Storage abstraction trait
///
/// Docket never streams file bytes itself: clients upload and download directly
/// against signed URLs. The trait therefore covers signing, deletion and
/// accounting only.
///
/// **Key format:** see the crate root documentation.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Generate a presigned PUT URL for a direct upload.
    async fn presigned_put_url(
        &self,
        storage_key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> StorageResult<String>;

    /// Generate a presigned GET URL for viewing an object.
    async fn presigned_get_url(
        &self,
        storage_key: &str,
        expires_in: Duration,
    ) -> StorageResult<String>;

    /// Generate a presigned GET URL that asks the client to save the object as
    /// `filename`.
    ///
    /// Backends that cannot bind a response disposition into the signature fall
    /// back to a plain GET URL.
    async fn presigned_download_url(
        &self,
        storage_key: &str,
        expires_in: Duration,
        _filename: &str,
    ) -> StorageResult<String> {
        self.presigned_get_url(storage_key, expires_in).await
    }

    /// Delete an object. Deleting a missing object succeeds.
    async fn delete(&self, storage_key: &str) -> StorageResult<()>;

    /// Total size in bytes of every object whose key starts with `prefix`.
    async fn prefix_size(&self, prefix: &str) -> StorageResult<u64>;

    /// Size in bytes of the stored object, `None` if nothing is stored at the key.
    async fn object_size(&self, storage_key: &str) -> StorageResult<Option<u64>>;

    /// Check if an object exists
    async fn exists(&self, storage_key: &str) -> StorageResult<bool> {
        Ok(self.object_size(storage_key).await?.is_some())
    }

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}

/// Builds an `attachment` content disposition for `filename`.
///
/// Quotes and control characters are dropped so the value is always a valid
/// header.
pub fn attachment_disposition(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
        .collect();
    format!("attachment; filename=\"{}\"", cleaned)
}

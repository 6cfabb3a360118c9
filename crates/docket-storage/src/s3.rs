use crate::keys::validate_key;
use crate::traits::{Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use futures::TryStreamExt;
use http::Method;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::Error as ObjectStoreError;
use object_store::{ObjectStore, ObjectStoreExt, Result as ObjectResult};
use std::time::Duration;

/// S3 storage implementation
#[derive(Clone)]
pub struct S3Storage {
    store: AmazonS3,
    bucket: String,
}

impl S3Storage {
    /// Create a new S3Storage instance
    ///
    /// # Arguments
    /// * `bucket` - S3 bucket name
    /// * `region` - AWS region (or region identifier for S3-compatible providers)
    /// * `endpoint_url` - Optional custom endpoint URL for S3-compatible providers
    ///   (e.g., "http://localhost:9000" for MinIO)
    pub async fn new(
        bucket: String,
        region: String,
        endpoint_url: Option<String>,
    ) -> StorageResult<Self> {
        // Credentials come from the standard AWS environment variables.
        let mut builder = AmazonS3Builder::from_env()
            .with_region(region)
            .with_bucket_name(bucket.clone());

        if let Some(endpoint) = endpoint_url {
            let allow_http = endpoint.starts_with("http://");
            builder = builder.with_endpoint(endpoint).with_allow_http(allow_http);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        Ok(S3Storage { store, bucket })
    }

    async fn sign(
        &self,
        method: Method,
        storage_key: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        validate_key(storage_key)?;
        let start = std::time::Instant::now();
        let location = Path::from(storage_key);

        let url_result: ObjectResult<_> = self
            .store
            .signed_url(method.clone(), &location, expires_in)
            .await;

        let url = url_result.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %self.bucket,
                key = %storage_key,
                method = %method,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "S3 URL signing failed"
            );
            StorageError::SigningFailed(e.to_string())
        })?;

        tracing::debug!(
            bucket = %self.bucket,
            key = %storage_key,
            method = %method,
            expires_in_secs = expires_in.as_secs(),
            "S3 URL signed"
        );

        Ok(url.to_string())
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn presigned_put_url(
        &self,
        storage_key: &str,
        _content_type: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        self.sign(Method::PUT, storage_key, expires_in).await
    }

    async fn presigned_get_url(
        &self,
        storage_key: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        self.sign(Method::GET, storage_key, expires_in).await
    }

    async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        validate_key(storage_key)?;
        let start = std::time::Instant::now();
        let location = Path::from(storage_key);

        let result: ObjectResult<_> = self.store.delete(&location).await;

        match result {
            Ok(()) | Err(ObjectStoreError::NotFound { .. }) => {}
            Err(e) => {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %storage_key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 delete failed"
                );
                return Err(StorageError::DeleteFailed(e.to_string()));
            }
        }

        tracing::info!(
            bucket = %self.bucket,
            key = %storage_key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 delete successful"
        );

        Ok(())
    }

    async fn prefix_size(&self, prefix: &str) -> StorageResult<u64> {
        validate_key(prefix)?;
        let start = std::time::Instant::now();
        let location = Path::from(prefix.trim_end_matches('/'));

        // The list stream pages through ListObjectsV2 internally.
        let total = self
            .store
            .list(Some(&location))
            .try_fold(0u64, |acc, meta| async move {
                Ok::<_, ObjectStoreError>(acc.saturating_add(meta.size))
            })
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    prefix = %prefix,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 prefix listing failed"
                );
                StorageError::BackendError(e.to_string())
            })?;

        tracing::info!(
            bucket = %self.bucket,
            prefix = %prefix,
            total_bytes = total,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 prefix size computed"
        );

        Ok(total)
    }

    async fn object_size(&self, storage_key: &str) -> StorageResult<Option<u64>> {
        validate_key(storage_key)?;
        let location = Path::from(storage_key);
        match self.store.head(&location).await {
            Ok(meta) => Ok(Some(meta.size)),
            Err(ObjectStoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(StorageError::BackendError(e.to_string())),
        }
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::S3
    }
}

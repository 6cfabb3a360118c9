//! In-process storage backend.
//!
//! Objects are tracked by key and size only. Signing produces deterministic
//! `memory://` URLs and every call is counted, so tests can assert how often a
//! backend was reached. Failures and latency can be injected per operation.

use crate::keys::validate_key;
use crate::traits::{Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Inner {
    objects: Mutex<HashMap<String, u64>>,
    deleted: Mutex<Vec<String>>,
    sign_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    fail_signing: AtomicBool,
    fail_deletes: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

/// In-memory `Storage` for tests and local development
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an object as if a client had uploaded it.
    pub fn put_object(&self, storage_key: &str, size_bytes: u64) {
        self.objects().insert(storage_key.to_string(), size_bytes);
    }

    pub fn contains(&self, storage_key: &str) -> bool {
        self.objects().contains_key(storage_key)
    }

    /// Keys passed to successful deletes, in call order.
    pub fn deleted_keys(&self) -> Vec<String> {
        self.inner
            .deleted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn sign_calls(&self) -> usize {
        self.inner.sign_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.inner.delete_calls.load(Ordering::SeqCst)
    }

    pub fn set_fail_signing(&self, fail: bool) {
        self.inner.fail_signing.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.inner.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Delay every operation by `latency`, e.g. to exercise caller timeouts.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self
            .inner
            .latency
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = latency;
    }

    fn objects(&self) -> std::sync::MutexGuard<'_, HashMap<String, u64>> {
        self.inner
            .objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    async fn simulate_latency(&self) {
        let latency = *self
            .inner
            .latency
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    async fn sign(
        &self,
        method: &str,
        storage_key: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        validate_key(storage_key)?;
        self.simulate_latency().await;
        let call = self.inner.sign_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.inner.fail_signing.load(Ordering::SeqCst) {
            return Err(StorageError::SigningFailed(
                "signing disabled for this backend".to_string(),
            ));
        }
        Ok(format!(
            "memory://{}?method={}&expires_in={}&n={}",
            storage_key,
            method,
            expires_in.as_secs(),
            call
        ))
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn presigned_put_url(
        &self,
        storage_key: &str,
        _content_type: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        self.sign("PUT", storage_key, expires_in).await
    }

    async fn presigned_get_url(
        &self,
        storage_key: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        self.sign("GET", storage_key, expires_in).await
    }

    async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        validate_key(storage_key)?;
        self.simulate_latency().await;
        self.inner.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::DeleteFailed(format!(
                "delete disabled for this backend: {}",
                storage_key
            )));
        }
        self.objects().remove(storage_key);
        self.inner
            .deleted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(storage_key.to_string());
        Ok(())
    }

    async fn prefix_size(&self, prefix: &str) -> StorageResult<u64> {
        self.simulate_latency().await;
        Ok(self
            .objects()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(_, size)| *size)
            .sum())
    }

    async fn object_size(&self, storage_key: &str) -> StorageResult<Option<u64>> {
        validate_key(storage_key)?;
        Ok(self.objects().get(storage_key).copied())
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_sign_calls_and_tracks_objects() {
        let storage = MemoryStorage::new();
        storage.put_object("tenants/a/x.pdf", 10);
        storage.put_object("tenants/a/S_1/y.pdf", 5);
        storage.put_object("tenants/b/z.pdf", 7);

        assert_eq!(storage.prefix_size("tenants/a/").await.unwrap(), 15);

        let first = storage
            .presigned_get_url("tenants/a/x.pdf", Duration::from_secs(600))
            .await
            .unwrap();
        let second = storage
            .presigned_get_url("tenants/a/x.pdf", Duration::from_secs(600))
            .await
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(storage.sign_calls(), 2);

        assert_eq!(
            storage.object_size("tenants/b/z.pdf").await.unwrap(),
            Some(7)
        );
        assert_eq!(storage.object_size("tenants/b/none.pdf").await.unwrap(), None);

        storage.delete("tenants/a/x.pdf").await.unwrap();
        assert!(!storage.contains("tenants/a/x.pdf"));
        assert_eq!(storage.deleted_keys(), vec!["tenants/a/x.pdf".to_string()]);
    }

    #[tokio::test]
    async fn injected_failures() {
        let storage = MemoryStorage::new();
        storage.set_fail_signing(true);
        assert!(matches!(
            storage
                .presigned_put_url("k", "image/png", Duration::from_secs(60))
                .await,
            Err(StorageError::SigningFailed(_))
        ));

        storage.put_object("k", 1);
        storage.set_fail_deletes(true);
        assert!(storage.delete("k").await.is_err());
        assert!(storage.contains("k"));
    }
}

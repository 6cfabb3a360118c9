//! Memoized view URLs.
//!
//! Signing is an external call, so view links are cached per storage key for
//! their lifetime. The cache is bounded (least recently used entries go first)
//! and expired entries can be swept actively.

use chrono::{DateTime, Utc};
use docket_core::AppError;
use docket_storage::Storage;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::interval;

use crate::clock::{Clock, SystemClock};
use crate::external::sign_call;

#[derive(Debug, Clone)]
struct CachedUrl {
    url: String,
    expires_at: DateTime<Utc>,
}

pub struct SignedUrlCache {
    storage: Arc<dyn Storage>,
    entries: Mutex<LruCache<String, CachedUrl>>,
    ttl: Duration,
    sign_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl SignedUrlCache {
    pub fn new(
        storage: Arc<dyn Storage>,
        capacity: usize,
        ttl: Duration,
        sign_timeout: Duration,
    ) -> Self {
        Self::with_clock(storage, capacity, ttl, sign_timeout, Arc::new(SystemClock))
    }

    pub fn with_clock(
        storage: Arc<dyn Storage>,
        capacity: usize,
        ttl: Duration,
        sign_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            storage,
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            sign_timeout,
            clock,
        }
    }

    /// View URL for `storage_key`, signing a fresh one when nothing valid is
    /// cached.
    pub async fn get(&self, storage_key: &str) -> Result<String, AppError> {
        let now = self.clock.now();
        {
            let mut entries = self.entries.lock().await;
            if let Some(cached) = entries.get(storage_key) {
                if now < cached.expires_at {
                    return Ok(cached.url.clone());
                }
            }
        }

        // Sign without holding the lock; concurrent misses for one key may both
        // sign, the last one wins.
        let url = sign_call(
            self.sign_timeout,
            "view url signing",
            self.storage.presigned_get_url(storage_key, self.ttl),
        )
        .await?;

        let expires_at = chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.entries.lock().await.put(
            storage_key.to_string(),
            CachedUrl {
                url: url.clone(),
                expires_at,
            },
        );

        tracing::debug!(key = %storage_key, "View URL signed and cached");
        Ok(url)
    }

    pub async fn invalidate(&self, storage_key: &str) {
        self.entries.lock().await.pop(storage_key);
    }

    /// Drop every expired entry and return how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, cached)| now >= cached.expires_at)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Start the background sweep task.
    pub fn start_sweeper(self: Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut sweep_interval = interval(every);
            loop {
                sweep_interval.tick().await;
                let removed = self.sweep_expired().await;
                if removed > 0 {
                    tracing::debug!(removed, "Swept expired view URLs");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use docket_storage::MemoryStorage;

    const TTL: Duration = Duration::from_secs(600);

    fn cache(capacity: usize) -> (Arc<SignedUrlCache>, MemoryStorage, Arc<ManualClock>) {
        let storage = MemoryStorage::new();
        let clock = Arc::new(ManualClock::default());
        let cache = SignedUrlCache::with_clock(
            Arc::new(storage.clone()),
            capacity,
            TTL,
            Duration::from_secs(1),
            clock.clone(),
        );
        (Arc::new(cache), storage, clock)
    }

    #[tokio::test]
    async fn repeated_gets_within_ttl_sign_once() {
        let (cache, storage, clock) = cache(16);

        let first = cache.get("tenants/t/a.pdf").await.unwrap();
        clock.advance(chrono::Duration::seconds(599));
        let second = cache.get("tenants/t/a.pdf").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(storage.sign_calls(), 1);
    }

    #[tokio::test]
    async fn expired_entry_is_resigned() {
        let (cache, storage, clock) = cache(16);

        let first = cache.get("tenants/t/a.pdf").await.unwrap();
        clock.advance(chrono::Duration::seconds(600));
        let second = cache.get("tenants/t/a.pdf").await.unwrap();

        assert_ne!(first, second);
        assert_eq!(storage.sign_calls(), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_a_new_signature() {
        let (cache, storage, _) = cache(16);
        cache.get("tenants/t/a.pdf").await.unwrap();
        cache.invalidate("tenants/t/a.pdf").await;
        assert!(cache.is_empty().await);
        cache.get("tenants/t/a.pdf").await.unwrap();
        assert_eq!(storage.sign_calls(), 2);
    }

    #[tokio::test]
    async fn capacity_is_never_exceeded() {
        let (cache, _, _) = cache(2);
        for name in ["a", "b", "c", "d"] {
            cache.get(&format!("tenants/t/{}.pdf", name)).await.unwrap();
        }
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_entries() {
        let (cache, _, clock) = cache(16);
        cache.get("tenants/t/old.pdf").await.unwrap();
        clock.advance(chrono::Duration::seconds(400));
        cache.get("tenants/t/new.pdf").await.unwrap();
        clock.advance(chrono::Duration::seconds(300));

        assert_eq!(cache.sweep_expired().await, 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn signing_failure_is_not_cached() {
        let (cache, storage, _) = cache(16);
        storage.set_fail_signing(true);
        assert!(matches!(
            cache.get("tenants/t/a.pdf").await,
            Err(AppError::Signer(_))
        ));
        assert!(cache.is_empty().await);
    }
}

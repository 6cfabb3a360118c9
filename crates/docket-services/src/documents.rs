//! Completion side of an upload: record confirmed objects in collections, keep
//! quota usage in step and clean up displaced objects.

use chrono::Utc;
use docket_core::models::{
    CollectionKey, ConfirmedUpload, DocumentCollection, NewFile, RemovedSlot, ReplacedObject, Slot,
    SlotPatch, SlotView,
};
use docket_core::validation::UploadPolicy;
use docket_core::AppError;
use docket_storage::keys::tenant_prefix;
use docket_storage::Storage;
use std::sync::Arc;
use std::time::Duration;

use crate::external::{sign_call, store_call};
use crate::ledger::{ensure_unrecorded, DocumentLedger};
use crate::quota::QuotaService;
use crate::url_cache::SignedUrlCache;

#[derive(Clone)]
pub struct DocumentService {
    ledger: Arc<DocumentLedger>,
    quota: Arc<QuotaService>,
    storage: Arc<dyn Storage>,
    url_cache: Arc<SignedUrlCache>,
    policy: UploadPolicy,
    key_prefix: String,
    download_ttl: Duration,
    store_timeout: Duration,
}

impl DocumentService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<DocumentLedger>,
        quota: Arc<QuotaService>,
        storage: Arc<dyn Storage>,
        url_cache: Arc<SignedUrlCache>,
        policy: UploadPolicy,
        key_prefix: impl Into<String>,
        download_ttl: Duration,
        store_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            quota,
            storage,
            url_cache,
            policy,
            key_prefix: key_prefix.into(),
            download_ttl,
            store_timeout,
        }
    }

    /// Record a completed upload as a new slot at the end of the collection.
    ///
    /// An object that is already recorded in the collection is rejected; replace
    /// it through its index instead.
    #[tracing::instrument(skip(self, key, upload), fields(tenant_id = %key.tenant_id, category = %key.category, key = %upload.storage_key))]
    pub async fn confirm_append(
        &self,
        key: &CollectionKey,
        upload: ConfirmedUpload,
    ) -> Result<DocumentCollection, AppError> {
        let file = NewFile {
            storage_key: upload.storage_key,
            size_bytes: upload.size_bytes,
        };
        self.verify_uploaded(key, &file).await?;

        if let Some(current) = self.ledger.fetch(key).await? {
            ensure_unrecorded(&current.slots, &file.storage_key, None)?;
        }

        let charged = self.charge(key, file.size_bytes).await?;

        let slot = Slot::new(upload.title, upload.year, Some(file.clone()), Utc::now());
        match self.ledger.upsert_append(key, slot).await {
            Ok(collection) => Ok(collection),
            Err(e) => {
                self.adjust(key, &file.storage_key, -signed(charged), "refund after failed write")
                    .await;
                Err(e)
            }
        }
    }

    /// Write the slot at `index`.
    ///
    /// With a file, usage moves by the net difference between the new object and
    /// the one it displaces, which is then uncached and deleted. Only growth is
    /// checked against the ceiling. Without a file only title and year change
    /// and neither quota nor storage is touched.
    #[tracing::instrument(skip(self, key, title, year, new_file), fields(tenant_id = %key.tenant_id, category = %key.category))]
    pub async fn confirm_at_index(
        &self,
        key: &CollectionKey,
        index: usize,
        title: impl Into<String>,
        year: Option<String>,
        new_file: Option<NewFile>,
    ) -> Result<Option<ReplacedObject>, AppError> {
        let patch = SlotPatch {
            title: title.into(),
            year,
            new_file,
        };

        let Some(file) = patch.new_file.clone() else {
            return self.ledger.upsert_at_index(key, index, patch).await;
        };

        self.verify_uploaded(key, &file).await?;

        let mut expected_displaced = 0;
        if let Some(current) = self.ledger.fetch(key).await? {
            ensure_unrecorded(&current.slots, &file.storage_key, Some(index))?;
            if let Some(old) = current.slots.get(index).filter(|s| s.file_key().is_some()) {
                expected_displaced = old.size_bytes;
            }
        }
        let charged = self
            .charge(key, file.size_bytes.saturating_sub(expected_displaced))
            .await?;

        let replaced = match self.ledger.upsert_at_index(key, index, patch).await {
            Ok(replaced) => replaced,
            Err(e) => {
                self.adjust(key, &file.storage_key, -signed(charged), "refund after failed write")
                    .await;
                return Err(e);
            }
        };

        // The slot may have changed between the lookup and the write.
        let displaced = replaced.as_ref().map_or(0, |old| old.size_bytes);
        let settled = signed(file.size_bytes) - signed(displaced);
        self.adjust(
            key,
            &file.storage_key,
            settled.saturating_sub(signed(charged)),
            "settle replacement",
        )
        .await;

        if let Some(old) = &replaced {
            self.discard(key, &old.storage_key, Some(&file.storage_key)).await;
        }

        Ok(replaced)
    }

    /// Remove the slot at `index` and release its object.
    #[tracing::instrument(skip(self, key), fields(tenant_id = %key.tenant_id, category = %key.category))]
    pub async fn remove(
        &self,
        key: &CollectionKey,
        index: usize,
    ) -> Result<Option<RemovedSlot>, AppError> {
        let removed = self.ledger.remove_at_index(key, index).await?;
        if let Some(slot) = &removed {
            self.adjust(
                key,
                &slot.storage_key,
                -signed(slot.size_bytes),
                "release removed object",
            )
            .await;
            self.discard(key, &slot.storage_key, None).await;
        }
        Ok(removed)
    }

    /// Every position of the collection with its view URL resolved. Gaps and
    /// slots without a file have no URL.
    #[tracing::instrument(skip(self, key), fields(tenant_id = %key.tenant_id, category = %key.category))]
    pub async fn list_with_urls(&self, key: &CollectionKey) -> Result<Vec<SlotView>, AppError> {
        let Some(collection) = self.ledger.fetch(key).await? else {
            return Ok(Vec::new());
        };

        let mut views = Vec::with_capacity(collection.slots.len());
        for (index, slot) in collection.slots.iter().enumerate() {
            let view_url = match slot.and_then(Slot::file_key) {
                Some(storage_key) => Some(self.url_cache.get(storage_key).await?),
                None => None,
            };
            views.push(SlotView {
                index,
                slot: slot.cloned(),
                view_url,
            });
        }
        Ok(views)
    }

    /// Signed download link that saves the object as `filename`. Never cached.
    #[tracing::instrument(skip(self))]
    pub async fn download_url(&self, storage_key: &str, filename: &str) -> Result<String, AppError> {
        sign_call(
            self.store_timeout,
            "download url signing",
            self.storage
                .presigned_download_url(storage_key, self.download_ttl, filename),
        )
        .await
    }

    /// The confirmed key must lie under the tenant's prefix, and the stored
    /// object must match the declared size and the category's size limit.
    async fn verify_uploaded(&self, key: &CollectionKey, file: &NewFile) -> Result<(), AppError> {
        let prefix = tenant_prefix(&self.key_prefix, key.tenant_id);
        if !file.storage_key.starts_with(&prefix) {
            return Err(AppError::Validation(format!(
                "Storage key {} does not belong to tenant {}",
                file.storage_key, key.tenant_id
            )));
        }

        let stored = store_call(
            self.store_timeout,
            "object lookup",
            self.storage.object_size(&file.storage_key),
        )
        .await?;
        let Some(stored) = stored else {
            return Err(AppError::NotFound(format!(
                "Uploaded object {}",
                file.storage_key
            )));
        };

        if stored != file.size_bytes {
            return Err(AppError::Validation(format!(
                "Object {} holds {} bytes but {} were declared",
                file.storage_key, stored, file.size_bytes
            )));
        }
        self.policy.validate_size(&key.category, stored)?;
        Ok(())
    }

    /// Charge `bytes` against the ceiling; returns what was charged.
    async fn charge(&self, key: &CollectionKey, bytes: u64) -> Result<u64, AppError> {
        if bytes == 0 {
            return Ok(0);
        }
        let delta = i64::try_from(bytes)
            .map_err(|_| AppError::Validation(format!("Byte count {} is out of range", bytes)))?;
        self.quota.commit_delta(key.tenant_id, delta).await?;
        Ok(bytes)
    }

    /// Apply a usage correction after the ledger has moved on. Failures are
    /// logged; the next reconciliation repairs the account.
    async fn adjust(&self, key: &CollectionKey, storage_key: &str, delta: i64, reason: &str) {
        if delta == 0 {
            return;
        }
        if let Err(e) = self.quota.commit_delta(key.tenant_id, delta).await {
            tracing::error!(
                tenant_id = %key.tenant_id,
                key = %storage_key,
                delta,
                reason,
                error = %e,
                "Failed to adjust usage"
            );
        }
    }

    /// Uncache and delete an object the ledger no longer references.
    ///
    /// `keep_key` is the object that took its place; when both are the same
    /// object (a fixed-name re-upload) it is not deleted.
    async fn discard(&self, key: &CollectionKey, storage_key: &str, keep_key: Option<&str>) {
        self.url_cache.invalidate(storage_key).await;

        if keep_key == Some(storage_key) {
            tracing::debug!(key = %storage_key, "Object overwritten in place");
            return;
        }

        let deleted = store_call(
            self.store_timeout,
            "object delete",
            self.storage.delete(storage_key),
        )
        .await;
        match deleted {
            Ok(()) => tracing::info!(key = %storage_key, "Displaced object deleted"),
            Err(e) => tracing::error!(
                tenant_id = %key.tenant_id,
                key = %storage_key,
                error = %e,
                "Failed to delete displaced object; object is orphaned"
            ),
        }
    }
}

/// Byte count as a signed delta, saturating at `i64::MAX`.
fn signed(bytes: u64) -> i64 {
    i64::try_from(bytes).unwrap_or(i64::MAX)
}

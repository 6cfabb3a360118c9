//! In-memory repository implementations
//!
//! Same conditional-write semantics as the PostgreSQL repositories, without a
//! database. Used by tests and local development.

use async_trait::async_trait;
use chrono::Utc;
use docket_core::models::{
    Category, CollectionKey, DocumentCollection, OwnerRef, QuotaAccount, SlotSequence,
};
use docket_core::AppError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::documents::DocumentRepository;
use super::quota::QuotaRepository;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// In-memory document repository
#[derive(Clone, Default)]
pub struct MemoryDocumentRepository {
    collections: Arc<Mutex<HashMap<CollectionKey, DocumentCollection>>>,
    /// Number of upcoming writes that lose a simulated race.
    injected_conflicts: Arc<AtomicUsize>,
    write_attempts: Arc<AtomicUsize>,
}

impl MemoryDocumentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` conditional writes behave as if another writer
    /// committed first: the stored version is bumped and the write is refused.
    pub fn inject_conflicts(&self, count: usize) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }

    /// Total conditional writes attempted (inserts and updates).
    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl DocumentRepository for MemoryDocumentRepository {
    async fn find(&self, key: &CollectionKey) -> Result<Option<DocumentCollection>, AppError> {
        Ok(lock(&self.collections).get(key).cloned())
    }

    async fn find_all(
        &self,
        tenant_id: Uuid,
        category: Option<&Category>,
        owner_ref: Option<&OwnerRef>,
    ) -> Result<Vec<DocumentCollection>, AppError> {
        let mut found: Vec<DocumentCollection> = lock(&self.collections)
            .values()
            .filter(|c| c.key.tenant_id == tenant_id)
            .filter(|c| category.is_none_or(|cat| &c.key.category == cat))
            .filter(|c| owner_ref.is_none_or(|owner| c.key.owner_ref.as_ref() == Some(owner)))
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            (a.key.category.as_str(), a.key.owner_ref.as_ref().map(|o| o.to_string())).cmp(&(
                b.key.category.as_str(),
                b.key.owner_ref.as_ref().map(|o| o.to_string()),
            ))
        });
        Ok(found)
    }

    async fn insert(
        &self,
        key: &CollectionKey,
        slots: &SlotSequence,
    ) -> Result<Option<DocumentCollection>, AppError> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        let mut collections = lock(&self.collections);
        if self.take_injected_conflict() || collections.contains_key(key) {
            return Ok(None);
        }

        let now = Utc::now();
        let collection = DocumentCollection {
            id: Uuid::new_v4(),
            key: key.clone(),
            slots: slots.clone(),
            version: 1,
            created_at: now,
            updated_at: now,
        };
        collections.insert(key.clone(), collection.clone());
        Ok(Some(collection))
    }

    async fn update_if_version(
        &self,
        id: Uuid,
        expected_version: i64,
        slots: &SlotSequence,
    ) -> Result<Option<DocumentCollection>, AppError> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        let mut collections = lock(&self.collections);
        let Some(collection) = collections.values_mut().find(|c| c.id == id) else {
            return Ok(None);
        };

        if self.take_injected_conflict() {
            collection.version += 1;
            collection.updated_at = Utc::now();
            return Ok(None);
        }

        if collection.version != expected_version {
            return Ok(None);
        }

        collection.slots = slots.clone();
        collection.version += 1;
        collection.updated_at = Utc::now();
        Ok(Some(collection.clone()))
    }
}

/// In-memory quota repository
#[derive(Clone, Default)]
pub struct MemoryQuotaRepository {
    accounts: Arc<Mutex<HashMap<Uuid, QuotaAccount>>>,
}

impl MemoryQuotaRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an account with explicit usage.
    pub fn with_account(self, tenant_id: Uuid, total_bytes: u64, used_bytes: u64) -> Self {
        lock(&self.accounts).insert(
            tenant_id,
            QuotaAccount {
                tenant_id,
                total_bytes,
                used_bytes,
                updated_at: Utc::now(),
            },
        );
        self
    }

    fn update<F>(&self, tenant_id: Uuid, apply: F) -> Option<QuotaAccount>
    where
        F: FnOnce(&mut QuotaAccount) -> bool,
    {
        let mut accounts = lock(&self.accounts);
        let account = accounts.get_mut(&tenant_id)?;
        if apply(account) {
            account.updated_at = Utc::now();
            Some(account.clone())
        } else {
            None
        }
    }
}

#[async_trait]
impl QuotaRepository for MemoryQuotaRepository {
    async fn get(&self, tenant_id: Uuid) -> Result<Option<QuotaAccount>, AppError> {
        Ok(lock(&self.accounts).get(&tenant_id).cloned())
    }

    async fn open(&self, tenant_id: Uuid, total_bytes: u64) -> Result<QuotaAccount, AppError> {
        Ok(lock(&self.accounts)
            .entry(tenant_id)
            .or_insert_with(|| QuotaAccount {
                tenant_id,
                total_bytes,
                used_bytes: 0,
                updated_at: Utc::now(),
            })
            .clone())
    }

    async fn set_total(
        &self,
        tenant_id: Uuid,
        total_bytes: u64,
    ) -> Result<Option<QuotaAccount>, AppError> {
        Ok(self.update(tenant_id, |account| {
            account.total_bytes = total_bytes;
            true
        }))
    }

    async fn set_used(
        &self,
        tenant_id: Uuid,
        used_bytes: u64,
    ) -> Result<Option<QuotaAccount>, AppError> {
        Ok(self.update(tenant_id, |account| {
            account.used_bytes = used_bytes;
            true
        }))
    }

    async fn increment_within_ceiling(
        &self,
        tenant_id: Uuid,
        bytes: u64,
    ) -> Result<Option<QuotaAccount>, AppError> {
        Ok(self.update(tenant_id, |account| {
            if account.fits(bytes) {
                account.used_bytes += bytes;
                true
            } else {
                false
            }
        }))
    }

    async fn decrement_clamped(
        &self,
        tenant_id: Uuid,
        bytes: u64,
    ) -> Result<Option<QuotaAccount>, AppError> {
        Ok(self.update(tenant_id, |account| {
            account.used_bytes = account.used_bytes.saturating_sub(bytes);
            true
        }))
    }

    async fn list_tenant_ids(&self) -> Result<Vec<Uuid>, AppError> {
        let mut ids: Vec<Uuid> = lock(&self.accounts).keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

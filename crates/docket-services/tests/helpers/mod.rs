//! Test helpers: wire the services over in-memory repositories and storage.
//!
//! Run from workspace root: `cargo test -p docket-services`.

#![allow(dead_code)]

use docket_core::constants::MIB;
use docket_core::models::{Category, CollectionKey, ConfirmedUpload, NewFile, OwnerRef};
use docket_core::validation::UploadPolicy;
use docket_db::{MemoryDocumentRepository, MemoryQuotaRepository};
use docket_services::{
    DocumentLedger, DocumentService, QuotaService, SignedUrlCache, Storage, UploadGrantService,
};
use docket_storage::MemoryStorage;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const KEY_PREFIX: &str = "test/";
pub const VIEW_TTL: Duration = Duration::from_secs(600);
pub const UPLOAD_TTL: Duration = Duration::from_secs(60);
pub const STORE_TIMEOUT: Duration = Duration::from_millis(200);

/// Profile photos up to 1 MiB, documents up to 200 MiB.
pub fn policy() -> UploadPolicy {
    UploadPolicy::new(MIB, 200 * MIB, vec!["application/pdf".to_string()])
}

/// Every service of one tenant, sharing the same fakes.
pub struct TestServices {
    pub tenant_id: Uuid,
    pub storage: MemoryStorage,
    pub documents_repo: MemoryDocumentRepository,
    pub quota_repo: MemoryQuotaRepository,
    pub quota: Arc<QuotaService>,
    pub url_cache: Arc<SignedUrlCache>,
    pub uploads: UploadGrantService,
    pub documents: DocumentService,
}

impl TestServices {
    /// Services for a fresh tenant with the given ceiling and usage.
    pub fn new(total_bytes: u64, used_bytes: u64) -> Self {
        let tenant_id = Uuid::new_v4();
        let storage = MemoryStorage::new();
        let quota_repo =
            MemoryQuotaRepository::new().with_account(tenant_id, total_bytes, used_bytes);
        Self::build(tenant_id, Arc::new(storage.clone()), storage, quota_repo)
    }

    /// Same wiring over an arbitrary storage backend; `storage` fakes are unused.
    pub fn with_storage(backend: Arc<dyn Storage>, total_bytes: u64) -> Self {
        let tenant_id = Uuid::new_v4();
        let quota_repo = MemoryQuotaRepository::new().with_account(tenant_id, total_bytes, 0);
        Self::build(tenant_id, backend, MemoryStorage::new(), quota_repo)
    }

    fn build(
        tenant_id: Uuid,
        backend: Arc<dyn Storage>,
        storage: MemoryStorage,
        quota_repo: MemoryQuotaRepository,
    ) -> Self {
        let documents_repo = MemoryDocumentRepository::new();

        let quota = Arc::new(QuotaService::new(
            Arc::new(quota_repo.clone()),
            backend.clone(),
            KEY_PREFIX,
            STORE_TIMEOUT,
        ));
        let url_cache = Arc::new(SignedUrlCache::new(
            backend.clone(),
            128,
            VIEW_TTL,
            STORE_TIMEOUT,
        ));
        let ledger = Arc::new(DocumentLedger::new(Arc::new(documents_repo.clone()), 5));

        let uploads = UploadGrantService::new(
            quota.clone(),
            backend.clone(),
            policy(),
            KEY_PREFIX,
            UPLOAD_TTL,
            STORE_TIMEOUT,
        );
        let documents = DocumentService::new(
            ledger,
            quota.clone(),
            backend,
            url_cache.clone(),
            policy(),
            KEY_PREFIX,
            VIEW_TTL,
            STORE_TIMEOUT,
        );

        Self {
            tenant_id,
            storage,
            documents_repo,
            quota_repo,
            quota,
            url_cache,
            uploads,
            documents,
        }
    }

    pub fn collection(&self, category: &str, student: &str) -> CollectionKey {
        CollectionKey::new(
            self.tenant_id,
            Category::document(category).unwrap(),
            Some(OwnerRef::student(student).unwrap()),
        )
    }

    pub fn object_key(&self, name: &str) -> String {
        format!("{}tenants/{}/{}", KEY_PREFIX, self.tenant_id, name)
    }

    /// Simulate a client upload and return the file to confirm.
    pub fn uploaded(&self, name: &str, size_bytes: u64) -> NewFile {
        let storage_key = self.object_key(name);
        self.storage.put_object(&storage_key, size_bytes);
        NewFile {
            storage_key,
            size_bytes,
        }
    }

    pub fn confirmed(&self, title: &str, name: &str, size_bytes: u64) -> ConfirmedUpload {
        let file = self.uploaded(name, size_bytes);
        ConfirmedUpload {
            title: title.to_string(),
            year: None,
            storage_key: file.storage_key,
            size_bytes: file.size_bytes,
        }
    }

    pub async fn used_bytes(&self) -> u64 {
        self.quota.get(self.tenant_id).await.unwrap().used_bytes
    }
}

//! Document collection repository: versioned slot sequences per (tenant, category, owner).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docket_core::models::{Category, CollectionKey, DocumentCollection, OwnerRef, SlotSequence};
use docket_core::AppError;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

/// Persistence for document collections.
///
/// Writes are conditional: `insert` only succeeds when no collection exists for
/// the key, `update_if_version` only when the stored version still matches. A
/// `None` result means another writer got there first.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn find(&self, key: &CollectionKey) -> Result<Option<DocumentCollection>, AppError>;

    /// Collections of a tenant, optionally narrowed by category and/or owner.
    async fn find_all(
        &self,
        tenant_id: Uuid,
        category: Option<&Category>,
        owner_ref: Option<&OwnerRef>,
    ) -> Result<Vec<DocumentCollection>, AppError>;

    /// Create a collection. Returns `None` if one already exists for `key`.
    async fn insert(
        &self,
        key: &CollectionKey,
        slots: &SlotSequence,
    ) -> Result<Option<DocumentCollection>, AppError>;

    /// Replace the slots of collection `id` if its version is still `expected_version`.
    async fn update_if_version(
        &self,
        id: Uuid,
        expected_version: i64,
        slots: &SlotSequence,
    ) -> Result<Option<DocumentCollection>, AppError>;
}

/// Row type for document_collections table (for FromRow).
#[derive(Debug, sqlx::FromRow)]
pub struct DocumentCollectionRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub category: String,
    pub owner_ref: Option<String>,
    pub slots: Json<SlotSequence>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentCollectionRow {
    pub fn into_collection(self) -> Result<DocumentCollection, AppError> {
        let category = self.category.parse::<Category>().map_err(|e| {
            AppError::Store(format!(
                "Collection {} has an unreadable category: {}",
                self.id, e
            ))
        })?;
        let owner_ref = self
            .owner_ref
            .map(|raw| raw.parse::<OwnerRef>())
            .transpose()
            .map_err(|e| {
                AppError::Store(format!(
                    "Collection {} has an unreadable owner: {}",
                    self.id, e
                ))
            })?;

        Ok(DocumentCollection {
            id: self.id,
            key: CollectionKey::new(self.tenant_id, category, owner_ref),
            slots: self.slots.0,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const COLUMNS: &str = "id, tenant_id, category, owner_ref, slots, version, created_at, updated_at";

/// PostgreSQL implementation of [`DocumentRepository`].
#[derive(Clone)]
pub struct PgDocumentRepository {
    pool: PgPool,
}

impl PgDocumentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentRepository for PgDocumentRepository {
    #[tracing::instrument(skip(self), fields(db.table = "document_collections", tenant_id = %key.tenant_id))]
    async fn find(&self, key: &CollectionKey) -> Result<Option<DocumentCollection>, AppError> {
        let owner_ref = key.owner_ref.as_ref().map(|o| o.to_string());
        let row: Option<DocumentCollectionRow> =
            sqlx::query_as::<Postgres, DocumentCollectionRow>(&format!(
                "SELECT {} FROM document_collections \
                 WHERE tenant_id = $1 AND category = $2 AND owner_ref IS NOT DISTINCT FROM $3",
                COLUMNS
            ))
            .bind(key.tenant_id)
            .bind(key.category.as_str())
            .bind(owner_ref)
            .fetch_optional(&self.pool)
            .await?;

        row.map(DocumentCollectionRow::into_collection).transpose()
    }

    #[tracing::instrument(skip(self), fields(db.table = "document_collections"))]
    async fn find_all(
        &self,
        tenant_id: Uuid,
        category: Option<&Category>,
        owner_ref: Option<&OwnerRef>,
    ) -> Result<Vec<DocumentCollection>, AppError> {
        let rows: Vec<DocumentCollectionRow> =
            sqlx::query_as::<Postgres, DocumentCollectionRow>(&format!(
                "SELECT {} FROM document_collections \
                 WHERE tenant_id = $1 \
                   AND ($2::text IS NULL OR category = $2) \
                   AND ($3::text IS NULL OR owner_ref = $3) \
                 ORDER BY category, owner_ref NULLS FIRST",
                COLUMNS
            ))
            .bind(tenant_id)
            .bind(category.map(|c| c.as_str().to_string()))
            .bind(owner_ref.map(|o| o.to_string()))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(DocumentCollectionRow::into_collection)
            .collect()
    }

    #[tracing::instrument(skip(self, slots), fields(db.table = "document_collections", tenant_id = %key.tenant_id, slots = slots.len()))]
    async fn insert(
        &self,
        key: &CollectionKey,
        slots: &SlotSequence,
    ) -> Result<Option<DocumentCollection>, AppError> {
        let row: Option<DocumentCollectionRow> =
            sqlx::query_as::<Postgres, DocumentCollectionRow>(&format!(
                "INSERT INTO document_collections (tenant_id, category, owner_ref, slots) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT DO NOTHING \
                 RETURNING {}",
                COLUMNS
            ))
            .bind(key.tenant_id)
            .bind(key.category.as_str())
            .bind(key.owner_ref.as_ref().map(|o| o.to_string()))
            .bind(Json(slots))
            .fetch_optional(&self.pool)
            .await?;

        row.map(DocumentCollectionRow::into_collection).transpose()
    }

    #[tracing::instrument(skip(self, slots), fields(db.table = "document_collections", db.record_id = %id, slots = slots.len()))]
    async fn update_if_version(
        &self,
        id: Uuid,
        expected_version: i64,
        slots: &SlotSequence,
    ) -> Result<Option<DocumentCollection>, AppError> {
        let row: Option<DocumentCollectionRow> =
            sqlx::query_as::<Postgres, DocumentCollectionRow>(&format!(
                "UPDATE document_collections \
                 SET slots = $3, version = version + 1, updated_at = NOW() \
                 WHERE id = $1 AND version = $2 \
                 RETURNING {}",
                COLUMNS
            ))
            .bind(id)
            .bind(expected_version)
            .bind(Json(slots))
            .fetch_optional(&self.pool)
            .await?;

        row.map(DocumentCollectionRow::into_collection).transpose()
    }
}

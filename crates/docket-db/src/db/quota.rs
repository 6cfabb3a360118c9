//! Quota account repository: per-tenant storage ceiling and consumption.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docket_core::models::QuotaAccount;
use docket_core::AppError;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

/// Persistence for quota accounts.
///
/// Usage changes are single atomic statements: increments only apply while the
/// result stays within `total_bytes`, decrements clamp at zero.
#[async_trait]
pub trait QuotaRepository: Send + Sync {
    async fn get(&self, tenant_id: Uuid) -> Result<Option<QuotaAccount>, AppError>;

    /// Create the account if absent and return the stored account either way.
    async fn open(&self, tenant_id: Uuid, total_bytes: u64) -> Result<QuotaAccount, AppError>;

    async fn set_total(
        &self,
        tenant_id: Uuid,
        total_bytes: u64,
    ) -> Result<Option<QuotaAccount>, AppError>;

    async fn set_used(
        &self,
        tenant_id: Uuid,
        used_bytes: u64,
    ) -> Result<Option<QuotaAccount>, AppError>;

    /// Add `bytes` to usage unless that would exceed the ceiling.
    ///
    /// `None` when the account is missing or the ceiling would be crossed.
    async fn increment_within_ceiling(
        &self,
        tenant_id: Uuid,
        bytes: u64,
    ) -> Result<Option<QuotaAccount>, AppError>;

    /// Subtract `bytes` from usage, never going below zero. `None` when missing.
    async fn decrement_clamped(
        &self,
        tenant_id: Uuid,
        bytes: u64,
    ) -> Result<Option<QuotaAccount>, AppError>;

    async fn list_tenant_ids(&self) -> Result<Vec<Uuid>, AppError>;
}

/// Row type for quota_accounts table (for FromRow).
#[derive(Debug, sqlx::FromRow)]
pub struct QuotaAccountRow {
    pub tenant_id: Uuid,
    pub total_bytes: i64,
    pub used_bytes: i64,
    pub updated_at: DateTime<Utc>,
}

impl From<QuotaAccountRow> for QuotaAccount {
    fn from(row: QuotaAccountRow) -> Self {
        QuotaAccount {
            tenant_id: row.tenant_id,
            total_bytes: u64::try_from(row.total_bytes).unwrap_or(0),
            used_bytes: u64::try_from(row.used_bytes).unwrap_or(0),
            updated_at: row.updated_at,
        }
    }
}

fn to_db_bytes(bytes: u64) -> Result<i64, AppError> {
    i64::try_from(bytes)
        .map_err(|_| AppError::Validation(format!("Byte count {} is out of range", bytes)))
}

/// PostgreSQL implementation of [`QuotaRepository`].
#[derive(Clone)]
pub struct PgQuotaRepository {
    pool: PgPool,
}

impl PgQuotaRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuotaRepository for PgQuotaRepository {
    #[tracing::instrument(skip(self), fields(db.table = "quota_accounts"))]
    async fn get(&self, tenant_id: Uuid) -> Result<Option<QuotaAccount>, AppError> {
        let row: Option<QuotaAccountRow> = sqlx::query_as::<Postgres, QuotaAccountRow>(
            "SELECT tenant_id, total_bytes, used_bytes, updated_at FROM quota_accounts WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(QuotaAccount::from))
    }

    #[tracing::instrument(skip(self), fields(db.table = "quota_accounts"))]
    async fn open(&self, tenant_id: Uuid, total_bytes: u64) -> Result<QuotaAccount, AppError> {
        sqlx::query(
            r#"
            INSERT INTO quota_accounts (tenant_id, total_bytes, used_bytes)
            VALUES ($1, $2, 0)
            ON CONFLICT (tenant_id) DO NOTHING
            "#,
        )
        .bind(tenant_id)
        .bind(to_db_bytes(total_bytes)?)
        .execute(&self.pool)
        .await?;

        self.get(tenant_id).await?.ok_or_else(|| {
            AppError::Internal(format!("Quota account {} vanished after insert", tenant_id))
        })
    }

    #[tracing::instrument(skip(self), fields(db.table = "quota_accounts"))]
    async fn set_total(
        &self,
        tenant_id: Uuid,
        total_bytes: u64,
    ) -> Result<Option<QuotaAccount>, AppError> {
        let row: Option<QuotaAccountRow> = sqlx::query_as::<Postgres, QuotaAccountRow>(
            r#"
            UPDATE quota_accounts
            SET total_bytes = $2, updated_at = NOW()
            WHERE tenant_id = $1
            RETURNING tenant_id, total_bytes, used_bytes, updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(to_db_bytes(total_bytes)?)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(QuotaAccount::from))
    }

    #[tracing::instrument(skip(self), fields(db.table = "quota_accounts"))]
    async fn set_used(
        &self,
        tenant_id: Uuid,
        used_bytes: u64,
    ) -> Result<Option<QuotaAccount>, AppError> {
        let row: Option<QuotaAccountRow> = sqlx::query_as::<Postgres, QuotaAccountRow>(
            r#"
            UPDATE quota_accounts
            SET used_bytes = $2, updated_at = NOW()
            WHERE tenant_id = $1
            RETURNING tenant_id, total_bytes, used_bytes, updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(to_db_bytes(used_bytes)?)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(QuotaAccount::from))
    }

    #[tracing::instrument(skip(self), fields(db.table = "quota_accounts"))]
    async fn increment_within_ceiling(
        &self,
        tenant_id: Uuid,
        bytes: u64,
    ) -> Result<Option<QuotaAccount>, AppError> {
        let row: Option<QuotaAccountRow> = sqlx::query_as::<Postgres, QuotaAccountRow>(
            r#"
            UPDATE quota_accounts
            SET used_bytes = used_bytes + $2, updated_at = NOW()
            WHERE tenant_id = $1 AND used_bytes + $2 <= total_bytes
            RETURNING tenant_id, total_bytes, used_bytes, updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(to_db_bytes(bytes)?)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(QuotaAccount::from))
    }

    #[tracing::instrument(skip(self), fields(db.table = "quota_accounts"))]
    async fn decrement_clamped(
        &self,
        tenant_id: Uuid,
        bytes: u64,
    ) -> Result<Option<QuotaAccount>, AppError> {
        let row: Option<QuotaAccountRow> = sqlx::query_as::<Postgres, QuotaAccountRow>(
            r#"
            UPDATE quota_accounts
            SET used_bytes = GREATEST(used_bytes - $2, 0), updated_at = NOW()
            WHERE tenant_id = $1
            RETURNING tenant_id, total_bytes, used_bytes, updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(to_db_bytes(bytes)?)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(QuotaAccount::from))
    }

    #[tracing::instrument(skip(self), fields(db.table = "quota_accounts"))]
    async fn list_tenant_ids(&self) -> Result<Vec<Uuid>, AppError> {
        let ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT tenant_id FROM quota_accounts ORDER BY tenant_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }
}

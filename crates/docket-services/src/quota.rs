//! Per-tenant storage quota: pre-flight checks, atomic commits and
//! reconciliation against the object store.

use docket_core::models::{Plan, QuotaAccount};
use docket_core::AppError;
use docket_db::QuotaRepository;
use docket_storage::keys::tenant_prefix;
use docket_storage::Storage;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use uuid::Uuid;

use crate::external::store_call;

#[derive(Clone)]
pub struct QuotaService {
    repository: Arc<dyn QuotaRepository>,
    storage: Arc<dyn Storage>,
    key_prefix: String,
    store_timeout: Duration,
}

impl QuotaService {
    pub fn new(
        repository: Arc<dyn QuotaRepository>,
        storage: Arc<dyn Storage>,
        key_prefix: impl Into<String>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            repository,
            storage,
            key_prefix: key_prefix.into(),
            store_timeout,
        }
    }

    pub async fn get(&self, tenant_id: Uuid) -> Result<QuotaAccount, AppError> {
        self.repository
            .get(tenant_id)
            .await?
            .ok_or_else(|| missing_account(tenant_id))
    }

    /// Advisory pre-flight: fails with `QuotaExceeded` when `incoming_bytes`
    /// would not fit right now. Nothing is reserved; the ceiling is enforced
    /// again by [`QuotaService::commit_delta`].
    #[tracing::instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn check_and_reserve(
        &self,
        tenant_id: Uuid,
        incoming_bytes: u64,
    ) -> Result<QuotaAccount, AppError> {
        let account = self.get(tenant_id).await?;
        if !account.fits(incoming_bytes) {
            tracing::info!(
                requested = incoming_bytes,
                used = account.used_bytes,
                total = account.total_bytes,
                "Upload rejected by quota"
            );
            return Err(exceeded(&account, incoming_bytes));
        }
        Ok(account)
    }

    /// Apply a usage change.
    ///
    /// Positive deltas only apply while usage stays within the ceiling;
    /// negative deltas clamp at zero and never fail on the ceiling.
    #[tracing::instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn commit_delta(
        &self,
        tenant_id: Uuid,
        delta_bytes: i64,
    ) -> Result<QuotaAccount, AppError> {
        let bytes = delta_bytes.unsigned_abs();

        let account = if delta_bytes > 0 {
            match self
                .repository
                .increment_within_ceiling(tenant_id, bytes)
                .await?
            {
                Some(account) => account,
                None => {
                    // Either the account is missing or the ceiling was hit.
                    let current = self.get(tenant_id).await?;
                    tracing::info!(
                        requested = bytes,
                        used = current.used_bytes,
                        total = current.total_bytes,
                        "Usage commit rejected by quota"
                    );
                    return Err(exceeded(&current, bytes));
                }
            }
        } else if delta_bytes < 0 {
            self.repository
                .decrement_clamped(tenant_id, bytes)
                .await?
                .ok_or_else(|| missing_account(tenant_id))?
        } else {
            return self.get(tenant_id).await;
        };

        tracing::debug!(
            delta_bytes,
            used = account.used_bytes,
            total = account.total_bytes,
            "Usage committed"
        );
        Ok(account)
    }

    /// Create the account if it does not exist. An existing account is returned
    /// untouched.
    #[tracing::instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn open_account(
        &self,
        tenant_id: Uuid,
        total_bytes: u64,
    ) -> Result<QuotaAccount, AppError> {
        self.repository.open(tenant_id, total_bytes).await
    }

    #[tracing::instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn set_total(
        &self,
        tenant_id: Uuid,
        total_bytes: u64,
    ) -> Result<QuotaAccount, AppError> {
        let account = self
            .repository
            .set_total(tenant_id, total_bytes)
            .await?
            .ok_or_else(|| missing_account(tenant_id))?;
        tracing::info!(total = total_bytes, "Quota ceiling updated");
        Ok(account)
    }

    pub async fn assign_plan(&self, tenant_id: Uuid, plan: &Plan) -> Result<QuotaAccount, AppError> {
        tracing::info!(tenant_id = %tenant_id, plan = %plan.name, "Assigning plan");
        self.set_total(tenant_id, plan.total_bytes).await
    }

    /// Overwrite recorded usage with the aggregate size of the tenant's objects.
    #[tracing::instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn reconcile(&self, tenant_id: Uuid) -> Result<QuotaAccount, AppError> {
        let start = std::time::Instant::now();
        let prefix = tenant_prefix(&self.key_prefix, tenant_id);
        let actual = store_call(
            self.store_timeout,
            "prefix size",
            self.storage.prefix_size(&prefix),
        )
        .await?;

        let account = self
            .repository
            .set_used(tenant_id, actual)
            .await?
            .ok_or_else(|| missing_account(tenant_id))?;

        tracing::info!(
            used = account.used_bytes,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Usage reconciled"
        );
        Ok(account)
    }

    /// Reconcile every known tenant, continuing past individual failures.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_all(&self) -> Result<ReconcileSummary, AppError> {
        let tenant_ids = self.repository.list_tenant_ids().await?;
        let mut summary = ReconcileSummary::default();

        for tenant_id in tenant_ids {
            match self.reconcile(tenant_id).await {
                Ok(_) => summary.reconciled += 1,
                Err(e) => {
                    tracing::error!(tenant_id = %tenant_id, error = %e, "Failed to reconcile usage");
                    summary.failed.push(tenant_id);
                }
            }
        }

        Ok(summary)
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub reconciled: usize,
    pub failed: Vec<Uuid>,
}

/// Periodically recomputes every tenant's usage from the object store.
pub struct UsageReconciler {
    quota: Arc<QuotaService>,
    every: Duration,
}

impl UsageReconciler {
    pub fn new(quota: Arc<QuotaService>, every: Duration) -> Self {
        Self { quota, every }
    }

    /// Start the background reconciliation task.
    /// Returns a JoinHandle for graceful shutdown
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut reconcile_interval = interval(self.every);

            loop {
                reconcile_interval.tick().await;

                tracing::info!("Starting scheduled usage reconciliation");
                match self.run_once().await {
                    Ok(summary) => tracing::info!(
                        reconciled = summary.reconciled,
                        failed = summary.failed.len(),
                        "Usage reconciliation completed"
                    ),
                    Err(e) => tracing::error!(error = %e, "Usage reconciliation failed"),
                }
            }
        })
    }

    pub async fn run_once(&self) -> Result<ReconcileSummary, AppError> {
        self.quota.reconcile_all().await
    }
}

fn missing_account(tenant_id: Uuid) -> AppError {
    AppError::NotFound(format!("Quota account for tenant {}", tenant_id))
}

fn exceeded(account: &QuotaAccount, requested: u64) -> AppError {
    AppError::QuotaExceeded {
        tenant_id: account.tenant_id,
        requested,
        used: account.used_bytes,
        total: account.total_bytes,
    }
}

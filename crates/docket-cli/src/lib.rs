//! Wiring shared by the `docket` binary: configuration, connections and the
//! service graph.

use anyhow::{Context, Result};
use docket_core::models::{Category, CollectionKey, OwnerRef};
use docket_core::validation::UploadPolicy;
use docket_core::{AppError, Config};
use docket_db::{PgDocumentRepository, PgQuotaRepository};
use docket_services::{
    create_storage, DocumentLedger, DocumentService, QuotaService, SignedUrlCache,
    UploadGrantService, UsageReconciler,
};
use std::sync::Arc;
use uuid::Uuid;

/// Every service, built once from configuration.
pub struct AppContext {
    pub config: Config,
    pub ledger: Arc<DocumentLedger>,
    pub quota: Arc<QuotaService>,
    pub url_cache: Arc<SignedUrlCache>,
    pub uploads: UploadGrantService,
    pub documents: DocumentService,
}

impl AppContext {
    pub async fn from_config(config: Config) -> Result<Self> {
        let pool = docket_db::connect(&config).await?;
        let storage = create_storage(&config)
            .await
            .context("Failed to initialize storage backend")?;

        let key_prefix = config.storage_key_prefix();
        let store_timeout = config.object_store_timeout();

        let ledger = Arc::new(DocumentLedger::new(
            Arc::new(PgDocumentRepository::new(pool.clone())),
            config.ledger_max_write_attempts(),
        ));
        let quota = Arc::new(QuotaService::new(
            Arc::new(PgQuotaRepository::new(pool.clone())),
            storage.clone(),
            key_prefix.clone(),
            store_timeout,
        ));
        let url_cache = Arc::new(SignedUrlCache::new(
            storage.clone(),
            config.url_cache_capacity(),
            config.view_url_ttl(),
            store_timeout,
        ));
        let policy = UploadPolicy::from_config(&config);
        let uploads = UploadGrantService::new(
            quota.clone(),
            storage.clone(),
            policy.clone(),
            key_prefix.clone(),
            config.upload_url_ttl(),
            store_timeout,
        );
        let documents = DocumentService::new(
            ledger.clone(),
            quota.clone(),
            storage,
            url_cache.clone(),
            policy,
            key_prefix,
            config.view_url_ttl(),
            store_timeout,
        );

        Ok(Self {
            config,
            ledger,
            quota,
            url_cache,
            uploads,
            documents,
        })
    }

    /// Start the configured background tasks: usage reconciliation and the
    /// view URL sweep. Disabled tasks are skipped.
    pub fn start_background_tasks(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        if let Some(every) = self.config.usage_reconcile_interval() {
            let reconciler = Arc::new(UsageReconciler::new(self.quota.clone(), every));
            handles.push(reconciler.start());
            tracing::info!(interval_secs = every.as_secs(), "Usage reconciler started");
        }

        if let Some(every) = self.config.url_cache_sweep_interval() {
            handles.push(self.url_cache.clone().start_sweeper(every));
            tracing::info!(interval_secs = every.as_secs(), "View URL sweeper started");
        }

        handles
    }
}

/// Build a collection key from command-line arguments.
pub fn collection_key(
    tenant_id: Uuid,
    category: &str,
    owner: Option<&str>,
) -> Result<CollectionKey, AppError> {
    let category = category.parse::<Category>()?;
    let owner_ref = owner.map(str::parse::<OwnerRef>).transpose()?;
    Ok(CollectionKey::new(tenant_id, category, owner_ref))
}

/// Parse a byte size such as `512`, `20MiB` or `5GiB`.
pub fn parse_byte_size(raw: &str) -> Result<u64, String> {
    const UNITS: [(&str, u64); 4] = [
        ("GiB", docket_core::constants::GIB),
        ("MiB", docket_core::constants::MIB),
        ("KiB", 1024),
        ("B", 1),
    ];

    let raw = raw.trim();
    let (digits, multiplier) = UNITS
        .iter()
        .find_map(|(suffix, mult)| raw.strip_suffix(suffix).map(|d| (d.trim(), *mult)))
        .unwrap_or((raw, 1));

    digits
        .parse::<u64>()
        .map_err(|_| format!("Invalid byte size: {}", raw))?
        .checked_mul(multiplier)
        .ok_or_else(|| format!("Byte size out of range: {}", raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use docket_core::constants::{GIB, MIB};

    #[test]
    fn byte_sizes() {
        assert_eq!(parse_byte_size("512").unwrap(), 512);
        assert_eq!(parse_byte_size("20MiB").unwrap(), 20 * MIB);
        assert_eq!(parse_byte_size(" 5 GiB").unwrap(), 5 * GIB);
        assert_eq!(parse_byte_size("3KiB").unwrap(), 3072);
        assert!(parse_byte_size("lots").is_err());
        assert!(parse_byte_size("99999999999GiB").is_err());
    }

    #[test]
    fn collection_keys() {
        let tenant = Uuid::new_v4();
        let key = collection_key(tenant, "profile_photo", Some("T_9")).unwrap();
        assert_eq!(key.category, Category::ProfilePhoto);
        assert_eq!(key.owner_ref, Some(OwnerRef::Teacher("9".to_string())));

        let key = collection_key(tenant, "certificates", None).unwrap();
        assert!(key.owner_ref.is_none());

        assert!(collection_key(tenant, "bad name", None).is_err());
        assert!(collection_key(tenant, "ids", Some("X_1")).is_err());
    }
}

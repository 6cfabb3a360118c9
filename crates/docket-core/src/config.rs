//! Configuration module
//!
//! This module provides the configuration structures for Docket services and the
//! operator CLI: database, object storage, signed URL lifetimes, cache bounds and
//! upload limits. Values come from the environment (optionally a `.env` file).

use std::env;
use std::time::Duration;

use crate::constants::{MIB, NON_PRODUCTION_KEY_PREFIX, UPLOAD_URL_TTL_SECS, VIEW_URL_TTL_SECS};
use crate::storage_types::StorageBackend;

// Common constants
const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const OBJECT_STORE_TIMEOUT_SECS: u64 = 10;
const URL_CACHE_CAPACITY: usize = 10_000;
const URL_CACHE_SWEEP_INTERVAL_SECS: u64 = 60;
const LEDGER_MAX_WRITE_ATTEMPTS: u32 = 5;
const USAGE_RECONCILE_INTERVAL_SECS: u64 = 86_400;

/// Base configuration shared by every binary
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub environment: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
}

impl BaseConfig {
    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }
}

/// Docket configuration
#[derive(Clone, Debug)]
pub struct DocketConfig {
    pub base: BaseConfig,
    pub database_url: String,
    // Storage configuration
    pub storage_backend: Option<StorageBackend>,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>, // Custom endpoint for S3-compatible providers (MinIO, etc.)
    pub aws_region: Option<String>,
    pub local_storage_path: Option<String>,
    pub local_storage_base_url: Option<String>,
    pub local_signing_secret: Option<String>,
    /// Overrides the environment-derived key prefix when set (may be empty).
    pub storage_key_prefix: Option<String>,
    pub object_store_timeout_secs: u64,
    // Signed URLs
    pub upload_url_ttl_secs: u64,
    pub view_url_ttl_secs: u64,
    pub url_cache_capacity: usize,
    /// 0 = no background sweep.
    pub url_cache_sweep_interval_secs: u64,
    // Upload limits
    pub max_profile_photo_size_bytes: u64,
    pub max_document_size_bytes: u64,
    pub document_allowed_content_types: Vec<String>,
    // Ledger / quota
    pub ledger_max_write_attempts: u32,
    /// 0 = reconciler disabled.
    pub usage_reconcile_interval_secs: u64,
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Box<DocketConfig>);

impl Config {
    fn inner(&self) -> &DocketConfig {
        &self.0
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        self.inner().base.is_production()
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config = DocketConfig::from_env()?;
        Ok(Config(Box::new(config)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.inner().validate()
    }

    pub fn environment(&self) -> &str {
        &self.inner().base.environment
    }

    pub fn database_url(&self) -> &str {
        &self.inner().database_url
    }

    pub fn db_max_connections(&self) -> u32 {
        self.inner().base.db_max_connections
    }

    pub fn db_timeout_seconds(&self) -> u64 {
        self.inner().base.db_timeout_seconds
    }

    pub fn storage_backend(&self) -> Option<StorageBackend> {
        self.inner().storage_backend
    }

    pub fn s3_bucket(&self) -> Option<&str> {
        self.inner().s3_bucket.as_deref()
    }

    /// S3 region, falling back to `AWS_REGION`.
    pub fn s3_region(&self) -> Option<&str> {
        self.inner()
            .s3_region
            .as_deref()
            .or(self.inner().aws_region.as_deref())
    }

    pub fn s3_endpoint(&self) -> Option<&str> {
        self.inner().s3_endpoint.as_deref()
    }

    pub fn local_storage_path(&self) -> Option<&str> {
        self.inner().local_storage_path.as_deref()
    }

    pub fn local_storage_base_url(&self) -> Option<&str> {
        self.inner().local_storage_base_url.as_deref()
    }

    pub fn local_signing_secret(&self) -> Option<&str> {
        self.inner().local_signing_secret.as_deref()
    }

    /// Prefix prepended to every derived storage key.
    ///
    /// Empty in production and `test/` elsewhere unless `STORAGE_KEY_PREFIX` is set.
    pub fn storage_key_prefix(&self) -> String {
        match &self.inner().storage_key_prefix {
            Some(prefix) => prefix.clone(),
            None if self.is_production() => String::new(),
            None => NON_PRODUCTION_KEY_PREFIX.to_string(),
        }
    }

    pub fn object_store_timeout(&self) -> Duration {
        Duration::from_secs(self.inner().object_store_timeout_secs)
    }

    pub fn upload_url_ttl(&self) -> Duration {
        Duration::from_secs(self.inner().upload_url_ttl_secs)
    }

    pub fn view_url_ttl(&self) -> Duration {
        Duration::from_secs(self.inner().view_url_ttl_secs)
    }

    pub fn url_cache_capacity(&self) -> usize {
        self.inner().url_cache_capacity
    }

    pub fn url_cache_sweep_interval(&self) -> Option<Duration> {
        match self.inner().url_cache_sweep_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn max_profile_photo_size_bytes(&self) -> u64 {
        self.inner().max_profile_photo_size_bytes
    }

    pub fn max_document_size_bytes(&self) -> u64 {
        self.inner().max_document_size_bytes
    }

    pub fn document_allowed_content_types(&self) -> &[String] {
        &self.inner().document_allowed_content_types
    }

    pub fn ledger_max_write_attempts(&self) -> u32 {
        self.inner().ledger_max_write_attempts
    }

    pub fn usage_reconcile_interval(&self) -> Option<Duration> {
        match self.inner().usage_reconcile_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl DocketConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        const MAX_PROFILE_PHOTO_SIZE_MB: u64 = 1;
        const MAX_DOCUMENT_SIZE_MB: u64 = 50;

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let base = BaseConfig {
            environment,
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| MAX_CONNECTIONS.to_string())
                .parse()
                .unwrap_or(MAX_CONNECTIONS),
            db_timeout_seconds: env::var("DB_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| CONNECTION_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(CONNECTION_TIMEOUT_SECS),
        };

        let storage_backend = match env::var("STORAGE_BACKEND") {
            Ok(value) => Some(value.parse::<StorageBackend>()?),
            Err(_) => None,
        };

        let max_profile_photo_size_mb = env::var("MAX_PROFILE_PHOTO_SIZE_MB")
            .unwrap_or_else(|_| MAX_PROFILE_PHOTO_SIZE_MB.to_string())
            .parse::<u64>()
            .unwrap_or(MAX_PROFILE_PHOTO_SIZE_MB);

        let max_document_size_mb = env::var("MAX_DOCUMENT_SIZE_MB")
            .unwrap_or_else(|_| MAX_DOCUMENT_SIZE_MB.to_string())
            .parse::<u64>()
            .unwrap_or(MAX_DOCUMENT_SIZE_MB);

        let document_allowed_content_types = env::var("DOCUMENT_ALLOWED_CONTENT_TYPES")
            .unwrap_or_else(|_| "image/*,application/pdf".to_string())
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        let config = DocketConfig {
            base,
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            storage_backend,
            s3_bucket: env::var("S3_BUCKET").ok(),
            s3_region: env::var("S3_REGION").ok(),
            s3_endpoint: env::var("S3_ENDPOINT").ok(),
            aws_region: env::var("AWS_REGION").ok(),
            local_storage_path: env::var("LOCAL_STORAGE_PATH").ok(),
            local_storage_base_url: env::var("LOCAL_STORAGE_BASE_URL").ok(),
            local_signing_secret: env::var("LOCAL_SIGNING_SECRET").ok(),
            storage_key_prefix: env::var("STORAGE_KEY_PREFIX").ok(),
            object_store_timeout_secs: env::var("OBJECT_STORE_TIMEOUT_SECS")
                .unwrap_or_else(|_| OBJECT_STORE_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(OBJECT_STORE_TIMEOUT_SECS),
            upload_url_ttl_secs: env::var("UPLOAD_URL_TTL_SECS")
                .unwrap_or_else(|_| UPLOAD_URL_TTL_SECS.to_string())
                .parse()
                .unwrap_or(UPLOAD_URL_TTL_SECS),
            view_url_ttl_secs: env::var("VIEW_URL_TTL_SECS")
                .unwrap_or_else(|_| VIEW_URL_TTL_SECS.to_string())
                .parse()
                .unwrap_or(VIEW_URL_TTL_SECS),
            url_cache_capacity: env::var("URL_CACHE_CAPACITY")
                .unwrap_or_else(|_| URL_CACHE_CAPACITY.to_string())
                .parse()
                .unwrap_or(URL_CACHE_CAPACITY),
            url_cache_sweep_interval_secs: env::var("URL_CACHE_SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| URL_CACHE_SWEEP_INTERVAL_SECS.to_string())
                .parse()
                .unwrap_or(URL_CACHE_SWEEP_INTERVAL_SECS),
            max_profile_photo_size_bytes: max_profile_photo_size_mb * MIB,
            max_document_size_bytes: max_document_size_mb * MIB,
            document_allowed_content_types,
            ledger_max_write_attempts: env::var("LEDGER_MAX_WRITE_ATTEMPTS")
                .unwrap_or_else(|_| LEDGER_MAX_WRITE_ATTEMPTS.to_string())
                .parse()
                .unwrap_or(LEDGER_MAX_WRITE_ATTEMPTS),
            usage_reconcile_interval_secs: env::var("USAGE_RECONCILE_INTERVAL_SECS")
                .unwrap_or_else(|_| USAGE_RECONCILE_INTERVAL_SECS.to_string())
                .parse()
                .unwrap_or(USAGE_RECONCILE_INTERVAL_SECS),
        };

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.database_url.trim().is_empty() {
            return Err(anyhow::anyhow!("DATABASE_URL cannot be empty"));
        }

        if self.object_store_timeout_secs == 0 {
            return Err(anyhow::anyhow!(
                "OBJECT_STORE_TIMEOUT_SECS must be greater than zero"
            ));
        }

        if self.upload_url_ttl_secs == 0 || self.view_url_ttl_secs == 0 {
            return Err(anyhow::anyhow!(
                "UPLOAD_URL_TTL_SECS and VIEW_URL_TTL_SECS must be greater than zero"
            ));
        }

        if self.url_cache_capacity == 0 {
            return Err(anyhow::anyhow!("URL_CACHE_CAPACITY must be greater than zero"));
        }

        if self.ledger_max_write_attempts == 0 {
            return Err(anyhow::anyhow!(
                "LEDGER_MAX_WRITE_ATTEMPTS must be at least 1"
            ));
        }

        if self.max_profile_photo_size_bytes == 0 || self.max_document_size_bytes == 0 {
            return Err(anyhow::anyhow!("Upload size limits must be greater than zero"));
        }

        // Validate storage backend configuration
        let backend = self.storage_backend.unwrap_or(StorageBackend::S3);
        match backend {
            StorageBackend::S3 => {
                if self.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_BUCKET must be set when using S3 storage backend"
                    ));
                }
                if self.s3_region.is_none() && self.aws_region.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_REGION or AWS_REGION must be set when using S3 storage backend"
                    ));
                }
            }
            StorageBackend::Local => {
                if self.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set when using local storage backend"
                    ));
                }
                if self.local_storage_base_url.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_BASE_URL must be set when using local storage backend"
                    ));
                }
                match self.local_signing_secret.as_deref() {
                    Some(secret) if secret.len() >= 32 => {}
                    _ => {
                        return Err(anyhow::anyhow!(
                            "LOCAL_SIGNING_SECRET must be set (at least 32 bytes) when using local storage backend"
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> DocketConfig {
        DocketConfig {
            base: BaseConfig {
                environment: "development".to_string(),
                db_max_connections: MAX_CONNECTIONS,
                db_timeout_seconds: CONNECTION_TIMEOUT_SECS,
            },
            database_url: "postgres://localhost/docket".to_string(),
            storage_backend: Some(StorageBackend::Local),
            s3_bucket: None,
            s3_region: None,
            s3_endpoint: None,
            aws_region: None,
            local_storage_path: Some("/tmp/docket".to_string()),
            local_storage_base_url: Some("http://localhost:4000/files".to_string()),
            local_signing_secret: Some("0123456789abcdef0123456789abcdef".to_string()),
            storage_key_prefix: None,
            object_store_timeout_secs: OBJECT_STORE_TIMEOUT_SECS,
            upload_url_ttl_secs: UPLOAD_URL_TTL_SECS,
            view_url_ttl_secs: VIEW_URL_TTL_SECS,
            url_cache_capacity: URL_CACHE_CAPACITY,
            url_cache_sweep_interval_secs: 0,
            max_profile_photo_size_bytes: MIB,
            max_document_size_bytes: 50 * MIB,
            document_allowed_content_types: vec![
                "image/*".to_string(),
                "application/pdf".to_string(),
            ],
            ledger_max_write_attempts: LEDGER_MAX_WRITE_ATTEMPTS,
            usage_reconcile_interval_secs: 0,
        }
    }

    #[test]
    fn local_config_validates() {
        assert!(local_config().validate().is_ok());
    }

    #[test]
    fn local_backend_requires_signing_secret() {
        let mut config = local_config();
        config.local_signing_secret = Some("short".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn s3_backend_requires_bucket_and_region() {
        let mut config = local_config();
        config.storage_backend = Some(StorageBackend::S3);
        assert!(config.validate().is_err());

        config.s3_bucket = Some("docket".to_string());
        assert!(config.validate().is_err());

        config.aws_region = Some("eu-west-1".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_write_attempts_rejected() {
        let mut config = local_config();
        config.ledger_max_write_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn key_prefix_depends_on_environment() {
        let config = Config(Box::new(local_config()));
        assert_eq!(config.storage_key_prefix(), "test/");

        let mut prod = local_config();
        prod.base.environment = "production".to_string();
        assert_eq!(Config(Box::new(prod)).storage_key_prefix(), "");

        let mut overridden = local_config();
        overridden.storage_key_prefix = Some("staging/".to_string());
        assert_eq!(Config(Box::new(overridden)).storage_key_prefix(), "staging/");
    }

    #[test]
    fn zero_intervals_disable_background_tasks() {
        let config = Config(Box::new(local_config()));
        assert!(config.url_cache_sweep_interval().is_none());
        assert!(config.usage_reconcile_interval().is_none());
    }
}

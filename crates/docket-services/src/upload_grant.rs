//! Upload authorization: validate, check quota, sign a direct PUT.

use chrono::Utc;
use docket_core::models::{UploadGrant, UploadGrantRequest};
use docket_core::validation::UploadPolicy;
use docket_core::AppError;
use docket_storage::keys::derive_storage_key;
use docket_storage::Storage;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use validator::Validate;

use crate::external::sign_call;
use crate::quota::QuotaService;

#[derive(Clone)]
pub struct UploadGrantService {
    quota: Arc<QuotaService>,
    storage: Arc<dyn Storage>,
    policy: UploadPolicy,
    key_prefix: String,
    upload_ttl: Duration,
    sign_timeout: Duration,
}

impl UploadGrantService {
    pub fn new(
        quota: Arc<QuotaService>,
        storage: Arc<dyn Storage>,
        policy: UploadPolicy,
        key_prefix: impl Into<String>,
        upload_ttl: Duration,
        sign_timeout: Duration,
    ) -> Self {
        Self {
            quota,
            storage,
            policy,
            key_prefix: key_prefix.into(),
            upload_ttl,
            sign_timeout,
        }
    }

    /// Authorize one upload.
    ///
    /// Nothing is reserved: the quota is checked here and enforced again when
    /// the upload is confirmed.
    #[tracing::instrument(
        skip(self, request),
        fields(tenant_id = %request.tenant_id, category = %request.category)
    )]
    pub async fn grant(&self, request: UploadGrantRequest) -> Result<UploadGrant, AppError> {
        request.validate()?;
        self.policy.validate(
            &request.category,
            &request.declared_content_type,
            request.declared_size_bytes,
        )?;

        self.quota
            .check_and_reserve(request.tenant_id, request.declared_size_bytes)
            .await?;

        let storage_key = derive_storage_key(
            &self.key_prefix,
            request.tenant_id,
            &request.category,
            request.owner_ref.as_ref(),
            &request.logical_filename,
            Uuid::new_v4(),
        );

        let issued_at = Utc::now();
        let upload_url = sign_call(
            self.sign_timeout,
            "upload url signing",
            self.storage.presigned_put_url(
                &storage_key,
                &request.declared_content_type,
                self.upload_ttl,
            ),
        )
        .await?;

        let expires_at = chrono::Duration::from_std(self.upload_ttl)
            .ok()
            .and_then(|ttl| issued_at.checked_add_signed(ttl))
            .unwrap_or(issued_at);

        tracing::info!(
            key = %storage_key,
            size_bytes = request.declared_size_bytes,
            "Upload granted"
        );

        Ok(UploadGrant {
            upload_url,
            storage_key,
            expires_at,
        })
    }
}

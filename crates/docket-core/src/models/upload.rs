use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::category::{Category, OwnerRef};

/// Request to authorize one direct upload to the object store
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UploadGrantRequest {
    pub tenant_id: Uuid,
    pub category: Category,
    #[serde(default)]
    pub owner_ref: Option<OwnerRef>,
    /// File size in bytes as declared by the client
    #[validate(range(min = 1, message = "File size must be at least 1 byte"))]
    pub declared_size_bytes: u64,
    /// Content type (MIME type)
    #[validate(length(
        min = 1,
        max = 255,
        message = "Content type must be between 1 and 255 characters"
    ))]
    pub declared_content_type: String,
    /// Original filename; only its stem and extension feed the storage key
    #[validate(length(
        min = 1,
        max = 255,
        message = "Filename must be between 1 and 255 characters"
    ))]
    pub logical_filename: String,
}

/// Signed upload authorization returned to the client
#[derive(Debug, Clone, Serialize)]
pub struct UploadGrant {
    /// Presigned PUT URL
    pub upload_url: String,
    /// Key the object will be stored under; echoed back on confirmation
    pub storage_key: String,
    /// URL expiration time
    pub expires_at: DateTime<Utc>,
}

//! Shared key derivation for storage backends.
//!
//! Key format: `{env_prefix}tenants/{tenant_id}/{owner_segment/}{unique_name}{.ext}`.

use std::path::Path;
use std::sync::LazyLock;

use docket_core::constants::PROFILE_PHOTO_OBJECT_NAME;
use docket_core::models::{Category, OwnerRef};
use uuid::Uuid;

use crate::traits::{StorageError, StorageResult};
use regex::Regex;

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_-]").expect("valid sanitizer pattern"));

const DEFAULT_EXTENSION: &str = ".bin";
const MAX_STEM_LEN: usize = 64;

/// Prefix under which every object of a tenant lives.
pub fn tenant_prefix(env_prefix: &str, tenant_id: Uuid) -> String {
    format!("{}tenants/{}/", env_prefix, tenant_id)
}

/// Replaces every character outside `[A-Za-z0-9_-]` with `-`.
pub fn sanitize_name(raw: &str) -> String {
    UNSAFE_CHARS.replace_all(raw, "-").into_owned()
}

/// Lowercased extension of `filename` including the dot, or `.bin`.
pub fn file_extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| sanitize_name(&e.to_lowercase()))
        .filter(|e| !e.is_empty())
        .map(|e| format!(".{}", e))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

/// Derive the storage key for an upload.
///
/// Profile photos use a fixed object name so a re-upload overwrites the previous
/// photo. Other categories get `{category}_{stem}_{short_id}` where `short_id` is
/// the first eight hex digits of `unique`.
pub fn derive_storage_key(
    env_prefix: &str,
    tenant_id: Uuid,
    category: &Category,
    owner_ref: Option<&OwnerRef>,
    logical_filename: &str,
    unique: Uuid,
) -> String {
    let mut key = tenant_prefix(env_prefix, tenant_id);

    if let Some(owner) = owner_ref {
        key.push_str(&sanitize_name(&owner.to_string()));
        key.push('/');
    }

    let unique_name = if category.is_profile_photo() {
        PROFILE_PHOTO_OBJECT_NAME.to_string()
    } else {
        let stem = Path::new(logical_filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let stem: String = stem.chars().take(MAX_STEM_LEN).collect();
        let short_id: String = unique.simple().to_string().chars().take(8).collect();
        sanitize_name(&format!("{}_{}_{}", category.as_str(), stem, short_id))
    };

    key.push_str(&unique_name);
    key.push_str(&file_extension(logical_filename));
    key
}

/// Rejects keys that could escape a backend's namespace.
pub fn validate_key(storage_key: &str) -> StorageResult<()> {
    if storage_key.is_empty() {
        return Err(StorageError::InvalidKey("Storage key is empty".to_string()));
    }
    if storage_key.contains("..") || storage_key.starts_with('/') || storage_key.contains('\\') {
        return Err(StorageError::InvalidKey(
            "Storage key contains invalid characters".to_string(),
        ));
    }
    Ok(())
}

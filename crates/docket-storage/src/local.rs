use crate::keys::validate_key;
use crate::traits::{attachment_disposition, Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::Sha256;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Characters escaped in query values. Keeps `/` readable in keys.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const PATH_SEGMENT: &AsciiSet = &QUERY_VALUE.remove(b'/');

/// Local filesystem storage implementation
///
/// Objects live under `base_path`. URLs point at `base_url` and carry an
/// HMAC-SHA256 signature over method, key, expiry and disposition; whatever
/// serves `base_url` checks them with [`LocalStorage::verify_signed_url`].
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
    base_url: String,
    signing_secret: Vec<u8>,
}

/// A successfully verified signed URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedUrl {
    pub storage_key: String,
    pub expires_at: i64,
    pub disposition: Option<String>,
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// # Arguments
    /// * `base_path` - Root directory for file storage (e.g., "/var/lib/docket/files")
    /// * `base_url` - Base URL for serving files (e.g., "http://localhost:4000/files")
    /// * `signing_secret` - HMAC key for signed URLs
    pub async fn new(
        base_path: impl Into<PathBuf>,
        base_url: String,
        signing_secret: impl Into<Vec<u8>>,
    ) -> StorageResult<Self> {
        let base_path = base_path.into();
        let signing_secret = signing_secret.into();

        if signing_secret.is_empty() {
            return Err(StorageError::ConfigError(
                "Local storage signing secret cannot be empty".to_string(),
            ));
        }

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalStorage {
            base_path,
            base_url,
            signing_secret,
        })
    }

    /// Convert storage key to filesystem path with security validation
    fn key_to_path(&self, storage_key: &str) -> StorageResult<PathBuf> {
        validate_key(storage_key)?;

        let path = self.base_path.join(storage_key);

        let base_canonical = self.base_path.canonicalize().map_err(|e| {
            StorageError::ConfigError(format!("Failed to canonicalize base path: {}", e))
        })?;

        if let Ok(canonical) = path.canonicalize() {
            if canonical.strip_prefix(&base_canonical).is_err() {
                return Err(StorageError::InvalidKey(
                    "Storage key resolves outside storage directory".to_string(),
                ));
            }
        }

        Ok(path)
    }

    fn mac(&self) -> StorageResult<Hmac<Sha256>> {
        Hmac::<Sha256>::new_from_slice(&self.signing_secret)
            .map_err(|e| StorageError::ConfigError(format!("Invalid signing secret: {}", e)))
    }

    fn signature(
        &self,
        method: &str,
        storage_key: &str,
        expires_at: i64,
        disposition: Option<&str>,
    ) -> StorageResult<Hmac<Sha256>> {
        let mut mac = self.mac()?;
        mac.update(method.as_bytes());
        mac.update(b"\n");
        mac.update(storage_key.as_bytes());
        mac.update(b"\n");
        mac.update(expires_at.to_string().as_bytes());
        mac.update(b"\n");
        mac.update(disposition.unwrap_or_default().as_bytes());
        Ok(mac)
    }

    fn sign_url(
        &self,
        method: &str,
        storage_key: &str,
        expires_in: Duration,
        disposition: Option<&str>,
    ) -> StorageResult<String> {
        self.key_to_path(storage_key)?;

        let ttl = chrono::Duration::from_std(expires_in)
            .map_err(|e| StorageError::SigningFailed(format!("Invalid expiry: {}", e)))?;
        let expires_at = (Utc::now() + ttl).timestamp();

        let tag = self
            .signature(method, storage_key, expires_at, disposition)?
            .finalize()
            .into_bytes();

        let mut url = format!(
            "{}/{}?method={}&expires={}",
            self.base_url.trim_end_matches('/'),
            utf8_percent_encode(storage_key, PATH_SEGMENT),
            method,
            expires_at
        );
        if let Some(disposition) = disposition {
            url.push_str("&disposition=");
            url.push_str(&utf8_percent_encode(disposition, QUERY_VALUE).to_string());
        }
        url.push_str("&signature=");
        url.push_str(&hex::encode(tag));

        Ok(url)
    }

    /// Verify a URL previously issued by this backend for `method`.
    pub fn verify_signed_url(&self, method: &str, url: &str) -> StorageResult<VerifiedUrl> {
        self.verify_signed_url_at(method, url, Utc::now())
    }

    /// Same as [`verify_signed_url`](Self::verify_signed_url) against an explicit clock.
    pub fn verify_signed_url_at(
        &self,
        method: &str,
        url: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<VerifiedUrl> {
        let invalid = |reason: &str| StorageError::InvalidSignature(reason.to_string());

        let base = format!("{}/", self.base_url.trim_end_matches('/'));
        let rest = url
            .strip_prefix(&base)
            .ok_or_else(|| invalid("URL does not belong to this storage"))?;
        let (encoded_key, query) = rest
            .split_once('?')
            .ok_or_else(|| invalid("Missing signature parameters"))?;

        let storage_key = percent_decode_str(encoded_key)
            .decode_utf8()
            .map_err(|_| invalid("Malformed storage key"))?
            .into_owned();

        let mut signed_method = None;
        let mut expires_at = None;
        let mut disposition = None;
        let mut signature = None;
        for pair in query.split('&') {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = percent_decode_str(value)
                .decode_utf8()
                .map_err(|_| invalid("Malformed query parameter"))?
                .into_owned();
            match name {
                "method" => signed_method = Some(value),
                "expires" => {
                    expires_at = Some(
                        value
                            .parse::<i64>()
                            .map_err(|_| invalid("Malformed expiry"))?,
                    )
                }
                "disposition" => disposition = Some(value),
                "signature" => signature = Some(value),
                _ => {}
            }
        }

        let signed_method = signed_method.ok_or_else(|| invalid("Missing method"))?;
        let expires_at = expires_at.ok_or_else(|| invalid("Missing expiry"))?;
        let signature = signature.ok_or_else(|| invalid("Missing signature"))?;

        if !signed_method.eq_ignore_ascii_case(method) {
            return Err(invalid("URL was signed for a different method"));
        }

        let tag = hex::decode(&signature).map_err(|_| invalid("Malformed signature"))?;
        self.signature(
            &signed_method,
            &storage_key,
            expires_at,
            disposition.as_deref(),
        )?
        .verify_slice(&tag)
        .map_err(|_| invalid("Signature mismatch"))?;

        if now.timestamp() > expires_at {
            return Err(invalid("URL has expired"));
        }

        validate_key(&storage_key)?;

        Ok(VerifiedUrl {
            storage_key,
            expires_at,
            disposition,
        })
    }

    /// Write an uploaded object, as the serving side does after verifying a PUT URL.
    pub async fn write_object(&self, storage_key: &str, data: Bytes) -> StorageResult<()> {
        let path = self.key_to_path(storage_key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;

        tracing::debug!(key = %storage_key, size_bytes = data.len(), "Local object written");
        Ok(())
    }

    async fn directory_size(root: &Path) -> StorageResult<u64> {
        let mut total = 0u64;
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let meta = entry.metadata().await?;
                if meta.is_dir() {
                    pending.push(entry.path());
                } else if meta.is_file() {
                    total = total.saturating_add(meta.len());
                }
            }
        }

        Ok(total)
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn presigned_put_url(
        &self,
        storage_key: &str,
        _content_type: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        self.sign_url("PUT", storage_key, expires_in, None)
    }

    async fn presigned_get_url(
        &self,
        storage_key: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        self.sign_url("GET", storage_key, expires_in, None)
    }

    async fn presigned_download_url(
        &self,
        storage_key: &str,
        expires_in: Duration,
        filename: &str,
    ) -> StorageResult<String> {
        let disposition = attachment_disposition(filename);
        self.sign_url("GET", storage_key, expires_in, Some(&disposition))
    }

    async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        let path = self.key_to_path(storage_key)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(key = %storage_key, "Local delete successful");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                tracing::error!(error = %e, key = %storage_key, "Local delete failed");
                Err(StorageError::DeleteFailed(format!(
                    "Failed to delete {}: {}",
                    path.display(),
                    e
                )))
            }
        }
    }

    async fn prefix_size(&self, prefix: &str) -> StorageResult<u64> {
        let prefix = prefix.trim_end_matches('/');
        let root = self.key_to_path(prefix)?;
        Self::directory_size(&root).await
    }

    async fn object_size(&self, storage_key: &str) -> StorageResult<Option<u64>> {
        let path = self.key_to_path(storage_key)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";
    const BASE_URL: &str = "http://localhost:4000/files";

    async fn storage(dir: &Path) -> LocalStorage {
        LocalStorage::new(dir, BASE_URL.to_string(), SECRET)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_signed_get_url_verifies() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        let url = storage
            .presigned_get_url("tenants/t1/a b.pdf", Duration::from_secs(600))
            .await
            .unwrap();
        assert!(url.starts_with("http://localhost:4000/files/tenants/t1/a%20b.pdf?"));

        let verified = storage.verify_signed_url("GET", &url).unwrap();
        assert_eq!(verified.storage_key, "tenants/t1/a b.pdf");
        assert!(verified.disposition.is_none());
    }

    #[tokio::test]
    async fn test_signed_url_rejects_wrong_method() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        let url = storage
            .presigned_put_url("tenants/t1/a.pdf", "application/pdf", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(storage.verify_signed_url("PUT", &url).is_ok());
        assert!(matches!(
            storage.verify_signed_url("GET", &url),
            Err(StorageError::InvalidSignature(_))
        ));
    }

    #[tokio::test]
    async fn test_signed_url_expires() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        let url = storage
            .presigned_get_url("tenants/t1/a.pdf", Duration::from_secs(60))
            .await
            .unwrap();
        let later = Utc::now() + chrono::Duration::seconds(120);
        assert!(matches!(
            storage.verify_signed_url_at("GET", &url, later),
            Err(StorageError::InvalidSignature(_))
        ));
    }

    #[tokio::test]
    async fn test_tampered_url_rejected() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        let url = storage
            .presigned_get_url("tenants/t1/a.pdf", Duration::from_secs(60))
            .await
            .unwrap();
        let tampered = url.replace("tenants/t1/a.pdf", "tenants/t2/a.pdf");
        assert!(storage.verify_signed_url("GET", &tampered).is_err());

        let other = LocalStorage::new(
            dir.path(),
            BASE_URL.to_string(),
            b"another-secret-another-secret-00".to_vec(),
        )
        .await
        .unwrap();
        assert!(other.verify_signed_url("GET", &url).is_err());
    }

    #[tokio::test]
    async fn test_download_url_binds_disposition() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        let url = storage
            .presigned_download_url("tenants/t1/a.pdf", Duration::from_secs(60), "Diploma.pdf")
            .await
            .unwrap();
        let verified = storage.verify_signed_url("GET", &url).unwrap();
        assert_eq!(
            verified.disposition.as_deref(),
            Some("attachment; filename=\"Diploma.pdf\"")
        );

        let stripped = url.replace("attachment", "inline");
        assert!(storage.verify_signed_url("GET", &stripped).is_err());
    }

    #[tokio::test]
    async fn test_prefix_size_sums_nested_objects() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        storage
            .write_object("tenants/t1/a.pdf", Bytes::from_static(b"12345"))
            .await
            .unwrap();
        storage
            .write_object("tenants/t1/S_1/b.pdf", Bytes::from_static(b"123"))
            .await
            .unwrap();
        storage
            .write_object("tenants/t2/c.pdf", Bytes::from_static(b"1234567"))
            .await
            .unwrap();

        assert_eq!(storage.prefix_size("tenants/t1/").await.unwrap(), 8);
        assert_eq!(storage.prefix_size("tenants/t3/").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_and_exists() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        storage
            .write_object("tenants/t1/a.pdf", Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert!(storage.exists("tenants/t1/a.pdf").await.unwrap());
        assert_eq!(
            storage.object_size("tenants/t1/a.pdf").await.unwrap(),
            Some(1)
        );
        assert_eq!(storage.object_size("tenants/t1").await.unwrap(), None);

        storage.delete("tenants/t1/a.pdf").await.unwrap();
        assert!(!storage.exists("tenants/t1/a.pdf").await.unwrap());

        // Deleting again is not an error.
        storage.delete("tenants/t1/a.pdf").await.unwrap();
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        let result = storage
            .presigned_get_url("../../../etc/passwd", Duration::from_secs(60))
            .await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.delete("../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.exists("/etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }
}

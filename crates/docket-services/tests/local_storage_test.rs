mod helpers;

use bytes::Bytes;
use docket_core::constants::GIB;
use docket_core::models::{Category, ConfirmedUpload, OwnerRef, UploadGrantRequest};
use docket_storage::LocalStorage;
use helpers::TestServices;
use std::sync::Arc;

const SECRET: &str = "0123456789abcdef0123456789abcdef";
const BASE_URL: &str = "http://localhost:4000/files";

#[tokio::test]
async fn grant_upload_confirm_view_and_remove_on_local_disk() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let local = Arc::new(
        LocalStorage::new(temp_dir.path(), BASE_URL.to_string(), SECRET)
            .await
            .unwrap(),
    );
    let services = TestServices::with_storage(local.clone(), GIB);
    let key = services.collection("transcripts", "42");

    let grant = services
        .uploads
        .grant(UploadGrantRequest {
            tenant_id: services.tenant_id,
            category: Category::document("transcripts").unwrap(),
            owner_ref: Some(OwnerRef::student("42").unwrap()),
            declared_size_bytes: 11,
            declared_content_type: "application/pdf".to_string(),
            logical_filename: "term one.pdf".to_string(),
        })
        .await
        .unwrap();

    // The client PUTs against the signed URL; the serving side verifies it.
    let verified = local.verify_signed_url("PUT", &grant.upload_url).unwrap();
    assert_eq!(verified.storage_key, grant.storage_key);
    local
        .write_object(&grant.storage_key, Bytes::from_static(b"hello world"))
        .await
        .unwrap();

    services
        .documents
        .confirm_append(
            &key,
            ConfirmedUpload {
                title: "Term one".to_string(),
                year: Some("2024".to_string()),
                storage_key: grant.storage_key.clone(),
                size_bytes: 11,
            },
        )
        .await
        .unwrap();
    assert_eq!(services.used_bytes().await, 11);

    let views = services.documents.list_with_urls(&key).await.unwrap();
    let view_url = views[0].view_url.clone().unwrap();
    assert_eq!(
        local.verify_signed_url("GET", &view_url).unwrap().storage_key,
        grant.storage_key
    );
    assert!(local.verify_signed_url("PUT", &view_url).is_err());

    let download = services
        .documents
        .download_url(&grant.storage_key, "Term one.pdf")
        .await
        .unwrap();
    let verified = local.verify_signed_url("GET", &download).unwrap();
    assert_eq!(
        verified.disposition.as_deref(),
        Some("attachment; filename=\"Term one.pdf\"")
    );

    let reconciled = services.quota.reconcile(services.tenant_id).await.unwrap();
    assert_eq!(reconciled.used_bytes, 11);

    services.documents.remove(&key, 0).await.unwrap().unwrap();
    assert_eq!(services.used_bytes().await, 0);
    let path = temp_dir.path().join(&grant.storage_key);
    assert!(!path.exists());
}

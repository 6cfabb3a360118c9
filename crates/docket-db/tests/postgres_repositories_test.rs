mod helpers;

use chrono::Utc;
use docket_core::models::{Category, CollectionKey, OwnerRef, Slot, SlotSequence};
use docket_db::{DocumentRepository, PgDocumentRepository, PgQuotaRepository, QuotaRepository};
use uuid::Uuid;

fn slot(title: &str, key: &str, size: u64) -> Slot {
    Slot {
        title: title.to_string(),
        storage_key: Some(key.to_string()),
        size_bytes: size,
        year: None,
        uploaded_at: Utc::now(),
    }
}

#[tokio::test]
async fn collection_insert_is_unique_per_key_including_null_owner() {
    let Some(pool) = helpers::test_pool().await else {
        return;
    };
    let repo = PgDocumentRepository::new(pool);
    let key = CollectionKey::tenant(Uuid::new_v4(), Category::document("ids").unwrap());
    let slots = SlotSequence::single(slot("A", "k/a", 1));

    let created = repo.insert(&key, &slots).await.unwrap().unwrap();
    assert_eq!(created.version, 1);
    assert!(repo.insert(&key, &slots).await.unwrap().is_none());

    let found = repo.find(&key).await.unwrap().unwrap();
    assert_eq!(found.id, created.id);
    assert_eq!(found.slots, slots);
}

#[tokio::test]
async fn collection_update_is_version_checked_and_keeps_gaps() {
    let Some(pool) = helpers::test_pool().await else {
        return;
    };
    let repo = PgDocumentRepository::new(pool);
    let key = CollectionKey::new(
        Uuid::new_v4(),
        Category::document("certificates").unwrap(),
        Some(OwnerRef::student("42").unwrap()),
    );

    let mut slots = SlotSequence::new();
    slots.set(2, slot("A", "k/a", 3));
    let created = repo.insert(&key, &slots).await.unwrap().unwrap();
    assert!(created.slots.is_gap(0));

    slots.set(0, slot("B", "k/b", 4));
    let updated = repo
        .update_if_version(created.id, created.version, &slots)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.version, 2);
    assert!(updated.slots.is_gap(1));

    let stale = repo
        .update_if_version(created.id, created.version, &slots)
        .await
        .unwrap();
    assert!(stale.is_none());

    let listed = repo
        .find_all(key.tenant_id, None, Some(&OwnerRef::student("42").unwrap()))
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn quota_statements_enforce_ceiling_and_floor() {
    let Some(pool) = helpers::test_pool().await else {
        return;
    };
    let repo = PgQuotaRepository::new(pool);
    let tenant = Uuid::new_v4();

    let account = repo.open(tenant, 100).await.unwrap();
    assert_eq!(account.used_bytes, 0);

    assert!(repo
        .increment_within_ceiling(tenant, 101)
        .await
        .unwrap()
        .is_none());
    let account = repo
        .increment_within_ceiling(tenant, 100)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.used_bytes, 100);

    let account = repo.decrement_clamped(tenant, 1_000).await.unwrap().unwrap();
    assert_eq!(account.used_bytes, 0);

    let account = repo.set_total(tenant, 500).await.unwrap().unwrap();
    assert_eq!(account.total_bytes, 500);
    assert!(repo.list_tenant_ids().await.unwrap().contains(&tenant));
}

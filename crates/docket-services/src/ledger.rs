//! Index-addressable slot collections per (tenant, category, owner).
//!
//! Every write is a read-modify-write guarded by the collection version. When
//! another writer commits in between, the whole read-modify-write runs again
//! against the fresh state, up to a bounded number of attempts.

use chrono::{DateTime, Utc};
use docket_core::models::{
    Category, CollectionKey, DocumentCollection, OwnerRef, RemovedSlot, ReplacedObject, Slot,
    SlotPatch, SlotSequence,
};
use docket_core::AppError;
use docket_db::DocumentRepository;
use std::sync::Arc;
use uuid::Uuid;

/// Result of planning one write against the current state.
struct Planned<T> {
    /// Sequence to persist; `None` leaves the collection untouched.
    write: Option<SlotSequence>,
    outcome: T,
}

impl<T> Planned<T> {
    fn write(slots: SlotSequence, outcome: T) -> Self {
        Self {
            write: Some(slots),
            outcome,
        }
    }

    fn skip(outcome: T) -> Self {
        Self {
            write: None,
            outcome,
        }
    }
}

#[derive(Clone)]
pub struct DocumentLedger {
    repository: Arc<dyn DocumentRepository>,
    max_write_attempts: u32,
}

impl DocumentLedger {
    pub fn new(repository: Arc<dyn DocumentRepository>, max_write_attempts: u32) -> Self {
        Self {
            repository,
            max_write_attempts: max_write_attempts.max(1),
        }
    }

    /// Append `slot`, creating the collection as `[slot]` if it does not exist.
    ///
    /// Fails with `Validation` when the slot's object is already recorded in the
    /// collection.
    #[tracing::instrument(skip(self, key, slot), fields(tenant_id = %key.tenant_id, category = %key.category))]
    pub async fn upsert_append(
        &self,
        key: &CollectionKey,
        slot: Slot,
    ) -> Result<DocumentCollection, AppError> {
        let (_, collection) = self
            .write(key, |current| {
                let mut slots = current.cloned().unwrap_or_default();
                if let Some(storage_key) = slot.file_key() {
                    ensure_unrecorded(&slots, storage_key, None)?;
                }
                slots.push(slot.clone());
                Ok(Planned::write(slots, ()))
            })
            .await?;

        collection.ok_or_else(|| {
            AppError::Internal("Append completed without a persisted collection".to_string())
        })
    }

    /// Write `patch` at `index`.
    ///
    /// Positions before `index` that do not exist yet become gaps. Returns the
    /// displaced object only when the patch supplied a new file and the previous
    /// slot referenced one; a metadata-only edit never reports anything to delete.
    /// A new file already recorded at another index is rejected with `Validation`.
    #[tracing::instrument(skip(self, key, patch), fields(tenant_id = %key.tenant_id, category = %key.category))]
    pub async fn upsert_at_index(
        &self,
        key: &CollectionKey,
        index: usize,
        patch: SlotPatch,
    ) -> Result<Option<ReplacedObject>, AppError> {
        let now = Utc::now();
        let (replaced, _) = self
            .write(key, |current| plan_upsert_at_index(current, index, &patch, now))
            .await?;
        Ok(replaced)
    }

    /// Remove the slot at `index`, shifting later slots down by one.
    ///
    /// Nothing is written and `None` is returned when the collection is missing,
    /// the index is out of range, or the slot holds no file.
    #[tracing::instrument(skip(self, key), fields(tenant_id = %key.tenant_id, category = %key.category))]
    pub async fn remove_at_index(
        &self,
        key: &CollectionKey,
        index: usize,
    ) -> Result<Option<RemovedSlot>, AppError> {
        let (removed, _) = self
            .write(key, |current| plan_remove_at_index(current, index))
            .await?;
        Ok(removed)
    }

    pub async fn fetch(&self, key: &CollectionKey) -> Result<Option<DocumentCollection>, AppError> {
        self.repository.find(key).await
    }

    pub async fn fetch_all(
        &self,
        tenant_id: Uuid,
        category: Option<&Category>,
        owner_ref: Option<&OwnerRef>,
    ) -> Result<Vec<DocumentCollection>, AppError> {
        self.repository.find_all(tenant_id, category, owner_ref).await
    }

    async fn write<T, F>(
        &self,
        key: &CollectionKey,
        mut plan: F,
    ) -> Result<(T, Option<DocumentCollection>), AppError>
    where
        F: FnMut(Option<&SlotSequence>) -> Result<Planned<T>, AppError>,
    {
        for attempt in 1..=self.max_write_attempts {
            let current = self.repository.find(key).await?;
            let planned = plan(current.as_ref().map(|c| &c.slots))?;

            let Some(slots) = planned.write else {
                return Ok((planned.outcome, current));
            };

            let written = match &current {
                None => self.repository.insert(key, &slots).await?,
                Some(existing) => {
                    self.repository
                        .update_if_version(existing.id, existing.version, &slots)
                        .await?
                }
            };

            match written {
                Some(collection) => {
                    tracing::debug!(
                        attempt,
                        version = collection.version,
                        slots = collection.slots.len(),
                        "Collection written"
                    );
                    return Ok((planned.outcome, Some(collection)));
                }
                None => {
                    tracing::debug!(attempt, "Collection changed concurrently, retrying");
                }
            }
        }

        tracing::warn!(
            tenant_id = %key.tenant_id,
            category = %key.category,
            attempts = self.max_write_attempts,
            "Giving up on contended collection"
        );
        Err(AppError::Conflict(format!(
            "Collection {}/{} kept changing after {} attempts",
            key.tenant_id, key.category, self.max_write_attempts
        )))
    }
}

fn plan_upsert_at_index(
    current: Option<&SlotSequence>,
    index: usize,
    patch: &SlotPatch,
    now: DateTime<Utc>,
) -> Result<Planned<Option<ReplacedObject>>, AppError> {
    let Some(existing) = current else {
        let mut slots = SlotSequence::new();
        slots.set(index, Slot::patched(None, patch, now));
        return Ok(Planned::write(slots, None));
    };

    if let Some(file) = &patch.new_file {
        ensure_unrecorded(existing, &file.storage_key, Some(index))?;
    }

    let previous = existing.get(index);
    let replaced = match (&patch.new_file, previous) {
        (Some(_), Some(old)) => old.file_key().map(|storage_key| ReplacedObject {
            storage_key: storage_key.to_string(),
            size_bytes: old.size_bytes,
        }),
        _ => None,
    };

    let mut slots = existing.clone();
    slots.set(index, Slot::patched(previous, patch, now));
    Ok(Planned::write(slots, replaced))
}

fn plan_remove_at_index(
    current: Option<&SlotSequence>,
    index: usize,
) -> Result<Planned<Option<RemovedSlot>>, AppError> {
    let Some(existing) = current else {
        return Ok(Planned::skip(None));
    };

    let removed = match existing.get(index) {
        Some(slot) => match slot.file_key() {
            Some(storage_key) => RemovedSlot {
                storage_key: storage_key.to_string(),
                size_bytes: slot.size_bytes,
            },
            None => return Ok(Planned::skip(None)),
        },
        None => return Ok(Planned::skip(None)),
    };

    let mut slots = existing.clone();
    slots.remove(index);
    Ok(Planned::write(slots, Some(removed)))
}

/// One object backs at most one slot of a collection.
pub(crate) fn ensure_unrecorded(
    slots: &SlotSequence,
    storage_key: &str,
    target: Option<usize>,
) -> Result<(), AppError> {
    match slots.position_of(storage_key) {
        Some(at) if Some(at) != target => Err(AppError::Validation(format!(
            "Object {} is already recorded at index {}",
            storage_key, at
        ))),
        _ => Ok(()),
    }
}

//! Document collections and their index-addressable slots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::category::{Category, OwnerRef};

/// One addressable file-metadata entry within a collection.
///
/// `size_bytes` is only meaningful while `storage_key` is `Some`; a slot without a
/// key is a placeholder created by an indexed write before any file was attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub title: String,
    #[serde(default)]
    pub storage_key: Option<String>,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub year: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

impl Slot {
    pub fn new(
        title: impl Into<String>,
        year: Option<String>,
        file: Option<NewFile>,
        uploaded_at: DateTime<Utc>,
    ) -> Self {
        let (storage_key, size_bytes) = match file {
            Some(file) => (Some(file.storage_key), file.size_bytes),
            None => (None, 0),
        };
        Slot {
            title: title.into(),
            storage_key,
            size_bytes,
            year,
            uploaded_at,
        }
    }

    /// Builds the slot that replaces `previous` under `patch`.
    ///
    /// Title and year are always taken from the patch. The file reference and
    /// `uploaded_at` only change when the patch carries a new file; otherwise they
    /// are carried over (a missing previous slot contributes no file and `now`).
    pub fn patched(previous: Option<&Slot>, patch: &SlotPatch, now: DateTime<Utc>) -> Slot {
        match (&patch.new_file, previous) {
            (Some(file), _) => Slot {
                title: patch.title.clone(),
                storage_key: Some(file.storage_key.clone()),
                size_bytes: file.size_bytes,
                year: patch.year.clone(),
                uploaded_at: now,
            },
            (None, Some(old)) => Slot {
                title: patch.title.clone(),
                storage_key: old.storage_key.clone(),
                size_bytes: old.size_bytes,
                year: patch.year.clone(),
                uploaded_at: old.uploaded_at,
            },
            (None, None) => Slot {
                title: patch.title.clone(),
                storage_key: None,
                size_bytes: 0,
                year: patch.year.clone(),
                uploaded_at: now,
            },
        }
    }

    /// Storage key, treating an empty string the same as no key.
    pub fn file_key(&self) -> Option<&str> {
        self.storage_key.as_deref().filter(|key| !key.is_empty())
    }
}

/// A freshly uploaded object to attach to a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFile {
    pub storage_key: String,
    pub size_bytes: u64,
}

/// Fields supplied by an indexed write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotPatch {
    pub title: String,
    pub year: Option<String>,
    pub new_file: Option<NewFile>,
}

/// The object displaced by an indexed write that supplied a new file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacedObject {
    pub storage_key: String,
    pub size_bytes: u64,
}

/// What an indexed delete removed; the caller owns cleanup of the object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedSlot {
    pub storage_key: String,
    pub size_bytes: u64,
}

/// Ordered mapping from index to an optional slot.
///
/// `None` entries are gaps left by a write past the end of the sequence. The JSON
/// form is an array with `null` gaps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotSequence(Vec<Option<Slot>>);

impl SlotSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(slot: Slot) -> Self {
        SlotSequence(vec![Some(slot)])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Slot at `index`; `None` for gaps and out-of-range indices.
    pub fn get(&self, index: usize) -> Option<&Slot> {
        self.0.get(index).and_then(Option::as_ref)
    }

    pub fn is_gap(&self, index: usize) -> bool {
        matches!(self.0.get(index), Some(None))
    }

    pub fn push(&mut self, slot: Slot) {
        self.0.push(Some(slot));
    }

    /// Writes `slot` at `index`, padding with gaps when `index` is past the end.
    pub fn set(&mut self, index: usize, slot: Slot) {
        if index >= self.0.len() {
            self.0.resize(index + 1, None);
        }
        self.0[index] = Some(slot);
    }

    /// Removes the entry at `index`, shifting later entries down by one.
    pub fn remove(&mut self, index: usize) -> Option<Option<Slot>> {
        if index < self.0.len() {
            Some(self.0.remove(index))
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<&Slot>> {
        self.0.iter().map(Option::as_ref)
    }

    /// Index of the slot that references `storage_key`.
    pub fn position_of(&self, storage_key: &str) -> Option<usize> {
        self.0
            .iter()
            .position(|entry| entry.as_ref().and_then(Slot::file_key) == Some(storage_key))
    }

    /// Sum of the sizes of every slot that references an object.
    pub fn stored_bytes(&self) -> u64 {
        self.iter()
            .flatten()
            .filter(|slot| slot.file_key().is_some())
            .map(|slot| slot.size_bytes)
            .sum()
    }
}

impl From<Vec<Option<Slot>>> for SlotSequence {
    fn from(entries: Vec<Option<Slot>>) -> Self {
        SlotSequence(entries)
    }
}

/// Identity of a collection: one per (tenant, category, owner).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionKey {
    pub tenant_id: Uuid,
    pub category: Category,
    pub owner_ref: Option<OwnerRef>,
}

impl CollectionKey {
    pub fn new(tenant_id: Uuid, category: Category, owner_ref: Option<OwnerRef>) -> Self {
        Self {
            tenant_id,
            category,
            owner_ref,
        }
    }

    /// Tenant-level collection (no owner).
    pub fn tenant(tenant_id: Uuid, category: Category) -> Self {
        Self::new(tenant_id, category, None)
    }
}

/// A persisted, versioned slot sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentCollection {
    pub id: Uuid,
    #[serde(flatten)]
    pub key: CollectionKey,
    pub slots: SlotSequence,
    /// Optimistic-concurrency token, bumped by every successful write.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Completion of a granted upload, ready to be recorded in a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedUpload {
    pub title: String,
    pub year: Option<String>,
    pub storage_key: String,
    pub size_bytes: u64,
}

/// A slot with its view URL resolved, as returned by listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotView {
    pub index: usize,
    pub slot: Option<Slot>,
    pub view_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(title: &str, key: Option<&str>, size: u64) -> Slot {
        Slot {
            title: title.to_string(),
            storage_key: key.map(str::to_string),
            size_bytes: size,
            year: None,
            uploaded_at: Utc::now(),
        }
    }

    #[test]
    fn set_past_end_leaves_gaps() {
        let mut seq = SlotSequence::new();
        seq.set(2, slot("A", Some("a"), 1));
        assert_eq!(seq.len(), 3);
        assert!(seq.is_gap(0));
        assert!(seq.is_gap(1));
        assert_eq!(seq.get(2).map(|s| s.title.as_str()), Some("A"));

        seq.set(0, slot("B", Some("b"), 2));
        assert_eq!(seq.len(), 3);
        assert_eq!(seq.get(0).map(|s| s.title.as_str()), Some("B"));
        assert!(seq.is_gap(1));
    }

    #[test]
    fn position_of_skips_gaps_and_keyless_slots() {
        let mut seq = SlotSequence::new();
        seq.set(1, slot("A", Some(""), 0));
        seq.set(3, slot("B", Some("b"), 2));
        assert_eq!(seq.position_of("b"), Some(3));
        assert_eq!(seq.position_of(""), None);
        assert_eq!(seq.position_of("missing"), None);
    }

    #[test]
    fn remove_compacts() {
        let mut seq: SlotSequence = vec![
            Some(slot("A", Some("a"), 1)),
            Some(slot("B", Some("b"), 2)),
            Some(slot("C", Some("c"), 3)),
        ]
        .into();
        let removed = seq.remove(1).flatten().unwrap();
        assert_eq!(removed.title, "B");
        assert_eq!(seq.len(), 2);
        assert_eq!(seq.get(1).map(|s| s.title.as_str()), Some("C"));
        assert!(seq.remove(5).is_none());
    }

    #[test]
    fn json_form_uses_null_gaps() {
        let mut seq = SlotSequence::new();
        seq.set(1, slot("A", None, 0));
        let json = serde_json::to_value(&seq).unwrap();
        assert!(json[0].is_null());
        assert_eq!(json[1]["title"], "A");

        let back: SlotSequence = serde_json::from_value(json).unwrap();
        assert_eq!(back, seq);
    }

    #[test]
    fn metadata_patch_carries_file_over() {
        let old = slot("Old", Some("k1"), 10);
        let patch = SlotPatch {
            title: "New".to_string(),
            year: Some("2024".to_string()),
            new_file: None,
        };
        let patched = Slot::patched(Some(&old), &patch, Utc::now());
        assert_eq!(patched.title, "New");
        assert_eq!(patched.year.as_deref(), Some("2024"));
        assert_eq!(patched.storage_key.as_deref(), Some("k1"));
        assert_eq!(patched.size_bytes, 10);
        assert_eq!(patched.uploaded_at, old.uploaded_at);
    }

    #[test]
    fn file_patch_overwrites_file() {
        let old = slot("Old", Some("k1"), 10);
        let patch = SlotPatch {
            title: "Old".to_string(),
            year: None,
            new_file: Some(NewFile {
                storage_key: "k2".to_string(),
                size_bytes: 20,
            }),
        };
        let patched = Slot::patched(Some(&old), &patch, Utc::now());
        assert_eq!(patched.storage_key.as_deref(), Some("k2"));
        assert_eq!(patched.size_bytes, 20);
    }

    #[test]
    fn stored_bytes_ignores_placeholders() {
        let seq: SlotSequence = vec![
            Some(slot("A", Some("a"), 5)),
            None,
            Some(slot("B", None, 99)),
            Some(slot("C", Some(""), 7)),
        ]
        .into();
        assert_eq!(seq.stored_bytes(), 5);
    }
}

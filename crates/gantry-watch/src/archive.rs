//! The archive collaborator interface.
//!
//! An [`Archive`] is a DICOM store seen through a narrow capability trait:
//! find/get/store/remove/anonymize/check plus a sequenced change feed.
//! Vendor-backed implementations (PACS REST clients, proxied modalities)
//! live outside this crate; [`MemoryArchive`] implements the contract
//! in-process for tests and local wiring.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use gantry_core::{
    ChangeEvent, DatetimeInterval, EventKind, IdentityMinter, Item, ItemLevel, META_PATIENT_DOB,
    META_PATIENT_GENDER, META_PATIENT_NAME,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A declarative item query: exact-match metadata fields plus an optional
/// time window on the item's content time.
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// Metadata fields that must match exactly (string compare).
    pub fields: BTreeMap<String, String>,

    /// Restrict to items whose content time falls inside this window.
    pub window: Option<DatetimeInterval>,
}

impl Query {
    /// An unconstrained query.
    pub fn all() -> Self {
        Self::default()
    }

    /// Query for a single field value.
    pub fn field(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(key.into(), value.into());
        Self {
            fields,
            window: None,
        }
    }

    /// Restrict the query to a time window.
    pub fn within(mut self, window: DatetimeInterval) -> Self {
        self.window = Some(window);
        self
    }
}

/// One entry of an archive's change feed.
#[derive(Debug, Clone)]
pub struct ChangeRecord {
    /// Monotonically increasing position in the feed.
    pub seq: u64,
    /// What changed.
    pub kind: EventKind,
    /// The affected item (metadata-only view).
    pub item: Item,
}

/// Capability interface over a DICOM store.
///
/// All operations may touch the network in real implementations;
/// connectivity failures surface as [`Error::Transient`] and are retried on
/// the caller's next scheduled cycle.
pub trait Archive: Send + Sync {
    /// Find items matching the query at the given level. With `retrieve`,
    /// payloads are included; otherwise metadata-only views are returned.
    fn find(&self, query: &Query, level: ItemLevel, retrieve: bool) -> Result<Vec<Item>>;

    /// Fetch a single item by identity. `with_payload` pulls the raw bytes.
    fn get(&self, item: &Item, with_payload: bool) -> Result<Item>;

    /// Store an item, overwriting any existing record with the same key.
    fn store(&self, item: &Item) -> Result<()>;

    /// Remove an item by identity. Removing an absent item is a no-op so
    /// that re-delivered move operations stay safe.
    fn remove(&self, item: &Item) -> Result<()>;

    /// Produce a *new* item with deterministic pseudo-identifiers
    /// substituted for identifying fields. The original is not modified
    /// and not stored anywhere by this call.
    fn anonymize(&self, item: &Item, replacements: &BTreeMap<String, String>) -> Result<Item>;

    /// Whether the archive currently holds the item.
    fn check(&self, item: &Item) -> Result<bool>;

    /// Drain the change feed after `since_seq`. Returns the records in feed
    /// order and the new cursor position.
    fn changes(&self, since_seq: u64) -> Result<(Vec<ChangeRecord>, u64)>;
}

/// Maps an item's level to the change-feed event kind announcing it.
pub fn added_kind(level: ItemLevel) -> EventKind {
    match level {
        ItemLevel::Instance => EventKind::InstanceAdded,
        ItemLevel::Series => EventKind::SeriesAdded,
        // Patient-level changes surface as study arrivals; the feed has no
        // separate patient event.
        ItemLevel::Study | ItemLevel::Patient => EventKind::StudyAdded,
    }
}

struct StoredItem {
    item: Item,
    stored_at: DateTime<Utc>,
}

#[derive(Default)]
struct ArchiveState {
    items: BTreeMap<String, StoredItem>,
    feed: Vec<ChangeRecord>,
    next_seq: u64,
}

/// In-process [`Archive`] backed by a mutex-guarded map.
///
/// Thread-safe; share via `Arc<MemoryArchive>`.
pub struct MemoryArchive {
    state: Mutex<ArchiveState>,
    minter: Arc<dyn IdentityMinter>,
}

impl MemoryArchive {
    pub fn new(minter: Arc<dyn IdentityMinter>) -> Self {
        Self {
            state: Mutex::new(ArchiveState::default()),
            minter,
        }
    }

    /// Number of items currently stored.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether the archive holds no items.
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    fn effective_time(stored: &StoredItem) -> DateTime<Utc> {
        stored
            .item
            .content_time()
            .ok()
            .flatten()
            .unwrap_or(stored.stored_at)
    }

    fn matches(stored: &StoredItem, query: &Query, level: ItemLevel) -> bool {
        if stored.item.level != level {
            return false;
        }
        for (k, v) in &query.fields {
            if stored.item.meta_str(k) != Some(v.as_str()) {
                return false;
            }
        }
        if let Some(window) = &query.window {
            if !window.contains(Self::effective_time(stored)) {
                return false;
            }
        }
        true
    }
}

impl Archive for MemoryArchive {
    fn find(&self, query: &Query, level: ItemLevel, retrieve: bool) -> Result<Vec<Item>> {
        let state = self.state.lock();
        let items = state
            .items
            .values()
            .filter(|stored| Self::matches(stored, query, level))
            .map(|stored| {
                if retrieve {
                    stored.item.clone()
                } else {
                    stored.item.without_payload()
                }
            })
            .collect();
        Ok(items)
    }

    fn get(&self, item: &Item, with_payload: bool) -> Result<Item> {
        let state = self.state.lock();
        let stored = state
            .items
            .get(&item.key())
            .ok_or_else(|| Error::Format(format!("archive does not hold item {}", item.key())))?;
        Ok(if with_payload {
            stored.item.clone()
        } else {
            stored.item.without_payload()
        })
    }

    fn store(&self, item: &Item) -> Result<()> {
        let mut state = self.state.lock();
        let key = item.key();
        state.items.insert(
            key,
            StoredItem {
                item: item.clone(),
                stored_at: Utc::now(),
            },
        );
        let seq = state.next_seq + 1;
        state.next_seq = seq;
        state.feed.push(ChangeRecord {
            seq,
            kind: added_kind(item.level),
            item: item.without_payload(),
        });
        Ok(())
    }

    fn remove(&self, item: &Item) -> Result<()> {
        let mut state = self.state.lock();
        if state.items.remove(&item.key()).is_none() {
            tracing::debug!(key = %item.key(), "remove of absent item ignored");
        }
        Ok(())
    }

    fn anonymize(&self, item: &Item, replacements: &BTreeMap<String, String>) -> Result<Item> {
        let source = {
            let state = self.state.lock();
            match state.items.get(&item.key()) {
                Some(stored) => stored.item.clone(),
                None => item.clone(),
            }
        };

        let guid = self.minter.guid(&source.key());
        let mut sham = Item::new(source.level).with_natural_key(guid.clone());
        for (k, v) in &source.metadata {
            sham.metadata.insert(k.clone(), v.clone());
        }

        let gender = source.meta_str(META_PATIENT_GENDER).map(str::to_string);
        if source.metadata.contains_key(META_PATIENT_NAME) {
            let name = self.minter.pseudonym(&guid, gender.as_deref());
            sham.metadata
                .insert(META_PATIENT_NAME.to_string(), name.into());
        }
        if let Some(dob_raw) = source.meta_str(META_PATIENT_DOB) {
            if let Ok(dob) = dob_raw.parse::<chrono::NaiveDate>() {
                let shifted = self.minter.pseudo_dob(&guid, dob);
                sham.metadata
                    .insert(META_PATIENT_DOB.to_string(), shifted.to_string().into());
            }
        }
        for (k, v) in replacements {
            sham.metadata.insert(k.clone(), v.clone().into());
        }
        sham.payload = source.payload.clone();
        Ok(sham)
    }

    fn check(&self, item: &Item) -> Result<bool> {
        Ok(self.state.lock().items.contains_key(&item.key()))
    }

    fn changes(&self, since_seq: u64) -> Result<(Vec<ChangeRecord>, u64)> {
        let state = self.state.lock();
        let records: Vec<ChangeRecord> = state
            .feed
            .iter()
            .filter(|r| r.seq > since_seq)
            .cloned()
            .collect();
        let cursor = records.last().map(|r| r.seq).unwrap_or(since_seq);
        Ok((records, cursor))
    }
}

/// Turn change records into dispatchable events for a named source.
pub fn records_to_events(records: Vec<ChangeRecord>, source_id: &str) -> Vec<ChangeEvent> {
    records
        .into_iter()
        .map(|r| ChangeEvent::new(r.kind, r.item, source_id))
        .collect()
}

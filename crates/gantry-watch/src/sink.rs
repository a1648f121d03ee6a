//! Downstream sinks: search indexes, peer archives, file stores.
//!
//! A [`Sink`] consumes finished items. `put` is idempotent by natural key on
//! every implementation here: delivery is at-least-once across crash/restart
//! boundaries, so a re-delivered item must land on the record it already
//! produced instead of duplicating it.

use crate::archive::{Archive, Query};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use gantry_core::{DatetimeInterval, Item, ItemLevel};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Metadata key under which sinks stamp the originating host.
pub const META_SOURCE_HOST: &str = "source_host";
/// Metadata key under which sinks stamp the logical index name.
pub const META_INDEX: &str = "index";

/// Routing parameters carried with a `put`: provenance describing where the
/// item came from and which logical index it belongs to.
#[derive(Debug, Clone, Default)]
pub struct RoutingParams {
    /// Logical index name on the sink side.
    pub index: Option<String>,

    /// Host the item originated from.
    pub host: Option<String>,

    /// Further provenance fields stamped verbatim into item metadata.
    pub extra: BTreeMap<String, String>,
}

impl RoutingParams {
    /// Merge provenance into an item's metadata, returning the stamped copy.
    pub fn stamp(&self, item: &Item) -> Item {
        let mut stamped = item.clone();
        if let Some(index) = &self.index {
            stamped
                .metadata
                .insert(META_INDEX.to_string(), index.clone().into());
        }
        if let Some(host) = &self.host {
            stamped
                .metadata
                .insert(META_SOURCE_HOST.to_string(), host.clone().into());
        }
        for (k, v) in &self.extra {
            stamped.metadata.insert(k.clone(), v.clone().into());
        }
        stamped
    }
}

/// A destination for finished items.
pub trait Sink: Send + Sync {
    /// Name this sink is registered under (used in routes and logs).
    fn name(&self) -> &str;

    /// Consume an item. Idempotent by natural key.
    fn put(&self, item: &Item, routing: &RoutingParams) -> Result<()>;

    /// Query items already consumed. The reserved query field `key` matches
    /// the item identity; other fields match metadata. `window` restricts to
    /// items whose content time (or arrival time) falls inside it.
    fn find_items(&self, query: &Query, window: Option<&DatetimeInterval>) -> Result<Vec<Item>>;
}

struct IndexedRow {
    item: Item,
    indexed_at: DateTime<Utc>,
}

/// In-process index sink keyed by item identity.
///
/// Rows keep a metadata-only, provenance-stamped view of each item.
/// Thread-safe; share via `Arc<MemoryIndexSink>`.
pub struct MemoryIndexSink {
    name: String,
    rows: Mutex<BTreeMap<String, IndexedRow>>,
}

impl MemoryIndexSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: Mutex::new(BTreeMap::new()),
        }
    }

    /// Number of indexed records.
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    /// Whether the index holds no records.
    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    /// Fetch a single record by item identity.
    pub fn get(&self, key: &str) -> Option<Item> {
        self.rows.lock().get(key).map(|row| row.item.clone())
    }

    fn row_matches(row: &IndexedRow, query: &Query, window: Option<&DatetimeInterval>) -> bool {
        for (k, v) in &query.fields {
            let matched = if k == "key" {
                row.item.key() == *v
            } else {
                row.item.meta_str(k) == Some(v.as_str())
            };
            if !matched {
                return false;
            }
        }
        if let Some(window) = window.or(query.window.as_ref()) {
            let t = row
                .item
                .content_time()
                .ok()
                .flatten()
                .unwrap_or(row.indexed_at);
            if !window.contains(t) {
                return false;
            }
        }
        true
    }
}

impl Sink for MemoryIndexSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn put(&self, item: &Item, routing: &RoutingParams) -> Result<()> {
        let stamped = routing.stamp(item).without_payload();
        let key = stamped.key();
        self.rows.lock().insert(
            key,
            IndexedRow {
                item: stamped,
                indexed_at: Utc::now(),
            },
        );
        Ok(())
    }

    fn find_items(&self, query: &Query, window: Option<&DatetimeInterval>) -> Result<Vec<Item>> {
        let rows = self.rows.lock();
        Ok(rows
            .values()
            .filter(|row| Self::row_matches(row, query, window))
            .map(|row| row.item.clone())
            .collect())
    }
}

/// File-store sink: one file per item identity beneath a root directory.
///
/// Items carrying a payload are written verbatim; metadata-only items are
/// written as pretty JSON. Overwriting on re-delivery keeps `put`
/// idempotent.
pub struct FileSink {
    name: String,
    root: PathBuf,
}

impl FileSink {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            name: name.into(),
            root,
        })
    }

    /// Path separators in keys would escape the root; flatten them.
    fn file_name(key: &str) -> String {
        key.replace(['/', '\\'], "_")
    }

    /// Absolute path an item identity maps to.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(Self::file_name(key))
    }
}

impl Sink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn put(&self, item: &Item, routing: &RoutingParams) -> Result<()> {
        let stamped = routing.stamp(item);
        let path = self.path_for(&stamped.key());
        match &stamped.payload {
            Some(payload) => std::fs::write(&path, payload)?,
            None => {
                let json = serde_json::to_vec_pretty(&stamped.without_payload())?;
                std::fs::write(&path, json)?;
            }
        }
        tracing::debug!(key = %stamped.key(), path = %path.display(), "file sink wrote item");
        Ok(())
    }

    fn find_items(&self, query: &Query, window: Option<&DatetimeInterval>) -> Result<Vec<Item>> {
        let mut found = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.path().is_file() {
                continue;
            }
            let key = entry.file_name().to_string_lossy().to_string();
            if let Some(wanted) = query.fields.get("key") {
                if *wanted != key {
                    continue;
                }
            }
            if let Some(window) = window.or(query.window.as_ref()) {
                let mtime: DateTime<Utc> = entry.metadata()?.modified()?.into();
                if !window.contains(mtime) {
                    continue;
                }
            }
            found.push(Item::new(ItemLevel::Instance).with_natural_key(key));
        }
        Ok(found)
    }
}

/// Sink backed by a peer [`Archive`].
pub struct ArchiveSink {
    name: String,
    archive: Arc<dyn Archive>,
}

impl ArchiveSink {
    pub fn new(name: impl Into<String>, archive: Arc<dyn Archive>) -> Self {
        Self {
            name: name.into(),
            archive,
        }
    }
}

impl Sink for ArchiveSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn put(&self, item: &Item, routing: &RoutingParams) -> Result<()> {
        let stamped = routing.stamp(item);
        self.archive.store(&stamped)
    }

    fn find_items(&self, query: &Query, window: Option<&DatetimeInterval>) -> Result<Vec<Item>> {
        let mut query = query.clone();
        if let Some(window) = window {
            query.window = Some(*window);
        }
        // Peer archives hold whole studies; key-field queries are not
        // supported by the archive interface.
        if query.fields.contains_key("key") {
            return Err(Error::Unsupported("key queries on an archive sink"));
        }
        self.archive.find(&query, ItemLevel::Study, false)
    }
}

//! UnpackAndPut: explode an archive blob into per-entry items.

use super::{Handler, HandlerParams};
use crate::error::{Error, Result};
use crate::sink::Sink;
use crate::source::Source;
use gantry_core::{ChangeEvent, Item, ItemLevel};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One entry enumerated from an archive blob.
#[derive(Debug, Clone)]
pub struct BlobEntry {
    /// Entry name, unique within the blob.
    pub name: String,
    /// Entry metadata.
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Entry bytes.
    pub payload: Vec<u8>,
}

/// Enumerates the entries of an archive blob.
///
/// Concrete archive formats (zip and friends) are collaborator territory;
/// the engine only needs the enumeration seam.
pub trait BlobUnpacker: Send + Sync {
    /// Enumerate entries. A payload this unpacker does not understand is a
    /// [`Error::Format`]: the blob is skipped, the batch continues.
    fn entries(&self, payload: &[u8]) -> Result<Vec<BlobEntry>>;
}

#[derive(Deserialize)]
struct JsonBundleEntry {
    name: String,
    #[serde(default)]
    metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    content: String,
}

/// Unpacker for JSON bundle blobs: a top-level array of
/// `{name, metadata?, content?}` objects.
pub struct JsonBundleUnpacker;

impl BlobUnpacker for JsonBundleUnpacker {
    fn entries(&self, payload: &[u8]) -> Result<Vec<BlobEntry>> {
        let raw: Vec<JsonBundleEntry> = serde_json::from_slice(payload)
            .map_err(|e| Error::Format(format!("not a JSON bundle: {e}")))?;
        Ok(raw
            .into_iter()
            .map(|e| BlobEntry {
                name: e.name,
                metadata: e.metadata,
                payload: e.content.into_bytes(),
            })
            .collect())
    }
}

/// Unpacks an archive blob and puts one item per entry.
///
/// The original blob is removed from its source only after *every* entry
/// has been delivered; any failure leaves the blob in place so the whole
/// set is re-offered later. Idempotent puts make that replay safe.
pub struct UnpackAndPut {
    sink: Arc<dyn Sink>,
    params: HandlerParams,
    unpacker: Arc<dyn BlobUnpacker>,
}

impl UnpackAndPut {
    pub fn new(sink: Arc<dyn Sink>, params: HandlerParams, unpacker: Arc<dyn BlobUnpacker>) -> Self {
        Self {
            sink,
            params,
            unpacker,
        }
    }

    fn entry_item(&self, blob_key: &str, entry: BlobEntry) -> Item {
        let mut item = Item::new(ItemLevel::Instance)
            .with_natural_key(format!("{blob_key}/{}", entry.name))
            .with_payload(entry.payload);
        item.metadata = entry.metadata;
        item
    }
}

impl Handler for UnpackAndPut {
    fn name(&self) -> &'static str {
        "UnpackAndPut"
    }

    fn handle(&self, event: &ChangeEvent, source: &dyn Source) -> Result<Option<Item>> {
        let blob = match &event.item.payload {
            Some(_) => event.item.clone(),
            None => source.fetch(&event.item, true)?,
        };
        let payload = blob
            .payload
            .as_deref()
            .ok_or_else(|| Error::Format(format!("item {} has no payload to unpack", blob.key())))?;

        let entries = self.unpacker.entries(payload)?;
        let total = entries.len();
        let routing = self.params.routing();
        for entry in entries {
            let item = self.entry_item(&blob.key(), entry);
            self.sink.put(&item, &routing)?;
        }

        // All entries delivered; now the blob itself may go.
        if self.params.remove_source {
            source.remove(&event.item)?;
        }
        tracing::debug!(
            blob = %blob.key(),
            entries = total,
            sink = self.sink.name(),
            "unpacked blob"
        );
        Ok(Some(blob.without_payload()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{Archive, MemoryArchive, Query};
    use crate::sink::{MemoryIndexSink, RoutingParams};
    use crate::source::ArchiveSource;
    use gantry_core::{DatetimeInterval, EventKind, HashMinter};
    use parking_lot::Mutex;

    fn bundle_json() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!([
            {"name": "slice-1.dcm", "metadata": {"modality": "CT"}, "content": "AAAA"},
            {"name": "slice-2.dcm", "metadata": {"modality": "CT"}, "content": "BBBB"},
        ]))
        .unwrap()
    }

    fn fixture(payload: Vec<u8>) -> (ArchiveSource, Arc<MemoryArchive>, Item) {
        let archive = Arc::new(MemoryArchive::new(Arc::new(HashMinter::default())));
        let item = Item::new(ItemLevel::Instance)
            .with_natural_key("bundle-7")
            .with_payload(payload);
        archive.store(&item).unwrap();
        (ArchiveSource::new("drop", archive.clone()), archive, item)
    }

    #[test]
    fn unpacks_one_item_per_entry_then_removes_blob() {
        let (source, archive, item) = fixture(bundle_json());
        let sink = Arc::new(MemoryIndexSink::new("idx"));
        let handler = UnpackAndPut::new(
            sink.clone(),
            HandlerParams {
                remove_source: true,
                ..Default::default()
            },
            Arc::new(JsonBundleUnpacker),
        );

        let event = ChangeEvent::new(EventKind::InstanceAdded, item.without_payload(), "drop");
        handler.handle(&event, &source).unwrap();

        assert_eq!(sink.len(), 2);
        assert!(sink.get("bundle-7/slice-1.dcm").is_some());
        assert!(sink.get("bundle-7/slice-2.dcm").is_some());
        assert!(!archive.check(&item).unwrap());
    }

    #[test]
    fn malformed_blob_is_a_format_error_and_keeps_the_blob() {
        let (source, archive, item) = fixture(b"not json at all".to_vec());
        let sink = Arc::new(MemoryIndexSink::new("idx"));
        let handler = UnpackAndPut::new(
            sink.clone(),
            HandlerParams {
                remove_source: true,
                ..Default::default()
            },
            Arc::new(JsonBundleUnpacker),
        );

        let event = ChangeEvent::new(EventKind::InstanceAdded, item.without_payload(), "drop");
        let err = handler.handle(&event, &source).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
        assert!(sink.is_empty());
        assert!(archive.check(&item).unwrap());
    }

    /// Sink that fails on the second entry, to pin the all-or-keep rule.
    struct SecondPutFails {
        puts: Mutex<usize>,
        inner: MemoryIndexSink,
    }

    impl Sink for SecondPutFails {
        fn name(&self) -> &str {
            "flaky"
        }
        fn put(&self, item: &Item, routing: &RoutingParams) -> crate::error::Result<()> {
            let mut puts = self.puts.lock();
            *puts += 1;
            if *puts == 2 {
                return Err(Error::Transient("index hiccup".into()));
            }
            self.inner.put(item, routing)
        }
        fn find_items(
            &self,
            query: &Query,
            window: Option<&DatetimeInterval>,
        ) -> crate::error::Result<Vec<Item>> {
            self.inner.find_items(query, window)
        }
    }

    #[test]
    fn partial_entry_failure_keeps_the_blob() {
        let (source, archive, item) = fixture(bundle_json());
        let sink = Arc::new(SecondPutFails {
            puts: Mutex::new(0),
            inner: MemoryIndexSink::new("idx"),
        });
        let handler = UnpackAndPut::new(
            sink,
            HandlerParams {
                remove_source: true,
                ..Default::default()
            },
            Arc::new(JsonBundleUnpacker),
        );

        let event = ChangeEvent::new(EventKind::InstanceAdded, item.without_payload(), "drop");
        assert!(handler.handle(&event, &source).is_err());
        assert!(archive.check(&item).unwrap());
    }

    #[test]
    fn fetches_payload_when_event_item_is_metadata_only() {
        let (source, _archive, item) = fixture(bundle_json());
        let sink = Arc::new(MemoryIndexSink::new("idx"));
        let handler =
            UnpackAndPut::new(sink.clone(), HandlerParams::default(), Arc::new(JsonBundleUnpacker));

        // Event carries no payload; the handler must pull it from the source.
        let event = ChangeEvent::new(EventKind::InstanceAdded, item.without_payload(), "drop");
        handler.handle(&event, &source).unwrap();
        assert_eq!(sink.len(), 2);
    }
}

//! AnonymizeAndMove: deliver a sham copy, optionally drop the original.

use super::{Handler, HandlerParams};
use crate::error::Result;
use crate::sink::Sink;
use crate::source::Source;
use gantry_core::{ChangeEvent, Item};
use std::sync::Arc;

/// Delivers an anonymized copy of the item.
///
/// The source's anonymize operation mints a *new* item with deterministic
/// pseudo-identifiers; the original is never modified in place. Only the
/// sham item reaches the sink. Removal of the original is optional and
/// happens only after the sham has been delivered.
pub struct AnonymizeAndMove {
    sink: Arc<dyn Sink>,
    params: HandlerParams,
}

impl AnonymizeAndMove {
    pub fn new(sink: Arc<dyn Sink>, params: HandlerParams) -> Self {
        Self { sink, params }
    }
}

impl Handler for AnonymizeAndMove {
    fn name(&self) -> &'static str {
        "AnonymizeAndMove"
    }

    fn handle(&self, event: &ChangeEvent, source: &dyn Source) -> Result<Option<Item>> {
        // Metadata-only view is enough: anonymization rewrites identity
        // fields, not pixel data.
        let original = source.fetch(&event.item, false)?;
        let sham = source.anonymize(&original, &self.params.replacements)?;
        self.sink.put(&sham, &self.params.routing())?;

        if self.params.remove_source {
            source.remove(&event.item)?;
        }
        tracing::debug!(
            original = %original.key(),
            sham = %sham.key(),
            sink = self.sink.name(),
            "anonymized and delivered"
        );
        Ok(Some(sham))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{Archive, MemoryArchive};
    use crate::sink::MemoryIndexSink;
    use crate::source::ArchiveSource;
    use gantry_core::{EventKind, HashMinter, Item, ItemLevel, META_PATIENT_NAME};
    use std::collections::BTreeMap;

    fn fixture() -> (ArchiveSource, Arc<MemoryArchive>, Item) {
        let archive = Arc::new(MemoryArchive::new(Arc::new(HashMinter::default())));
        let item = Item::new(ItemLevel::Study)
            .with_natural_key("ACC1")
            .with_meta(META_PATIENT_NAME, "Doe^Jane");
        archive.store(&item).unwrap();
        (ArchiveSource::new("pacs", archive.clone()), archive, item)
    }

    #[test]
    fn sham_item_reaches_sink_original_stays() {
        let (source, archive, item) = fixture();
        let sink = Arc::new(MemoryIndexSink::new("anon-idx"));
        let handler = AnonymizeAndMove::new(sink.clone(), HandlerParams::default());

        let event = ChangeEvent::new(EventKind::StudyAdded, item.clone(), "pacs");
        let sham = handler.handle(&event, &source).unwrap().unwrap();

        assert_ne!(sham.key(), "ACC1");
        assert_ne!(sham.meta_str(META_PATIENT_NAME), Some("Doe^Jane"));
        assert!(sink.get(&sham.key()).is_some());
        assert!(sink.get("ACC1").is_none());
        assert!(archive.check(&item).unwrap());
    }

    #[test]
    fn remove_flag_drops_the_original_after_delivery() {
        let (source, archive, item) = fixture();
        let sink = Arc::new(MemoryIndexSink::new("anon-idx"));
        let handler = AnonymizeAndMove::new(
            sink,
            HandlerParams {
                remove_source: true,
                ..Default::default()
            },
        );

        let event = ChangeEvent::new(EventKind::StudyAdded, item.clone(), "pacs");
        handler.handle(&event, &source).unwrap();
        assert!(!archive.check(&item).unwrap());
    }

    #[test]
    fn replacements_override_metadata() {
        let (source, _archive, item) = fixture();
        let sink = Arc::new(MemoryIndexSink::new("anon-idx"));
        let mut replacements = BTreeMap::new();
        replacements.insert("institution".to_string(), "SITE-X".to_string());
        let handler = AnonymizeAndMove::new(
            sink,
            HandlerParams {
                replacements,
                ..Default::default()
            },
        );

        let event = ChangeEvent::new(EventKind::StudyAdded, item, "pacs");
        let sham = handler.handle(&event, &source).unwrap().unwrap();
        assert_eq!(sham.meta_str("institution"), Some("SITE-X"));
    }

    #[test]
    fn anonymization_is_deterministic_across_deliveries() {
        let (source, _archive, item) = fixture();
        let sink = Arc::new(MemoryIndexSink::new("anon-idx"));
        let handler = AnonymizeAndMove::new(sink.clone(), HandlerParams::default());

        let event = ChangeEvent::new(EventKind::StudyAdded, item, "pacs");
        let first = handler.handle(&event, &source).unwrap().unwrap();
        let second = handler.handle(&event, &source).unwrap().unwrap();
        assert_eq!(first.key(), second.key());
        assert_eq!(sink.len(), 1);
    }
}

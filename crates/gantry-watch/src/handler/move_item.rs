//! Move: fetch, deliver, then remove.

use super::{Handler, HandlerParams};
use crate::error::Result;
use crate::sink::Sink;
use crate::source::Source;
use gantry_core::{ChangeEvent, Item};
use std::sync::Arc;

/// Moves an item from its source to a sink.
///
/// Safety invariant: the source copy is removed only after the sink has
/// confirmed the put. A failed put leaves the source untouched, so the item
/// is re-offered on a later cycle.
pub struct MoveItem {
    sink: Arc<dyn Sink>,
    params: HandlerParams,
}

impl MoveItem {
    pub fn new(sink: Arc<dyn Sink>, params: HandlerParams) -> Self {
        Self { sink, params }
    }
}

impl Handler for MoveItem {
    fn name(&self) -> &'static str {
        "Move"
    }

    fn handle(&self, event: &ChangeEvent, source: &dyn Source) -> Result<Option<Item>> {
        let full = source.fetch(&event.item, true)?;
        self.sink.put(&full, &self.params.routing())?;

        if self.params.remove_source {
            source.remove(&event.item)?;
        }
        tracing::debug!(
            key = %full.key(),
            sink = self.sink.name(),
            removed = self.params.remove_source,
            "moved item"
        );
        Ok(Some(full))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{Archive, MemoryArchive, Query};
    use crate::error::Error;
    use crate::sink::{MemoryIndexSink, RoutingParams};
    use crate::source::ArchiveSource;
    use gantry_core::{DatetimeInterval, EventKind, HashMinter, Item, ItemLevel};

    struct FailingSink;

    impl Sink for FailingSink {
        fn name(&self) -> &str {
            "broken"
        }
        fn put(&self, _item: &Item, _routing: &RoutingParams) -> Result<()> {
            Err(Error::Transient("index unreachable".into()))
        }
        fn find_items(
            &self,
            _query: &Query,
            _window: Option<&DatetimeInterval>,
        ) -> Result<Vec<Item>> {
            Ok(Vec::new())
        }
    }

    fn fixture() -> (ArchiveSource, Arc<MemoryArchive>, Item) {
        let archive = Arc::new(MemoryArchive::new(Arc::new(HashMinter::default())));
        let item = Item::new(ItemLevel::Instance)
            .with_natural_key("SOP1")
            .with_payload(b"DICM".to_vec());
        archive.store(&item).unwrap();
        (ArchiveSource::new("pacs", archive.clone()), archive, item)
    }

    #[test]
    fn successful_move_puts_then_removes() {
        let (source, archive, item) = fixture();
        let sink = Arc::new(MemoryIndexSink::new("idx"));
        let handler = MoveItem::new(
            sink.clone(),
            HandlerParams {
                remove_source: true,
                ..Default::default()
            },
        );

        let event = ChangeEvent::new(EventKind::InstanceAdded, item.without_payload(), "pacs");
        let moved = handler.handle(&event, &source).unwrap().unwrap();

        assert_eq!(moved.key(), "SOP1");
        assert!(sink.get("SOP1").is_some());
        assert!(!archive.check(&item).unwrap());
    }

    #[test]
    fn failed_put_leaves_source_untouched() {
        let (source, archive, item) = fixture();
        let handler = MoveItem::new(
            Arc::new(FailingSink),
            HandlerParams {
                remove_source: true,
                ..Default::default()
            },
        );

        let event = ChangeEvent::new(EventKind::InstanceAdded, item.without_payload(), "pacs");
        let err = handler.handle(&event, &source).unwrap_err();
        assert!(err.is_transient());
        assert!(archive.check(&item).unwrap());
    }

    #[test]
    fn copy_semantics_without_remove_flag() {
        let (source, archive, item) = fixture();
        let sink = Arc::new(MemoryIndexSink::new("idx"));
        let handler = MoveItem::new(sink.clone(), HandlerParams::default());

        let event = ChangeEvent::new(EventKind::InstanceAdded, item.without_payload(), "pacs");
        handler.handle(&event, &source).unwrap();

        assert!(sink.get("SOP1").is_some());
        assert!(archive.check(&item).unwrap());
    }
}

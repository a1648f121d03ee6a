//! Proxied-modality source: windowed match queries.

use super::{Cursor, PollBatch, Source};
use crate::archive::{Archive, Query};
use crate::error::{Error, Result};
use chrono::Utc;
use gantry_core::{ChangeEvent, DatetimeInterval, EventKind, Item, ItemLevel};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Source over an archive that relays queries to a remote modality.
///
/// Each poll runs the configured match query restricted to the cursor
/// window and reports every hit as a `NEW_MATCH`. The window only slides
/// forward once its end has elapsed, so consecutive polls inside the same
/// window re-report the same matches; the router's discovery dedup queue
/// is what keeps those repeats from dispatching twice.
pub struct ProxyArchiveSource {
    id: String,
    archive: Arc<dyn Archive>,
    query: Query,
    level: ItemLevel,
    initial_window: DatetimeInterval,
}

impl ProxyArchiveSource {
    pub fn new(
        id: impl Into<String>,
        archive: Arc<dyn Archive>,
        query: Query,
        initial_window: DatetimeInterval,
    ) -> Self {
        Self {
            id: id.into(),
            archive,
            query,
            level: ItemLevel::Study,
            initial_window,
        }
    }

    /// Change the level match queries run at (default: study).
    pub fn with_level(mut self, level: ItemLevel) -> Self {
        self.level = level;
        self
    }

    fn window_query(&self, window: &DatetimeInterval) -> Query {
        self.query.clone().within(*window)
    }
}

impl Source for ProxyArchiveSource {
    fn source_id(&self) -> &str {
        &self.id
    }

    fn initial_cursor(&self) -> Cursor {
        Cursor::Window(self.initial_window)
    }

    fn poll(&self, cursor: &Cursor) -> Result<PollBatch> {
        let window = match cursor {
            Cursor::Window(w) => *w,
            other => {
                return Err(Error::Config(format!(
                    "proxy source '{}' needs a window cursor, got {other}",
                    self.id
                )))
            }
        };

        // Matches are found-but-not-yet-retrieved: metadata only, the
        // IndexByProxy handler decides whether to pull the payload.
        let matches = self
            .archive
            .find(&self.window_query(&window), self.level, false)?;

        let events: Vec<ChangeEvent> = matches
            .into_iter()
            .map(|item| ChangeEvent::new(EventKind::NewMatch, item, &self.id))
            .collect();

        // Slide only when the window's end has passed; until then the same
        // window is re-queried so late-arriving matches are still seen.
        let mut next = window;
        if Utc::now() >= window.latest() {
            next.advance();
        }

        Ok(PollBatch {
            events,
            cursor: Cursor::Window(next),
        })
    }

    fn discover(&self, window: &DatetimeInterval) -> Result<Vec<Item>> {
        self.archive.find(&self.window_query(window), self.level, false)
    }

    fn fetch(&self, item: &Item, with_payload: bool) -> Result<Item> {
        self.archive.get(item, with_payload)
    }

    fn check(&self, item: &Item) -> Result<bool> {
        self.archive.check(item)
    }

    fn remove(&self, item: &Item) -> Result<()> {
        self.archive.remove(item)
    }

    fn anonymize(&self, item: &Item, replacements: &BTreeMap<String, String>) -> Result<Item> {
        self.archive.anonymize(item, replacements)
    }

    fn find_retrieve(&self, item: &Item) -> Result<Item> {
        self.archive.get(item, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MemoryArchive;
    use chrono::Duration;
    use gantry_core::{HashMinter, META_CONTENT_TIME};

    fn study_at(key: &str, time: &str) -> Item {
        Item::new(ItemLevel::Study)
            .with_natural_key(key)
            .with_meta("modality", "CT")
            .with_meta(META_CONTENT_TIME, time)
    }

    fn proxy_over(archive: Arc<MemoryArchive>, window: DatetimeInterval) -> ProxyArchiveSource {
        ProxyArchiveSource::new("remote-ct", archive, Query::field("modality", "CT"), window)
    }

    #[test]
    fn poll_reports_window_matches_as_new_match() {
        let archive = Arc::new(MemoryArchive::new(Arc::new(HashMinter::default())));
        archive
            .store(&study_at("ACC1", "2024-06-01T12:10:00Z"))
            .unwrap();
        archive
            .store(&study_at("ACC2", "2024-06-01T18:00:00Z"))
            .unwrap();

        let window = DatetimeInterval::new(
            "2024-06-01T12:00:00Z".parse().unwrap(),
            "2024-06-01T12:30:00Z".parse().unwrap(),
        );
        let source = proxy_over(archive, window);
        let batch = source.poll(&source.initial_cursor()).unwrap();

        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.events[0].kind, EventKind::NewMatch);
        assert_eq!(batch.events[0].item.key(), "ACC1");
        assert!(batch.events[0].item.payload.is_none());
    }

    #[test]
    fn elapsed_window_advances_by_its_width() {
        let archive = Arc::new(MemoryArchive::new(Arc::new(HashMinter::default())));
        // A window wholly in the past has certainly elapsed.
        let window = DatetimeInterval::new(
            "2024-06-01T12:00:00Z".parse().unwrap(),
            "2024-06-01T12:30:00Z".parse().unwrap(),
        );
        let source = proxy_over(archive, window);
        let batch = source.poll(&Cursor::Window(window)).unwrap();

        match batch.cursor {
            Cursor::Window(next) => {
                assert_eq!(next.earliest(), window.earliest() + Duration::minutes(30));
                assert_eq!(next.width(), window.width());
            }
            other => panic!("expected window cursor, got {other}"),
        }
    }

    #[test]
    fn future_window_does_not_advance() {
        let archive = Arc::new(MemoryArchive::new(Arc::new(HashMinter::default())));
        let window = DatetimeInterval::starting_at(Utc::now(), Duration::hours(1));
        let source = proxy_over(archive, window);
        let batch = source.poll(&Cursor::Window(window)).unwrap();
        assert_eq!(batch.cursor, Cursor::Window(window));
    }

    #[test]
    fn wrong_cursor_kind_is_a_config_error() {
        let archive = Arc::new(MemoryArchive::new(Arc::new(HashMinter::default())));
        let window = DatetimeInterval::starting_at(Utc::now(), Duration::hours(1));
        let source = proxy_over(archive, window);
        let err = source.poll(&Cursor::Sequence(0)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}

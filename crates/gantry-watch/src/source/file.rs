//! Drop-folder source backed by native filesystem notifications.

use super::{Cursor, PollBatch, Source};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use gantry_core::{ChangeEvent, DatetimeInterval, EventKind, Item, ItemLevel, META_CONTENT_TIME};
use notify::{recommended_watcher, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, TryRecvError};

/// Source over a filesystem drop folder.
///
/// A `notify` watcher buffers create/modify notifications into a channel;
/// `poll` drains whatever has accumulated since the last cycle. The cursor
/// is [`Cursor::None`] because the buffered channel *is* the position.
/// Payloads are read lazily by `fetch`, never during discovery, so a poll
/// cycle stays cheap even when large studies land in the folder.
pub struct FileSource {
    id: String,
    root: PathBuf,
    // The watcher must outlive the source or notifications stop.
    _watcher: Mutex<RecommendedWatcher>,
    rx: Mutex<Receiver<notify::Result<notify::Event>>>,
}

impl FileSource {
    /// Watch `root` (created if missing) for dropped files.
    pub fn new(id: impl Into<String>, root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        let (tx, rx) = std::sync::mpsc::channel();
        let mut watcher = recommended_watcher(tx)?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        Ok(Self {
            id: id.into(),
            root,
            _watcher: Mutex::new(watcher),
            rx: Mutex::new(rx),
        })
    }

    /// The watched folder.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn relative_key(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    fn item_for_path(&self, path: &Path) -> Result<Item> {
        let meta = std::fs::metadata(path)?;
        let mtime: DateTime<Utc> = meta.modified()?.into();
        Ok(Item::new(ItemLevel::Instance)
            .with_natural_key(self.relative_key(path))
            .with_meta("path", path.to_string_lossy().to_string())
            .with_meta("size", meta.len())
            .with_meta(META_CONTENT_TIME, mtime.to_rfc3339()))
    }

    fn path_for(&self, item: &Item) -> PathBuf {
        match item.meta_str("path") {
            Some(p) => PathBuf::from(p),
            None => self.root.join(item.key()),
        }
    }

    /// Drain buffered notifications into a de-duplicated path set.
    /// A burst of modify events for one file collapses to a single entry.
    fn drain_paths(&self) -> Result<BTreeSet<PathBuf>> {
        let rx = self.rx.lock();
        let mut paths = BTreeSet::new();
        loop {
            match rx.try_recv() {
                Ok(Ok(event)) => {
                    if matches!(
                        event.kind,
                        notify::EventKind::Create(_) | notify::EventKind::Modify(_)
                    ) {
                        paths.extend(event.paths);
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!(source = %self.id, "watch notification error: {e}");
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    return Err(Error::Watch(format!(
                        "watcher channel for '{}' disconnected",
                        self.id
                    )));
                }
            }
        }
        Ok(paths)
    }

    fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                Self::walk(&path, out)?;
            } else if path.is_file() {
                out.push(path);
            }
        }
        Ok(())
    }
}

impl Source for FileSource {
    fn source_id(&self) -> &str {
        &self.id
    }

    fn initial_cursor(&self) -> Cursor {
        Cursor::None
    }

    fn poll(&self, _cursor: &Cursor) -> Result<PollBatch> {
        let mut events = Vec::new();
        for path in self.drain_paths()? {
            if !path.is_file() {
                continue;
            }
            match self.item_for_path(&path) {
                Ok(item) => events.push(ChangeEvent::new(EventKind::InstanceAdded, item, &self.id)),
                // The file can vanish between notification and stat; skip it.
                Err(e) => {
                    tracing::debug!(source = %self.id, path = %path.display(), "skipping path: {e}")
                }
            }
        }
        Ok(PollBatch {
            events,
            cursor: Cursor::None,
        })
    }

    fn discover(&self, window: &DatetimeInterval) -> Result<Vec<Item>> {
        let mut paths = Vec::new();
        Self::walk(&self.root, &mut paths)?;
        paths.sort();

        let mut items = Vec::new();
        for path in paths {
            let mtime: DateTime<Utc> = std::fs::metadata(&path)?.modified()?.into();
            if window.contains(mtime) {
                items.push(self.item_for_path(&path)?);
            }
        }
        Ok(items)
    }

    fn fetch(&self, item: &Item, with_payload: bool) -> Result<Item> {
        let path = self.path_for(item);
        let mut fetched = self.item_for_path(&path)?;
        if with_payload {
            fetched.payload = Some(std::fs::read(&path)?);
        }
        Ok(fetched)
    }

    fn check(&self, item: &Item) -> Result<bool> {
        Ok(self.path_for(item).is_file())
    }

    fn remove(&self, item: &Item) -> Result<()> {
        match std::fs::remove_file(self.path_for(item)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn anonymize(&self, _item: &Item, _replacements: &std::collections::BTreeMap<String, String>) -> Result<Item> {
        Err(Error::Unsupported("anonymize on a file source"))
    }

    fn find_retrieve(&self, item: &Item) -> Result<Item> {
        self.fetch(item, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::time::Instant;
    use tempfile::TempDir;

    /// Poll until the watcher has surfaced at least one event, bounded so a
    /// broken watcher fails the test instead of hanging it.
    fn poll_until_events(source: &FileSource) -> Vec<ChangeEvent> {
        let deadline = Instant::now() + std::time::Duration::from_secs(5);
        loop {
            let batch = source.poll(&Cursor::None).unwrap();
            if !batch.events.is_empty() {
                return batch.events;
            }
            assert!(Instant::now() < deadline, "no events before deadline");
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
    }

    #[test]
    fn dropped_file_surfaces_as_instance_added() {
        let tmp = TempDir::new().unwrap();
        let source = FileSource::new("inbox", tmp.path().join("drop")).unwrap();

        std::fs::write(source.root().join("scan001.dcm"), b"DICM").unwrap();

        let events = poll_until_events(&source);
        assert_eq!(events[0].kind, EventKind::InstanceAdded);
        assert_eq!(events[0].item.key(), "scan001.dcm");
        assert!(events[0].item.payload.is_none());
        assert_eq!(events[0].source_id, "inbox");
    }

    #[test]
    fn quiet_folder_polls_empty() {
        let tmp = TempDir::new().unwrap();
        let source = FileSource::new("inbox", tmp.path().join("drop")).unwrap();
        let batch = source.poll(&Cursor::None).unwrap();
        assert!(batch.events.is_empty());
        let again = source.poll(&Cursor::None).unwrap();
        assert!(again.events.is_empty());
    }

    #[test]
    fn fetch_reads_payload_lazily() {
        let tmp = TempDir::new().unwrap();
        let source = FileSource::new("inbox", tmp.path().join("drop")).unwrap();
        std::fs::write(source.root().join("a.dcm"), b"DICM-bytes").unwrap();

        let item = Item::new(ItemLevel::Instance).with_natural_key("a.dcm");
        let fetched = source.fetch(&item, true).unwrap();
        assert_eq!(fetched.payload.as_deref(), Some(&b"DICM-bytes"[..]));

        let meta_only = source.fetch(&item, false).unwrap();
        assert!(meta_only.payload.is_none());
    }

    #[test]
    fn check_and_remove_are_key_addressed() {
        let tmp = TempDir::new().unwrap();
        let source = FileSource::new("inbox", tmp.path().join("drop")).unwrap();
        std::fs::write(source.root().join("a.dcm"), b"x").unwrap();

        let item = Item::new(ItemLevel::Instance).with_natural_key("a.dcm");
        assert!(source.check(&item).unwrap());
        source.remove(&item).unwrap();
        assert!(!source.check(&item).unwrap());
        // Idempotent: removing again is fine.
        source.remove(&item).unwrap();
    }

    #[test]
    fn discover_filters_by_mtime_window() {
        let tmp = TempDir::new().unwrap();
        let source = FileSource::new("inbox", tmp.path().join("drop")).unwrap();
        std::fs::write(source.root().join("recent.dcm"), b"x").unwrap();

        let covering = DatetimeInterval::new(Utc::now() - Duration::minutes(5), Utc::now() + Duration::minutes(5));
        let items = source.discover(&covering).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].key(), "recent.dcm");

        let elsewhere = DatetimeInterval::new(
            Utc::now() - Duration::hours(2),
            Utc::now() - Duration::hours(1),
        );
        assert!(source.discover(&elsewhere).unwrap().is_empty());
    }

    #[test]
    fn anonymize_is_unsupported() {
        let tmp = TempDir::new().unwrap();
        let source = FileSource::new("inbox", tmp.path().join("drop")).unwrap();
        let item = Item::new(ItemLevel::Instance).with_natural_key("a.dcm");
        let err = source.anonymize(&item, &Default::default()).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }
}

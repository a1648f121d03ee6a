//! Change sources and the capability interface handlers call back into.
//!
//! # Available Sources
//!
//! - [`ArchiveSource`] - drains a local archive's sequenced change feed
//! - [`ProxyArchiveSource`] - windowed match queries against a proxied
//!   remote modality
//! - [`FileSource`] - drop-folder watcher on native filesystem notifications
//!
//! # Architecture
//!
//! All sources implement the [`Source`] trait. `poll` is cursor-in,
//! cursor-out: the caller owns the cursor and hands it back on the next
//! cycle, so a source carries no per-poll mutable state of its own and the
//! cursor survives as the single resumable position. Beyond polling, a
//! source exposes the item operations handlers need mid-pipeline: fetch,
//! check, remove, anonymize, retrieve.

mod archive;
mod file;
mod proxy;

pub use archive::ArchiveSource;
pub use file::FileSource;
pub use proxy::ProxyArchiveSource;

use crate::error::Result;
use gantry_core::{ChangeEvent, DatetimeInterval, Item};
use std::collections::BTreeMap;
use std::fmt;

/// A source's resumable poll position.
///
/// Cursor semantics are source-specific: a sequence number for an archive
/// change feed, a sliding window for proxied queries, nothing for
/// notification-driven sources.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cursor {
    /// No cursor; the source buffers its own notifications.
    None,
    /// Position in a monotonically increasing change feed.
    Sequence(u64),
    /// Sliding query window against a remote modality.
    Window(DatetimeInterval),
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cursor::None => f.write_str("none"),
            Cursor::Sequence(seq) => write!(f, "seq:{seq}"),
            Cursor::Window(w) => write!(f, "window:{w}"),
        }
    }
}

/// One poll cycle's output: events in source order plus the updated cursor.
#[derive(Debug, Clone)]
pub struct PollBatch {
    /// Events in the order the source produced them.
    pub events: Vec<ChangeEvent>,
    /// Cursor to hand back on the next poll.
    pub cursor: Cursor,
}

impl PollBatch {
    /// An empty batch that leaves the cursor where it was.
    pub fn empty(cursor: Cursor) -> Self {
        Self {
            events: Vec::new(),
            cursor,
        }
    }
}

/// A polled origin of change events.
///
/// Contract: two successive `poll` calls with no upstream change return an
/// empty batch. A connectivity failure returns [`crate::Error::Transient`]
/// and the caller retries on the *next* scheduled interval. A malformed
/// upstream response is logged and treated as "no events this cycle".
pub trait Source: Send + Sync {
    /// Name this source is registered under (used in routes and logs).
    fn source_id(&self) -> &str;

    /// The cursor a fresh poll loop starts from.
    fn initial_cursor(&self) -> Cursor;

    /// Collect changes since `cursor`.
    fn poll(&self, cursor: &Cursor) -> Result<PollBatch>;

    /// Harvester-facing discovery: items whose timestamp falls in `window`.
    fn discover(&self, window: &DatetimeInterval) -> Result<Vec<Item>>;

    /// Fetch an item's current state; `with_payload` pulls the raw bytes.
    fn fetch(&self, item: &Item, with_payload: bool) -> Result<Item>;

    /// Whether the source still holds the item.
    fn check(&self, item: &Item) -> Result<bool>;

    /// Remove the item from the source. Idempotent.
    fn remove(&self, item: &Item) -> Result<()>;

    /// Mint an anonymized copy of the item (a new item, original untouched).
    fn anonymize(&self, item: &Item, replacements: &BTreeMap<String, String>) -> Result<Item>;

    /// Retrieve a found-but-not-yet-transferred match in full.
    fn find_retrieve(&self, item: &Item) -> Result<Item>;
}

//! Typed change events emitted by sources.

use crate::item::Item;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The stable event type enumeration.
///
/// Serialized in configuration and logs as `SCREAMING_SNAKE_CASE`
/// (`INSTANCE_ADDED`, `NEW_MATCH`, ...). The set is closed: routing tables
/// key on it, and adding a variant is a breaking configuration change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    InstanceAdded,
    SeriesAdded,
    StudyAdded,
    NewMatch,
    Alert,
}

impl EventKind {
    /// Stable uppercase name, matching the configuration encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::InstanceAdded => "INSTANCE_ADDED",
            EventKind::SeriesAdded => "SERIES_ADDED",
            EventKind::StudyAdded => "STUDY_ADDED",
            EventKind::NewMatch => "NEW_MATCH",
            EventKind::Alert => "ALERT",
        }
    }

    /// Whether events of this kind pass through the discovery dedup queue
    /// before dispatch. Only proxied match discovery re-reports the same
    /// item across overlapping query windows.
    pub fn requires_match_dedup(&self) -> bool {
        matches!(self, EventKind::NewMatch)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable change record produced by a source poll.
///
/// Created exclusively by `Source::poll`; consumed best-effort exactly once
/// by the dispatch loop. The payload item travels by value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// What happened.
    pub kind: EventKind,

    /// The item the event is about.
    pub item: Item,

    /// Name of the source that produced the event.
    pub source_id: String,

    /// Unique id for log correlation.
    pub event_id: Uuid,
}

impl ChangeEvent {
    /// Create a new event with a fresh id.
    pub fn new(kind: EventKind, item: Item, source_id: impl Into<String>) -> Self {
        Self {
            kind,
            item,
            source_id: source_id.into(),
            event_id: Uuid::new_v4(),
        }
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} from {}", self.kind, self.item, self.source_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemLevel;

    #[test]
    fn kind_serializes_screaming_snake() {
        let json = serde_json::to_string(&EventKind::InstanceAdded).unwrap();
        assert_eq!(json, "\"INSTANCE_ADDED\"");
        let back: EventKind = serde_json::from_str("\"NEW_MATCH\"").unwrap();
        assert_eq!(back, EventKind::NewMatch);
    }

    #[test]
    fn only_new_match_requires_dedup() {
        assert!(EventKind::NewMatch.requires_match_dedup());
        for kind in [
            EventKind::InstanceAdded,
            EventKind::SeriesAdded,
            EventKind::StudyAdded,
            EventKind::Alert,
        ] {
            assert!(!kind.requires_match_dedup());
        }
    }

    #[test]
    fn events_get_distinct_ids() {
        let item = Item::new(ItemLevel::Study).with_natural_key("ACC1");
        let a = ChangeEvent::new(EventKind::StudyAdded, item.clone(), "pacs");
        let b = ChangeEvent::new(EventKind::StudyAdded, item, "pacs");
        assert_ne!(a.event_id, b.event_id);
    }
}

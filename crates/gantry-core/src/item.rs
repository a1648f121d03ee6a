//! Domain items: patient/study/series/instance handles plus metadata.
//!
//! An [`Item`] is the unit that flows through the whole engine: sources
//! discover them, handlers transform them, sinks consume them. Identity is
//! the *natural key* (e.g. an accession number) when one is present;
//! otherwise a content-derived digest stands in. Set membership, equality
//! and hashing all go through [`Item::key`], never through object identity.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Conventional metadata field carrying the item's domain timestamp
/// (acquisition/availability time), RFC 3339 encoded. Harvest windows and
/// sink time filters read this field.
pub const META_CONTENT_TIME: &str = "content_time";

/// Conventional metadata fields substituted during anonymization.
pub const META_PATIENT_NAME: &str = "patient_name";
/// Patient date of birth, `YYYY-MM-DD`.
pub const META_PATIENT_DOB: &str = "patient_dob";
/// Patient gender code (`F`/`M`/`O`).
pub const META_PATIENT_GENDER: &str = "patient_gender";

/// Hierarchy level of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemLevel {
    Patient,
    Study,
    Series,
    Instance,
}

impl ItemLevel {
    /// Stable uppercase name, matching the configuration encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemLevel::Patient => "PATIENT",
            ItemLevel::Study => "STUDY",
            ItemLevel::Series => "SERIES",
            ItemLevel::Instance => "INSTANCE",
        }
    }
}

impl std::str::FromStr for ItemLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PATIENT" => Ok(ItemLevel::Patient),
            "STUDY" => Ok(ItemLevel::Study),
            "SERIES" => Ok(ItemLevel::Series),
            "INSTANCE" => Ok(ItemLevel::Instance),
            other => Err(Error::UnknownLevel(other.to_string())),
        }
    }
}

impl fmt::Display for ItemLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A domain record: handle plus metadata, optionally carrying its payload.
///
/// Items are immutable in spirit: transformations (anonymization, unpacking)
/// produce *new* items rather than mutating in place. Removal happens only
/// through explicit `remove` calls on a source or sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    /// Hierarchy level of this record.
    pub level: ItemLevel,

    /// Externally meaningful identifier (e.g. accession number).
    /// When absent, identity falls back to a content digest.
    pub natural_key: Option<String>,

    /// Flattened metadata. BTreeMap keeps key order stable so the content
    /// digest is deterministic.
    pub metadata: BTreeMap<String, serde_json::Value>,

    /// Raw payload bytes, if retrieved. Metadata-only items leave this unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Vec<u8>>,
}

impl Item {
    /// Create an empty item at the given level.
    pub fn new(level: ItemLevel) -> Self {
        Self {
            level,
            natural_key: None,
            metadata: BTreeMap::new(),
            payload: None,
        }
    }

    /// Builder-style natural key assignment.
    pub fn with_natural_key(mut self, key: impl Into<String>) -> Self {
        self.natural_key = Some(key.into());
        self
    }

    /// Builder-style metadata assignment.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Builder-style payload assignment.
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// The effective identity of this item: natural key when present,
    /// content digest otherwise.
    pub fn key(&self) -> String {
        match &self.natural_key {
            Some(k) => k.clone(),
            None => self.content_digest(),
        }
    }

    /// SHA-256 over level and canonical metadata, hex encoded.
    ///
    /// The payload is deliberately excluded: a metadata-only view and a
    /// retrieved view of the same record must share an identity.
    pub fn content_digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.level.as_str().as_bytes());
        for (k, v) in &self.metadata {
            hasher.update(k.as_bytes());
            hasher.update(v.to_string().as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// String view of a metadata field.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    /// The item's domain timestamp, read from [`META_CONTENT_TIME`].
    pub fn content_time(&self) -> Result<Option<DateTime<Utc>>> {
        match self.meta_str(META_CONTENT_TIME) {
            None => Ok(None),
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(|e| Error::InvalidTimestamp {
                    field: META_CONTENT_TIME,
                    reason: e.to_string(),
                }),
        }
    }

    /// A copy of this item without its payload (metadata-only view).
    pub fn without_payload(&self) -> Item {
        Item {
            level: self.level,
            natural_key: self.natural_key.clone(),
            metadata: self.metadata.clone(),
            payload: None,
        }
    }
}

impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Item {}

impl std::hash::Hash for Item {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.level, self.key())
    }
}

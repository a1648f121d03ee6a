//! IndexByProxy: index proxied matches under a hashed identity.

use super::{Handler, HandlerParams};
use crate::error::Result;
use crate::sink::Sink;
use crate::source::Source;
use gantry_core::{
    ChangeEvent, IdentityMinter, Item, META_PATIENT_DOB, META_PATIENT_NAME,
};
use std::sync::Arc;

/// Indexes a found-but-not-yet-retrieved match from a proxied query.
///
/// Identity substitution happens inline with the configured minter (a pure
/// hash, no network round-trip to an anonymize endpoint) because the match
/// may still live only on the remote modality. With `retrieve` set, the
/// full item is pulled through the proxy first; otherwise the match
/// metadata is indexed as-is. Provenance (host, index name) is stamped on
/// the indexed record.
pub struct IndexByProxy {
    sink: Arc<dyn Sink>,
    params: HandlerParams,
    minter: Arc<dyn IdentityMinter>,
}

impl IndexByProxy {
    pub fn new(sink: Arc<dyn Sink>, params: HandlerParams, minter: Arc<dyn IdentityMinter>) -> Self {
        Self {
            sink,
            params,
            minter,
        }
    }

    /// Replace the natural key with its hash and drop directly identifying
    /// fields. Same input, same substituted identity: re-deliveries land
    /// on the existing index record.
    fn substitute_identity(&self, item: &Item) -> Item {
        let guid = self.minter.guid(&item.key());
        let mut indexed = item.clone().with_natural_key(guid);
        indexed.metadata.remove(META_PATIENT_NAME);
        indexed.metadata.remove(META_PATIENT_DOB);
        indexed
    }
}

impl Handler for IndexByProxy {
    fn name(&self) -> &'static str {
        "IndexByProxy"
    }

    fn handle(&self, event: &ChangeEvent, source: &dyn Source) -> Result<Option<Item>> {
        let item = if self.params.retrieve {
            source.find_retrieve(&event.item)?
        } else {
            event.item.clone()
        };

        let indexed = self.substitute_identity(&item);
        self.sink.put(&indexed, &self.params.routing())?;

        tracing::debug!(
            original = %event.item.key(),
            indexed = %indexed.key(),
            sink = self.sink.name(),
            retrieved = self.params.retrieve,
            "indexed proxied match"
        );
        Ok(Some(indexed))
    }
}

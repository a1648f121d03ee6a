//! Event handlers: the pipeline stages a route binds an event to.
//!
//! A handler is constructed once at configuration time from its
//! [`HandlerKind`] tag and static parameters, holding its sink by
//! reference. Dispatch is a plain virtual call; nothing is resolved by
//! name at dispatch time.

mod anonymize;
mod index_by_proxy;
mod move_item;
mod unpack;

pub use anonymize::AnonymizeAndMove;
pub use index_by_proxy::IndexByProxy;
pub use move_item::MoveItem;
pub use unpack::{BlobEntry, BlobUnpacker, JsonBundleUnpacker, UnpackAndPut};

use crate::error::Result;
use crate::sink::{RoutingParams, Sink};
use crate::source::Source;
use gantry_core::{ChangeEvent, IdentityMinter, Item};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// The closed set of handler kinds a route may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandlerKind {
    Move,
    AnonymizeAndMove,
    IndexByProxy,
    UnpackAndPut,
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HandlerKind::Move => "Move",
            HandlerKind::AnonymizeAndMove => "AnonymizeAndMove",
            HandlerKind::IndexByProxy => "IndexByProxy",
            HandlerKind::UnpackAndPut => "UnpackAndPut",
        };
        f.write_str(s)
    }
}

/// Static parameters bound into a handler at construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerParams {
    /// Remove the original from the source after successful delivery.
    pub remove_source: bool,

    /// For IndexByProxy: retrieve the full item before indexing.
    pub retrieve: bool,

    /// For AnonymizeAndMove: metadata fields forced to fixed values in the
    /// sham item.
    pub replacements: BTreeMap<String, String>,

    /// Logical index name stamped as provenance on delivery.
    pub index: Option<String>,

    /// Originating host stamped as provenance on delivery.
    pub host: Option<String>,
}

impl HandlerParams {
    /// The provenance these parameters stamp on delivered items.
    pub fn routing(&self) -> RoutingParams {
        RoutingParams {
            index: self.index.clone(),
            host: self.host.clone(),
            extra: BTreeMap::new(),
        }
    }
}

/// A bound pipeline stage.
///
/// `handle` returns the item that reached the sink (the sham item for
/// anonymizing handlers), or `None` when the event produced no delivery.
/// Errors never escape the per-item dispatch boundary: the router logs
/// them and moves to the next item.
pub trait Handler: Send + Sync {
    /// Handler kind name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Process one event, calling back into `source` as needed.
    fn handle(&self, event: &ChangeEvent, source: &dyn Source) -> Result<Option<Item>>;
}

/// Resolve a handler kind to a bound handler.
///
/// Called once per route at startup; the returned handler owns its sink,
/// parameters and collaborators for the process lifetime.
pub fn build_handler(
    kind: HandlerKind,
    sink: Arc<dyn Sink>,
    params: HandlerParams,
    minter: Arc<dyn IdentityMinter>,
    unpacker: Arc<dyn BlobUnpacker>,
) -> Box<dyn Handler> {
    match kind {
        HandlerKind::Move => Box::new(MoveItem::new(sink, params)),
        HandlerKind::AnonymizeAndMove => Box::new(AnonymizeAndMove::new(sink, params)),
        HandlerKind::IndexByProxy => Box::new(IndexByProxy::new(sink, params, minter)),
        HandlerKind::UnpackAndPut => Box::new(UnpackAndPut::new(sink, params, unpacker)),
    }
}

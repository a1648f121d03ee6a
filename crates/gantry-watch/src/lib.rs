//! Gantry watch engine: change detection, event routing and time-windowed
//! harvest across heterogeneous imaging archives.
//!
//! # Modules
//!
//! - [`source`] - Source trait and adapters (archive feed, proxied modality, drop folder)
//! - [`dedupe`] - Bounded duplicate suppression for discovery matches
//! - [`route`] - Declarative routes, registry, dispatch table
//! - [`handler`] - Move / AnonymizeAndMove / IndexByProxy / UnpackAndPut pipelines
//! - [`router`] - The watcher: per-source poll loops and dispatchers
//! - [`harvest`] - Periodic recent-minus-indexed reconciliation
//! - [`sink`] - Sink trait and implementations (index, file store, peer archive)
//! - [`archive`] - Archive collaborator interface and in-memory implementation
//! - [`config`] - YAML deployment configuration
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   poll    ┌──────────────────┐
//! │     Sources      │ ────────▶ │ DiscoveryDedup   │
//! │ archive / proxy  │  events   │ (NEW_MATCH only) │
//! │ / drop folder    │           └────────┬─────────┘
//! └──────────────────┘                    │ bounded channel
//!                                         ▼
//!                               ┌──────────────────┐
//!                               │    Dispatcher    │── route table ──▶ Handlers
//!                               └──────────────────┘                     │
//!                                                                       ▼
//! ┌──────────────────┐  recent − indexed  ┌─────────┐            ┌────────────┐
//! │    Harvester     │ ─────────────────▶ │ Handler │ ─────────▶ │   Sinks    │
//! │ (sliding window) │                    └─────────┘            └────────────┘
//! └──────────────────┘
//! ```
//!
//! Delivery is at-least-once: nothing is persisted between runs, sources
//! re-offer what was never confirmed delivered, and sinks absorb replays
//! through puts idempotent by natural key.

pub mod archive;
pub mod config;
pub mod dedupe;
pub mod error;
pub mod handler;
pub mod harvest;
pub mod route;
pub mod router;
pub mod sink;
pub mod source;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

pub use archive::{Archive, ChangeRecord, MemoryArchive, Query};
pub use dedupe::DiscoveryDedupQueue;
pub use handler::{
    AnonymizeAndMove, BlobEntry, BlobUnpacker, Handler, HandlerKind, HandlerParams, IndexByProxy,
    JsonBundleUnpacker, MoveItem, UnpackAndPut,
};
pub use harvest::{CycleOutcome, Harvester, HarvestState, HarvestStats};
pub use route::{BoundRoute, Registry, Route, RouteTable};
pub use router::{SourceSpec, StatsSnapshot, Watcher, WatcherStats};
pub use sink::{ArchiveSink, FileSink, MemoryIndexSink, RoutingParams, Sink};
pub use source::{ArchiveSource, Cursor, FileSource, PollBatch, ProxyArchiveSource, Source};

//! Declarative routes and the startup registries that resolve them.
//!
//! A [`Route`] is plain data: it can be listed, serialized and inspected
//! without touching any live object. Resolution to callable handlers
//! happens exactly once, at startup, through the [`Registry`]: a route
//! naming an unknown source, sink or handler kind refuses to start instead
//! of being silently dropped.

use crate::error::{Error, Result};
use crate::handler::{build_handler, BlobUnpacker, Handler, HandlerKind, HandlerParams};
use crate::sink::Sink;
use crate::source::Source;
use gantry_core::{EventKind, IdentityMinter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// One routing rule: events of `event` from `source` go through `handler`
/// into `sink`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub source: String,
    pub event: EventKind,
    pub handler: HandlerKind,
    pub sink: String,
    #[serde(default)]
    pub params: HandlerParams,
}

/// Explicit component registry, constructed once at startup and passed by
/// reference to whatever needs lookup. There is no global fallback.
pub struct Registry {
    sources: HashMap<String, Arc<dyn Source>>,
    sinks: HashMap<String, Arc<dyn Sink>>,
    minter: Arc<dyn IdentityMinter>,
    unpacker: Arc<dyn BlobUnpacker>,
}

impl Registry {
    pub fn new(minter: Arc<dyn IdentityMinter>, unpacker: Arc<dyn BlobUnpacker>) -> Self {
        Self {
            sources: HashMap::new(),
            sinks: HashMap::new(),
            minter,
            unpacker,
        }
    }

    /// Register a source under its own id. Duplicate names are a
    /// configuration error.
    pub fn add_source(&mut self, source: Arc<dyn Source>) -> Result<()> {
        let id = source.source_id().to_string();
        if self.sources.insert(id.clone(), source).is_some() {
            return Err(Error::Config(format!("duplicate source name '{id}'")));
        }
        Ok(())
    }

    /// Register a sink under its own name. Duplicate names are a
    /// configuration error.
    pub fn add_sink(&mut self, sink: Arc<dyn Sink>) -> Result<()> {
        let name = sink.name().to_string();
        if self.sinks.insert(name.clone(), sink).is_some() {
            return Err(Error::Config(format!("duplicate sink name '{name}'")));
        }
        Ok(())
    }

    pub fn source(&self, name: &str) -> Option<Arc<dyn Source>> {
        self.sources.get(name).cloned()
    }

    pub fn sink(&self, name: &str) -> Option<Arc<dyn Sink>> {
        self.sinks.get(name).cloned()
    }

    pub fn minter(&self) -> Arc<dyn IdentityMinter> {
        self.minter.clone()
    }

    pub fn unpacker(&self) -> Arc<dyn BlobUnpacker> {
        self.unpacker.clone()
    }

    /// All registered sources.
    pub fn sources(&self) -> impl Iterator<Item = &Arc<dyn Source>> {
        self.sources.values()
    }
}

/// A route resolved to its bound handler.
pub struct BoundRoute {
    pub route: Route,
    pub handler: Box<dyn Handler>,
}

/// Immutable dispatch table keyed by `(source, event kind)`.
pub struct RouteTable {
    entries: HashMap<(String, EventKind), Vec<BoundRoute>>,
    route_count: usize,
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTable")
            .field("keys", &self.entries.len())
            .field("route_count", &self.route_count)
            .finish()
    }
}

impl RouteTable {
    /// Resolve every route against the registry. Any unknown name is fatal.
    pub fn build(routes: &[Route], registry: &Registry) -> Result<Self> {
        let mut entries: HashMap<(String, EventKind), Vec<BoundRoute>> = HashMap::new();
        for route in routes {
            if registry.source(&route.source).is_none() {
                return Err(Error::Config(format!(
                    "route {}/{} names unknown source '{}'",
                    route.source, route.event, route.source
                )));
            }
            let sink = registry.sink(&route.sink).ok_or_else(|| {
                Error::Config(format!(
                    "route {}/{} names unknown sink '{}'",
                    route.source, route.event, route.sink
                ))
            })?;

            let handler = build_handler(
                route.handler,
                sink,
                route.params.clone(),
                registry.minter(),
                registry.unpacker(),
            );
            entries
                .entry((route.source.clone(), route.event))
                .or_default()
                .push(BoundRoute {
                    route: route.clone(),
                    handler,
                });
        }
        Ok(Self {
            entries,
            route_count: routes.len(),
        })
    }

    /// Handlers bound for this source/kind pair, in configuration order.
    pub fn lookup(&self, source_id: &str, kind: EventKind) -> &[BoundRoute] {
        self.entries
            .get(&(source_id.to_string(), kind))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of configured routes.
    pub fn len(&self) -> usize {
        self.route_count
    }

    /// Whether the table holds no routes.
    pub fn is_empty(&self) -> bool {
        self.route_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MemoryArchive;
    use crate::handler::JsonBundleUnpacker;
    use crate::sink::MemoryIndexSink;
    use crate::source::ArchiveSource;
    use gantry_core::HashMinter;

    fn registry() -> Registry {
        let minter = Arc::new(HashMinter::default());
        let mut registry = Registry::new(minter.clone(), Arc::new(JsonBundleUnpacker));
        let archive = Arc::new(MemoryArchive::new(minter));
        registry
            .add_source(Arc::new(ArchiveSource::new("pacs", archive)))
            .unwrap();
        registry
            .add_sink(Arc::new(MemoryIndexSink::new("idx")))
            .unwrap();
        registry
    }

    fn route(source: &str, sink: &str) -> Route {
        Route {
            source: source.to_string(),
            event: EventKind::InstanceAdded,
            handler: HandlerKind::Move,
            sink: sink.to_string(),
            params: HandlerParams::default(),
        }
    }

    #[test]
    fn build_resolves_known_names() {
        let table = RouteTable::build(&[route("pacs", "idx")], &registry()).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup("pacs", EventKind::InstanceAdded).len(), 1);
        assert!(table.lookup("pacs", EventKind::NewMatch).is_empty());
        assert!(table.lookup("other", EventKind::InstanceAdded).is_empty());
    }

    #[test]
    fn unknown_source_is_fatal() {
        let err = RouteTable::build(&[route("ghost", "idx")], &registry()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("unknown source 'ghost'"));
    }

    #[test]
    fn unknown_sink_is_fatal() {
        let err = RouteTable::build(&[route("pacs", "ghost")], &registry()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("unknown sink 'ghost'"));
    }

    #[test]
    fn handlers_keep_configuration_order() {
        let mut second = route("pacs", "idx");
        second.handler = HandlerKind::IndexByProxy;
        let table =
            RouteTable::build(&[route("pacs", "idx"), second], &registry()).unwrap();
        let bound = table.lookup("pacs", EventKind::InstanceAdded);
        assert_eq!(bound.len(), 2);
        assert_eq!(bound[0].handler.name(), "Move");
        assert_eq!(bound[1].handler.name(), "IndexByProxy");
    }

    #[test]
    fn duplicate_registrations_are_rejected() {
        let minter = Arc::new(HashMinter::default());
        let mut registry = Registry::new(minter.clone(), Arc::new(JsonBundleUnpacker));
        registry
            .add_sink(Arc::new(MemoryIndexSink::new("idx")))
            .unwrap();
        let err = registry
            .add_sink(Arc::new(MemoryIndexSink::new("idx")))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn route_round_trips_through_yaml() {
        let yaml = "
source: pacs
event: NEW_MATCH
handler: IndexByProxy
sink: idx
params:
  retrieve: true
  host: pacs01
";
        let route: Route = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(route.event, EventKind::NewMatch);
        assert_eq!(route.handler, HandlerKind::IndexByProxy);
        assert!(route.params.retrieve);
        assert_eq!(route.params.host.as_deref(), Some("pacs01"));
    }
}

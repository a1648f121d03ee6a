//! Declarative YAML configuration for sources, sinks, routes and harvests.
//!
//! The whole wiring of a deployment is data: the daemon loads one file,
//! validates every cross-reference, and only then constructs components.
//! Validation failures are [`crate::Error::Config`] and fatal: a bad
//! route refuses to start rather than being silently dropped.

use crate::error::{Error, Result};
use crate::handler::{HandlerKind, HandlerParams};
use crate::route::Route;
use gantry_core::DEFAULT_DEDUP_CAPACITY;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

fn default_poll_secs() -> u64 {
    30
}

fn default_dedup_capacity() -> usize {
    DEFAULT_DEDUP_CAPACITY
}

fn default_channel_capacity() -> usize {
    64
}

fn default_harvest_interval_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

/// A source definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Local archive polled through its change feed.
    Archive {
        name: String,
        #[serde(default = "default_poll_secs")]
        poll_secs: u64,
        #[serde(default = "default_dedup_capacity")]
        dedup_capacity: usize,
    },
    /// Proxied remote modality queried over a sliding window.
    Proxy {
        name: String,
        #[serde(default = "default_poll_secs")]
        poll_secs: u64,
        #[serde(default = "default_dedup_capacity")]
        dedup_capacity: usize,
        /// Width of the sliding query window, minutes.
        window_minutes: i64,
        /// Match-query metadata fields.
        #[serde(default)]
        query: BTreeMap<String, String>,
    },
    /// Filesystem drop folder.
    File {
        name: String,
        root: PathBuf,
        #[serde(default = "default_poll_secs")]
        poll_secs: u64,
        #[serde(default = "default_dedup_capacity")]
        dedup_capacity: usize,
    },
}

impl SourceConfig {
    pub fn name(&self) -> &str {
        match self {
            SourceConfig::Archive { name, .. }
            | SourceConfig::Proxy { name, .. }
            | SourceConfig::File { name, .. } => name,
        }
    }

    pub fn poll_secs(&self) -> u64 {
        match self {
            SourceConfig::Archive { poll_secs, .. }
            | SourceConfig::Proxy { poll_secs, .. }
            | SourceConfig::File { poll_secs, .. } => *poll_secs,
        }
    }

    pub fn dedup_capacity(&self) -> usize {
        match self {
            SourceConfig::Archive { dedup_capacity, .. }
            | SourceConfig::Proxy { dedup_capacity, .. }
            | SourceConfig::File { dedup_capacity, .. } => *dedup_capacity,
        }
    }
}

/// A sink definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkConfig {
    /// In-process search index.
    Index { name: String },
    /// File store beneath a root directory.
    File { name: String, root: PathBuf },
    /// Peer archive.
    Archive { name: String },
}

impl SinkConfig {
    pub fn name(&self) -> &str {
        match self {
            SinkConfig::Index { name }
            | SinkConfig::File { name, .. }
            | SinkConfig::Archive { name } => name,
        }
    }
}

/// A harvester definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    pub source: String,
    pub sink: String,
    pub handler: HandlerKind,
    #[serde(default)]
    pub params: HandlerParams,
    /// Width of the harvest window, minutes.
    pub window_minutes: i64,
    #[serde(default = "default_harvest_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_true")]
    pub repeat_while: bool,
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Prometheus port; 0 disables the endpoint.
    #[serde(default)]
    pub metrics_port: u16,

    /// Per-source dispatch channel capacity.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Salt for the deterministic identity minter.
    #[serde(default)]
    pub identity_salt: Option<String>,

    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    #[serde(default)]
    pub sinks: Vec<SinkConfig>,

    #[serde(default)]
    pub routes: Vec<Route>,

    #[serde(default)]
    pub harvesters: Vec<HarvestConfig>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            metrics_port: 0,
            channel_capacity: default_channel_capacity(),
            identity_salt: None,
            sources: Vec::new(),
            sinks: Vec::new(),
            routes: Vec::new(),
            harvesters: Vec::new(),
        }
    }
}

impl WatchConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        let config: WatchConfig = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every cross-reference. Names must be unique and every route
    /// and harvester must point at defined components.
    pub fn validate(&self) -> Result<()> {
        let mut source_names = HashSet::new();
        for source in &self.sources {
            if !source_names.insert(source.name()) {
                return Err(Error::Config(format!(
                    "duplicate source name '{}'",
                    source.name()
                )));
            }
            if source.poll_secs() == 0 {
                return Err(Error::Config(format!(
                    "source '{}' has a zero polling interval",
                    source.name()
                )));
            }
            if let SourceConfig::Proxy { window_minutes, .. } = source {
                if *window_minutes <= 0 {
                    return Err(Error::Config(format!(
                        "source '{}' has a non-positive window",
                        source.name()
                    )));
                }
            }
        }

        let mut sink_names = HashSet::new();
        for sink in &self.sinks {
            if !sink_names.insert(sink.name()) {
                return Err(Error::Config(format!(
                    "duplicate sink name '{}'",
                    sink.name()
                )));
            }
        }

        for route in &self.routes {
            if !source_names.contains(route.source.as_str()) {
                return Err(Error::Config(format!(
                    "route {}/{} names unknown source '{}'",
                    route.source, route.event, route.source
                )));
            }
            if !sink_names.contains(route.sink.as_str()) {
                return Err(Error::Config(format!(
                    "route {}/{} names unknown sink '{}'",
                    route.source, route.event, route.sink
                )));
            }
        }

        for harvest in &self.harvesters {
            if !source_names.contains(harvest.source.as_str()) {
                return Err(Error::Config(format!(
                    "harvester names unknown source '{}'",
                    harvest.source
                )));
            }
            if !sink_names.contains(harvest.sink.as_str()) {
                return Err(Error::Config(format!(
                    "harvester names unknown sink '{}'",
                    harvest.sink
                )));
            }
            if harvest.window_minutes <= 0 {
                return Err(Error::Config(format!(
                    "harvester over '{}' has a non-positive window",
                    harvest.source
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::EventKind;

    const SAMPLE: &str = "
metrics_port: 9090
channel_capacity: 32
identity_salt: site-a

sources:
  - kind: file
    name: inbox
    root: /data/inbox
    poll_secs: 10
  - kind: proxy
    name: remote-ct
    window_minutes: 30
    query:
      modality: CT

sinks:
  - kind: index
    name: idx
  - kind: file
    name: export
    root: /data/export

routes:
  - source: inbox
    event: INSTANCE_ADDED
    handler: Move
    sink: export
    params:
      remove_source: true
  - source: remote-ct
    event: NEW_MATCH
    handler: IndexByProxy
    sink: idx
    params:
      host: modality-7

harvesters:
  - source: inbox
    sink: idx
    handler: Move
    window_minutes: 60
    interval_secs: 120
";

    #[test]
    fn sample_config_parses_and_validates() {
        let config: WatchConfig = serde_yaml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.channel_capacity, 32);
        assert_eq!(config.identity_salt.as_deref(), Some("site-a"));
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].name(), "inbox");
        assert_eq!(config.sources[0].poll_secs(), 10);
        assert_eq!(config.sources[1].dedup_capacity(), DEFAULT_DEDUP_CAPACITY);
        assert_eq!(config.routes[0].event, EventKind::InstanceAdded);
        assert!(config.routes[0].params.remove_source);
        assert_eq!(config.harvesters[0].interval_secs, 120);
        assert!(config.harvesters[0].repeat_while);
    }

    #[test]
    fn unknown_route_source_fails_validation() {
        let mut config: WatchConfig = serde_yaml::from_str(SAMPLE).unwrap();
        config.routes[0].source = "ghost".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unknown source 'ghost'"));
    }

    #[test]
    fn unknown_harvester_sink_fails_validation() {
        let mut config: WatchConfig = serde_yaml::from_str(SAMPLE).unwrap();
        config.harvesters[0].sink = "ghost".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn duplicate_source_names_fail_validation() {
        let mut config: WatchConfig = serde_yaml::from_str(SAMPLE).unwrap();
        let clone = config.sources[0].clone();
        config.sources.push(clone);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate source name"));
    }

    #[test]
    fn unknown_handler_kind_is_a_parse_error() {
        let yaml = "
sources: []
sinks: []
routes:
  - source: a
    event: ALERT
    handler: Teleport
    sink: b
";
        let parsed: Result<WatchConfig> =
            serde_yaml::from_str::<WatchConfig>(yaml).map_err(Into::into);
        assert!(parsed.is_err());
    }

    #[test]
    fn empty_config_is_valid() {
        let config = WatchConfig::default();
        config.validate().unwrap();
        assert_eq!(config.channel_capacity, 64);
    }

    #[test]
    fn load_reports_missing_file_as_config_error() {
        let err = WatchConfig::load(Path::new("/nonexistent/gantry.yaml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}

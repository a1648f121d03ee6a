//! Gantry watch daemon.
//!
//! Polls configured sources for changes, routes events through their
//! handler pipelines, and runs the configured harvest cycles.
//!
//! # Usage
//!
//! ```bash
//! # Run with a deployment config
//! gantry-watch --config /etc/gantry/watch.yaml
//!
//! # Run the built-in drop-folder default (./inbox → in-process index)
//! gantry-watch
//! ```
//!
//! # Graceful Shutdown
//!
//! SIGINT (Ctrl+C) flips a shutdown flag checked at every suspension
//! point: poll loops stop, dispatchers drain their queued events,
//! harvesters finish the current cycle, and a run summary is printed.

use anyhow::{Context, Result};
use clap::Parser;
use gantry_core::metrics::{init_metrics, start_metrics_server};
use gantry_core::{DatetimeInterval, HashMinter};
use gantry_watch::config::{SinkConfig, SourceConfig, WatchConfig};
use gantry_watch::handler::build_handler;
use gantry_watch::{
    ArchiveSink, ArchiveSource, FileSink, FileSource, Harvester, HarvestStats, JsonBundleUnpacker,
    MemoryArchive, MemoryIndexSink, ProxyArchiveSource, Query, Registry, RouteTable, SourceSpec,
    Watcher,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Gantry watch daemon.
#[derive(Parser, Debug)]
#[command(name = "gantry-watch")]
#[command(about = "Imaging archive change-detection and routing daemon")]
#[command(version)]
struct Args {
    /// Deployment configuration file (YAML)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Metrics HTTP server port (overrides the config file; 0 to disable)
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Drop folder for the built-in default pipeline (no --config only)
    #[arg(long, default_value = "./inbox")]
    inbox: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap())
                .add_directive("gantry_watch=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    tracing::info!("Gantry watch daemon starting...");

    let mut config = match &args.config {
        Some(path) => WatchConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => default_config(&args.inbox),
    };
    if let Some(port) = args.metrics_port {
        config.metrics_port = port;
    }

    // Initialize metrics
    if config.metrics_port > 0 {
        let metrics_handle = init_metrics();
        start_metrics_server(config.metrics_port, metrics_handle).await?;
        tracing::info!("Metrics server listening on port {}", config.metrics_port);
    }

    // Set up graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received, stopping gracefully...");
        let _ = shutdown_tx.send(true);
    })
    .context("Failed to set Ctrl+C handler")?;

    tracing::info!("Configuration:");
    tracing::info!("  Sources:    {}", config.sources.len());
    tracing::info!("  Sinks:      {}", config.sinks.len());
    tracing::info!("  Routes:     {}", config.routes.len());
    tracing::info!("  Harvesters: {}", config.harvesters.len());

    // Build the component registry and resolve all routes up front; any
    // unknown name refuses startup here.
    let registry = build_registry(&config)?;
    let routes = Arc::new(RouteTable::build(&config.routes, &registry)?);

    let mut watcher = Watcher::new(routes, config.channel_capacity);
    for source_config in &config.sources {
        let source = registry
            .source(source_config.name())
            .expect("registry holds every configured source");
        watcher.add_source(SourceSpec {
            source,
            poll_interval: Duration::from_secs(source_config.poll_secs()),
            dedup_capacity: source_config.dedup_capacity(),
        });
    }
    let watch_stats = watcher.stats();

    // Harvesters run on their own timers, orthogonal to the watcher.
    let mut harvest_handles = Vec::new();
    for harvest_config in &config.harvesters {
        let source = registry
            .source(&harvest_config.source)
            .expect("validated config names a registered source");
        let sink = registry
            .sink(&harvest_config.sink)
            .expect("validated config names a registered sink");
        let handler = build_handler(
            harvest_config.handler,
            sink.clone(),
            harvest_config.params.clone(),
            registry.minter(),
            registry.unpacker(),
        );
        let window =
            DatetimeInterval::lookback(chrono::Duration::minutes(harvest_config.window_minutes));
        let harvester = Harvester::new(
            source,
            sink,
            handler,
            window,
            Duration::from_secs(harvest_config.interval_secs),
            harvest_config.repeat_while,
        );
        harvest_handles.push(tokio::spawn(harvester.run(shutdown_rx.clone())));
    }

    tracing::info!("Starting watch loops...");
    watcher.run(shutdown_rx).await;

    // Shutdown sequence
    tracing::info!("Shutting down...");
    let mut harvest_totals = HarvestStats::default();
    for handle in harvest_handles {
        match handle.await {
            Ok(stats) => {
                harvest_totals.cycles += stats.cycles;
                harvest_totals.recent += stats.recent;
                harvest_totals.new_items += stats.new_items;
                harvest_totals.handled += stats.handled;
                harvest_totals.failures += stats.failures;
            }
            Err(e) => tracing::warn!("harvester task panicked: {e}"),
        }
    }

    // Print summary
    let snap = watch_stats.snapshot();
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("SHUTDOWN COMPLETE");
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("Events polled:        {}", snap.events_polled);
    tracing::info!("Events dispatched:    {}", snap.events_dispatched);
    tracing::info!("Events deduplicated:  {}", snap.events_deduplicated);
    tracing::info!("Handler failures:     {}", snap.handler_failures);
    tracing::info!("Dead letters:         {}", snap.dead_letters);
    tracing::info!("Poll errors:          {}", snap.poll_errors);
    tracing::info!("Harvest cycles:       {}", harvest_totals.cycles);
    tracing::info!("Harvest items:        {}", harvest_totals.handled);

    Ok(())
}

/// The zero-config pipeline: watch `inbox` and index every dropped file.
fn default_config(inbox: &std::path::Path) -> WatchConfig {
    let yaml = format!(
        "
sources:
  - kind: file
    name: inbox
    root: {}
    poll_secs: 5
sinks:
  - kind: index
    name: index
routes:
  - source: inbox
    event: INSTANCE_ADDED
    handler: Move
    sink: index
",
        inbox.display()
    );
    serde_yaml::from_str(&yaml).expect("built-in default config parses")
}

/// Construct every configured component and register it by name.
///
/// Archive and proxy sources are wired onto in-memory archives here; a
/// vendor-backed `Archive` implementation plugs into the same two lines.
fn build_registry(config: &WatchConfig) -> Result<Registry> {
    let minter = Arc::new(HashMinter::new(
        config.identity_salt.clone().unwrap_or_else(|| "gantry".to_string()),
    ));
    let mut registry = Registry::new(minter.clone(), Arc::new(JsonBundleUnpacker));

    for source_config in &config.sources {
        match source_config {
            SourceConfig::Archive { name, .. } => {
                let archive = Arc::new(MemoryArchive::new(minter.clone()));
                registry.add_source(Arc::new(ArchiveSource::new(name.clone(), archive)))?;
            }
            SourceConfig::Proxy {
                name,
                window_minutes,
                query,
                ..
            } => {
                let archive = Arc::new(MemoryArchive::new(minter.clone()));
                let window =
                    DatetimeInterval::lookback(chrono::Duration::minutes(*window_minutes));
                let mut match_query = Query::all();
                match_query.fields = query.clone();
                registry.add_source(Arc::new(ProxyArchiveSource::new(
                    name.clone(),
                    archive,
                    match_query,
                    window,
                )))?;
            }
            SourceConfig::File { name, root, .. } => {
                registry.add_source(Arc::new(FileSource::new(name.clone(), root.clone())?))?;
            }
        }
    }

    for sink_config in &config.sinks {
        match sink_config {
            SinkConfig::Index { name } => {
                registry.add_sink(Arc::new(MemoryIndexSink::new(name.clone())))?;
            }
            SinkConfig::File { name, root } => {
                registry.add_sink(Arc::new(FileSink::new(name.clone(), root.clone())?))?;
            }
            SinkConfig::Archive { name } => {
                let archive = Arc::new(MemoryArchive::new(minter.clone()));
                registry.add_sink(Arc::new(ArchiveSink::new(name.clone(), archive)))?;
            }
        }
    }

    Ok(registry)
}

//! The watcher: per-source poll loops feeding bounded dispatch channels.
//!
//! Scheduling model: every source gets two tasks, a poll loop on its own
//! timer, and a dispatcher draining that source's bounded channel. The
//! channel is the backpressure boundary: a slow sink fills its own
//! source's channel and eventually stalls that source's polling, while
//! every other source keeps its own pace. Ordering is FIFO within one
//! source's batches; nothing is guaranteed across sources.
//!
//! Failure policy: a transient poll error skips the cycle and the next
//! tick retries naturally. A handler error is confined to its item; the
//! batch continues. An event whose every routed handler failed counts as a
//! dead letter (visible in stats and logs; there is no persisted
//! dead-letter store).

use crate::dedupe::DiscoveryDedupQueue;
use crate::route::RouteTable;
use crate::source::Source;
use gantry_core::ChangeEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// A source registered with the watcher, with its scheduling parameters.
pub struct SourceSpec {
    pub source: Arc<dyn Source>,
    pub poll_interval: Duration,
    pub dedup_capacity: usize,
}

/// Shared run counters, readable while the watcher runs.
#[derive(Debug, Default)]
pub struct WatcherStats {
    pub events_polled: AtomicU64,
    pub events_dispatched: AtomicU64,
    pub events_deduplicated: AtomicU64,
    pub handler_failures: AtomicU64,
    pub dead_letters: AtomicU64,
    pub poll_errors: AtomicU64,
}

impl WatcherStats {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_polled: self.events_polled.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            events_deduplicated: self.events_deduplicated.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            dead_letters: self.dead_letters.load(Ordering::Relaxed),
            poll_errors: self.poll_errors.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of the watcher counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsSnapshot {
    pub events_polled: u64,
    pub events_dispatched: u64,
    pub events_deduplicated: u64,
    pub handler_failures: u64,
    pub dead_letters: u64,
    pub poll_errors: u64,
}

/// Drives per-source poll loops and routes their events.
pub struct Watcher {
    specs: Vec<SourceSpec>,
    routes: Arc<RouteTable>,
    channel_capacity: usize,
    stats: Arc<WatcherStats>,
}

impl Watcher {
    pub fn new(routes: Arc<RouteTable>, channel_capacity: usize) -> Self {
        Self {
            specs: Vec::new(),
            routes,
            channel_capacity: channel_capacity.max(1),
            stats: Arc::new(WatcherStats::default()),
        }
    }

    /// Register a source with its polling interval and dedup capacity.
    pub fn add_source(&mut self, spec: SourceSpec) {
        self.specs.push(spec);
    }

    /// Shared counters for this watcher.
    pub fn stats(&self) -> Arc<WatcherStats> {
        self.stats.clone()
    }

    /// Run all poll and dispatch loops until `shutdown` flips to true.
    /// Events already queued when shutdown arrives are still dispatched.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        metrics::gauge!("watch_running").set(1.0);
        let mut handles = Vec::new();

        for spec in self.specs {
            let (tx, rx) = mpsc::channel::<ChangeEvent>(self.channel_capacity);
            let source_id = spec.source.source_id().to_string();

            handles.push(tokio::spawn(poll_loop(
                spec.source.clone(),
                spec.poll_interval,
                DiscoveryDedupQueue::new(spec.dedup_capacity),
                tx,
                shutdown.clone(),
                self.stats.clone(),
            )));
            handles.push(tokio::spawn(dispatch_loop(
                spec.source,
                rx,
                self.routes.clone(),
                self.stats.clone(),
            )));

            tracing::info!(source = %source_id, "watch loops started");
        }

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!("watch task panicked: {e}");
            }
        }
        metrics::gauge!("watch_running").set(0.0);
    }
}

/// One source's poll loop. Owns the cursor and the dedup queue; nothing
/// else touches them, so no locking is needed around either.
async fn poll_loop(
    source: Arc<dyn Source>,
    poll_interval: Duration,
    mut dedup: DiscoveryDedupQueue,
    tx: mpsc::Sender<ChangeEvent>,
    mut shutdown: watch::Receiver<bool>,
    stats: Arc<WatcherStats>,
) {
    let source_id = source.source_id().to_string();
    let mut cursor = source.initial_cursor();
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {}
            _ = ticker.tick() => {}
        }
        if *shutdown.borrow() {
            break;
        }

        let batch = match source.poll(&cursor) {
            Ok(batch) => batch,
            Err(e) if e.is_transient() => {
                WatcherStats::bump(&stats.poll_errors, 1);
                metrics::counter!("watch_poll_errors_total", "source" => source_id.clone())
                    .increment(1);
                tracing::warn!(source = %source_id, "poll failed, retrying next cycle: {e}");
                continue;
            }
            Err(e) => {
                // Malformed response: no events this cycle, never fatal.
                WatcherStats::bump(&stats.poll_errors, 1);
                tracing::warn!(source = %source_id, "poll returned malformed data: {e}");
                continue;
            }
        };
        cursor = batch.cursor;

        let polled = batch.events.len() as u64;
        if polled > 0 {
            WatcherStats::bump(&stats.events_polled, polled);
            metrics::counter!("watch_events_polled_total", "source" => source_id.clone())
                .increment(polled);
        }

        for event in batch.events {
            if event.kind.requires_match_dedup() && !dedup.check_and_push(&event.item.key()) {
                WatcherStats::bump(&stats.events_deduplicated, 1);
                metrics::counter!("watch_events_deduplicated_total").increment(1);
                continue;
            }

            // Bounded send: backpressure from a full channel suspends this
            // source only. Shutdown interrupts the wait.
            tokio::select! {
                sent = tx.send(event) => {
                    if sent.is_err() {
                        tracing::warn!(source = %source_id, "dispatch channel closed");
                        return;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
        metrics::gauge!("dedup_queue_depth", "source" => source_id.clone())
            .set(dedup.len() as f64);
    }
}

/// One source's dispatcher. Ends when the poll loop drops its sender,
/// after draining whatever is still queued.
async fn dispatch_loop(
    source: Arc<dyn Source>,
    mut rx: mpsc::Receiver<ChangeEvent>,
    routes: Arc<RouteTable>,
    stats: Arc<WatcherStats>,
) {
    while let Some(event) = rx.recv().await {
        dispatch_event(&event, source.as_ref(), &routes, &stats);
    }
}

/// Route one event through its handler chain. Per-item failures are logged
/// and never abort anything beyond this event.
pub fn dispatch_event(
    event: &ChangeEvent,
    source: &dyn Source,
    routes: &RouteTable,
    stats: &WatcherStats,
) {
    let bound = routes.lookup(&event.source_id, event.kind);
    if bound.is_empty() {
        tracing::trace!(event = %event, "no route");
        return;
    }

    WatcherStats::bump(&stats.events_dispatched, 1);
    metrics::counter!("watch_events_dispatched_total", "source" => event.source_id.clone())
        .increment(1);

    let mut failures = 0usize;
    for route in bound {
        match route.handler.handle(event, source) {
            Ok(result) => {
                tracing::debug!(
                    event = %event,
                    handler = route.handler.name(),
                    delivered = result.is_some(),
                    "handled"
                );
            }
            Err(e) => {
                failures += 1;
                WatcherStats::bump(&stats.handler_failures, 1);
                metrics::counter!("watch_handler_failures_total", "handler" => route.handler.name())
                    .increment(1);
                tracing::warn!(
                    event = %event,
                    handler = route.handler.name(),
                    "handler failed: {e}"
                );
            }
        }
    }

    if failures == bound.len() {
        WatcherStats::bump(&stats.dead_letters, 1);
        metrics::counter!("watch_dead_letters_total").increment(1);
        tracing::warn!(event = %event, "every handler failed; item dropped until it reappears");
    }
}

//! Time-windowed harvest: reconcile "recently available" against
//! "already indexed".
//!
//! The harvester runs orthogonally to the watcher, on its own timer. Each
//! cycle diffs the source's recent set against the sink's indexed set by
//! natural key and feeds the difference to the same handler abstraction
//! the router dispatches through. Only after successful delivery does an
//! item stop showing up in the difference; a failed item is simply
//! re-discovered on a later cycle, which together with idempotent puts
//! gives at-least-once delivery without any persisted state.

use crate::archive::Query;
use crate::error::Result;
use crate::handler::Handler;
use crate::sink::Sink;
use crate::source::Source;
use gantry_core::{ChangeEvent, DatetimeInterval, EventKind, Item, ItemLevel};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Phase of the harvest cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestState {
    Idle,
    Collecting,
    Advancing,
}

/// Counters for one harvest cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Items the source reported inside the window.
    pub recent: usize,
    /// Items of those not yet present on the sink.
    pub new_items: usize,
    /// Worklist items delivered successfully.
    pub handled: usize,
    /// Worklist items whose handler failed.
    pub failures: usize,
}

/// Cumulative counters across cycles.
#[derive(Debug, Clone, Copy, Default)]
pub struct HarvestStats {
    pub cycles: u64,
    pub recent: u64,
    pub new_items: u64,
    pub handled: u64,
    pub failures: u64,
}

/// Periodic window-diff collector.
///
/// The window and stats are single-owner state: one harvester per window,
/// never shared. Sharing a window across concurrent harvesters would race
/// its advance step.
pub struct Harvester {
    source: Arc<dyn Source>,
    sink: Arc<dyn Sink>,
    handler: Box<dyn Handler>,
    window: DatetimeInterval,
    interval: Duration,
    repeat_while: bool,
    state: HarvestState,
    stats: HarvestStats,
}

impl Harvester {
    pub fn new(
        source: Arc<dyn Source>,
        sink: Arc<dyn Sink>,
        handler: Box<dyn Handler>,
        window: DatetimeInterval,
        interval: Duration,
        repeat_while: bool,
    ) -> Self {
        Self {
            source,
            sink,
            handler,
            window,
            interval,
            repeat_while,
            state: HarvestState::Idle,
            stats: HarvestStats::default(),
        }
    }

    /// The current window.
    pub fn window(&self) -> &DatetimeInterval {
        &self.window
    }

    /// The current cycle phase.
    pub fn state(&self) -> HarvestState {
        self.state
    }

    /// Cumulative counters.
    pub fn stats(&self) -> HarvestStats {
        self.stats
    }

    /// Items the source reports inside the current window.
    fn discover_recent(&self) -> Result<Vec<Item>> {
        self.source.discover(&self.window)
    }

    /// Keys already present on the sink for the current window. An empty
    /// result is not an error; it means nothing has been collected yet.
    fn discover_indexed(&self) -> HashSet<String> {
        match self.sink.find_items(&Query::all(), Some(&self.window)) {
            Ok(items) => items.iter().map(Item::key).collect(),
            Err(e) => {
                // Treat an unreachable sink as "nothing indexed": the
                // worklist grows, and idempotent puts absorb the overlap.
                tracing::warn!(sink = self.sink.name(), "indexed query failed: {e}");
                HashSet::new()
            }
        }
    }

    /// Deliver the worklist, one handler invocation per item. Per-item
    /// failures are logged; the worklist continues.
    fn handle_worklist(&self, items: &[Item]) -> (usize, usize) {
        let mut handled = 0usize;
        let mut failures = 0usize;
        for item in items {
            let event = ChangeEvent::new(
                worklist_kind(item.level),
                item.clone(),
                self.source.source_id(),
            );
            match self.handler.handle(&event, self.source.as_ref()) {
                Ok(_) => handled += 1,
                Err(e) => {
                    failures += 1;
                    metrics::counter!("harvest_failures_total").increment(1);
                    tracing::warn!(item = %item, handler = self.handler.name(), "worklist item failed: {e}");
                }
            }
        }
        (handled, failures)
    }

    /// Run one IDLE → COLLECTING → ADVANCING → IDLE cycle.
    ///
    /// A discovery error aborts the cycle *before* the window advances, so
    /// the same window is retried on the next tick. An empty recent set
    /// short-circuits handling but the window still advances.
    pub fn cycle(&mut self) -> Result<CycleOutcome> {
        self.state = HarvestState::Collecting;
        let recent = match self.discover_recent() {
            Ok(recent) => recent,
            Err(e) => {
                self.state = HarvestState::Idle;
                return Err(e);
            }
        };

        let outcome = if recent.is_empty() {
            CycleOutcome::default()
        } else {
            let indexed = self.discover_indexed();
            // Set difference by natural key, preserving discovery order.
            let new_items: Vec<Item> = recent
                .iter()
                .filter(|item| !indexed.contains(&item.key()))
                .cloned()
                .collect();

            let (handled, failures) = self.handle_worklist(&new_items);
            CycleOutcome {
                recent: recent.len(),
                new_items: new_items.len(),
                handled,
                failures,
            }
        };

        self.state = HarvestState::Advancing;
        self.window.advance();
        self.state = HarvestState::Idle;

        self.stats.cycles += 1;
        self.stats.recent += outcome.recent as u64;
        self.stats.new_items += outcome.new_items as u64;
        self.stats.handled += outcome.handled as u64;
        self.stats.failures += outcome.failures as u64;

        metrics::counter!("harvest_cycles_total").increment(1);
        metrics::counter!("harvest_items_recent_total").increment(outcome.recent as u64);
        metrics::counter!("harvest_items_new_total").increment(outcome.new_items as u64);
        metrics::counter!("harvest_items_handled_total").increment(outcome.handled as u64);

        Ok(outcome)
    }

    /// Run cycles on the timer until shutdown. With `repeat_while` unset,
    /// exactly one cycle runs.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> HarvestStats {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let source_id = self.source.source_id().to_string();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {}
                _ = ticker.tick() => {}
            }
            if *shutdown.borrow() {
                break;
            }

            match self.cycle() {
                Ok(outcome) => {
                    tracing::debug!(
                        source = %source_id,
                        recent = outcome.recent,
                        new = outcome.new_items,
                        handled = outcome.handled,
                        failures = outcome.failures,
                        window = %self.window,
                        "harvest cycle complete"
                    );
                }
                Err(e) => {
                    tracing::warn!(source = %source_id, "harvest cycle failed, window retried next tick: {e}");
                }
            }

            if !self.repeat_while {
                break;
            }
        }
        self.stats
    }
}

/// Event kind a harvested item is announced under.
fn worklist_kind(level: ItemLevel) -> EventKind {
    match level {
        ItemLevel::Instance => EventKind::InstanceAdded,
        ItemLevel::Series => EventKind::SeriesAdded,
        ItemLevel::Study | ItemLevel::Patient => EventKind::StudyAdded,
    }
}

// Sweep Detector - rapid consumption of several price levels on one side
// Consumes LevelRemovedEvent from the order book tracker

use crate::core::config::OrderFlowConfig;
use crate::core::types::{BookSide, LevelRemovedEvent, SweepDirection, SweepEvent};
use crate::layer3::common::time_windows::TimeWindow;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

/// Upper bound on buffered removals per side.
const MAX_BUFFERED_REMOVALS: usize = 10_000;

pub struct SweepDetector {
    min_levels: usize,

    // Recent removals per side, (timestamp, price)
    bid_removals: TimeWindow<Decimal>,
    ask_removals: TimeWindow<Decimal>,

    // Statistics
    removals_seen: u64,
    sweeps_detected: u64,
}

impl SweepDetector {
    pub fn new(min_levels: usize, sweep_time_ms: i64) -> Self {
        Self {
            min_levels: min_levels.max(1),
            bid_removals: TimeWindow::new(sweep_time_ms, MAX_BUFFERED_REMOVALS),
            ask_removals: TimeWindow::new(sweep_time_ms, MAX_BUFFERED_REMOVALS),
            removals_seen: 0,
            sweeps_detected: 0,
        }
    }

    pub fn from_config(config: &OrderFlowConfig) -> Self {
        Self::new(config.sweep_min_levels, config.sweep_time_ms)
    }

    /// Record a removal; returns a sweep once the side has lost
    /// `min_levels` distinct prices within the sweep time. The side's buffer
    /// is cleared on emission so one burst reports once.
    pub fn on_level_removed(&mut self, removal: &LevelRemovedEvent) -> Option<SweepEvent> {
        self.removals_seen += 1;

        let buffer = match removal.side {
            BookSide::Bid => &mut self.bid_removals,
            BookSide::Ask => &mut self.ask_removals,
        };
        buffer.prune(removal.timestamp);
        buffer.add(removal.timestamp, removal.price);

        let prices: BTreeSet<Decimal> = buffer.iter().map(|(_, price)| *price).collect();
        if prices.len() < self.min_levels {
            return None;
        }

        let first_ts = buffer.first().map(|(ts, _)| *ts)?;
        let last_ts = buffer.last().map(|(ts, _)| *ts)?;
        let swept_low = prices.first().copied()?;
        let swept_high = prices.last().copied()?;
        buffer.clear();

        let sweep = SweepEvent {
            direction: SweepDirection::for_side(removal.side),
            levels_removed: prices.len(),
            duration_ms: last_ts - first_ts,
            swept_low,
            swept_high,
            timestamp: last_ts,
        };
        self.sweeps_detected += 1;

        debug!(
            direction = %sweep.direction,
            levels = sweep.levels_removed,
            duration_ms = sweep.duration_ms,
            low = %swept_low,
            high = %swept_high,
            "Sweep detected"
        );
        Some(sweep)
    }

    pub fn pending_removals(&self, side: BookSide) -> usize {
        match side {
            BookSide::Bid => self.bid_removals.len(),
            BookSide::Ask => self.ask_removals.len(),
        }
    }

    pub fn removals_seen(&self) -> u64 {
        self.removals_seen
    }

    pub fn sweeps_detected(&self) -> u64 {
        self.sweeps_detected
    }

    /// Drop pending removals; they no longer describe the current book.
    pub fn reset(&mut self) {
        self.bid_removals.clear();
        self.ask_removals.clear();
    }
}

impl fmt::Display for SweepDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SweepDetector(min_levels={}, pending_bids={}, pending_asks={}, sweeps={})",
            self.min_levels,
            self.bid_removals.len(),
            self.ask_removals.len(),
            self.sweeps_detected
        )
    }
}

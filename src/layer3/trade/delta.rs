// Delta Window - rolling signed aggressor volume over a fixed time span
// Reports sign flips of cumulative delta large enough to matter

use crate::core::config::OrderFlowConfig;
use crate::core::types::{DeltaFlipEvent, DeltaSign, TimestampMs, Trade};
use crate::layer3::common::time_windows::TimeWindow;
use rust_decimal::Decimal;
use std::fmt;
use tracing::debug;

/// Samples beyond this are dropped oldest-first even inside the window.
const MAX_SAMPLES: usize = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaSnapshot {
    pub delta: Decimal,
    pub buy_volume: Decimal,
    /// Signed sum of sell contributions (<= 0).
    pub sell_volume: Decimal,
}

pub struct DeltaWindow {
    samples: TimeWindow<Decimal>,
    min_delta_flip: Decimal,

    // Delta as it stood right after the previous ingest
    last_delta: Decimal,

    trades_processed: u64,
    flips_detected: u64,
}

impl DeltaWindow {
    pub fn new(window_ms: i64, min_delta_flip: Decimal) -> Self {
        Self {
            samples: TimeWindow::new(window_ms, MAX_SAMPLES),
            min_delta_flip,
            last_delta: Decimal::ZERO,
            trades_processed: 0,
            flips_detected: 0,
        }
    }

    pub fn from_config(config: &OrderFlowConfig) -> Self {
        Self::new(config.delta_window_ms(), config.min_delta_flip)
    }

    /// Evict stale samples, append the trade, and report a sign flip if the
    /// delta crossed zero by at least `min_delta_flip`.
    pub fn ingest(&mut self, trade: &Trade) -> Option<DeltaFlipEvent> {
        self.trades_processed += 1;

        let before = self.last_delta;
        self.samples.prune(trade.timestamp);
        let timestamp = self.samples.add(trade.timestamp, trade.signed_quantity());
        let after = self.sum();
        self.last_delta = after;

        self.check_flip(before, after, timestamp)
    }

    fn check_flip(
        &mut self,
        before: Decimal,
        after: Decimal,
        timestamp: TimestampMs,
    ) -> Option<DeltaFlipEvent> {
        let (from, to) = match (DeltaSign::of(before), DeltaSign::of(after)) {
            (Some(from), Some(to)) if from != to => (from, to),
            _ => return None,
        };

        let magnitude = (after - before).abs();
        if magnitude < self.min_delta_flip {
            return None;
        }

        let flip = DeltaFlipEvent {
            from,
            to,
            magnitude,
            timestamp,
        };
        self.flips_detected += 1;

        debug!(
            from = %from,
            to = %to,
            magnitude = %magnitude,
            delta = %after,
            "Delta flip"
        );
        Some(flip)
    }

    fn sum(&self) -> Decimal {
        self.samples.iter().map(|(_, qty)| *qty).sum()
    }

    pub fn current_delta(&mut self, now: TimestampMs) -> Decimal {
        self.samples.prune(now);
        self.sum()
    }

    pub fn buy_volume(&mut self, now: TimestampMs) -> Decimal {
        self.samples.prune(now);
        self.samples
            .iter()
            .map(|(_, qty)| *qty)
            .filter(|qty| *qty > Decimal::ZERO)
            .sum()
    }

    pub fn sell_volume(&mut self, now: TimestampMs) -> Decimal {
        self.samples.prune(now);
        self.samples
            .iter()
            .map(|(_, qty)| *qty)
            .filter(|qty| *qty < Decimal::ZERO)
            .sum()
    }

    pub fn snapshot(&mut self, now: TimestampMs) -> DeltaSnapshot {
        self.samples.prune(now);
        let (buy_volume, sell_volume) = self.samples.iter().fold(
            (Decimal::ZERO, Decimal::ZERO),
            |(buy, sell), (_, qty)| {
                if *qty > Decimal::ZERO {
                    (buy + *qty, sell)
                } else {
                    (buy, sell + *qty)
                }
            },
        );
        DeltaSnapshot {
            delta: buy_volume + sell_volume,
            buy_volume,
            sell_volume,
        }
    }

    /// Delta as of the last ingest, without evicting.
    pub fn last_delta(&self) -> Decimal {
        self.last_delta
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn trades_processed(&self) -> u64 {
        self.trades_processed
    }

    pub fn flips_detected(&self) -> u64 {
        self.flips_detected
    }
}

impl fmt::Display for DeltaWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DeltaWindow(delta={}, samples={}, flips={})",
            self.last_delta,
            self.samples.len(),
            self.flips_detected
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::AggressorSide;
    use rust_decimal_macros::dec;

    fn trade(qty: Decimal, side: AggressorSide, ts: i64) -> Trade {
        Trade::new(dec!(2000), qty, side, ts)
    }

    #[test]
    fn test_delta_sums_signed_volume() {
        let mut window = DeltaWindow::new(5_000, dec!(50));

        window.ingest(&trade(dec!(3), AggressorSide::Buy, 1_000));
        window.ingest(&trade(dec!(1.5), AggressorSide::Sell, 2_000));

        let snap = window.snapshot(2_000);
        assert_eq!(snap.delta, dec!(1.5));
        assert_eq!(snap.buy_volume, dec!(3));
        assert_eq!(snap.sell_volume, dec!(-1.5));
        assert_eq!(snap.delta, snap.buy_volume + snap.sell_volume);
    }

    #[test]
    fn test_window_eviction() {
        let mut window = DeltaWindow::new(5_000, dec!(50));

        window.ingest(&trade(dec!(10), AggressorSide::Buy, 0));
        window.ingest(&trade(dec!(4), AggressorSide::Sell, 3_000));

        assert_eq!(window.current_delta(5_000), dec!(6));
        // Sample at 0 falls out once now - 5000 > 0
        assert_eq!(window.current_delta(5_001), dec!(-4));
        assert_eq!(window.buy_volume(5_001), Decimal::ZERO);
        assert_eq!(window.sell_volume(5_001), dec!(-4));
    }

    #[test]
    fn test_flip_negative_to_positive() {
        let mut window = DeltaWindow::new(5_000, dec!(50));

        assert!(window.ingest(&trade(dec!(40), AggressorSide::Sell, 0)).is_none());
        let flip = window
            .ingest(&trade(dec!(60), AggressorSide::Buy, 100))
            .expect("flip expected");

        assert_eq!(flip.from, DeltaSign::Negative);
        assert_eq!(flip.to, DeltaSign::Positive);
        assert_eq!(flip.magnitude, dec!(60));
        assert_eq!(flip.timestamp, 100);
        assert_eq!(window.flips_detected(), 1);
    }

    #[test]
    fn test_small_flip_ignored() {
        let mut window = DeltaWindow::new(5_000, dec!(50));

        window.ingest(&trade(dec!(10), AggressorSide::Sell, 0));
        // -10 -> +20: crosses zero but only by 30
        assert!(window.ingest(&trade(dec!(30), AggressorSide::Buy, 100)).is_none());
        assert_eq!(window.last_delta(), dec!(20));
    }

    #[test]
    fn test_touching_zero_is_not_a_flip() {
        let mut window = DeltaWindow::new(5_000, dec!(1));

        window.ingest(&trade(dec!(60), AggressorSide::Sell, 0));
        // -60 -> 0: no sign on the zero side
        assert!(window.ingest(&trade(dec!(60), AggressorSide::Buy, 10)).is_none());
        // 0 -> +60: no sign before
        assert!(window.ingest(&trade(dec!(60), AggressorSide::Buy, 20)).is_none());
    }

    #[test]
    fn test_flip_caused_by_eviction() {
        let mut window = DeltaWindow::new(1_000, dec!(50));

        window.ingest(&trade(dec!(100), AggressorSide::Sell, 0));
        window.ingest(&trade(dec!(20), AggressorSide::Buy, 900));
        assert_eq!(window.last_delta(), dec!(-80));

        // The -100 sample ages out, leaving +20 +40 = +60
        let flip = window
            .ingest(&trade(dec!(40), AggressorSide::Buy, 1_500))
            .expect("flip expected");
        assert_eq!(flip.magnitude, dec!(140));
        assert_eq!(flip.to, DeltaSign::Positive);
    }

    #[test]
    fn test_out_of_order_timestamp_clamped() {
        let mut window = DeltaWindow::new(1_000, dec!(50));

        window.ingest(&trade(dec!(5), AggressorSide::Buy, 2_000));
        window.ingest(&trade(dec!(5), AggressorSide::Buy, 1_000));
        assert_eq!(window.sample_count(), 2);
        assert_eq!(window.current_delta(2_500), dec!(10));
    }
}

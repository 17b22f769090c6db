// Absorption Detector - heavy aggressive volume that fails to move price
// Sell aggression absorbed by bids, buy aggression absorbed by asks

use crate::core::config::OrderFlowConfig;
use crate::core::types::{AbsorptionEvent, BookSide, TimestampMs, Trade};
use rust_decimal::Decimal;
use std::fmt;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct SideAccumulator {
    anchor: Option<Decimal>,
    volume: Decimal,
    trades: u32,
    started_at: Option<TimestampMs>,
}

impl SideAccumulator {
    fn reset_at(&mut self, price: Option<Decimal>) {
        self.anchor = price;
        self.volume = Decimal::ZERO;
        self.trades = 0;
        self.started_at = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccumulatorState {
    pub anchor: Option<Decimal>,
    pub volume: Decimal,
    pub trades: u32,
}

pub struct AbsorptionDetector {
    threshold: Decimal,
    /// Relative move from the anchor that breaks absorption.
    price_movement_threshold: Decimal,

    bid: SideAccumulator,
    ask: SideAccumulator,

    // Statistics
    trades_processed: u64,
    resets: u64,
    absorptions_detected: u64,
}

impl AbsorptionDetector {
    pub fn new(threshold: Decimal, price_movement_threshold: Decimal) -> Self {
        Self {
            threshold,
            price_movement_threshold,
            bid: SideAccumulator::default(),
            ask: SideAccumulator::default(),
            trades_processed: 0,
            resets: 0,
            absorptions_detected: 0,
        }
    }

    pub fn from_config(config: &OrderFlowConfig) -> Self {
        Self::new(config.absorption_threshold, config.price_movement_threshold)
    }

    /// Feed one trade. Both sides are re-anchored if price left their band;
    /// then the volume goes to the side the aggressor hit.
    pub fn on_trade(&mut self, trade: &Trade) -> Option<AbsorptionEvent> {
        self.trades_processed += 1;

        for side in [BookSide::Bid, BookSide::Ask] {
            let anchor = self.accumulator(side).anchor;
            if let Some(anchor) = anchor {
                if self.moved_beyond(anchor, trade.price) {
                    trace!(side = %side, anchor = %anchor, price = %trade.price, "Absorption reset");
                    self.accumulator_mut(side).reset_at(Some(trade.price));
                    self.resets += 1;
                }
            }
        }

        let side = trade.aggressor_side.hits();
        let threshold = self.threshold;
        let acc = self.accumulator_mut(side);
        if acc.anchor.is_none() {
            acc.anchor = Some(trade.price);
        }
        if acc.started_at.is_none() {
            acc.started_at = Some(trade.timestamp);
        }
        acc.volume += trade.quantity;
        acc.trades += 1;

        if acc.volume < threshold {
            return None;
        }

        let event = AbsorptionEvent {
            side,
            volume: acc.volume,
            price: acc.anchor.unwrap_or(trade.price),
            timestamp: trade.timestamp,
        };
        let trades = acc.trades;
        acc.reset_at(None);
        self.absorptions_detected += 1;

        debug!(
            side = %side,
            volume = %event.volume,
            price = %event.price,
            trades = trades,
            "Absorption detected"
        );
        Some(event)
    }

    fn moved_beyond(&self, anchor: Decimal, price: Decimal) -> bool {
        let distance = (price - anchor).abs();
        if anchor.is_zero() {
            return !distance.is_zero();
        }
        match distance.checked_div(anchor.abs()) {
            Some(excursion) => excursion > self.price_movement_threshold,
            None => true,
        }
    }

    fn accumulator(&self, side: BookSide) -> &SideAccumulator {
        match side {
            BookSide::Bid => &self.bid,
            BookSide::Ask => &self.ask,
        }
    }

    fn accumulator_mut(&mut self, side: BookSide) -> &mut SideAccumulator {
        match side {
            BookSide::Bid => &mut self.bid,
            BookSide::Ask => &mut self.ask,
        }
    }

    pub fn state(&self, side: BookSide) -> AccumulatorState {
        let acc = self.accumulator(side);
        AccumulatorState {
            anchor: acc.anchor,
            volume: acc.volume,
            trades: acc.trades,
        }
    }

    pub fn trades_processed(&self) -> u64 {
        self.trades_processed
    }

    pub fn absorptions_detected(&self) -> u64 {
        self.absorptions_detected
    }

    pub fn resets(&self) -> u64 {
        self.resets
    }
}

impl fmt::Display for AbsorptionDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AbsorptionDetector(bid={}, ask={}, detected={})",
            self.bid.volume, self.ask.volume, self.absorptions_detected
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::AggressorSide;
    use rust_decimal_macros::dec;

    fn sell(price: Decimal, qty: Decimal, ts: i64) -> Trade {
        Trade::new(price, qty, AggressorSide::Sell, ts)
    }

    fn buy(price: Decimal, qty: Decimal, ts: i64) -> Trade {
        Trade::new(price, qty, AggressorSide::Buy, ts)
    }

    #[test]
    fn test_sells_at_held_price_absorbed_by_bids() {
        let mut detector = AbsorptionDetector::new(dec!(100), dec!(0.001));

        assert!(detector.on_trade(&sell(dec!(2000.00), dec!(40), 0)).is_none());
        assert!(detector.on_trade(&sell(dec!(2000.50), dec!(35), 10)).is_none());
        let event = detector
            .on_trade(&sell(dec!(1999.80), dec!(30), 20))
            .expect("absorption expected");

        assert_eq!(event.side, BookSide::Bid);
        assert_eq!(event.volume, dec!(105));
        assert_eq!(event.price, dec!(2000.00));
        assert_eq!(event.timestamp, 20);
        // Accumulator reset after emission
        assert_eq!(detector.state(BookSide::Bid).volume, Decimal::ZERO);
        assert_eq!(detector.state(BookSide::Bid).anchor, None);
    }

    #[test]
    fn test_excursion_resets_accumulation() {
        let mut detector = AbsorptionDetector::new(dec!(100), dec!(0.001));

        detector.on_trade(&sell(dec!(2000), dec!(40), 0));
        detector.on_trade(&sell(dec!(2000), dec!(35), 10));
        // 2003 is 0.15% away: reset anchored at 2003, this trade starts fresh
        assert!(detector.on_trade(&sell(dec!(2003), dec!(30), 20)).is_none());

        let state = detector.state(BookSide::Bid);
        assert_eq!(state.anchor, Some(dec!(2003)));
        assert_eq!(state.volume, dec!(30));
        assert_eq!(detector.resets(), 1);
    }

    #[test]
    fn test_buys_go_to_ask_side() {
        let mut detector = AbsorptionDetector::new(dec!(10), dec!(0.001));

        detector.on_trade(&buy(dec!(100), dec!(6), 0));
        detector.on_trade(&sell(dec!(100), dec!(6), 1));
        let event = detector.on_trade(&buy(dec!(100), dec!(4), 2)).expect("absorption expected");

        assert_eq!(event.side, BookSide::Ask);
        assert_eq!(event.volume, dec!(10));
        assert_eq!(detector.state(BookSide::Bid).volume, dec!(6));
    }

    #[test]
    fn test_excursion_checked_for_both_sides() {
        let mut detector = AbsorptionDetector::new(dec!(100), dec!(0.001));

        detector.on_trade(&sell(dec!(100), dec!(50), 0));
        // A buy far away also breaks the bid-side accumulation
        detector.on_trade(&buy(dec!(101), dec!(1), 1));

        let bid = detector.state(BookSide::Bid);
        assert_eq!(bid.anchor, Some(dec!(101)));
        assert_eq!(bid.volume, Decimal::ZERO);
    }

    #[test]
    fn test_exact_threshold_emits() {
        let mut detector = AbsorptionDetector::new(dec!(100), dec!(0.001));
        assert!(detector.on_trade(&sell(dec!(50), dec!(100), 0)).is_some());
        assert_eq!(detector.absorptions_detected(), 1);
    }
}

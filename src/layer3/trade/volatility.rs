// Volatility Tracker - trade-to-trade price change regime
// Mean absolute relative change over the last N trades

use crate::core::types::{Trade, VolatilityState};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;

const HISTORY: usize = 100;
const MIN_SAMPLES: usize = 20;

pub struct VolatilityTracker {
    changes: VecDeque<Decimal>,
    last_price: Option<Decimal>,
    current: Option<VolatilityState>,
}

impl VolatilityTracker {
    pub fn new() -> Self {
        Self {
            changes: VecDeque::with_capacity(HISTORY),
            last_price: None,
            current: None,
        }
    }

    /// Returns the regime after this trade, or None until enough history.
    pub fn on_trade(&mut self, trade: &Trade) -> Option<VolatilityState> {
        if let Some(prev) = self.last_price {
            if !prev.is_zero() {
                if let Some(change) = (trade.price - prev).abs().checked_div(prev.abs()) {
                    if self.changes.len() == HISTORY {
                        self.changes.pop_front();
                    }
                    self.changes.push_back(change);
                }
            }
        }
        self.last_price = Some(trade.price);

        self.current = self.mean_change().map(Self::classify);
        self.current
    }

    pub fn mean_change(&self) -> Option<Decimal> {
        if self.changes.len() < MIN_SAMPLES {
            return None;
        }
        let total: Decimal = self.changes.iter().sum();
        Some(total / Decimal::from(self.changes.len() as u64))
    }

    pub fn classify(mean_change: Decimal) -> VolatilityState {
        if mean_change < dec!(0.0001) {
            VolatilityState::Low
        } else if mean_change < dec!(0.0003) {
            VolatilityState::Normal
        } else if mean_change < dec!(0.0007) {
            VolatilityState::High
        } else {
            VolatilityState::Extreme
        }
    }

    pub fn current(&self) -> Option<VolatilityState> {
        self.current
    }

    pub fn sample_count(&self) -> usize {
        self.changes.len()
    }
}

impl Default for VolatilityTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::AggressorSide;

    fn trade(price: Decimal) -> Trade {
        Trade::new(price, dec!(1), AggressorSide::Buy, 0)
    }

    #[test]
    fn test_needs_history() {
        let mut tracker = VolatilityTracker::new();
        for _ in 0..10 {
            assert!(tracker.on_trade(&trade(dec!(100))).is_none());
        }
    }

    #[test]
    fn test_flat_prices_are_low() {
        let mut tracker = VolatilityTracker::new();
        let mut state = None;
        for _ in 0..=MIN_SAMPLES {
            state = tracker.on_trade(&trade(dec!(100)));
        }
        assert_eq!(state, Some(VolatilityState::Low));
    }

    #[test]
    fn test_large_swings_are_extreme() {
        let mut tracker = VolatilityTracker::new();
        let mut state = None;
        for i in 0..=MIN_SAMPLES {
            // Alternating 1% moves
            let price = if i % 2 == 0 { dec!(100) } else { dec!(101) };
            state = tracker.on_trade(&trade(price));
        }
        assert_eq!(state, Some(VolatilityState::Extreme));
    }

    #[test]
    fn test_classify_bands() {
        assert_eq!(VolatilityTracker::classify(dec!(0.00005)), VolatilityState::Low);
        assert_eq!(VolatilityTracker::classify(dec!(0.0002)), VolatilityState::Normal);
        assert_eq!(VolatilityTracker::classify(dec!(0.0005)), VolatilityState::High);
        assert_eq!(VolatilityTracker::classify(dec!(0.0007)), VolatilityState::Extreme);
    }

    #[test]
    fn test_history_bounded() {
        let mut tracker = VolatilityTracker::new();
        for i in 0..250u32 {
            tracker.on_trade(&trade(Decimal::from(100 + i % 3)));
        }
        assert_eq!(tracker.sample_count(), HISTORY);
    }
}

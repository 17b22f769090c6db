// Order Book Tracker - price-level book for one instrument
// Applies depth updates and reports levels that were emptied

use crate::core::config::OrderFlowConfig;
use crate::core::types::{BookSide, LevelRemovedEvent, OrderBookUpdate, PriceLevel, TimestampMs};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, trace};

type Price = Decimal;
type Quantity = Decimal;

/// Order book summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBookSummary {
    pub bid_levels: usize,
    pub ask_levels: usize,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub spread: Option<Decimal>,
    pub updates_applied: u64,
    pub snapshots_loaded: u64,
    pub removals_emitted: u64,
    pub levels_evicted: u64,
    pub crossed_levels_purged: u64,
    pub last_update_time: Option<TimestampMs>,
}

impl fmt::Display for OrderBookSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OrderBook(bids={}, asks={}, best_bid={:?}, best_ask={:?}, removals={})",
            self.bid_levels, self.ask_levels, self.best_bid, self.best_ask, self.removals_emitted
        )
    }
}

/// Bounded book keyed by exact price. Invariants after every update: all
/// stored quantities are > 0, each side holds at most `max_levels`, and
/// best bid < best ask whenever both sides are non-empty.
pub struct OrderBookTracker {
    // BTreeMap keeps entries sorted; best bid is the last key, best ask the first
    bids: BTreeMap<Price, Quantity>,
    asks: BTreeMap<Price, Quantity>,
    max_levels: usize,

    last_update_time: Option<TimestampMs>,
    updates_applied: u64,
    snapshots_loaded: u64,
    removals_emitted: u64,
    levels_evicted: u64,
    crossed_levels_purged: u64,
}

impl OrderBookTracker {
    pub fn new(max_levels: usize) -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            max_levels: max_levels.max(1),
            last_update_time: None,
            updates_applied: 0,
            snapshots_loaded: 0,
            removals_emitted: 0,
            levels_evicted: 0,
            crossed_levels_purged: 0,
        }
    }

    pub fn from_config(config: &OrderFlowConfig) -> Self {
        Self::new(config.max_orderbook_levels)
    }

    /// Apply one update. Returns a removal for every tracked level whose
    /// quantity went from positive to zero, bids first then asks, each in
    /// update order. Snapshots reset the book and never report removals.
    pub fn apply(&mut self, update: &OrderBookUpdate) -> Vec<LevelRemovedEvent> {
        self.last_update_time = Some(update.timestamp);

        if update.is_snapshot {
            self.load_snapshot(update);
            return Vec::new();
        }

        self.updates_applied += 1;
        let mut removals = Vec::new();

        for level in &update.bids {
            self.apply_level(BookSide::Bid, level, update.timestamp, &mut removals);
        }
        for level in &update.asks {
            self.apply_level(BookSide::Ask, level, update.timestamp, &mut removals);
        }

        self.removals_emitted += removals.len() as u64;
        removals
    }

    fn load_snapshot(&mut self, update: &OrderBookUpdate) {
        self.bids.clear();
        self.asks.clear();
        self.snapshots_loaded += 1;

        for level in &update.bids {
            if level.quantity > Decimal::ZERO {
                self.insert_level(BookSide::Bid, level.price, level.quantity);
            }
        }
        for level in &update.asks {
            if level.quantity > Decimal::ZERO {
                self.insert_level(BookSide::Ask, level.price, level.quantity);
            }
        }

        debug!(
            bid_levels = self.bids.len(),
            ask_levels = self.asks.len(),
            "Order book loaded from snapshot"
        );
    }

    fn apply_level(
        &mut self,
        side: BookSide,
        level: &PriceLevel,
        timestamp: TimestampMs,
        removals: &mut Vec<LevelRemovedEvent>,
    ) {
        // Negative quantities are treated as zero
        if level.quantity <= Decimal::ZERO {
            if self.book_mut(side).remove(&level.price).is_some() {
                trace!(side = %side, price = %level.price, "Level removed");
                removals.push(LevelRemovedEvent {
                    side,
                    price: level.price,
                    timestamp,
                });
            }
            return;
        }

        self.insert_level(side, level.price, level.quantity);
    }

    fn insert_level(&mut self, side: BookSide, price: Price, quantity: Quantity) {
        self.book_mut(side).insert(price, quantity);
        self.uncross(side, price);
        self.enforce_depth(side);
    }

    /// Drop opposite-side levels the new level would cross.
    fn uncross(&mut self, side: BookSide, price: Price) {
        let before = self.book(side.opposite()).len();
        match side {
            BookSide::Bid => self.asks.retain(|ask, _| *ask > price),
            BookSide::Ask => self.bids.retain(|bid, _| *bid < price),
        }
        let purged = before - self.book(side.opposite()).len();
        if purged > 0 {
            self.crossed_levels_purged += purged as u64;
            debug!(side = %side, price = %price, purged = purged, "Purged crossed levels");
        }
    }

    /// Evict the level furthest from best while the side is over capacity.
    fn enforce_depth(&mut self, side: BookSide) {
        while self.book(side).len() > self.max_levels {
            let evicted = match side {
                BookSide::Bid => self.bids.pop_first(),
                BookSide::Ask => self.asks.pop_last(),
            };
            if evicted.is_some() {
                self.levels_evicted += 1;
            }
        }
    }

    fn book(&self, side: BookSide) -> &BTreeMap<Price, Quantity> {
        match side {
            BookSide::Bid => &self.bids,
            BookSide::Ask => &self.asks,
        }
    }

    fn book_mut(&mut self, side: BookSide) -> &mut BTreeMap<Price, Quantity> {
        match side {
            BookSide::Bid => &mut self.bids,
            BookSide::Ask => &mut self.asks,
        }
    }

    pub fn quantity_at(&self, side: BookSide, price: Decimal) -> Option<Decimal> {
        self.book(side).get(&price).copied()
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids
            .iter()
            .next_back()
            .map(|(price, qty)| PriceLevel::new(*price, *qty))
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks
            .iter()
            .next()
            .map(|(price, qty)| PriceLevel::new(*price, *qty))
    }

    pub fn spread(&self) -> Option<Decimal> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        Some(ask.price - bid.price)
    }

    pub fn bid_levels(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_levels(&self) -> usize {
        self.asks.len()
    }

    pub fn get_summary(&self) -> OrderBookSummary {
        OrderBookSummary {
            bid_levels: self.bids.len(),
            ask_levels: self.asks.len(),
            best_bid: self.best_bid().map(|l| l.price),
            best_ask: self.best_ask().map(|l| l.price),
            spread: self.spread(),
            updates_applied: self.updates_applied,
            snapshots_loaded: self.snapshots_loaded,
            removals_emitted: self.removals_emitted,
            levels_evicted: self.levels_evicted,
            crossed_levels_purged: self.crossed_levels_purged,
            last_update_time: self.last_update_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn lvl(price: Decimal, qty: Decimal) -> PriceLevel {
        PriceLevel::new(price, qty)
    }

    fn seeded(max_levels: usize) -> OrderBookTracker {
        let mut book = OrderBookTracker::new(max_levels);
        book.apply(&OrderBookUpdate::snapshot(
            vec![lvl(dec!(100.0), dec!(1)), lvl(dec!(99.9), dec!(2)), lvl(dec!(99.8), dec!(3))],
            vec![lvl(dec!(100.1), dec!(1)), lvl(dec!(100.2), dec!(2))],
            0,
        ));
        book
    }

    #[test]
    fn test_snapshot_emits_nothing() {
        let mut book = OrderBookTracker::new(50);
        let removals = book.apply(&OrderBookUpdate::snapshot(
            vec![lvl(dec!(100), dec!(1)), lvl(dec!(99), dec!(0))],
            vec![lvl(dec!(101), dec!(1))],
            10,
        ));
        assert!(removals.is_empty());
        // Zero-quantity snapshot rows are not stored
        assert_eq!(book.bid_levels(), 1);
        assert_eq!(book.best_bid().map(|l| l.price), Some(dec!(100)));
        assert_eq!(book.best_ask().map(|l| l.price), Some(dec!(101)));
    }

    #[test]
    fn test_removal_of_tracked_level() {
        let mut book = seeded(50);
        let removals = book.apply(&OrderBookUpdate::diff(vec![lvl(dec!(100.0), dec!(0))], vec![], 5));

        assert_eq!(
            removals,
            vec![LevelRemovedEvent {
                side: BookSide::Bid,
                price: dec!(100.0),
                timestamp: 5
            }]
        );
        assert_eq!(book.best_bid().map(|l| l.price), Some(dec!(99.9)));
    }

    #[test]
    fn test_zero_for_unknown_level_is_silent() {
        let mut book = seeded(50);
        let removals = book.apply(&OrderBookUpdate::diff(vec![lvl(dec!(95), dec!(0))], vec![], 5));
        assert!(removals.is_empty());
    }

    #[test]
    fn test_repeated_zero_emits_once() {
        let mut book = seeded(50);
        let first = book.apply(&OrderBookUpdate::diff(vec![], vec![lvl(dec!(100.2), dec!(0))], 5));
        let second = book.apply(&OrderBookUpdate::diff(vec![], vec![lvl(dec!(100.2), dec!(0))], 6));
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[test]
    fn test_negative_quantity_clamped_to_zero() {
        let mut book = seeded(50);
        let removals = book.apply(&OrderBookUpdate::diff(vec![lvl(dec!(99.9), dec!(-4))], vec![], 5));
        assert_eq!(removals.len(), 1);
        assert_eq!(book.quantity_at(BookSide::Bid, dec!(99.9)), None);

        // Negative for an absent level is simply absent
        let removals = book.apply(&OrderBookUpdate::diff(vec![lvl(dec!(90), dec!(-1))], vec![], 6));
        assert!(removals.is_empty());
        assert_eq!(book.bid_levels(), 2);
    }

    #[test]
    fn test_removals_in_update_order() {
        let mut book = seeded(50);
        let removals = book.apply(&OrderBookUpdate::diff(
            vec![lvl(dec!(99.8), dec!(0)), lvl(dec!(100.0), dec!(0))],
            vec![lvl(dec!(100.1), dec!(0))],
            7,
        ));
        let prices: Vec<_> = removals.iter().map(|r| (r.side, r.price)).collect();
        assert_eq!(
            prices,
            vec![
                (BookSide::Bid, dec!(99.8)),
                (BookSide::Bid, dec!(100.0)),
                (BookSide::Ask, dec!(100.1)),
            ]
        );
    }

    #[test]
    fn test_depth_cap_evicts_furthest() {
        let mut book = seeded(3);
        // Better bid pushes 99.8 out
        book.apply(&OrderBookUpdate::diff(vec![lvl(dec!(100.05), dec!(1))], vec![], 5));
        assert_eq!(book.bid_levels(), 3);
        assert_eq!(book.quantity_at(BookSide::Bid, dec!(99.8)), None);

        // Worse bid than everything tracked is itself the furthest
        book.apply(&OrderBookUpdate::diff(vec![lvl(dec!(90), dec!(1))], vec![], 6));
        assert_eq!(book.quantity_at(BookSide::Bid, dec!(90)), None);
        assert_eq!(book.get_summary().levels_evicted, 2);

        // Evicted level later zeroed: not tracked, no event
        let removals = book.apply(&OrderBookUpdate::diff(vec![lvl(dec!(99.8), dec!(0))], vec![], 7));
        assert!(removals.is_empty());
    }

    #[test]
    fn test_crossing_level_purges_opposite_side() {
        let mut book = seeded(50);
        let removals = book.apply(&OrderBookUpdate::diff(vec![lvl(dec!(100.15), dec!(1))], vec![], 5));

        assert!(removals.is_empty());
        assert_eq!(book.best_bid().map(|l| l.price), Some(dec!(100.15)));
        assert_eq!(book.best_ask().map(|l| l.price), Some(dec!(100.2)));
        assert!(book.best_bid().unwrap().price < book.best_ask().unwrap().price);
        assert_eq!(book.get_summary().crossed_levels_purged, 1);
    }

    #[test]
    fn test_best_levels_and_summary() {
        let book = seeded(50);

        assert_eq!(book.best_bid().map(|l| l.price), Some(dec!(100.0)));
        assert_eq!(book.best_ask().map(|l| l.price), Some(dec!(100.1)));
        assert_eq!(book.spread(), Some(dec!(0.1)));

        let summary = book.get_summary();
        assert_eq!(summary.bid_levels, book.bid_levels());
        assert_eq!(summary.ask_levels, 2);
        assert_eq!(summary.spread, Some(dec!(0.1)));
    }
}

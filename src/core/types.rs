// Core Type Definitions for the Order-Flow Hunt System
// Exact decimal prices/quantities, millisecond feed timestamps

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Milliseconds since epoch as supplied by the feed.
pub type TimestampMs = i64;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookSide {
    Bid,
    Ask,
}

impl BookSide {
    pub fn opposite(self) -> BookSide {
        match self {
            BookSide::Bid => BookSide::Ask,
            BookSide::Ask => BookSide::Bid,
        }
    }
}

impl fmt::Display for BookSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookSide::Bid => write!(f, "bid"),
            BookSide::Ask => write!(f, "ask"),
        }
    }
}

/// Side of the taker in a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggressorSide {
    Buy,
    Sell,
}

impl AggressorSide {
    /// Binance `m` flag: buyer was the maker, so the seller crossed the spread.
    pub fn from_buyer_maker(is_buyer_maker: bool) -> Self {
        if is_buyer_maker {
            AggressorSide::Sell
        } else {
            AggressorSide::Buy
        }
    }

    /// Book side whose resting liquidity this aggressor consumes.
    pub fn hits(self) -> BookSide {
        match self {
            AggressorSide::Buy => BookSide::Ask,
            AggressorSide::Sell => BookSide::Bid,
        }
    }
}

impl fmt::Display for AggressorSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggressorSide::Buy => write!(f, "BUY"),
            AggressorSide::Sell => write!(f, "SELL"),
        }
    }
}

impl std::str::FromStr for AggressorSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BUY" => Ok(AggressorSide::Buy),
            "SELL" => Ok(AggressorSide::Sell),
            _ => Err(format!("Invalid AggressorSide: '{}'. Expected 'BUY' or 'SELL'", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepDirection {
    /// Bid levels consumed, price pushed down.
    Down,
    /// Ask levels consumed, price pushed up.
    Up,
}

impl SweepDirection {
    pub fn for_side(side: BookSide) -> Self {
        match side {
            BookSide::Bid => SweepDirection::Down,
            BookSide::Ask => SweepDirection::Up,
        }
    }
}

impl fmt::Display for SweepDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepDirection::Down => write!(f, "down"),
            SweepDirection::Up => write!(f, "up"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaSign {
    Negative,
    Positive,
}

impl DeltaSign {
    /// Zero has no sign.
    pub fn of(value: Decimal) -> Option<Self> {
        if value > Decimal::ZERO {
            Some(DeltaSign::Positive)
        } else if value < Decimal::ZERO {
            Some(DeltaSign::Negative)
        } else {
            None
        }
    }
}

impl fmt::Display for DeltaSign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeltaSign::Negative => write!(f, "negative"),
            DeltaSign::Positive => write!(f, "positive"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SignalType {
    Buy,
    Sell,
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalType::Buy => write!(f, "BUY"),
            SignalType::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolatilityState {
    Low,
    Normal,
    High,
    Extreme,
}

impl fmt::Display for VolatilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// Inbound Events
// ============================================================================

/// One (price, quantity) entry of a depth update. Quantity 0 removes the level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }
}

impl fmt::Display for PriceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PriceLevel(price={}, qty={})", self.price, self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookUpdate {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub timestamp: TimestampMs,
    /// Full book replacement; the tracker resets and emits no removals.
    pub is_snapshot: bool,
}

impl OrderBookUpdate {
    pub fn diff(bids: Vec<PriceLevel>, asks: Vec<PriceLevel>, timestamp: TimestampMs) -> Self {
        Self {
            bids,
            asks,
            timestamp,
            is_snapshot: false,
        }
    }

    pub fn snapshot(bids: Vec<PriceLevel>, asks: Vec<PriceLevel>, timestamp: TimestampMs) -> Self {
        Self {
            bids,
            asks,
            timestamp,
            is_snapshot: true,
        }
    }
}

impl fmt::Display for OrderBookUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OrderBookUpdate(bids={}, asks={}, ts={}, snapshot={})",
            self.bids.len(),
            self.asks.len(),
            self.timestamp,
            self.is_snapshot
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub price: Decimal,
    pub quantity: Decimal,
    pub aggressor_side: AggressorSide,
    pub timestamp: TimestampMs,
}

impl Trade {
    pub fn new(
        price: Decimal,
        quantity: Decimal,
        aggressor_side: AggressorSide,
        timestamp: TimestampMs,
    ) -> Self {
        Self {
            price,
            quantity,
            aggressor_side,
            timestamp,
        }
    }

    /// Signed volume contribution: buys positive, sells negative.
    pub fn signed_quantity(&self) -> Decimal {
        match self.aggressor_side {
            AggressorSide::Buy => self.quantity,
            AggressorSide::Sell => -self.quantity,
        }
    }
}

impl fmt::Display for Trade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Trade(price={}, qty={}, side={}, ts={})",
            self.price, self.quantity, self.aggressor_side, self.timestamp
        )
    }
}

/// Ordered input of the analysis core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketEvent {
    OrderBook(OrderBookUpdate),
    Trade(Trade),
}

impl MarketEvent {
    pub fn timestamp(&self) -> TimestampMs {
        match self {
            MarketEvent::OrderBook(update) => update.timestamp,
            MarketEvent::Trade(trade) => trade.timestamp,
        }
    }
}

// ============================================================================
// Detector Events
// ============================================================================

/// A tracked level went from positive quantity to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelRemovedEvent {
    pub side: BookSide,
    pub price: Decimal,
    pub timestamp: TimestampMs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepEvent {
    pub direction: SweepDirection,
    pub levels_removed: usize,
    pub duration_ms: i64,
    pub swept_low: Decimal,
    pub swept_high: Decimal,
    pub timestamp: TimestampMs,
}

impl SweepEvent {
    /// Level price must recross to reclaim: lowest removed bid for a down
    /// sweep, highest removed ask for an up sweep.
    pub fn reclaim_level(&self) -> Decimal {
        match self.direction {
            SweepDirection::Down => self.swept_low,
            SweepDirection::Up => self.swept_high,
        }
    }
}

impl fmt::Display for SweepEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Sweep({} {} levels in {}ms, {}..{})",
            self.direction, self.levels_removed, self.duration_ms, self.swept_low, self.swept_high
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaFlipEvent {
    pub from: DeltaSign,
    pub to: DeltaSign,
    pub magnitude: Decimal,
    pub timestamp: TimestampMs,
}

impl fmt::Display for DeltaFlipEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeltaFlip({} -> {}, {})", self.from, self.to, self.magnitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsorptionEvent {
    pub side: BookSide,
    pub volume: Decimal,
    /// Anchor price the volume was absorbed around.
    pub price: Decimal,
    pub timestamp: TimestampMs,
}

impl fmt::Display for AbsorptionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Absorption({} {} @ {})", self.side, self.volume, self.price)
    }
}

// ============================================================================
// Signal
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub signal_type: SignalType,
    pub price: Decimal,
    pub confidence: f64,
    /// Ordered: sweep, delta flip, absorption, reclaim.
    pub reasons: Vec<String>,
    pub delta: Decimal,
    pub timestamp: TimestampMs,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Signal({} @ {}, confidence={:.1}%, delta={})",
            self.signal_type,
            self.price,
            self.confidence * 100.0,
            self.delta
        )
    }
}

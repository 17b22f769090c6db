// Order-Flow Aggregator - owns all analysis state for one instrument
// Feeds each market event through tracker, detectors and signal engine in order

use crate::core::config::{AppConfig, ConfigError, MonitoringConfig, OrderFlowConfig, SignalConfig};
use crate::core::events::{OutputRecord, PriceUpdate, StatusUpdate};
use crate::core::types::{
    LevelRemovedEvent, MarketEvent, OrderBookUpdate, TimestampMs, Trade, VolatilityState,
};
use crate::layer2::orderbook::{OrderBookSummary, OrderBookTracker};
use crate::layer3::common::time_windows::MonotonicClock;
use crate::layer3::orderbook::sweep_detector::SweepDetector;
use crate::layer3::signal::engine::{SignalEngine, SignalStats};
use crate::layer3::trade::absorption::AbsorptionDetector;
use crate::layer3::trade::delta::DeltaWindow;
use crate::layer3::trade::volatility::VolatilityTracker;
use rust_decimal::Decimal;
use std::fmt;
use tracing::debug;

/// How often periodic records are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportingIntervals {
    pub status_every_updates: u64,
    pub price_every_trades: u64,
}

impl Default for ReportingIntervals {
    fn default() -> Self {
        Self::from(&MonitoringConfig::default())
    }
}

impl From<&MonitoringConfig> for ReportingIntervals {
    fn from(monitoring: &MonitoringConfig) -> Self {
        Self {
            status_every_updates: monitoring.status_interval_updates.max(1),
            price_every_trades: monitoring.price_update_interval_trades.max(1),
        }
    }
}

/// Single-threaded analysis context. Given the same configuration and the
/// same event sequence it produces the same records.
pub struct OrderFlowAggregator {
    symbol: String,
    reporting: ReportingIntervals,

    clock: MonotonicClock,
    first_event_time: Option<TimestampMs>,

    book: OrderBookTracker,
    sweeps: SweepDetector,
    delta: DeltaWindow,
    absorption: AbsorptionDetector,
    volatility: VolatilityTracker,
    engine: SignalEngine,

    last_price: Option<Decimal>,

    // Statistics
    orderbook_updates: u64,
    trades_processed: u64,
    level_removals: u64,
    sweeps_detected: u64,
    delta_flips: u64,
    absorptions_detected: u64,
}

impl OrderFlowAggregator {
    pub fn new(
        symbol: &str,
        orderflow: &OrderFlowConfig,
        signal: &SignalConfig,
        reporting: ReportingIntervals,
    ) -> Result<Self, ConfigError> {
        orderflow.validate()?;
        if !(0.0..=1.0).contains(&signal.min_confidence) {
            return Err(ConfigError::Validation(
                "min_confidence must be between 0 and 1".to_string(),
            ));
        }

        debug!(symbol = %symbol, "Initializing OrderFlowAggregator");

        Ok(Self {
            symbol: symbol.to_uppercase(),
            reporting,
            clock: MonotonicClock::new(),
            first_event_time: None,
            book: OrderBookTracker::from_config(orderflow),
            sweeps: SweepDetector::from_config(orderflow),
            delta: DeltaWindow::from_config(orderflow),
            absorption: AbsorptionDetector::from_config(orderflow),
            volatility: VolatilityTracker::new(),
            engine: SignalEngine::new(orderflow, signal),
            last_price: None,
            orderbook_updates: 0,
            trades_processed: 0,
            level_removals: 0,
            sweeps_detected: 0,
            delta_flips: 0,
            absorptions_detected: 0,
        })
    }

    /// Defaults for everything except the detection parameters.
    pub fn with_orderflow(symbol: &str, orderflow: &OrderFlowConfig) -> Result<Self, ConfigError> {
        Self::new(
            symbol,
            orderflow,
            &SignalConfig::default(),
            ReportingIntervals::default(),
        )
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        Self::new(
            &config.feed.symbol,
            &config.orderflow,
            &config.signal,
            ReportingIntervals::from(&config.monitoring),
        )
    }

    fn observe(&mut self, timestamp: TimestampMs) -> TimestampMs {
        let now = self.clock.observe(timestamp);
        self.first_event_time.get_or_insert(now);
        now
    }

    pub fn process(&mut self, event: &MarketEvent) -> Vec<OutputRecord> {
        match event {
            MarketEvent::OrderBook(update) => self.on_orderbook_update(update),
            MarketEvent::Trade(trade) => self.on_trade(trade),
        }
    }

    pub fn on_orderbook_update(&mut self, update: &OrderBookUpdate) -> Vec<OutputRecord> {
        let now = self.observe(update.timestamp);
        let mut records = Vec::new();
        self.orderbook_updates += 1;

        let removals = self.book.apply(update);
        self.level_removals += removals.len() as u64;
        if update.is_snapshot {
            // Removals buffered against the previous book cannot join a sweep
            self.sweeps.reset();
        }

        for removal in removals {
            let removal = LevelRemovedEvent {
                timestamp: now,
                ..removal
            };
            if let Some(sweep) = self.sweeps.on_level_removed(&removal) {
                self.sweeps_detected += 1;
                self.engine.on_sweep(&sweep);
                records.push(OutputRecord::SweepDetected(sweep));
            }
        }

        self.engine.advance_clock(now);

        if self.orderbook_updates % self.reporting.status_every_updates == 0 {
            records.push(OutputRecord::StatusUpdate(self.status(now)));
        }
        records
    }

    pub fn on_trade(&mut self, trade: &Trade) -> Vec<OutputRecord> {
        let now = self.observe(trade.timestamp);
        // Negative quantities are normalized to zero like book levels
        let trade = Trade {
            quantity: trade.quantity.max(Decimal::ZERO),
            timestamp: now,
            ..trade.clone()
        };
        let mut records = Vec::new();
        self.trades_processed += 1;
        self.last_price = Some(trade.price);

        let volatility = self.volatility.on_trade(&trade);
        let flip = self.delta.ingest(&trade);
        let absorption = self.absorption.on_trade(&trade);

        if let Some(flip) = flip {
            self.delta_flips += 1;
            self.engine.on_delta_flip(&flip);
        }
        if let Some(absorption) = absorption {
            self.absorptions_detected += 1;
            self.engine.on_absorption(&absorption);
            records.push(OutputRecord::AbsorptionDetected(absorption));
        }

        let delta = self.delta.last_delta();
        for signal in self.engine.on_price(trade.price, delta, volatility, now) {
            records.push(OutputRecord::Signal(signal));
        }

        if self.trades_processed % self.reporting.price_every_trades == 0 {
            let snapshot = self.delta.snapshot(now);
            records.push(OutputRecord::PriceUpdate(PriceUpdate {
                price: trade.price,
                delta: snapshot.delta,
                buy_volume: snapshot.buy_volume,
                sell_volume: snapshot.sell_volume,
                timestamp: now,
            }));
        }
        records
    }

    fn status(&mut self, now: TimestampMs) -> StatusUpdate {
        let uptime_ms = now - self.first_event_time.unwrap_or(now);
        StatusUpdate {
            uptime_seconds: uptime_ms / 1000,
            order_book_updates: self.orderbook_updates,
            trades: self.trades_processed,
            current_delta: self.delta.current_delta(now),
            best_bid: self.book.best_bid().map(|l| l.price),
            best_ask: self.book.best_ask().map(|l| l.price),
            bid_levels: self.book.bid_levels(),
            ask_levels: self.book.ask_levels(),
            volatility: self.volatility.current(),
            timestamp: now,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn book(&self) -> &OrderBookTracker {
        &self.book
    }

    pub fn engine(&self) -> &SignalEngine {
        &self.engine
    }

    pub fn last_price(&self) -> Option<Decimal> {
        self.last_price
    }

    pub fn current_delta(&self) -> Decimal {
        self.delta.last_delta()
    }

    pub fn volatility(&self) -> Option<VolatilityState> {
        self.volatility.current()
    }

    pub fn get_stats(&self) -> OrderFlowStats {
        let uptime_seconds = match (self.first_event_time, self.clock.latest()) {
            (Some(first), Some(latest)) => (latest - first) / 1000,
            _ => 0,
        };
        OrderFlowStats {
            symbol: self.symbol.clone(),
            uptime_seconds,
            orderbook_updates: self.orderbook_updates,
            trades_processed: self.trades_processed,
            level_removals: self.level_removals,
            sweeps_detected: self.sweeps_detected,
            delta_flips: self.delta_flips,
            absorptions_detected: self.absorptions_detected,
            last_price: self.last_price,
            current_delta: self.delta.last_delta(),
            book: self.book.get_summary(),
            signals: self.engine.stats().clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderFlowStats {
    pub symbol: String,
    pub uptime_seconds: i64,
    pub orderbook_updates: u64,
    pub trades_processed: u64,
    pub level_removals: u64,
    pub sweeps_detected: u64,
    pub delta_flips: u64,
    pub absorptions_detected: u64,
    pub last_price: Option<Decimal>,
    pub current_delta: Decimal,
    pub book: OrderBookSummary,
    pub signals: SignalStats,
}

impl OrderFlowStats {
    /// Lines of the end-of-session report.
    pub fn report_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Session report for {} ({}s of feed time)", self.symbol, self.uptime_seconds),
            format!(
                "Order book updates: {} | trades: {} | level removals: {}",
                self.orderbook_updates, self.trades_processed, self.level_removals
            ),
            format!(
                "Sweeps: {} | delta flips: {} | absorptions: {}",
                self.sweeps_detected, self.delta_flips, self.absorptions_detected
            ),
            format!(
                "Signals: {} (buy {}, sell {}) | avg confidence {:.1}%",
                self.signals.total_signals,
                self.signals.buy_signals,
                self.signals.sell_signals,
                self.signals.avg_confidence() * 100.0
            ),
            format!(
                "Pattern timeouts: buy {} | sell {}",
                self.signals.buy_timeouts, self.signals.sell_timeouts
            ),
        ];
        if self.signals.filtered_signals > 0 {
            let reasons: Vec<String> = self
                .signals
                .filter_reasons
                .iter()
                .map(|(reason, count)| format!("{}={}", reason, count))
                .collect();
            lines.push(format!(
                "Filtered signals: {} ({})",
                self.signals.filtered_signals,
                reasons.join(", ")
            ));
        }
        if let Some(price) = self.last_price {
            lines.push(format!("Last price: {} | delta: {}", price, self.current_delta.normalize()));
        }
        lines.push(self.book.to_string());
        lines
    }
}

impl fmt::Display for OrderFlowStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OrderFlowStats(symbol={}, updates={}, trades={}, sweeps={}, flips={}, absorptions={}, signals={})",
            self.symbol,
            self.orderbook_updates,
            self.trades_processed,
            self.sweeps_detected,
            self.delta_flips,
            self.absorptions_detected,
            self.signals.total_signals
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AggressorSide, PriceLevel, SignalType};
    use rust_decimal_macros::dec;

    fn aggregator(reporting: ReportingIntervals) -> OrderFlowAggregator {
        OrderFlowAggregator::new(
            "ethusdt",
            &OrderFlowConfig::default(),
            &SignalConfig::default(),
            reporting,
        )
        .unwrap()
    }

    fn quiet() -> ReportingIntervals {
        ReportingIntervals {
            status_every_updates: u64::MAX,
            price_every_trades: u64::MAX,
        }
    }

    fn snapshot(ts: i64) -> MarketEvent {
        MarketEvent::OrderBook(OrderBookUpdate::snapshot(
            vec![
                PriceLevel::new(dec!(100.0), dec!(5)),
                PriceLevel::new(dec!(99.9), dec!(5)),
                PriceLevel::new(dec!(99.8), dec!(5)),
            ],
            vec![PriceLevel::new(dec!(100.1), dec!(5))],
            ts,
        ))
    }

    fn remove_bid(price: Decimal, ts: i64) -> MarketEvent {
        MarketEvent::OrderBook(OrderBookUpdate::diff(
            vec![PriceLevel::new(price, Decimal::ZERO)],
            vec![],
            ts,
        ))
    }

    fn trade(price: Decimal, qty: Decimal, side: AggressorSide, ts: i64) -> MarketEvent {
        MarketEvent::Trade(Trade::new(price, qty, side, ts))
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = OrderFlowConfig {
            sweep_min_levels: 0,
            ..OrderFlowConfig::default()
        };
        assert!(OrderFlowAggregator::with_orderflow("ETHUSDT", &config).is_err());
    }

    #[test]
    fn test_snapshot_discards_pending_removals() {
        let mut agg = aggregator(quiet());
        agg.process(&snapshot(0));
        assert!(agg.process(&remove_bid(dec!(100.0), 100)).is_empty());
        assert!(agg.process(&remove_bid(dec!(99.9), 150)).is_empty());

        // Book reloaded inside the sweep window
        agg.process(&snapshot(160));
        assert!(agg.process(&remove_bid(dec!(99.8), 200)).is_empty());
        assert_eq!(agg.get_stats().sweeps_detected, 0);
        assert_eq!(agg.engine().stage(SignalType::Buy).name(), "waiting_sweep");
    }

    #[test]
    fn test_negative_trade_quantity_clamped_to_zero() {
        let mut agg = aggregator(quiet());
        agg.process(&trade(dec!(100), dec!(-10), AggressorSide::Buy, 1_000));
        assert_eq!(agg.current_delta(), Decimal::ZERO);

        agg.process(&trade(dec!(100), dec!(4), AggressorSide::Buy, 1_100));
        assert_eq!(agg.current_delta(), dec!(4));
        assert_eq!(agg.get_stats().trades_processed, 2);
        assert_eq!(agg.last_price(), Some(dec!(100)));
    }

    #[test]
    fn test_sweep_record_from_book_updates() {
        let mut agg = aggregator(quiet());
        assert!(agg.process(&snapshot(0)).is_empty());
        assert!(agg.process(&remove_bid(dec!(100.0), 100)).is_empty());
        assert!(agg.process(&remove_bid(dec!(99.9), 150)).is_empty());
        let records = agg.process(&remove_bid(dec!(99.8), 250));

        assert_eq!(records.len(), 1);
        match &records[0] {
            OutputRecord::SweepDetected(sweep) => {
                assert_eq!(sweep.levels_removed, 3);
                assert_eq!(sweep.duration_ms, 150);
            }
            other => panic!("unexpected record {}", other),
        }
        assert_eq!(agg.engine().stage(SignalType::Buy).name(), "waiting_delta_flip");
    }

    #[test]
    fn test_periodic_records() {
        let mut agg = aggregator(ReportingIntervals {
            status_every_updates: 2,
            price_every_trades: 2,
        });

        assert!(agg.process(&snapshot(1_000)).is_empty());
        let records = agg.process(&remove_bid(dec!(99.8), 3_500));
        match records.last() {
            Some(OutputRecord::StatusUpdate(status)) => {
                assert_eq!(status.uptime_seconds, 2);
                assert_eq!(status.order_book_updates, 2);
                assert_eq!(status.bid_levels, 2);
                assert_eq!(status.best_bid, Some(dec!(100.0)));
            }
            other => panic!("expected status, got {:?}", other),
        }

        assert!(agg.process(&trade(dec!(100), dec!(3), AggressorSide::Buy, 4_000)).is_empty());
        let records = agg.process(&trade(dec!(100), dec!(1), AggressorSide::Sell, 4_100));
        match records.last() {
            Some(OutputRecord::PriceUpdate(update)) => {
                assert_eq!(update.price, dec!(100));
                assert_eq!(update.delta, dec!(2));
                assert_eq!(update.buy_volume, dec!(3));
                assert_eq!(update.sell_volume, dec!(-1));
            }
            other => panic!("expected price update, got {:?}", other),
        }
    }

    #[test]
    fn test_backwards_timestamp_clamped() {
        let mut agg = aggregator(quiet());
        agg.process(&trade(dec!(100), dec!(1), AggressorSide::Buy, 5_000));
        agg.process(&trade(dec!(100), dec!(1), AggressorSide::Buy, 4_000));
        let stats = agg.get_stats();
        assert_eq!(stats.trades_processed, 2);
        assert_eq!(stats.current_delta, dec!(2));
        assert_eq!(stats.uptime_seconds, 0);
    }

    #[test]
    fn test_stats_counts() {
        let mut agg = aggregator(quiet());
        agg.process(&snapshot(0));
        agg.process(&remove_bid(dec!(100.0), 10));
        agg.process(&trade(dec!(100), dec!(100), AggressorSide::Sell, 20));

        let stats = agg.get_stats();
        assert_eq!(stats.symbol, "ETHUSDT");
        assert_eq!(stats.orderbook_updates, 2);
        assert_eq!(stats.level_removals, 1);
        assert_eq!(stats.absorptions_detected, 1);
        assert_eq!(stats.last_price, Some(dec!(100)));
        assert_eq!(stats.book.bid_levels, 2);
    }

    #[test]
    fn test_report_lines() {
        let mut agg = aggregator(quiet());
        agg.process(&trade(dec!(100), dec!(2), AggressorSide::Buy, 0));

        let lines = agg.get_stats().report_lines();
        assert!(lines[0].starts_with("Session report for ETHUSDT"));
        assert!(lines.iter().any(|l| l == "Last price: 100 | delta: 2"));
        assert!(!lines.iter().any(|l| l.starts_with("Filtered signals")));
    }
}

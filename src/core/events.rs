// Outbound Records and Record Bus
// Everything the analysis core reports flows through here to presentation

use crate::core::types::{AbsorptionEvent, Signal, SweepEvent, TimestampMs, VolatilityState};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

// ============================================================================
// Event Priority
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventPriority {
    High = 1,   // Signals
    Medium = 2, // Sweeps, absorption
    Low = 3,    // Status
    Info = 4,   // Price ticks
}

impl fmt::Display for EventPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub price: Decimal,
    pub delta: Decimal,
    pub buy_volume: Decimal,
    /// Signed, never positive.
    pub sell_volume: Decimal,
    pub timestamp: TimestampMs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub uptime_seconds: i64,
    pub order_book_updates: u64,
    pub trades: u64,
    pub current_delta: Decimal,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub bid_levels: usize,
    pub ask_levels: usize,
    pub volatility: Option<VolatilityState>,
    pub timestamp: TimestampMs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OutputRecord {
    PriceUpdate(PriceUpdate),
    SweepDetected(SweepEvent),
    AbsorptionDetected(AbsorptionEvent),
    Signal(Signal),
    StatusUpdate(StatusUpdate),
}

impl OutputRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            OutputRecord::PriceUpdate(_) => "price_update",
            OutputRecord::SweepDetected(_) => "sweep_detected",
            OutputRecord::AbsorptionDetected(_) => "absorption_detected",
            OutputRecord::Signal(_) => "signal",
            OutputRecord::StatusUpdate(_) => "status_update",
        }
    }

    pub fn priority(&self) -> EventPriority {
        match self {
            OutputRecord::Signal(_) => EventPriority::High,
            OutputRecord::SweepDetected(_) | OutputRecord::AbsorptionDetected(_) => {
                EventPriority::Medium
            }
            OutputRecord::StatusUpdate(_) => EventPriority::Low,
            OutputRecord::PriceUpdate(_) => EventPriority::Info,
        }
    }

    pub fn timestamp(&self) -> TimestampMs {
        match self {
            OutputRecord::PriceUpdate(r) => r.timestamp,
            OutputRecord::SweepDetected(r) => r.timestamp,
            OutputRecord::AbsorptionDetected(r) => r.timestamp,
            OutputRecord::Signal(r) => r.timestamp,
            OutputRecord::StatusUpdate(r) => r.timestamp,
        }
    }
}

impl fmt::Display for OutputRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputRecord::PriceUpdate(r) => {
                write!(f, "PriceUpdate(price={}, delta={})", r.price, r.delta)
            }
            OutputRecord::SweepDetected(r) => write!(f, "{}", r),
            OutputRecord::AbsorptionDetected(r) => write!(f, "{}", r),
            OutputRecord::Signal(r) => write!(f, "{}", r),
            OutputRecord::StatusUpdate(r) => write!(
                f,
                "StatusUpdate(uptime={}s, updates={}, trades={}, delta={})",
                r.uptime_seconds, r.order_book_updates, r.trades, r.current_delta
            ),
        }
    }
}

// ============================================================================
// Record Bus
// ============================================================================

type RecordCallback = Arc<dyn Fn(&OutputRecord) + Send + Sync>;

/// Fan-out of core records to presentation subscribers. Owned by the
/// processing loop; there is no process-wide instance.
pub struct RecordBus {
    tx: broadcast::Sender<OutputRecord>,
    subscribers: RwLock<HashMap<&'static str, Vec<RecordCallback>>>,
    wildcard_subscribers: RwLock<Vec<RecordCallback>>,
    history: RwLock<VecDeque<OutputRecord>>,
    max_history: usize,
    stats: RwLock<RecordBusStats>,
}

#[derive(Debug, Clone, Default)]
struct RecordBusStats {
    total_published: u64,
    total_delivered: u64,
    per_kind: HashMap<&'static str, u64>,
}

impl RecordBus {
    pub fn new(max_history: usize) -> Self {
        let (tx, _rx) = broadcast::channel(1024);

        Self {
            tx,
            subscribers: RwLock::new(HashMap::new()),
            wildcard_subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(VecDeque::with_capacity(max_history.min(1024))),
            max_history,
            stats: RwLock::new(RecordBusStats::default()),
        }
    }

    /// Subscribe by record kind (see [`OutputRecord::kind`]), or "*" for all.
    pub fn subscribe<F>(&self, kind: &'static str, callback: F)
    where
        F: Fn(&OutputRecord) + Send + Sync + 'static,
    {
        let callback: RecordCallback = Arc::new(callback);

        if kind == "*" {
            self.wildcard_subscribers.write().push(callback);
        } else {
            self.subscribers.write().entry(kind).or_default().push(callback);
        }

        tracing::debug!(kind = %kind, "Subscribed to records");
    }

    pub fn publish(&self, record: OutputRecord) {
        let kind = record.kind();
        let mut delivered = 0u64;

        if let Some(callbacks) = self.subscribers.read().get(kind) {
            for callback in callbacks {
                callback(&record);
                delivered += 1;
            }
        }
        for callback in self.wildcard_subscribers.read().iter() {
            callback(&record);
            delivered += 1;
        }

        // No receivers is fine
        let _ = self.tx.send(record.clone());

        {
            let mut history = self.history.write();
            history.push_back(record);
            while history.len() > self.max_history {
                history.pop_front();
            }
        }

        let mut stats = self.stats.write();
        stats.total_published += 1;
        stats.total_delivered += delivered;
        *stats.per_kind.entry(kind).or_insert(0) += 1;
    }

    pub fn subscribe_channel(&self) -> broadcast::Receiver<OutputRecord> {
        self.tx.subscribe()
    }

    /// Most recent first.
    pub fn get_recent(&self, kind: Option<&str>, limit: usize) -> Vec<OutputRecord> {
        self.history
            .read()
            .iter()
            .rev()
            .filter(|r| kind.map_or(true, |k| r.kind() == k))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn get_stats(&self) -> RecordBusStatsSnapshot {
        let stats = self.stats.read();
        let mut per_kind: Vec<(String, u64)> = stats
            .per_kind
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        per_kind.sort();

        RecordBusStatsSnapshot {
            total_published: stats.total_published,
            total_delivered: stats.total_delivered,
            subscriber_count: self.subscribers.read().values().map(Vec::len).sum::<usize>()
                + self.wildcard_subscribers.read().len(),
            per_kind,
            history_size: self.history.read().len(),
        }
    }
}

impl Default for RecordBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[derive(Debug, Clone)]
pub struct RecordBusStatsSnapshot {
    pub total_published: u64,
    pub total_delivered: u64,
    pub subscriber_count: usize,
    pub per_kind: Vec<(String, u64)>,
    pub history_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{BookSide, SweepDirection};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sweep_record(ts: i64) -> OutputRecord {
        OutputRecord::SweepDetected(SweepEvent {
            direction: SweepDirection::Down,
            levels_removed: 3,
            duration_ms: 120,
            swept_low: dec!(99.8),
            swept_high: dec!(100),
            timestamp: ts,
        })
    }

    fn absorption_record(ts: i64) -> OutputRecord {
        OutputRecord::AbsorptionDetected(AbsorptionEvent {
            side: BookSide::Bid,
            volume: dec!(105),
            price: dec!(99.7),
            timestamp: ts,
        })
    }

    #[test]
    fn test_priority_ordering() {
        assert!(EventPriority::High < EventPriority::Medium);
        assert!(EventPriority::Low < EventPriority::Info);
        assert_eq!(sweep_record(1).priority(), EventPriority::Medium);
    }

    #[test]
    fn test_kind_subscription() {
        let bus = RecordBus::new(10);
        let sweeps = Arc::new(AtomicUsize::new(0));
        let all = Arc::new(AtomicUsize::new(0));

        let sweeps_clone = Arc::clone(&sweeps);
        bus.subscribe("sweep_detected", move |_| {
            sweeps_clone.fetch_add(1, Ordering::SeqCst);
        });
        let all_clone = Arc::clone(&all);
        bus.subscribe("*", move |_| {
            all_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(sweep_record(1));
        bus.publish(absorption_record(2));

        assert_eq!(sweeps.load(Ordering::SeqCst), 1);
        assert_eq!(all.load(Ordering::SeqCst), 2);

        let stats = bus.get_stats();
        assert_eq!(stats.total_published, 2);
        assert_eq!(stats.total_delivered, 3);
        assert_eq!(stats.subscriber_count, 2);
    }

    #[test]
    fn test_history_is_bounded() {
        let bus = RecordBus::new(2);
        bus.publish(sweep_record(1));
        bus.publish(sweep_record(2));
        bus.publish(absorption_record(3));

        let recent = bus.get_recent(None, 10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].timestamp(), 3);
        assert_eq!(recent[1].timestamp(), 2);

        let sweeps = bus.get_recent(Some("sweep_detected"), 10);
        assert_eq!(sweeps.len(), 1);
    }

    #[test]
    fn test_broadcast_channel_receives() {
        let bus = RecordBus::new(10);
        let mut rx = bus.subscribe_channel();
        bus.publish(absorption_record(7));
        let record = rx.try_recv().unwrap();
        assert_eq!(record.kind(), "absorption_detected");
    }

    #[test]
    fn test_record_serializes_tagged() {
        let json = serde_json::to_value(absorption_record(5)).unwrap();
        assert_eq!(json["type"], "AbsorptionDetected");
        assert_eq!(json["data"]["side"], "Bid");
    }
}

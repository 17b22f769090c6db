// Console Reporter - renders core records through tracing
// Display mode decides which record kinds reach the console

use crate::core::config::DisplayMode;
use crate::core::events::{EventPriority, OutputRecord, RecordBus};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Subscribes to every record on a [`RecordBus`] and logs the ones its
/// display mode lets through.
pub struct ConsoleReporter {
    mode: DisplayMode,
    rendered: AtomicU64,
    suppressed: AtomicU64,
}

impl ConsoleReporter {
    pub fn new(mode: DisplayMode) -> Self {
        Self {
            mode,
            rendered: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Register on the bus; the returned handle keeps the counters readable.
    pub fn attach(self, bus: &RecordBus) -> Arc<Self> {
        let reporter = Arc::new(self);
        let subscriber = reporter.clone();
        bus.subscribe("*", move |record| subscriber.report(record));
        reporter
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    /// silent = signals + status, quiet = + sweeps/absorption, normal = everything.
    pub fn shows(&self, record: &OutputRecord) -> bool {
        match self.mode {
            DisplayMode::Normal => true,
            DisplayMode::Quiet => record.priority() <= EventPriority::Low,
            DisplayMode::Silent => matches!(
                record,
                OutputRecord::Signal(_) | OutputRecord::StatusUpdate(_)
            ),
        }
    }

    pub fn render(record: &OutputRecord) -> String {
        match record {
            OutputRecord::Signal(s) => format!(
                "{} SIGNAL @ {} | confidence {:.1}% | delta {} | {}",
                s.signal_type,
                s.price,
                s.confidence * 100.0,
                s.delta.normalize(),
                s.reasons.join(" | ")
            ),
            OutputRecord::SweepDetected(s) => format!(
                "SWEEP {} | {} levels | {}ms | {} - {}",
                s.direction, s.levels_removed, s.duration_ms, s.swept_low, s.swept_high
            ),
            OutputRecord::AbsorptionDetected(a) => format!(
                "ABSORPTION | side {} | vol {} | price {}",
                a.side,
                a.volume.normalize(),
                a.price
            ),
            OutputRecord::PriceUpdate(p) => format!(
                "Price {} | delta {} (B: {} / S: {})",
                p.price,
                p.delta.normalize(),
                p.buy_volume.normalize(),
                p.sell_volume.normalize()
            ),
            OutputRecord::StatusUpdate(s) => {
                let vol = s
                    .volatility
                    .map_or_else(|| "unknown".to_string(), |v| v.to_string());
                format!(
                    "STATUS | uptime {}s | OB updates {} | trades {} | delta {} | levels {}/{} | vol {}",
                    s.uptime_seconds,
                    s.order_book_updates,
                    s.trades,
                    s.current_delta.normalize(),
                    s.bid_levels,
                    s.ask_levels,
                    vol
                )
            }
        }
    }

    pub fn report(&self, record: &OutputRecord) {
        if !self.shows(record) {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.rendered.fetch_add(1, Ordering::Relaxed);

        let line = Self::render(record);
        match record.priority() {
            EventPriority::High => warn!(kind = record.kind(), ts = record.timestamp(), "{}", line),
            _ => info!(kind = record.kind(), ts = record.timestamp(), "{}", line),
        }
    }

    pub fn rendered(&self) -> u64 {
        self.rendered.load(Ordering::Relaxed)
    }

    pub fn suppressed(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }
}

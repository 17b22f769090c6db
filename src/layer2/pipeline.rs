// Market Feed Pipeline - WebSocket -> Parser -> Synchronizer -> event queue -> core
// Ordered, never-dropping hand-off between the transport and the analysis core

use parking_lot::RwLock;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::core::config::FeedConfig;
use crate::core::events::RecordBus;
use crate::core::types::{MarketEvent, OrderBookUpdate, TimestampMs};
use crate::layer1::rest_client::{BinanceRestClient, RestClientError};
use crate::layer1::websocket::{WebSocketClient, WebSocketError, WsFrame};
use crate::layer2::parser::{MessageParser, ParsedDepthSnapshot, ParsedMessage};
use crate::layer2::synchronizer::{DepthSynchronizer, SyncOutcome};
use crate::layer3::orderflow_aggregator::OrderFlowAggregator;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("REST error: {0}")]
    Rest(#[from] RestClientError),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WebSocketError),
    #[error("Event queue closed")]
    QueueClosed,
    #[error("Feed task failed: {0}")]
    Task(String),
}

fn wall_clock_ms() -> TimestampMs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as TimestampMs)
        .unwrap_or_default()
}

// ============================================================================
// Event queue
// ============================================================================

#[derive(Debug)]
struct QueueGauge {
    depth: AtomicUsize,
    warn_depth: usize,
    next_warn: AtomicUsize,
    warnings: AtomicU64,
}

impl QueueGauge {
    /// Decrement without wrapping below zero; returns the new depth.
    fn release(&self) -> usize {
        let previous = self
            .depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| Some(d.saturating_sub(1)))
            .unwrap_or_else(|d| d);
        previous.saturating_sub(1)
    }
}

/// Producer half of the unbounded market-event queue.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<MarketEvent>,
    gauge: Arc<QueueGauge>,
}

/// Consumer half; there is exactly one.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<MarketEvent>,
    gauge: Arc<QueueGauge>,
}

/// Queue that warns when depth reaches `warn_depth` and again at each doubling.
pub fn event_channel(warn_depth: usize) -> (EventSender, EventReceiver) {
    let warn_depth = warn_depth.max(1);
    let (tx, rx) = mpsc::unbounded_channel();
    let gauge = Arc::new(QueueGauge {
        depth: AtomicUsize::new(0),
        warn_depth,
        next_warn: AtomicUsize::new(warn_depth),
        warnings: AtomicU64::new(0),
    });

    (
        EventSender {
            tx,
            gauge: gauge.clone(),
        },
        EventReceiver { rx, gauge },
    )
}

impl EventSender {
    pub fn send(&self, event: MarketEvent) -> Result<(), FeedError> {
        // Count before the event becomes visible to the consumer
        let depth = self.gauge.depth.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        if self.tx.send(event).is_err() {
            self.gauge.release();
            return Err(FeedError::QueueClosed);
        }

        let threshold = self.gauge.next_warn.load(Ordering::Acquire);
        if depth >= threshold
            && self
                .gauge
                .next_warn
                .compare_exchange(threshold, threshold.saturating_mul(2), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.gauge.warnings.fetch_add(1, Ordering::Relaxed);
            warn!(depth = depth, threshold = threshold, "Event queue backing up");
        }
        Ok(())
    }

    pub fn depth(&self) -> usize {
        self.gauge.depth.load(Ordering::Acquire)
    }

    pub fn warnings(&self) -> u64 {
        self.gauge.warnings.load(Ordering::Relaxed)
    }
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Option<MarketEvent> {
        let event = self.rx.recv().await?;
        self.consumed();
        Some(event)
    }

    pub fn try_recv(&mut self) -> Option<MarketEvent> {
        let event = self.rx.try_recv().ok()?;
        self.consumed();
        Some(event)
    }

    fn consumed(&self) {
        let depth = self.gauge.release();
        // Drained below the threshold: re-arm the first warning
        if depth < self.gauge.warn_depth {
            self.gauge.next_warn.store(self.gauge.warn_depth, Ordering::Release);
        }
    }

    pub fn depth(&self) -> usize {
        self.gauge.depth.load(Ordering::Acquire)
    }
}

// ============================================================================
// Processing loop
// ============================================================================

/// Drain the queue into the aggregator and publish every record, until the
/// queue closes or `shutdown` resolves. Returns the number of events processed.
pub async fn process_events<F>(
    receiver: &mut EventReceiver,
    aggregator: &mut OrderFlowAggregator,
    bus: &RecordBus,
    shutdown: F,
) -> u64
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut processed = 0u64;

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!(processed = processed, "Processing loop stopped");
                break;
            }

            event = receiver.recv() => {
                let Some(event) = event else {
                    info!(processed = processed, "Event queue closed");
                    break;
                };
                for record in aggregator.process(&event) {
                    bus.publish(record);
                }
                processed += 1;
            }
        }
    }

    processed
}

// ============================================================================
// Market feed
// ============================================================================

/// Feed statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub frames: u64,
    pub connects: u64,
    pub disconnects: u64,
    pub snapshots: u64,
    pub depth_updates: u64,
    pub trades: u64,
    pub parse_errors: u64,
    pub stale_diffs: u64,
    pub resyncs: u64,
}

impl fmt::Display for FeedStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FeedStats(frames={}, depth={}, trades={}, snapshots={}, resyncs={}, errors={})",
            self.frames, self.depth_updates, self.trades, self.snapshots, self.resyncs, self.parse_errors
        )
    }
}

/// Turns the raw exchange streams into ordered `MarketEvent`s.
pub struct MarketFeed {
    symbol: String,
    config: FeedConfig,
    rest: BinanceRestClient,
    parser: MessageParser,
    sync: DepthSynchronizer,
    last_event_time: Option<TimestampMs>,
    stats: Arc<RwLock<FeedStats>>,
}

impl MarketFeed {
    pub fn new(config: &FeedConfig) -> Result<Self, FeedError> {
        let symbol = config.symbol.to_uppercase();
        Ok(Self {
            rest: BinanceRestClient::from_config(config)?,
            parser: MessageParser::new(&symbol),
            sync: DepthSynchronizer::new(&symbol, config.max_sequence_gaps),
            symbol,
            config: config.clone(),
            last_event_time: None,
            stats: Arc::new(RwLock::new(FeedStats::default())),
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Shared view of the counters for the final report.
    pub fn stats_handle(&self) -> Arc<RwLock<FeedStats>> {
        self.stats.clone()
    }

    pub fn is_synchronized(&self) -> bool {
        self.sync.is_synchronized()
    }

    /// Run until the event queue closes or the WebSocket gives up.
    pub async fn run(mut self, events: EventSender) -> Result<(), FeedError> {
        let ws = WebSocketClient::new(&self.config);
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
        let ws_task = tokio::spawn(async move { ws.run(frame_tx).await });

        while let Some(frame) = frame_rx.recv().await {
            if let Err(e) = self.handle_frame(frame, &events).await {
                error!(error = %e, "Market feed stopped");
                ws_task.abort();
                return Err(e);
            }
        }

        match ws_task.await {
            Ok(result) => result.map_err(FeedError::from),
            Err(e) => Err(FeedError::Task(e.to_string())),
        }
    }

    async fn handle_frame(&mut self, frame: WsFrame, events: &EventSender) -> Result<(), FeedError> {
        match frame {
            WsFrame::Connected => {
                self.stats.write().connects += 1;
                self.parser.reset();
                self.resync(events).await
            }
            WsFrame::Text(text) => {
                if self.handle_message(&text, events)? {
                    self.resync(events).await?;
                }
                Ok(())
            }
            WsFrame::Disconnected => {
                self.stats.write().disconnects += 1;
                self.sync.reset();
                Ok(())
            }
        }
    }

    async fn resync(&mut self, events: &EventSender) -> Result<(), FeedError> {
        self.sync.reset();
        let snapshot = self
            .rest
            .get_depth_snapshot(&self.symbol, self.config.snapshot_limit)
            .await?;
        self.apply_snapshot(snapshot, events)
    }

    /// Deliver a snapshot to the core and align the diff stream against it.
    pub fn apply_snapshot(&mut self, snapshot: ParsedDepthSnapshot, events: &EventSender) -> Result<(), FeedError> {
        let timestamp = self.last_event_time.unwrap_or_else(wall_clock_ms);
        info!(
            last_update_id = snapshot.last_update_id,
            bids = snapshot.bids.len(),
            asks = snapshot.asks.len(),
            "Applying depth snapshot"
        );

        events.send(MarketEvent::OrderBook(OrderBookUpdate::snapshot(
            snapshot.bids,
            snapshot.asks,
            timestamp,
        )))?;
        self.sync.initialize(snapshot.last_update_id);
        self.stats.write().snapshots += 1;
        Ok(())
    }

    /// Parse one text frame and forward what it yields. Returns true when the
    /// book lost continuity and a new snapshot is needed.
    pub fn handle_message(&mut self, raw: &str, events: &EventSender) -> Result<bool, FeedError> {
        self.stats.write().frames += 1;

        let parsed = match self.parser.parse(raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.stats.write().parse_errors += 1;
                debug!(error = %e, "Frame skipped");
                return Ok(false);
            }
        };

        match parsed {
            ParsedMessage::Trade { trade, .. } => {
                self.last_event_time = Some(trade.timestamp);
                events.send(MarketEvent::Trade(trade))?;
                self.stats.write().trades += 1;
                Ok(false)
            }
            ParsedMessage::DepthUpdate(update) => {
                self.last_event_time = Some(update.event_time);
                match self.sync.process(update) {
                    SyncOutcome::Apply(update) => {
                        events.send(MarketEvent::OrderBook(OrderBookUpdate::diff(
                            update.bids,
                            update.asks,
                            update.event_time,
                        )))?;
                        self.stats.write().depth_updates += 1;
                        Ok(false)
                    }
                    SyncOutcome::Stale => {
                        self.stats.write().stale_diffs += 1;
                        Ok(false)
                    }
                    SyncOutcome::NotReady => Ok(false),
                    SyncOutcome::ResyncRequired => {
                        self.stats.write().resyncs += 1;
                        Ok(true)
                    }
                }
            }
            ParsedMessage::SubscriptionAck { id } => {
                debug!(id = id, "Subscription acknowledged");
                Ok(false)
            }
        }
    }
}

// WebSocket Client - Binance spot market streams
// Depth diffs + trades for one symbol, with ping, stale detection and reconnect backoff

use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

use crate::core::config::FeedConfig;
use crate::core::types::ConnectionStatus;

/// Reconnect delay never grows beyond this.
const MAX_BACKOFF_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum WebSocketError {
    #[error("WebSocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Max reconnection attempts reached ({0})")]
    MaxReconnects(u32),
}

/// What the client hands to the pipeline. Connection transitions travel
/// in-band so the consumer sees them in order with the data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsFrame {
    Connected,
    Text(String),
    Disconnected,
}

/// Why a single session ended
enum SessionEnd {
    Closed,
    ConsumerGone,
}

pub struct WebSocketClient {
    url: String,
    symbol: String,
    streams: Vec<String>,
    state: Arc<RwLock<ConnectionStatus>>,
    message_count: Arc<RwLock<u64>>,
    error_count: Arc<RwLock<u64>>,

    // Auto-incrementing request ID for Binance protocol
    next_request_id: AtomicU32,

    ping_interval_secs: u64,
    health_check_interval_secs: u64,
    stale_timeout_secs: u64,
    max_reconnect_attempts: u32,
    reconnect_delay_seconds: u64,
}

impl WebSocketClient {
    pub fn new(config: &FeedConfig) -> Self {
        let symbol = config.symbol.to_uppercase();
        let lower = symbol.to_lowercase();
        let streams = vec![format!("{}@depth@100ms", lower), format!("{}@trade", lower)];

        info!(symbol = %symbol, url = %config.ws_url, "WebSocket client created");

        Self {
            url: config.ws_url.clone(),
            symbol,
            streams,
            state: Arc::new(RwLock::new(ConnectionStatus::Disconnected)),
            message_count: Arc::new(RwLock::new(0)),
            error_count: Arc::new(RwLock::new(0)),
            next_request_id: AtomicU32::new(1),
            ping_interval_secs: config.ping_interval_secs.max(1),
            health_check_interval_secs: config.health_check_interval_secs.max(1),
            stale_timeout_secs: config.stale_timeout_secs,
            max_reconnect_attempts: config.max_reconnect_attempts,
            reconnect_delay_seconds: config.reconnect_delay_seconds.max(1),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn streams(&self) -> &[String] {
        &self.streams
    }

    pub fn is_connected(&self) -> bool {
        *self.state.read() == ConnectionStatus::Connected
    }

    /// Delay before reconnect attempt `attempt` (0-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2_u64.saturating_pow(attempt.min(16));
        Duration::from_secs(self.reconnect_delay_seconds.saturating_mul(factor).min(MAX_BACKOFF_SECS))
    }

    pub fn subscribe_message(&self) -> String {
        let req_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        create_subscribe_message(&self.streams, req_id)
    }

    /// Connect, forward frames and reconnect until the consumer goes away or
    /// the reconnect budget is spent.
    pub async fn run(&self, tx: mpsc::UnboundedSender<WsFrame>) -> Result<(), WebSocketError> {
        let mut reconnect_attempt = 0u32;

        loop {
            *self.state.write() = ConnectionStatus::Connecting;
            let seen_before = *self.message_count.read();

            match self.try_connect(&tx).await {
                Ok(SessionEnd::ConsumerGone) => {
                    info!("Frame consumer closed, stopping WebSocket");
                    *self.state.write() = ConnectionStatus::Disconnected;
                    return Ok(());
                }
                Ok(SessionEnd::Closed) => info!("WebSocket connection ended"),
                Err(e) => {
                    error!(error = %e, "WebSocket connection error");
                    *self.error_count.write() += 1;
                }
            }

            if tx.send(WsFrame::Disconnected).is_err() {
                return Ok(());
            }

            // A session that delivered data resets the backoff
            if *self.message_count.read() > seen_before {
                reconnect_attempt = 0;
            }
            if reconnect_attempt >= self.max_reconnect_attempts {
                error!(max_attempts = self.max_reconnect_attempts, "Max reconnection attempts reached");
                *self.state.write() = ConnectionStatus::Failed;
                return Err(WebSocketError::MaxReconnects(self.max_reconnect_attempts));
            }

            let delay = self.backoff_delay(reconnect_attempt);
            reconnect_attempt += 1;
            warn!(
                delay_secs = delay.as_secs(),
                attempt = reconnect_attempt,
                max = self.max_reconnect_attempts,
                "Reconnecting"
            );
            *self.state.write() = ConnectionStatus::Reconnecting;
            tokio::time::sleep(delay).await;
        }
    }

    /// One connection: subscribe, then pump frames until close, error or staleness.
    async fn try_connect(&self, tx: &mpsc::UnboundedSender<WsFrame>) -> Result<SessionEnd, WebSocketError> {
        debug!(url = %self.url, "Connecting to WebSocket");
        let (ws_stream, _) = connect_async(self.url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        write.send(Message::Text(self.subscribe_message())).await?;
        info!(streams = ?self.streams, "WebSocket connected and subscribed");
        *self.state.write() = ConnectionStatus::Connected;

        if tx.send(WsFrame::Connected).is_err() {
            return Ok(SessionEnd::ConsumerGone);
        }

        let mut last_message = Instant::now();
        let stale_after = Duration::from_secs(self.stale_timeout_secs);
        let mut ping = tokio::time::interval(Duration::from_secs(self.ping_interval_secs));
        let mut health = tokio::time::interval(Duration::from_secs(self.health_check_interval_secs));

        let end = loop {
            tokio::select! {
                msg_result = read.next() => {
                    match msg_result {
                        Some(Ok(Message::Text(text))) => {
                            last_message = Instant::now();
                            let count = {
                                let mut count = self.message_count.write();
                                *count += 1;
                                *count
                            };
                            if count % 10_000 == 0 {
                                debug!(count = count, "WebSocket messages received");
                            }
                            if tx.send(WsFrame::Text(text)).is_err() {
                                break SessionEnd::ConsumerGone;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            last_message = Instant::now();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            last_message = Instant::now();
                        }
                        Some(Ok(Message::Binary(data))) => {
                            last_message = Instant::now();
                            warn!(bytes = data.len(), "Received unexpected binary message");
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("WebSocket closed by server");
                            break SessionEnd::Closed;
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            info!("WebSocket stream ended");
                            break SessionEnd::Closed;
                        }
                    }
                }

                _ = ping.tick() => {
                    if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                        warn!(error = %e, "Ping failed");
                        break SessionEnd::Closed;
                    }
                }

                _ = health.tick() => {
                    let elapsed = last_message.elapsed();
                    if elapsed > stale_after {
                        warn!(elapsed_secs = elapsed.as_secs(), "Stale connection detected");
                        break SessionEnd::Closed;
                    }
                }
            }
        };

        *self.state.write() = ConnectionStatus::Disconnected;
        Ok(end)
    }

    pub fn get_stats(&self) -> WebSocketStats {
        WebSocketStats {
            state: *self.state.read(),
            message_count: *self.message_count.read(),
            error_count: *self.error_count.read(),
            streams: self.streams.len(),
        }
    }
}

/// WebSocket statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketStats {
    pub state: ConnectionStatus,
    pub message_count: u64,
    pub error_count: u64,
    pub streams: usize,
}

impl fmt::Display for WebSocketStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WebSocketStats(state={:?}, messages={}, errors={}, streams={})",
            self.state, self.message_count, self.error_count, self.streams
        )
    }
}

/// Create a Binance multi-stream subscribe message
pub fn create_subscribe_message(streams: &[String], id: u32) -> String {
    serde_json::json!({
        "method": "SUBSCRIBE",
        "params": streams,
        "id": id
    })
    .to_string()
}

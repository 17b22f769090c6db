// Layer 1 - Data Connectors for Binance Spot
// WebSocket market streams and the REST depth snapshot

pub mod websocket;
pub mod rest_client;

// Re-export commonly used items for convenience
pub use websocket::{WebSocketClient, WebSocketError, WebSocketStats, WsFrame};
pub use rest_client::{BinanceRestClient, RateLimiter, RestClientError, RestClientStats};

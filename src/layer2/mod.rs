// Layer 2 - Data Processing & Synchronization
// Parses exchange streams, keeps the book aligned and queues ordered events

pub mod orderbook;
pub mod parser;
pub mod synchronizer;
pub mod pipeline;

// Re-export commonly used items
pub use orderbook::{OrderBookSummary, OrderBookTracker};
pub use parser::{
    parse_depth_snapshot, MessageParser, ParseError, ParsedDepthSnapshot, ParsedDepthUpdate,
    ParsedMessage, ParserStats,
};
pub use synchronizer::{DepthSynchronizer, SyncOutcome, SyncState, SynchronizerStats};
pub use pipeline::{
    event_channel, process_events, EventReceiver, EventSender, FeedError, FeedStats, MarketFeed,
};

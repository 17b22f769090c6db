// Order-flow hunt - single-instrument order-flow core
// layer1: exchange connectors, layer2: parsing/sync/book, layer3: detectors and signals

pub mod core;
pub mod layer1;
pub mod layer2;
pub mod layer3;

pub use crate::core::{AppConfig, ConfigManager, MarketEvent, OutputRecord, RecordBus, Signal};
pub use crate::layer2::OrderBookTracker;
pub use crate::layer3::{OrderFlowAggregator, SignalEngine};

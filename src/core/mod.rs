// Core Module - Foundational types, config, logging, records and console output

pub mod types;
pub mod config;
pub mod logger;
pub mod events;
pub mod reporter;

// Re-export commonly used items for convenience
pub use types::*;
pub use config::{
    AppConfig, ConfigError, ConfigManager, ConfigSummary, DisplayMode, FeedConfig,
    MonitoringConfig, OrderFlowConfig, SignalConfig,
};
pub use logger::setup_logging;
pub use events::{EventPriority, OutputRecord, PriceUpdate, RecordBus, RecordBusStatsSnapshot, StatusUpdate};
pub use reporter::ConsoleReporter;

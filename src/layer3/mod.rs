// Layer 3 - Order-Flow Analysis
// Detectors, pattern machines and the per-symbol aggregator that drives them

// Common utilities
pub mod common;

// Sweep detection on book removals
pub mod orderbook;

// Delta, absorption and volatility on trades
pub mod trade;

// Sweep -> flip -> absorption -> reclaim
pub mod signal;

// Per-symbol context
pub mod orderflow_aggregator;

pub use orderflow_aggregator::{OrderFlowAggregator, OrderFlowStats, ReportingIntervals};
pub use signal::{SignalEngine, SignalStats};

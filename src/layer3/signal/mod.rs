// Signal Generation - one pattern machine per direction plus scoring

pub mod pattern;
pub mod engine;

pub use pattern::{CompletedPattern, PatternMachine, PatternStage};
pub use engine::{SignalEngine, SignalStats, FILTER_EXTREME_VOLATILITY};

// Trade Analysis - per-trade detectors

// Module structure:
// - delta.rs: DeltaWindow (rolling signed volume, flip detection)
// - absorption.rs: AbsorptionDetector (volume absorbed at a held price)
// - volatility.rs: VolatilityTracker (trade-to-trade regime)

pub mod delta;
pub mod absorption;
pub mod volatility;

pub use delta::{DeltaSnapshot, DeltaWindow};
pub use absorption::{AbsorptionDetector, AccumulatorState};
pub use volatility::VolatilityTracker;

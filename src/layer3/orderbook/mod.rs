// OrderBook Analysis - consumes level removals from the book tracker

// Module structure:
// - sweep_detector.rs: SweepDetector (distinct levels removed within a short window)

pub mod sweep_detector;

pub use sweep_detector::SweepDetector;

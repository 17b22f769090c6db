// Layer3 Common Module - Shared time utilities for the detectors

pub mod time_windows;

pub use time_windows::{MonotonicClock, TimeWindow};

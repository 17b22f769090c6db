// Time Windows - rolling (timestamp, item) storage over feed time
// Timestamps never run backwards inside a window

use crate::core::types::TimestampMs;
use std::collections::VecDeque;

/// High-water mark over feed timestamps. Out-of-order timestamps are clamped
/// to the latest one seen.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock {
    latest: Option<TimestampMs>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { latest: None }
    }

    /// Returns the effective timestamp for `timestamp`.
    pub fn observe(&mut self, timestamp: TimestampMs) -> TimestampMs {
        let effective = match self.latest {
            Some(latest) if timestamp < latest => latest,
            _ => timestamp,
        };
        self.latest = Some(effective);
        effective
    }

    pub fn latest(&self) -> Option<TimestampMs> {
        self.latest
    }
}

/// Rolling window keeping entries whose timestamp is >= now - duration.
pub struct TimeWindow<T> {
    duration_ms: i64,
    max_capacity: usize,
    data: VecDeque<(TimestampMs, T)>,
    clock: MonotonicClock,
}

impl<T> TimeWindow<T> {
    pub fn new(duration_ms: i64, max_capacity: usize) -> Self {
        Self {
            duration_ms,
            max_capacity,
            data: VecDeque::with_capacity(max_capacity.min(4096)),
            clock: MonotonicClock::new(),
        }
    }

    /// Append an item; returns the (clamped) timestamp it was stored under.
    pub fn add(&mut self, timestamp: TimestampMs, item: T) -> TimestampMs {
        let timestamp = self.clock.observe(timestamp);

        if self.data.len() >= self.max_capacity {
            self.data.pop_front();
        }
        self.data.push_back((timestamp, item));
        timestamp
    }

    /// Evict entries older than `current_time - duration_ms`; returns how many.
    pub fn prune(&mut self, current_time: TimestampMs) -> usize {
        let now = self.clock.observe(current_time);
        let cutoff = now.saturating_sub(self.duration_ms);
        let mut evicted = 0;

        while let Some((ts, _)) = self.data.front() {
            if *ts < cutoff {
                self.data.pop_front();
                evicted += 1;
            } else {
                break;
            }
        }
        evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &(TimestampMs, T)> {
        self.data.iter()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn first(&self) -> Option<&(TimestampMs, T)> {
        self.data.front()
    }

    pub fn last(&self) -> Option<&(TimestampMs, T)> {
        self.data.back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_clamps_backwards() {
        let mut clock = MonotonicClock::new();
        assert_eq!(clock.observe(100), 100);
        assert_eq!(clock.observe(90), 100);
        assert_eq!(clock.observe(150), 150);
        assert_eq!(clock.latest(), Some(150));
    }

    #[test]
    fn test_prune_keeps_boundary() {
        let mut window: TimeWindow<i32> = TimeWindow::new(100, 100);

        window.add(0, 1);
        window.add(50, 2);
        window.add(100, 3);
        window.add(150, 4);
        window.add(200, 5);

        // cutoff 100: entries at exactly now - duration stay
        assert_eq!(window.prune(200), 2);
        assert_eq!(window.len(), 3);
        assert_eq!(window.first().map(|(ts, _)| *ts), Some(100));
    }

    #[test]
    fn test_backwards_add_is_clamped() {
        let mut window: TimeWindow<i32> = TimeWindow::new(1000, 100);
        window.add(500, 1);
        let stored = window.add(400, 2);
        assert_eq!(stored, 500);
        assert_eq!(window.last().map(|(ts, v)| (*ts, *v)), Some((500, 2)));
    }

    #[test]
    fn test_backwards_prune_does_not_evict_more() {
        let mut window: TimeWindow<i32> = TimeWindow::new(100, 100);
        window.add(1000, 1);
        window.prune(1050);
        // An older "now" is treated as 1050
        assert_eq!(window.prune(10), 0);
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_capacity() {
        let mut window: TimeWindow<i32> = TimeWindow::new(10_000, 3);

        window.add(100, 1);
        window.add(200, 2);
        window.add(300, 3);
        window.add(400, 4);

        assert_eq!(window.len(), 3);
        assert_eq!(window.first().map(|(ts, _)| *ts), Some(200));

        let sum: i32 = window.iter().map(|(_, v)| v).sum();
        assert_eq!(sum, 9);

        window.clear();
        assert!(window.is_empty());
    }
}

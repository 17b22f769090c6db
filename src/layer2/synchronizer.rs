// Depth Synchronizer - snapshot + diff stream alignment
// Binance spot rules: drop u <= lastUpdateId, first diff straddles lastUpdateId + 1, then U == prev u + 1

use std::fmt;
use tracing::{debug, info, warn};

use crate::layer2::parser::ParsedDepthUpdate;

/// Stream synchronization state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    NotStarted,
    AwaitingFirstDiff, // Snapshot loaded, looking for the diff that straddles it
    Synchronized,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// What the caller should do with a diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// In sequence (or within the tolerated gap budget): apply to the book.
    Apply(ParsedDepthUpdate),
    /// Already covered by the snapshot or a previous diff.
    Stale,
    /// Continuity lost: fetch a new snapshot.
    ResyncRequired,
    /// No snapshot yet.
    NotReady,
}

/// Synchronizer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SynchronizerStats {
    pub total_messages: u64,
    pub messages_applied: u64,
    pub messages_stale: u64,
    pub messages_not_ready: u64,
    pub gap_count: u64,
    pub resyncs: u64,
}

impl fmt::Display for SynchronizerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SynchronizerStats(total={}, applied={}, stale={}, gaps={}, resyncs={})",
            self.total_messages, self.messages_applied, self.messages_stale, self.gap_count, self.resyncs
        )
    }
}

pub struct DepthSynchronizer {
    symbol: String,
    state: SyncState,
    snapshot_last_id: Option<u64>,
    last_update_id: Option<u64>,

    max_sequence_gaps: u32,
    consecutive_gaps: u32,

    stats: SynchronizerStats,
}

impl DepthSynchronizer {
    pub fn new(symbol: &str, max_sequence_gaps: u32) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            state: SyncState::NotStarted,
            snapshot_last_id: None,
            last_update_id: None,
            max_sequence_gaps: max_sequence_gaps.max(1),
            consecutive_gaps: 0,
            stats: SynchronizerStats::default(),
        }
    }

    /// A snapshot with `lastUpdateId` was just delivered to the book.
    pub fn initialize(&mut self, snapshot_last_id: u64) {
        info!(symbol = %self.symbol, snapshot_last_id = snapshot_last_id, "Depth synchronizer initialized");
        self.state = SyncState::AwaitingFirstDiff;
        self.snapshot_last_id = Some(snapshot_last_id);
        self.last_update_id = None;
        self.consecutive_gaps = 0;
    }

    /// Forget the snapshot; diffs report NotReady until the next `initialize`.
    pub fn reset(&mut self) {
        self.state = SyncState::NotStarted;
        self.snapshot_last_id = None;
        self.last_update_id = None;
        self.consecutive_gaps = 0;
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn is_synchronized(&self) -> bool {
        self.state == SyncState::Synchronized
    }

    pub fn last_update_id(&self) -> Option<u64> {
        self.last_update_id
    }

    pub fn stats(&self) -> &SynchronizerStats {
        &self.stats
    }

    /// Classify one depth diff.
    pub fn process(&mut self, update: ParsedDepthUpdate) -> SyncOutcome {
        self.stats.total_messages += 1;

        let first_id = update.first_update_id; // U
        let final_id = update.final_update_id; // u

        match self.state {
            SyncState::NotStarted => {
                self.stats.messages_not_ready += 1;
                SyncOutcome::NotReady
            }

            SyncState::AwaitingFirstDiff => {
                let snapshot_id = self.snapshot_last_id.unwrap_or(0);
                if final_id <= snapshot_id {
                    self.stats.messages_stale += 1;
                    return SyncOutcome::Stale;
                }
                if first_id <= snapshot_id + 1 {
                    debug!(first_id = first_id, final_id = final_id, "First diff after snapshot");
                    self.state = SyncState::Synchronized;
                    return self.accept(update);
                }

                // The diff stream is already past the snapshot
                warn!(
                    snapshot_id = snapshot_id,
                    first_id = first_id,
                    "Snapshot older than diff stream, resync required"
                );
                self.require_resync()
            }

            SyncState::Synchronized => {
                let last = self.last_update_id.unwrap_or(0);
                if final_id <= last {
                    self.stats.messages_stale += 1;
                    return SyncOutcome::Stale;
                }
                if first_id == last + 1 {
                    self.consecutive_gaps = 0;
                    return self.accept(update);
                }

                self.stats.gap_count += 1;
                self.consecutive_gaps += 1;
                warn!(
                    expected = last + 1,
                    first_id = first_id,
                    consecutive = self.consecutive_gaps,
                    "Depth sequence gap"
                );
                if self.consecutive_gaps >= self.max_sequence_gaps {
                    return self.require_resync();
                }
                self.accept(update)
            }
        }
    }

    fn accept(&mut self, update: ParsedDepthUpdate) -> SyncOutcome {
        self.last_update_id = Some(update.final_update_id);
        self.stats.messages_applied += 1;
        SyncOutcome::Apply(update)
    }

    fn require_resync(&mut self) -> SyncOutcome {
        self.stats.resyncs += 1;
        self.reset();
        SyncOutcome::ResyncRequired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff(first: u64, last: u64) -> ParsedDepthUpdate {
        ParsedDepthUpdate {
            symbol: "ETHUSDT".to_string(),
            first_update_id: first,
            final_update_id: last,
            event_time: 0,
            bids: vec![],
            asks: vec![],
        }
    }

    #[test]
    fn test_not_ready_before_snapshot() {
        let mut sync = DepthSynchronizer::new("ethusdt", 3);
        assert_eq!(sync.process(diff(1, 5)), SyncOutcome::NotReady);
        assert!(!sync.is_synchronized());
    }

    #[test]
    fn test_synchronization_flow() {
        let mut sync = DepthSynchronizer::new("ETHUSDT", 3);
        sync.initialize(100);

        // u <= lastUpdateId is covered by the snapshot
        assert_eq!(sync.process(diff(95, 100)), SyncOutcome::Stale);
        // First diff straddles 101
        assert!(matches!(sync.process(diff(98, 105)), SyncOutcome::Apply(_)));
        assert!(sync.is_synchronized());
        assert!(matches!(sync.process(diff(106, 110)), SyncOutcome::Apply(_)));
        assert_eq!(sync.last_update_id(), Some(110));
        assert_eq!(sync.stats().messages_applied, 2);
    }

    #[test]
    fn test_snapshot_behind_stream_requires_resync() {
        let mut sync = DepthSynchronizer::new("ETHUSDT", 3);
        sync.initialize(100);
        assert_eq!(sync.process(diff(150, 160)), SyncOutcome::ResyncRequired);
        assert_eq!(sync.state(), SyncState::NotStarted);
        assert_eq!(sync.stats().resyncs, 1);
    }

    #[test]
    fn test_gap_applied_until_budget_exhausted() {
        let mut sync = DepthSynchronizer::new("ETHUSDT", 2);
        sync.initialize(100);
        sync.process(diff(101, 105));

        // One gap is tolerated and applied
        assert!(matches!(sync.process(diff(110, 112)), SyncOutcome::Apply(_)));
        assert_eq!(sync.stats().gap_count, 1);

        // In-sequence diff clears the streak
        assert!(matches!(sync.process(diff(113, 115)), SyncOutcome::Apply(_)));

        sync.process(diff(120, 121));
        assert_eq!(sync.process(diff(130, 131)), SyncOutcome::ResyncRequired);
        assert_eq!(sync.stats().gap_count, 3);
    }

    #[test]
    fn test_reinitialize_after_resync() {
        let mut sync = DepthSynchronizer::new("ETHUSDT", 1);
        sync.initialize(100);
        sync.process(diff(101, 102));
        assert_eq!(sync.process(diff(200, 201)), SyncOutcome::ResyncRequired);
        assert_eq!(sync.process(diff(202, 203)), SyncOutcome::NotReady);

        sync.initialize(202);
        assert!(matches!(sync.process(diff(202, 204)), SyncOutcome::Apply(_)));
    }
}

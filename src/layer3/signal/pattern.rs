// Pattern Machine - one direction of the sweep -> flip -> absorption -> reclaim sequence
// Each confirmation must land within the pattern window of the previous one

use crate::core::types::{
    AbsorptionEvent, BookSide, DeltaFlipEvent, DeltaSign, SignalType, SweepDirection, SweepEvent,
    TimestampMs,
};
use rust_decimal::Decimal;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternStage {
    WaitingSweep,
    WaitingDeltaFlip {
        sweep: SweepEvent,
    },
    WaitingAbsorption {
        sweep: SweepEvent,
        flip: DeltaFlipEvent,
    },
    WaitingReclaim {
        sweep: SweepEvent,
        flip: DeltaFlipEvent,
        absorption: AbsorptionEvent,
    },
    Cooldown {
        emitted_at: TimestampMs,
    },
}

impl PatternStage {
    pub fn name(&self) -> &'static str {
        match self {
            PatternStage::WaitingSweep => "waiting_sweep",
            PatternStage::WaitingDeltaFlip { .. } => "waiting_delta_flip",
            PatternStage::WaitingAbsorption { .. } => "waiting_absorption",
            PatternStage::WaitingReclaim { .. } => "waiting_reclaim",
            PatternStage::Cooldown { .. } => "cooldown",
        }
    }
}

impl fmt::Display for PatternStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// All four confirmations of a finished pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedPattern {
    pub sweep: SweepEvent,
    pub flip: DeltaFlipEvent,
    pub absorption: AbsorptionEvent,
    pub reclaim_level: Decimal,
    pub reclaim_price: Decimal,
}

pub struct PatternMachine {
    direction: SignalType,
    pattern_window_ms: i64,
    cooldown_ms: i64,
    stage: PatternStage,
    timeouts: u64,
}

impl PatternMachine {
    pub fn new(direction: SignalType, pattern_window_ms: i64, cooldown_ms: i64) -> Self {
        Self {
            direction,
            pattern_window_ms,
            cooldown_ms,
            stage: PatternStage::WaitingSweep,
            timeouts: 0,
        }
    }

    pub fn direction(&self) -> SignalType {
        self.direction
    }

    pub fn stage(&self) -> &PatternStage {
        &self.stage
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts
    }

    fn wanted_sweep(&self) -> SweepDirection {
        match self.direction {
            SignalType::Buy => SweepDirection::Down,
            SignalType::Sell => SweepDirection::Up,
        }
    }

    fn wanted_flip(&self) -> DeltaSign {
        match self.direction {
            SignalType::Buy => DeltaSign::Positive,
            SignalType::Sell => DeltaSign::Negative,
        }
    }

    fn wanted_absorption(&self) -> BookSide {
        match self.direction {
            SignalType::Buy => BookSide::Bid,
            SignalType::Sell => BookSide::Ask,
        }
    }

    fn transition(&mut self, next: PatternStage) {
        debug!(
            direction = %self.direction,
            from = self.stage.name(),
            to = next.name(),
            "Pattern stage"
        );
        self.stage = next;
    }

    /// Expire a stale stage or a finished cooldown as of `now`.
    pub fn advance_clock(&mut self, now: TimestampMs) {
        if let PatternStage::Cooldown { emitted_at } = self.stage {
            if now - emitted_at >= self.cooldown_ms {
                self.transition(PatternStage::WaitingSweep);
            }
            return;
        }

        let last_confirmation = match &self.stage {
            PatternStage::WaitingDeltaFlip { sweep } => sweep.timestamp,
            PatternStage::WaitingAbsorption { flip, .. } => flip.timestamp,
            PatternStage::WaitingReclaim { absorption, .. } => absorption.timestamp,
            PatternStage::WaitingSweep | PatternStage::Cooldown { .. } => return,
        };
        let expired = now - last_confirmation > self.pattern_window_ms;

        if expired {
            debug!(
                direction = %self.direction,
                stage = self.stage.name(),
                now = now,
                "Pattern stage timed out"
            );
            self.timeouts += 1;
            self.stage = PatternStage::WaitingSweep;
        }
    }

    /// A sweep in the wanted direction starts a pattern, or refreshes one
    /// still waiting for its flip.
    pub fn on_sweep(&mut self, sweep: &SweepEvent) -> bool {
        if sweep.direction != self.wanted_sweep() {
            return false;
        }
        match self.stage {
            PatternStage::WaitingSweep | PatternStage::WaitingDeltaFlip { .. } => {
                self.transition(PatternStage::WaitingDeltaFlip { sweep: *sweep });
                true
            }
            _ => false,
        }
    }

    pub fn on_delta_flip(&mut self, flip: &DeltaFlipEvent) -> bool {
        if flip.to != self.wanted_flip() {
            return false;
        }
        if let PatternStage::WaitingDeltaFlip { sweep } = self.stage {
            self.transition(PatternStage::WaitingAbsorption { sweep, flip: *flip });
            return true;
        }
        false
    }

    pub fn on_absorption(&mut self, absorption: &AbsorptionEvent) -> bool {
        if absorption.side != self.wanted_absorption() {
            return false;
        }
        if let PatternStage::WaitingAbsorption { sweep, flip } = self.stage {
            self.transition(PatternStage::WaitingReclaim {
                sweep,
                flip,
                absorption: *absorption,
            });
            return true;
        }
        false
    }

    /// Has price recrossed the swept level? Does not change state.
    pub fn check_reclaim(&self, price: Decimal) -> Option<CompletedPattern> {
        let PatternStage::WaitingReclaim {
            sweep,
            flip,
            absorption,
        } = self.stage
        else {
            return None;
        };

        let level = sweep.reclaim_level();
        let reclaimed = match self.direction {
            SignalType::Buy => price >= level,
            SignalType::Sell => price <= level,
        };

        reclaimed.then_some(CompletedPattern {
            sweep,
            flip,
            absorption,
            reclaim_level: level,
            reclaim_price: price,
        })
    }

    pub fn mark_emitted(&mut self, now: TimestampMs) {
        self.transition(PatternStage::Cooldown { emitted_at: now });
    }

    pub fn reset(&mut self) {
        self.stage = PatternStage::WaitingSweep;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sweep(direction: SweepDirection, ts: i64) -> SweepEvent {
        SweepEvent {
            direction,
            levels_removed: 3,
            duration_ms: 100,
            swept_low: dec!(99.8),
            swept_high: dec!(100.0),
            timestamp: ts,
        }
    }

    fn flip(to: DeltaSign, ts: i64) -> DeltaFlipEvent {
        let from = match to {
            DeltaSign::Positive => DeltaSign::Negative,
            DeltaSign::Negative => DeltaSign::Positive,
        };
        DeltaFlipEvent {
            from,
            to,
            magnitude: dec!(80),
            timestamp: ts,
        }
    }

    fn absorption(side: BookSide, ts: i64) -> AbsorptionEvent {
        AbsorptionEvent {
            side,
            volume: dec!(105),
            price: dec!(99.7),
            timestamp: ts,
        }
    }

    #[test]
    fn test_buy_sequence_completes() {
        let mut machine = PatternMachine::new(SignalType::Buy, 10_000, 30_000);

        assert!(machine.on_sweep(&sweep(SweepDirection::Down, 0)));
        assert!(machine.on_delta_flip(&flip(DeltaSign::Positive, 1_000)));
        assert!(machine.on_absorption(&absorption(BookSide::Bid, 2_000)));
        assert_eq!(machine.stage().name(), "waiting_reclaim");

        assert!(machine.check_reclaim(dec!(99.7)).is_none());
        let done = machine.check_reclaim(dec!(99.8)).expect("reclaim at level");
        assert_eq!(done.reclaim_level, dec!(99.8));
    }

    #[test]
    fn test_wrong_direction_events_ignored() {
        let mut machine = PatternMachine::new(SignalType::Buy, 10_000, 30_000);

        assert!(!machine.on_sweep(&sweep(SweepDirection::Up, 0)));
        assert_eq!(machine.stage(), &PatternStage::WaitingSweep);

        machine.on_sweep(&sweep(SweepDirection::Down, 0));
        assert!(!machine.on_delta_flip(&flip(DeltaSign::Negative, 10)));
        assert!(!machine.on_absorption(&absorption(BookSide::Bid, 20)));
        assert_eq!(machine.stage().name(), "waiting_delta_flip");
    }

    #[test]
    fn test_out_of_order_confirmations_ignored() {
        let mut machine = PatternMachine::new(SignalType::Sell, 10_000, 30_000);

        // Flip and absorption before any sweep mean nothing
        assert!(!machine.on_delta_flip(&flip(DeltaSign::Negative, 0)));
        assert!(!machine.on_absorption(&absorption(BookSide::Ask, 10)));
        assert_eq!(machine.stage(), &PatternStage::WaitingSweep);
    }

    #[test]
    fn test_stage_timeout() {
        let mut machine = PatternMachine::new(SignalType::Buy, 10_000, 30_000);

        machine.on_sweep(&sweep(SweepDirection::Down, 0));
        machine.advance_clock(10_000);
        assert_eq!(machine.stage().name(), "waiting_delta_flip");
        machine.advance_clock(10_001);
        assert_eq!(machine.stage(), &PatternStage::WaitingSweep);
        assert_eq!(machine.timeouts(), 1);
    }

    #[test]
    fn test_newer_sweep_replaces_pending_one() {
        let mut machine = PatternMachine::new(SignalType::Buy, 10_000, 30_000);

        machine.on_sweep(&sweep(SweepDirection::Down, 0));
        machine.on_sweep(&sweep(SweepDirection::Down, 8_000));
        machine.advance_clock(15_000);
        match machine.stage() {
            PatternStage::WaitingDeltaFlip { sweep } => assert_eq!(sweep.timestamp, 8_000),
            other => panic!("unexpected stage {}", other),
        }
    }

    #[test]
    fn test_cooldown_blocks_then_releases() {
        let mut machine = PatternMachine::new(SignalType::Sell, 10_000, 30_000);

        machine.mark_emitted(1_000);
        machine.advance_clock(20_000);
        assert!(!machine.on_sweep(&sweep(SweepDirection::Up, 20_000)));

        machine.advance_clock(31_000);
        assert_eq!(machine.stage(), &PatternStage::WaitingSweep);
        assert!(machine.on_sweep(&sweep(SweepDirection::Up, 31_000)));
    }

    #[test]
    fn test_sell_reclaims_below_highest_ask() {
        let mut machine = PatternMachine::new(SignalType::Sell, 10_000, 30_000);

        machine.on_sweep(&sweep(SweepDirection::Up, 0));
        machine.on_delta_flip(&flip(DeltaSign::Negative, 10));
        machine.on_absorption(&absorption(BookSide::Ask, 20));

        assert!(machine.check_reclaim(dec!(100.1)).is_none());
        assert!(machine.check_reclaim(dec!(100.0)).is_some());
    }
}

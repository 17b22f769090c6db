// Signal Engine - combines detector events into Buy/Sell signals
// Two independent pattern machines, confidence scoring, cooldown and regime filter

use crate::core::config::{OrderFlowConfig, SignalConfig};
use crate::core::types::{
    AbsorptionEvent, DeltaFlipEvent, Signal, SignalType, SweepEvent, TimestampMs, VolatilityState,
};
use crate::layer3::signal::pattern::{CompletedPattern, PatternMachine, PatternStage};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

// Confirmation weights, summing to 1
const SWEEP_WEIGHT: f64 = 0.30;
const FLIP_WEIGHT: f64 = 0.40;
const ABSORPTION_WEIGHT: f64 = 0.20;
const RECLAIM_WEIGHT: f64 = 0.10;

pub const FILTER_EXTREME_VOLATILITY: &str = "extreme_volatility";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalStats {
    pub total_signals: u64,
    pub buy_signals: u64,
    pub sell_signals: u64,
    pub confidence_sum: f64,
    pub filtered_signals: u64,
    pub filter_reasons: BTreeMap<String, u64>,
    pub buy_timeouts: u64,
    pub sell_timeouts: u64,
}

impl SignalStats {
    pub fn avg_confidence(&self) -> f64 {
        if self.total_signals == 0 {
            0.0
        } else {
            self.confidence_sum / self.total_signals as f64
        }
    }
}

impl fmt::Display for SignalStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SignalStats(total={}, buy={}, sell={}, avg_confidence={:.1}%, filtered={})",
            self.total_signals,
            self.buy_signals,
            self.sell_signals,
            self.avg_confidence() * 100.0,
            self.filtered_signals
        )
    }
}

pub struct SignalEngine {
    buy: PatternMachine,
    sell: PatternMachine,

    // Strength references
    sweep_min_levels: usize,
    min_delta_flip: Decimal,
    absorption_threshold: Decimal,

    min_confidence: f64,
    regime_filter_enabled: bool,

    stats: SignalStats,
}

impl SignalEngine {
    pub fn new(config: &OrderFlowConfig, signal: &SignalConfig) -> Self {
        Self {
            buy: PatternMachine::new(SignalType::Buy, config.pattern_window_ms, config.cooldown_ms()),
            sell: PatternMachine::new(
                SignalType::Sell,
                config.pattern_window_ms,
                config.cooldown_ms(),
            ),
            sweep_min_levels: config.sweep_min_levels.max(1),
            min_delta_flip: config.min_delta_flip,
            absorption_threshold: config.absorption_threshold,
            min_confidence: signal.min_confidence.clamp(0.0, 1.0),
            regime_filter_enabled: signal.regime_filter_enabled,
            stats: SignalStats::default(),
        }
    }

    /// Expire stale stages and finished cooldowns on both machines.
    pub fn advance_clock(&mut self, now: TimestampMs) {
        self.buy.advance_clock(now);
        self.sell.advance_clock(now);
        self.stats.buy_timeouts = self.buy.timeouts();
        self.stats.sell_timeouts = self.sell.timeouts();
    }

    pub fn on_sweep(&mut self, sweep: &SweepEvent) {
        self.advance_clock(sweep.timestamp);
        self.buy.on_sweep(sweep);
        self.sell.on_sweep(sweep);
    }

    pub fn on_delta_flip(&mut self, flip: &DeltaFlipEvent) {
        self.advance_clock(flip.timestamp);
        self.buy.on_delta_flip(flip);
        self.sell.on_delta_flip(flip);
    }

    pub fn on_absorption(&mut self, absorption: &AbsorptionEvent) {
        self.advance_clock(absorption.timestamp);
        self.buy.on_absorption(absorption);
        self.sell.on_absorption(absorption);
    }

    /// Check both machines for a reclaim at `price`. `delta` is the current
    /// window delta carried on an emitted signal.
    pub fn on_price(
        &mut self,
        price: Decimal,
        delta: Decimal,
        volatility: Option<VolatilityState>,
        now: TimestampMs,
    ) -> Vec<Signal> {
        self.advance_clock(now);

        let mut signals = Vec::new();
        for direction in [SignalType::Buy, SignalType::Sell] {
            let completed = self.machine(direction).check_reclaim(price);
            let Some(completed) = completed else {
                continue;
            };

            if self.regime_filter_enabled && volatility == Some(VolatilityState::Extreme) {
                self.record_filtered(direction, FILTER_EXTREME_VOLATILITY);
                self.machine_mut(direction).reset();
                continue;
            }

            let signal = self.build_signal(direction, &completed, delta, now);
            self.machine_mut(direction).mark_emitted(now);
            self.record_emitted(&signal);
            signals.push(signal);
        }
        signals
    }

    fn build_signal(
        &self,
        direction: SignalType,
        completed: &CompletedPattern,
        delta: Decimal,
        now: TimestampMs,
    ) -> Signal {
        let reclaim_side = match direction {
            SignalType::Buy => "above",
            SignalType::Sell => "below",
        };
        let flip_arrow = match direction {
            SignalType::Buy => "up",
            SignalType::Sell => "down",
        };

        let reasons = vec![
            format!(
                "sweep {} ({} levels in {}ms)",
                completed.sweep.direction, completed.sweep.levels_removed, completed.sweep.duration_ms
            ),
            format!("delta flip {} ({})", flip_arrow, completed.flip.magnitude.normalize()),
            format!(
                "absorption on {} ({})",
                completed.absorption.side,
                completed.absorption.volume.normalize()
            ),
            format!("price reclaim {} {}", reclaim_side, completed.reclaim_level.normalize()),
        ];

        Signal {
            signal_type: direction,
            price: completed.reclaim_price,
            confidence: self.score(completed),
            reasons,
            delta,
            timestamp: now,
        }
    }

    /// Weighted sum of per-confirmation scores, each in [min_confidence, 1].
    pub fn score(&self, completed: &CompletedPattern) -> f64 {
        let sweep_strength =
            completed.sweep.levels_removed as f64 / (2 * self.sweep_min_levels) as f64;
        let flip_strength = ratio(completed.flip.magnitude, self.min_delta_flip * Decimal::from(3));
        let absorption_strength = ratio(
            completed.absorption.volume,
            self.absorption_threshold * Decimal::TWO,
        );
        let reclaim_strength = 1.0;

        let floor = self.min_confidence;
        let component = |strength: f64| floor + (1.0 - floor) * strength.clamp(0.0, 1.0);

        let confidence = SWEEP_WEIGHT * component(sweep_strength)
            + FLIP_WEIGHT * component(flip_strength)
            + ABSORPTION_WEIGHT * component(absorption_strength)
            + RECLAIM_WEIGHT * component(reclaim_strength);

        confidence.clamp(floor, 1.0)
    }

    fn record_emitted(&mut self, signal: &Signal) {
        self.stats.total_signals += 1;
        match signal.signal_type {
            SignalType::Buy => self.stats.buy_signals += 1,
            SignalType::Sell => self.stats.sell_signals += 1,
        }
        self.stats.confidence_sum += signal.confidence;

        info!(
            signal_type = %signal.signal_type,
            price = %signal.price,
            confidence = signal.confidence,
            delta = %signal.delta,
            "Signal generated"
        );
    }

    fn record_filtered(&mut self, direction: SignalType, reason: &str) {
        self.stats.filtered_signals += 1;
        *self.stats.filter_reasons.entry(reason.to_string()).or_insert(0) += 1;
        debug!(direction = %direction, reason = reason, "Signal filtered");
    }

    fn machine(&self, direction: SignalType) -> &PatternMachine {
        match direction {
            SignalType::Buy => &self.buy,
            SignalType::Sell => &self.sell,
        }
    }

    fn machine_mut(&mut self, direction: SignalType) -> &mut PatternMachine {
        match direction {
            SignalType::Buy => &mut self.buy,
            SignalType::Sell => &mut self.sell,
        }
    }

    pub fn stage(&self, direction: SignalType) -> &PatternStage {
        self.machine(direction).stage()
    }

    pub fn stats(&self) -> &SignalStats {
        &self.stats
    }
}

/// value / reference as f64; a non-positive reference counts as full strength.
fn ratio(value: Decimal, reference: Decimal) -> f64 {
    if reference <= Decimal::ZERO {
        return 1.0;
    }
    value
        .checked_div(reference)
        .and_then(|r| r.to_f64())
        .unwrap_or(1.0)
}

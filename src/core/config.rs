// Configuration Management for the Order-Flow Hunt System
// JSON file -> environment -> CLI overrides, validated before use

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

// ============================================================================
// Configuration Structures
// ============================================================================

/// Detection parameters of the analysis core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderFlowConfig {
    /// Rolling window for cumulative delta.
    pub delta_window_seconds: u64,
    /// Volume that must trade at a held price to count as absorption.
    pub absorption_threshold: Decimal,
    /// Relative excursion from the anchor that resets absorption (0.0001 = 0.01%).
    pub price_movement_threshold: Decimal,
    /// Distinct levels one side must lose for a sweep.
    pub sweep_min_levels: usize,
    /// Time span the removals must fall within.
    pub sweep_time_ms: i64,
    /// Minimum gap between two signals of the same direction.
    pub cooldown_seconds: u64,
    /// Minimum |delta change| across a sign flip.
    pub min_delta_flip: Decimal,
    /// Depth cap per side.
    pub max_orderbook_levels: usize,
    /// Max gap between consecutive confirmations of one pattern.
    pub pattern_window_ms: i64,
}

impl Default for OrderFlowConfig {
    fn default() -> Self {
        Self {
            delta_window_seconds: 5,
            absorption_threshold: dec!(100),
            price_movement_threshold: dec!(0.0001),
            sweep_min_levels: 3,
            sweep_time_ms: 200,
            cooldown_seconds: 30,
            min_delta_flip: dec!(50),
            max_orderbook_levels: 50,
            pattern_window_ms: 10_000,
        }
    }
}

/// Upper bound for second-based windows (one day).
pub const MAX_WINDOW_SECONDS: u64 = 86_400;

fn seconds_to_ms(seconds: u64) -> i64 {
    i64::try_from(seconds).unwrap_or(i64::MAX).saturating_mul(1000)
}

impl OrderFlowConfig {
    pub fn delta_window_ms(&self) -> i64 {
        seconds_to_ms(self.delta_window_seconds)
    }

    pub fn cooldown_ms(&self) -> i64 {
        seconds_to_ms(self.cooldown_seconds)
    }

    /// Collects every violated constraint; empty means valid.
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.delta_window_seconds == 0 || self.delta_window_seconds > MAX_WINDOW_SECONDS {
            errors.push(format!("delta_window_seconds must be in 1..={}", MAX_WINDOW_SECONDS));
        }
        if self.cooldown_seconds > MAX_WINDOW_SECONDS {
            errors.push(format!("cooldown_seconds must be <= {}", MAX_WINDOW_SECONDS));
        }
        if self.absorption_threshold <= Decimal::ZERO {
            errors.push("absorption_threshold must be > 0".to_string());
        }
        if self.price_movement_threshold < Decimal::ZERO {
            errors.push("price_movement_threshold must be >= 0".to_string());
        }
        if self.sweep_min_levels == 0 {
            errors.push("sweep_min_levels must be >= 1".to_string());
        }
        if self.sweep_time_ms <= 0 {
            errors.push("sweep_time_ms must be > 0".to_string());
        }
        if self.min_delta_flip < Decimal::ZERO {
            errors.push("min_delta_flip must be >= 0".to_string());
        }
        if self.max_orderbook_levels == 0 {
            errors.push("max_orderbook_levels must be >= 1".to_string());
        }
        if self.pattern_window_ms <= 0 {
            errors.push("pattern_window_ms must be > 0".to_string());
        }

        errors
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let errors = self.validation_errors();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors.join("; ")))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Confidence floor of a fully confirmed pattern.
    pub min_confidence: f64,
    /// Suppress completed patterns while volatility is Extreme.
    pub regime_filter_enabled: bool,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.70,
            regime_filter_enabled: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub symbol: String,
    pub ws_url: String,
    pub rest_base_url: String,
    pub snapshot_limit: u32,

    // Connection settings
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_seconds: u64,
    pub ping_interval_secs: u64,
    pub health_check_interval_secs: u64,
    pub stale_timeout_secs: u64,
    pub request_timeout_seconds: u64,

    // Synchronizer settings
    pub max_sequence_gaps: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            symbol: "ETHUSDT".to_string(),
            ws_url: "wss://stream.binance.com:9443/ws".to_string(),
            rest_base_url: "https://api.binance.com".to_string(),
            snapshot_limit: 1000,
            max_reconnect_attempts: 10,
            reconnect_delay_seconds: 5,
            ping_interval_secs: 20,
            health_check_interval_secs: 30,
            stale_timeout_secs: 60,
            request_timeout_seconds: 10,
            max_sequence_gaps: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// Everything including price updates.
    Normal,
    /// Signals, status, sweeps and absorption.
    Quiet,
    /// Signals and status only.
    Silent,
}

impl std::str::FromStr for DisplayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "normal" => Ok(DisplayMode::Normal),
            "quiet" => Ok(DisplayMode::Quiet),
            "silent" => Ok(DisplayMode::Silent),
            _ => Err(format!(
                "Invalid DisplayMode: '{}'. Expected 'normal', 'quiet' or 'silent'",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub json_logs: bool,
    pub display_mode: DisplayMode,
    pub status_interval_updates: u64,
    pub price_update_interval_trades: u64,
    pub queue_warn_depth: usize,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
            json_logs: false,
            display_mode: DisplayMode::Normal,
            status_interval_updates: 100,
            price_update_interval_trades: 50,
            queue_warn_depth: 10_000,
        }
    }
}

/// All sections, as handed to the runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub orderflow: OrderFlowConfig,
    pub signal: SignalConfig,
    pub feed: FeedConfig,
    pub monitoring: MonitoringConfig,
}

// ============================================================================
// Configuration Summary
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ConfigSummary {
    pub symbol: String,
    pub delta_window_seconds: u64,
    pub absorption_threshold: Decimal,
    pub sweep_min_levels: usize,
    pub sweep_time_ms: i64,
    pub cooldown_seconds: u64,
    pub min_confidence: f64,
    pub log_level: String,
}

// ============================================================================
// Configuration Manager
// ============================================================================

pub struct ConfigManager {
    config: AppConfig,
}

impl ConfigManager {
    pub fn new(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut manager = Self {
            config: AppConfig::default(),
        };

        if let Some(path) = config_path {
            manager.load_from_file(path)?;
        }

        manager.load_from_env();

        info!("Configuration initialized");
        Ok(manager)
    }

    pub fn from_config(config: AppConfig) -> Self {
        Self { config }
    }

    /// Load sections from a JSON file. A missing file keeps defaults; a
    /// malformed section is an error rather than silently ignored.
    pub fn load_from_file(&mut self, config_path: &str) -> Result<(), ConfigError> {
        let path = Path::new(config_path);
        if !path.exists() {
            warn!(path = config_path, "Config file not found, using defaults");
            return Ok(());
        }

        let content = fs::read_to_string(path)?;
        self.load_from_str(&content)?;

        info!(path = config_path, "Configuration loaded");
        Ok(())
    }

    pub fn load_from_str(&mut self, content: &str) -> Result<(), ConfigError> {
        let config_data: HashMap<String, serde_json::Value> = serde_json::from_str(content)?;

        if let Some(section) = config_data.get("orderflow") {
            self.config.orderflow = serde_json::from_value(section.clone())?;
        }
        if let Some(section) = config_data.get("signal") {
            self.config.signal = serde_json::from_value(section.clone())?;
        }
        if let Some(section) = config_data.get("feed") {
            self.config.feed = serde_json::from_value(section.clone())?;
        }
        if let Some(section) = config_data.get("monitoring") {
            self.config.monitoring = serde_json::from_value(section.clone())?;
        }

        Ok(())
    }

    pub fn load_from_env(&mut self) {
        if let Ok(symbol) = std::env::var("ORDERFLOW_SYMBOL") {
            self.set_symbol(&symbol);
        }
        if let Ok(level) = std::env::var("ORDERFLOW_LOG_LEVEL") {
            self.config.monitoring.log_level = level;
        }
        if let Ok(mode) = std::env::var("ORDERFLOW_DISPLAY_MODE") {
            match mode.parse::<DisplayMode>() {
                Ok(mode) => self.config.monitoring.display_mode = mode,
                Err(e) => warn!(error = %e, "Ignoring ORDERFLOW_DISPLAY_MODE"),
            }
        }
    }

    pub fn set_symbol(&mut self, symbol: &str) {
        self.config.feed.symbol = symbol.to_uppercase();
    }

    pub fn set_log_level(&mut self, level: &str) {
        self.config.monitoring.log_level = level.to_string();
    }

    pub fn set_display_mode(&mut self, mode: DisplayMode) {
        self.config.monitoring.display_mode = mode;
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = self.config.orderflow.validation_errors();
        let signal = &self.config.signal;
        let feed = &self.config.feed;
        let monitoring = &self.config.monitoring;

        if !(0.0..=1.0).contains(&signal.min_confidence) {
            errors.push("min_confidence must be between 0 and 1".to_string());
        }
        if feed.symbol.is_empty() {
            errors.push("symbol is required".to_string());
        }
        if feed.snapshot_limit == 0 || feed.snapshot_limit > 5000 {
            errors.push("snapshot_limit must be between 1 and 5000".to_string());
        }
        if feed.max_sequence_gaps == 0 {
            errors.push("max_sequence_gaps must be >= 1".to_string());
        }
        for (name, value) in [
            ("ping_interval_secs", feed.ping_interval_secs),
            ("health_check_interval_secs", feed.health_check_interval_secs),
            ("stale_timeout_secs", feed.stale_timeout_secs),
            ("request_timeout_seconds", feed.request_timeout_seconds),
        ] {
            if value == 0 {
                errors.push(format!("{} must be > 0", name));
            }
        }
        if monitoring.status_interval_updates == 0 {
            errors.push("status_interval_updates must be >= 1".to_string());
        }
        if monitoring.price_update_interval_trades == 0 {
            errors.push("price_update_interval_trades must be >= 1".to_string());
        }

        if !errors.is_empty() {
            for error in &errors {
                warn!(error = %error, "Config validation error");
            }
            return Err(ConfigError::Validation(errors.join("; ")));
        }

        info!("Configuration validated successfully");
        Ok(())
    }

    pub fn get_summary(&self) -> ConfigSummary {
        let orderflow = &self.config.orderflow;
        ConfigSummary {
            symbol: self.config.feed.symbol.clone(),
            delta_window_seconds: orderflow.delta_window_seconds,
            absorption_threshold: orderflow.absorption_threshold,
            sweep_min_levels: orderflow.sweep_min_levels,
            sweep_time_ms: orderflow.sweep_time_ms,
            cooldown_seconds: orderflow.cooldown_seconds,
            min_confidence: self.config.signal.min_confidence,
            log_level: self.config.monitoring.log_level.clone(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configs() {
        let orderflow = OrderFlowConfig::default();
        assert_eq!(orderflow.delta_window_seconds, 5);
        assert_eq!(orderflow.absorption_threshold, dec!(100));
        assert_eq!(orderflow.sweep_min_levels, 3);
        assert_eq!(orderflow.sweep_time_ms, 200);
        assert_eq!(orderflow.cooldown_seconds, 30);
        assert_eq!(orderflow.min_delta_flip, dec!(50));
        assert_eq!(orderflow.max_orderbook_levels, 50);
        assert_eq!(orderflow.pattern_window_ms, 10_000);
        assert_eq!(orderflow.delta_window_ms(), 5_000);
        assert_eq!(orderflow.cooldown_ms(), 30_000);

        let feed = FeedConfig::default();
        assert_eq!(feed.symbol, "ETHUSDT");
        assert_eq!(feed.max_sequence_gaps, 3);
    }

    #[test]
    fn test_default_manager_is_valid() {
        let manager = ConfigManager::from_config(AppConfig::default());
        assert!(manager.validate().is_ok());
    }

    #[test]
    fn test_validation_collects_errors() {
        let mut config = AppConfig::default();
        config.orderflow.sweep_min_levels = 0;
        config.orderflow.max_orderbook_levels = 0;
        config.signal.min_confidence = 1.5;

        let manager = ConfigManager::from_config(config);
        match manager.validate() {
            Err(ConfigError::Validation(msg)) => {
                assert!(msg.contains("sweep_min_levels"));
                assert!(msg.contains("max_orderbook_levels"));
                assert!(msg.contains("min_confidence"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_feed_intervals_rejected() {
        let mut config = AppConfig::default();
        config.feed.ping_interval_secs = 0;
        config.feed.health_check_interval_secs = 0;
        config.feed.stale_timeout_secs = 0;
        config.feed.request_timeout_seconds = 0;

        match ConfigManager::from_config(config).validate() {
            Err(ConfigError::Validation(msg)) => {
                assert!(msg.contains("ping_interval_secs"));
                assert!(msg.contains("health_check_interval_secs"));
                assert!(msg.contains("stale_timeout_secs"));
                assert!(msg.contains("request_timeout_seconds"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_windows_rejected_and_never_negative() {
        let config = OrderFlowConfig {
            delta_window_seconds: u64::MAX,
            cooldown_seconds: u64::MAX,
            ..OrderFlowConfig::default()
        };
        assert!(config.delta_window_ms() > 0);
        assert!(config.cooldown_ms() > 0);

        let errors = config.validation_errors();
        assert!(errors.iter().any(|e| e.contains("delta_window_seconds")));
        assert!(errors.iter().any(|e| e.contains("cooldown_seconds")));

        let at_limit = OrderFlowConfig {
            delta_window_seconds: MAX_WINDOW_SECONDS,
            cooldown_seconds: MAX_WINDOW_SECONDS,
            ..OrderFlowConfig::default()
        };
        assert!(at_limit.validate().is_ok());
        assert_eq!(at_limit.cooldown_ms(), 86_400_000);
    }

    #[test]
    fn test_load_partial_sections() {
        let mut manager = ConfigManager::from_config(AppConfig::default());
        manager
            .load_from_str(
                r#"{
                    "orderflow": { "absorption_threshold": 20, "sweep_min_levels": 1 },
                    "monitoring": { "display_mode": "quiet" }
                }"#,
            )
            .unwrap();

        let config = manager.config();
        assert_eq!(config.orderflow.absorption_threshold, dec!(20));
        assert_eq!(config.orderflow.sweep_min_levels, 1);
        // Unspecified fields keep defaults
        assert_eq!(config.orderflow.sweep_time_ms, 200);
        assert_eq!(config.monitoring.display_mode, DisplayMode::Quiet);
        assert_eq!(config.feed.symbol, "ETHUSDT");
    }

    #[test]
    fn test_malformed_section_is_error() {
        let mut manager = ConfigManager::from_config(AppConfig::default());
        let result = manager.load_from_str(r#"{ "orderflow": { "sweep_min_levels": "many" } }"#);
        assert!(matches!(result, Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_config_summary() {
        let mut manager = ConfigManager::from_config(AppConfig::default());
        manager.set_symbol("btcusdt");
        let summary = manager.get_summary();
        assert_eq!(summary.symbol, "BTCUSDT");
        assert_eq!(summary.sweep_min_levels, 3);
    }

    #[test]
    fn test_display_mode_from_str() {
        assert_eq!("QUIET".parse::<DisplayMode>().unwrap(), DisplayMode::Quiet);
        assert!("loud".parse::<DisplayMode>().is_err());
    }
}

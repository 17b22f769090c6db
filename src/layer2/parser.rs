// Message Parser - Binance spot WebSocket and REST payloads
// Depth diffs, trades, combined-stream envelopes and depth snapshots as exact decimals

use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

use crate::core::types::{AggressorSide, PriceLevel, TimestampMs, Trade};

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    #[error("Invalid {field}: '{value}'")]
    InvalidField { field: &'static str, value: String },
    #[error("Symbol mismatch: expected {expected}, got {got}")]
    SymbolMismatch { expected: String, got: String },
    #[error("Duplicate trade ID {trade_id} (last seen {last_seen})")]
    DuplicateTrade { trade_id: u64, last_seen: u64 },
    #[error("Unknown message: {0}")]
    UnknownMessage(String),
}

/// Parse a string field as an exact decimal
fn parse_decimal_field(value: &str, field: &'static str) -> Result<Decimal, ParseError> {
    Decimal::from_str(value).map_err(|_| ParseError::InvalidField {
        field,
        value: value.to_string(),
    })
}

/// Parse a Binance [price_string, qty_string] pair into PriceLevel
fn parse_level(raw: &[String; 2]) -> Result<PriceLevel, ParseError> {
    Ok(PriceLevel::new(
        parse_decimal_field(&raw[0], "price")?,
        parse_decimal_field(&raw[1], "quantity")?,
    ))
}

fn parse_levels(raw: &[[String; 2]]) -> Result<Vec<PriceLevel>, ParseError> {
    raw.iter().map(parse_level).collect()
}

// ============================================================================
// Parsed Message Types
// ============================================================================

/// Depth diff with the update-id range the synchronizer needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDepthUpdate {
    pub symbol: String,
    pub first_update_id: u64,
    pub final_update_id: u64,
    pub event_time: TimestampMs,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// REST depth snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDepthSnapshot {
    pub last_update_id: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedMessage {
    DepthUpdate(ParsedDepthUpdate),
    Trade { trade_id: u64, trade: Trade },
    SubscriptionAck { id: u64 },
}

impl ParsedMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ParsedMessage::DepthUpdate(_) => "depthUpdate",
            ParsedMessage::Trade { .. } => "trade",
            ParsedMessage::SubscriptionAck { .. } => "subscriptionAck",
        }
    }
}

// ============================================================================
// Raw Binance JSON shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawTrade {
    #[serde(rename = "E")]
    _event_time: i64,
    #[serde(rename = "s")]
    _symbol: String,
    #[serde(rename = "t")]
    trade_id: u64,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "T")]
    trade_time: i64,
    #[serde(rename = "m")]
    is_buyer_maker: bool,
}

#[derive(Debug, Deserialize)]
struct RawDepthUpdate {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "U")]
    first_update_id: u64,
    #[serde(rename = "u")]
    final_update_id: u64,
    #[serde(rename = "b")]
    bids: Vec<[String; 2]>,
    #[serde(rename = "a")]
    asks: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
struct RawDepthSnapshot {
    #[serde(rename = "lastUpdateId")]
    last_update_id: u64,
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

// ============================================================================
// MessageParser - Stateful parser with validation & stats
// ============================================================================

/// Parser statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParserStats {
    pub messages_parsed: u64,
    pub parse_errors: u64,
    pub validation_failures: u64,
    pub duplicate_messages: u64,
    pub trade_count: u64,
    pub depth_count: u64,
    pub ack_count: u64,
}

impl ParserStats {
    pub fn error_rate(&self) -> f64 {
        let total = self.messages_parsed + self.parse_errors;
        if total > 0 {
            self.parse_errors as f64 / total as f64
        } else {
            0.0
        }
    }
}

/// Stateful message parser with symbol validation and duplicate trade detection
pub struct MessageParser {
    symbol: String,
    stats: ParserStats,
    last_trade_id: Option<u64>,
}

impl MessageParser {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            stats: ParserStats::default(),
            last_trade_id: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn stats(&self) -> &ParserStats {
        &self.stats
    }

    /// Forget the last trade id, e.g. after a reconnect.
    pub fn reset(&mut self) {
        self.last_trade_id = None;
    }

    // ========================================================================
    // Main parse entry point
    // ========================================================================

    /// Parse any stream message (auto-detects type). Errors are counted.
    pub fn parse(&mut self, raw_json: &str) -> Result<ParsedMessage, ParseError> {
        let result = self.parse_inner(raw_json);
        match &result {
            Ok(_) => self.stats.messages_parsed += 1,
            Err(e) => {
                self.stats.parse_errors += 1;
                debug!(error = %e, "Message rejected");
            }
        }
        result
    }

    fn parse_inner(&mut self, raw_json: &str) -> Result<ParsedMessage, ParseError> {
        let value: serde_json::Value =
            serde_json::from_str(raw_json).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

        // Subscription ack: {"result": null, "id": 1}
        if value.get("result").is_some() {
            if let Some(id) = value.get("id").and_then(|v| v.as_u64()) {
                self.stats.ack_count += 1;
                return Ok(ParsedMessage::SubscriptionAck { id });
            }
        }

        // Unwrap combined stream format: {"stream": "...", "data": {...}}
        let data = if value.get("stream").is_some() && value.get("data").is_some() {
            value["data"].clone()
        } else {
            value
        };

        let event_type = data
            .get("e")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ParseError::UnknownMessage("missing event type 'e'".into()))?
            .to_string();

        if let Some(sym) = data.get("s").and_then(|v| v.as_str()) {
            if !sym.eq_ignore_ascii_case(&self.symbol) {
                self.stats.validation_failures += 1;
                return Err(ParseError::SymbolMismatch {
                    expected: self.symbol.clone(),
                    got: sym.to_string(),
                });
            }
        }

        match event_type.as_str() {
            "trade" => self.parse_trade(data),
            "depthUpdate" => self.parse_depth_update(data),
            other => Err(ParseError::UnknownMessage(other.to_string())),
        }
    }

    // ========================================================================
    // Individual parsers
    // ========================================================================

    fn parse_trade(&mut self, data: serde_json::Value) -> Result<ParsedMessage, ParseError> {
        let raw: RawTrade =
            serde_json::from_value(data).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

        let price = parse_decimal_field(&raw.price, "price")?;
        let quantity = parse_decimal_field(&raw.quantity, "quantity")?;
        if price <= Decimal::ZERO || quantity <= Decimal::ZERO {
            self.stats.validation_failures += 1;
            return Err(ParseError::InvalidField {
                field: "trade",
                value: format!("{} @ {}", raw.quantity, raw.price),
            });
        }

        if let Some(last_seen) = self.last_trade_id {
            if raw.trade_id <= last_seen {
                self.stats.duplicate_messages += 1;
                return Err(ParseError::DuplicateTrade {
                    trade_id: raw.trade_id,
                    last_seen,
                });
            }
        }
        self.last_trade_id = Some(raw.trade_id);
        self.stats.trade_count += 1;

        Ok(ParsedMessage::Trade {
            trade_id: raw.trade_id,
            trade: Trade::new(
                price,
                quantity,
                AggressorSide::from_buyer_maker(raw.is_buyer_maker),
                raw.trade_time,
            ),
        })
    }

    fn parse_depth_update(&mut self, data: serde_json::Value) -> Result<ParsedMessage, ParseError> {
        let raw: RawDepthUpdate =
            serde_json::from_value(data).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

        if raw.first_update_id > raw.final_update_id {
            self.stats.validation_failures += 1;
            return Err(ParseError::InvalidField {
                field: "update id range",
                value: format!("{}..{}", raw.first_update_id, raw.final_update_id),
            });
        }

        let bids = parse_levels(&raw.bids)?;
        let asks = parse_levels(&raw.asks)?;
        self.stats.depth_count += 1;

        Ok(ParsedMessage::DepthUpdate(ParsedDepthUpdate {
            symbol: raw.symbol,
            first_update_id: raw.first_update_id,
            final_update_id: raw.final_update_id,
            event_time: raw.event_time,
            bids,
            asks,
        }))
    }
}

// ============================================================================
// Standalone parse functions
// ============================================================================

/// Parse a REST `/api/v3/depth` body
pub fn parse_depth_snapshot(value: &serde_json::Value) -> Result<ParsedDepthSnapshot, ParseError> {
    let raw = RawDepthSnapshot::deserialize(value).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

    Ok(ParsedDepthSnapshot {
        last_update_id: raw.last_update_id,
        bids: parse_levels(&raw.bids)?,
        asks: parse_levels(&raw.asks)?,
    })
}

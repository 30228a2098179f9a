//! Binance spot combined-stream protocol.
//!
//! # Message Format
//!
//! Requests:
//! ```json
//! {"method": "SUBSCRIBE", "params": ["btcusdt@depth20@100ms", "btcusdt@ticker"], "id": 1}
//! ```
//!
//! Every payload arrives wrapped as `{"stream": "<name>", "data": {...}}`.
//!
//! - Partial depth (`<sym>@depth<N>@100ms`): `{"lastUpdateId", "bids", "asks"}`.
//!   The payload has no symbol, so it is taken from the stream name. Always a
//!   full snapshot.
//! - Diff depth (`<sym>@depth@100ms`): `{"e": "depthUpdate", "s", "U", "u", "b", "a"}`.
//!   `U` is the first update id in the event, so the event follows `U - 1`.
//! - Ticker (`<sym>@ticker`): `{"e": "24hrTicker", "s", "c", "b", "a", "v", "q", "E"}`.

use chrono::Utc;
use cryptoarb_core::{ExchangeId, FeedConfig, Symbol, Ticker, WireFormat};
use cryptoarb_exchange_ws::parse::{
    decimal_field, i64_field, levels_field, optional_decimal_field, str_field, timestamp_millis,
    u64_field,
};
use cryptoarb_exchange_ws::{BookUpdate, FeedEvent, ParseError, Ping, WireProtocol};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};

/// Combined-stream endpoint.
pub const BINANCE_WS_URL: &str = "wss://stream.binance.com:9443/stream";

/// Partial-depth levels Binance serves.
const SUPPORTED_DEPTHS: [u32; 3] = [5, 10, 20];
const DEFAULT_DEPTH: u32 = 20;

#[derive(Debug)]
pub struct BinanceProtocol {
    depth: u32,
    request_id: AtomicU64,
}

impl Default for BinanceProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl BinanceProtocol {
    #[must_use]
    pub fn new() -> Self {
        Self {
            depth: DEFAULT_DEPTH,
            request_id: AtomicU64::new(1),
        }
    }

    /// Uses the nearest supported partial depth at or above `depth`.
    #[must_use]
    pub fn with_depth(depth: u32) -> Self {
        let depth = SUPPORTED_DEPTHS
            .into_iter()
            .find(|supported| *supported >= depth)
            .unwrap_or(DEFAULT_DEPTH);
        Self {
            depth,
            request_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn from_config(config: &FeedConfig) -> Self {
        config.depth.map_or_else(Self::new, Self::with_depth)
    }

    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    fn streams(&self, symbols: &[Symbol]) -> Vec<String> {
        symbols
            .iter()
            .flat_map(|symbol| {
                let wire = symbol.to_wire(WireFormat::ConcatenatedLower);
                [
                    format!("{wire}@depth{}@100ms", self.depth),
                    format!("{wire}@ticker"),
                ]
            })
            .collect()
    }

    fn request(&self, method: &str, symbols: &[Symbol]) -> Vec<String> {
        if symbols.is_empty() {
            return Vec::new();
        }
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        vec![json!({
            "method": method,
            "params": self.streams(symbols),
            "id": id,
        })
        .to_string()]
    }

    fn parse_payload(stream: Option<&str>, data: &Value) -> Result<FeedEvent, ParseError> {
        match data.get("e").and_then(Value::as_str) {
            Some("depthUpdate") => parse_depth_update(data),
            Some("24hrTicker") => parse_ticker(data),
            Some(other) => Err(ParseError::Unrecognized(format!("event type {other}"))),
            None if data.get("lastUpdateId").is_some() => {
                let stream = stream.ok_or(ParseError::MissingField("stream"))?;
                parse_partial_depth(stream, data)
            }
            None => Err(ParseError::Unrecognized(data.to_string())),
        }
    }
}

fn parse_partial_depth(stream: &str, data: &Value) -> Result<FeedEvent, ParseError> {
    let wire = stream.split('@').next().unwrap_or_default();
    let symbol = Symbol::from_wire(wire, WireFormat::ConcatenatedLower)?;
    Ok(FeedEvent::Book(BookUpdate::snapshot(
        symbol,
        levels_field(data, "bids")?,
        levels_field(data, "asks")?,
        u64_field(data, "lastUpdateId")?,
    )))
}

fn parse_depth_update(data: &Value) -> Result<FeedEvent, ParseError> {
    let symbol = Symbol::from_wire(str_field(data, "s")?, WireFormat::Concatenated)?;
    let first = u64_field(data, "U")?;
    let last = u64_field(data, "u")?;
    Ok(FeedEvent::Book(BookUpdate::delta(
        symbol,
        levels_field(data, "b")?,
        levels_field(data, "a")?,
        last,
        Some(first.saturating_sub(1)),
    )))
}

fn parse_ticker(data: &Value) -> Result<FeedEvent, ParseError> {
    let symbol = Symbol::from_wire(str_field(data, "s")?, WireFormat::Concatenated)?;
    Ok(FeedEvent::Ticker(Ticker {
        exchange: ExchangeId::Binance,
        symbol,
        last_price: decimal_field(data, "c")?,
        best_bid: optional_decimal_field(data, "b")?,
        best_ask: optional_decimal_field(data, "a")?,
        volume_24h: decimal_field(data, "v")?,
        quote_volume_24h: optional_decimal_field(data, "q")?,
        timestamp: i64_field(data, "E")
            .map(|ms| timestamp_millis(Some(ms)))
            .unwrap_or_else(|_| Utc::now()),
    }))
}

impl WireProtocol for BinanceProtocol {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Binance
    }

    fn default_url(&self) -> &'static str {
        BINANCE_WS_URL
    }

    fn subscribe_messages(&self, symbols: &[Symbol]) -> Vec<String> {
        self.request("SUBSCRIBE", symbols)
    }

    fn unsubscribe_messages(&self, symbols: &[Symbol]) -> Vec<String> {
        self.request("UNSUBSCRIBE", symbols)
    }

    fn ping(&self) -> Ping {
        Ping::Frame
    }

    fn parse(&self, text: &str) -> Result<Vec<FeedEvent>, ParseError> {
        let value: Value = serde_json::from_str(text)?;

        if let Some(error) = value.get("error") {
            return Err(ParseError::Rejected(error.to_string()));
        }
        // Request acknowledgement: {"result": null, "id": 1}
        if value.get("id").is_some() && value.get("result").is_some() {
            tracing::debug!(id = %value["id"], "Binance request acknowledged");
            return Ok(vec![FeedEvent::Ignored]);
        }

        let event = match (value.get("stream").and_then(Value::as_str), value.get("data")) {
            (Some(stream), Some(data)) => Self::parse_payload(Some(stream), data)?,
            _ => Self::parse_payload(None, &value)?,
        };
        Ok(vec![event])
    }
}

//! Bybit v5 public spot protocol.
//!
//! # Message Format
//!
//! Requests carry at most ten topics each:
//! ```json
//! {"op": "subscribe", "args": ["orderbook.50.BTCUSDT", "tickers.BTCUSDT"]}
//! ```
//!
//! Pushes are discriminated by `topic`:
//!
//! ```json
//! {"topic": "orderbook.50.BTCUSDT", "type": "snapshot", "ts": 1700000000000,
//!  "data": {"s": "BTCUSDT", "b": [["67000.1", "0.5"]], "a": [["67000.2", "0.3"]], "u": 18521288, "seq": 7961638724}}
//!
//! {"topic": "tickers.BTCUSDT", "type": "snapshot", "ts": 1700000000000,
//!  "data": {"symbol": "BTCUSDT", "lastPrice": "67000.1", "volume24h": "1200.5", "turnover24h": "80433500.2"}}
//! ```
//!
//! Control replies echo `op` with a `success` flag. The liveness probe is the
//! text message `{"op": "ping"}`.

use cryptoarb_core::{ExchangeId, FeedConfig, Symbol, Ticker, WireFormat};
use cryptoarb_exchange_ws::parse::{
    decimal_field, i64_field, levels_field, optional_decimal_field, str_field, timestamp_millis,
    u64_field,
};
use cryptoarb_exchange_ws::{BookUpdate, FeedEvent, ParseError, Ping, WireProtocol};
use serde_json::{json, Value};

/// Public spot endpoint.
pub const BYBIT_SPOT_WS_URL: &str = "wss://stream.bybit.com/v5/public/spot";

/// Spot order-book depths Bybit serves.
const SUPPORTED_DEPTHS: [u32; 3] = [1, 50, 200];
const DEFAULT_DEPTH: u32 = 50;

/// Topic limit per spot subscribe request.
const MAX_ARGS_PER_REQUEST: usize = 10;

#[derive(Debug, Clone)]
pub struct BybitProtocol {
    depth: u32,
}

impl Default for BybitProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl BybitProtocol {
    #[must_use]
    pub fn new() -> Self {
        Self {
            depth: DEFAULT_DEPTH,
        }
    }

    /// Uses the nearest supported depth at or above `depth`.
    #[must_use]
    pub fn with_depth(depth: u32) -> Self {
        let depth = SUPPORTED_DEPTHS
            .into_iter()
            .find(|supported| *supported >= depth)
            .unwrap_or(DEFAULT_DEPTH);
        Self { depth }
    }

    #[must_use]
    pub fn from_config(config: &FeedConfig) -> Self {
        config.depth.map_or_else(Self::new, Self::with_depth)
    }

    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    fn topics(&self, symbols: &[Symbol]) -> Vec<String> {
        symbols
            .iter()
            .flat_map(|symbol| {
                let wire = symbol.to_wire(WireFormat::Concatenated);
                [
                    format!("orderbook.{}.{wire}", self.depth),
                    format!("tickers.{wire}"),
                ]
            })
            .collect()
    }

    fn requests(&self, op: &str, symbols: &[Symbol]) -> Vec<String> {
        self.topics(symbols)
            .chunks(MAX_ARGS_PER_REQUEST)
            .map(|args| json!({"op": op, "args": args}).to_string())
            .collect()
    }
}

fn parse_control(value: &Value) -> Result<FeedEvent, ParseError> {
    if value.get("success").and_then(Value::as_bool) == Some(false) {
        let reason = value
            .get("ret_msg")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(ParseError::Rejected(reason.to_string()));
    }
    if let Some(op) = value.get("op").and_then(Value::as_str) {
        tracing::debug!(op, "Bybit request acknowledged");
    }
    Ok(FeedEvent::Ignored)
}

fn parse_orderbook(value: &Value) -> Result<FeedEvent, ParseError> {
    let data = value.get("data").ok_or(ParseError::MissingField("data"))?;
    let symbol = Symbol::from_wire(str_field(data, "s")?, WireFormat::Concatenated)?;
    let bids = levels_field(data, "b")?;
    let asks = levels_field(data, "a")?;
    let sequence = u64_field(data, "u")?;

    let update = match str_field(value, "type")? {
        "snapshot" => BookUpdate::snapshot(symbol, bids, asks, sequence),
        "delta" => BookUpdate::delta(symbol, bids, asks, sequence, None),
        other => return Err(ParseError::Unrecognized(format!("orderbook type {other}"))),
    };
    Ok(FeedEvent::Book(update))
}

fn parse_ticker(value: &Value) -> Result<FeedEvent, ParseError> {
    let data = value.get("data").ok_or(ParseError::MissingField("data"))?;
    let symbol = Symbol::from_wire(str_field(data, "symbol")?, WireFormat::Concatenated)?;
    Ok(FeedEvent::Ticker(Ticker {
        exchange: ExchangeId::Bybit,
        symbol,
        last_price: decimal_field(data, "lastPrice")?,
        best_bid: optional_decimal_field(data, "bid1Price")?,
        best_ask: optional_decimal_field(data, "ask1Price")?,
        volume_24h: decimal_field(data, "volume24h")?,
        quote_volume_24h: optional_decimal_field(data, "turnover24h")?,
        timestamp: timestamp_millis(i64_field(value, "ts").ok()),
    }))
}

impl WireProtocol for BybitProtocol {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Bybit
    }

    fn default_url(&self) -> &'static str {
        BYBIT_SPOT_WS_URL
    }

    fn subscribe_messages(&self, symbols: &[Symbol]) -> Vec<String> {
        self.requests("subscribe", symbols)
    }

    fn unsubscribe_messages(&self, symbols: &[Symbol]) -> Vec<String> {
        self.requests("unsubscribe", symbols)
    }

    fn ping(&self) -> Ping {
        Ping::Text(json!({"op": "ping"}).to_string())
    }

    fn parse(&self, text: &str) -> Result<Vec<FeedEvent>, ParseError> {
        let value: Value = serde_json::from_str(text)?;

        if value.get("op").is_some() {
            return parse_control(&value).map(|event| vec![event]);
        }

        let topic = str_field(&value, "topic")?;
        let event = if topic.starts_with("orderbook.") {
            parse_orderbook(&value)?
        } else if topic.starts_with("tickers.") {
            parse_ticker(&value)?
        } else {
            return Err(ParseError::Unrecognized(format!("topic {topic}")));
        };
        Ok(vec![event])
    }
}

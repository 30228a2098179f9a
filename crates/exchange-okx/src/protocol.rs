//! OKX v5 public protocol.
//!
//! # Message Format
//!
//! ```json
//! {"op": "subscribe", "args": [{"channel": "books", "instId": "BTC-USDT"},
//!                              {"channel": "tickers", "instId": "BTC-USDT"}]}
//! ```
//!
//! Pushes carry the subscription in `arg` and a `data` array:
//!
//! ```json
//! {"arg": {"channel": "books", "instId": "BTC-USDT"}, "action": "update",
//!  "data": [{"bids": [["67000.1", "0.5", "0", "3"]], "asks": [], "ts": "1700000000000",
//!            "seqId": 124, "prevSeqId": 123}]}
//! ```
//!
//! `books` sends `action: snapshot` first and `update` after; `prevSeqId` is
//! `-1` on snapshots. `books5` has no action and every push is a full
//! snapshot. Liveness is the bare text `ping`, answered by `pong`.

use cryptoarb_core::{ExchangeId, FeedConfig, Symbol, Ticker, WireFormat};
use cryptoarb_exchange_ws::parse::{
    decimal_field, i64_field, levels_field, optional_decimal_field, str_field, timestamp_millis,
    u64_field,
};
use cryptoarb_exchange_ws::{BookUpdate, FeedEvent, ParseError, Ping, WireProtocol};
use serde_json::{json, Value};

/// Public endpoint.
pub const OKX_WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";

const PING: &str = "ping";
const PONG: &str = "pong";

/// Order-book channel variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookChannel {
    /// Full depth, snapshot then incremental updates with sequence ids.
    Books,
    /// Top five levels, every push a snapshot.
    Books5,
}

impl BookChannel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Books => "books",
            Self::Books5 => "books5",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OkxProtocol {
    channel: BookChannel,
}

impl Default for OkxProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl OkxProtocol {
    #[must_use]
    pub fn new() -> Self {
        Self {
            channel: BookChannel::Books,
        }
    }

    #[must_use]
    pub fn with_channel(channel: BookChannel) -> Self {
        Self { channel }
    }

    /// A configured depth of five or less selects `books5`.
    #[must_use]
    pub fn from_config(config: &FeedConfig) -> Self {
        match config.depth {
            Some(depth) if depth <= 5 => Self::with_channel(BookChannel::Books5),
            _ => Self::new(),
        }
    }

    #[must_use]
    pub fn channel(&self) -> BookChannel {
        self.channel
    }

    fn request(&self, op: &str, symbols: &[Symbol]) -> Vec<String> {
        if symbols.is_empty() {
            return Vec::new();
        }
        let args: Vec<Value> = symbols
            .iter()
            .flat_map(|symbol| {
                let inst_id = symbol.to_wire(WireFormat::Hyphenated);
                [
                    json!({"channel": self.channel.as_str(), "instId": inst_id}),
                    json!({"channel": "tickers", "instId": inst_id}),
                ]
            })
            .collect();
        vec![json!({"op": op, "args": args}).to_string()]
    }
}

fn parse_event(value: &Value, event: &str) -> Result<Vec<FeedEvent>, ParseError> {
    if event == "error" {
        let code = value.get("code").and_then(Value::as_str).unwrap_or_default();
        let msg = value.get("msg").and_then(Value::as_str).unwrap_or_default();
        return Err(ParseError::Rejected(format!("{code} {msg}")));
    }
    tracing::debug!(event, "OKX event acknowledged");
    Ok(vec![FeedEvent::Ignored])
}

fn parse_books(
    symbol: &Symbol,
    action: Option<&str>,
    entries: &[Value],
) -> Result<Vec<FeedEvent>, ParseError> {
    entries
        .iter()
        .map(|entry| {
            let bids = levels_field(entry, "bids")?;
            let asks = levels_field(entry, "asks")?;
            let update = match action {
                // books5 carries no action and may omit sequence ids.
                None | Some("snapshot") => BookUpdate::snapshot(
                    symbol.clone(),
                    bids,
                    asks,
                    u64_field(entry, "seqId").unwrap_or_default(),
                ),
                Some("update") => {
                    let prev = i64_field(entry, "prevSeqId")?;
                    BookUpdate::delta(
                        symbol.clone(),
                        bids,
                        asks,
                        u64_field(entry, "seqId")?,
                        u64::try_from(prev).ok(),
                    )
                }
                Some(other) => {
                    return Err(ParseError::Unrecognized(format!("books action {other}")))
                }
            };
            Ok(FeedEvent::Book(update))
        })
        .collect()
}

fn parse_tickers(symbol: &Symbol, entries: &[Value]) -> Result<Vec<FeedEvent>, ParseError> {
    entries
        .iter()
        .map(|entry| {
            Ok(FeedEvent::Ticker(Ticker {
                exchange: ExchangeId::Okx,
                symbol: symbol.clone(),
                last_price: decimal_field(entry, "last")?,
                best_bid: optional_decimal_field(entry, "bidPx")?,
                best_ask: optional_decimal_field(entry, "askPx")?,
                volume_24h: decimal_field(entry, "vol24h")?,
                quote_volume_24h: optional_decimal_field(entry, "volCcy24h")?,
                timestamp: timestamp_millis(i64_field(entry, "ts").ok()),
            }))
        })
        .collect()
}

impl WireProtocol for OkxProtocol {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Okx
    }

    fn default_url(&self) -> &'static str {
        OKX_WS_URL
    }

    fn subscribe_messages(&self, symbols: &[Symbol]) -> Vec<String> {
        self.request("subscribe", symbols)
    }

    fn unsubscribe_messages(&self, symbols: &[Symbol]) -> Vec<String> {
        self.request("unsubscribe", symbols)
    }

    fn ping(&self) -> Ping {
        Ping::Text(PING.to_string())
    }

    fn parse(&self, text: &str) -> Result<Vec<FeedEvent>, ParseError> {
        if text.trim() == PONG {
            return Ok(vec![FeedEvent::Ignored]);
        }

        let value: Value = serde_json::from_str(text)?;
        if let Some(event) = value.get("event").and_then(Value::as_str) {
            return parse_event(&value, event);
        }

        let arg = value.get("arg").ok_or(ParseError::MissingField("arg"))?;
        let channel = str_field(arg, "channel")?;
        let symbol = Symbol::from_wire(str_field(arg, "instId")?, WireFormat::Hyphenated)?;
        let entries = value
            .get("data")
            .and_then(Value::as_array)
            .ok_or(ParseError::MissingField("data"))?;

        match channel {
            "books" | "books5" | "books50-l2-tbt" | "books-l2-tbt" => {
                let action = value.get("action").and_then(Value::as_str);
                parse_books(&symbol, action, entries)
            }
            "tickers" => parse_tickers(&symbol, entries),
            other => Err(ParseError::Unrecognized(format!("channel {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryptoarb_core::PriceLevel;
    use cryptoarb_exchange_ws::BookUpdateKind;
    use rust_decimal_macros::dec;

    fn btc() -> Symbol {
        Symbol::new("BTC", "USDT")
    }

    fn book(events: &[FeedEvent]) -> &BookUpdate {
        match &events[0] {
            FeedEvent::Book(update) => update,
            other => panic!("expected book, got {other:?}"),
        }
    }

    // ==================== Request Tests ====================

    #[test]
    fn test_subscribe_message() {
        let messages = OkxProtocol::new().subscribe_messages(&[btc()]);
        let value: Value = serde_json::from_str(&messages[0]).unwrap();
        assert_eq!(value["op"], "subscribe");
        assert_eq!(
            value["args"],
            json!([
                {"channel": "books", "instId": "BTC-USDT"},
                {"channel": "tickers", "instId": "BTC-USDT"}
            ])
        );
        assert!(OkxProtocol::new().unsubscribe_messages(&[]).is_empty());
    }

    #[test]
    fn test_shallow_depth_selects_books5() {
        let config = FeedConfig {
            depth: Some(5),
            ..FeedConfig::default()
        };
        let protocol = OkxProtocol::from_config(&config);
        assert_eq!(protocol.channel(), BookChannel::Books5);
        assert!(protocol.subscribe_messages(&[btc()])[0].contains("books5"));
        assert_eq!(OkxProtocol::from_config(&FeedConfig::default()).channel(), BookChannel::Books);
    }

    #[test]
    fn test_ping_pong() {
        let protocol = OkxProtocol::new();
        assert_eq!(protocol.ping(), Ping::Text("ping".to_string()));
        assert_eq!(protocol.parse("pong").unwrap(), vec![FeedEvent::Ignored]);
    }

    // ==================== Parse Tests ====================

    #[test]
    fn test_books_snapshot_then_update() {
        let protocol = OkxProtocol::new();
        let snapshot = r#"{"arg": {"channel": "books", "instId": "BTC-USDT"}, "action": "snapshot",
            "data": [{"bids": [["67000.1", "0.5", "0", "3"]], "asks": [["67000.2", "0.3", "0", "1"]],
                      "ts": "1700000000000", "checksum": 0, "prevSeqId": -1, "seqId": 123}]}"#;
        let events = protocol.parse(snapshot).unwrap();
        let update = book(&events);
        assert_eq!(update.kind, BookUpdateKind::Snapshot);
        assert_eq!(update.symbol, btc());
        assert_eq!(update.sequence, 123);
        assert_eq!(update.bids[0], PriceLevel::new(dec!(67000.1), dec!(0.5)));

        let delta = r#"{"arg": {"channel": "books", "instId": "BTC-USDT"}, "action": "update",
            "data": [{"bids": [["67000.1", "0", "0", "0"]], "asks": [],
                      "ts": "1700000000100", "checksum": 0, "prevSeqId": 123, "seqId": 130}]}"#;
        let events = protocol.parse(delta).unwrap();
        let update = book(&events);
        assert_eq!(update.kind, BookUpdateKind::Delta);
        assert_eq!(update.sequence, 130);
        assert_eq!(update.prev_sequence, Some(123));
    }

    #[test]
    fn test_books5_is_snapshot() {
        let text = r#"{"arg": {"channel": "books5", "instId": "ETH-USDT"},
            "data": [{"bids": [["2000", "1", "0", "1"]], "asks": [["2001", "1", "0", "1"]], "ts": "1700000000000"}]}"#;
        let events = OkxProtocol::with_channel(BookChannel::Books5).parse(text).unwrap();
        let update = book(&events);
        assert_eq!(update.kind, BookUpdateKind::Snapshot);
        assert_eq!(update.symbol, Symbol::new("ETH", "USDT"));
        assert_eq!(update.sequence, 0);
    }

    #[test]
    fn test_ticker() {
        let text = r#"{"arg": {"channel": "tickers", "instId": "BTC-USDT"},
            "data": [{"instType": "SPOT", "instId": "BTC-USDT", "last": "67000.5", "askPx": "67000.6",
                      "bidPx": "67000.4", "vol24h": "1500", "volCcy24h": "100500000", "ts": "1700000000000"}]}"#;
        let events = OkxProtocol::new().parse(text).unwrap();
        let FeedEvent::Ticker(ticker) = &events[0] else {
            panic!("expected ticker");
        };
        assert_eq!(ticker.exchange, ExchangeId::Okx);
        assert_eq!(ticker.last_price, dec!(67000.5));
        assert_eq!(ticker.best_ask, Some(dec!(67000.6)));
        assert_eq!(ticker.quote_volume(), dec!(100500000));
        assert_eq!(ticker.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_events() {
        let protocol = OkxProtocol::new();
        let ack = r#"{"event": "subscribe", "arg": {"channel": "books", "instId": "BTC-USDT"}, "connId": "a4d3ae55"}"#;
        assert_eq!(protocol.parse(ack).unwrap(), vec![FeedEvent::Ignored]);

        let error = r#"{"event": "error", "code": "60018", "msg": "Wrong URL or channel doesn't exist", "connId": "a4d3ae55"}"#;
        let Err(ParseError::Rejected(reason)) = protocol.parse(error) else {
            panic!("expected rejection");
        };
        assert!(reason.starts_with("60018"));
    }

    #[test]
    fn test_derivative_instruments_are_symbol_errors() {
        let text = r#"{"arg": {"channel": "books", "instId": "BTC-USDT-SWAP"}, "action": "snapshot", "data": []}"#;
        assert!(matches!(
            OkxProtocol::new().parse(text),
            Err(ParseError::Symbol(_))
        ));
    }

    #[test]
    fn test_unknown_action() {
        let text = r#"{"arg": {"channel": "books", "instId": "BTC-USDT"}, "action": "merge",
            "data": [{"bids": [], "asks": [], "seqId": 1, "prevSeqId": 0}]}"#;
        assert!(matches!(
            OkxProtocol::new().parse(text),
            Err(ParseError::Unrecognized(_))
        ));
    }
}

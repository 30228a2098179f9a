//! The per-exchange half of a feed: message shapes only, no I/O.
//!
//! A [`WireProtocol`] turns canonical symbols into subscribe/unsubscribe
//! requests and turns inbound text frames into normalized [`FeedEvent`]s.
//! The connection state machine in [`crate::runtime`] is shared by every
//! exchange.

use cryptoarb_core::{ExchangeId, PriceLevel, Symbol, Ticker};

use crate::parse::ParseError;

/// How a protocol keeps the connection alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ping {
    /// WebSocket ping control frame.
    Frame,
    /// Application-level text message.
    Text(String),
}

/// Whether a book payload replaces or patches the local book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookUpdateKind {
    Snapshot,
    Delta,
}

/// A normalized order-book payload.
#[derive(Debug, Clone, PartialEq)]
pub struct BookUpdate {
    pub symbol: Symbol,
    pub kind: BookUpdateKind,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    /// Exchange sequence after this update.
    pub sequence: u64,
    /// Sequence the exchange says this delta follows, when the protocol
    /// carries one. Used for gap detection.
    pub prev_sequence: Option<u64>,
}

impl BookUpdate {
    #[must_use]
    pub fn snapshot(symbol: Symbol, bids: Vec<PriceLevel>, asks: Vec<PriceLevel>, sequence: u64) -> Self {
        Self {
            symbol,
            kind: BookUpdateKind::Snapshot,
            bids,
            asks,
            sequence,
            prev_sequence: None,
        }
    }

    #[must_use]
    pub fn delta(
        symbol: Symbol,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
        sequence: u64,
        prev_sequence: Option<u64>,
    ) -> Self {
        Self {
            symbol,
            kind: BookUpdateKind::Delta,
            bids,
            asks,
            sequence,
            prev_sequence,
        }
    }
}

/// One inbound frame can carry several events.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Book(BookUpdate),
    Ticker(Ticker),
    /// Acks, pongs and other control traffic.
    Ignored,
}

/// Exchange-specific message shapes.
pub trait WireProtocol: Send + Sync + 'static {
    fn exchange(&self) -> ExchangeId;

    /// Public market-data endpoint.
    fn default_url(&self) -> &'static str;

    /// Requests that start book and ticker streams for `symbols`.
    fn subscribe_messages(&self, symbols: &[Symbol]) -> Vec<String>;

    /// Requests that stop book and ticker streams for `symbols`.
    fn unsubscribe_messages(&self, symbols: &[Symbol]) -> Vec<String>;

    fn ping(&self) -> Ping;

    /// Parses one text frame.
    ///
    /// # Errors
    /// Returns [`ParseError`] for malformed payloads, unknown symbols and
    /// exchange-side rejections.
    fn parse(&self, text: &str) -> Result<Vec<FeedEvent>, ParseError>;
}

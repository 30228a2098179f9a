//! Feed adapter contract.
//!
//! Every exchange integration implements [`FeedAdapter`] so the aggregator can
//! treat structurally different wire protocols identically. An adapter owns
//! one market-data connection and is the only writer of its order books.
//!
//! ```text
//!                 connect()
//!  Disconnected ─────────────► Connecting ──► Connected
//!       ▲                                      │   ▲
//!       │ disconnect()           read/ping err │   │ redial + resubscribe
//!       │                                      ▼   │
//!       └──────────────────────────── Degraded ──► Reconnecting
//! ```

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::orderbook::SharedOrderBook;
use crate::symbol::Symbol;
use crate::types::{ExchangeId, Ticker};

/// Invoked after every snapshot or delta is applied to a book.
///
/// Runs on the adapter's read task, so it must not block.
pub type BookUpdateCallback = Arc<dyn Fn(ExchangeId, &Symbol, &SharedOrderBook) + Send + Sync>;

/// Invoked for every parsed ticker.
pub type TickerCallback = Arc<dyn Fn(&Ticker) + Send + Sync>;

/// Connection state of a feed adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedState {
    Disconnected,
    Connecting,
    Connected,
    /// A read, write or liveness fault was observed; a reconnect follows.
    Degraded,
    Reconnecting,
}

impl std::fmt::Display for FeedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Degraded => "degraded",
            Self::Reconnecting => "reconnecting",
        };
        write!(f, "{s}")
    }
}

/// Errors surfaced by feed adapters.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("failed to connect to {url}: {reason}")]
    Dial { url: String, reason: String },

    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("connection closed by peer")]
    Closed,

    #[error("feed stalled: {stale} of {total} books stale")]
    Stalled { stale: usize, total: usize },

    #[error("not connected")]
    NotConnected,
}

/// Running counters kept by an adapter.
#[derive(Debug, Default)]
pub struct FeedStats {
    messages: AtomicU64,
    parse_errors: AtomicU64,
    book_updates: AtomicU64,
    tickers: AtomicU64,
    reconnects: AtomicU64,
    resyncs: AtomicU64,
    dropped_symbols: AtomicU64,
}

/// Point-in-time copy of [`FeedStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedStatsSnapshot {
    pub messages: u64,
    pub parse_errors: u64,
    pub book_updates: u64,
    pub tickers: u64,
    pub reconnects: u64,
    pub resyncs: u64,
    pub dropped_symbols: u64,
}

impl FeedStats {
    pub fn record_message(&self) {
        self.messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_book_update(&self) {
        self.book_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ticker(&self) {
        self.tickers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resync(&self) {
        self.resyncs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_symbol(&self) {
        self.dropped_symbols.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> FeedStatsSnapshot {
        FeedStatsSnapshot {
            messages: self.messages.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            book_updates: self.book_updates.load(Ordering::Relaxed),
            tickers: self.tickers.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            dropped_symbols: self.dropped_symbols.load(Ordering::Relaxed),
        }
    }
}

/// Uniform market-data feed for one exchange.
#[async_trait]
pub trait FeedAdapter: Send + Sync {
    /// Exchange this adapter streams from.
    fn exchange(&self) -> ExchangeId;

    /// Opens the connection and subscribes to every registered symbol.
    ///
    /// # Errors
    /// Returns [`FeedError`] when the initial dial fails. Later faults are
    /// handled by the adapter's reconnect path and never surface here.
    async fn connect(&self) -> Result<(), FeedError>;

    /// Stops all adapter tasks and closes the connection. A stopped adapter
    /// never reconnects on its own.
    async fn disconnect(&self);

    /// Adds symbols to the subscription set, sending the subscribe request
    /// immediately when connected.
    ///
    /// # Errors
    /// Returns [`FeedError`] when the request cannot be queued.
    async fn subscribe(&self, symbols: &[Symbol]) -> Result<(), FeedError>;

    /// Removes symbols from the subscription set.
    ///
    /// # Errors
    /// Returns [`FeedError`] when the request cannot be queued.
    async fn unsubscribe(&self, symbols: &[Symbol]) -> Result<(), FeedError>;

    /// Requests a reconnect. Concurrent requests collapse into one attempt.
    ///
    /// # Errors
    /// Returns [`FeedError::NotConnected`] when the adapter is not running.
    async fn reconnect(&self) -> Result<(), FeedError>;

    fn is_connected(&self) -> bool;

    fn state(&self) -> FeedState;

    /// Book for `symbol`, if one has been created.
    fn get_order_book(&self, symbol: &Symbol) -> Option<SharedOrderBook>;

    /// Registers the book-update listener, replacing any previous one.
    fn on_order_book_update(&self, callback: BookUpdateCallback);

    /// Registers the ticker listener, replacing any previous one.
    fn on_ticker(&self, callback: TickerCallback);

    fn stats(&self) -> FeedStatsSnapshot;
}

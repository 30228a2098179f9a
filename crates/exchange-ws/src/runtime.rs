//! Connection state machine shared by every WebSocket exchange feed.
//!
//! [`WsFeed`] owns one connection and a supervisor task. The supervisor runs a
//! session until it ends, then redials with a fixed backoff and resubscribes
//! to the full symbol set:
//!
//! ```text
//! connect() ─► dial ─► spawn supervisor
//!                         │
//!                         ├─► session: subscribe all, then select! over
//!                         │     stop │ reconnect request │ commands
//!                         │     ping │ health watchdog   │ read deadline │ read
//!                         │
//!                         └─► on fault: Degraded ─► Reconnecting ─► backoff ─► dial ─► session
//! ```
//!
//! Every book becomes unsynchronized when a session ends; the first snapshot
//! for a symbol re-synchronizes it and deltas are dropped until then. A delta
//! whose predecessor sequence is ahead of the book's sequence triggers an
//! unsubscribe + subscribe of that symbol so the exchange resends a snapshot.

use async_trait::async_trait;
use cryptoarb_core::{
    BookUpdateCallback, ExchangeId, FeedAdapter, FeedConfig, FeedError, FeedState, FeedStats,
    FeedStatsSnapshot, OrderBook, SharedOrderBook, Symbol, Ticker, TickerCallback,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, sleep_until, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use crate::parse::ParseError;
use crate::protocol::{BookUpdate, BookUpdateKind, FeedEvent, Ping, WireProtocol};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

const COMMAND_BUFFER: usize = 64;

/// Subscription changes requested while a session is running.
enum Command {
    Subscribe(Vec<Symbol>),
    Unsubscribe(Vec<Symbol>),
}

enum SessionEnd {
    Stopped,
    ReconnectRequested,
    Fault(FeedError),
}

struct BookSlot {
    book: SharedOrderBook,
    synced: bool,
}

/// Handles to a running supervisor.
struct Control {
    stop_tx: watch::Sender<bool>,
    reconnect_tx: mpsc::Sender<()>,
    command_tx: mpsc::Sender<Command>,
    handle: JoinHandle<()>,
}

struct Shared<P> {
    protocol: P,
    config: FeedConfig,
    url: String,
    state: Mutex<FeedState>,
    symbols: RwLock<BTreeSet<Symbol>>,
    books: RwLock<HashMap<Symbol, BookSlot>>,
    book_callback: RwLock<Option<BookUpdateCallback>>,
    ticker_callback: RwLock<Option<TickerCallback>>,
    stats: FeedStats,
}

/// A [`FeedAdapter`] speaking `P` over a WebSocket.
pub struct WsFeed<P: WireProtocol> {
    shared: Arc<Shared<P>>,
    control: Mutex<Option<Control>>,
}

impl<P: WireProtocol> WsFeed<P> {
    /// Creates a stopped feed. `config.url` overrides the protocol's endpoint.
    #[must_use]
    pub fn new(protocol: P, config: FeedConfig) -> Self {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| protocol.default_url().to_string());

        Self {
            shared: Arc::new(Shared {
                protocol,
                config,
                url,
                state: Mutex::new(FeedState::Disconnected),
                symbols: RwLock::new(BTreeSet::new()),
                books: RwLock::new(HashMap::new()),
                book_callback: RwLock::new(None),
                ticker_callback: RwLock::new(None),
                stats: FeedStats::default(),
            }),
            control: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.shared.url
    }

    #[must_use]
    pub fn protocol(&self) -> &P {
        &self.shared.protocol
    }

    /// Currently subscribed symbols, sorted.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<Symbol> {
        self.shared.subscribed()
    }

    fn command_sender(&self) -> Option<mpsc::Sender<Command>> {
        self.control.lock().as_ref().map(|c| c.command_tx.clone())
    }
}

#[async_trait]
impl<P: WireProtocol> FeedAdapter for WsFeed<P> {
    fn exchange(&self) -> ExchangeId {
        self.shared.protocol.exchange()
    }

    async fn connect(&self) -> Result<(), FeedError> {
        if self.control.lock().is_some() {
            debug!(exchange = %self.exchange(), "Connect called on running feed");
            return Ok(());
        }

        self.shared.set_state(FeedState::Connecting);
        info!(exchange = %self.exchange(), url = %self.shared.url, "Connecting");

        let ws = match self.shared.dial().await {
            Ok(ws) => ws,
            Err(e) => {
                self.shared.set_state(FeedState::Disconnected);
                return Err(e);
            }
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        let (reconnect_tx, reconnect_rx) = mpsc::channel(1);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = tokio::spawn(supervise(
            Arc::clone(&self.shared),
            ws,
            stop_rx,
            reconnect_rx,
            command_rx,
        ));

        let mut control = self.control.lock();
        if control.is_some() {
            // Lost a race with a concurrent connect; keep the first supervisor.
            handle.abort();
            return Ok(());
        }
        *control = Some(Control {
            stop_tx,
            reconnect_tx,
            command_tx,
            handle,
        });
        Ok(())
    }

    async fn disconnect(&self) {
        let control = self.control.lock().take();
        if let Some(mut control) = control {
            let _ = control.stop_tx.send(true);
            let grace = self.shared.config.write_timeout() + self.shared.config.connect_timeout();
            if timeout(grace, &mut control.handle).await.is_err() {
                warn!(exchange = %self.exchange(), "Feed task did not stop in time, aborting");
                control.handle.abort();
            }
        }
        self.shared.set_state(FeedState::Disconnected);
        info!(exchange = %self.exchange(), "Disconnected");
    }

    async fn subscribe(&self, symbols: &[Symbol]) -> Result<(), FeedError> {
        let added: Vec<Symbol> = {
            let mut subscribed = self.shared.symbols.write();
            symbols
                .iter()
                .filter(|symbol| subscribed.insert((*symbol).clone()))
                .cloned()
                .collect()
        };
        if added.is_empty() {
            return Ok(());
        }
        info!(exchange = %self.exchange(), symbols = ?added, "Subscribing");

        if let Some(tx) = self.command_sender() {
            tx.send(Command::Subscribe(added))
                .await
                .map_err(|_| FeedError::NotConnected)?;
        }
        Ok(())
    }

    async fn unsubscribe(&self, symbols: &[Symbol]) -> Result<(), FeedError> {
        let removed: Vec<Symbol> = {
            let mut subscribed = self.shared.symbols.write();
            symbols
                .iter()
                .filter(|symbol| subscribed.remove(*symbol))
                .cloned()
                .collect()
        };
        if removed.is_empty() {
            return Ok(());
        }
        {
            let mut books = self.shared.books.write();
            for symbol in &removed {
                if let Some(slot) = books.get_mut(symbol) {
                    slot.synced = false;
                }
            }
        }
        info!(exchange = %self.exchange(), symbols = ?removed, "Unsubscribing");

        if let Some(tx) = self.command_sender() {
            tx.send(Command::Unsubscribe(removed))
                .await
                .map_err(|_| FeedError::NotConnected)?;
        }
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), FeedError> {
        let reconnect_tx = self
            .control
            .lock()
            .as_ref()
            .map(|c| c.reconnect_tx.clone())
            .ok_or(FeedError::NotConnected)?;

        if self.shared.begin_reconnect() {
            info!(exchange = %self.exchange(), "Reconnect requested");
            let _ = reconnect_tx.try_send(());
        } else {
            debug!(exchange = %self.exchange(), "Reconnect already in progress");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state() == FeedState::Connected
    }

    fn state(&self) -> FeedState {
        *self.shared.state.lock()
    }

    fn get_order_book(&self, symbol: &Symbol) -> Option<SharedOrderBook> {
        self.shared
            .books
            .read()
            .get(symbol)
            .map(|slot| Arc::clone(&slot.book))
    }

    fn on_order_book_update(&self, callback: BookUpdateCallback) {
        *self.shared.book_callback.write() = Some(callback);
    }

    fn on_ticker(&self, callback: TickerCallback) {
        *self.shared.ticker_callback.write() = Some(callback);
    }

    fn stats(&self) -> FeedStatsSnapshot {
        self.shared.stats.snapshot()
    }
}

// ============================================================================
// Shared State
// ============================================================================

impl<P: WireProtocol> Shared<P> {
    fn exchange(&self) -> ExchangeId {
        self.protocol.exchange()
    }

    fn set_state(&self, state: FeedState) {
        let mut current = self.state.lock();
        let previous = *current;
        if previous != state {
            debug!(exchange = %self.exchange(), from = %previous, to = %state, "Feed state change");
            *current = state;
        }
    }

    /// Connected → Degraded. Returns false when a reconnect is already
    /// underway (or the feed is not connected), so concurrent triggers from
    /// the read path, the watchdog and [`FeedAdapter::reconnect`] collapse
    /// into one attempt.
    fn begin_reconnect(&self) -> bool {
        let mut state = self.state.lock();
        if *state == FeedState::Connected {
            *state = FeedState::Degraded;
            true
        } else {
            false
        }
    }

    fn subscribed(&self) -> Vec<Symbol> {
        self.symbols.read().iter().cloned().collect()
    }

    async fn dial(&self) -> Result<WsStream, FeedError> {
        let limit = self.config.connect_timeout();
        match timeout(limit, connect_async(self.url.as_str())).await {
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(e)) => Err(FeedError::Dial {
                url: self.url.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Err(FeedError::Timeout {
                operation: "connect",
                elapsed: limit,
            }),
        }
    }

    fn unsync_all(&self) {
        for slot in self.books.write().values_mut() {
            slot.synced = false;
        }
    }

    /// Fails when more than half of the subscribed books are stale.
    fn check_health(&self) -> Result<(), FeedError> {
        let threshold = self.config.health_stale_threshold();
        let symbols = self.symbols.read();
        let books = self.books.read();

        let (total, stale) = books
            .iter()
            .filter(|(symbol, _)| symbols.contains(*symbol))
            .fold((0usize, 0usize), |(total, stale), (_, slot)| {
                (total + 1, stale + usize::from(slot.book.read().is_stale(threshold)))
            });

        if total > 0 && stale * 2 > total {
            warn!(exchange = %self.exchange(), stale, total, "Feed stalled");
            return Err(FeedError::Stalled { stale, total });
        }
        trace!(exchange = %self.exchange(), stale, total, "Health check passed");
        Ok(())
    }

    /// Parses and applies one text frame. Returns symbols needing a resync.
    fn handle_text(&self, text: &str) -> Vec<Symbol> {
        self.stats.record_message();

        let events = match self.protocol.parse(text) {
            Ok(events) => events,
            Err(ParseError::Symbol(e)) => {
                self.stats.record_dropped_symbol();
                warn!(exchange = %self.exchange(), error = %e, "Dropping message for unparseable symbol");
                return Vec::new();
            }
            Err(ParseError::Rejected(reason)) => {
                self.stats.record_parse_error();
                warn!(exchange = %self.exchange(), reason = %reason, "Exchange rejected request");
                return Vec::new();
            }
            Err(e) => {
                self.stats.record_parse_error();
                warn!(exchange = %self.exchange(), error = %e, "Dropping malformed message");
                return Vec::new();
            }
        };

        let mut resync = Vec::new();
        for event in events {
            match event {
                FeedEvent::Book(update) => {
                    if let Some(symbol) = self.apply_book(update) {
                        resync.push(symbol);
                    }
                }
                FeedEvent::Ticker(ticker) => self.emit_ticker(&ticker),
                FeedEvent::Ignored => {}
            }
        }
        resync
    }

    fn apply_book(&self, update: BookUpdate) -> Option<Symbol> {
        if !self.symbols.read().contains(&update.symbol) {
            trace!(exchange = %self.exchange(), symbol = %update.symbol, "Update for unsubscribed symbol");
            return None;
        }

        let book = match update.kind {
            BookUpdateKind::Snapshot => {
                let book = self.synchronize(&update.symbol);
                book.write()
                    .replace(&update.bids, &update.asks, update.sequence);
                book
            }
            BookUpdateKind::Delta => {
                let mut books = self.books.write();
                let slot = match books.get_mut(&update.symbol) {
                    Some(slot) if slot.synced => slot,
                    _ => {
                        debug!(
                            exchange = %self.exchange(),
                            symbol = %update.symbol,
                            "Dropping delta for unsynchronized book"
                        );
                        return None;
                    }
                };

                let mut guard = slot.book.write();
                if let Some(prev) = update.prev_sequence {
                    if update.sequence <= guard.sequence() {
                        trace!(exchange = %self.exchange(), symbol = %update.symbol, "Dropping outdated delta");
                        return None;
                    }
                    if prev > guard.sequence() {
                        warn!(
                            exchange = %self.exchange(),
                            symbol = %update.symbol,
                            expected = guard.sequence(),
                            prev,
                            "Sequence gap, resynchronizing"
                        );
                        drop(guard);
                        slot.synced = false;
                        self.stats.record_resync();
                        return Some(update.symbol);
                    }
                }
                guard.apply_delta(&update.bids, &update.asks, update.sequence);
                drop(guard);
                Arc::clone(&slot.book)
            }
        };

        self.stats.record_book_update();
        self.emit_book(&update.symbol, &book);
        None
    }

    /// Returns the book for `symbol`, creating it on first sight, and marks
    /// it synchronized.
    fn synchronize(&self, symbol: &Symbol) -> SharedOrderBook {
        let mut books = self.books.write();
        let slot = books.entry(symbol.clone()).or_insert_with(|| BookSlot {
            book: OrderBook::new(self.exchange(), symbol.clone()).into_shared(),
            synced: false,
        });
        if !slot.synced {
            debug!(exchange = %self.exchange(), symbol = %symbol, "Book synchronized from snapshot");
            slot.synced = true;
        }
        Arc::clone(&slot.book)
    }

    fn emit_book(&self, symbol: &Symbol, book: &SharedOrderBook) {
        let callback = self.book_callback.read().clone();
        if let Some(callback) = callback {
            callback(self.exchange(), symbol, book);
        }
    }

    fn emit_ticker(&self, ticker: &Ticker) {
        self.stats.record_ticker();
        let callback = self.ticker_callback.read().clone();
        if let Some(callback) = callback {
            callback(ticker);
        }
    }
}

// ============================================================================
// Supervisor and Session
// ============================================================================

async fn supervise<P: WireProtocol>(
    shared: Arc<Shared<P>>,
    ws: WsStream,
    mut stop_rx: watch::Receiver<bool>,
    mut reconnect_rx: mpsc::Receiver<()>,
    mut command_rx: mpsc::Receiver<Command>,
) {
    let exchange = shared.exchange();
    let mut ws = ws;

    loop {
        match run_session(&shared, ws, &mut stop_rx, &mut reconnect_rx, &mut command_rx).await {
            SessionEnd::Stopped => break,
            SessionEnd::ReconnectRequested => {
                info!(exchange = %exchange, "Closing session for requested reconnect");
            }
            SessionEnd::Fault(e) => {
                shared.begin_reconnect();
                warn!(exchange = %exchange, error = %e, "Feed fault, reconnecting");
            }
        }

        match redial(&shared, &mut stop_rx).await {
            Some(next) => {
                ws = next;
                shared.stats.record_reconnect();
                // The new session subscribes the whole set.
                while reconnect_rx.try_recv().is_ok() {}
                while command_rx.try_recv().is_ok() {}
            }
            None => break,
        }
    }

    shared.set_state(FeedState::Disconnected);
    info!(exchange = %exchange, "Feed stopped");
}

/// Backs off and dials until a connection is made. Returns `None` once the
/// stop signal fires, so a stopped feed never resurrects itself.
async fn redial<P: WireProtocol>(
    shared: &Shared<P>,
    stop_rx: &mut watch::Receiver<bool>,
) -> Option<WsStream> {
    let backoff = shared.config.reconnect_backoff();
    loop {
        shared.set_state(FeedState::Reconnecting);
        shared.unsync_all();

        tokio::select! {
            _ = sleep(backoff) => {}
            _ = stop_rx.changed() => return None,
        }
        if *stop_rx.borrow() {
            return None;
        }

        match shared.dial().await {
            Ok(ws) => {
                info!(exchange = %shared.exchange(), "Reconnected");
                return Some(ws);
            }
            Err(e) => {
                warn!(exchange = %shared.exchange(), error = %e, backoff = ?backoff, "Reconnect attempt failed");
            }
        }
    }
}

async fn run_session<P: WireProtocol>(
    shared: &Shared<P>,
    ws: WsStream,
    stop_rx: &mut watch::Receiver<bool>,
    reconnect_rx: &mut mpsc::Receiver<()>,
    command_rx: &mut mpsc::Receiver<Command>,
) -> SessionEnd {
    let exchange = shared.exchange();
    let write_timeout = shared.config.write_timeout();
    let (mut write, mut read) = ws.split();

    let symbols = shared.subscribed();
    if !symbols.is_empty() {
        for message in shared.protocol.subscribe_messages(&symbols) {
            debug!(exchange = %exchange, message = %message, "Sending subscription");
            if let Err(e) = send(&mut write, Message::Text(message), write_timeout).await {
                return SessionEnd::Fault(e);
            }
        }
    }
    shared.set_state(FeedState::Connected);
    info!(exchange = %exchange, symbols = symbols.len(), "Feed connected");

    let ping_every = shared.config.ping_interval();
    let mut ping_interval = interval_at(Instant::now() + ping_every, ping_every);
    ping_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let health_every = shared.config.health_check_interval();
    let mut health_interval = interval_at(Instant::now() + health_every, health_every);
    health_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let read_timeout = shared.config.read_timeout();
    let mut last_read = Instant::now();

    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                info!(exchange = %exchange, "Shutdown signal received, closing WebSocket");
                let _ = timeout(write_timeout, write.close()).await;
                return SessionEnd::Stopped;
            }

            Some(()) = reconnect_rx.recv() => {
                let _ = timeout(write_timeout, write.close()).await;
                return SessionEnd::ReconnectRequested;
            }

            Some(command) = command_rx.recv() => {
                let messages = match command {
                    Command::Subscribe(symbols) => shared.protocol.subscribe_messages(&symbols),
                    Command::Unsubscribe(symbols) => shared.protocol.unsubscribe_messages(&symbols),
                };
                for message in messages {
                    if let Err(e) = send(&mut write, Message::Text(message), write_timeout).await {
                        return SessionEnd::Fault(e);
                    }
                }
            }

            _ = ping_interval.tick() => {
                let frame = match shared.protocol.ping() {
                    Ping::Frame => Message::Ping(Vec::new()),
                    Ping::Text(text) => Message::Text(text),
                };
                trace!(exchange = %exchange, "Sending ping");
                if let Err(e) = send(&mut write, frame, write_timeout).await {
                    warn!(exchange = %exchange, error = %e, "Failed to send ping");
                    return SessionEnd::Fault(e);
                }
            }

            _ = health_interval.tick() => {
                if let Err(e) = shared.check_health() {
                    return SessionEnd::Fault(e);
                }
            }

            _ = sleep_until(last_read + read_timeout) => {
                return SessionEnd::Fault(FeedError::Timeout {
                    operation: "read",
                    elapsed: read_timeout,
                });
            }

            msg = read.next() => {
                last_read = Instant::now();
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => text,
                        Err(_) => {
                            debug!(exchange = %exchange, "Ignoring non-utf8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = send(&mut write, Message::Pong(data), write_timeout).await {
                            return SessionEnd::Fault(e);
                        }
                        continue;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        trace!(exchange = %exchange, "Received pong");
                        continue;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(exchange = %exchange, frame = ?frame, "Received close frame");
                        return SessionEnd::Fault(FeedError::Closed);
                    }
                    Some(Ok(Message::Frame(_))) => continue,
                    Some(Err(e)) => return SessionEnd::Fault(FeedError::WebSocket(e.to_string())),
                    None => return SessionEnd::Fault(FeedError::Closed),
                };

                for symbol in shared.handle_text(&text) {
                    let symbols = [symbol];
                    let messages = shared
                        .protocol
                        .unsubscribe_messages(&symbols)
                        .into_iter()
                        .chain(shared.protocol.subscribe_messages(&symbols));
                    for message in messages {
                        if let Err(e) = send(&mut write, Message::Text(message), write_timeout).await {
                            return SessionEnd::Fault(e);
                        }
                    }
                }
            }
        }
    }
}

async fn send(write: &mut WsSink, message: Message, limit: Duration) -> Result<(), FeedError> {
    match timeout(limit, write.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(FeedError::WebSocket(e.to_string())),
        Err(_) => Err(FeedError::Timeout {
            operation: "write",
            elapsed: limit,
        }),
    }
}

#[cfg(test)]
mod tests {
    //! Runtime tests against an in-process WebSocket server.
    //!
    //! The server answers the n-th subscription request it receives (counted
    //! across connections) with the n-th scripted batch of frames, and can
    //! drop a connection right after a given batch.

    use super::*;
    use crate::parse::{decimal_field, levels_field, str_field, u64_field};
    use cryptoarb_core::WireFormat;
    use rust_decimal_macros::dec;
    use serde_json::{json, Value};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    // ==================== Test Protocol ====================

    struct TestProtocol;

    impl WireProtocol for TestProtocol {
        fn exchange(&self) -> ExchangeId {
            ExchangeId::Binance
        }

        fn default_url(&self) -> &'static str {
            "ws://127.0.0.1:9"
        }

        fn subscribe_messages(&self, symbols: &[Symbol]) -> Vec<String> {
            let args: Vec<String> = symbols
                .iter()
                .map(|s| s.to_wire(WireFormat::Concatenated))
                .collect();
            vec![json!({"op": "sub", "args": args}).to_string()]
        }

        fn unsubscribe_messages(&self, symbols: &[Symbol]) -> Vec<String> {
            let args: Vec<String> = symbols
                .iter()
                .map(|s| s.to_wire(WireFormat::Concatenated))
                .collect();
            vec![json!({"op": "unsub", "args": args}).to_string()]
        }

        fn ping(&self) -> Ping {
            Ping::Text("ping".to_string())
        }

        fn parse(&self, text: &str) -> Result<Vec<FeedEvent>, ParseError> {
            if text == "pong" {
                return Ok(vec![FeedEvent::Ignored]);
            }
            let value: Value = serde_json::from_str(text)?;
            let symbol = Symbol::from_wire(str_field(&value, "s")?, WireFormat::Concatenated)?;
            match str_field(&value, "t")? {
                "snap" => Ok(vec![FeedEvent::Book(BookUpdate::snapshot(
                    symbol,
                    levels_field(&value, "b")?,
                    levels_field(&value, "a")?,
                    u64_field(&value, "seq")?,
                ))]),
                "delta" => Ok(vec![FeedEvent::Book(BookUpdate::delta(
                    symbol,
                    levels_field(&value, "b")?,
                    levels_field(&value, "a")?,
                    u64_field(&value, "seq")?,
                    u64_field(&value, "prev").ok(),
                ))]),
                "ticker" => Ok(vec![FeedEvent::Ticker(Ticker {
                    exchange: ExchangeId::Binance,
                    symbol,
                    last_price: decimal_field(&value, "last")?,
                    best_bid: None,
                    best_ask: None,
                    volume_24h: decimal_field(&value, "vol")?,
                    quote_volume_24h: None,
                    timestamp: chrono::Utc::now(),
                })]),
                other => Err(ParseError::Unrecognized(other.to_string())),
            }
        }
    }

    fn snap(seq: u64, bid: &str, ask: &str) -> String {
        json!({"s": "BTCUSDT", "t": "snap", "b": [[bid, "1"]], "a": [[ask, "1"]], "seq": seq}).to_string()
    }

    fn delta(seq: u64, prev: u64, bids: Value) -> String {
        json!({"s": "BTCUSDT", "t": "delta", "b": bids, "a": [], "seq": seq, "prev": prev}).to_string()
    }

    // ==================== Mock Server ====================

    struct MockServer {
        addr: SocketAddr,
        connections: Arc<AtomicUsize>,
        received: Arc<Mutex<Vec<String>>>,
        shutdown_tx: Option<oneshot::Sender<()>>,
    }

    impl MockServer {
        async fn start(replies: Vec<Vec<String>>, close_after: Option<usize>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
            let connections = Arc::new(AtomicUsize::new(0));
            let received = Arc::new(Mutex::new(Vec::new()));
            let subscriptions = Arc::new(AtomicUsize::new(0));
            let replies = Arc::new(replies);

            let server_connections = Arc::clone(&connections);
            let server_received = Arc::clone(&received);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = &mut shutdown_rx => return,
                        result = listener.accept() => {
                            let Ok((stream, _)) = result else { return };
                            server_connections.fetch_add(1, Ordering::SeqCst);
                            let received = Arc::clone(&server_received);
                            let subscriptions = Arc::clone(&subscriptions);
                            let replies = Arc::clone(&replies);
                            tokio::spawn(async move {
                                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else { return };
                                let (mut write, mut read) = ws.split();
                                while let Some(Ok(msg)) = read.next().await {
                                    let Message::Text(text) = msg else { continue };
                                    received.lock().push(text.clone());
                                    if text == "ping" {
                                        let _ = write.send(Message::Text("pong".to_string())).await;
                                        continue;
                                    }
                                    let is_sub = serde_json::from_str::<Value>(&text)
                                        .map(|v| v["op"] == "sub")
                                        .unwrap_or(false);
                                    if !is_sub {
                                        continue;
                                    }
                                    let n = subscriptions.fetch_add(1, Ordering::SeqCst);
                                    for frame in replies.get(n).into_iter().flatten() {
                                        let _ = write.send(Message::Text(frame.clone())).await;
                                    }
                                    if close_after == Some(n) {
                                        let _ = write.close().await;
                                        return;
                                    }
                                }
                            });
                        }
                    }
                }
            });

            Self {
                addr,
                connections,
                received,
                shutdown_tx: Some(shutdown_tx),
            }
        }

        fn url(&self) -> String {
            format!("ws://{}", self.addr)
        }

        fn connections(&self) -> usize {
            self.connections.load(Ordering::SeqCst)
        }

        fn received(&self) -> Vec<String> {
            self.received.lock().clone()
        }
    }

    impl Drop for MockServer {
        fn drop(&mut self) {
            if let Some(tx) = self.shutdown_tx.take() {
                let _ = tx.send(());
            }
        }
    }

    // ==================== Helpers ====================

    fn btc() -> Symbol {
        Symbol::new("BTC", "USDT")
    }

    fn test_config(url: String) -> FeedConfig {
        FeedConfig {
            url: Some(url),
            ping_interval_ms: 10_000,
            reconnect_backoff_ms: 50,
            connect_timeout_ms: 1_000,
            read_timeout_ms: 10_000,
            write_timeout_ms: 1_000,
            health_check_interval_ms: 60_000,
            health_stale_threshold_ms: 60_000,
            ..FeedConfig::default()
        }
    }

    async fn started(config: FeedConfig) -> WsFeed<TestProtocol> {
        let feed = WsFeed::new(TestProtocol, config);
        feed.subscribe(&[btc()]).await.unwrap();
        feed.connect().await.unwrap();
        feed
    }

    async fn eventually(mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        check()
    }

    fn sequence(feed: &WsFeed<TestProtocol>) -> Option<u64> {
        feed.get_order_book(&btc()).map(|book| book.read().sequence())
    }

    // ==================== Connection Tests ====================

    #[tokio::test]
    async fn test_snapshot_then_delta_applied() {
        let server = MockServer::start(
            vec![vec![
                snap(1, "100", "101"),
                delta(2, 1, json!([["100", "0"], ["99.5", "2"]])),
            ]],
            None,
        )
        .await;

        let updates = Arc::new(AtomicUsize::new(0));
        let feed = WsFeed::new(TestProtocol, test_config(server.url()));
        let counter = Arc::clone(&updates);
        feed.on_order_book_update(Arc::new(move |exchange, symbol, _book| {
            assert_eq!(exchange, ExchangeId::Binance);
            assert_eq!(symbol, &Symbol::new("BTC", "USDT"));
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        feed.subscribe(&[btc()]).await.unwrap();
        feed.connect().await.unwrap();

        assert!(eventually(|| sequence(&feed) == Some(2)).await);
        assert!(feed.is_connected());

        let book = feed.get_order_book(&btc()).unwrap();
        assert_eq!(book.read().best_bid().unwrap().price, dec!(99.5));
        assert_eq!(book.read().best_ask().unwrap().price, dec!(101));
        assert_eq!(updates.load(Ordering::SeqCst), 2);
        assert_eq!(feed.stats().book_updates, 2);

        let sent = server.received();
        assert!(sent[0].contains("BTCUSDT"));

        feed.disconnect().await;
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let feed = WsFeed::new(TestProtocol, test_config(format!("ws://{addr}")));
        let result = feed.connect().await;
        assert!(matches!(result, Err(FeedError::Dial { .. })));
        assert_eq!(feed.state(), FeedState::Disconnected);
        assert!(matches!(feed.reconnect().await, Err(FeedError::NotConnected)));
    }

    #[tokio::test]
    async fn test_ticker_callback() {
        let ticker = json!({"s": "BTCUSDT", "t": "ticker", "last": "100.5", "vol": 12}).to_string();
        let server = MockServer::start(vec![vec![ticker]], None).await;

        let seen = Arc::new(Mutex::new(None));
        let feed = WsFeed::new(TestProtocol, test_config(server.url()));
        let slot = Arc::clone(&seen);
        feed.on_ticker(Arc::new(move |ticker| {
            *slot.lock() = Some(ticker.clone());
        }));
        feed.subscribe(&[btc()]).await.unwrap();
        feed.connect().await.unwrap();

        assert!(eventually(|| seen.lock().is_some()).await);
        let ticker = seen.lock().clone().unwrap();
        assert_eq!(ticker.last_price, dec!(100.5));
        assert_eq!(ticker.volume_24h, dec!(12));
        assert_eq!(feed.stats().tickers, 1);

        feed.disconnect().await;
    }

    // ==================== Parse Fault Tests ====================

    #[tokio::test]
    async fn test_bad_messages_are_dropped_without_disconnect() {
        let bad_symbol = json!({"s": "FOOXYZ", "t": "snap", "b": [], "a": [], "seq": 1}).to_string();
        let server = MockServer::start(
            vec![vec!["not json".to_string(), bad_symbol, snap(1, "100", "101")]],
            None,
        )
        .await;
        let feed = started(test_config(server.url())).await;

        assert!(eventually(|| sequence(&feed) == Some(1)).await);
        let stats = feed.stats();
        assert_eq!(stats.parse_errors, 1);
        assert_eq!(stats.dropped_symbols, 1);
        assert_eq!(server.connections(), 1);
        assert!(feed.is_connected());

        feed.disconnect().await;
    }

    // ==================== Sequencing Tests ====================

    #[tokio::test]
    async fn test_delta_before_snapshot_dropped_and_gap_resyncs() {
        let server = MockServer::start(
            vec![
                vec![
                    delta(5, 4, json!([["90", "1"]])),
                    snap(10, "100", "101"),
                    delta(12, 11, json!([["99", "1"]])),
                    delta(13, 12, json!([["98", "1"]])),
                ],
                vec![snap(20, "200", "201")],
            ],
            None,
        )
        .await;
        let feed = started(test_config(server.url())).await;

        assert!(eventually(|| sequence(&feed) == Some(20)).await);
        let book = feed.get_order_book(&btc()).unwrap();
        assert_eq!(book.read().bid_levels(), 1);
        assert_eq!(book.read().best_bid().unwrap().price, dec!(200));

        let stats = feed.stats();
        assert_eq!(stats.resyncs, 1);
        assert_eq!(stats.book_updates, 2);
        assert_eq!(server.connections(), 1);

        let sent = server.received();
        let unsub = sent.iter().position(|m| m.contains("unsub")).unwrap();
        let resub = sent.iter().rposition(|m| m.contains("\"sub\"")).unwrap();
        assert!(unsub < resub);

        feed.disconnect().await;
    }

    #[tokio::test]
    async fn test_outdated_delta_is_ignored() {
        let server = MockServer::start(
            vec![vec![
                snap(10, "100", "101"),
                delta(9, 8, json!([["50", "1"]])),
                delta(11, 10, json!([["99", "1"]])),
            ]],
            None,
        )
        .await;
        let feed = started(test_config(server.url())).await;

        assert!(eventually(|| sequence(&feed) == Some(11)).await);
        let book = feed.get_order_book(&btc()).unwrap();
        assert_eq!(book.read().bid_levels(), 2);
        assert_eq!(feed.stats().resyncs, 0);

        feed.disconnect().await;
    }

    // ==================== Reconnect Tests ====================

    #[tokio::test]
    async fn test_reconnects_and_resubscribes_after_close() {
        let server = MockServer::start(
            vec![vec![snap(1, "100", "101")], vec![snap(2, "100", "101")]],
            Some(0),
        )
        .await;
        let feed = started(test_config(server.url())).await;

        assert!(eventually(|| sequence(&feed) == Some(2) && feed.is_connected()).await);
        assert_eq!(server.connections(), 2);
        assert_eq!(feed.stats().reconnects, 1);

        let subs = server.received().iter().filter(|m| m.contains("\"sub\"")).count();
        assert_eq!(subs, 2);

        feed.disconnect().await;
    }

    #[tokio::test]
    async fn test_concurrent_reconnect_requests_collapse() {
        let server = MockServer::start(
            vec![vec![snap(1, "100", "101")], vec![snap(2, "100", "101")]],
            None,
        )
        .await;
        let mut config = test_config(server.url());
        config.reconnect_backoff_ms = 200;
        let feed = Arc::new(started(config).await);
        assert!(eventually(|| sequence(&feed) == Some(1) && feed.is_connected()).await);

        let requests = (0..8).map(|_| {
            let feed = Arc::clone(&feed);
            async move { feed.reconnect().await }
        });
        for result in futures_util::future::join_all(requests).await {
            assert!(result.is_ok());
        }

        assert!(eventually(|| sequence(&feed) == Some(2) && feed.is_connected()).await);
        sleep(Duration::from_millis(400)).await;
        assert_eq!(server.connections(), 2);
        assert_eq!(feed.stats().reconnects, 1);

        feed.disconnect().await;
    }

    #[tokio::test]
    async fn test_watchdog_reconnects_stalled_feed() {
        let server = MockServer::start(
            vec![vec![snap(1, "100", "101")], vec![snap(2, "100", "101")]],
            None,
        )
        .await;
        let mut config = test_config(server.url());
        config.health_check_interval_ms = 100;
        config.health_stale_threshold_ms = 150;
        let feed = started(config).await;

        assert!(eventually(|| server.connections() >= 2).await);
        assert!(eventually(|| sequence(&feed) == Some(2)).await);
        assert!(feed.stats().reconnects >= 1);

        feed.disconnect().await;
    }

    #[tokio::test]
    async fn test_read_timeout_reconnects() {
        let server = MockServer::start(vec![vec![snap(1, "100", "101")]], None).await;
        let mut config = test_config(server.url());
        config.read_timeout_ms = 200;
        let feed = started(config).await;

        assert!(eventually(|| server.connections() >= 2).await);

        feed.disconnect().await;
    }

    #[tokio::test]
    async fn test_zero_intervals_keep_feed_alive() {
        let server = MockServer::start(
            vec![vec![snap(1, "100", "101"), delta(2, 1, json!([["99", "1"]]))]],
            None,
        )
        .await;
        let mut config = test_config(server.url());
        config.ping_interval_ms = 0;
        config.health_check_interval_ms = 0;
        let feed = started(config).await;

        assert!(eventually(|| sequence(&feed) == Some(2)).await);
        sleep(Duration::from_millis(350)).await;

        assert!(feed.is_connected());
        assert_eq!(server.connections(), 1);
        assert!(server.received().iter().any(|frame| frame == "ping"));

        feed.disconnect().await;
    }

    #[tokio::test]
    async fn test_disconnect_stops_reconnecting() {
        let server = MockServer::start(vec![vec![snap(1, "100", "101")]], None).await;
        let feed = started(test_config(server.url())).await;
        assert!(eventually(|| feed.is_connected()).await);

        feed.disconnect().await;
        assert_eq!(feed.state(), FeedState::Disconnected);

        sleep(Duration::from_millis(300)).await;
        assert_eq!(server.connections(), 1);
        assert!(matches!(feed.reconnect().await, Err(FeedError::NotConnected)));
        // The book outlives the connection.
        assert!(feed.get_order_book(&btc()).is_some());
    }

    #[tokio::test]
    async fn test_subscribe_while_connected_sends_request() {
        let server = MockServer::start(vec![vec![snap(1, "100", "101")]], None).await;
        let feed = started(test_config(server.url())).await;
        assert!(eventually(|| feed.is_connected()).await);

        feed.subscribe(&[Symbol::new("ETH", "USDT")]).await.unwrap();
        assert!(eventually(|| server.received().iter().any(|m| m.contains("ETHUSDT"))).await);

        feed.unsubscribe(&[btc()]).await.unwrap();
        assert!(eventually(|| server.received().iter().any(|m| m.contains("unsub"))).await);
        assert_eq!(feed.subscriptions(), vec![Symbol::new("ETH", "USDT")]);

        feed.disconnect().await;
    }
}

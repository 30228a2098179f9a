//! WebSocket feed runtime shared by the exchange integrations.
//!
//! An exchange crate supplies a [`WireProtocol`] (subscription messages, ping
//! style, payload parsing). [`WsFeed`] wraps it in the connection state
//! machine and implements [`cryptoarb_core::FeedAdapter`].

pub mod parse;
pub mod protocol;
pub mod runtime;

pub use parse::ParseError;
pub use protocol::{BookUpdate, BookUpdateKind, FeedEvent, Ping, WireProtocol};
pub use runtime::WsFeed;

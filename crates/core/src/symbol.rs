//! Trading-pair symbols and exchange wire conventions.
//!
//! The canonical form is `BASE/QUOTE` in uppercase. Exchanges spell the same
//! pair differently on the wire:
//!
//! ```text
//! canonical   BTC/USDT
//! binance     BTCUSDT   (btcusdt inside stream names)
//! bybit       BTCUSDT
//! okx         BTC-USDT
//! ```
//!
//! Concatenated forms carry no separator, so the quote currency is recovered
//! by stripping the longest matching suffix from [`KNOWN_QUOTES`].

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Quote currencies recognized when splitting concatenated symbols.
pub const KNOWN_QUOTES: &[&str] = &[
    "FDUSD", "USDT", "USDC", "BUSD", "TUSD", "USDE", "DAI", "USD", "EUR", "TRY", "BRL", "BTC",
    "ETH", "BNB",
];

/// Errors produced while parsing symbols.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SymbolError {
    /// The input was empty.
    #[error("empty symbol")]
    Empty,

    /// No known quote currency could be split off.
    #[error("unknown quote currency in symbol: {0}")]
    UnknownQuote(String),

    /// The input did not have a `BASE/QUOTE` or `BASE-QUOTE` shape.
    #[error("malformed symbol: {0}")]
    Malformed(String),
}

/// How an exchange spells a pair on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// `BTCUSDT`
    Concatenated,
    /// `btcusdt`
    ConcatenatedLower,
    /// `BTC-USDT`
    Hyphenated,
}

/// A canonical trading pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol {
    base: String,
    quote: String,
}

impl Symbol {
    /// Creates a symbol from its parts, uppercasing both.
    #[must_use]
    pub fn new(base: impl AsRef<str>, quote: impl AsRef<str>) -> Self {
        Self {
            base: base.as_ref().trim().to_ascii_uppercase(),
            quote: quote.as_ref().trim().to_ascii_uppercase(),
        }
    }

    /// Parses the canonical `BASE/QUOTE` form (also accepts `_` and `-` separators).
    ///
    /// # Errors
    /// Returns [`SymbolError`] when the input has no separator or an empty side.
    pub fn parse(input: &str) -> Result<Self, SymbolError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(SymbolError::Empty);
        }

        let mut parts = trimmed.split(['/', '_', '-']);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(base), Some(quote), None) if !base.is_empty() && !quote.is_empty() => {
                Ok(Self::new(base, quote))
            }
            _ => Err(SymbolError::Malformed(trimmed.to_string())),
        }
    }

    /// Parses an exchange wire symbol.
    ///
    /// # Errors
    /// Returns [`SymbolError`] when the quote cannot be identified.
    pub fn from_wire(input: &str, format: WireFormat) -> Result<Self, SymbolError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(SymbolError::Empty);
        }

        match format {
            WireFormat::Hyphenated => {
                let mut parts = trimmed.split('-');
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(base), Some(quote), None) if !base.is_empty() && !quote.is_empty() => {
                        Ok(Self::new(base, quote))
                    }
                    _ => Err(SymbolError::Malformed(trimmed.to_string())),
                }
            }
            WireFormat::Concatenated | WireFormat::ConcatenatedLower => {
                split_concatenated(trimmed)
            }
        }
    }

    /// Renders the symbol in an exchange's wire convention.
    #[must_use]
    pub fn to_wire(&self, format: WireFormat) -> String {
        match format {
            WireFormat::Concatenated => format!("{}{}", self.base, self.quote),
            WireFormat::ConcatenatedLower => {
                format!("{}{}", self.base, self.quote).to_ascii_lowercase()
            }
            WireFormat::Hyphenated => format!("{}-{}", self.base, self.quote),
        }
    }

    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    #[must_use]
    pub fn quote(&self) -> &str {
        &self.quote
    }
}

fn split_concatenated(input: &str) -> Result<Symbol, SymbolError> {
    let upper = input.to_ascii_uppercase();

    let quote = KNOWN_QUOTES
        .iter()
        .filter(|q| upper.len() > q.len() && upper.ends_with(*q))
        .max_by_key(|q| q.len())
        .ok_or_else(|| SymbolError::UnknownQuote(input.to_string()))?;

    let base = &upper[..upper.len() - quote.len()];
    if !base.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(SymbolError::Malformed(input.to_string()));
    }

    Ok(Symbol::new(base, quote))
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for Symbol {
    type Err = SymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Symbol {
    type Error = SymbolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.to_string()
    }
}

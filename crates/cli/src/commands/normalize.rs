//! `normalize`: show how a pair is spelled on each exchange.

use anyhow::{Context, Result};
use clap::Args;
use cryptoarb_core::{ExchangeId, Symbol, WireFormat};

#[derive(Args, Debug, Clone)]
pub struct NormalizeArgs {
    /// Symbol as an exchange spells it (BTCUSDT, btcusdt, BTC-USDT) or canonical BTC/USDT
    pub symbol: String,

    /// Exchange whose wire format the symbol uses; canonical form when omitted
    #[arg(short, long)]
    pub exchange: Option<ExchangeId>,
}

/// Wire format each exchange uses in subscribe requests.
#[must_use]
pub fn wire_format(exchange: ExchangeId) -> WireFormat {
    match exchange {
        ExchangeId::Binance => WireFormat::ConcatenatedLower,
        ExchangeId::Bybit => WireFormat::Concatenated,
        ExchangeId::Okx => WireFormat::Hyphenated,
    }
}

/// Parses `input` as spelled on `exchange`, or as canonical when `None`.
///
/// # Errors
/// Returns an error when the symbol cannot be split into base and quote.
pub fn normalize(input: &str, exchange: Option<ExchangeId>) -> Result<Symbol> {
    let symbol = match exchange {
        Some(exchange) => Symbol::from_wire(input, wire_format(exchange)),
        None => Symbol::parse(input),
    };
    symbol.with_context(|| format!("cannot normalize {input:?}"))
}

/// Prints the canonical form and every exchange's wire form.
///
/// # Errors
/// Returns an error when the symbol cannot be normalized.
pub fn run_normalize(args: &NormalizeArgs) -> Result<()> {
    let symbol = normalize(&args.symbol, args.exchange)?;
    println!("canonical  {symbol}");
    for exchange in ExchangeId::ALL {
        println!(
            "{:<10} {}",
            exchange.as_str(),
            symbol.to_wire(wire_format(exchange))
        );
    }
    Ok(())
}

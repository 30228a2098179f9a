//! `check-config`: load the layered configuration, validate it and print it.

use anyhow::{bail, Result};
use clap::Args;
use cryptoarb_core::{AppConfig, ConfigLoader, DEFAULT_CONFIG_PATH};
use rust_decimal::Decimal;

#[derive(Args, Debug, Clone)]
pub struct CheckConfigArgs {
    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,
}

/// Problems that would keep the detector from producing meaningful output.
#[must_use]
pub fn validate(config: &AppConfig) -> Vec<String> {
    let mut problems = Vec::new();

    if config.symbols.is_empty() {
        problems.push("no symbols configured".to_string());
    }
    if config.exchanges.enabled().len() < 2 {
        problems.push("at least two exchanges must be enabled".to_string());
    }

    let detector = &config.detector;
    if detector.reference_notional <= Decimal::ZERO {
        problems.push("detector.reference_notional must be positive".to_string());
    }
    if detector.max_slippage_percent < Decimal::ZERO {
        problems.push("detector.max_slippage_percent must not be negative".to_string());
    }
    if detector.max_spread_percent <= Decimal::ZERO {
        problems.push("detector.max_spread_percent must be positive".to_string());
    }
    if detector.max_concurrent_detections == 0 {
        problems.push("detector.max_concurrent_detections must be at least 1".to_string());
    }

    if config.dedup.bucket_secs == 0 {
        problems.push("dedup.bucket_secs must be at least 1".to_string());
    }
    if config.aggregator.max_book_age_ms == 0 {
        problems.push("aggregator.max_book_age_ms must be positive".to_string());
    }

    for exchange in config.exchanges.enabled() {
        let feed = config.exchanges.get(exchange);
        let intervals = [
            ("ping_interval_ms", feed.ping_interval_ms),
            ("read_timeout_ms", feed.read_timeout_ms),
            ("health_check_interval_ms", feed.health_check_interval_ms),
            ("health_stale_threshold_ms", feed.health_stale_threshold_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                problems.push(format!("exchanges.{exchange}.{name} must be positive"));
            }
        }
        if feed.read_timeout_ms <= feed.ping_interval_ms {
            problems.push(format!(
                "exchanges.{exchange}: read_timeout_ms should exceed ping_interval_ms"
            ));
        }
    }

    for (name, fee) in &config.fees.trading {
        if *fee < Decimal::ZERO {
            problems.push(format!("fees.trading.{name} must not be negative"));
        }
    }

    problems
}

/// Prints the effective configuration as JSON.
///
/// # Errors
/// Returns an error when the file cannot be loaded or fails validation.
pub fn run_check_config(args: &CheckConfigArgs) -> Result<()> {
    let config = ConfigLoader::load_from(&args.config)?;
    println!("{}", serde_json::to_string_pretty(&config)?);

    let problems = validate(&config);
    if problems.is_empty() {
        tracing::info!(path = %args.config, "Configuration is valid");
        return Ok(());
    }
    for problem in &problems {
        tracing::error!(path = %args.config, "{problem}");
    }
    bail!("{} configuration problem(s) in {}", problems.len(), args.config)
}

//! `run`: stream books from every enabled exchange and report opportunities.
//!
//! ## Example Usage
//!
//! ```bash
//! # All configured symbols on all enabled exchanges
//! cargo run -p cryptoarb-cli -- run
//!
//! # Two symbols, Binance and OKX only, for one hour, JSON lines on stdout
//! cargo run -p cryptoarb-cli -- run --symbols BTC/USDT,ETH/USDT --exchanges binance,okx --duration 1h --json
//! ```

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, ValueEnum};
use cryptoarb_arbitrage::{
    ArbitrageDetector, ArbitrageOpportunity, ChannelNotifier, Deduplicator, FeeTable,
    InMemoryOpportunityRepository, OpportunityRepository, OrderBookAggregator,
};
use cryptoarb_core::{
    AppConfig, ConfigLoader, ConfigWatcher, DetectorConfig, ExchangeId, FeedAdapter, FeedConfig, Symbol,
    DEFAULT_CONFIG_PATH,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::commands::check_config::validate;
use crate::commands::duration::parse_duration;

/// Named detector threshold sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Preset {
    /// Higher profit and volume bars, tighter slippage
    Conservative,
    /// Lower bars, more candidates
    Aggressive,
}

impl Preset {
    /// Copies the preset's thresholds onto `detector`, keeping its other settings.
    fn apply(self, detector: &mut DetectorConfig) {
        let thresholds = match self {
            Self::Conservative => DetectorConfig::conservative(),
            Self::Aggressive => DetectorConfig::aggressive(),
        };
        detector.min_profit_percent = thresholds.min_profit_percent;
        detector.min_volume_24h = thresholds.min_volume_24h;
        detector.max_spread_percent = thresholds.max_spread_percent;
        detector.max_slippage_percent = thresholds.max_slippage_percent;
    }
}

/// Interval between periodic status lines.
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,

    /// Comma-separated symbols overriding the configured list (e.g. BTC/USDT,ETH/USDT)
    #[arg(long)]
    pub symbols: Option<String>,

    /// Comma-separated exchanges to enable (binance, bybit, okx)
    #[arg(long)]
    pub exchanges: Option<String>,

    /// Detector threshold preset applied over the configured values
    #[arg(long, value_enum)]
    pub preset: Option<Preset>,

    /// Minimum net profit percent; applied after any preset
    #[arg(long)]
    pub min_profit: Option<Decimal>,

    /// Duration to run (e.g. "30m", "4h"); runs until Ctrl+C when omitted
    #[arg(long)]
    pub duration: Option<String>,

    /// Print each opportunity as a JSON line on stdout
    #[arg(long)]
    pub json: bool,

    /// Disable reloading fee overrides when the config file changes
    #[arg(long)]
    pub no_watch: bool,
}

impl RunArgs {
    /// Applies command-line overrides on top of the loaded configuration.
    fn apply(&self, config: &mut AppConfig) -> Result<()> {
        if let Some(symbols) = &self.symbols {
            config.symbols = parse_symbols(symbols)?;
        }
        if let Some(exchanges) = &self.exchanges {
            let selected = parse_exchanges(exchanges)?;
            for exchange in ExchangeId::ALL {
                let enabled = selected.contains(&exchange);
                match exchange {
                    ExchangeId::Binance => config.exchanges.binance.enabled = enabled,
                    ExchangeId::Bybit => config.exchanges.bybit.enabled = enabled,
                    ExchangeId::Okx => config.exchanges.okx.enabled = enabled,
                }
            }
        }
        if let Some(preset) = self.preset {
            preset.apply(&mut config.detector);
        }
        if let Some(min_profit) = self.min_profit {
            config.detector.min_profit_percent = min_profit;
        }
        Ok(())
    }
}

/// Parses a comma-separated list of canonical symbols.
///
/// # Errors
/// Returns an error when the list is empty or any entry is malformed.
pub fn parse_symbols(s: &str) -> Result<Vec<Symbol>> {
    let mut symbols = Vec::new();
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let symbol = Symbol::parse(part).with_context(|| format!("invalid symbol {part:?}"))?;
        if !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }
    if symbols.is_empty() {
        bail!("no symbols given");
    }
    Ok(symbols)
}

/// Parses a comma-separated list of exchange names.
///
/// # Errors
/// Returns an error when any name is unknown.
pub fn parse_exchanges(s: &str) -> Result<Vec<ExchangeId>> {
    let mut exchanges = Vec::new();
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let exchange = part.parse::<ExchangeId>().map_err(|e| anyhow!(e))?;
        if !exchanges.contains(&exchange) {
            exchanges.push(exchange);
        }
    }
    Ok(exchanges)
}

fn build_feed(exchange: ExchangeId, config: FeedConfig) -> Arc<dyn FeedAdapter> {
    match exchange {
        ExchangeId::Binance => Arc::new(cryptoarb_binance::feed(config)),
        ExchangeId::Bybit => Arc::new(cryptoarb_bybit::feed(config)),
        ExchangeId::Okx => Arc::new(cryptoarb_okx::feed(config)),
    }
}

fn report(opportunity: &ArbitrageOpportunity, json: bool) {
    if json {
        match serde_json::to_string(opportunity) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "Failed to serialize opportunity"),
        }
    } else {
        println!("{opportunity}");
    }
}

fn log_status(aggregator: &OrderBookAggregator, detector: &ArbitrageDetector) {
    for adapter in aggregator.adapters() {
        let stats = adapter.stats();
        tracing::info!(
            exchange = %adapter.exchange(),
            state = %adapter.state(),
            messages = stats.messages,
            book_updates = stats.book_updates,
            parse_errors = stats.parse_errors,
            reconnects = stats.reconnects,
            resyncs = stats.resyncs,
            "Feed status"
        );
    }
    let stats = detector.stats();
    tracing::info!(
        runs = stats.runs,
        emitted = stats.emitted,
        duplicates = stats.duplicates,
        not_crossed = stats.not_crossed,
        filtered = stats.filtered,
        "Detector status"
    );
}

/// Runs the detector until Ctrl+C or the duration limit.
///
/// # Errors
/// Returns an error when the configuration is invalid or no exchange connects.
pub async fn run_arbitrage(args: RunArgs) -> Result<()> {
    let mut config = ConfigLoader::load_from(&args.config)?;
    args.apply(&mut config)?;
    let run_duration = args.duration.as_deref().map(parse_duration).transpose()?;

    let problems = validate(&config);
    if !problems.is_empty() {
        for problem in &problems {
            tracing::error!(path = %args.config, "{problem}");
        }
        bail!("{} configuration problem(s) in {}", problems.len(), args.config);
    }
    let exchanges = config.exchanges.enabled();
    tracing::info!(
        symbols = ?config.symbols.iter().map(ToString::to_string).collect::<Vec<_>>(),
        exchanges = ?exchanges,
        min_profit_percent = %config.detector.min_profit_percent,
        "Starting arbitrage detector"
    );

    let fees = Arc::new(FeeTable::with_overrides(&config.fees));
    let aggregator = Arc::new(OrderBookAggregator::from_config(&config.aggregator));
    for exchange in &exchanges {
        aggregator.register(build_feed(
            *exchange,
            config.exchanges.get(*exchange).clone(),
        ));
    }

    let dedup = Arc::new(Deduplicator::from_config(&config.dedup));
    let (stop_tx, stop_rx) = watch::channel(false);
    let sweeper = dedup.spawn_sweeper(config.dedup.sweep_interval(), stop_rx.clone());

    let repository = Arc::new(InMemoryOpportunityRepository::new());
    let repository_sweeper = repository.spawn_sweeper(config.dedup.sweep_interval(), stop_rx);
    let detector = Arc::new(ArbitrageDetector::new(
        Arc::clone(&aggregator),
        Arc::clone(&fees),
        dedup,
        repository.clone(),
        config.detector.clone(),
    ));
    let (notifier, mut opportunities) = ChannelNotifier::new(config.notifications.buffer_size);
    detector.on_opportunity(notifier.callback());
    detector.start();

    let (watcher, mut config_rx) = ConfigWatcher::new(&args.config, config.clone());
    let watcher_task = (!args.no_watch).then(|| {
        tokio::spawn(async move {
            if let Err(e) = watcher.watch().await {
                tracing::warn!(path = %watcher.path().display(), error = %e, "Config watcher stopped");
            }
        })
    });

    let connected = aggregator.connect_all(&config.symbols).await;
    if connected.is_empty() {
        let _ = stop_tx.send(true);
        bail!("no exchange could be connected");
    }
    tracing::info!(connected = ?connected, "Feeds connected, press Ctrl+C to stop");

    let started = Instant::now();
    let deadline = async {
        match run_duration {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);
    let mut status = tokio::time::interval(STATUS_INTERVAL);
    status.tick().await;
    let mut watching = watcher_task.is_some();

    loop {
        tokio::select! {
            Some(opportunity) = opportunities.recv() => {
                report(&opportunity, args.json);
                repository.mark_notified(&opportunity.external_id);
            }
            changed = config_rx.changed(), if watching => {
                if changed.is_err() {
                    watching = false;
                    continue;
                }
                let updated = config_rx.borrow_and_update().clone();
                fees.apply_overrides(&updated.fees);
                tracing::info!("Fee overrides reloaded");
            }
            _ = status.tick() => log_status(&aggregator, &detector),
            () = &mut deadline => {
                tracing::info!("Duration limit reached, stopping...");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                break;
            }
        }
    }

    aggregator.disconnect_all().await;
    let _ = stop_tx.send(true);
    let _ = sweeper.await;
    let _ = repository_sweeper.await;
    if let Some(task) = watcher_task {
        task.abort();
    }

    log_status(&aggregator, &detector);
    tracing::info!(
        runtime_secs = started.elapsed().as_secs(),
        retained = repository.len(),
        active = repository.count_active().await.unwrap_or(0),
        dropped_notifications = notifier.dropped(),
        "Arbitrage detector stopped"
    );
    Ok(())
}

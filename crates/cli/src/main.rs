use clap::{Parser, Subcommand};

mod commands;

use commands::{CheckConfigArgs, NormalizeArgs, RunArgs};

#[derive(Parser)]
#[command(name = "cryptoarb")]
#[command(about = "Cross-exchange crypto arbitrage detector for Binance, Bybit and OKX", long_about = None)]
struct Cli {
    /// Optional log file path (logs to file instead of stderr)
    #[arg(long, global = true)]
    log_file: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream order books and report arbitrage opportunities
    Run(RunArgs),
    /// Load, validate and print the effective configuration
    CheckConfig(CheckConfigArgs),
    /// Convert an exchange symbol to canonical BASE/QUOTE form
    Normalize(NormalizeArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match &cli.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    match cli.command {
        Commands::Run(args) => commands::run_arbitrage(args).await?,
        Commands::CheckConfig(args) => commands::run_check_config(&args)?,
        Commands::Normalize(args) => commands::run_normalize(&args)?,
    }

    Ok(())
}

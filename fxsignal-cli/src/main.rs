//! FXSignal CLI: signal generation, API usage and cache management commands.
//!
//! Commands:
//! - `generate`: composite BUY/SELL/HOLD signals for a set of pairs
//! - `usage`: persisted per-provider call counts for a day
//! - `cache stats`: backend state and hit counters
//! - `cache clear`: drop cached entries, optionally by key prefix

mod service;

use anyhow::{bail, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use fxsignal_core::config::AppConfig;
use fxsignal_core::domain::TradingSignal;
use service::SignalService;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "fxsignal.toml";

#[derive(Parser)]
#[command(
    name = "fxsignal",
    about = "FXSignal CLI: composite forex signals over rate-limited market data"
)]
struct Cli {
    /// Path to a TOML config file. Defaults to ./fxsignal.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate signals for the given pairs (or the configured list).
    Generate {
        /// Pairs such as EURUSD or EUR/USD.
        pairs: Vec<String>,

        /// JSON file of externally computed component scores per pair and axis.
        #[arg(long)]
        components: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Show persisted API usage for a UTC day.
    Usage {
        /// Day (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        date: Option<String>,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Report backend, connection state and hit counters.
    Stats,
    /// Remove cached entries.
    Clear {
        /// Only keys starting with this prefix (within the cache namespace).
        #[arg(long)]
        prefix: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config);

    match cli.command {
        Commands::Generate {
            pairs,
            components,
            format,
        } => run_generate(config, pairs, components.as_deref(), format),
        Commands::Usage { date } => run_usage(config, date.as_deref()),
        Commands::Cache { action } => match action {
            CacheAction::Stats => run_cache_stats(config),
            CacheAction::Clear { prefix } => run_cache_clear(config, prefix.as_deref()),
        },
    }
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => Ok(AppConfig::from_file(path)?),
        None if Path::new(DEFAULT_CONFIG).exists() => {
            Ok(AppConfig::from_file(Path::new(DEFAULT_CONFIG))?)
        }
        None => Ok(AppConfig::default()),
    }
}

/// Logs go to stderr so `--format json` output stays machine-readable.
fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run_generate(
    config: AppConfig,
    pairs: Vec<String>,
    components: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let pairs = if pairs.is_empty() {
        config.pairs.clone()
    } else {
        pairs
    };
    if pairs.is_empty() {
        bail!("no pairs given and none configured");
    }
    if components.is_none() {
        tracing::warn!("no --components snapshot given; every axis will report as failed");
    }

    let service = SignalService::build(config)?;
    let generator = service.generator(components)?;
    let signals = generator.generate_signals(&pairs[..]);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&signals)?),
        OutputFormat::Text => print_signals(&signals),
    }

    for (name, stats) in service.fetcher.pipeline().breakers().stats() {
        tracing::debug!(
            provider = %name,
            state = ?stats.state,
            calls = stats.total_calls,
            failures = stats.failures,
            "breaker"
        );
    }
    Ok(())
}

fn run_usage(config: AppConfig, date: Option<&str>) -> Result<()> {
    let date = match date {
        Some(d) => NaiveDate::parse_from_str(d, "%Y-%m-%d")?,
        None => chrono::Utc::now().date_naive(),
    };
    let service = SignalService::build(config)?;
    let record = service.usage.load(date)?;

    println!("API usage for {date} ({})", service.usage.path_for(date).display());
    if record.is_empty() {
        println!("No calls recorded.");
        return Ok(());
    }

    let limits = service.config.effective_rate_limits();
    println!("{:<16} {:>8} {:>10}", "Provider", "Calls", "Daily cap");
    println!("{}", "-".repeat(36));
    for (provider, calls) in &record {
        let cap = limits
            .rules_for(provider)
            .iter()
            .find(|r| r.kind == fxsignal_core::resilience::LimitKind::Daily)
            .map(|r| r.limit.to_string())
            .unwrap_or_else(|| "-".into());
        println!("{provider:<16} {calls:>8} {cap:>10}");
    }
    Ok(())
}

fn run_cache_stats(config: AppConfig) -> Result<()> {
    let service = SignalService::build(config)?;
    // Touch the backend so the connection state reflects reality.
    let _ = service.cache.get_raw("__ping__");
    let stats = service.cache.stats();

    println!("Remote:    {}", stats.remote.as_deref().unwrap_or("(none)"));
    println!("Connected: {}", if stats.remote_connected { "yes" } else { "no" });
    println!(
        "Fallback:  {}/{} entries",
        stats.fallback_entries, stats.fallback_max_entries
    );
    println!(
        "Hits:      {} remote, {} fallback, {} misses",
        stats.remote_hits, stats.fallback_hits, stats.misses
    );
    Ok(())
}

fn run_cache_clear(config: AppConfig, prefix: Option<&str>) -> Result<()> {
    let service = SignalService::build(config)?;
    let removed = service.cache.clear(prefix);
    match prefix {
        Some(p) => println!("Removed {removed} entries with prefix '{p}'."),
        None => println!("Removed {removed} entries."),
    }
    Ok(())
}

fn print_signals(signals: &BTreeMap<String, TradingSignal>) {
    println!();
    println!(
        "{:<8} {:<5} {:>6} {:>7} {:>10} {:>10} {:>10} {:>6}",
        "Pair", "Act", "Conf", "Score", "Entry", "Exit", "Stop", "Prob"
    );
    println!("{}", "-".repeat(70));
    for s in signals.values() {
        let price = |p: Option<f64>| p.map(|v| format!("{v:.5}")).unwrap_or_else(|| "-".into());
        println!(
            "{:<8} {:<5} {:>6.2} {:>7.3} {:>10} {:>10} {:>10} {:>5.0}%",
            s.pair,
            s.action.to_string(),
            s.confidence,
            s.signal_strength,
            price(s.entry_price),
            price(s.exit_price),
            price(s.stop_loss),
            s.achievement_probability * 100.0
        );
    }

    let errors: Vec<&TradingSignal> = signals.values().filter(|s| s.is_error()).collect();
    if !errors.is_empty() {
        println!();
        for s in errors {
            println!("WARNING: {}: {}", s.pair, s.error.as_deref().unwrap_or(""));
        }
    }
    if let Some(s) = signals.values().next() {
        println!();
        println!("Session: {:?} (x{:.1}), expires {}", s.session, s.session_multiplier, s.expires_at);
    }
    println!();
}

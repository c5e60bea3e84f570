use anyhow::{Context, Result};
use clap::Parser;
use quorum_oracle::modules::cli::{Cli, CliCommand, ConfigAction};
use quorum_oracle::modules::config::{self, AppConfig};
use quorum_oracle::modules::engine::AggregationOptions;
use quorum_oracle::modules::ingestor::{Ingestor, MockIngestor};
use quorum_oracle::modules::normalizer::{self, RawQuote};
use quorum_oracle::modules::publisher::{MockPublisher, Publisher};
use quorum_oracle::modules::scheduler::{Scheduler, TickSource};
use quorum_oracle::modules::weights::SourceWeightRegistry;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    config::init_config().context("failed to load configuration")?;
    let cfg = config::get_config().context("configuration not initialized")?;
    init_tracing(&cfg.log_level);

    let cli = Cli::parse();
    match cli.command {
        CliCommand::RunOnce { symbols } => run_once(cfg, symbols).await?,
        CliCommand::Start {
            interval_millis,
            cron,
        } => start(cfg, interval_millis, cron).await?,
        CliCommand::Config { action } => match action {
            ConfigAction::Show => print_config(cfg),
        },
        CliCommand::NormalizeCheck { source, symbol } => normalize_check(&source, &symbol)?,
    }

    Ok(())
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn resolved_symbols(cfg: &AppConfig, overrides: Vec<String>) -> Vec<String> {
    if !overrides.is_empty() {
        overrides
    } else {
        cfg.stock_symbols.clone()
    }
}

fn build_options(cfg: &AppConfig) -> AggregationOptions {
    AggregationOptions {
        min_sources: cfg.min_sources,
        window_millis: cfg.window_millis,
        method: cfg.default_method,
        trim_fraction: cfg.trim_fraction,
        source_weight_overrides: std::collections::HashMap::new(),
    }
}

/// Recognized, distinct source identifiers cycled through when seeding the
/// zero-config mock ingestor set, so each slot dispatches to a different
/// `NormalizerKind` instead of every ingestor reporting as `"mock"`.
const DEFAULT_MOCK_SOURCES: [&str; 4] = ["alphavantage", "finnhub", "yahoofinance", "mock"];

/// Builds the default ingestor set. Real provider clients are outside
/// this core's scope; a pool of zero-config mock ingestors stands in,
/// one per distinct source, sized to at least `min_sources` so `run-once`/
/// `start` actually produce a consensus price out of the box instead of
/// failing every symbol with `InsufficientSources` against the default
/// `MIN_SOURCES = 3`.
fn default_ingestors(symbols: &[String], min_sources: usize) -> Vec<Arc<dyn Ingestor>> {
    let now = chrono::Utc::now().timestamp_millis();
    let provider_count = min_sources.max(1);
    (0..provider_count)
        .map(|i| {
            let source = DEFAULT_MOCK_SOURCES[i % DEFAULT_MOCK_SOURCES.len()];
            let quotes: Vec<RawQuote> = symbols
                .iter()
                .map(|symbol| RawQuote {
                    symbol: symbol.clone(),
                    price: 100.0 + i as f64,
                    timestamp: now,
                    source: source.to_string(),
                })
                .collect();
            Arc::new(MockIngestor::new(format!("{source}-{i}"), quotes)) as Arc<dyn Ingestor>
        })
        .collect()
}

fn default_publisher() -> Arc<dyn Publisher> {
    Arc::new(MockPublisher::new("mock"))
}

async fn run_once(cfg: &AppConfig, symbol_overrides: Vec<String>) -> Result<()> {
    let symbols = resolved_symbols(cfg, symbol_overrides);
    let registry = SourceWeightRegistry::new(
        cfg.source_weights
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect::<Vec<_>>(),
    );
    let scheduler = Scheduler::new(
        default_ingestors(&symbols, cfg.min_sources),
        default_publisher(),
        symbols,
        build_options(cfg),
        registry,
        Default::default(),
    );
    let results = scheduler.run_once().await;
    for (symbol, consensus) in &results {
        info!(
            symbol = %symbol,
            price = consensus.price,
            confidence = consensus.confidence,
            "consensus price computed"
        );
    }
    Ok(())
}

async fn start(cfg: &AppConfig, interval_millis: Option<u64>, cron: Option<String>) -> Result<()> {
    let symbols = resolved_symbols(cfg, Vec::new());
    let registry = SourceWeightRegistry::new(
        cfg.source_weights
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect::<Vec<_>>(),
    );
    let cron_expr = cron.or_else(|| cfg.cron_expression.clone());
    let interval = interval_millis
        .or(cfg.fetch_interval_millis)
        .or_else(|| cron_expr.is_none().then_some(cfg.effective_fetch_interval_millis()));
    let tick_source = TickSource::resolve(interval, cron_expr.as_deref())
        .context("failed to resolve scheduler tick source")?;

    let scheduler = Scheduler::new(
        default_ingestors(&symbols, cfg.min_sources),
        default_publisher(),
        symbols,
        build_options(cfg),
        registry,
        Default::default(),
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::select! {
        _ = scheduler.start(tick_source) => {}
        _ = ctrl_c => {
            info!("received interrupt, stopping scheduler");
            scheduler.stop();
        }
    }
    Ok(())
}

fn print_config(cfg: &AppConfig) {
    println!(
        "fetch_interval_millis = {} (effective: {})",
        cfg.fetch_interval_millis
            .map(|v| v.to_string())
            .unwrap_or_else(|| "unset".to_string()),
        cfg.effective_fetch_interval_millis()
    );
    println!("min_sources = {}", cfg.min_sources);
    println!("window_millis = {}", cfg.window_millis);
    println!("default_method = {}", cfg.default_method);
    println!("trim_fraction = {}", cfg.trim_fraction);
    println!("stock_symbols = {:?}", cfg.stock_symbols);
    println!("cron_expression = {:?}", cfg.cron_expression);
    println!("log_level = {}", cfg.log_level);
    println!("source_weights = {:?}", cfg.source_weights);
}

fn normalize_check(source: &str, symbol: &str) -> Result<()> {
    let raw = RawQuote {
        symbol: symbol.to_string(),
        price: 0.0,
        timestamp: chrono::Utc::now().timestamp_millis(),
        source: source.to_string(),
    };
    match normalizer::normalize(&raw) {
        Ok(canonical) => {
            println!("recognized source: {}", canonical.source);
            println!("rewritten symbol: {}", canonical.symbol);
        }
        Err(err) => {
            println!("normalization failed: {err}");
        }
    }
    Ok(())
}

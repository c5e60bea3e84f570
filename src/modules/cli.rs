//! CLI surface: a clap-derived command set exposing the oracle core's
//! operations. Scaled down from the teacher's builder-style, many-
//! subcommand CLI (config/resilience/cache/analytics subtrees) to the
//! four operations this core actually performs.

use crate::modules::aggregator::AggregationMethod;
use clap::{Parser, Subcommand};
use std::str::FromStr;

#[derive(Debug, Parser)]
#[command(
    name = "quorum-oracle",
    version,
    about = "Multi-source price consensus oracle"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Runs exactly one fetch-normalize-aggregate-commit-publish cycle
    /// and exits.
    RunOnce {
        /// Symbols to fetch. Defaults to the configured STOCK_SYMBOLS.
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,
    },
    /// Starts the scheduler and runs until interrupted.
    Start {
        /// Fixed interval between cycles, in milliseconds. Wins over
        /// `--cron` if both are supplied.
        #[arg(long)]
        interval_millis: Option<u64>,
        /// Cron expression driving cycle timing.
        #[arg(long)]
        cron: Option<String>,
    },
    /// Prints the resolved configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Normalizes a single raw symbol/source pair and prints the result,
    /// without fetching or aggregating anything.
    NormalizeCheck {
        #[arg(long)]
        source: String,
        #[arg(long)]
        symbol: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Shows the currently loaded configuration.
    Show,
}

/// Parses a `DEFAULT_METHOD`-shaped CLI override into an
/// [`AggregationMethod`], surfacing the same error clap would report for
/// any other malformed argument.
pub fn parse_method(raw: &str) -> Result<AggregationMethod, String> {
    AggregationMethod::from_str(raw).map_err(|err| err.to_string())
}

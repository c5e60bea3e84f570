//! Configuration: environment-driven settings loaded once at process
//! start. Grounded in the teacher's `AppConfig::from_env_with_dotenv` /
//! `OnceCell<AppConfig>` / `ConfigError` pattern, generalized to load the
//! full set of scheduling and aggregation knobs this core exposes instead
//! of the teacher's API-key/wallet-path set.

use crate::modules::aggregator::AggregationMethod;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;

/// Default `FETCH_INTERVAL_MILLIS` applied only when neither an interval
/// nor a cron expression was explicitly configured.
pub const DEFAULT_FETCH_INTERVAL_MILLIS: u64 = 60_000;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// `None` when `FETCH_INTERVAL_MILLIS` was not explicitly set, so the
    /// scheduler can tell "defaulted" apart from "explicitly configured"
    /// and let an explicitly configured `CRON_EXPRESSION` take over —
    /// interval only wins when it was actually set, per the spec's "interval
    /// wins if both are set" rule.
    pub fetch_interval_millis: Option<u64>,
    pub min_sources: usize,
    pub window_millis: i64,
    pub default_method: AggregationMethod,
    pub trim_fraction: f64,
    pub source_weights: HashMap<String, f64>,
    pub stock_symbols: Vec<String>,
    pub cron_expression: Option<String>,
    pub log_level: String,
}

impl AppConfig {
    /// Load configuration from environment variables, reading a `.env`
    /// file first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_dotenv(true)
    }

    /// Load configuration from environment variables with dotenv control,
    /// so tests can exercise env-var precedence without a stray `.env`
    /// file in the working directory leaking in.
    pub fn from_env_with_dotenv(load_dotenv: bool) -> Result<Self, ConfigError> {
        if load_dotenv {
            dotenv::dotenv().ok();
        }

        let fetch_interval_millis = match env::var("FETCH_INTERVAL_MILLIS") {
            Ok(raw) => Some(raw.parse::<u64>().map_err(|_| {
                ConfigError::InvalidValue("FETCH_INTERVAL_MILLIS".to_string(), raw)
            })?),
            Err(_) => None,
        };
        let min_sources = parse_env("MIN_SOURCES", 3usize)?;
        let window_millis = parse_env("WINDOW_MILLIS", 30_000i64)?;

        let default_method = match env::var("DEFAULT_METHOD") {
            Ok(raw) => AggregationMethod::from_str(&raw)
                .map_err(|_| ConfigError::InvalidValue("DEFAULT_METHOD".to_string(), raw))?,
            Err(_) => AggregationMethod::WeightedMean,
        };

        let trim_fraction = parse_env("TRIM_FRACTION", 0.20f64)?;
        if !(0.0..0.5).contains(&trim_fraction) {
            return Err(ConfigError::InvalidValue(
                "TRIM_FRACTION".to_string(),
                trim_fraction.to_string(),
            ));
        }

        let source_weights = scan_source_weights()?;

        let stock_symbols = env::var("STOCK_SYMBOLS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let cron_expression = env::var("CRON_EXPRESSION").ok().filter(|s| !s.is_empty());
        if let Some(expr) = &cron_expression {
            cron::Schedule::from_str(expr)
                .map_err(|_| ConfigError::InvalidValue("CRON_EXPRESSION".to_string(), expr.clone()))?;
        }

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(AppConfig {
            fetch_interval_millis,
            min_sources,
            window_millis,
            default_method,
            trim_fraction,
            source_weights,
            stock_symbols,
            cron_expression,
            log_level,
        })
    }

    /// Validates cross-field invariants that can't be checked while
    /// parsing a single variable in isolation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_sources == 0 {
            return Err(ConfigError::InvalidValue(
                "MIN_SOURCES".to_string(),
                "0".to_string(),
            ));
        }
        if let Some(millis) = self.fetch_interval_millis {
            if millis < 1000 {
                return Err(ConfigError::InvalidValue(
                    "FETCH_INTERVAL_MILLIS".to_string(),
                    millis.to_string(),
                ));
            }
        }
        if self.window_millis < 1000 {
            return Err(ConfigError::InvalidValue(
                "WINDOW_MILLIS".to_string(),
                self.window_millis.to_string(),
            ));
        }
        Ok(())
    }

    /// The interval actually used when no cron expression is configured
    /// either: an explicit `FETCH_INTERVAL_MILLIS`, or the spec's default.
    pub fn effective_fetch_interval_millis(&self) -> u64 {
        self.fetch_interval_millis
            .unwrap_or(DEFAULT_FETCH_INTERVAL_MILLIS)
    }
}

/// Scans the environment for `SOURCE_WEIGHT_<NAME>` entries and builds a
/// source-name-to-weight map. Malformed (non-numeric) values are skipped
/// rather than failing config load, since a single bad override shouldn't
/// block startup. A negative weight, however, is an out-of-range value per
/// the spec's `SOURCE_WEIGHT_<NAME>: real ≥ 0` contract and is rejected at
/// load time rather than silently dropped later by
/// `SourceWeightRegistry::new`.
fn scan_source_weights() -> Result<HashMap<String, f64>, ConfigError> {
    let mut weights = HashMap::new();
    for (key, value) in env::vars() {
        if let Some(source) = key.strip_prefix("SOURCE_WEIGHT_") {
            match value.parse::<f64>() {
                Ok(weight) if weight >= 0.0 => {
                    weights.insert(source.to_lowercase(), weight);
                }
                Ok(_) => {
                    return Err(ConfigError::InvalidValue(key, value));
                }
                Err(_) => {
                    tracing::warn!(key = %key, value = %value, "ignoring malformed SOURCE_WEIGHT_* override");
                }
            }
        }
    }
    Ok(weights)
}

fn parse_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), raw)),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {0}: '{1}'")]
    InvalidValue(String, String),

    #[error("configuration already initialized")]
    AlreadyInitialized,

    #[error("configuration not initialized")]
    NotInitialized,
}

static CONFIG: OnceCell<AppConfig> = OnceCell::new();

/// Initializes the global configuration singleton. Called once from
/// `main`; any later call (or a concurrent one) fails rather than
/// silently overwriting an already-running configuration.
pub fn init_config() -> Result<(), ConfigError> {
    let config = AppConfig::from_env()?;
    config.validate()?;
    CONFIG.set(config).map_err(|_| ConfigError::AlreadyInitialized)
}

/// Reads the global configuration singleton.
pub fn get_config() -> Result<&'static AppConfig, ConfigError> {
    CONFIG.get().ok_or(ConfigError::NotInitialized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "FETCH_INTERVAL_MILLIS",
            "MIN_SOURCES",
            "WINDOW_MILLIS",
            "DEFAULT_METHOD",
            "TRIM_FRACTION",
            "STOCK_SYMBOLS",
            "CRON_EXPRESSION",
            "LOG_LEVEL",
            "SOURCE_WEIGHT_ALPHA_VANTAGE",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn defaults_apply_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let config = AppConfig::from_env_with_dotenv(false).unwrap();
        assert_eq!(config.fetch_interval_millis, None);
        assert_eq!(config.effective_fetch_interval_millis(), 60_000);
        assert_eq!(config.min_sources, 3);
        assert_eq!(config.window_millis, 30_000);
        assert_eq!(config.default_method, AggregationMethod::WeightedMean);
        assert!((config.trim_fraction - 0.20).abs() < 1e-9);
        assert!(config.stock_symbols.is_empty());
        assert!(config.cron_expression.is_none());
        assert_eq!(config.log_level, "info");
        clear_env();
    }

    #[test]
    fn stock_symbols_are_split_trimmed_and_empties_dropped() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("STOCK_SYMBOLS", " AAPL, GOOGL ,, MSFT");
        let config = AppConfig::from_env_with_dotenv(false).unwrap();
        assert_eq!(config.stock_symbols, vec!["AAPL", "GOOGL", "MSFT"]);
        clear_env();
    }

    #[test]
    fn invalid_trim_fraction_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("TRIM_FRACTION", "0.5");
        let err = AppConfig::from_env_with_dotenv(false).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_, _)));
        clear_env();
    }

    #[test]
    fn invalid_cron_expression_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("CRON_EXPRESSION", "not a cron expression");
        let err = AppConfig::from_env_with_dotenv(false).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_, _)));
        clear_env();
    }

    #[test]
    fn explicit_fetch_interval_is_preserved_distinct_from_default() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("FETCH_INTERVAL_MILLIS", "5000");
        let config = AppConfig::from_env_with_dotenv(false).unwrap();
        assert_eq!(config.fetch_interval_millis, Some(5_000));
        assert_eq!(config.effective_fetch_interval_millis(), 5_000);
        clear_env();
    }

    #[test]
    fn source_weight_prefix_is_scanned_case_insensitively() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("SOURCE_WEIGHT_ALPHA_VANTAGE", "2.5");
        let config = AppConfig::from_env_with_dotenv(false).unwrap();
        assert_eq!(config.source_weights.get("alpha_vantage"), Some(&2.5));
        clear_env();
    }

    #[test]
    fn min_sources_zero_fails_validation() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("MIN_SOURCES", "0");
        let config = AppConfig::from_env_with_dotenv(false).unwrap();
        assert!(config.validate().is_err());
        clear_env();
    }

    #[test]
    fn fetch_interval_below_floor_fails_validation() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("FETCH_INTERVAL_MILLIS", "999");
        let config = AppConfig::from_env_with_dotenv(false).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_, _))));
        clear_env();
    }

    #[test]
    fn window_millis_below_floor_fails_validation() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("WINDOW_MILLIS", "500");
        let config = AppConfig::from_env_with_dotenv(false).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_, _))));
        clear_env();
    }

    #[test]
    fn window_millis_at_floor_passes_validation() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("WINDOW_MILLIS", "1000");
        let config = AppConfig::from_env_with_dotenv(false).unwrap();
        assert!(config.validate().is_ok());
        clear_env();
    }

    #[test]
    fn negative_source_weight_is_rejected_at_load_time() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("SOURCE_WEIGHT_ALPHA_VANTAGE", "-5");
        let err = AppConfig::from_env_with_dotenv(false).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_, _)));
        clear_env();
    }
}

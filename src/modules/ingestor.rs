//! Ingestor collaborator: the external interface contract for pulling raw
//! quotes into the core. Concrete HTTP/WebSocket clients for individual
//! providers are explicitly out of scope (see SPEC_FULL.md §1) — this
//! module defines the trait the scheduler drives and a [`MockIngestor`]
//! used by the CLI's `run-once` fallback and throughout the test suite,
//! grounded in the teacher's `ApiProvider::CoinPaprika` free-tier default
//! (a zero-config, always-available provider used when no real credentials
//! are configured).

use crate::modules::normalizer::RawQuote;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::Receiver;
use tracing::warn;

#[derive(Debug, Error)]
pub enum IngestorError {
    #[error("ingestion timed out after {0:?}")]
    Timeout(Duration),
    #[error("provider error: {0}")]
    ProviderError(String),
}

/// Uniform adapter every concrete ingestor implements. A streaming
/// ingestor additionally overrides [`Ingestor::stream`]; the default
/// returns `None`, meaning the scheduler only ever polls `fetch_quotes`
/// for that collaborator.
#[async_trait]
pub trait Ingestor: Send + Sync {
    /// A stable identifier used in logs and resilience metrics.
    fn name(&self) -> &str;

    /// Pulls a batch of raw quotes for `symbols`. Implementations are
    /// expected to be wrapped in the retry/backoff utility by the
    /// scheduler, not to retry internally.
    async fn fetch_quotes(&self, symbols: &[String]) -> Result<Vec<RawQuote>, IngestorError>;

    /// Optional streaming channel of raw-quote events. Returns `None` by
    /// default; a streaming provider overrides this to hand back the
    /// receiving end of a channel it owns and feeds.
    fn stream(&self) -> Option<Receiver<RawQuote>> {
        None
    }
}

/// Converts a streaming payload into a [`RawQuote`], dropping malformed
/// payloads with a logged validation error rather than propagating them,
/// per the spec's "malformed payloads are dropped with a logged
/// validation error" contract.
pub fn accept_stream_event<T, E>(ingestor_name: &str, event: Result<T, E>) -> Option<RawQuote>
where
    T: TryInto<RawQuote>,
    <T as TryInto<RawQuote>>::Error: std::fmt::Display,
    E: std::fmt::Display,
{
    match event {
        Ok(payload) => match payload.try_into() {
            Ok(raw) => Some(raw),
            Err(err) => {
                warn!(ingestor = ingestor_name, error = %err, "dropped malformed streaming payload");
                None
            }
        },
        Err(err) => {
            warn!(ingestor = ingestor_name, error = %err, "streaming channel error");
            None
        }
    }
}

/// A deterministic, zero-config ingestor that serves a fixed quote set.
/// Used by `run-once` when no real provider is configured, and as the
/// default fixture for engine/scheduler tests.
pub struct MockIngestor {
    name: String,
    quotes: Vec<RawQuote>,
}

impl MockIngestor {
    pub fn new(name: impl Into<String>, quotes: Vec<RawQuote>) -> Self {
        Self {
            name: name.into(),
            quotes,
        }
    }
}

#[async_trait]
impl Ingestor for MockIngestor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_quotes(&self, symbols: &[String]) -> Result<Vec<RawQuote>, IngestorError> {
        if symbols.is_empty() {
            return Ok(self.quotes.clone());
        }
        Ok(self
            .quotes
            .iter()
            .filter(|q| symbols.iter().any(|s| s.eq_ignore_ascii_case(&q.symbol)))
            .cloned()
            .collect())
    }
}

/// An ingestor stub that always fails, used to exercise the scheduler's
/// per-ingestor failure tolerance in tests.
pub struct FailingIngestor {
    name: String,
}

impl FailingIngestor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Ingestor for FailingIngestor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_quotes(&self, _symbols: &[String]) -> Result<Vec<RawQuote>, IngestorError> {
        Err(IngestorError::ProviderError(
            "simulated provider failure".to_string(),
        ))
    }
}

//! Fetch Orchestrator/Scheduler: drives periodic (interval or cron)
//! fetch-normalize-aggregate-commit-publish cycles. Grounded in the
//! teacher's `DataProcessor`/polling-loop orchestration, restructured
//! around explicit single-flight and cooperative cancellation rather
//! than ambient timer callbacks, per the spec's redesign note.

use crate::modules::cache::LastValueCache;
use crate::modules::commitment::{commit, CommitmentInput};
use crate::modules::engine::{self, AggregationOptions, ConsensusPrice};
use crate::modules::ingestor::{Ingestor, IngestorError};
use crate::modules::normalizer::{self, CanonicalQuote, RawQuote};
use crate::modules::publisher::{publish_and_log, PublishRequest, Publisher};
use crate::modules::resilience::ResilienceRegistry;
use crate::modules::retry::{self, RetryPolicy};
use crate::modules::weights::SourceWeightRegistry;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler is already running")]
    AlreadyRunning,
    #[error("invalid cron expression: {0}")]
    InvalidCronExpression(String),
}

/// Either a fixed interval or a cron schedule drives ticks. The spec says
/// interval wins when both are configured, so the scheduler is
/// constructed with one resolved [`TickSource`], not both knobs.
pub enum TickSource {
    Interval(Duration),
    Cron(cron::Schedule),
}

impl TickSource {
    /// Resolves the configured knobs per the "interval wins" rule.
    pub fn resolve(
        interval_millis: Option<u64>,
        cron_expression: Option<&str>,
    ) -> Result<Self, SchedulerError> {
        if let Some(millis) = interval_millis {
            return Ok(TickSource::Interval(Duration::from_millis(millis)));
        }
        if let Some(expr) = cron_expression {
            let schedule = cron::Schedule::from_str(expr)
                .map_err(|_| SchedulerError::InvalidCronExpression(expr.to_string()))?;
            return Ok(TickSource::Cron(schedule));
        }
        Err(SchedulerError::InvalidCronExpression(
            "neither an interval nor a cron expression was supplied".to_string(),
        ))
    }

    /// Duration to sleep before the next tick, computed relative to now
    /// for cron sources.
    fn next_delay(&self) -> Duration {
        match self {
            TickSource::Interval(duration) => *duration,
            TickSource::Cron(schedule) => {
                let now = chrono::Utc::now();
                schedule
                    .upcoming(chrono::Utc)
                    .next()
                    .map(|next| {
                        (next - now)
                            .to_std()
                            .unwrap_or_else(|_| Duration::from_secs(0))
                    })
                    .unwrap_or(Duration::from_secs(60))
            }
        }
    }
}

/// The scheduler's collaborators and tunables, assembled once at startup.
pub struct Scheduler {
    ingestors: Vec<Arc<dyn Ingestor>>,
    publisher: Arc<dyn Publisher>,
    symbols: Vec<String>,
    options: AggregationOptions,
    registry: SourceWeightRegistry,
    cache: LastValueCache,
    in_flight: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    cancellation: CancellationToken,
    retry_policy: RetryPolicy,
    ingestor_timeout: Duration,
    resilience: Arc<ResilienceRegistry>,
}

/// Default per-ingestor retry policy applied to every fetch: three total
/// attempts, exponential backoff starting at 500ms.
fn default_ingestor_retry_policy() -> RetryPolicy {
    RetryPolicy::exponential(3, 500)
}

/// Default overall timeout for a single ingestor call, per the spec's
/// concurrency model (§5).
const DEFAULT_INGESTOR_TIMEOUT: Duration = Duration::from_secs(10);

/// Safety margin subtracted from the tick interval to get a cycle's time
/// budget, per §5's "the cycle as a whole has an upper bound equal to
/// `intervalMillis - epsilon`".
const CYCLE_DEADLINE_EPSILON: Duration = Duration::from_millis(250);

/// `interval - epsilon`, floored at zero rather than underflowing when the
/// interval itself is shorter than the margin.
fn cycle_budget(interval: Duration) -> Duration {
    interval.checked_sub(CYCLE_DEADLINE_EPSILON).unwrap_or(Duration::ZERO)
}

/// Awaits `fut` under `budget` when one is given, returning `None` if the
/// budget elapses first; awaits it unbounded otherwise.
async fn run_with_optional_timeout<F, T>(budget: Option<Duration>, fut: F) -> Option<T>
where
    F: std::future::Future<Output = T>,
{
    match budget {
        Some(duration) => tokio::time::timeout(duration, fut).await.ok(),
        None => Some(fut.await),
    }
}

impl Scheduler {
    pub fn new(
        ingestors: Vec<Arc<dyn Ingestor>>,
        publisher: Arc<dyn Publisher>,
        symbols: Vec<String>,
        options: AggregationOptions,
        registry: SourceWeightRegistry,
        cache: LastValueCache,
    ) -> Self {
        Self {
            ingestors,
            publisher,
            symbols,
            options,
            registry,
            cache,
            in_flight: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            cancellation: CancellationToken::new(),
            retry_policy: default_ingestor_retry_policy(),
            ingestor_timeout: DEFAULT_INGESTOR_TIMEOUT,
            resilience: Arc::new(ResilienceRegistry::new()),
        }
    }

    /// Overrides the per-ingestor retry policy and timeout (defaults:
    /// three exponential-backoff attempts, 10 second timeout).
    pub fn with_ingestor_resilience(mut self, policy: RetryPolicy, timeout: Duration) -> Self {
        self.retry_policy = policy;
        self.ingestor_timeout = timeout;
        self
    }

    pub fn cache(&self) -> &LastValueCache {
        &self.cache
    }

    /// Snapshot of per-ingestor resilience metrics (consecutive failures,
    /// circuit state, success rate), for the debug/metrics surface.
    pub fn resilience_snapshot(
        &self,
    ) -> HashMap<String, crate::modules::resilience::IngestorMetrics> {
        self.resilience.snapshot()
    }

    /// Requests cooperative shutdown. Any in-flight cycle finishes before
    /// the run loop observes cancellation and returns.
    pub fn stop(&self) {
        self.cancellation.cancel();
    }

    /// Drives ticks from `tick_source` until [`Scheduler::stop`] is
    /// called. Per the spec, `runOnce` executes immediately on start, then
    /// recurs every tick thereafter. A tick that finds the previous cycle
    /// still running is skipped rather than queued — single-flight, per
    /// the spec. A second call while the first is still looping is a
    /// no-op with a warning, rather than starting a concurrent run loop.
    /// Each cycle is bounded to `interval - epsilon` and raced against
    /// `self.cancellation`, so `stop()` interrupts an in-flight cycle
    /// rather than only the idle wait between cycles.
    pub async fn start(&self, tick_source: TickSource) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("scheduler already running, ignoring start() call");
            return;
        }

        if !self.in_flight.swap(true, Ordering::SeqCst) {
            let budget = cycle_budget(tick_source.next_delay());
            self.run_cycle(Some(budget)).await;
            self.in_flight.store(false, Ordering::SeqCst);
        }

        loop {
            let delay = tick_source.next_delay();
            tokio::select! {
                _ = self.cancellation.cancelled() => {
                    info!("scheduler stopping");
                    self.running.store(false, Ordering::SeqCst);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            if self.in_flight.swap(true, Ordering::SeqCst) {
                warn!("previous cycle still running, skipping this tick");
                continue;
            }
            self.run_cycle(Some(cycle_budget(delay))).await;
            self.in_flight.store(false, Ordering::SeqCst);
        }
    }

    /// Runs exactly one fetch-normalize-aggregate-commit-publish cycle with
    /// no time budget and no cancellation (a standalone `run-once`
    /// invocation has no surrounding interval to respect and nothing else
    /// will call `stop()` mid-cycle). The scheduler's own run loop instead
    /// calls [`Scheduler::run_cycle`] with a bounded, cancellable budget.
    /// Never propagates a failure upward: a single ingestor outage or a
    /// single symbol's aggregation failure is logged and the cycle
    /// otherwise proceeds, per the scheduler's resilience contract.
    pub async fn run_once(&self) -> HashMap<String, ConsensusPrice> {
        self.run_cycle(None).await
    }

    /// Runs one cycle, optionally bounded by `budget` and always racing the
    /// scheduler's cancellation token: cancelling or exceeding the budget
    /// drops the in-flight fetch/aggregate/publish future, which releases
    /// every suspended ingestor call, commitment computation, and publish
    /// call it was waiting on — satisfying §5's "must be cancellable at any
    /// suspension point" without threading a token through each one by hand.
    async fn run_cycle(&self, budget: Option<Duration>) -> HashMap<String, ConsensusPrice> {
        let cycle = async {
            let raw_quotes = self.fetch_all().await;
            let (canonical, failures) = normalizer::normalize_batch(&raw_quotes);
            for failure in &failures {
                warn!(
                    source = %failure.raw.source,
                    symbol = %failure.raw.symbol,
                    error = %failure.error,
                    "dropping raw quote that failed normalization"
                );
            }

            let grouped = group_by_symbol(canonical);
            let results =
                engine::aggregate_many(&grouped, &self.options, &self.registry, &self.cache);

            for consensus in results.values() {
                self.commit_and_publish(consensus).await;
            }

            results
        };

        tokio::select! {
            _ = self.cancellation.cancelled() => {
                warn!("cycle cancelled before completion, discarding in-flight work");
                HashMap::new()
            }
            result = run_with_optional_timeout(budget, cycle) => {
                match result {
                    Some(results) => results,
                    None => {
                        warn!(?budget, "cycle exceeded its time budget, abandoning remaining work");
                        HashMap::new()
                    }
                }
            }
        }
    }

    /// Queries every configured ingestor concurrently, each call wrapped in
    /// a timeout and the bounded retry/backoff utility (§4.6), tolerating
    /// individual failures once retries are exhausted.
    async fn fetch_all(&self) -> Vec<RawQuote> {
        let futures = self.ingestors.iter().map(|ingestor| {
            let ingestor = Arc::clone(ingestor);
            let symbols = self.symbols.clone();
            let name = ingestor.name().to_string();
            let retry_policy = self.retry_policy;
            let timeout = self.ingestor_timeout;
            async move {
                let result = retry::retry(retry_policy, &name, || {
                    let ingestor = Arc::clone(&ingestor);
                    let symbols = symbols.clone();
                    async move {
                        match tokio::time::timeout(timeout, ingestor.fetch_quotes(&symbols)).await
                        {
                            Ok(inner) => inner,
                            Err(_) => Err(IngestorError::Timeout(timeout)),
                        }
                    }
                })
                .await;
                (name, result)
            }
        });
        let results = futures::future::join_all(futures).await;

        let mut quotes = Vec::new();
        for (name, result) in results {
            match result {
                Ok(batch) => {
                    self.resilience.record_success(&name);
                    quotes.extend(batch);
                }
                Err(err) => {
                    self.resilience.record_failure(&name);
                    warn!(
                        ingestor = %name,
                        error = %err,
                        "ingestor fetch failed after exhausting retries, continuing without it"
                    );
                }
            }
        }
        quotes
    }

    async fn commit_and_publish(&self, consensus: &ConsensusPrice) {
        let digest = commit(&CommitmentInput {
            asset_id: &consensus.symbol,
            price: consensus.price,
            timestamp: consensus.computed_at,
            proof_digest: None,
        });

        publish_and_log(
            self.publisher.as_ref(),
            PublishRequest {
                asset_id: consensus.symbol.clone(),
                price: consensus.price,
                timestamp: consensus.computed_at,
                commitment_digest: digest,
                proof_digest: None,
                proof_public_inputs: None,
            },
        )
        .await;
    }
}

fn group_by_symbol(quotes: Vec<CanonicalQuote>) -> HashMap<String, Vec<CanonicalQuote>> {
    let mut grouped: HashMap<String, Vec<CanonicalQuote>> = HashMap::new();
    for quote in quotes {
        grouped.entry(quote.symbol.clone()).or_default().push(quote);
    }
    grouped
}

//! Dark web search orchestration
//!
//! Fans a query out to every enabled engine through a bounded worker pool.
//! Each engine retries transient failures with jittered exponential backoff.
//! A single collector owns every counter and the result aggregate. It emits
//! progress events and closes the halt latch when either the early-exit
//! target or the failure-rate breaker fires.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use robin_core::{
    aggregate, jitter_rng, AttemptOutcome, DedupOrder, EngineAttempt, EngineBatch,
    EngineCatalog, EngineDescriptor, EventKind, ParseError, ProgressEvent, ProgressSink,
    ProgressStatus, ResultAggregator, RetryPolicy, RunCounters, SearchResult,
    DEFAULT_SEARCH_WORKERS, MAX_QUERY_LENGTH,
};

use crate::{FetchError, Gateway, HaltLatch, HaltSignal, OrchestratorError, WorkerPool};

/// Failure-rate guard for a search run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerPolicy {
    /// Trip when failed/completed is strictly above this ratio
    pub failure_threshold: f64,
    /// Completed engines required before the ratio is checked;
    /// `None` means half the engines, rounded up
    pub min_sample: Option<usize>,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 0.7,
            min_sample: None,
        }
    }
}

impl BreakerPolicy {
    pub fn min_sample_for(&self, total: usize) -> usize {
        self.min_sample.unwrap_or_else(|| total.div_ceil(2)).max(1)
    }

    pub fn should_trip(&self, completed: usize, failed: usize, total: usize) -> bool {
        if completed == 0 || completed < self.min_sample_for(total) {
            return false;
        }
        failed as f64 / completed as f64 > self.failure_threshold
    }
}

/// Search orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    pub max_workers: usize,
    /// Timeout for a single engine request
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub breaker: BreakerPolicy,
    /// Stop scheduling once this many unique results are in; `None` disables
    pub early_exit_results: Option<usize>,
    pub dedup_order: DedupOrder,
    /// Seed for backoff jitter
    pub rng_seed: Option<u64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_SEARCH_WORKERS,
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            breaker: BreakerPolicy::default(),
            early_exit_results: Some(20),
            dedup_order: DedupOrder::default(),
            rng_seed: None,
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.max_workers == 0 {
            return Err(OrchestratorError::Config("max_workers must be at least 1".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(OrchestratorError::Config("request_timeout must be positive".into()));
        }
        self.retry.validate().map_err(OrchestratorError::Config)?;
        if !(0.0..=1.0).contains(&self.breaker.failure_threshold) {
            return Err(OrchestratorError::Config(format!(
                "failure_threshold {} not in [0, 1]",
                self.breaker.failure_threshold
            )));
        }
        if self.breaker.min_sample == Some(0) {
            return Err(OrchestratorError::Config("min_sample must be at least 1".into()));
        }
        if self.early_exit_results == Some(0) {
            return Err(OrchestratorError::Config("early_exit_results must be at least 1".into()));
        }
        Ok(())
    }
}

/// Trim a query and check it is usable
pub fn validate_query(query: &str) -> Result<String, OrchestratorError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(OrchestratorError::InvalidQuery("query is empty".into()));
    }
    let len = query.chars().count();
    if len > MAX_QUERY_LENGTH {
        return Err(OrchestratorError::InvalidQuery(format!(
            "query is {len} characters, limit is {MAX_QUERY_LENGTH}"
        )));
    }
    Ok(query.to_string())
}

/// Final state of one engine in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    Success,
    Failed,
    Timeout,
    /// Never started because the run halted first
    Skipped,
}

/// Per-engine summary with its attempt history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineReport {
    pub engine: String,
    pub catalog_index: usize,
    pub status: EngineStatus,
    pub attempts: Vec<EngineAttempt>,
    pub results_count: usize,
    pub error: Option<String>,
}

/// Why a run stopped scheduling work early
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    EarlyExit,
    HighFailureRate,
}

/// Everything one search call produced
#[derive(Debug, Clone, Serialize)]
pub struct SearchRun {
    pub run_id: Uuid,
    pub query: String,
    /// Deduplicated results
    pub results: Vec<SearchResult>,
    /// Raw per-engine results in completion order
    pub batches: Vec<EngineBatch>,
    /// One report per enabled engine, in catalog order
    pub reports: Vec<EngineReport>,
    pub halted: Option<HaltReason>,
    pub elapsed: Duration,
}

impl SearchRun {
    fn count(&self, status: EngineStatus) -> usize {
        self.reports.iter().filter(|r| r.status == status).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(EngineStatus::Success)
    }

    pub fn failed(&self) -> usize {
        self.count(EngineStatus::Failed) + self.count(EngineStatus::Timeout)
    }

    pub fn skipped(&self) -> usize {
        self.count(EngineStatus::Skipped)
    }

    pub fn report(&self, engine: &str) -> Option<&EngineReport> {
        self.reports.iter().find(|r| r.engine == engine)
    }
}

/// Fans one query out to every enabled engine
pub struct SearchOrchestrator {
    gateway: Arc<dyn Gateway>,
    catalog: EngineCatalog,
    config: SearchConfig,
}

impl SearchOrchestrator {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        catalog: EngineCatalog,
        config: SearchConfig,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        Ok(Self {
            gateway,
            catalog,
            config,
        })
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn catalog(&self) -> &EngineCatalog {
        &self.catalog
    }

    /// Run one search
    ///
    /// Fails only when the query is unusable, no engine is enabled, or the
    /// proxy is unreachable; in those cases no engine is contacted and no
    /// event is emitted. Engine failures are reported in the returned run.
    pub async fn search(
        &self,
        query: &str,
        sink: &ProgressSink,
    ) -> Result<SearchRun, OrchestratorError> {
        let query = validate_query(query)?;
        let engines = self.catalog.all();
        if engines.is_empty() {
            return Err(OrchestratorError::Config("no search engines enabled".into()));
        }

        let run_id = Uuid::new_v4();
        let span = info_span!("search", %run_id, engines = engines.len());
        self.run(run_id, query, engines, sink).instrument(span).await
    }

    async fn run(
        &self,
        run_id: Uuid,
        query: String,
        engines: Vec<EngineDescriptor>,
        sink: &ProgressSink,
    ) -> Result<SearchRun, OrchestratorError> {
        if !self.gateway.probe().await {
            warn!("Tor proxy unreachable, not starting search");
            return Err(OrchestratorError::ProxyUnavailable(self.gateway.endpoint()));
        }

        let started = Instant::now();
        let total = engines.len();
        info!("Searching {} engines for: {}", total, query);

        sink.emit(ProgressEvent::run_level(
            EventKind::SearchProgress,
            ProgressStatus::Starting,
            RunCounters {
                total,
                ..Default::default()
            },
            format!("Starting search across {total} dark web engines..."),
        ));

        let jobs: Vec<EngineJob> = engines
            .into_iter()
            .enumerate()
            .map(|(catalog_index, engine)| EngineJob {
                url: engine.build_url(&query),
                catalog_index,
                engine,
            })
            .collect();

        let latch = HaltLatch::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = Arc::new(EngineTask {
            gateway: Arc::clone(&self.gateway),
            timeout: self.config.request_timeout,
            retry: self.config.retry.clone(),
            rng_seed: self.config.rng_seed,
            halt: latch.signal(),
            messages: tx,
        });

        let pool = WorkerPool::new(self.config.max_workers);
        debug!(
            workers = pool.size(),
            max_backoff = ?self.config.retry.max_backoff(),
            "search pool ready"
        );
        let halt = latch.signal();
        let collector = SearchCollector::new(&self.config, total, sink.clone(), latch);

        let (skipped, collector) = tokio::join!(
            pool.run(jobs, halt, move |job| {
                let task = Arc::clone(&task);
                async move {
                    let finished = task.run(job).await;
                    let _ = task.messages.send(finished);
                }
            }),
            collector.run(rx),
        );
        let skipped = skipped?;

        let SearchCollector {
            completed,
            aggregator,
            batches,
            mut reports,
            halted,
            ..
        } = collector;

        if !skipped.is_empty() {
            debug!("{} engines skipped after halt", skipped.len());
        }
        reports.extend(skipped.into_iter().map(|job| EngineReport {
            engine: job.engine.name,
            catalog_index: job.catalog_index,
            status: EngineStatus::Skipped,
            attempts: Vec::new(),
            results_count: 0,
            error: None,
        }));
        reports.sort_by_key(|r| r.catalog_index);

        let results = aggregate(&batches, self.config.dedup_order);
        sink.emit(ProgressEvent::run_level(
            EventKind::SearchProgress,
            ProgressStatus::Complete,
            RunCounters {
                total,
                completed,
                total_results: aggregator.len(),
            },
            format!(
                "Search complete: {} unique results from {} engines",
                results.len(),
                completed
            ),
        ));

        let elapsed = started.elapsed();
        info!("Search finished with {} unique results in {:?}", results.len(), elapsed);

        Ok(SearchRun {
            run_id,
            query,
            results,
            batches,
            reports,
            halted,
            elapsed,
        })
    }
}

struct EngineJob {
    catalog_index: usize,
    engine: EngineDescriptor,
    url: String,
}

enum EngineMessage {
    Retrying {
        engine: String,
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
        error: FetchError,
    },
    Finished(EngineReport, Vec<SearchResult>),
}

/// Read-only state shared by every engine task of one run
struct EngineTask {
    gateway: Arc<dyn Gateway>,
    timeout: Duration,
    retry: RetryPolicy,
    rng_seed: Option<u64>,
    halt: HaltSignal,
    messages: mpsc::UnboundedSender<EngineMessage>,
}

impl EngineTask {
    async fn run(&self, job: EngineJob) -> EngineMessage {
        let mut rng = jitter_rng(self.rng_seed, job.catalog_index as u64);
        let mut halt = self.halt.clone();
        let mut attempts = Vec::new();
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(engine = %job.engine.name, attempt, "querying {}", job.url);

            let started = Instant::now();
            let fetched = self.gateway.fetch(&job.url, self.timeout).await;
            let latency = started.elapsed();

            let error = match fetched {
                Ok(body) => {
                    let parsed = parse_isolated(job.engine.clone(), body).await;
                    let outcome = match parsed {
                        Ok(_) => AttemptOutcome::Success,
                        Err(_) => AttemptOutcome::PermanentFailure,
                    };
                    attempts.push(record(&job, attempt, outcome, latency));
                    return match parsed {
                        Ok(results) => finished(job, EngineStatus::Success, attempts, results, None),
                        Err(e) => {
                            warn!("Engine {} returned unparseable page: {}", job.engine.name, e);
                            finished(job, EngineStatus::Failed, attempts, Vec::new(), Some(e.to_string()))
                        }
                    };
                }
                Err(error) => error,
            };

            let outcome = error.attempt_outcome();
            attempts.push(record(&job, attempt, outcome, latency));

            if !self.retry.allows_retry(outcome, attempt) {
                debug!("Engine {} gave up: {}", job.engine.name, error);
                return failed(job, &error, attempts);
            }
            if halt.is_halted() {
                debug!("Engine {} not retried, run halted", job.engine.name);
                return failed(job, &error, attempts);
            }

            let delay = self.retry.backoff_delay(attempt, &mut rng);
            let _ = self.messages.send(EngineMessage::Retrying {
                engine: job.engine.name.clone(),
                attempt,
                max_attempts: self.retry.max_attempts,
                delay,
                error: error.clone(),
            });

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = halt.halted() => {
                    debug!("Engine {} backoff cut short, run halted", job.engine.name);
                    return failed(job, &error, attempts);
                }
            }
        }
    }
}

/// Parse off the async workers; a panicking parser fails only its engine
async fn parse_isolated(engine: EngineDescriptor, body: String) -> Result<Vec<SearchResult>, ParseError> {
    match tokio::task::spawn_blocking(move || engine.parse(&body)).await {
        Ok(parsed) => parsed,
        Err(e) => Err(ParseError::Panicked(e.to_string())),
    }
}

fn record(job: &EngineJob, attempt: u32, outcome: AttemptOutcome, latency: Duration) -> EngineAttempt {
    EngineAttempt {
        engine: job.engine.name.clone(),
        attempt_number: attempt,
        outcome,
        latency,
    }
}

fn finished(
    job: EngineJob,
    status: EngineStatus,
    attempts: Vec<EngineAttempt>,
    results: Vec<SearchResult>,
    error: Option<String>,
) -> EngineMessage {
    let report = EngineReport {
        engine: job.engine.name,
        catalog_index: job.catalog_index,
        status,
        attempts,
        results_count: results.len(),
        error,
    };
    EngineMessage::Finished(report, results)
}

fn failed(job: EngineJob, error: &FetchError, attempts: Vec<EngineAttempt>) -> EngineMessage {
    let status = match error.attempt_outcome() {
        AttemptOutcome::Timeout => EngineStatus::Timeout,
        _ => EngineStatus::Failed,
    };
    finished(job, status, attempts, Vec::new(), Some(error.to_string()))
}

/// Sole owner of run counters and the aggregate
struct SearchCollector {
    sink: ProgressSink,
    latch: HaltLatch,
    breaker: BreakerPolicy,
    early_exit_results: Option<usize>,
    request_timeout: Duration,
    total: usize,
    completed: usize,
    failed: usize,
    aggregator: ResultAggregator,
    batches: Vec<EngineBatch>,
    reports: Vec<EngineReport>,
    halted: Option<HaltReason>,
}

impl SearchCollector {
    fn new(config: &SearchConfig, total: usize, sink: ProgressSink, latch: HaltLatch) -> Self {
        Self {
            sink,
            latch,
            breaker: config.breaker.clone(),
            early_exit_results: config.early_exit_results,
            request_timeout: config.request_timeout,
            total,
            completed: 0,
            failed: 0,
            aggregator: ResultAggregator::new(),
            batches: Vec::new(),
            reports: Vec::new(),
            halted: None,
        }
    }

    fn counters(&self) -> RunCounters {
        RunCounters {
            total: self.total,
            completed: self.completed,
            total_results: self.aggregator.len(),
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<EngineMessage>) -> Self {
        while let Some(message) = rx.recv().await {
            match message {
                EngineMessage::Retrying {
                    engine,
                    attempt,
                    max_attempts,
                    delay,
                    error,
                } => {
                    let message = format!(
                        "Attempt {attempt}/{max_attempts} failed ({error}), retrying in {:.1}s",
                        delay.as_secs_f64()
                    );
                    self.emit(engine, ProgressStatus::Searching, 0, message);
                }
                EngineMessage::Finished(report, results) => self.finish(report, results),
            }
        }
        self
    }

    fn finish(&mut self, report: EngineReport, results: Vec<SearchResult>) {
        self.completed += 1;

        let (status, message) = match report.status {
            EngineStatus::Success => {
                self.aggregator.absorb(&results);
                self.batches.push(EngineBatch {
                    engine: report.engine.clone(),
                    catalog_index: report.catalog_index,
                    completion_index: self.batches.len(),
                    results,
                });
                (ProgressStatus::Success, format!("Found {} results", report.results_count))
            }
            EngineStatus::Timeout => {
                self.failed += 1;
                (
                    ProgressStatus::Timeout,
                    format!("Timed out after {}s", self.request_timeout.as_secs_f64()),
                )
            }
            EngineStatus::Failed | EngineStatus::Skipped => {
                self.failed += 1;
                let reason = report.error.as_deref().unwrap_or("unknown error");
                (ProgressStatus::Failed, format!("Failed: {reason}"))
            }
        };

        self.emit(report.engine.clone(), status, report.results_count, message);
        self.reports.push(report);
        self.check_halt();
    }

    /// Early exit is checked before the breaker; only the first to fire is reported
    fn check_halt(&mut self) {
        if self.halted.is_some() || self.completed >= self.total {
            return;
        }

        let unique = self.aggregator.len();
        if self.early_exit_results.is_some_and(|target| unique >= target) {
            self.halt(
                HaltReason::EarlyExit,
                ProgressStatus::EarlyExit,
                format!("Found {unique} results, stopping early"),
            );
        } else if self.breaker.should_trip(self.completed, self.failed, self.total) {
            let rate = self.failed * 100 / self.completed;
            self.halt(
                HaltReason::HighFailureRate,
                ProgressStatus::HighFailureRate,
                format!("{rate}% of engines failed, stopping"),
            );
        }
    }

    fn halt(&mut self, reason: HaltReason, status: ProgressStatus, message: String) {
        if !self.latch.close() {
            return;
        }
        info!("{}", message);
        self.halted = Some(reason);
        self.sink.emit(ProgressEvent::run_level(
            EventKind::SearchProgress,
            status,
            self.counters(),
            message,
        ));
    }

    fn emit(&self, engine: String, status: ProgressStatus, results_count: usize, message: String) {
        self.sink.emit(ProgressEvent::new(
            EventKind::SearchProgress,
            engine,
            status,
            results_count,
            self.counters(),
            message,
        ));
    }
}

//! Content scraper for dark web sites
//!
//! Fetches chosen .onion pages through the same pool-and-retry shape as the
//! search orchestrator, extracts readable text and caps it at a configured
//! number of characters. One dead URL never affects another.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use scraper::node::Node;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use robin_core::{
    jitter_rng, AttemptOutcome, EventKind, ProgressEvent, ProgressSink, ProgressStatus,
    RetryPolicy, RunCounters, ScrapeOutcome, DEFAULT_MAX_SCRAPE_CHARS, DEFAULT_SCRAPE_WORKERS,
};

use crate::{FetchError, Gateway, HaltLatch, OrchestratorError, WorkerPool};

/// Scrape orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeConfig {
    pub max_workers: usize,
    /// Timeout for a single page request
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    /// Cap on characters kept per page
    pub max_chars: usize,
    pub rng_seed: Option<u64>,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_SCRAPE_WORKERS,
            request_timeout: Duration::from_secs(45),
            retry: RetryPolicy::new(3, Duration::from_millis(300), 0.25),
            max_chars: DEFAULT_MAX_SCRAPE_CHARS,
            rng_seed: None,
        }
    }
}

impl ScrapeConfig {
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.max_workers == 0 {
            return Err(OrchestratorError::Config("max_workers must be at least 1".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(OrchestratorError::Config("request_timeout must be positive".into()));
        }
        if self.max_chars == 0 {
            return Err(OrchestratorError::Config("max_chars must be at least 1".into()));
        }
        self.retry.validate().map_err(OrchestratorError::Config)
    }
}

/// Everything one scrape call produced
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeRun {
    pub run_id: Uuid,
    /// One outcome per distinct requested URL
    pub outcomes: BTreeMap<String, ScrapeOutcome>,
    pub elapsed: Duration,
}

impl ScrapeRun {
    pub fn succeeded(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// Outcome for a requested URL, matched the same way `scrape` trims it
    pub fn get(&self, url: &str) -> Option<&ScrapeOutcome> {
        self.outcomes.get(url.trim())
    }

    /// URL to content for successful scrapes only
    pub fn contents(&self) -> BTreeMap<String, String> {
        self.outcomes
            .iter()
            .filter(|(_, o)| o.is_ok())
            .map(|(url, o)| (url.clone(), o.content.clone()))
            .collect()
    }
}

/// Fetches page content for a chosen set of URLs
pub struct ScrapeOrchestrator {
    gateway: Arc<dyn Gateway>,
    config: ScrapeConfig,
}

impl ScrapeOrchestrator {
    pub fn new(gateway: Arc<dyn Gateway>, config: ScrapeConfig) -> Result<Self, OrchestratorError> {
        config.validate()?;
        Ok(Self { gateway, config })
    }

    pub fn config(&self) -> &ScrapeConfig {
        &self.config
    }

    /// Scrape every distinct URL
    ///
    /// Fails only when the proxy is unreachable. URLs are trimmed of
    /// surrounding whitespace and outcomes are keyed by the trimmed form, so
    /// look them up through [`ScrapeRun::get`]. Blank and repeated URLs are
    /// dropped; an empty list returns an empty run without touching the proxy.
    pub async fn scrape(
        &self,
        urls: &[String],
        sink: &ProgressSink,
    ) -> Result<ScrapeRun, OrchestratorError> {
        let mut seen = HashSet::new();
        let urls: Vec<String> = urls
            .iter()
            .map(|u| u.trim())
            .filter(|u| !u.is_empty() && seen.insert(*u))
            .map(str::to_string)
            .collect();

        let run_id = Uuid::new_v4();
        if urls.is_empty() {
            return Ok(ScrapeRun {
                run_id,
                outcomes: BTreeMap::new(),
                elapsed: Duration::ZERO,
            });
        }

        let span = info_span!("scrape", %run_id, urls = urls.len());
        self.run(run_id, urls, sink).instrument(span).await
    }

    async fn run(
        &self,
        run_id: Uuid,
        urls: Vec<String>,
        sink: &ProgressSink,
    ) -> Result<ScrapeRun, OrchestratorError> {
        if !self.gateway.probe().await {
            warn!("Tor proxy unreachable, not starting scrape");
            return Err(OrchestratorError::ProxyUnavailable(self.gateway.endpoint()));
        }

        let started = Instant::now();
        let total = urls.len();
        info!("Scraping {} pages", total);

        sink.emit(ProgressEvent::run_level(
            EventKind::ScrapeProgress,
            ProgressStatus::Starting,
            RunCounters {
                total,
                ..Default::default()
            },
            format!("Scraping {total} pages..."),
        ));

        // Scrapes never halt early; the latch only satisfies the pool
        let latch = HaltLatch::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = Arc::new(PageTask {
            gateway: Arc::clone(&self.gateway),
            timeout: self.config.request_timeout,
            retry: self.config.retry.clone(),
            max_chars: self.config.max_chars,
            rng_seed: self.config.rng_seed,
            messages: tx,
        });

        let jobs: Vec<(usize, String)> = urls.into_iter().enumerate().collect();
        let collector = ScrapeCollector::new(total, self.config.request_timeout, sink.clone());

        let pool = WorkerPool::new(self.config.max_workers);
        debug!(
            workers = pool.size(),
            max_backoff = ?self.config.retry.max_backoff(),
            "scrape pool ready"
        );

        let (remaining, collector) = tokio::join!(
            pool.run(jobs, latch.signal(), move |job| {
                let task = Arc::clone(&task);
                async move {
                    let finished = task.run(job).await;
                    let _ = task.messages.send(finished);
                }
            }),
            collector.run(rx),
        );
        let remaining = remaining?;
        if !remaining.is_empty() {
            return Err(OrchestratorError::Internal(format!(
                "{} scrape jobs never ran",
                remaining.len()
            )));
        }

        let succeeded = collector.succeeded;
        sink.emit(ProgressEvent::run_level(
            EventKind::ScrapeProgress,
            ProgressStatus::Complete,
            collector.counters(),
            format!("Scrape complete: {succeeded}/{total} pages fetched"),
        ));

        let elapsed = started.elapsed();
        info!("Scraped {}/{} pages in {:?}", succeeded, total, elapsed);

        Ok(ScrapeRun {
            run_id,
            outcomes: collector.outcomes,
            elapsed,
        })
    }
}

enum PageMessage {
    Retrying {
        url: String,
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
        error: FetchError,
    },
    Finished {
        outcome: ScrapeOutcome,
        timed_out: bool,
    },
}

struct PageTask {
    gateway: Arc<dyn Gateway>,
    timeout: Duration,
    retry: RetryPolicy,
    max_chars: usize,
    rng_seed: Option<u64>,
    messages: mpsc::UnboundedSender<PageMessage>,
}

impl PageTask {
    async fn run(&self, (index, url): (usize, String)) -> PageMessage {
        let mut rng = jitter_rng(self.rng_seed, index as u64);
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(attempt, "scraping {}", url);

            let error = match self.gateway.fetch(&url, self.timeout).await {
                Ok(body) => {
                    let outcome = match tokio::task::spawn_blocking(move || extract_content(&body)).await {
                        Ok(content) => ScrapeOutcome::ok(url, &content, self.max_chars, attempt),
                        Err(e) => {
                            warn!("Text extraction failed for {}: {}", url, e);
                            ScrapeOutcome::error(url, format!("text extraction failed: {e}"), attempt)
                        }
                    };
                    return PageMessage::Finished {
                        outcome,
                        timed_out: false,
                    };
                }
                Err(error) => error,
            };

            let outcome = error.attempt_outcome();
            if !self.retry.allows_retry(outcome, attempt) {
                debug!("Giving up on {}: {}", url, error);
                return PageMessage::Finished {
                    timed_out: outcome == AttemptOutcome::Timeout,
                    outcome: ScrapeOutcome::error(url, error.to_string(), attempt),
                };
            }

            let delay = self.retry.backoff_delay(attempt, &mut rng);
            let _ = self.messages.send(PageMessage::Retrying {
                url: url.clone(),
                attempt,
                max_attempts: self.retry.max_attempts,
                delay,
                error,
            });
            tokio::time::sleep(delay).await;
        }
    }
}

struct ScrapeCollector {
    sink: ProgressSink,
    request_timeout: Duration,
    total: usize,
    completed: usize,
    succeeded: usize,
    outcomes: BTreeMap<String, ScrapeOutcome>,
}

impl ScrapeCollector {
    fn new(total: usize, request_timeout: Duration, sink: ProgressSink) -> Self {
        Self {
            sink,
            request_timeout,
            total,
            completed: 0,
            succeeded: 0,
            outcomes: BTreeMap::new(),
        }
    }

    fn counters(&self) -> RunCounters {
        RunCounters {
            total: self.total,
            completed: self.completed,
            total_results: self.succeeded,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<PageMessage>) -> Self {
        while let Some(message) = rx.recv().await {
            match message {
                PageMessage::Retrying {
                    url,
                    attempt,
                    max_attempts,
                    delay,
                    error,
                } => {
                    let message = format!(
                        "Attempt {attempt}/{max_attempts} failed ({error}), retrying in {:.1}s",
                        delay.as_secs_f64()
                    );
                    self.emit(url, ProgressStatus::Searching, 0, message);
                }
                PageMessage::Finished { outcome, timed_out } => {
                    self.completed += 1;
                    let (status, chars, message) = if outcome.is_ok() {
                        self.succeeded += 1;
                        let chars = outcome.content.chars().count();
                        let note = if outcome.truncated { " (truncated)" } else { "" };
                        (ProgressStatus::Success, chars, format!("Scraped {chars} characters{note}"))
                    } else if timed_out {
                        let message = format!("Timed out after {}s", self.request_timeout.as_secs_f64());
                        (ProgressStatus::Timeout, 0, message)
                    } else {
                        let reason = outcome.error.as_deref().unwrap_or("unknown error");
                        (ProgressStatus::Failed, 0, format!("Failed: {reason}"))
                    };
                    self.emit(outcome.url.clone(), status, chars, message);
                    self.outcomes.insert(outcome.url.clone(), outcome);
                }
            }
        }
        self
    }

    fn emit(&self, url: String, status: ProgressStatus, results_count: usize, message: String) {
        self.sink.emit(ProgressEvent::new(
            EventKind::ScrapeProgress,
            url,
            status,
            results_count,
            self.counters(),
            message,
        ));
    }
}

/// Readable text of a page, prefixed with its title when it has one
pub fn extract_content(html: &str) -> String {
    let (title, text) = extract_page(html);
    match title {
        Some(title) if !title.is_empty() && !text.is_empty() => format!("{title} - {text}"),
        Some(title) if !title.is_empty() => title,
        _ => text,
    }
}

/// Extract title and body text, skipping script, style and noscript subtrees
fn extract_page(html: &str) -> (Option<String>, String) {
    let document = Html::parse_document(html);

    let title = Selector::parse("title").ok().and_then(|selector| {
        document
            .select(&selector)
            .next()
            .map(|el| normalize_whitespace(&el.text().collect::<String>()))
    });

    let Some(body) = Selector::parse("body")
        .ok()
        .and_then(|selector| document.select(&selector).next())
    else {
        return (title, String::new());
    };

    let mut text_parts = Vec::new();
    for node_ref in body.descendants() {
        let Node::Text(text_node) = node_ref.value() else {
            continue;
        };

        let in_excluded = node_ref.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| matches!(el.name(), "script" | "style" | "noscript"))
        });
        if in_excluded {
            continue;
        }

        let trimmed = text_node.trim();
        if !trimmed.is_empty() {
            text_parts.push(trimmed);
        }
    }

    (title, normalize_whitespace(&text_parts.join(" ")))
}

/// Normalize whitespace in text
fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

//! Result aggregation: URL normalisation and first-seen deduplication
//!
//! Per-engine result lists are merged into one list in which every entry has
//! a unique normalised URL. "First" is decided by the order in which batches
//! are fed in; the search orchestrator feeds them in engine completion order
//! unless [`DedupOrder::Catalog`] is requested.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::SearchResult;

/// Canonical form of a URL for duplicate detection
///
/// - scheme and host lower-cased
/// - default port removed
/// - trailing slash removed (a bare `/` path is kept)
/// - an empty query string (`?` with nothing after it) dropped
///
/// Input that does not parse as a URL is trimmed, stripped of trailing
/// slashes and lower-cased.
pub fn normalize_url(raw: &str) -> String {
    let raw = raw.trim();
    let Ok(mut parsed) = Url::parse(raw) else {
        return raw.trim_end_matches('/').to_lowercase();
    };

    if is_default_port(&parsed) {
        let _ = parsed.set_port(None);
    }

    if parsed.query() == Some("") {
        parsed.set_query(None);
    }

    let path = parsed.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        parsed.set_path(path.trim_end_matches('/'));
        if parsed.path().is_empty() {
            parsed.set_path("/");
        }
    }

    parsed.to_string()
}

fn is_default_port(url: &Url) -> bool {
    matches!(
        (url.scheme(), url.port()),
        ("http", Some(80)) | ("https", Some(443))
    )
}

/// Which batch wins when two engines return the same URL
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupOrder {
    /// The engine that finished first wins; depends on network timing
    #[default]
    Completion,
    /// The engine listed first in the catalog wins; reproducible
    Catalog,
}

/// Raw results from one engine, tagged with where it stood in the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineBatch {
    pub engine: String,
    /// Position of the engine in the catalog
    pub catalog_index: usize,
    /// Position among engines that finished successfully
    pub completion_index: usize,
    pub results: Vec<SearchResult>,
}

/// Incremental first-seen-wins merger
#[derive(Debug, Clone, Default)]
pub struct ResultAggregator {
    seen: HashSet<String>,
    results: Vec<SearchResult>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one engine's results; returns how many were new
    pub fn absorb(&mut self, batch: &[SearchResult]) -> usize {
        let before = self.results.len();
        for result in batch {
            if self.seen.insert(normalize_url(&result.url)) {
                self.results.push(result.clone());
            }
        }
        self.results.len() - before
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn results(&self) -> &[SearchResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<SearchResult> {
        self.results
    }
}

/// Merge per-engine batches into one deduplicated list
pub fn aggregate(batches: &[EngineBatch], order: DedupOrder) -> Vec<SearchResult> {
    let mut ordered: Vec<&EngineBatch> = batches.iter().collect();
    match order {
        DedupOrder::Completion => ordered.sort_by_key(|b| b.completion_index),
        DedupOrder::Catalog => ordered.sort_by_key(|b| b.catalog_index),
    }

    let mut aggregator = ResultAggregator::new();
    for batch in ordered {
        aggregator.absorb(&batch.results);
    }
    aggregator.into_results()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(url: &str, engine: &str) -> SearchResult {
        SearchResult::new(format!("Title from {engine}"), url, engine)
    }

    fn batch(engine: &str, catalog_index: usize, completion_index: usize, urls: &[&str]) -> EngineBatch {
        EngineBatch {
            engine: engine.to_string(),
            catalog_index,
            completion_index,
            results: urls.iter().map(|u| result(u, engine)).collect(),
        }
    }

    #[test]
    fn test_normalize_trailing_slash() {
        assert_eq!(normalize_url("http://a.onion/1/"), normalize_url("http://a.onion/1"));
        assert_eq!(normalize_url("http://a.onion/1//"), "http://a.onion/1");
    }

    #[test]
    fn test_normalize_case_and_port() {
        assert_eq!(normalize_url("HTTP://Example.ONION:80/Path"), "http://example.onion/Path");
        assert_eq!(normalize_url("https://x.onion:443/"), "https://x.onion/");
        assert_eq!(normalize_url("http://x.onion:8080/a"), "http://x.onion:8080/a");
    }

    #[test]
    fn test_normalize_empty_query() {
        assert_eq!(normalize_url("http://x.onion/page?"), "http://x.onion/page");
        assert_eq!(normalize_url("http://x.onion/page?a=1"), "http://x.onion/page?a=1");
    }

    #[test]
    fn test_normalize_root() {
        assert_eq!(normalize_url("http://x.onion"), normalize_url("http://x.onion/"));
    }

    #[test]
    fn test_normalize_unparseable() {
        assert_eq!(normalize_url("  Not A URL/ "), "not a url");
    }

    #[test]
    fn test_absorb_first_seen_wins() {
        let mut agg = ResultAggregator::new();
        assert_eq!(agg.absorb(&[result("http://a.onion/1", "A")]), 1);
        assert_eq!(agg.absorb(&[result("http://A.onion/1/", "B"), result("http://b.onion", "B")]), 1);
        assert_eq!(agg.len(), 2);
        assert_eq!(agg.results()[0].engine, "A");
        assert_eq!(agg.results()[1].url, "http://b.onion");
    }

    #[test]
    fn test_aggregate_completion_vs_catalog_order() {
        let batches = vec![
            batch("A", 0, 1, &["http://dup.onion/x"]),
            batch("B", 1, 0, &["http://dup.onion/x/", "http://only-b.onion"]),
        ];

        let by_completion = aggregate(&batches, DedupOrder::Completion);
        assert_eq!(by_completion.len(), 2);
        assert_eq!(by_completion[0].engine, "B");

        let by_catalog = aggregate(&batches, DedupOrder::Catalog);
        assert_eq!(by_catalog.len(), 2);
        assert_eq!(by_catalog[0].engine, "A");
        assert_eq!(by_catalog[1].url, "http://only-b.onion");
    }

    #[test]
    fn test_aggregate_never_yields_duplicates() {
        let urls = [
            "http://a.onion/1",
            "http://a.onion/1/",
            "HTTP://A.ONION/1",
            "http://a.onion:80/1",
            "http://a.onion/1?",
            "http://b.onion",
            "http://b.onion/",
        ];
        let batches: Vec<_> = (0..4)
            .map(|i| batch(&format!("E{i}"), i, 3 - i, &urls[i..]))
            .collect();

        for order in [DedupOrder::Completion, DedupOrder::Catalog] {
            let merged = aggregate(&batches, order);
            let unique: HashSet<_> = merged.iter().map(|r| normalize_url(&r.url)).collect();
            assert_eq!(unique.len(), merged.len());
            assert_eq!(merged.len(), 2);
        }
    }
}

//! Search results and scrape outcomes
//!
//! Both types are created by a single orchestration call and handed to the
//! caller by value.

use serde::{Deserialize, Serialize};

/// A search result from a dark web search engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Result title
    pub title: String,
    /// Result URL (typically .onion)
    pub url: String,
    /// Source search engine
    pub engine: String,
    /// Short excerpt, empty when the engine does not provide one
    #[serde(default)]
    pub snippet: String,
}

impl SearchResult {
    pub fn new(title: impl Into<String>, url: impl Into<String>, engine: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            engine: engine.into(),
            snippet: String::new(),
        }
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }
}

/// Whether a scrape produced content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeStatus {
    Ok,
    Error,
}

/// Result of scraping one URL
///
/// Never mutated after the scrape orchestrator creates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeOutcome {
    /// Requested URL
    pub url: String,
    pub status: ScrapeStatus,
    /// Extracted page text, capped at the configured character limit
    pub content: String,
    /// Whether `content` was cut to fit the limit
    pub truncated: bool,
    /// Failure description when `status` is `Error`
    pub error: Option<String>,
    /// Number of fetch attempts made
    pub attempts: u32,
}

impl ScrapeOutcome {
    /// Build a successful outcome, truncating `content` to `max_chars` characters
    pub fn ok(url: impl Into<String>, content: &str, max_chars: usize, attempts: u32) -> Self {
        let (content, truncated) = truncate_chars(content, max_chars);
        Self {
            url: url.into(),
            status: ScrapeStatus::Ok,
            content,
            truncated,
            error: None,
            attempts,
        }
    }

    /// Build a failed outcome with empty content
    pub fn error(url: impl Into<String>, error: impl Into<String>, attempts: u32) -> Self {
        Self {
            url: url.into(),
            status: ScrapeStatus::Error,
            content: String::new(),
            truncated: false,
            error: Some(error.into()),
            attempts,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ScrapeStatus::Ok
    }
}

/// Cut `text` to at most `max_chars` characters, never splitting a code point
pub fn truncate_chars(text: &str, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (text[..byte_idx].to_string(), true),
        None => (text.to_string(), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_exact_limit() {
        let body = "x".repeat(8000);
        let (cut, truncated) = truncate_chars(&body, 2000);
        assert_eq!(cut.chars().count(), 2000);
        assert!(truncated);
    }

    #[test]
    fn test_truncate_chars_short_text_untouched() {
        let (cut, truncated) = truncate_chars("hello", 2000);
        assert_eq!(cut, "hello");
        assert!(!truncated);
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        let (cut, truncated) = truncate_chars("ÄÖÜäöü", 4);
        assert_eq!(cut, "ÄÖÜä");
        assert!(truncated);
    }

    #[test]
    fn test_scrape_outcome_ok_caps_content() {
        let outcome = ScrapeOutcome::ok("http://x.onion/page", &"y".repeat(50), 10, 1);
        assert!(outcome.is_ok());
        assert_eq!(outcome.content.len(), 10);
        assert!(outcome.truncated);
        assert!(outcome.error.is_none());
    }

    #[test]
    fn test_scrape_outcome_error_has_no_content() {
        let outcome = ScrapeOutcome::error("http://x.onion/page", "HTTP 404", 1);
        assert_eq!(outcome.status, ScrapeStatus::Error);
        assert!(outcome.content.is_empty());
        assert_eq!(outcome.error.as_deref(), Some("HTTP 404"));
    }

    #[test]
    fn test_scrape_status_serializes_snake_case() {
        let json = serde_json::to_string(&ScrapeStatus::Ok).unwrap();
        assert_eq!(json, "\"ok\"");
    }
}

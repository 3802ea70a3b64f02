//! Per-engine result parsers
//!
//! A parser turns one engine's raw HTML into [`SearchResult`]s. Parsers are
//! pure: no I/O and no shared mutable state. A parser that cannot make sense
//! of its input returns a [`ParseError`]; the orchestrator records that as
//! "this engine found nothing" and carries on.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use url::Url;

use crate::SearchResult;

/// Errors raised while parsing an engine response
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Invalid selector: {0}")]
    Selector(String),

    #[error("Invalid pattern: {0}")]
    Pattern(String),

    #[error("Parser panicked: {0}")]
    Panicked(String),
}

/// Capability shared by every engine-specific parser
pub trait ResultParser: Send + Sync {
    /// Short identifier used in logs
    fn kind(&self) -> &'static str;

    /// Extract results from a raw engine response
    ///
    /// `engine_url` is the address the page was served from, so parsers can
    /// tell the engine's own navigation links from real results.
    fn parse(&self, engine: &str, engine_url: &str, raw: &str) -> Result<Vec<SearchResult>, ParseError>;
}

static ONION_URL: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r#"https?://[^/\s"'<>]*\.onion[^\s"'<>]*"#));

fn onion_regex() -> Result<&'static Regex, ParseError> {
    ONION_URL
        .as_ref()
        .map_err(|e| ParseError::Pattern(e.to_string()))
}

fn selector(css: &str) -> Result<Selector, ParseError> {
    Selector::parse(css).map_err(|e| ParseError::Selector(format!("{css}: {e:?}")))
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
}

/// Links that point back into the engine itself (pagination, other queries)
fn is_engine_self_link(url: &str, engine_url: &str) -> bool {
    match (host_of(url), host_of(engine_url)) {
        (Some(link), Some(engine)) => link == engine,
        _ => false,
    }
}

/// Generic parser: every anchor whose href carries an .onion URL
#[derive(Debug, Clone, Copy, Default)]
pub struct OnionLinkParser;

impl ResultParser for OnionLinkParser {
    fn kind(&self) -> &'static str {
        "onion-links"
    }

    fn parse(&self, engine: &str, engine_url: &str, raw: &str) -> Result<Vec<SearchResult>, ParseError> {
        let document = Html::parse_document(raw);
        let link_selector = selector("a[href]")?;
        let onion = onion_regex()?;

        let mut results = Vec::new();
        for element in document.select(&link_selector) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            let Some(m) = onion.find(href) else {
                continue;
            };

            let url = m.as_str();
            if is_engine_self_link(url, engine_url) {
                continue;
            }

            let title = element_text(element);
            if title.is_empty() {
                continue;
            }

            results.push(SearchResult::new(title, url, engine));
        }

        Ok(results)
    }
}

/// Ahmia result list: `li.result` with a heading link, snippet and cite
#[derive(Debug, Clone, Copy, Default)]
pub struct AhmiaParser;

impl AhmiaParser {
    fn target_url(item: ElementRef<'_>, link: Option<ElementRef<'_>>, cite: &Selector) -> Option<String> {
        // Ahmia links go through /search/redirect?...&redirect_url=<target>
        if let Some(href) = link.and_then(|a| a.value().attr("href")) {
            if let Some((_, target)) = href.split_once("redirect_url=") {
                let target = target.split('&').next().unwrap_or(target);
                let decoded = urlencoding::decode(target)
                    .map(|s| s.into_owned())
                    .unwrap_or_else(|_| target.to_string());
                if decoded.contains(".onion") {
                    return Some(decoded);
                }
            }
            if href.contains(".onion") && href.starts_with("http") {
                return Some(href.to_string());
            }
        }

        let cited = item.select(cite).next().map(element_text)?;
        if cited.is_empty() {
            return None;
        }
        if cited.starts_with("http://") || cited.starts_with("https://") {
            Some(cited)
        } else {
            Some(format!("http://{cited}"))
        }
    }
}

impl ResultParser for AhmiaParser {
    fn kind(&self) -> &'static str {
        "ahmia"
    }

    fn parse(&self, engine: &str, _engine_url: &str, raw: &str) -> Result<Vec<SearchResult>, ParseError> {
        let document = Html::parse_document(raw);
        let item_selector = selector("li.result")?;
        let link_selector = selector("h4 a")?;
        let snippet_selector = selector("p")?;
        let cite_selector = selector("cite")?;

        let mut results = Vec::new();
        for item in document.select(&item_selector) {
            let link = item.select(&link_selector).next();
            let Some(url) = Self::target_url(item, link, &cite_selector) else {
                continue;
            };

            let title = link.map(element_text).unwrap_or_default();
            let snippet = item
                .select(&snippet_selector)
                .next()
                .map(element_text)
                .unwrap_or_default();

            let title = if title.is_empty() { url.clone() } else { title };
            results.push(SearchResult::new(title, url, engine).with_snippet(snippet));
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENGINE_URL: &str = "http://engine.onion/search?q=leak";
    const AHMIA_URL: &str = "http://ahmia.onion/search/?q=leak";

    #[test]
    fn test_onion_links() {
        let html = r#"
            <html>
            <body>
                <a href="http://example.onion/page1">Test Link 1</a>
                <a href="http://another.onion/page2">Test   Link
                    2</a>
                <a href="https://clearweb.com">Clear Web Link</a>
                <a href="http://engine.onion/search?q=next">Next page</a>
                <a href="http://untitled.onion/"></a>
            </body>
            </html>
        "#;

        let results = OnionLinkParser.parse("TestEngine", ENGINE_URL, html).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].url, "http://example.onion/page1");
        assert_eq!(results[0].title, "Test Link 1");
        assert_eq!(results[0].engine, "TestEngine");
        assert_eq!(results[1].title, "Test Link 2");
    }

    #[test]
    fn test_onion_link_inside_redirect_href() {
        let html = r#"<a href="/go?to=http://target.onion/x">Target</a>"#;
        let results = OnionLinkParser.parse("E", ENGINE_URL, html).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "http://target.onion/x");
    }

    #[test]
    fn test_query_links_on_other_hosts_kept() {
        let html = r#"
            <a href="http://forum.onion/viewtopic.php?q=123">Forum thread</a>
            <a href="http://market.onion/list?query=dumps">Listing</a>
            <a href="http://ENGINE.onion/about">About the engine</a>
        "#;
        let results = OnionLinkParser.parse("E", ENGINE_URL, html).unwrap();
        let urls: Vec<_> = results.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["http://forum.onion/viewtopic.php?q=123", "http://market.onion/list?query=dumps"]
        );
    }

    #[test]
    fn test_onion_links_garbage_input() {
        let results = OnionLinkParser.parse("E", ENGINE_URL, "\u{0}<<<>>>not html").unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_ahmia_results() {
        let html = r#"
            <ol class="searchResults">
              <li class="result">
                <h4><a href="/search/redirect?search_term=ransomware&amp;redirect_url=http%3A%2F%2Fleaksite.onion%2Fposts">Leak Site</a></h4>
                <p>Latest ransomware victims</p>
                <cite>leaksite.onion/posts</cite>
              </li>
              <li class="result">
                <h4><a href="/broken">No redirect</a></h4>
                <p>Forum</p>
                <cite>forum.onion</cite>
              </li>
              <li class="result"><p>nothing to link to</p></li>
            </ol>
        "#;

        let results = AhmiaParser.parse("Ahmia", AHMIA_URL, html).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].url, "http://leaksite.onion/posts");
        assert_eq!(results[0].title, "Leak Site");
        assert_eq!(results[0].snippet, "Latest ransomware victims");
        assert_eq!(results[1].url, "http://forum.onion");
    }

    #[test]
    fn test_ahmia_no_results() {
        let results = AhmiaParser.parse("Ahmia", AHMIA_URL, "<html><body>No results</body></html>").unwrap();
        assert!(results.is_empty());
    }
}

//! Dark web search engine registry
//!
//! Provides the known dark web search engines with their URL templates and
//! the parser that understands each engine's result page.

use std::fmt;
use std::sync::Arc;

use crate::{AhmiaParser, OnionLinkParser, ParseError, ResultParser, SearchResult};

/// Which built-in parser an engine uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserKind {
    OnionLinks,
    Ahmia,
}

impl ParserKind {
    fn build(self) -> Arc<dyn ResultParser> {
        match self {
            Self::OnionLinks => Arc::new(OnionLinkParser),
            Self::Ahmia => Arc::new(AhmiaParser),
        }
    }
}

/// A dark web search engine
#[derive(Clone)]
pub struct EngineDescriptor {
    /// Human-readable name
    pub name: String,
    /// URL template with {query} placeholder
    pub url_template: String,
    /// Whether this engine is queried at all
    pub enabled: bool,
    parser: Arc<dyn ResultParser>,
}

impl fmt::Debug for EngineDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineDescriptor")
            .field("name", &self.name)
            .field("url_template", &self.url_template)
            .field("enabled", &self.enabled)
            .field("parser", &self.parser.kind())
            .finish()
    }
}

impl EngineDescriptor {
    pub fn new(
        name: impl Into<String>,
        url_template: impl Into<String>,
        parser: Arc<dyn ResultParser>,
    ) -> Self {
        Self {
            name: name.into(),
            url_template: url_template.into(),
            enabled: true,
            parser,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Build search URL for a query
    pub fn build_url(&self, query: &str) -> String {
        self.url_template.replace("{query}", &encode_query(query))
    }

    /// Parse a raw result page from this engine
    pub fn parse(&self, raw: &str) -> Result<Vec<SearchResult>, ParseError> {
        self.parser.parse(&self.name, &self.url_template, raw)
    }

    pub fn parser_kind(&self) -> &'static str {
        self.parser.kind()
    }
}

/// URL-encode a query string, spaces as `+`
fn encode_query(query: &str) -> String {
    urlencoding::encode(query.trim()).replace("%20", "+")
}

/// Default list of dark web search engines
static DEFAULT_SEARCH_ENGINES: &[(&str, &str, ParserKind)] = &[
    ("Ahmia", "http://juhanurmihxlp77nkq76byazcldy2hlmovfu2epvl5ankdibsot4csyd.onion/search/?q={query}", ParserKind::Ahmia),
    ("OnionLand", "http://3bbad7fauom4d6sgppalyqddsqbf5u5p56b5k5uk2zxsy3d6ey2jobad.onion/search?q={query}", ParserKind::OnionLinks),
    ("DarkHunt", "http://darkhuntyla64h75a3re5e2l3367lqn7ltmdzpgmr6b4nbz3q2iaxrid.onion/search?q={query}", ParserKind::OnionLinks),
    ("Torgle", "http://iy3544gmoeclh5de6gez2256v6pjh4omhpqdh2wpeeppjtvqmjhkfwad.onion/torgle/?query={query}", ParserKind::OnionLinks),
    ("Amnesia", "http://amnesia7u5odx5xbwtpnqk3edybgud5bmiagu75bnqx2crntw5kry7ad.onion/search?query={query}", ParserKind::OnionLinks),
    ("Kaizer", "http://kaizerwfvp5gxu6cppibp7jhcqptavq3iqef66wbxenh6a2fklibdvid.onion/search?q={query}", ParserKind::OnionLinks),
    ("Anima", "http://anima4ffe27xmakwnseih3ic2y7y3l6e7fucwk4oerdn4odf7k74tbid.onion/search?q={query}", ParserKind::OnionLinks),
    ("Tornado", "http://tornadoxn3viscgz647shlysdy7ea5zqzwda7hierekeuokh5eh5b3qd.onion/search?q={query}", ParserKind::OnionLinks),
    ("TorNet", "http://tornetupfu7gcgidt33ftnungxzyfq2pygui5qdoyss34xbgx2qruzid.onion/search?q={query}", ParserKind::OnionLinks),
    ("Torland", "http://torlbmqwtudkorme6prgfpmsnile7ug2zm4u3ejpcncxuhpu4k2j4kyd.onion/index.php?a=search&q={query}", ParserKind::OnionLinks),
    ("FindTor", "http://findtorroveq5wdnipkaojfpqulxnkhblymc7aramjzajcvpptd4rjqd.onion/search?q={query}", ParserKind::OnionLinks),
    ("Excavator", "http://2fd6cemt4gmccflhm6imvdfvli3nf7zn6rfrwpsy7uhxrgbypvwf5fad.onion/search?query={query}", ParserKind::OnionLinks),
    ("Onionway", "http://oniwayzz74cv2puhsgx4dpjwieww4wdphsydqvf5q7eyz4myjvyw26ad.onion/search.php?s={query}", ParserKind::OnionLinks),
    ("Tor66", "http://tor66sewebgixwhcqfnp5inzp5x5uohhdy3kvtnyfxc2e5mxiuh34iid.onion/search?q={query}", ParserKind::OnionLinks),
    ("OSS", "http://3fzh7yuupdfyjhwt3ugzqqof6ulbcl27ecev33knxe3u7goi3vfn2qqd.onion/oss/index.php?search={query}", ParserKind::OnionLinks),
    ("Torgol", "http://torgolnpeouim56dykfob6jh5r2ps2j73enc42s2um4ufob3ny4fcdyd.onion/?q={query}", ParserKind::OnionLinks),
    ("DeepSearches", "http://searchgf7gdtauh7bhnbyed4ivxqmuoat3nm6zfrg3ymkq6mtnpye3ad.onion/search?q={query}", ParserKind::OnionLinks),
];

/// Immutable set of engines, built once at startup
#[derive(Debug, Clone)]
pub struct EngineCatalog {
    engines: Vec<EngineDescriptor>,
}

impl Default for EngineCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl EngineCatalog {
    pub fn new(engines: Vec<EngineDescriptor>) -> Self {
        Self { engines }
    }

    /// Catalog of the built-in engines, all enabled
    pub fn builtin() -> Self {
        let engines = DEFAULT_SEARCH_ENGINES
            .iter()
            .map(|(name, template, kind)| EngineDescriptor::new(*name, *template, kind.build()))
            .collect();
        Self { engines }
    }

    /// Disable engines by case-insensitive name
    pub fn without(mut self, names: &[String]) -> Self {
        for engine in &mut self.engines {
            if names.iter().any(|n| n.eq_ignore_ascii_case(&engine.name)) {
                engine.enabled = false;
            }
        }
        self
    }

    /// Enabled engines, in catalog order
    pub fn all(&self) -> Vec<EngineDescriptor> {
        self.engines.iter().filter(|e| e.enabled).cloned().collect()
    }

    /// Names of every engine, enabled or not
    pub fn names(&self) -> Vec<&str> {
        self.engines.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&EngineDescriptor> {
        self.engines.iter().find(|e| e.name.eq_ignore_ascii_case(name))
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url() {
        let catalog = EngineCatalog::builtin();
        let engine = catalog.get("Ahmia").unwrap();
        let url = engine.build_url("ransomware payments");
        assert!(url.contains("ransomware+payments"));
        assert!(url.ends_with(".onion/search/?q=ransomware+payments"));
    }

    #[test]
    fn test_build_url_escapes_reserved() {
        let engine = EngineDescriptor::new("E", "http://e.onion/?q={query}", Arc::new(OnionLinkParser));
        assert_eq!(engine.build_url("a&b=c"), "http://e.onion/?q=a%26b%3Dc");
        assert_eq!(engine.build_url("café"), "http://e.onion/?q=caf%C3%A9");
    }

    #[test]
    fn test_builtin_catalog() {
        let catalog = EngineCatalog::builtin();
        assert_eq!(catalog.len(), 17);
        assert_eq!(catalog.all().len(), 17);
        assert!(catalog.all().iter().all(|e| e.url_template.contains("{query}")));
        assert_eq!(catalog.get("ahmia").unwrap().parser_kind(), "ahmia");
    }

    #[test]
    fn test_all_returns_enabled_subset() {
        let catalog = EngineCatalog::builtin().without(&["Torgle".to_string(), "oss".to_string()]);
        let enabled = catalog.all();
        assert_eq!(enabled.len(), 15);
        assert!(enabled.iter().all(|e| e.name != "Torgle" && e.name != "OSS"));
        assert_eq!(catalog.names().len(), 17);
    }

    #[test]
    fn test_disabled_descriptor_excluded() {
        let catalog = EngineCatalog::new(vec![
            EngineDescriptor::new("A", "http://a.onion/?q={query}", Arc::new(OnionLinkParser)),
            EngineDescriptor::new("B", "http://b.onion/?q={query}", Arc::new(OnionLinkParser)).disabled(),
        ]);
        let names: Vec<_> = catalog.all().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["A"]);
    }
}

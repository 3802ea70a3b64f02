//! Robin×SMESH Core - domain model for dark web search and scrape
//!
//! This crate provides the network-free primitives:
//! - Search results and scrape outcomes
//! - Progress events streamed to a live consumer
//! - Retry policy and per-attempt bookkeeping
//! - Search engine registry with per-engine result parsers
//! - URL normalisation and result aggregation

pub mod results;
pub mod progress;
pub mod retry;
pub mod parsers;
pub mod search_engines;
pub mod aggregate;

pub use results::*;
pub use progress::*;
pub use retry::*;
pub use parsers::*;
pub use search_engines::*;
pub use aggregate::*;

/// Default number of concurrent search workers
pub const DEFAULT_SEARCH_WORKERS: usize = 5;

/// Default number of concurrent scrape workers
pub const DEFAULT_SCRAPE_WORKERS: usize = 5;

/// Default cap on characters kept from a scraped page
pub const DEFAULT_MAX_SCRAPE_CHARS: usize = 2000;

/// Longest query accepted by the orchestrators
pub const MAX_QUERY_LENGTH: usize = 5000;

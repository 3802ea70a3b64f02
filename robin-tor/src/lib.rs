//! Robin×SMESH Tor Layer
//!
//! Everything that touches the network or schedules work:
//! - SOCKS5h proxy gateway (DNS resolution via Tor) with a readiness probe
//! - Bounded worker pool with a halt latch
//! - Search orchestration across many engines with retry and circuit breaking
//! - Content scraping with retry and truncation
//! - Engine health pings

pub mod proxy;
pub mod error;
pub mod pool;
pub mod crawler;
pub mod scraper;
pub mod health;

#[cfg(test)]
mod testing;

pub use proxy::*;
pub use error::*;
pub use pool::*;
pub use crawler::*;
pub use self::scraper::*;
pub use health::*;

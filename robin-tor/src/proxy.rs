//! Tor SOCKS5h proxy gateway
//!
//! The only place that opens outbound sockets. Creates HTTP clients that
//! route through Tor for .onion access, probes the proxy before any work is
//! scheduled, and classifies fetch failures for the retrying callers.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use reqwest::{Client, Proxy};
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use robin_core::AttemptOutcome;

/// Tor proxy configuration
#[derive(Debug, Clone)]
pub struct TorConfig {
    /// SOCKS proxy host (default: 127.0.0.1)
    pub host: String,
    /// SOCKS proxy port (default: 9050)
    pub port: u16,
    /// Connect attempts made by the readiness probe
    pub probe_attempts: u32,
    /// Pause between probe attempts
    pub probe_interval: Duration,
    /// Timeout for a single probe connect
    pub probe_connect_timeout: Duration,
}

impl Default for TorConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9050,
            probe_attempts: 60,
            probe_interval: Duration::from_secs(1),
            probe_connect_timeout: Duration::from_secs(1),
        }
    }
}

impl TorConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// `host:port` of the proxy listener
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Proxy URL; `socks5h` so .onion names are resolved by Tor
    pub fn socks_url(&self) -> String {
        format!("socks5h://{}", self.endpoint())
    }
}

/// Errors from Tor networking
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Failed to build Tor client: {0}")]
    ClientBuild(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// How the retrying caller should treat this failure
    ///
    /// Connection errors and 5xx responses are transient; other status codes,
    /// bad URLs and client construction failures are permanent.
    pub fn attempt_outcome(&self) -> AttemptOutcome {
        match self {
            Self::Timeout(_) => AttemptOutcome::Timeout,
            Self::Connection(_) => AttemptOutcome::TransientFailure,
            Self::HttpStatus(code) if (500..600).contains(code) => AttemptOutcome::TransientFailure,
            Self::HttpStatus(_) | Self::InvalidUrl(_) | Self::ClientBuild(_) => {
                AttemptOutcome::PermanentFailure
            }
        }
    }
}

/// Outbound access used by the orchestrators
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Proxy endpoint, for error reporting
    fn endpoint(&self) -> String;

    /// Whether the proxy accepts connections; `false` after bounded retries
    async fn probe(&self) -> bool;

    /// Single GET through the proxy, no retries
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String, FetchError>;
}

/// User agents for rotation
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:137.0) Gecko/20100101 Firefox/137.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.7; rv:137.0) Gecko/20100101 Firefox/137.0",
    "Mozilla/5.0 (X11; Linux i686; rv:137.0) Gecko/20100101 Firefox/137.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_7_5) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.3 Safari/605.1.15",
];

/// Get a random user agent
pub fn random_user_agent() -> &'static str {
    use rand::Rng;
    let idx = rand::thread_rng().gen_range(0..USER_AGENTS.len());
    USER_AGENTS[idx]
}

/// Outcome of a proxy readiness probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub reachable: bool,
    /// Attempts made, including the successful one
    pub attempts: u32,
    /// Connect time of the successful attempt
    pub latency: Option<Duration>,
}

/// Check that the proxy is listening with plain TCP connects
pub async fn probe_proxy(config: &TorConfig) -> ProbeReport {
    let attempts = config.probe_attempts.max(1);
    let endpoint = config.endpoint();

    for attempt in 1..=attempts {
        let start = Instant::now();
        let connect = TcpStream::connect((config.host.as_str(), config.port));
        match tokio::time::timeout(config.probe_connect_timeout, connect).await {
            Ok(Ok(_stream)) => {
                debug!("Tor proxy at {} reachable (attempt {})", endpoint, attempt);
                return ProbeReport {
                    reachable: true,
                    attempts: attempt,
                    latency: Some(start.elapsed()),
                };
            }
            Ok(Err(e)) => debug!("Probe {}/{} of {} failed: {}", attempt, attempts, endpoint, e),
            Err(_) => debug!("Probe {}/{} of {} timed out", attempt, attempts, endpoint),
        }

        if attempt < attempts {
            tokio::time::sleep(config.probe_interval).await;
        }
    }

    warn!("Tor proxy at {} unreachable after {} attempts", endpoint, attempts);
    ProbeReport {
        reachable: false,
        attempts,
        latency: None,
    }
}

/// Create a Tor-enabled HTTP client
pub fn create_tor_client(config: &TorConfig) -> Result<Client, FetchError> {
    let proxy = Proxy::all(config.socks_url())
        .map_err(|e| FetchError::ClientBuild(e.to_string()))?;

    Client::builder()
        .proxy(proxy)
        .danger_accept_invalid_certs(true) // Many .onion sites have self-signed certs
        .build()
        .map_err(|e| FetchError::ClientBuild(e.to_string()))
}

/// [`Gateway`] that routes every request through the Tor SOCKS proxy
#[derive(Debug, Clone)]
pub struct TorGateway {
    config: TorConfig,
    client: Client,
}

impl TorGateway {
    pub fn new(config: TorConfig) -> Result<Self, FetchError> {
        let client = create_tor_client(&config)?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &TorConfig {
        &self.config
    }
}

fn map_reqwest_error(err: reqwest::Error, timeout: Duration) -> FetchError {
    if err.is_timeout() {
        return FetchError::Timeout(timeout);
    }
    if err.is_builder() {
        return FetchError::InvalidUrl(err.to_string());
    }
    FetchError::Connection(err.to_string())
}

#[async_trait]
impl Gateway for TorGateway {
    fn endpoint(&self) -> String {
        self.config.endpoint()
    }

    async fn probe(&self) -> bool {
        probe_proxy(&self.config).await.reachable
    }

    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, random_user_agent())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            debug!("{} returned status: {}", url, status);
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        response
            .text()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))
    }
}

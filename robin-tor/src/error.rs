//! Errors that abort a whole orchestration call
//!
//! Everything else (a dead engine, a 404 page, a parser bug) is reported as
//! data on the per-engine or per-URL result.

use thiserror::Error;

use crate::FetchError;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Tor proxy unavailable at {0}")]
    ProxyUnavailable(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Gateway error: {0}")]
    Gateway(#[from] FetchError),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = OrchestratorError::ProxyUnavailable("127.0.0.1:9050".into());
        assert_eq!(err.to_string(), "Tor proxy unavailable at 127.0.0.1:9050");

        let err: OrchestratorError = FetchError::ClientBuild("bad proxy".into()).into();
        assert_eq!(err.to_string(), "Gateway error: Failed to build Tor client: bad proxy");
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<OrchestratorError>();
    }
}

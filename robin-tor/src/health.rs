//! Search engine health pings

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info};

use robin_core::EngineCatalog;

use crate::{Gateway, OrchestratorError};

/// Query sent to each engine when pinging
const PING_QUERY: &str = "test";

/// Reachability of one engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineHealth {
    pub name: String,
    pub up: bool,
    pub latency: Option<Duration>,
    pub error: Option<String>,
}

/// Ping every enabled engine once, results in catalog order
pub async fn check_engines(
    gateway: Arc<dyn Gateway>,
    catalog: &EngineCatalog,
    max_concurrent: usize,
    timeout: Duration,
) -> Result<Vec<EngineHealth>, OrchestratorError> {
    if !gateway.probe().await {
        return Err(OrchestratorError::ProxyUnavailable(gateway.endpoint()));
    }

    let targets: Vec<(usize, String, String)> = catalog
        .all()
        .into_iter()
        .enumerate()
        .map(|(i, e)| (i, e.build_url(PING_QUERY), e.name))
        .collect();

    let mut checked: Vec<(usize, EngineHealth)> = stream::iter(targets)
        .map(|(index, url, name)| {
            let gateway = Arc::clone(&gateway);
            async move {
                let started = Instant::now();
                let health = match gateway.fetch(&url, timeout).await {
                    Ok(_) => EngineHealth {
                        name,
                        up: true,
                        latency: Some(started.elapsed()),
                        error: None,
                    },
                    Err(e) => {
                        debug!("Engine {} down: {}", name, e);
                        EngineHealth {
                            name,
                            up: false,
                            latency: None,
                            error: Some(e.to_string()),
                        }
                    }
                };
                (index, health)
            }
        })
        .buffer_unordered(max_concurrent.max(1))
        .collect()
        .await;

    checked.sort_by_key(|(index, _)| *index);
    let health: Vec<EngineHealth> = checked.into_iter().map(|(_, h)| h).collect();
    info!(
        "{}/{} engines reachable",
        health.iter().filter(|h| h.up).count(),
        health.len()
    );
    Ok(health)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedGateway, Step};
    use crate::FetchError;
    use robin_core::{EngineDescriptor, OnionLinkParser};

    fn catalog() -> EngineCatalog {
        EngineCatalog::new(
            ["Alpha", "Beta", "Gamma"]
                .iter()
                .map(|name| {
                    EngineDescriptor::new(
                        *name,
                        format!("http://{}.onion/search?q={{query}}", name.to_lowercase()),
                        Arc::new(OnionLinkParser),
                    )
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_health_in_catalog_order() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .route("alpha", vec![Step::ok_after("<html></html>", 30)])
                .route("beta", vec![Step::fail(FetchError::HttpStatus(502))])
                .route("gamma", vec![Step::ok("<html></html>")]),
        );

        let health = check_engines(gateway.clone(), &catalog(), 3, Duration::from_secs(1))
            .await
            .unwrap();

        let names: Vec<_> = health.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Beta", "Gamma"]);
        assert!(health[0].up && health[0].latency.is_some());
        assert!(!health[1].up);
        assert_eq!(health[1].error.as_deref(), Some("HTTP status 502"));
        assert!(health[2].up);
        assert_eq!(gateway.total_calls(), 3);
    }

    #[tokio::test]
    async fn test_health_requires_proxy() {
        let gateway = Arc::new(ScriptedGateway::unreachable());
        let err = check_engines(gateway, &catalog(), 3, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::ProxyUnavailable(_)));
    }
}

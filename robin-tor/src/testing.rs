//! Scripted in-memory gateway for orchestration tests

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::{FetchError, Gateway};

/// One scripted response
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Respond { body: String, after: Duration },
    Fail { error: FetchError, after: Duration },
}

impl Step {
    pub(crate) fn ok(body: impl Into<String>) -> Self {
        Self::ok_after(body, 0)
    }

    pub(crate) fn ok_after(body: impl Into<String>, millis: u64) -> Self {
        Self::Respond {
            body: body.into(),
            after: Duration::from_millis(millis),
        }
    }

    pub(crate) fn fail(error: FetchError) -> Self {
        Self::fail_after(error, 0)
    }

    pub(crate) fn fail_after(error: FetchError, millis: u64) -> Self {
        Self::Fail {
            error,
            after: Duration::from_millis(millis),
        }
    }

    pub(crate) fn timeout(millis: u64) -> Self {
        let after = Duration::from_millis(millis);
        Self::Fail {
            error: FetchError::Timeout(after),
            after,
        }
    }
}

/// Routes a URL to the first script whose key it contains; the last step
/// of a script repeats forever
pub(crate) struct ScriptedGateway {
    reachable: bool,
    routes: Vec<(String, Vec<Step>)>,
    calls: Mutex<HashMap<String, u32>>,
}

impl ScriptedGateway {
    pub(crate) fn new() -> Self {
        Self {
            reachable: true,
            routes: Vec::new(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::new()
        }
    }

    pub(crate) fn route(mut self, key: &str, steps: Vec<Step>) -> Self {
        self.routes.push((key.to_string(), steps));
        self
    }

    pub(crate) fn calls_for(&self, key: &str) -> u32 {
        self.calls.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl Gateway for ScriptedGateway {
    fn endpoint(&self) -> String {
        "scripted:0".to_string()
    }

    async fn probe(&self) -> bool {
        self.reachable
    }

    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<String, FetchError> {
        let Some((key, steps)) = self.routes.iter().find(|(key, _)| url.contains(key.as_str())) else {
            return Err(FetchError::Connection(format!("no route for {url}")));
        };

        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(key.clone()).or_insert(0);
            *count += 1;
            *count as usize
        };

        let step = steps[(call - 1).min(steps.len() - 1)].clone();
        match step {
            Step::Respond { body, after } => {
                tokio::time::sleep(after).await;
                Ok(body)
            }
            Step::Fail { error, after } => {
                tokio::time::sleep(after).await;
                Err(error)
            }
        }
    }
}

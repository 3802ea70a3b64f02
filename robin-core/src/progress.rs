//! Progress events streamed to a live consumer
//!
//! Events are append-only and ordered by emission time. The serialised
//! shape is what streaming consumers (SSE, NDJSON) rely on:
//!
//! ```json
//! {"type":"search_progress","engine_name":"Ahmia","status":"success",
//!  "results_count":12,"total_engines":17,"completed_engines":3,
//!  "total_results":30,"message":"Found 12 results"}
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::trace;

/// Which orchestrator produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SearchProgress,
    ScrapeProgress,
}

/// Lifecycle status carried by a progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Starting,
    Searching,
    Success,
    Failed,
    Timeout,
    EarlyExit,
    HighFailureRate,
    Complete,
}

impl ProgressStatus {
    /// Terminal per-task statuses (one per engine or URL)
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Timeout)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Searching => "searching",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::EarlyExit => "early_exit",
            Self::HighFailureRate => "high_failure_rate",
            Self::Complete => "complete",
        }
    }
}

impl std::fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Running totals attached to every event of one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounters {
    pub total: usize,
    pub completed: usize,
    pub total_results: usize,
}

/// A single status update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Engine name (search) or URL (scrape); empty for run-level events
    pub engine_name: String,
    pub status: ProgressStatus,
    /// Results produced by this engine, 0 for run-level events
    pub results_count: usize,
    pub total_engines: usize,
    pub completed_engines: usize,
    /// Unique results (search) or successful scrapes so far
    pub total_results: usize,
    pub message: String,
}

impl ProgressEvent {
    pub fn new(
        kind: EventKind,
        engine_name: impl Into<String>,
        status: ProgressStatus,
        results_count: usize,
        counters: RunCounters,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            engine_name: engine_name.into(),
            status,
            results_count,
            total_engines: counters.total,
            completed_engines: counters.completed,
            total_results: counters.total_results,
            message: message.into(),
        }
    }

    /// Run-level event not tied to a specific engine or URL
    pub fn run_level(
        kind: EventKind,
        status: ProgressStatus,
        counters: RunCounters,
        message: impl Into<String>,
    ) -> Self {
        Self::new(kind, "", status, 0, counters, message)
    }

    /// Serialise to the stable wire shape
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Append-only event channel handed to an orchestrator
///
/// Emitting never blocks and never fails the run; events sent after the
/// consumer has gone away are dropped.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    /// Create a connected sink and the stream that consumes it
    pub fn channel() -> (Self, ProgressStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, ProgressStream { rx })
    }

    /// A sink that discards everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: ProgressEvent) {
        trace!(status = %event.status, engine = %event.engine_name, "{}", event.message);
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

/// Consumer side of a [`ProgressSink`]
#[derive(Debug)]
pub struct ProgressStream {
    rx: UnboundedReceiver<ProgressEvent>,
}

impl ProgressStream {
    /// Wait for the next event; `None` once every sink clone is dropped
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    /// Take every event already buffered without waiting
    pub fn drain(&mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters() -> RunCounters {
        RunCounters {
            total: 17,
            completed: 3,
            total_results: 30,
        }
    }

    #[test]
    fn test_wire_shape() {
        let event = ProgressEvent::new(
            EventKind::SearchProgress,
            "Ahmia",
            ProgressStatus::Success,
            12,
            counters(),
            "Found 12 results",
        );

        let value: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(value["type"], "search_progress");
        assert_eq!(value["engine_name"], "Ahmia");
        assert_eq!(value["status"], "success");
        assert_eq!(value["results_count"], 12);
        assert_eq!(value["total_engines"], 17);
        assert_eq!(value["completed_engines"], 3);
        assert_eq!(value["total_results"], 30);
        assert_eq!(value["message"], "Found 12 results");
        assert_eq!(value.as_object().unwrap().len(), 8);
    }

    #[test]
    fn test_status_names() {
        let json = serde_json::to_string(&ProgressStatus::HighFailureRate).unwrap();
        assert_eq!(json, "\"high_failure_rate\"");
        assert_eq!(ProgressStatus::EarlyExit.to_string(), "early_exit");
        assert!(ProgressStatus::Timeout.is_terminal());
        assert!(!ProgressStatus::Complete.is_terminal());
    }

    #[test]
    fn test_sink_delivers_in_order() {
        let (sink, mut stream) = ProgressSink::channel();
        for status in [ProgressStatus::Starting, ProgressStatus::Complete] {
            sink.emit(ProgressEvent::run_level(
                EventKind::ScrapeProgress,
                status,
                RunCounters::default(),
                "",
            ));
        }
        drop(sink);

        let statuses: Vec<_> = stream.drain().into_iter().map(|e| e.status).collect();
        assert_eq!(statuses, vec![ProgressStatus::Starting, ProgressStatus::Complete]);
    }

    #[test]
    fn test_disabled_sink_is_silent() {
        let sink = ProgressSink::disabled();
        sink.emit(ProgressEvent::run_level(
            EventKind::SearchProgress,
            ProgressStatus::Starting,
            RunCounters::default(),
            "",
        ));
    }
}

//! Lifecycle events and the observer boundary.
//!
//! The engine emits a closed set of [`RunEvent`] variants over a single
//! [`EventSink`] interface; the external reporting layer pattern-matches
//! on event kind. Per-host ordering is causal (task start before its
//! outcome); cross-host ordering is only as strict as the per-task
//! barrier.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::transport::RawResult;

/// One lifecycle event of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    /// The run began.
    RunStart { run_id: String },
    /// A play began.
    PlayStart { name: String },
    /// A play matched zero hosts and was skipped as a no-op.
    NoHostsMatched { play: String },
    /// Every host of the current play is benched; the play ends early.
    NoHostsRemaining { play: String },
    /// A task step began (once per task, before host fan-out).
    TaskStart { name: String, is_conditional: bool },
    /// A task completed on a host without failure; `result.changed`
    /// distinguishes changed from ok.
    TaskOk { host: String, result: RawResult },
    /// A task failed on a host. `ignored` marks failures suppressed by
    /// `ignore_errors`: visible here, absent from the failure counter.
    TaskFailed {
        host: String,
        result: RawResult,
        ignored: bool,
    },
    /// A task was skipped on a host.
    TaskSkipped { host: String },
    /// A host became unreachable.
    Unreachable { host: String, message: String },
    /// A task notified a handler.
    HandlerNotified { host: String, handler: String },
    /// An async task was launched.
    AsyncLaunched { host: String, job_id: String },
    /// An async poll tick found the job still running.
    AsyncPoll {
        host: String,
        job_id: String,
        elapsed_secs: u64,
    },
    /// An async job finished successfully.
    AsyncOk { host: String, job_id: String },
    /// An async job finished failed or timed out.
    AsyncFailed { host: String, job_id: String },
}

/// Observer boundary: consumes the ordered event stream.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Receive one lifecycle event.
    async fn emit(&self, event: RunEvent);
}

/// Shared sink handle threaded through the engine.
pub type SharedSink = Arc<dyn EventSink>;

/// Sink that discards every event. Useful for tests and embedding.
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn emit(&self, _event: RunEvent) {}
}

/// Sink that forwards events to the `tracing` subscriber. This is the
/// default reporting layer.
#[derive(Debug, Default)]
pub struct TracingSink;

#[async_trait]
impl EventSink for TracingSink {
    async fn emit(&self, event: RunEvent) {
        match &event {
            RunEvent::RunStart { run_id } => info!(%run_id, "run started"),
            RunEvent::PlayStart { name } => info!(play = %name, "play started"),
            RunEvent::NoHostsMatched { play } => warn!(play = %play, "no hosts matched"),
            RunEvent::NoHostsRemaining { play } => warn!(play = %play, "no hosts remaining"),
            RunEvent::TaskStart {
                name,
                is_conditional,
            } => info!(task = %name, conditional = is_conditional, "task started"),
            RunEvent::TaskOk { host, result } => {
                info!(host = %host, changed = result.changed, "task ok");
            }
            RunEvent::TaskFailed {
                host,
                result,
                ignored,
            } => {
                warn!(host = %host, ignored, msg = ?result.msg, "task failed");
            }
            RunEvent::TaskSkipped { host } => debug!(host = %host, "task skipped"),
            RunEvent::Unreachable { host, message } => {
                warn!(host = %host, %message, "host unreachable");
            }
            RunEvent::HandlerNotified { host, handler } => {
                debug!(host = %host, handler = %handler, "handler notified");
            }
            RunEvent::AsyncLaunched { host, job_id } => {
                debug!(host = %host, job = %job_id, "async task launched");
            }
            RunEvent::AsyncPoll {
                host,
                job_id,
                elapsed_secs,
            } => debug!(host = %host, job = %job_id, elapsed_secs, "async poll"),
            RunEvent::AsyncOk { host, job_id } => {
                debug!(host = %host, job = %job_id, "async task finished");
            }
            RunEvent::AsyncFailed { host, job_id } => {
                warn!(host = %host, job = %job_id, "async task failed");
            }
        }
    }
}

/// Sink that records every event in order, for inspection in tests.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<RunEvent>>,
}

impl CollectingSink {
    /// Create an empty collecting sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events received so far.
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().clone()
    }

    /// Events concerning the given host, in arrival order.
    pub fn events_for_host(&self, host: &str) -> Vec<RunEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| match event {
                RunEvent::TaskOk { host: h, .. }
                | RunEvent::TaskFailed { host: h, .. }
                | RunEvent::TaskSkipped { host: h }
                | RunEvent::Unreachable { host: h, .. }
                | RunEvent::HandlerNotified { host: h, .. }
                | RunEvent::AsyncLaunched { host: h, .. }
                | RunEvent::AsyncPoll { host: h, .. }
                | RunEvent::AsyncOk { host: h, .. }
                | RunEvent::AsyncFailed { host: h, .. } => h == host,
                _ => false,
            })
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingSink {
    async fn emit(&self, event: RunEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collecting_sink_preserves_order() {
        let sink = CollectingSink::new();
        sink.emit(RunEvent::RunStart {
            run_id: "r1".into(),
        })
        .await;
        sink.emit(RunEvent::PlayStart {
            name: "site".into(),
        })
        .await;
        sink.emit(RunEvent::TaskSkipped {
            host: "web1".into(),
        })
        .await;

        let events = sink.events();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], RunEvent::RunStart { .. }));
        assert_eq!(
            sink.events_for_host("web1"),
            vec![RunEvent::TaskSkipped {
                host: "web1".into()
            }]
        );
    }

    #[test]
    fn events_serialize_with_tag() {
        let event = RunEvent::TaskStart {
            name: "install".into(),
            is_conditional: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "task_start");
        assert_eq!(json["is_conditional"], true);
    }
}

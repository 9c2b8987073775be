//! Per-(host, task) dispatch and outcome classification.
//!
//! The dispatcher owns the full lifecycle of one task on one host:
//! run-condition check, argument templating, transport execution (sync or
//! background), failure/changed overrides, `ignore_errors` suppression,
//! handler notification, and result registration. Exactly one stats
//! counter is recorded per dispatch on an active host; benched hosts are
//! not dispatched at all.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::callback::{RunEvent, SharedSink};
use crate::config::RunConfig;
use crate::executor::handlers::HandlerLedger;
use crate::executor::poller::AsyncPoller;
use crate::playbook::Task;
use crate::stats::{AggregateStats, Classification};
use crate::template::{EvalError, Evaluator, Scope};
use crate::transport::{ExecutionRequest, RawResult, Transport, TransportError};
use crate::vars::VarStore;

/// The classified outcome of one dispatch. Immutable once produced.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub classification: Classification,
    pub result: RawResult,
    /// The result arrived through the background poll loop rather than a
    /// synchronous execute.
    pub polled: bool,
    /// A module failure was suppressed by `ignore_errors`: visible to
    /// observers, absent from the failure counter.
    pub ignored_failure: bool,
}

impl TaskOutcome {
    fn new(classification: Classification, result: RawResult) -> Self {
        Self {
            classification,
            result,
            polled: false,
            ignored_failure: false,
        }
    }

    fn polled(mut self, polled: bool) -> Self {
        self.polled = polled;
        self
    }
}

// Verdict of a condition evaluation after policy mapping.
enum Verdict {
    Value(bool),
    Undefined(String),
    Invalid(String),
}

/// Executes tasks host by host and classifies what comes back.
pub struct TaskDispatcher {
    config: RunConfig,
    store: Arc<RwLock<VarStore>>,
    stats: Arc<AggregateStats>,
    sink: SharedSink,
    transport: Arc<dyn Transport>,
    evaluator: Arc<dyn Evaluator>,
    ledger: Arc<HandlerLedger>,
    // host -> reason; a benched host stays benched for the whole run
    benched: Arc<DashMap<String, String>>,
}

impl TaskDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: RunConfig,
        store: Arc<RwLock<VarStore>>,
        stats: Arc<AggregateStats>,
        sink: SharedSink,
        transport: Arc<dyn Transport>,
        evaluator: Arc<dyn Evaluator>,
        ledger: Arc<HandlerLedger>,
        benched: Arc<DashMap<String, String>>,
    ) -> Self {
        Self {
            config,
            store,
            stats,
            sink,
            transport,
            evaluator,
            ledger,
            benched,
        }
    }

    /// Whether the host has been benched as unreachable.
    pub fn is_benched(&self, host: &str) -> bool {
        self.benched.contains_key(host)
    }

    /// Run one task on one host. Returns `None` without touching stats
    /// when the host is benched; otherwise records exactly one counter and
    /// returns the classified outcome.
    pub async fn dispatch(&self, host: &str, task: &Task) -> Option<TaskOutcome> {
        if self.is_benched(host) {
            debug!(host = %host, task = %task.name, "host benched, not dispatched");
            return None;
        }

        let scope = self.store.read().resolve(host);

        // Run condition. False skips without executing; an undefined
        // reference under fail mode benches the host.
        if let Some(condition) = &task.when {
            match self.eval_condition(condition, &scope) {
                Verdict::Value(true) => {}
                Verdict::Value(false) => {
                    return Some(self.finish_skipped(host).await);
                }
                Verdict::Undefined(message) => {
                    return Some(self.bench(host, message).await);
                }
                Verdict::Invalid(message) => {
                    return Some(
                        self.finish_failed(host, RawResult::failed(message), false)
                            .await,
                    );
                }
            }
        }

        // Template string arguments against the host's merged scope.
        let args = match self.render_args(task, &scope) {
            Ok(args) => args,
            Err(EvalError::Undefined(message)) => {
                return Some(self.bench(host, message).await);
            }
            Err(err @ EvalError::Invalid { .. }) => {
                return Some(
                    self.finish_failed(host, RawResult::failed(err.to_string()), false)
                        .await,
                );
            }
        };

        let request = ExecutionRequest {
            host: host.to_string(),
            module: task.module.clone(),
            args,
            check_mode: self.config.check_mode && !task.always_run,
        };

        let (executed, polled) = if let Some(spec) = &task.async_spec {
            let poll_secs = spec.poll_secs.unwrap_or(self.config.poll_interval_secs);
            let result = AsyncPoller::new(Arc::clone(&self.transport), Arc::clone(&self.sink))
                .run(&request, spec.timeout_secs, poll_secs)
                .await;
            (result, poll_secs > 0)
        } else {
            (self.transport.execute(&request).await, false)
        };

        let raw = match executed {
            Ok(raw) => raw,
            Err(TransportError::Unreachable(message)) => {
                return Some(self.bench(host, message).await);
            }
            Err(err) => RawResult::failed(err.to_string()),
        };

        // The result payload is registered for every executed task, before
        // classification, so later expressions on this host can see it.
        if let Some(name) = &task.register {
            self.store.read().register(host, name, raw.to_value());
        }

        Some(self.classify(host, task, &scope, raw, polled).await)
    }

    // ========================================================================
    // Classification
    // ========================================================================

    async fn classify(
        &self,
        host: &str,
        task: &Task,
        scope: &Scope,
        raw: RawResult,
        polled: bool,
    ) -> TaskOutcome {
        // changed_when / failed_when see the merged scope plus the result
        // payload, both under the register name and as `result`.
        let mut result_scope = scope.clone();
        let payload = raw.to_value();
        if let Some(name) = &task.register {
            result_scope.insert(name.clone(), payload.clone());
        }
        result_scope.insert("result".to_string(), payload);

        let failed = match &task.failed_when {
            Some(expr) => match self.eval_condition(expr, &result_scope) {
                Verdict::Value(v) => v,
                Verdict::Undefined(message) => return self.bench(host, message).await,
                Verdict::Invalid(message) => {
                    return self
                        .finish_failed(host, raw.with_msg(message), false)
                        .await
                        .polled(polled);
                }
            },
            None => raw.is_failed(),
        };

        if failed {
            if task.ignore_errors {
                // Counter-only suppression: the failure stays visible in
                // the event stream, the counters see ok/changed from the
                // module's own changed flag.
                self.sink
                    .emit(RunEvent::TaskFailed {
                        host: host.to_string(),
                        result: raw.clone(),
                        ignored: true,
                    })
                    .await;
                let classification = if raw.changed {
                    Classification::Changed
                } else {
                    Classification::Ok
                };
                self.stats.record(host, classification);
                if classification == Classification::Changed {
                    self.notify_handlers(host, task).await;
                }
                let mut outcome = TaskOutcome::new(classification, raw).polled(polled);
                outcome.ignored_failure = true;
                return outcome;
            }
            return self.finish_failed(host, raw, false).await.polled(polled);
        }

        // The transport declined to do the work (e.g. check mode without
        // support): counts as skipped, not ok.
        if raw.skipped {
            self.stats.record(host, Classification::Skipped);
            self.sink
                .emit(RunEvent::TaskSkipped {
                    host: host.to_string(),
                })
                .await;
            return TaskOutcome::new(Classification::Skipped, raw).polled(polled);
        }

        let changed = match &task.changed_when {
            Some(expr) => match self.eval_condition(expr, &result_scope) {
                Verdict::Value(v) => v,
                Verdict::Undefined(message) => return self.bench(host, message).await,
                Verdict::Invalid(message) => {
                    return self
                        .finish_failed(host, raw.with_msg(message), false)
                        .await
                        .polled(polled);
                }
            },
            None => raw.changed,
        };

        let classification = if changed {
            Classification::Changed
        } else {
            Classification::Ok
        };
        self.stats.record(host, classification);
        self.sink
            .emit(RunEvent::TaskOk {
                host: host.to_string(),
                result: raw.clone(),
            })
            .await;

        if classification == Classification::Changed {
            self.notify_handlers(host, task).await;
        }

        TaskOutcome::new(classification, raw).polled(polled)
    }

    async fn notify_handlers(&self, host: &str, task: &Task) {
        for handler in &task.notify {
            if self.ledger.notify(host, handler) {
                self.sink
                    .emit(RunEvent::HandlerNotified {
                        host: host.to_string(),
                        handler: handler.clone(),
                    })
                    .await;
            }
        }
    }

    // ========================================================================
    // Terminal outcomes
    // ========================================================================

    async fn finish_skipped(&self, host: &str) -> TaskOutcome {
        self.stats.record(host, Classification::Skipped);
        self.sink
            .emit(RunEvent::TaskSkipped {
                host: host.to_string(),
            })
            .await;
        TaskOutcome::new(
            Classification::Skipped,
            RawResult::skipped("conditional check failed"),
        )
    }

    async fn finish_failed(&self, host: &str, result: RawResult, ignored: bool) -> TaskOutcome {
        if !ignored {
            self.stats.record(host, Classification::Failed);
        }
        self.sink
            .emit(RunEvent::TaskFailed {
                host: host.to_string(),
                result: result.clone(),
                ignored,
            })
            .await;
        TaskOutcome::new(Classification::Failed, result)
    }

    async fn bench(&self, host: &str, message: String) -> TaskOutcome {
        self.benched.insert(host.to_string(), message.clone());
        self.stats.record(host, Classification::Unreachable);
        self.sink
            .emit(RunEvent::Unreachable {
                host: host.to_string(),
                message: message.clone(),
            })
            .await;
        TaskOutcome::new(Classification::Unreachable, RawResult::failed(message))
    }

    // ========================================================================
    // Evaluation helpers
    // ========================================================================

    fn eval_condition(&self, expr: &str, scope: &Scope) -> Verdict {
        match self
            .evaluator
            .eval_bool(expr, scope, self.config.undefined_vars)
        {
            Ok(value) => Verdict::Value(value),
            Err(EvalError::Undefined(message)) => Verdict::Undefined(message),
            Err(err @ EvalError::Invalid { .. }) => Verdict::Invalid(err.to_string()),
        }
    }

    fn render_args(
        &self,
        task: &Task,
        scope: &Scope,
    ) -> Result<indexmap::IndexMap<String, JsonValue>, EvalError> {
        let mut rendered = indexmap::IndexMap::with_capacity(task.args.len());
        for (key, value) in &task.args {
            rendered.insert(key.clone(), self.render_value(value, scope)?);
        }
        Ok(rendered)
    }

    fn render_value(&self, value: &JsonValue, scope: &Scope) -> Result<JsonValue, EvalError> {
        match value {
            JsonValue::String(s) => {
                let rendered = self
                    .evaluator
                    .render(s, scope, self.config.undefined_vars)?;
                Ok(JsonValue::String(rendered))
            }
            JsonValue::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.render_value(item, scope)?);
                }
                Ok(JsonValue::Array(out))
            }
            JsonValue::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.render_value(v, scope)?);
                }
                Ok(JsonValue::Object(out))
            }
            other => Ok(other.clone()),
        }
    }
}

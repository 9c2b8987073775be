//! Shared test fixtures: a fully scriptable transport and inventory
//! helpers.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::result::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use runbook::prelude::*;

/// A transport whose behaviour is scripted per host/module: queued
/// results, unreachable hosts, check-mode capability, and background-job
/// poll sequences. Every request is recorded for order assertions.
#[derive(Default)]
pub struct ScriptedTransport {
    // (host, module) -> queued results, consumed front to back
    queued: Mutex<HashMap<(String, String), VecDeque<RawResult>>>,
    // module -> result used when no queued entry matches
    module_defaults: Mutex<HashMap<String, RawResult>>,
    unreachable: Mutex<HashSet<String>>,
    // modules that honour check mode; others report skipped under it
    check_capable: Mutex<HashSet<String>>,
    // module -> (launch ack, poll sequence template)
    async_scripts: Mutex<HashMap<String, (RawResult, Vec<PollStatus>)>>,
    jobs: Mutex<HashMap<String, VecDeque<PollStatus>>>,
    next_job: AtomicUsize,
    pub requests: Mutex<Vec<ExecutionRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one result for a specific (host, module) pair.
    pub fn respond(self, host: &str, module: &str, result: RawResult) -> Self {
        self.queued
            .lock()
            .entry((host.to_string(), module.to_string()))
            .or_default()
            .push_back(result);
        self
    }

    /// Fallback result for a module on any host.
    pub fn module_result(self, module: &str, result: RawResult) -> Self {
        self.module_defaults
            .lock()
            .insert(module.to_string(), result);
        self
    }

    /// Make a host unreachable for every request.
    pub fn unreachable_host(self, host: &str) -> Self {
        self.unreachable.lock().insert(host.to_string());
        self
    }

    /// Mark a module as honouring check mode (it reports real results
    /// instead of a skip when the check flag is set).
    pub fn check_capable(self, module: &str) -> Self {
        self.check_capable.lock().insert(module.to_string());
        self
    }

    /// Script a module's background behaviour: the launch acknowledgement
    /// and the poll sequence each job walks through. An exhausted
    /// sequence keeps reporting pending (which drives timeout tests).
    pub fn async_script(self, module: &str, ack: RawResult, polls: Vec<PollStatus>) -> Self {
        self.async_scripts
            .lock()
            .insert(module.to_string(), (ack, polls));
        self
    }

    /// Module names in request order.
    pub fn executed_modules(&self) -> Vec<String> {
        self.requests.lock().iter().map(|r| r.module.clone()).collect()
    }

    /// Hosts in request order.
    pub fn executed_hosts(&self) -> Vec<String> {
        self.requests.lock().iter().map(|r| r.host.clone()).collect()
    }

    fn resolve(&self, host: &str, module: &str) -> RawResult {
        if let Some(queue) = self
            .queued
            .lock()
            .get_mut(&(host.to_string(), module.to_string()))
        {
            if let Some(result) = queue.pop_front() {
                return result;
            }
        }
        self.module_defaults
            .lock()
            .get(module)
            .cloned()
            .unwrap_or_else(RawResult::ok)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: &ExecutionRequest) -> Result<RawResult, TransportError> {
        self.requests.lock().push(request.clone());
        if self.unreachable.lock().contains(&request.host) {
            return Err(TransportError::Unreachable(format!(
                "no route to {}",
                request.host
            )));
        }
        if request.check_mode && !self.check_capable.lock().contains(&request.module) {
            return Ok(RawResult::skipped("check mode not supported"));
        }
        Ok(self.resolve(&request.host, &request.module))
    }

    async fn launch(&self, request: &ExecutionRequest) -> Result<AsyncLaunch, TransportError> {
        self.requests.lock().push(request.clone());
        if self.unreachable.lock().contains(&request.host) {
            return Err(TransportError::Unreachable(format!(
                "no route to {}",
                request.host
            )));
        }
        let (ack, polls) = self
            .async_scripts
            .lock()
            .get(&request.module)
            .cloned()
            .unwrap_or_else(|| (RawResult::ok(), Vec::new()));
        let job_id = format!("job-{}", self.next_job.fetch_add(1, Ordering::SeqCst));
        self.jobs.lock().insert(job_id.clone(), polls.into());
        Ok(AsyncLaunch { job_id, ack })
    }

    async fn poll(&self, _host: &str, job_id: &str) -> Result<PollStatus, TransportError> {
        let mut jobs = self.jobs.lock();
        let queue = jobs
            .get_mut(job_id)
            .ok_or_else(|| TransportError::UnknownJob(job_id.to_string()))?;
        Ok(queue.pop_front().unwrap_or(PollStatus::Pending))
    }
}

/// Two web hosts and one db host, grouped.
pub fn sample_inventory() -> Arc<StaticInventory> {
    Arc::new(
        StaticInventory::new()
            .group("webservers", vec!["web1", "web2"])
            .group("dbservers", vec!["db1"]),
    )
}

/// Route engine tracing through the test harness; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A runner over the given transport with a collecting sink attached.
pub fn runner_with_sink(
    config: RunConfig,
    inventory: Arc<StaticInventory>,
    transport: Arc<ScriptedTransport>,
) -> (PlaybookRunner, Arc<CollectingSink>) {
    init_tracing();
    let sink = Arc::new(CollectingSink::new());
    let runner = PlaybookRunner::new(config, inventory, transport).with_sink(sink.clone());
    (runner, sink)
}

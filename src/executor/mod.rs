//! Run orchestration.
//!
//! [`PlaybookRunner`] is the entry point: it validates the book, wires up
//! the per-run state (variable store, stats, fork semaphore, handler
//! ledger, benched-host set) and drives the plays strictly in order
//! through [`PlayRunner`]. Hosts benched as unreachable in one play stay
//! benched for every later play of the same run.

pub mod handlers;
pub mod play;
pub mod poller;
pub mod task;

pub use handlers::HandlerLedger;
pub use play::{PlayReport, PlayRunner};
pub use poller::AsyncPoller;
pub use task::{TaskDispatcher, TaskOutcome};

use std::sync::Arc;

use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::callback::{RunEvent, SharedSink, TracingSink};
use crate::config::RunConfig;
use crate::error::Result;
use crate::inventory::Inventory;
use crate::playbook::Playbook;
use crate::stats::{AggregateStats, HostStats};
use crate::template::{Evaluator, JinjaEvaluator};
use crate::transport::Transport;
use crate::vars::{FactCache, VarStore};

/// Executes playbooks against an inventory over a transport.
pub struct PlaybookRunner {
    config: RunConfig,
    inventory: Arc<dyn Inventory>,
    transport: Arc<dyn Transport>,
    sink: SharedSink,
    evaluator: Arc<dyn Evaluator>,
    cache: Arc<FactCache>,
}

impl PlaybookRunner {
    /// Create a runner with the default event sink (tracing) and the
    /// default expression evaluator.
    pub fn new(
        config: RunConfig,
        inventory: Arc<dyn Inventory>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            config,
            inventory,
            transport,
            sink: Arc::new(TracingSink),
            evaluator: Arc::new(JinjaEvaluator::new()),
            cache: Arc::new(FactCache::new()),
        }
    }

    /// Replace the event sink.
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Replace the expression evaluator.
    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Run a whole playbook: validate, then execute every play in order.
    /// Returns the final per-host counters, sorted by hostname. Structural
    /// errors (validation, bad host patterns anywhere in the book) abort
    /// before any host executes; per-host failures do not.
    #[instrument(skip_all, fields(playbook = %playbook.name))]
    pub async fn run(&self, playbook: &Playbook) -> Result<IndexMap<String, HostStats>> {
        playbook.validate()?;

        // Expand every play's pattern up front: a structurally bad
        // pattern anywhere in the book aborts before any host executes.
        let mut expansions = Vec::with_capacity(playbook.plays.len());
        for play in &playbook.plays {
            expansions.push(self.inventory.expand(&play.hosts)?);
        }

        // Registered values never survive across runs.
        self.cache.reset();

        let store = Arc::new(RwLock::new(VarStore::new(
            self.config.hash_behaviour,
            Arc::clone(&self.cache),
        )));
        {
            let mut store = store.write();
            store.set_defaults(playbook.vars.clone());
            store.set_extra_vars(self.config.extra_vars.clone());
        }

        let stats = Arc::new(AggregateStats::new());
        let ledger = Arc::new(HandlerLedger::new());
        let benched: Arc<DashMap<String, String>> = Arc::new(DashMap::new());
        let semaphore = Arc::new(Semaphore::new(self.config.forks));

        let dispatcher = Arc::new(TaskDispatcher::new(
            self.config.clone(),
            Arc::clone(&store),
            Arc::clone(&stats),
            Arc::clone(&self.sink),
            Arc::clone(&self.transport),
            Arc::clone(&self.evaluator),
            Arc::clone(&ledger),
            Arc::clone(&benched),
        ));
        let runner = PlayRunner::new(
            dispatcher,
            Arc::clone(&self.sink),
            semaphore,
            ledger,
            Arc::clone(&benched),
        );

        self.sink
            .emit(RunEvent::RunStart {
                run_id: Uuid::new_v4().to_string(),
            })
            .await;

        for (play, hosts) in playbook.plays.iter().zip(expansions) {
            {
                let mut store = store.write();
                store.set_play_vars(play.vars.clone());
                for host in &hosts {
                    store.set_host_vars(host.clone(), self.inventory.host_vars(host));
                }
            }
            for host in &hosts {
                stats.ensure_host(host);
            }

            let report = runner.run(play, &hosts).await?;

            store.write().clear_play_vars();

            if self.config.stop_on_unreachable && report.matched > 0 && report.remaining == 0 {
                info!(play = %play.name, "no hosts remaining, stopping run");
                break;
            }
        }

        Ok(stats.summarize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::result::Result;

    use crate::callback::CollectingSink;
    use crate::inventory::StaticInventory;
    use crate::playbook::{Play, Task};
    use crate::transport::{
        AsyncLaunch, ExecutionRequest, PollStatus, RawResult, TransportError,
    };

    struct AlwaysChanged;

    #[async_trait]
    impl Transport for AlwaysChanged {
        async fn execute(
            &self,
            _request: &ExecutionRequest,
        ) -> Result<RawResult, TransportError> {
            Ok(RawResult::changed())
        }
        async fn launch(
            &self,
            _request: &ExecutionRequest,
        ) -> Result<AsyncLaunch, TransportError> {
            Err(TransportError::Other("unused".into()))
        }
        async fn poll(&self, _host: &str, job_id: &str) -> Result<PollStatus, TransportError> {
            Err(TransportError::UnknownJob(job_id.to_string()))
        }
    }

    #[tokio::test]
    async fn plays_run_in_order_over_expanded_hosts() {
        let inventory = Arc::new(
            StaticInventory::new().group("webservers", vec!["web1", "web2"]),
        );
        let sink = Arc::new(CollectingSink::new());
        let runner = PlaybookRunner::new(RunConfig::default(), inventory, Arc::new(AlwaysChanged))
            .with_sink(sink.clone());

        let book = Playbook::new("site")
            .play(Play::new("one", "webservers").task(Task::new("t1", "copy")))
            .play(Play::new("two", "web1").task(Task::new("t2", "copy")));

        let summary = runner.run(&book).await.unwrap();
        assert_eq!(summary["web1"].changed, 2);
        assert_eq!(summary["web2"].changed, 1);

        let plays: Vec<String> = sink
            .events()
            .iter()
            .filter_map(|e| match e {
                RunEvent::PlayStart { name } => Some(name.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(plays, ["one", "two"]);
    }

    #[tokio::test]
    async fn validation_failure_aborts_before_any_host() {
        let inventory = Arc::new(StaticInventory::new().host("web1"));
        let sink = Arc::new(CollectingSink::new());
        let runner = PlaybookRunner::new(RunConfig::default(), inventory, Arc::new(AlwaysChanged))
            .with_sink(sink.clone());

        let book = Playbook::new("bad")
            .play(Play::new("p", "all").task(Task::new("t", "copy").notify("nobody")));

        assert!(runner.run(&book).await.is_err());
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn empty_playbook_returns_empty_summary() {
        let inventory = Arc::new(StaticInventory::new().host("web1"));
        let runner = PlaybookRunner::new(RunConfig::default(), inventory, Arc::new(AlwaysChanged));
        let summary = runner.run(&Playbook::new("empty")).await.unwrap();
        assert!(summary.is_empty());
    }
}

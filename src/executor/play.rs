//! Play-level orchestration: host fan-out with a per-task barrier.
//!
//! Each task is fanned out across the play's active hosts, bounded by the
//! run-wide fork semaphore; the next task starts only after every host
//! finished the current one. Benched hosts are filtered out before each
//! step, and a play whose hosts are all benched ends early. Handlers are
//! flushed once at the end of the play, in declaration order.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{error, instrument};

use crate::callback::{RunEvent, SharedSink};
use crate::error::Result;
use crate::executor::handlers::HandlerLedger;
use crate::executor::task::TaskDispatcher;
use crate::playbook::{Play, Task};

/// What a finished play looked like.
#[derive(Debug, Clone, Copy)]
pub struct PlayReport {
    /// Hosts the play's pattern matched.
    pub matched: usize,
    /// Hosts still active when the play ended.
    pub remaining: usize,
}

/// Runs one play across its matched hosts.
pub struct PlayRunner {
    dispatcher: Arc<TaskDispatcher>,
    sink: SharedSink,
    semaphore: Arc<Semaphore>,
    ledger: Arc<HandlerLedger>,
    benched: Arc<DashMap<String, String>>,
}

impl PlayRunner {
    pub fn new(
        dispatcher: Arc<TaskDispatcher>,
        sink: SharedSink,
        semaphore: Arc<Semaphore>,
        ledger: Arc<HandlerLedger>,
        benched: Arc<DashMap<String, String>>,
    ) -> Self {
        Self {
            dispatcher,
            sink,
            semaphore,
            ledger,
            benched,
        }
    }

    /// Execute the play over the given (already expanded) host list.
    #[instrument(skip_all, fields(play = %play.name, hosts = hosts.len()))]
    pub async fn run(&self, play: &Play, hosts: &[String]) -> Result<PlayReport> {
        self.sink
            .emit(RunEvent::PlayStart {
                name: play.name.clone(),
            })
            .await;

        if hosts.is_empty() {
            self.sink
                .emit(RunEvent::NoHostsMatched {
                    play: play.name.clone(),
                })
                .await;
            return Ok(PlayReport {
                matched: 0,
                remaining: 0,
            });
        }

        for task in &play.tasks {
            let active = self.active_hosts(hosts);
            if active.is_empty() {
                self.sink
                    .emit(RunEvent::NoHostsRemaining {
                        play: play.name.clone(),
                    })
                    .await;
                return Ok(PlayReport {
                    matched: hosts.len(),
                    remaining: 0,
                });
            }

            self.sink
                .emit(RunEvent::TaskStart {
                    name: task.name.clone(),
                    is_conditional: task.when.is_some(),
                })
                .await;

            self.run_task_step(task, &active).await;
        }

        self.flush_handlers(play, hosts).await;

        Ok(PlayReport {
            matched: hosts.len(),
            remaining: self.active_hosts(hosts).len(),
        })
    }

    fn active_hosts(&self, hosts: &[String]) -> Vec<String> {
        hosts
            .iter()
            .filter(|host| !self.benched.contains_key(host.as_str()))
            .cloned()
            .collect()
    }

    // Fan one task out over the active hosts, bounded by the fork
    // semaphore, and wait for every host to finish (the barrier).
    async fn run_task_step(&self, task: &Task, hosts: &[String]) {
        let mut handles = Vec::with_capacity(hosts.len());
        for host in hosts {
            let dispatcher = Arc::clone(&self.dispatcher);
            let semaphore = Arc::clone(&self.semaphore);
            let task = task.clone();
            let host = host.clone();
            handles.push(tokio::spawn(async move {
                // The semaphore is never closed while the run is alive.
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                dispatcher.dispatch(&host, &task).await;
            }));
        }

        for join_result in join_all(handles).await {
            if let Err(err) = join_result {
                error!(%err, "host worker panicked");
            }
        }
    }

    // Handlers run in declaration order; within one handler, hosts run in
    // play order. Notifications on benched hosts are dropped.
    async fn flush_handlers(&self, play: &Play, hosts: &[String]) {
        if play.handlers.is_empty() || self.ledger.is_empty() {
            self.ledger.drain();
            return;
        }

        let pending = self.ledger.drain();
        for handler in &play.handlers {
            let notified: Vec<String> = hosts
                .iter()
                .filter(|host| !self.benched.contains_key(host.as_str()))
                .filter(|host| {
                    pending
                        .get(host.as_str())
                        .is_some_and(|names| names.iter().any(|n| n == &handler.name))
                })
                .cloned()
                .collect();
            if notified.is_empty() {
                continue;
            }

            let handler_task = handler.to_task();
            self.sink
                .emit(RunEvent::TaskStart {
                    name: handler_task.name.clone(),
                    is_conditional: handler_task.when.is_some(),
                })
                .await;
            self.run_task_step(&handler_task, &notified).await;
        }
    }
}

//! Fire-and-poll driver for background tasks.
//!
//! Launches a module through the transport's background interface, then
//! polls on the task's interval until the job finishes or the deadline
//! passes. A poll interval of zero is fire-and-forget: the launch
//! acknowledgement is the final result and no completion is awaited.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::callback::{RunEvent, SharedSink};
use crate::error::Error;
use crate::transport::{ExecutionRequest, PollStatus, RawResult, Transport, TransportError};

/// Drives one background execution to completion.
pub struct AsyncPoller {
    transport: Arc<dyn Transport>,
    sink: SharedSink,
}

impl AsyncPoller {
    /// Create a poller over the given transport and event sink.
    pub fn new(transport: Arc<dyn Transport>, sink: SharedSink) -> Self {
        Self { transport, sink }
    }

    /// Launch the request in the background and poll every `poll_secs`
    /// until the job finishes or `timeout_secs` passes. The returned
    /// result is the job's final payload, or a failed result when the
    /// deadline passes first. Transport-level errors (unreachable hosts,
    /// unknown jobs) propagate to the caller.
    pub async fn run(
        &self,
        request: &ExecutionRequest,
        timeout_secs: u64,
        poll_secs: u64,
    ) -> Result<RawResult, TransportError> {
        let launch = self.transport.launch(request).await?;
        self.sink
            .emit(RunEvent::AsyncLaunched {
                host: request.host.clone(),
                job_id: launch.job_id.clone(),
            })
            .await;

        if poll_secs == 0 {
            // Fire-and-forget: the acknowledgement is the result.
            return Ok(launch.ack);
        }

        let started = Instant::now();
        loop {
            let elapsed_secs = started.elapsed().as_secs();
            if elapsed_secs >= timeout_secs {
                self.sink
                    .emit(RunEvent::AsyncFailed {
                        host: request.host.clone(),
                        job_id: launch.job_id.clone(),
                    })
                    .await;
                let timeout = Error::AsyncTimeout {
                    task: request.module.clone(),
                    host: request.host.clone(),
                    timeout_secs,
                };
                return Ok(RawResult::failed(timeout.to_string()));
            }

            tokio::time::sleep(Duration::from_secs(poll_secs)).await;

            match self.transport.poll(&request.host, &launch.job_id).await? {
                PollStatus::Pending => {
                    self.sink
                        .emit(RunEvent::AsyncPoll {
                            host: request.host.clone(),
                            job_id: launch.job_id.clone(),
                            elapsed_secs: started.elapsed().as_secs(),
                        })
                        .await;
                }
                PollStatus::Finished(result) => {
                    let event = if result.is_failed() {
                        RunEvent::AsyncFailed {
                            host: request.host.clone(),
                            job_id: launch.job_id.clone(),
                        }
                    } else {
                        RunEvent::AsyncOk {
                            host: request.host.clone(),
                            job_id: launch.job_id.clone(),
                        }
                    };
                    self.sink.emit(event).await;
                    return Ok(result);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use indexmap::IndexMap;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    use crate::callback::CollectingSink;
    use crate::transport::AsyncLaunch;

    struct ScriptedJobs {
        statuses: Mutex<VecDeque<PollStatus>>,
    }

    impl ScriptedJobs {
        fn new(statuses: Vec<PollStatus>) -> Self {
            Self {
                statuses: Mutex::new(statuses.into()),
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedJobs {
        async fn execute(
            &self,
            _request: &ExecutionRequest,
        ) -> Result<RawResult, TransportError> {
            unreachable!("poller never calls execute");
        }

        async fn launch(
            &self,
            _request: &ExecutionRequest,
        ) -> Result<AsyncLaunch, TransportError> {
            Ok(AsyncLaunch {
                job_id: "job-1".to_string(),
                ack: RawResult::ok().with_msg("started"),
            })
        }

        async fn poll(
            &self,
            _host: &str,
            _job_id: &str,
        ) -> Result<PollStatus, TransportError> {
            Ok(self
                .statuses
                .lock()
                .pop_front()
                .unwrap_or(PollStatus::Pending))
        }
    }

    fn request() -> ExecutionRequest {
        ExecutionRequest {
            host: "web1".to_string(),
            module: "command".to_string(),
            args: IndexMap::new(),
            check_mode: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_finished() {
        let transport = Arc::new(ScriptedJobs::new(vec![
            PollStatus::Pending,
            PollStatus::Pending,
            PollStatus::Finished(RawResult::changed()),
        ]));
        let sink = Arc::new(CollectingSink::new());
        let poller = AsyncPoller::new(transport, sink.clone());

        let result = poller.run(&request(), 60, 2).await.unwrap();

        assert!(result.changed);
        let events = sink.events();
        assert!(matches!(events[0], RunEvent::AsyncLaunched { .. }));
        let polls = events
            .iter()
            .filter(|e| matches!(e, RunEvent::AsyncPoll { .. }))
            .count();
        assert_eq!(polls, 2);
        assert!(matches!(events.last(), Some(RunEvent::AsyncOk { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_produces_failed_result() {
        let transport = Arc::new(ScriptedJobs::new(vec![]));
        let sink = Arc::new(CollectingSink::new());
        let poller = AsyncPoller::new(transport, sink.clone());

        let result = poller.run(&request(), 5, 2).await.unwrap();

        assert!(result.is_failed());
        assert!(sink
            .events()
            .iter()
            .any(|e| matches!(e, RunEvent::AsyncFailed { .. })));
    }

    #[tokio::test]
    async fn zero_poll_is_fire_and_forget() {
        let transport = Arc::new(ScriptedJobs::new(vec![]));
        let sink = Arc::new(CollectingSink::new());
        let poller = AsyncPoller::new(transport, sink.clone());

        let result = poller.run(&request(), 60, 0).await.unwrap();

        assert!(!result.is_failed());
        assert_eq!(result.msg.as_deref(), Some("started"));
        // Launched, never polled.
        assert_eq!(sink.events().len(), 1);
    }
}

//! Transport boundary: the collaborator that actually executes a module
//! on a host.
//!
//! The engine never connects to hosts itself. It hands a fully resolved
//! [`ExecutionRequest`] to a [`Transport`] and classifies whatever comes
//! back. Synchronous execution goes through [`Transport::execute`]; async
//! (fire-and-poll) tasks are launched with [`Transport::launch`] and
//! tracked with [`Transport::poll`].

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Identifier of a background job started with [`Transport::launch`].
pub type JobId = String;

/// Errors a transport can produce. Module-level failures are not errors:
/// they come back as a [`RawResult`] with the failed flag set.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The host could not be contacted. The engine benches the host.
    #[error("host unreachable: {0}")]
    Unreachable(String),

    /// The requested job id is unknown to the transport.
    #[error("unknown async job: {0}")]
    UnknownJob(JobId),

    /// Any other transport-level problem; classified as a task failure.
    #[error("{0}")]
    Other(String),
}

/// A fully resolved invocation of one module on one host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Target host.
    pub host: String,
    /// Module/action name.
    pub module: String,
    /// Module arguments with variables already substituted.
    pub args: IndexMap<String, JsonValue>,
    /// When set, the transport must report what would change without
    /// applying it; modules that cannot do so report a skipped result.
    pub check_mode: bool,
}

/// The tagged result a module produces. Carries the fields the dispatcher
/// actually inspects plus an explicit bag for module-specific data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawResult {
    /// Whether the module changed anything.
    pub changed: bool,
    /// Explicit failure flag, when the module reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<bool>,
    /// Process return code, when the module ran a command.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rc: Option<i32>,
    /// The module declined to run (e.g. check mode without support).
    #[serde(default)]
    pub skipped: bool,
    /// Human-readable message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    /// Module-specific payload fields.
    #[serde(flatten)]
    pub extra: IndexMap<String, JsonValue>,
}

impl RawResult {
    /// Successful result without changes.
    pub fn ok() -> Self {
        Self::default()
    }

    /// Successful result with changes.
    pub fn changed() -> Self {
        Self {
            changed: true,
            ..Default::default()
        }
    }

    /// Failed result with a message.
    pub fn failed(msg: impl Into<String>) -> Self {
        Self {
            failed: Some(true),
            msg: Some(msg.into()),
            ..Default::default()
        }
    }

    /// Skipped result with a message.
    pub fn skipped(msg: impl Into<String>) -> Self {
        Self {
            skipped: true,
            msg: Some(msg.into()),
            ..Default::default()
        }
    }

    /// Set the return code.
    pub fn with_rc(mut self, rc: i32) -> Self {
        self.rc = Some(rc);
        self
    }

    /// Attach a module-specific payload field.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Set the message.
    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = Some(msg.into());
        self
    }

    /// Whether the raw result signals failure: an explicit failed flag, or
    /// a nonzero return code when no explicit flag is present.
    pub fn is_failed(&self) -> bool {
        match self.failed {
            Some(failed) => failed,
            None => self.rc.is_some_and(|rc| rc != 0),
        }
    }

    /// The full payload as a JSON value, used for `register` and for the
    /// scope handed to `changed_when`/`failed_when` expressions.
    pub fn to_value(&self) -> JsonValue {
        // serde_json can only fail here on non-string keys, which the
        // struct shape rules out.
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

/// Acknowledgement of an async launch: a job id to poll plus the raw
/// acknowledgement payload, which is the final result for fire-and-forget
/// tasks (`poll = 0`).
#[derive(Debug, Clone)]
pub struct AsyncLaunch {
    pub job_id: JobId,
    pub ack: RawResult,
}

/// Status of a background job.
#[derive(Debug, Clone)]
pub enum PollStatus {
    /// Still running.
    Pending,
    /// Finished with the given result.
    Finished(RawResult),
}

/// The task-execution collaborator.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute a module synchronously and return its raw result.
    async fn execute(&self, request: &ExecutionRequest) -> Result<RawResult, TransportError>;

    /// Start a module in the background, returning immediately with a job
    /// id and the launch acknowledgement.
    async fn launch(&self, request: &ExecutionRequest) -> Result<AsyncLaunch, TransportError>;

    /// Check on a background job.
    async fn poll(&self, host: &str, job_id: &str) -> Result<PollStatus, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_detection_precedence() {
        // Explicit flag wins over rc.
        let explicit = RawResult {
            failed: Some(false),
            rc: Some(2),
            ..Default::default()
        };
        assert!(!explicit.is_failed());

        // Without a flag, a nonzero rc signals failure.
        assert!(RawResult::ok().with_rc(1).is_failed());
        assert!(!RawResult::ok().with_rc(0).is_failed());
        assert!(RawResult::failed("boom").is_failed());
        assert!(!RawResult::changed().is_failed());
    }

    #[test]
    fn payload_carries_extra_fields() {
        let raw = RawResult::changed()
            .with_rc(0)
            .with_extra("stdout", "hello");
        let value = raw.to_value();
        assert_eq!(value["changed"], serde_json::json!(true));
        assert_eq!(value["rc"], serde_json::json!(0));
        assert_eq!(value["stdout"], serde_json::json!("hello"));
    }
}

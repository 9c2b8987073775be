//! Error types for the runbook engine.
//!
//! The taxonomy mirrors the engine's failure semantics: host-level
//! unreachability, task-level failures, undefined variables under the
//! fail-mode policy, async poll timeouts, and structural configuration
//! errors that abort a run before any host executes.

use thiserror::Error;

/// Result type alias for runbook operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the runbook engine.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Host / Transport Errors
    // ========================================================================
    /// Host could not be reached; it is benched for the remainder of the run.
    #[error("Host '{host}' unreachable: {message}")]
    Unreachable {
        /// Target host
        host: String,
        /// Transport-provided reason
        message: String,
    },

    // ========================================================================
    // Task Errors
    // ========================================================================
    /// Task execution failed (module reported failure or `failed_when` true).
    #[error("Task '{task}' failed on host '{host}': {message}")]
    TaskFailed {
        /// Task name
        task: String,
        /// Target host
        host: String,
        /// Failure message
        message: String,
    },

    /// Async task exceeded its time budget while polling.
    #[error("Async task '{task}' timed out on host '{host}' after {timeout_secs} seconds")]
    AsyncTimeout {
        /// Task name
        task: String,
        /// Target host
        host: String,
        /// Budget in seconds
        timeout_secs: u64,
    },

    // ========================================================================
    // Variable Errors
    // ========================================================================
    /// Undefined variable referenced under the fail-mode policy.
    #[error("Undefined variable: '{0}'")]
    UndefinedVariable(String),

    // ========================================================================
    // Structure / Configuration Errors
    // ========================================================================
    /// Malformed play or task structure; fatal, aborts the whole run.
    #[error("Playbook validation failed: {0}")]
    Configuration(String),

    /// Host pattern could not be interpreted.
    #[error("Invalid host pattern: '{0}'")]
    InvalidHostPattern(String),

    /// A task notified a handler that is not declared in its play.
    #[error("Handler '{0}' not found")]
    HandlerNotFound(String),

    // ========================================================================
    // Evaluation Errors
    // ========================================================================
    /// Condition or template evaluation failed for a structural reason.
    #[error("Condition evaluation failed: {0}")]
    Condition(String),

    // ========================================================================
    // IO / Serialization Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ========================================================================
    // Other Errors
    // ========================================================================
    /// Internal engine error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new unreachable error.
    pub fn unreachable(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unreachable {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Creates a new task failed error.
    pub fn task_failed(
        task: impl Into<String>,
        host: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::TaskFailed {
            task: task.into(),
            host: host.into(),
            message: message.into(),
        }
    }

    /// Creates a new configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Returns true if this error is fatal for the whole run (no host has
    /// executed or will execute).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_) | Error::InvalidHostPattern(_) | Error::HandlerNotFound(_)
        )
    }
}

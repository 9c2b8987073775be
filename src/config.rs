//! Run-wide configuration for the engine.
//!
//! A [`RunConfig`] is constructed once per run and threaded through the
//! variable store and condition evaluator. There is no mutable global
//! state: policies such as hash-merge behaviour and undefined-variable
//! handling are plain fields, overridable per run without restart.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::vars::HashBehaviour;

/// Policy for references to undefined variables in conditions and
/// templated arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UndefinedBehaviour {
    /// Undefined references resolve to an empty/falsy value.
    #[default]
    Continue,
    /// Undefined references abort the task-slot; the host is benched as
    /// unreachable, matching the historical fail-mode behaviour.
    Fail,
}

/// Immutable configuration for one playbook run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Maximum number of hosts processed concurrently within one task step.
    pub forks: usize,
    /// How dictionary-valued variables combine across precedence layers.
    pub hash_behaviour: HashBehaviour,
    /// Run-wide undefined-variable policy.
    pub undefined_vars: UndefinedBehaviour,
    /// Check mode: the check flag is threaded to the transport; tasks not
    /// marked `always_run` are executed as no-ops by the transport.
    pub check_mode: bool,
    /// Stop the whole run once every host of the current play is benched
    /// as unreachable. When unset, later plays still run.
    pub stop_on_unreachable: bool,
    /// Default polling interval in seconds for async tasks that do not
    /// specify one.
    pub poll_interval_secs: u64,
    /// Caller-supplied variable overrides, highest precedence.
    pub extra_vars: IndexMap<String, JsonValue>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            forks: 5,
            hash_behaviour: HashBehaviour::Replace,
            undefined_vars: UndefinedBehaviour::Continue,
            check_mode: false,
            stop_on_unreachable: false,
            poll_interval_secs: 10,
            extra_vars: IndexMap::new(),
        }
    }
}

impl RunConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fork count.
    pub fn with_forks(mut self, forks: usize) -> Self {
        self.forks = forks.max(1);
        self
    }

    /// Set the hash-merge behaviour.
    pub fn with_hash_behaviour(mut self, behaviour: HashBehaviour) -> Self {
        self.hash_behaviour = behaviour;
        self
    }

    /// Set the undefined-variable policy.
    pub fn with_undefined_vars(mut self, policy: UndefinedBehaviour) -> Self {
        self.undefined_vars = policy;
        self
    }

    /// Enable or disable check mode.
    pub fn with_check_mode(mut self, check: bool) -> Self {
        self.check_mode = check;
        self
    }

    /// Enable or disable stopping the run when a play loses all hosts.
    pub fn with_stop_on_unreachable(mut self, stop: bool) -> Self {
        self.stop_on_unreachable = stop;
        self
    }

    /// Add an extra variable (highest precedence).
    pub fn with_extra_var(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.extra_vars.insert(key.into(), value.into());
        self
    }
}

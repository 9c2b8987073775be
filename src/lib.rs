//! # Runbook - A Declarative Task Orchestration Engine
//!
//! Runbook executes declarative playbooks across fleets of hosts: an
//! ordered sequence of plays, each binding a host selection to an ordered
//! task list, with per-host variable resolution, conditional execution,
//! changed/failed overrides, handler notification, and background
//! (fire-and-poll) tasks. Execution is async-first on tokio with a
//! configurable fork limit and a per-task barrier across hosts.
//!
//! ## Core Concepts
//!
//! - **Playbooks**: Ordered plays, loadable from YAML/JSON or built
//!   programmatically
//! - **Inventory**: Host patterns (`all`, groups, `~regex`, explicit
//!   lists) resolved to ordered host lists
//! - **Transport**: The pluggable boundary that actually executes a
//!   module on a host; the engine only classifies what comes back
//! - **Variables**: Layered precedence (defaults < inventory < play <
//!   registered < extra) with replace or deep-merge hash semantics
//! - **Handlers**: Tasks that run at most once per host per play, only
//!   when notified by a changed task
//! - **Events**: A closed lifecycle-event stream consumed through the
//!   [`EventSink`](callback::EventSink) trait
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use runbook::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let inventory = Arc::new(
//!         StaticInventory::new().group("webservers", vec!["web1", "web2"]),
//!     );
//!
//!     let book = Playbook::new("site").play(
//!         Play::new("configure web", "webservers")
//!             .task(
//!                 Task::new("install nginx", "package")
//!                     .arg("name", "nginx")
//!                     .notify("restart nginx"),
//!             )
//!             .handler(Handler::new("restart nginx", "service").arg("state", "restarted")),
//!     );
//!
//!     let runner = PlaybookRunner::new(RunConfig::new().with_forks(10), inventory, transport);
//!     let summary = runner.run(&book).await?;
//!     for (host, stats) in &summary {
//!         println!("{host}: ok={} changed={}", stats.ok, stats.changed);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of the types most embeddings need.

    // Error handling
    pub use crate::error::{Error, Result};

    // Configuration
    pub use crate::config::{RunConfig, UndefinedBehaviour};

    // Playbook model
    pub use crate::playbook::{AsyncSpec, Handler, HostPattern, Play, Playbook, Task};

    // Inventory
    pub use crate::inventory::{Inventory, StaticInventory};

    // Execution engine
    pub use crate::executor::PlaybookRunner;

    // Transport boundary
    pub use crate::transport::{
        AsyncLaunch, ExecutionRequest, PollStatus, RawResult, Transport, TransportError,
    };

    // Statistics
    pub use crate::stats::{AggregateStats, Classification, HostStats};

    // Variables
    pub use crate::vars::{FactCache, HashBehaviour, VarStore};

    // Events
    pub use crate::callback::{
        CollectingSink, EventSink, NullSink, RunEvent, SharedSink, TracingSink,
    };
}

// ============================================================================
// Core Modules
// ============================================================================

/// Error types and result aliases for runbook operations.
pub mod error;

/// Run-wide configuration: forks, hash behaviour, undefined-variable
/// policy, check mode, extra vars.
pub mod config;

/// Variable management and precedence handling.
///
/// Implements the layered precedence rules (defaults, inventory host
/// vars, play vars, registered results, extra vars) with configurable
/// replace/merge semantics for dictionary-valued variables.
pub mod vars;

// ============================================================================
// Playbook Components
// ============================================================================

/// Playbook parsing and representation: plays, tasks, handlers, host
/// patterns, plus up-front structural validation.
pub mod playbook;

/// Host and group inventory management.
pub mod inventory;

// ============================================================================
// Infrastructure
// ============================================================================

/// Transport boundary for module execution on hosts.
///
/// The engine never talks to hosts itself: it hands fully resolved
/// requests to a [`Transport`](transport::Transport) and classifies the
/// raw results that come back, including background-job launch and poll.
pub mod transport;

/// Condition evaluation and argument templating (minijinja-backed).
pub mod template;

/// Lifecycle events and observer sinks.
pub mod callback;

/// Per-host outcome counters and run summaries.
pub mod stats;

// ============================================================================
// Execution Engine
// ============================================================================

/// The orchestration core: playbook controller, play runner with the
/// per-task host barrier, task dispatcher, handler ledger, and the
/// async-task poller.
pub mod executor;

// ============================================================================
// Version Information
// ============================================================================

/// Returns the current version of the engine.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

//! The declarative input model: playbooks, plays, tasks, handlers.
//!
//! Everything here is plain data with serde derives so playbooks load
//! from YAML or JSON, plus builder-style constructors for programmatic
//! assembly. Validation happens once, up front, via
//! [`Playbook::validate`]; the executor assumes a validated book.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};

// ============================================================================
// Host patterns
// ============================================================================

/// What a play targets: either a pattern string resolved against the
/// inventory, or an explicit ordered host list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HostPattern {
    /// A pattern string: a host name, group name, `all`, a `~regex`, or a
    /// comma/semicolon-separated combination of those.
    Pattern(String),
    /// An explicit host list, preserved in order.
    List(Vec<String>),
}

impl Default for HostPattern {
    fn default() -> Self {
        HostPattern::Pattern("all".to_string())
    }
}

impl From<&str> for HostPattern {
    fn from(pattern: &str) -> Self {
        HostPattern::Pattern(pattern.to_string())
    }
}

impl From<Vec<String>> for HostPattern {
    fn from(hosts: Vec<String>) -> Self {
        HostPattern::List(hosts)
    }
}

impl From<Vec<&str>> for HostPattern {
    fn from(hosts: Vec<&str>) -> Self {
        HostPattern::List(hosts.into_iter().map(String::from).collect())
    }
}

// ============================================================================
// Tasks
// ============================================================================

/// Background execution parameters for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncSpec {
    /// Overall deadline in seconds; reaching it without completion fails
    /// the task on that host.
    pub timeout_secs: u64,
    /// Poll interval in seconds. Zero means fire-and-forget: launch and
    /// move on without waiting for completion. Omitted means the run
    /// config's default interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_secs: Option<u64>,
}

/// One unit of work: a module invocation plus its control attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Display name.
    pub name: String,
    /// Module/action to invoke.
    pub module: String,
    /// Module arguments; string values are templated per host.
    #[serde(default)]
    pub args: IndexMap<String, JsonValue>,
    /// Run condition, evaluated per host before execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    /// Overrides the module's changed flag when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_when: Option<String>,
    /// Overrides failure detection when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_when: Option<String>,
    /// Keep failures out of the failure counter (they stay visible in the
    /// event stream).
    #[serde(default)]
    pub ignore_errors: bool,
    /// Handlers to notify when this task reports changed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notify: Vec<String>,
    /// Variable name the result payload is stored under for this host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register: Option<String>,
    /// Background execution parameters.
    #[serde(default, rename = "async", skip_serializing_if = "Option::is_none")]
    pub async_spec: Option<AsyncSpec>,
    /// Execute for real even in check mode.
    #[serde(default)]
    pub always_run: bool,
}

impl Task {
    /// Start a task for the given module. The name defaults to the module
    /// name.
    pub fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            args: IndexMap::new(),
            when: None,
            changed_when: None,
            failed_when: None,
            ignore_errors: false,
            notify: Vec::new(),
            register: None,
            async_spec: None,
            always_run: false,
        }
    }

    /// Add one module argument.
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    /// Set the run condition.
    pub fn when_(mut self, condition: impl Into<String>) -> Self {
        self.when = Some(condition.into());
        self
    }

    /// Override the changed flag with an expression.
    pub fn changed_when(mut self, expr: impl Into<String>) -> Self {
        self.changed_when = Some(expr.into());
        self
    }

    /// Override failure detection with an expression.
    pub fn failed_when(mut self, expr: impl Into<String>) -> Self {
        self.failed_when = Some(expr.into());
        self
    }

    /// Suppress failure counting for this task.
    pub fn ignore_errors(mut self) -> Self {
        self.ignore_errors = true;
        self
    }

    /// Notify a handler when this task changes something.
    pub fn notify(mut self, handler: impl Into<String>) -> Self {
        self.notify.push(handler.into());
        self
    }

    /// Store the result payload under a variable name.
    pub fn register(mut self, name: impl Into<String>) -> Self {
        self.register = Some(name.into());
        self
    }

    /// Run in the background with the given deadline and poll interval.
    pub fn with_async(mut self, timeout_secs: u64, poll_secs: u64) -> Self {
        self.async_spec = Some(AsyncSpec {
            timeout_secs,
            poll_secs: Some(poll_secs),
        });
        self
    }

    /// Execute for real even under check mode.
    pub fn always_run(mut self) -> Self {
        self.always_run = true;
        self
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// A named task that runs at most once per host per play, and only when
/// notified by a changed task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handler {
    /// The name tasks notify by. Must be unique within the play.
    pub name: String,
    /// Module/action to invoke.
    pub module: String,
    /// Module arguments.
    #[serde(default)]
    pub args: IndexMap<String, JsonValue>,
    /// Run condition, evaluated per host at flush time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

impl Handler {
    /// Create a handler.
    pub fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            args: IndexMap::new(),
            when: None,
        }
    }

    /// Add one module argument.
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    /// Set the run condition.
    pub fn when_(mut self, condition: impl Into<String>) -> Self {
        self.when = Some(condition.into());
        self
    }

    /// View this handler as a plain task for dispatch.
    pub fn to_task(&self) -> Task {
        Task {
            name: self.name.clone(),
            module: self.module.clone(),
            args: self.args.clone(),
            when: self.when.clone(),
            changed_when: None,
            failed_when: None,
            ignore_errors: false,
            notify: Vec::new(),
            register: None,
            async_spec: None,
            always_run: false,
        }
    }
}

// ============================================================================
// Plays and playbooks
// ============================================================================

/// A host selection bound to an ordered task list plus handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Play {
    /// Display name.
    pub name: String,
    /// What this play targets.
    #[serde(default)]
    pub hosts: HostPattern,
    /// Play-level variables, installed for the duration of the play.
    #[serde(default)]
    pub vars: IndexMap<String, JsonValue>,
    /// Ordered task list.
    #[serde(default)]
    pub tasks: Vec<Task>,
    /// Handlers, flushed in declaration order at the end of the play.
    #[serde(default)]
    pub handlers: Vec<Handler>,
}

impl Play {
    /// Create an empty play targeting the given hosts.
    pub fn new(name: impl Into<String>, hosts: impl Into<HostPattern>) -> Self {
        Self {
            name: name.into(),
            hosts: hosts.into(),
            vars: IndexMap::new(),
            tasks: Vec::new(),
            handlers: Vec::new(),
        }
    }

    /// Set one play-level variable.
    pub fn var(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Append a task.
    pub fn task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    /// Append a handler.
    pub fn handler(mut self, handler: Handler) -> Self {
        self.handlers.push(handler);
        self
    }
}

/// An ordered sequence of plays with book-level default variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    /// Display name.
    pub name: String,
    /// Book-level variables (lowest precedence).
    #[serde(default)]
    pub vars: IndexMap<String, JsonValue>,
    /// Plays, executed strictly in order.
    #[serde(default)]
    pub plays: Vec<Play>,
}

impl Playbook {
    /// Create an empty playbook.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vars: IndexMap::new(),
            plays: Vec::new(),
        }
    }

    /// Set one book-level variable.
    pub fn var(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Append a play.
    pub fn play(mut self, play: Play) -> Self {
        self.plays.push(play);
        self
    }

    /// Load from a YAML document.
    pub fn from_yaml(source: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(source)?)
    }

    /// Load from a YAML file.
    pub async fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let source = tokio::fs::read_to_string(path).await?;
        Self::from_yaml(&source)
    }

    /// Load from a JSON document.
    pub fn from_json(source: &str) -> Result<Self> {
        Ok(serde_json::from_str(source)?)
    }

    /// Structural validation, run once before execution:
    /// - every task and handler names a non-empty module
    /// - every notify target resolves to a declared handler in its play
    /// - handler names are unique within each play
    /// - async deadlines are nonzero
    pub fn validate(&self) -> Result<()> {
        for play in &self.plays {
            let mut handler_names = Vec::with_capacity(play.handlers.len());
            for handler in &play.handlers {
                if handler.module.trim().is_empty() {
                    return Err(Error::configuration(format!(
                        "handler '{}' in play '{}' has an empty module",
                        handler.name, play.name
                    )));
                }
                if handler_names.contains(&handler.name.as_str()) {
                    return Err(Error::configuration(format!(
                        "duplicate handler '{}' in play '{}'",
                        handler.name, play.name
                    )));
                }
                handler_names.push(handler.name.as_str());
            }

            for task in &play.tasks {
                if task.module.trim().is_empty() {
                    return Err(Error::configuration(format!(
                        "task '{}' in play '{}' has an empty module",
                        task.name, play.name
                    )));
                }
                if let Some(spec) = &task.async_spec {
                    if spec.timeout_secs == 0 {
                        return Err(Error::configuration(format!(
                            "task '{}' in play '{}' has a zero async timeout",
                            task.name, play.name
                        )));
                    }
                }
                for target in &task.notify {
                    if !handler_names.contains(&target.as_str()) {
                        return Err(Error::HandlerNotFound(format!(
                            "task '{}' notifies undeclared handler '{}' in play '{}'",
                            task.name, target, play.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_roundtrip() {
        let book = Playbook::new("site")
            .var("env", "prod")
            .play(
                Play::new("web", "webservers")
                    .var("port", 8080)
                    .task(
                        Task::new("install nginx", "package")
                            .arg("name", "nginx")
                            .notify("restart nginx")
                            .register("install_out"),
                    )
                    .handler(Handler::new("restart nginx", "service").arg("state", "restarted")),
            );

        assert_eq!(book.plays.len(), 1);
        let task = &book.plays[0].tasks[0];
        assert_eq!(task.args["name"], json!("nginx"));
        assert_eq!(task.notify, vec!["restart nginx"]);
        assert_eq!(task.register.as_deref(), Some("install_out"));
        book.validate().unwrap();
    }

    #[test]
    fn yaml_loading() {
        let book = Playbook::from_yaml(
            r#"
name: site
vars:
  greeting: hello
plays:
  - name: first
    hosts: all
    tasks:
      - name: say hi
        module: debug
        args:
          msg: "{{ greeting }}"
        when: "greeting == 'hello'"
  - name: second
    hosts: [web1, web2]
    tasks: []
"#,
        )
        .unwrap();

        assert_eq!(book.plays.len(), 2);
        assert_eq!(book.plays[0].hosts, HostPattern::Pattern("all".into()));
        assert_eq!(
            book.plays[1].hosts,
            HostPattern::List(vec!["web1".into(), "web2".into()])
        );
        assert!(book.plays[0].tasks[0].when.is_some());
        book.validate().unwrap();
    }

    #[test]
    fn notify_must_name_declared_handler() {
        let book = Playbook::new("site").play(
            Play::new("p", "all").task(Task::new("t", "command").notify("missing handler")),
        );
        let err = book.validate().unwrap_err();
        assert!(matches!(err, Error::HandlerNotFound(_)));
    }

    #[test]
    fn duplicate_handler_names_rejected() {
        let book = Playbook::new("site").play(
            Play::new("p", "all")
                .handler(Handler::new("restart", "service"))
                .handler(Handler::new("restart", "service")),
        );
        assert!(book.validate().is_err());
    }

    #[test]
    fn zero_async_timeout_rejected() {
        let book = Playbook::new("site")
            .play(Play::new("p", "all").task(Task::new("t", "command").with_async(0, 2)));
        assert!(book.validate().is_err());
    }

    #[test]
    fn handler_converts_to_task() {
        let handler = Handler::new("reload", "service")
            .arg("state", "reloaded")
            .when_("can_reload");
        let task = handler.to_task();
        assert_eq!(task.name, "reload");
        assert_eq!(task.module, "service");
        assert_eq!(task.when.as_deref(), Some("can_reload"));
        assert!(task.notify.is_empty());
    }
}

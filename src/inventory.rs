//! Host inventory boundary.
//!
//! The engine resolves a play's [`HostPattern`] through the [`Inventory`]
//! trait; [`StaticInventory`] is the in-memory implementation used for
//! embedding and tests. Pattern strings support plain names, group names,
//! `all`, `~regex`, and comma/semicolon-separated unions, expanded in
//! inventory declaration order with duplicates removed.

use indexmap::{IndexMap, IndexSet};
use regex::Regex;
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::playbook::HostPattern;

/// Resolves host patterns to concrete ordered host lists.
pub trait Inventory: Send + Sync {
    /// Expand a pattern to an ordered, deduplicated host list. An empty
    /// result is not an error; the play becomes a no-op.
    fn expand(&self, pattern: &HostPattern) -> Result<Vec<String>>;

    /// Whether the given name is a declared group.
    fn is_group(&self, name: &str) -> bool;

    /// Inventory-level variables for one host.
    fn host_vars(&self, host: &str) -> IndexMap<String, JsonValue>;
}

/// In-memory inventory: an ordered host set with per-host variables, plus
/// named groups.
#[derive(Debug, Default)]
pub struct StaticInventory {
    hosts: IndexMap<String, IndexMap<String, JsonValue>>,
    groups: IndexMap<String, Vec<String>>,
}

impl StaticInventory {
    /// Create an empty inventory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a host without variables.
    pub fn host(mut self, name: impl Into<String>) -> Self {
        self.hosts.entry(name.into()).or_default();
        self
    }

    /// Add a host with inventory-level variables.
    pub fn host_with_vars(
        mut self,
        name: impl Into<String>,
        vars: IndexMap<String, JsonValue>,
    ) -> Self {
        self.hosts.insert(name.into(), vars);
        self
    }

    /// Declare a group over the given member hosts. Members are added to
    /// the host set if not already present.
    pub fn group(mut self, name: impl Into<String>, members: Vec<&str>) -> Self {
        let members: Vec<String> = members.into_iter().map(String::from).collect();
        for member in &members {
            self.hosts.entry(member.clone()).or_default();
        }
        self.groups.insert(name.into(), members);
        self
    }

    fn expand_token(&self, token: &str, out: &mut IndexSet<String>) -> Result<()> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(());
        }

        if token == "all" {
            out.extend(self.hosts.keys().cloned());
            return Ok(());
        }

        if let Some(pattern) = token.strip_prefix('~') {
            let re = Regex::new(pattern)
                .map_err(|e| Error::InvalidHostPattern(format!("~{pattern}: {e}")))?;
            out.extend(self.hosts.keys().filter(|h| re.is_match(h)).cloned());
            return Ok(());
        }

        if let Some(members) = self.groups.get(token) {
            out.extend(members.iter().cloned());
            return Ok(());
        }

        // Unknown names pass through as literal hosts; the transport
        // decides whether they are reachable.
        out.insert(token.to_string());
        Ok(())
    }
}

impl Inventory for StaticInventory {
    fn expand(&self, pattern: &HostPattern) -> Result<Vec<String>> {
        let mut out = IndexSet::new();
        match pattern {
            HostPattern::Pattern(s) => {
                for token in s.split([',', ';']) {
                    self.expand_token(token, &mut out)?;
                }
            }
            HostPattern::List(hosts) => {
                out.extend(hosts.iter().cloned());
            }
        }
        Ok(out.into_iter().collect())
    }

    fn is_group(&self, name: &str) -> bool {
        self.groups.contains_key(name)
    }

    fn host_vars(&self, host: &str) -> IndexMap<String, JsonValue> {
        self.hosts.get(host).cloned().unwrap_or_default()
    }
}

//! Layered per-host variable resolution.
//!
//! Layers, lowest to highest precedence: playbook defaults, inventory
//! host vars, play vars, registered results/facts, extra vars. Composite
//! (dictionary-valued) variables combine across layers under a single
//! run-wide [`HashBehaviour`]. Registered values are host-scoped and kept
//! in a [`FactCache`] owned by the controller, reset explicitly at run
//! start.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::template::Scope;

/// Run-wide strategy for combining dictionary-valued variables across
/// precedence layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashBehaviour {
    /// The higher layer's dictionary fully replaces the lower one.
    #[default]
    Replace,
    /// Recursive key-wise union; the higher layer wins on key conflicts.
    Merge,
}

/// Deep merge two JSON values: objects merge key-wise recursively, any
/// other pairing resolves to the overlay.
pub fn deep_merge(base: &JsonValue, overlay: &JsonValue) -> JsonValue {
    match (base, overlay) {
        (JsonValue::Object(base_map), JsonValue::Object(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in overlay_map {
                match base_map.get(key) {
                    Some(base_value) => {
                        merged.insert(key.clone(), deep_merge(base_value, value));
                    }
                    None => {
                        merged.insert(key.clone(), value.clone());
                    }
                }
            }
            JsonValue::Object(merged)
        }
        (_, overlay) => overlay.clone(),
    }
}

/// Host-scoped store for registered task results and facts. Owned by the
/// controller; `reset` is called once at run start so no state leaks
/// between runs.
#[derive(Debug, Default)]
pub struct FactCache {
    hosts: DashMap<String, IndexMap<String, JsonValue>>,
}

impl FactCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all cached entries. Called at run start.
    pub fn reset(&self) {
        self.hosts.clear();
    }

    /// Install one entry in a host's layer.
    pub fn set(&self, host: &str, name: impl Into<String>, value: JsonValue) {
        self.hosts
            .entry(host.to_string())
            .or_default()
            .insert(name.into(), value);
    }

    /// Snapshot of one host's layer.
    pub fn layer(&self, host: &str) -> IndexMap<String, JsonValue> {
        self.hosts
            .get(host)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }
}

/// The layered variable store. Global layers (defaults, play vars, extra
/// vars) are read-only during play execution; the registered layer is
/// host-scoped and never shared between hosts.
#[derive(Debug)]
pub struct VarStore {
    hash_behaviour: HashBehaviour,
    defaults: IndexMap<String, JsonValue>,
    host_vars: HashMap<String, IndexMap<String, JsonValue>>,
    play_vars: IndexMap<String, JsonValue>,
    cache: Arc<FactCache>,
    extra_vars: IndexMap<String, JsonValue>,
}

impl VarStore {
    /// Create a store with the given merge behaviour and registered-value
    /// cache.
    pub fn new(hash_behaviour: HashBehaviour, cache: Arc<FactCache>) -> Self {
        Self {
            hash_behaviour,
            defaults: IndexMap::new(),
            host_vars: HashMap::new(),
            play_vars: IndexMap::new(),
            cache,
            extra_vars: IndexMap::new(),
        }
    }

    /// Replace the playbook-level defaults layer.
    pub fn set_defaults(&mut self, vars: IndexMap<String, JsonValue>) {
        self.defaults = vars;
    }

    /// Replace one host's inventory layer.
    pub fn set_host_vars(&mut self, host: impl Into<String>, vars: IndexMap<String, JsonValue>) {
        self.host_vars.insert(host.into(), vars);
    }

    /// Replace the play-level layer. Called by the controller before each
    /// play.
    pub fn set_play_vars(&mut self, vars: IndexMap<String, JsonValue>) {
        self.play_vars = vars;
    }

    /// Clear the play-level layer between plays.
    pub fn clear_play_vars(&mut self) {
        self.play_vars.clear();
    }

    /// Replace the extra-vars layer (highest precedence).
    pub fn set_extra_vars(&mut self, vars: IndexMap<String, JsonValue>) {
        self.extra_vars = vars;
    }

    /// Install a registered result for one host, visible to subsequent
    /// tasks on the same host.
    pub fn register(&self, host: &str, name: impl Into<String>, value: JsonValue) {
        self.cache.set(host, name, value);
    }

    /// Produce the fully merged view for one host at this moment.
    pub fn resolve(&self, host: &str) -> Scope {
        let mut merged = Scope::new();
        self.merge_layer(&mut merged, &self.defaults);
        if let Some(inventory) = self.host_vars.get(host) {
            self.merge_layer(&mut merged, inventory);
        }
        self.merge_layer(&mut merged, &self.play_vars);
        let registered = self.cache.layer(host);
        self.merge_layer(&mut merged, &registered);
        self.merge_layer(&mut merged, &self.extra_vars);

        merged.insert(
            "inventory_hostname".to_string(),
            JsonValue::String(host.to_string()),
        );
        merged
    }

    fn merge_layer(&self, merged: &mut Scope, layer: &IndexMap<String, JsonValue>) {
        for (key, value) in layer {
            match self.hash_behaviour {
                HashBehaviour::Replace => {
                    merged.insert(key.clone(), value.clone());
                }
                HashBehaviour::Merge => match merged.get(key) {
                    Some(existing) => {
                        let combined = deep_merge(existing, value);
                        merged.insert(key.clone(), combined);
                    }
                    None => {
                        merged.insert(key.clone(), value.clone());
                    }
                },
            }
        }
    }
}

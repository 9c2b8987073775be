//! Per-host outcome aggregation.
//!
//! [`AggregateStats`] is the one structure mutated by every concurrent host
//! worker; it uses sharded concurrent maps so increments are never lost.
//! Exactly one counter is bumped per evaluated (host, task) slot, so the
//! per-host counter sum always equals the number of task-slots evaluated
//! for that host.

use dashmap::DashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Final classification of one task execution on one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// Completed successfully without changes.
    Ok,
    /// Completed successfully with changes.
    Changed,
    /// Failed (module failure or `failed_when` true, not ignored).
    Failed,
    /// Skipped (run-condition false or transport reported a no-op).
    Skipped,
    /// Host was unreachable.
    Unreachable,
}

/// Per-host counters, monotonically incremented, never reset mid-run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStats {
    pub ok: u64,
    pub changed: u64,
    pub failures: u64,
    pub skipped: u64,
    pub unreachable: u64,
}

impl HostStats {
    /// Total number of task-slots counted for this host.
    pub fn total(&self) -> u64 {
        self.ok + self.changed + self.failures + self.skipped + self.unreachable
    }

    /// Whether any failure or unreachable outcome was recorded.
    pub fn is_clean(&self) -> bool {
        self.failures == 0 && self.unreachable == 0
    }

    /// Add another host's counters into this one.
    pub fn merge(&mut self, other: &HostStats) {
        self.ok += other.ok;
        self.changed += other.changed;
        self.failures += other.failures;
        self.skipped += other.skipped;
        self.unreachable += other.unreachable;
    }
}

/// Concurrent per-host statistics for a whole run.
#[derive(Debug, Default)]
pub struct AggregateStats {
    hosts: DashMap<String, HostStats>,
}

impl AggregateStats {
    /// Create an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure a host has a (possibly all-zero) record. The play runner
    /// seeds every matched host so no record is left unconstructed even
    /// when the run terminates early.
    pub fn ensure_host(&self, host: &str) {
        self.hosts.entry(host.to_string()).or_default();
    }

    /// Record exactly one counter increment for a (host, task) evaluation.
    pub fn record(&self, host: &str, classification: Classification) {
        let mut entry = self.hosts.entry(host.to_string()).or_default();
        match classification {
            Classification::Ok => entry.ok += 1,
            Classification::Changed => entry.changed += 1,
            Classification::Failed => entry.failures += 1,
            Classification::Skipped => entry.skipped += 1,
            Classification::Unreachable => entry.unreachable += 1,
        }
    }

    /// Snapshot of one host's counters.
    pub fn get(&self, host: &str) -> Option<HostStats> {
        self.hosts.get(host).map(|entry| *entry.value())
    }

    /// Final result shape: hostname to counter record, sorted by hostname
    /// for deterministic reporting.
    pub fn summarize(&self) -> IndexMap<String, HostStats> {
        let mut entries: Vec<(String, HostStats)> = self
            .hosts
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().collect()
    }

    /// Sum of all host counters.
    pub fn totals(&self) -> HostStats {
        let mut totals = HostStats::default();
        for entry in self.hosts.iter() {
            totals.merge(entry.value());
        }
        totals
    }
}

//! Pending-handler bookkeeping for one play.
//!
//! Notifications accumulate per host while tasks run and are drained in a
//! single flush at the end of the play. A handler is recorded at most
//! once per host regardless of how many changed tasks notified it.

use indexmap::IndexMap;
use parking_lot::Mutex;

/// Tracks which handlers each host owes a run at flush time.
#[derive(Debug, Default)]
pub struct HandlerLedger {
    // host -> notified handler names, first-notification order
    pending: Mutex<IndexMap<String, Vec<String>>>,
}

impl HandlerLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a notification. Returns false when the handler was already
    /// pending for this host (the duplicate is dropped).
    pub fn notify(&self, host: &str, handler: &str) -> bool {
        let mut pending = self.pending.lock();
        let entry = pending.entry(host.to_string()).or_default();
        if entry.iter().any(|h| h == handler) {
            return false;
        }
        entry.push(handler.to_string());
        true
    }

    /// Whether the given handler is pending for the given host.
    pub fn is_pending(&self, host: &str, handler: &str) -> bool {
        self.pending
            .lock()
            .get(host)
            .is_some_and(|handlers| handlers.iter().any(|h| h == handler))
    }

    /// Whether any notification is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().values().all(|h| h.is_empty())
    }

    /// Take all pending notifications, leaving the ledger empty for the
    /// next play.
    pub fn drain(&self) -> IndexMap<String, Vec<String>> {
        std::mem::take(&mut *self.pending.lock())
    }
}

//! A dynamically registered counter bank: the driver equivalent of the
//! teacher's static `Metrics`/`MetricsSnapshot` pair, generalized so the
//! conductor can allocate a counter per live resource instead of a fixed
//! compile-time set.

use std::sync::Arc;

use parking_lot::Mutex;

use aeron_protocol::PaddedCounter;

pub struct CountersManager {
    counters: Mutex<Vec<(String, Arc<PaddedCounter>)>>,
}

impl CountersManager {
    pub fn new() -> Self {
        Self { counters: Mutex::new(Vec::new()) }
    }

    pub fn allocate(&self, label: impl Into<String>) -> Arc<PaddedCounter> {
        let counter = Arc::new(PaddedCounter::new(0));
        self.counters.lock().push((label.into(), counter.clone()));
        counter
    }

    pub fn find(&self, label: &str) -> Option<Arc<PaddedCounter>> {
        self.counters.lock().iter().find(|(l, _)| l == label).map(|(_, c)| c.clone())
    }

    /// A point-in-time snapshot for the CLI / log-on-shutdown summary,
    /// mirroring the teacher's `MetricsSnapshot`.
    pub fn snapshot(&self) -> Vec<(String, i64)> {
        self.counters.lock().iter().map(|(label, c)| (label.clone(), c.get())).collect()
    }
}

impl Default for CountersManager {
    fn default() -> Self {
        Self::new()
    }
}

/// The fixed set of system counters every conductor carries, named after the
/// equivalent Aeron driver system counters.
pub struct SystemCounters {
    pub errors: Arc<PaddedCounter>,
    pub unblocked_publications: Arc<PaddedCounter>,
    pub unblocked_commands: Arc<PaddedCounter>,
    pub free_fails: Arc<PaddedCounter>,
    pub client_timeouts: Arc<PaddedCounter>,
}

impl SystemCounters {
    pub fn new(manager: &CountersManager) -> Self {
        Self {
            errors: manager.allocate("errors"),
            unblocked_publications: manager.allocate("unblocked-publications"),
            unblocked_commands: manager.allocate("unblocked-commands"),
            free_fails: manager.allocate("free-fails"),
            client_timeouts: manager.allocate("client-timeouts"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocated_counters_are_independently_addressable() {
        let manager = CountersManager::new();
        let a = manager.allocate("a");
        let b = manager.allocate("b");
        a.fetch_add_ordered(3);
        b.fetch_add_ordered(7);
        assert_eq!(manager.find("a").unwrap().get(), 3);
        assert_eq!(manager.find("b").unwrap().get(), 7);
        assert_eq!(manager.snapshot().len(), 2);
    }
}

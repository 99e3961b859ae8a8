//! Session counters.

use parking_lot::Mutex;
use std::collections::HashMap;

/// Current live sessions, summed over every directory sharing the sink.
pub const SESSION_COUNT: &str = "sql_directory.SqlDirectory.session";

/// Highest live session count seen.
pub const SESSION_MAX_COUNT: &str = "sql_directory.SqlDirectory.session-max";

/// Counter sink injected into directories.
pub trait MetricsSink: Send + Sync + std::fmt::Debug {
    fn inc(&self, name: &str);
    fn dec(&self, name: &str);
    fn count(&self, name: &str) -> i64;
}

/// Counters kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: Mutex<HashMap<String, i64>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetricsSink for InMemoryMetrics {
    fn inc(&self, name: &str) {
        *self.counters.lock().entry(name.to_string()).or_default() += 1;
    }

    fn dec(&self, name: &str) {
        *self.counters.lock().entry(name.to_string()).or_default() -= 1;
    }

    fn count(&self, name: &str) -> i64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }
}

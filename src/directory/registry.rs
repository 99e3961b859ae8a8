//! Live session bookkeeping.
//!
//! One lock guards the set of live sessions together with the live and
//! maximum counts, so they never disagree. Every change is mirrored to the
//! injected [`MetricsSink`]. Once drained, the registry stays closed and
//! refuses new sessions.

use crate::directory::metrics::{MetricsSink, SESSION_COUNT, SESSION_MAX_COUNT};
use parking_lot::Mutex;
use std::sync::Arc;

struct RegistryState<S> {
    sessions: Vec<S>,
    max: usize,
    closed: bool,
}

/// Sessions currently open on a directory.
pub(crate) struct SessionRegistry<S> {
    state: Mutex<RegistryState<S>>,
    metrics: Arc<dyn MetricsSink>,
}

impl<S> SessionRegistry<S> {
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                sessions: Vec::new(),
                max: 0,
                closed: false,
            }),
            metrics,
        }
    }

    /// Track a new session and return the live count, or `None` when the
    /// registry was already drained.
    pub fn add(&self, session: S) -> Option<usize> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        state.sessions.push(session);
        let live = state.sessions.len();
        state.max = state.max.max(live);

        self.metrics.inc(SESSION_COUNT);
        if self.metrics.count(SESSION_COUNT) > self.metrics.count(SESSION_MAX_COUNT) {
            self.metrics.inc(SESSION_MAX_COUNT);
        }
        Some(live)
    }

    /// Forget the first session matching `matches`. Returns `false` when
    /// none was tracked.
    pub fn remove(&self, matches: impl Fn(&S) -> bool) -> bool {
        let mut state = self.state.lock();
        let Some(pos) = state.sessions.iter().position(matches) else {
            return false;
        };
        state.sessions.swap_remove(pos);
        self.metrics.dec(SESSION_COUNT);
        true
    }

    /// Take every tracked session and close the registry.
    pub fn drain(&self) -> Vec<S> {
        let sessions = {
            let mut state = self.state.lock();
            state.closed = true;
            std::mem::take(&mut state.sessions)
        };
        for _ in &sessions {
            self.metrics.dec(SESSION_COUNT);
        }
        sessions
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    pub fn max_count(&self) -> usize {
        self.state.lock().max
    }
}

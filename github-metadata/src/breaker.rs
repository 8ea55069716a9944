//! Host-level circuit breaker.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Trips a host after too many errors within a sliding window.
///
/// Old errors age out; a tripped host recovers once its window drains.
#[derive(Debug)]
pub(crate) struct CircuitBreaker {
    max_errors: usize,
    window: Duration,
    errors: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl CircuitBreaker {
    pub(crate) fn new(max_errors: usize, window: Duration) -> Self {
        Self {
            max_errors,
            window,
            errors: Mutex::new(HashMap::new()),
        }
    }

    /// Whether requests to `host` are currently allowed.
    pub(crate) fn allows(&self, host: &str) -> bool {
        let mut errors = self.errors.lock().expect("breaker state poisoned");
        let entry = errors.entry(host.to_string()).or_default();
        if let Some(cutoff) = Instant::now().checked_sub(self.window) {
            while entry.front().map_or(false, |seen| *seen < cutoff) {
                entry.pop_front();
            }
        }
        entry.len() < self.max_errors
    }

    /// Record one failed request against `host`.
    pub(crate) fn record_error(&self, host: &str) {
        let mut errors = self.errors.lock().expect("breaker state poisoned");
        errors
            .entry(host.to_string())
            .or_default()
            .push_back(Instant::now());
    }
}

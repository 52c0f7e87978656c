//! Named, cancellable timers for the cooperative dispatch loop.
//!
//! Waiting callers never poll: they start a named timer and let the
//! loop drive completion or expiry. Stopping a timer before it fires is
//! the cancellation mechanism; there is no separate cancellation token.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// Timer name used while waiting for the session close response.
pub(crate) const DISCONNECTION: &str = "disconnection";
/// Timer name used by the raw NATS connect handshake.
pub(crate) const HANDSHAKE: &str = "handshake";
/// Timer name installed by a bounded `run` call.
pub(crate) const WAIT: &str = "wait";

/// Named deadlines multiplexed onto one loop.
#[derive(Debug, Default)]
pub(crate) struct TimerRegistry {
    timers: HashMap<String, Instant>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or restart) a named timer.
    pub fn start(&mut self, name: &str, timeout: Duration) {
        self.timers.insert(name.to_string(), Instant::now() + timeout);
    }

    /// Cancel a timer. Returns whether it was still outstanding.
    pub fn stop(&mut self, name: &str) -> bool {
        self.timers.remove(name).is_some()
    }

    /// Cancel every timer.
    pub fn stop_all(&mut self) {
        self.timers.clear();
    }

    /// The next timer to fire, if any.
    pub fn next_deadline(&self) -> Option<(String, Instant)> {
        self.timers
            .iter()
            .min_by_key(|(_, deadline)| **deadline)
            .map(|(name, deadline)| (name.clone(), *deadline))
    }

    /// Whether a named timer is still outstanding.
    pub fn is_running(&self, name: &str) -> bool {
        self.timers.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }
}

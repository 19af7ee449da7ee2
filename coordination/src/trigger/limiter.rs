//! Rolling-window cap on autonomous interruptions across all agents.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Shared reference to an InterruptionLimiter
pub type SharedLimiter = Arc<InterruptionLimiter>;

/// At most `max_interruptions` claims per `window`.
#[derive(Debug)]
pub struct InterruptionLimiter {
    max_interruptions: usize,
    window: Duration,
    claims: Mutex<VecDeque<Instant>>,
}

impl InterruptionLimiter {
    pub fn new(max_interruptions: usize, window: Duration) -> Self {
        Self {
            max_interruptions,
            window,
            claims: Mutex::new(VecDeque::new()),
        }
    }

    pub fn shared(self) -> SharedLimiter {
        Arc::new(self)
    }

    /// Claim a slot at `now`. Returns false when the window is full.
    pub fn try_acquire(&self, now: Instant) -> bool {
        let mut claims = self.claims.lock().unwrap_or_else(|e| e.into_inner());
        while claims
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= self.window)
        {
            claims.pop_front();
        }
        if claims.len() >= self.max_interruptions {
            debug!(in_window = claims.len(), "Interruption cap reached");
            return false;
        }
        claims.push_back(now);
        true
    }

    /// Claims still inside the window at `now`.
    pub fn in_window(&self, now: Instant) -> usize {
        let claims = self.claims.lock().unwrap_or_else(|e| e.into_inner());
        claims
            .iter()
            .filter(|t| now.saturating_duration_since(**t) < self.window)
            .count()
    }
}

//! Manually driven clock

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use recurring_escrow_core::Clock;
use recurring_escrow_types::Timestamp;

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start)),
        }
    }

    pub fn set(&self, timestamp: Timestamp) {
        self.now.store(timestamp, Ordering::SeqCst);
    }

    /// Move forward and return the new time. Saturates at `u64::MAX`.
    pub fn advance(&self, seconds: u64) -> Timestamp {
        let previous = match self.now.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |now| {
            Some(now.saturating_add(seconds))
        }) {
            Ok(previous) | Err(previous) => previous,
        };
        previous.saturating_add(seconds)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

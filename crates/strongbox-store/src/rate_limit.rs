// ABOUTME: Two-state write gate for clients that persist high-frequency, rebuildable data.
// ABOUTME: Drops writes that arrive too soon or while one is in flight and remembers that it did so.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Default minimum spacing between accepted writes.
pub const DEFAULT_MIN_WRITE_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    Idle,
    WriteInProgress,
}

#[derive(Debug)]
struct GateState {
    state: WriteState,
    last_write: Option<Instant>,
    dropped: bool,
}

/// Write gate shared by a client and its in-flight write.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    min_interval: Duration,
    gate: Arc<Mutex<GateState>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            gate: Arc::new(Mutex::new(GateState {
                state: WriteState::Idle,
                last_write: None,
                dropped: false,
            })),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Try to start a write at `now`.
    ///
    /// Returns a permit (state becomes `WriteInProgress` until it is dropped)
    /// or `None` after marking the request as dropped.
    pub fn try_acquire_at(&self, now: Instant) -> Option<WritePermit> {
        let mut gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);

        let too_soon = gate
            .last_write
            .is_some_and(|last| now.saturating_duration_since(last) < self.min_interval);

        if gate.state == WriteState::WriteInProgress || too_soon {
            gate.dropped = true;
            return None;
        }

        gate.state = WriteState::WriteInProgress;
        gate.last_write = Some(now);
        gate.dropped = false;
        Some(WritePermit {
            gate: Arc::clone(&self.gate),
        })
    }

    pub fn state(&self) -> WriteState {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner).state
    }

    pub fn is_dropped(&self) -> bool {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner).dropped
    }

    /// Clear and return the dropped flag.
    pub fn take_dropped(&self) -> bool {
        let mut gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut gate.dropped)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_WRITE_INTERVAL)
    }
}

/// Held for the duration of an accepted write. Dropping it returns the gate to `Idle`.
#[derive(Debug)]
pub struct WritePermit {
    gate: Arc<Mutex<GateState>>,
}

impl Drop for WritePermit {
    fn drop(&mut self) {
        self.gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state = WriteState::Idle;
    }
}

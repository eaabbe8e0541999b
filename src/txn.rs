//! Timestamp sources for snapshot capture.
//!
//! The backup worker stamps each job with a snapshot timestamp taken from
//! the transaction manager's clock, so the snapshot point and the WAL
//! record ordering share one timeline. `MonotonicClock` exists for hosts
//! that run without a transaction manager; it is ordered but does not
//! match WAL timestamps, so `TxnClock` is preferred.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub trait TimestampOracle: Send + Sync {
    /// Current monotonic 64-bit timestamp.
    fn current_timestamp(&self) -> u64;
}

/// Transaction-manager style logical clock.
pub struct TxnClock {
    next_timestamp: AtomicU64,
}

impl TxnClock {
    pub fn new() -> Self {
        Self {
            next_timestamp: AtomicU64::new(1),
        }
    }

    /// Advance the clock by one tick, returning the new timestamp.
    /// Called by the host on commit-like events.
    pub fn advance(&self) -> u64 {
        self.next_timestamp.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for TxnClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimestampOracle for TxnClock {
    fn current_timestamp(&self) -> u64 {
        self.next_timestamp.load(Ordering::SeqCst)
    }
}

/// Wall-clock-free fallback ordered by process uptime.
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimestampOracle for MonotonicClock {
    fn current_timestamp(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn txn_clock_is_monotonic() {
        let clock = TxnClock::new();
        let first = clock.current_timestamp();
        let advanced = clock.advance();
        assert!(advanced > first);
        assert_eq!(clock.current_timestamp(), advanced);
    }

    #[test]
    fn monotonic_clock_never_decreases() {
        let clock = MonotonicClock::new();
        let a = clock.current_timestamp();
        let b = clock.current_timestamp();
        assert!(b >= a);
    }
}

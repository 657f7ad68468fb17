//! Ambient statistics (not in spec.md; ambient stack per `SPEC_FULL.md`
//! §3.1/§5).
//!
//! Grounded directly on the teacher's `src/stats.rs`: a `StatCount` tracks
//! allocated/freed/peak/current with relaxed atomics and a CAS-based
//! running peak, since `fetch_max` was not yet stable when that file was
//! written; we keep the same update shape (`fetch_max` is stable today,
//! but the CAS loop is kept for parity with the teacher and because it is
//! still the more portable form across atomic widths).

use std::sync::atomic::{AtomicI64, Ordering};

/// A single allocated/freed/peak/current counter, matching the teacher's
/// `StatCount`.
#[derive(Default)]
pub struct StatCount {
    pub allocated: AtomicI64,
    pub freed: AtomicI64,
    pub peak: AtomicI64,
    pub current: AtomicI64,
}

impl StatCount {
    pub const fn new() -> Self {
        StatCount {
            allocated: AtomicI64::new(0),
            freed: AtomicI64::new(0),
            peak: AtomicI64::new(0),
            current: AtomicI64::new(0),
        }
    }

    pub fn increase(&self, amount: i64) {
        self.update(amount);
    }

    pub fn decrease(&self, amount: i64) {
        self.update(-amount);
    }

    fn update(&self, amount: i64) {
        if amount == 0 {
            return;
        }
        let current = self.current.fetch_add(amount, Ordering::Relaxed) + amount;

        let mut old_peak = self.peak.load(Ordering::Relaxed);
        while current > old_peak {
            match self.peak.compare_exchange_weak(
                old_peak,
                current,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => old_peak = actual,
            }
        }

        if amount > 0 {
            self.allocated.fetch_add(amount, Ordering::Relaxed);
        } else {
            self.freed.fetch_add(-amount, Ordering::Relaxed);
        }
    }

    pub fn current(&self) -> i64 {
        self.current.load(Ordering::Relaxed)
    }
}

/// Per-queue-family statistics: pages currently held, live elements, and
/// external blocks outstanding. Exposed for tests (invariant 4, "no
/// leaks") and for diagnostics; never consulted by the core's control
/// flow.
#[derive(Default)]
pub struct QueueStats {
    pub pages: StatCount,
    pub elements: StatCount,
    pub external_blocks: StatCount,
}

impl QueueStats {
    pub const fn new() -> Self {
        QueueStats {
            pages: StatCount::new(),
            elements: StatCount::new(),
            external_blocks: StatCount::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_current_and_peak() {
        let stat = StatCount::new();
        stat.increase(3);
        stat.increase(4);
        stat.decrease(2);
        assert_eq!(stat.current(), 5);
        assert_eq!(stat.peak.load(Ordering::Relaxed), 7);
        assert_eq!(stat.allocated.load(Ordering::Relaxed), 7);
        assert_eq!(stat.freed.load(Ordering::Relaxed), 2);
    }
}

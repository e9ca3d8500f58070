//! Atomic usage counters, shared by the zone and the hunk.
//!
//! Single-threaded operation is a hard contract elsewhere in this crate,
//! but the counters are kept atomic anyway (as the teacher crate does)
//! since they're cheap, `Relaxed` is sufficient, and it means a caller who
//! samples stats from a signal handler or a debug console doesn't need a
//! lock.

use std::sync::atomic::{AtomicI64, Ordering};

/// A running total with a high-water mark, mirroring `mi_stat_count_t`.
#[derive(Debug, Default)]
pub struct StatCount {
    pub allocated: AtomicI64,
    pub freed: AtomicI64,
    pub current: AtomicI64,
    pub peak: AtomicI64,
}

impl StatCount {
    pub const fn new() -> Self {
        StatCount {
            allocated: AtomicI64::new(0),
            freed: AtomicI64::new(0),
            current: AtomicI64::new(0),
            peak: AtomicI64::new(0),
        }
    }

    pub fn update(&self, amount: i64) {
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
                Err(observed) => old_peak = observed,
            }
        }
        if amount > 0 {
            self.allocated.fetch_add(amount, Ordering::Relaxed);
        } else {
            self.freed.fetch_add(-amount, Ordering::Relaxed);
        }
    }

    pub fn increase(&self, amount: i64) {
        self.update(amount);
    }

    pub fn decrease(&self, amount: i64) {
        self.update(-amount);
    }

    pub fn current(&self) -> i64 {
        self.current.load(Ordering::Relaxed)
    }

    pub fn peak(&self) -> i64 {
        self.peak.load(Ordering::Relaxed)
    }
}

/// Per-zone counters exposed for diagnostics (not part of the core
/// allocation path's control flow).
#[derive(Debug, Default)]
pub struct ZoneStats {
    pub used: StatCount,
    pub segments: StatCount,
    pub blocks_split: AtomicI64,
    pub blocks_coalesced: AtomicI64,
}

/// Per-bank counters for the hunk, one instance per bank.
#[derive(Debug, Default)]
pub struct HunkBankStats {
    pub permanent: StatCount,
    pub temp: StatCount,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_peak_across_increase_and_decrease() {
        let s = StatCount::new();
        s.increase(100);
        s.increase(50);
        s.decrease(120);
        assert_eq!(s.current(), 30);
        assert_eq!(s.peak(), 150);
    }
}

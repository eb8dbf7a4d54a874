//! Capacity accounting in core-sized units.
//!
//! A counting semaphore over `total` units: a job reserves its requested cores
//! for the whole run and gives them back when it reaches a terminal state.
//! Reservation is non-blocking; the admission sweep simply skips jobs that do
//! not fit yet.

use std::sync::atomic::{AtomicU32, Ordering};

/// Lock-free counting semaphore over capacity units.
#[derive(Debug)]
pub struct CapacityPool {
    total: u32,
    /// Units currently reserved by running jobs.
    reserved: AtomicU32,
}

impl CapacityPool {
    /// Pool with `total` units, none reserved.
    #[must_use]
    pub const fn new(total: u32) -> Self {
        Self {
            total,
            reserved: AtomicU32::new(0),
        }
    }

    /// Total units managed.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.total
    }

    /// Units currently reserved.
    #[must_use]
    pub fn reserved(&self) -> u32 {
        self.reserved.load(Ordering::Acquire)
    }

    /// Units currently free.
    #[must_use]
    pub fn available(&self) -> u32 {
        self.total.saturating_sub(self.reserved())
    }

    /// Whether `units` would fit right now (no reservation is made).
    #[must_use]
    pub fn can_reserve(&self, units: u32) -> bool {
        self.available() >= units
    }

    /// Atomically reserve `units` if they fit. Returns whether it did.
    pub fn try_reserve(&self, units: u32) -> bool {
        let mut current = self.reserved.load(Ordering::Acquire);
        loop {
            let Some(next) = current.checked_add(units) else {
                return false;
            };
            if next > self.total {
                return false;
            }
            match self.reserved.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Return `units` to the pool. Over-release saturates at zero.
    pub fn release(&self, units: u32) {
        let mut current = self.reserved.load(Ordering::Acquire);
        loop {
            let next = current.saturating_sub(units);
            match self.reserved.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    if units > current {
                        tracing::warn!(
                            units,
                            reserved = current,
                            "released more capacity than reserved"
                        );
                    }
                    return;
                }
                Err(actual) => current = actual,
            }
        }
    }
}

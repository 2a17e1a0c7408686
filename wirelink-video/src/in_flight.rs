//! Counting gate bounding frames that are mid-conversion
//!
//! The consumer takes a unit before it touches a buffer slot and the
//! completion of that slot's work gives it back. With capacity N at most N
//! frames are between "slot chosen" and "dispatch finished", which is what
//! lets an N-slot ring be reused without waiting on individual buffers.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Coarse view of how many units are out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    Active(usize),
    Exhausted,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GateStats {
    pub capacity: usize,
    pub available: usize,
    pub acquired: u64,
    pub over_releases: u64,
}

struct Units {
    available: usize,
    /// Set while a drain is collecting units; acquirers stand aside
    draining: bool,
}

pub struct InFlightController {
    capacity: usize,
    units: Mutex<Units>,
    freed: Condvar,
    drain_lock: Mutex<()>,
    acquired: AtomicU64,
    over_releases: AtomicU64,
}

impl InFlightController {
    /// # Panics
    ///
    /// If `capacity` is zero; configs are validated before this is reached.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "in-flight capacity must be at least 1");
        Self {
            capacity,
            units: Mutex::new(Units {
                available: capacity,
                draining: false,
            }),
            freed: Condvar::new(),
            drain_lock: Mutex::new(()),
            acquired: AtomicU64::new(0),
            over_releases: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.units.lock().available
    }

    pub fn state(&self) -> GateState {
        match self.available() {
            n if n == self.capacity => GateState::Idle,
            0 => GateState::Exhausted,
            n => GateState::Active(self.capacity - n),
        }
    }

    /// Take a unit, blocking while none is available or a drain is pending
    pub fn acquire(&self) {
        let mut units = self.units.lock();
        while units.available == 0 || units.draining {
            self.freed.wait(&mut units);
        }
        units.available -= 1;
        self.acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn try_acquire(&self) -> bool {
        let mut units = self.units.lock();
        if units.available == 0 || units.draining {
            return false;
        }
        units.available -= 1;
        self.acquired.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Return a unit. Releasing more than was taken is a caller bug; the
    /// count stays at capacity and the event is recorded.
    pub fn release(&self) {
        let mut units = self.units.lock();
        if units.available >= self.capacity {
            drop(units);
            self.over_releases.fetch_add(1, Ordering::Relaxed);
            log::error!(
                "In-flight gate released past its capacity of {}",
                self.capacity
            );
            return;
        }
        units.available += 1;
        let draining = units.draining;
        drop(units);

        // A drainer shares the condvar with blocked acquirers
        if draining {
            self.freed.notify_all();
        } else {
            self.freed.notify_one();
        }
    }

    /// Acquire a unit owned by the returned permit
    pub fn acquire_permit(self: &Arc<Self>) -> InFlightPermit {
        self.acquire();
        InFlightPermit {
            gate: Arc::clone(self),
        }
    }

    pub fn try_acquire_permit(self: &Arc<Self>) -> Option<InFlightPermit> {
        self.try_acquire().then(|| InFlightPermit {
            gate: Arc::clone(self),
        })
    }

    /// Wait for all outstanding work, run `clear` while no unit is out,
    /// then reopen the gate.
    ///
    /// Drains are serialized; a second caller waits for the first to finish
    /// and then drains again. New acquirers block until the reset is over.
    pub fn drain_and_reset<F: FnOnce()>(&self, clear: F) {
        let _drain = self.drain_lock.lock();

        {
            let mut units = self.units.lock();
            units.draining = true;
            while units.available < self.capacity {
                self.freed.wait(&mut units);
            }
        }

        clear();

        {
            let mut units = self.units.lock();
            units.available = self.capacity;
            units.draining = false;
        }
        self.freed.notify_all();
        log::debug!("In-flight gate drained and reset");
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            capacity: self.capacity,
            available: self.available(),
            acquired: self.acquired.load(Ordering::Relaxed),
            over_releases: self.over_releases.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for InFlightController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightController")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}

/// One held unit, returned on drop
#[derive(Debug)]
pub struct InFlightPermit {
    gate: Arc<InFlightController>,
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}

//! Single-slot latest-wins handoff between producer and consumer

use crossbeam::utils::CachePadded;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailboxStats {
    pub published: u64,
    pub taken: u64,
    /// Frames overwritten or cleared before the consumer saw them
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    taken: AtomicU64,
    dropped: AtomicU64,
}

/// Holds at most one pending frame. Publishing replaces whatever is there,
/// so a slow consumer only ever sees the newest frame.
pub struct LatestFrameMailbox<T> {
    slot: Mutex<Option<T>>,
    counters: CachePadded<Counters>,
}

impl<T> LatestFrameMailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            counters: CachePadded::new(Counters::default()),
        }
    }

    /// Store `frame`, handing back the one it displaced so the caller drops
    /// it outside the lock
    pub fn publish(&self, frame: T) -> Option<T> {
        let displaced = self.slot.lock().replace(frame);
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        if displaced.is_some() {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        }
        displaced
    }

    /// Remove and return the pending frame
    pub fn take_and_clear(&self) -> Option<T> {
        let frame = self.slot.lock().take();
        if frame.is_some() {
            self.counters.taken.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    /// Discard the pending frame without consuming it
    pub fn clear(&self) -> Option<T> {
        let frame = self.slot.lock().take();
        if frame.is_some() {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    pub fn is_empty(&self) -> bool {
        self.slot.lock().is_none()
    }

    pub fn stats(&self) -> MailboxStats {
        MailboxStats {
            published: self.counters.published.load(Ordering::Relaxed),
            taken: self.counters.taken.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

impl<T> Default for LatestFrameMailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

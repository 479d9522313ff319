//! Cache-line isolated position counters.
//!
//! Every publisher/subscriber position and every system counter is one of
//! these: a single 64-bit cell, padded so concurrent readers of neighbouring
//! counters never provoke false sharing.

use std::sync::atomic::{ AtomicI64, Ordering };

/// A single atomic counter cell, padded out to a full cache line.
#[repr(align(64))]
pub struct PaddedCounter(AtomicI64);

impl PaddedCounter {
    pub const fn new(value: i64) -> Self {
        Self(AtomicI64::new(value))
    }

    /// Read with acquire semantics - the ordering every cross-thread
    /// consumer of a position counter must use.
    #[inline]
    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }

    /// Read with the weaker ordering appropriate for a counter only this
    /// thread writes and only this thread reads back.
    #[inline]
    pub fn get_relaxed(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }

    /// Publish a new value with release semantics.
    #[inline]
    pub fn set_ordered(&self, value: i64) {
        self.0.store(value, Ordering::Release);
    }

    #[inline]
    pub fn set_relaxed(&self, value: i64) {
        self.0.store(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn fetch_add_ordered(&self, delta: i64) -> i64 {
        self.0.fetch_add(delta, Ordering::AcqRel)
    }

    #[inline]
    pub fn compare_and_set(&self, expected: i64, new: i64) -> bool {
        self.0.compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }
}

impl Default for PaddedCounter {
    fn default() -> Self {
        Self::new(0)
    }
}

impl std::fmt::Debug for PaddedCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaddedCounter").field("value", &self.get_relaxed()).finish()
    }
}

//! Session id allocation: a monotone counter that skips the reserved range
//! and refuses to hand out an id already active on the same stream.

use std::collections::HashSet;

pub struct SessionIdAllocator {
    next: i32,
    reserved_low: i32,
    reserved_high: i32,
}

impl SessionIdAllocator {
    pub fn new(seed: i32, reserved_low: i32, reserved_high: i32) -> Self {
        Self { next: seed, reserved_low, reserved_high }
    }

    fn is_reserved(&self, candidate: i32) -> bool {
        candidate >= self.reserved_low && candidate <= self.reserved_high
    }

    /// Allocate a fresh session id for `stream_id`, skipping the reserved
    /// range and any id already active on that stream.
    pub fn allocate(&mut self, active: &HashSet<(i32, i32)>, stream_id: i32) -> i32 {
        loop {
            let candidate = self.next;
            self.next = self.next.wrapping_add(1);
            if self.is_reserved(candidate) {
                continue;
            }
            if active.contains(&(candidate, stream_id)) {
                continue;
            }
            return candidate;
        }
    }

    /// Validate a client-requested session id against the reserved range
    /// and the active set; does not consume a slot in `self.next`.
    pub fn validate_requested(&self, active: &HashSet<(i32, i32)>, session_id: i32, stream_id: i32) -> bool {
        !self.is_reserved(session_id) && !active.contains(&(session_id, stream_id))
    }
}

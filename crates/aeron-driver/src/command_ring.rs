//! The client -> driver command ring: a fixed-capacity, lock-free
//! multi-producer single-consumer queue with the same claim/publish
//! discipline as a log buffer's multi-writer claim (CAS on a sequence
//! counter, an availability flag published last) and the same
//! claimed-but-never-published "blocked" failure mode that
//! `LogBuffer::unblock` recovers from.
//!
//! Unlike the log buffer this ring carries typed, in-process [`DriverCommand`]
//! values rather than serialized bytes - the wire format a real client uses
//! to reach a driver in another process is out of scope here.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{ AtomicBool, Ordering };

use aeron_protocol::command::{
    AddPublicationCommand,
    AddSubscriptionCommand,
    ClientKeepaliveCommand,
    RemovePublicationCommand,
    RemoveSubscriptionCommand,
};
use aeron_protocol::PaddedCounter;

#[derive(Debug, Clone)]
pub enum DriverCommand {
    AddIpcPublication(AddPublicationCommand),
    RemovePublication(RemovePublicationCommand),
    AddIpcSubscription(AddSubscriptionCommand),
    RemoveSubscription(RemoveSubscriptionCommand),
    ClientKeepalive(ClientKeepaliveCommand),
}

struct Slot {
    command: UnsafeCell<MaybeUninit<DriverCommand>>,
}

pub struct CommandRingBuffer {
    capacity: i64,
    mask: i64,
    slots: Box<[Slot]>,
    available: Box<[AtomicBool]>,
    producer_seq: PaddedCounter,
    consumer_seq: PaddedCounter,
}

// SAFETY: a slot is only ever touched by the single producer that won its
// sequence number via CAS, and by the single consumer draining in sequence
// order after observing `available[idx]` - never concurrently by both.
unsafe impl Send for CommandRingBuffer {}
unsafe impl Sync for CommandRingBuffer {}

impl CommandRingBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "command ring capacity must be a power of two");
        let slots = (0..capacity).map(|_| Slot { command: UnsafeCell::new(MaybeUninit::uninit()) }).collect();
        let available = (0..capacity).map(|_| AtomicBool::new(false)).collect();
        Self {
            capacity: capacity as i64,
            mask: capacity as i64 - 1,
            slots,
            available,
            producer_seq: PaddedCounter::new(0),
            consumer_seq: PaddedCounter::new(0),
        }
    }

    /// Claim a slot and publish `command`. Returns `false` if the ring is
    /// full (the consumer has fallen capacity-many commands behind).
    pub fn offer(&self, command: DriverCommand) -> bool {
        loop {
            let seq = self.producer_seq.get_relaxed();
            if seq - self.consumer_seq.get() >= self.capacity {
                return false;
            }
            if self.producer_seq.compare_and_set(seq, seq + 1) {
                let idx = (seq & self.mask) as usize;
                unsafe {
                    (*self.slots[idx].command.get()).write(command);
                }
                self.available[idx].store(true, Ordering::Release);
                return true;
            }
        }
    }

    /// Drain up to `limit` published commands in FIFO order, invoking
    /// `handler` for each. Returns the number processed.
    pub fn drain(&self, limit: usize, mut handler: impl FnMut(DriverCommand)) -> usize {
        let mut processed = 0;
        while processed < limit {
            let seq = self.consumer_seq.get_relaxed();
            let idx = (seq & self.mask) as usize;
            if !self.available[idx].load(Ordering::Acquire) {
                break;
            }
            let command = unsafe { (*self.slots[idx].command.get()).assume_init_read() };
            self.available[idx].store(false, Ordering::Relaxed);
            self.consumer_seq.set_ordered(seq + 1);
            handler(command);
            processed += 1;
        }
        processed
    }

    /// `true` once a producer has claimed a sequence number but not yet
    /// published into it and the consumer is stuck waiting on that slot.
    pub fn is_blocked(&self) -> bool {
        let seq = self.consumer_seq.get_relaxed();
        self.producer_seq.get() > seq && !self.available[(seq & self.mask) as usize].load(Ordering::Acquire)
    }

    /// Force the consumer past a claimed-but-never-published slot. Mirrors
    /// `LogBuffer::unblock`: the caller is responsible for deciding a
    /// sufficient timeout has elapsed first.
    pub fn unblock(&self) -> bool {
        if !self.is_blocked() {
            return false;
        }
        let seq = self.consumer_seq.get_relaxed();
        self.consumer_seq.set_ordered(seq + 1);
        true
    }

    pub fn len(&self) -> i64 {
        self.producer_seq.get() - self.consumer_seq.get()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

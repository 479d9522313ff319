//! The IPC publication: one producer, N consumers over a [`LogBuffer`],
//! flow control, buffer cleaning, unblock detection and the ACTIVE /
//! INACTIVE / LINGER lifecycle (§4.P).
//!
//! None of this talks to the command ring directly - it is driven entirely
//! by the conductor, which calls `update_publisher_limit` and
//! `on_time_event` every duty cycle and translates the `PublicationEvent`s
//! this emits into the matching client notifications.

use std::sync::Arc;

use aeron_log_buffer::{ FrameClaim, LogBuffer, LogBufferError };
use aeron_protocol::frame::{ align_frame_length, HEADER_LENGTH };
use aeron_protocol::position::{ compute_position, partition_index, term_id, term_offset, unpack_tail };
use aeron_protocol::PaddedCounter;

use crate::error::{ IpcError, Result };
use crate::subscribable::{ SubscribableEntry, TetherState };

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicationState {
    Active,
    Inactive,
    Linger,
}

/// A notification the publication wants the conductor to deliver to
/// clients. The publication itself has no access to the command ring.
#[derive(Debug, Clone, Copy)]
pub enum PublicationEvent {
    UnavailableImage { subscriber_registration_id: i64 },
    AvailableImage { subscriber_registration_id: i64 },
}

/// Timeouts that govern the lifecycle sweep; supplied by the conductor from
/// its `DriverContext` so this crate carries no configuration knowledge of
/// its own.
#[derive(Debug, Clone, Copy)]
pub struct PublicationTimeouts {
    pub unblock_timeout_ns: i64,
    pub untethered_window_limit_timeout_ns: i64,
    pub untethered_resting_timeout_ns: i64,
    pub linger_timeout_ns: i64,
}

pub struct IpcPublication {
    pub log: Arc<LogBuffer>,
    pub registration_id: i64,
    pub session_id: i32,
    pub stream_id: i32,
    pub is_exclusive: bool,
    pub window_length: i32,
    pub state: PublicationState,

    timeouts: PublicationTimeouts,
    publisher_limit: PaddedCounter,
    trip_limit: i64,
    refcnt: i32,
    subscribables: Vec<SubscribableEntry>,

    /// Cached highest subscriber position, refreshed by
    /// `update_publisher_limit`; used for blocked-producer detection.
    consumer_position: i64,
    last_consumer_position: i64,
    blocked_since_ns: Option<i64>,
    last_cleaned_term_id: i32,
    linger_deadline_ns: Option<i64>,
}

impl IpcPublication {
    pub fn new(
        log: Arc<LogBuffer>,
        registration_id: i64,
        session_id: i32,
        stream_id: i32,
        is_exclusive: bool,
        window_length: i32,
        timeouts: PublicationTimeouts
    ) -> Self {
        let initial_term_id = log.initial_term_id();
        Self {
            log,
            registration_id,
            session_id,
            stream_id,
            is_exclusive,
            window_length,
            state: PublicationState::Active,
            timeouts,
            publisher_limit: PaddedCounter::new(0),
            trip_limit: 0,
            refcnt: 1,
            subscribables: Vec::new(),
            consumer_position: 0,
            last_consumer_position: 0,
            blocked_since_ns: None,
            last_cleaned_term_id: initial_term_id - 1,
            linger_deadline_ns: None,
        }
    }

    pub fn producer_position(&self) -> i64 {
        let meta = self.log.metadata();
        let index = meta.active_index.get() as usize;
        let (term, offset) = unpack_tail(meta.tail[index].get());
        compute_position(term, offset, self.log.bits_to_shift(), self.log.initial_term_id())
    }

    pub fn publisher_limit(&self) -> i64 {
        self.publisher_limit.get()
    }

    /// Claim `length` bytes of message body, refusing the claim with
    /// [`IpcError::LogBuffer`]`(`[`LogBufferError::BackPressured`]`)` if the
    /// producer's position would run past `publisher_limit` - the flow
    /// control §4.P and §5 require (S2). The limit check happens before the
    /// log buffer's own tail CAS, so a back-pressured claim never touches
    /// the ring at all.
    pub fn try_claim(&self, length: i32, exclusive: bool) -> Result<FrameClaim<'_>> {
        let required = align_frame_length(HEADER_LENGTH + length) as i64;
        if self.producer_position() + required > self.publisher_limit.get() {
            return Err(IpcError::LogBuffer(LogBufferError::BackPressured));
        }
        self.log.claim(length, exclusive).map_err(IpcError::LogBuffer)
    }

    pub fn incref(&mut self) {
        self.refcnt += 1;
    }

    /// Returns `true` if this decref drove the publication ACTIVE -> INACTIVE.
    pub fn decref(&mut self) -> bool {
        self.refcnt -= 1;
        if self.refcnt <= 0 && self.state == PublicationState::Active {
            let position = self.producer_position();
            self.log.metadata().end_of_stream_position.set_ordered(position);
            self.publisher_limit.set_ordered(position);
            self.state = PublicationState::Inactive;
            true
        } else {
            false
        }
    }

    pub fn add_subscriber(&mut self, registration_id: i64, is_tether: bool, now_ns: i64) -> Arc<PaddedCounter> {
        let position = Arc::new(PaddedCounter::new(self.producer_position()));
        self.subscribables.push(SubscribableEntry::new(registration_id, position.clone(), is_tether, now_ns));
        position
    }

    pub fn remove_subscriber(&mut self, registration_id: i64) -> bool {
        let before = self.subscribables.len();
        self.subscribables.retain(|s| s.registration_id != registration_id);
        self.subscribables.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribables.len()
    }

    /// Recompute `publisher_limit` from the slowest non-resting subscriber,
    /// incrementally cleaning buffer space that has fallen behind it.
    /// Returns the updated limit, or `0` if there are no subscribers at all
    /// (flow control is disabled and writes are black-holed - §4.P).
    pub fn update_publisher_limit(&mut self) -> i64 {
        if self.subscribables.is_empty() {
            let producer_position = self.producer_position();
            self.publisher_limit.set_ordered(producer_position);
            return 0;
        }

        let positions: Vec<i64> = self.subscribables
            .iter()
            .filter(|s| s.state != TetherState::Resting)
            .map(|s| s.position.get())
            .collect();

        let (Some(&min_sub_pos), Some(&max_sub_pos)) = (positions.iter().min(), positions.iter().max()) else {
            return self.publisher_limit.get();
        };

        self.consumer_position = max_sub_pos;

        let proposed_limit = min_sub_pos + self.window_length as i64;
        if proposed_limit > self.trip_limit {
            self.clean_up_to(min_sub_pos);
            self.publisher_limit.set_ordered(proposed_limit);
            self.trip_limit = proposed_limit + self.window_length as i64 / 8;
        }

        self.publisher_limit.get()
    }

    fn clean_up_to(&mut self, min_sub_pos: i64) {
        let bits = self.log.bits_to_shift();
        let initial = self.log.initial_term_id();
        let min_term_id = term_id(initial, min_sub_pos, bits);
        let dirty_term_id = min_term_id.wrapping_sub(2);
        if dirty_term_id >= initial && dirty_term_id > self.last_cleaned_term_id {
            let index = partition_index(initial, dirty_term_id);
            self.log.clean_partition(index);
            self.last_cleaned_term_id = dirty_term_id;
        }
    }

    /// Detect a producer stuck mid-claim: the highest subscriber position
    /// hasn't moved while the producer has claimed past it. Returns the
    /// `(partition_index, term_offset)` to unblock once the suspicion has
    /// persisted past `unblock_timeout_ns`.
    pub fn check_blocked_producer(&mut self, now_ns: i64) -> Option<(usize, i32)> {
        if self.is_exclusive {
            return None;
        }

        let producer_position = self.producer_position();
        let stalled = self.consumer_position == self.last_consumer_position && producer_position > self.consumer_position;
        self.last_consumer_position = self.consumer_position;

        if !stalled {
            self.blocked_since_ns = None;
            return None;
        }

        let since = *self.blocked_since_ns.get_or_insert(now_ns);
        if now_ns - since < self.timeouts.unblock_timeout_ns {
            return None;
        }

        self.blocked_since_ns = None;
        let initial = self.log.initial_term_id();
        let bits = self.log.bits_to_shift();
        let stuck_term_id = term_id(initial, self.consumer_position, bits);
        let index = partition_index(initial, stuck_term_id);
        let offset = term_offset(self.consumer_position, self.log.term_length());
        Some((index, offset))
    }

    /// Lifecycle sweep: untethered subscriber lag transitions, then the
    /// ACTIVE -> INACTIVE -> LINGER progression.
    pub fn on_time_event(&mut self, now_ns: i64) -> Vec<PublicationEvent> {
        let mut events = self.sweep_subscribers(now_ns);

        if self.state == PublicationState::Inactive && self.is_drained() {
            for sub in &self.subscribables {
                events.push(PublicationEvent::UnavailableImage { subscriber_registration_id: sub.registration_id });
            }
            self.state = PublicationState::Linger;
            self.linger_deadline_ns = Some(now_ns + self.timeouts.linger_timeout_ns);
        }

        events
    }

    fn sweep_subscribers(&mut self, now_ns: i64) -> Vec<PublicationEvent> {
        let limit = self.publisher_limit.get();
        let lag_floor = limit - (self.window_length as i64) / 8;
        let window_timeout = self.timeouts.untethered_window_limit_timeout_ns;
        let resting_timeout = self.timeouts.untethered_resting_timeout_ns;
        let consumer_position = self.consumer_position;
        let mut events = Vec::new();

        for sub in &mut self.subscribables {
            if sub.is_tether {
                sub.time_of_last_update_ns = now_ns;
                continue;
            }

            match sub.state {
                TetherState::Active => {
                    if sub.position.get() < lag_floor {
                        if now_ns - sub.time_of_last_update_ns >= window_timeout {
                            sub.state = TetherState::Linger;
                            sub.time_of_last_update_ns = now_ns;
                            events.push(PublicationEvent::UnavailableImage {
                                subscriber_registration_id: sub.registration_id,
                            });
                        }
                    } else {
                        sub.time_of_last_update_ns = now_ns;
                    }
                }
                TetherState::Linger => {
                    if now_ns - sub.time_of_last_update_ns >= window_timeout {
                        sub.state = TetherState::Resting;
                        sub.time_of_last_update_ns = now_ns;
                    }
                }
                TetherState::Resting => {
                    if now_ns - sub.time_of_last_update_ns >= resting_timeout {
                        sub.position.set_ordered(consumer_position);
                        sub.state = TetherState::Active;
                        sub.time_of_last_update_ns = now_ns;
                        events.push(PublicationEvent::AvailableImage {
                            subscriber_registration_id: sub.registration_id,
                        });
                    }
                }
            }
        }

        events
    }

    fn is_drained(&self) -> bool {
        let end = self.log.metadata().end_of_stream_position.get();
        self.subscribables.iter().all(|s| s.position.get() >= end)
    }

    pub fn has_reached_end_of_life(&self, now_ns: i64) -> bool {
        self.state == PublicationState::Linger && self.linger_deadline_ns.is_some_and(|d| now_ns >= d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeouts() -> PublicationTimeouts {
        PublicationTimeouts {
            unblock_timeout_ns: 1_000_000_000,
            untethered_window_limit_timeout_ns: 1_000_000_000,
            untethered_resting_timeout_ns: 1_000_000_000,
            linger_timeout_ns: 500_000_000,
        }
    }

    fn new_log(path: &str) -> Arc<LogBuffer> {
        let _ = std::fs::remove_file(path);
        Arc::new(LogBuffer::create(path, 64 * 1024, 0, 1408, 1, 1, 1).unwrap())
    }

    #[test]
    fn no_subscribers_black_holes_instead_of_back_pressuring() {
        let log = new_log("/tmp/aeron-ipc-test-no-subs");
        let mut publication = IpcPublication::new(log.clone(), 1, 1, 1, true, 4096, timeouts());

        let mut claim = log.claim(64, true).unwrap();
        claim.data_mut().fill(1);
        claim.commit(aeron_protocol::frame::UNFRAGMENTED, 0);

        assert_eq!(publication.update_publisher_limit(), 0);
        assert_eq!(publication.publisher_limit(), publication.producer_position());
        let _ = std::fs::remove_file("/tmp/aeron-ipc-test-no-subs");
    }

    #[test]
    fn decref_to_zero_moves_active_to_inactive() {
        let log = new_log("/tmp/aeron-ipc-test-decref");
        let mut publication = IpcPublication::new(log, 1, 1, 1, true, 4096, timeouts());
        assert_eq!(publication.state, PublicationState::Active);
        assert!(publication.decref());
        assert_eq!(publication.state, PublicationState::Inactive);
        let _ = std::fs::remove_file("/tmp/aeron-ipc-test-decref");
    }

    #[test]
    fn back_pressure_caps_limit_at_window() {
        let log = new_log("/tmp/aeron-ipc-test-window");
        let mut publication = IpcPublication::new(log, 1, 1, 1, true, 4096, timeouts());
        let _ = publication.add_subscriber(2, true, 0);

        assert_eq!(publication.update_publisher_limit(), 4096);
        let _ = std::fs::remove_file("/tmp/aeron-ipc-test-window");
    }

    #[test]
    fn try_claim_is_back_pressured_once_the_window_is_full() {
        let log = new_log("/tmp/aeron-ipc-test-try-claim-bp");
        let mut publication = IpcPublication::new(log, 1, 1, 1, true, 4096, timeouts());
        let _ = publication.add_subscriber(2, true, 0);
        assert_eq!(publication.update_publisher_limit(), 4096);

        // Aligned frame length is 128 (32-byte header + 96-byte body, already
        // 32-aligned); exactly 32 of those fill the 4096-byte window.
        for _ in 0..32 {
            let mut claim = publication.try_claim(96, true).expect("within the window");
            claim.data_mut().fill(0xAB);
            claim.commit(aeron_protocol::frame::UNFRAGMENTED, 0);
        }
        assert_eq!(publication.producer_position(), 4096);

        let result = publication.try_claim(96, true);
        assert!(
            matches!(result, Err(IpcError::LogBuffer(LogBufferError::BackPressured))),
            "expected back-pressure past the window, got {result:?}"
        );
        assert_eq!(publication.producer_position(), 4096, "a refused claim must not advance the tail");

        let _ = std::fs::remove_file("/tmp/aeron-ipc-test-try-claim-bp");
    }

    #[test]
    fn untethered_subscriber_is_evicted_then_readmitted_after_lagging() {
        let log = new_log("/tmp/aeron-ipc-test-untethered");
        let timeouts = PublicationTimeouts {
            unblock_timeout_ns: 1_000_000_000,
            untethered_window_limit_timeout_ns: 100,
            untethered_resting_timeout_ns: 100,
            linger_timeout_ns: 500_000_000,
        };
        let mut publication = IpcPublication::new(log, 1, 1, 1, true, 4096, timeouts);

        let tethered_position = publication.add_subscriber(2, true, 0);
        tethered_position.set_ordered(2000);
        let untethered_position = publication.add_subscriber(3, false, 0);

        publication.update_publisher_limit();
        let events = publication.on_time_event(0);
        assert!(events.is_empty());

        publication.update_publisher_limit();
        let events = publication.on_time_event(100);
        assert!(
            matches!(
                events.as_slice(),
                [PublicationEvent::UnavailableImage { subscriber_registration_id: 3 }]
            )
        );

        publication.update_publisher_limit();
        let events = publication.on_time_event(200);
        assert!(events.is_empty(), "Linger -> Resting transition emits no event");

        publication.update_publisher_limit();
        let events = publication.on_time_event(300);
        assert!(
            matches!(events.as_slice(), [PublicationEvent::AvailableImage { subscriber_registration_id: 3 }])
        );
        assert_eq!(untethered_position.get(), 2000, "readmitted subscriber snaps to the current consumer position");

        let _ = std::fs::remove_file("/tmp/aeron-ipc-test-untethered");
    }

    proptest::proptest! {
        #[test]
        fn publisher_limit_never_outruns_the_slowest_tethered_subscriber(
            sub_position in 0i64..(64 * 1024),
            window_length in proptest::prelude::prop_oneof![
                proptest::prelude::Just(1024i32),
                proptest::prelude::Just(4096i32),
                proptest::prelude::Just(16384i32),
            ]
        ) {
            let path = format!("/tmp/aeron-ipc-test-proptest-limit-{sub_position}-{window_length}");
            let log = new_log(&path);
            let mut publication = IpcPublication::new(log, 1, 1, 1, true, window_length, timeouts());
            let position = publication.add_subscriber(2, true, 0);
            position.set_ordered(sub_position);

            let limit = publication.update_publisher_limit();
            proptest::prop_assert!(limit <= sub_position + window_length as i64);
            let _ = std::fs::remove_file(&path);
        }
    }
}

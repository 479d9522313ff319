//! Per-subscriber bookkeeping attached to an [`crate::publication::IpcPublication`].

use std::sync::Arc;

use aeron_protocol::PaddedCounter;

/// Where an untethered subscriber sits in the lag-eviction protocol (§4.P).
/// Tethered subscribers never leave [`TetherState::Active`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TetherState {
    Active,
    Linger,
    Resting,
}

pub struct SubscribableEntry {
    pub registration_id: i64,
    /// Shared with the `Image` so the subscriber thread writes its position
    /// directly and the publication (on the conductor thread) reads it.
    pub position: Arc<PaddedCounter>,
    pub is_tether: bool,
    pub state: TetherState,
    pub time_of_last_update_ns: i64,
}

impl SubscribableEntry {
    pub fn new(registration_id: i64, position: Arc<PaddedCounter>, is_tether: bool, now_ns: i64) -> Self {
        Self {
            registration_id,
            position,
            is_tether,
            state: TetherState::Active,
            time_of_last_update_ns: now_ns,
        }
    }
}

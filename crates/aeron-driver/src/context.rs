//! Driver configuration. A builder over the knobs the conductor and the IPC
//! layer need, plus the clock abstraction tests substitute a fake for -
//! grounded on the teacher's `RingBufferConfig`/context builder pattern.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use aeron_protocol::position::validate_term_length;

use crate::error::{ AeronError, Result };

/// A source of monotonic nanosecond timestamps. Production code uses
/// [`SystemNanoClock`]; tests supply a [`ManualClock`] so timeout-driven
/// behaviour (unblocking, untethered eviction, linger) is deterministic.
pub trait NanoClock: Send + Sync {
    fn nanos(&self) -> i64;
}

pub struct SystemNanoClock {
    start: Instant,
}

impl SystemNanoClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Default for SystemNanoClock {
    fn default() -> Self {
        Self::new()
    }
}

impl NanoClock for SystemNanoClock {
    fn nanos(&self) -> i64 {
        self.start.elapsed().as_nanos() as i64
    }
}

pub struct DriverContext {
    pub aeron_dir: PathBuf,
    pub term_length: i32,
    pub mtu_length: i32,
    pub ipc_publication_term_window_length: i32,
    pub publication_unblock_timeout_ns: i64,
    pub client_liveness_timeout_ns: i64,
    pub untethered_window_limit_timeout_ns: i64,
    pub untethered_resting_timeout_ns: i64,
    pub publication_linger_timeout_ns: i64,
    pub timer_interval_ns: i64,
    pub file_page_size: i32,
    pub publication_reserved_session_id_low: i32,
    pub publication_reserved_session_id_high: i32,
    pub command_ring_capacity: usize,
    pub clock: Arc<dyn NanoClock>,
}

impl DriverContext {
    pub fn builder() -> DriverContextBuilder {
        DriverContextBuilder::default()
    }

    pub fn publications_dir(&self) -> PathBuf {
        self.aeron_dir.join("publications")
    }
}

pub struct DriverContextBuilder {
    aeron_dir: PathBuf,
    term_length: i32,
    mtu_length: i32,
    ipc_publication_term_window_length: i32,
    publication_unblock_timeout_ns: i64,
    client_liveness_timeout_ns: i64,
    untethered_window_limit_timeout_ns: i64,
    untethered_resting_timeout_ns: i64,
    publication_linger_timeout_ns: i64,
    timer_interval_ns: i64,
    file_page_size: i32,
    publication_reserved_session_id_low: i32,
    publication_reserved_session_id_high: i32,
    command_ring_capacity: usize,
    clock: Option<Arc<dyn NanoClock>>,
}

impl Default for DriverContextBuilder {
    fn default() -> Self {
        Self {
            aeron_dir: std::env::temp_dir().join("aeron-rs-core"),
            term_length: 16 * 1024 * 1024,
            mtu_length: 1408,
            ipc_publication_term_window_length: 2 * 1024 * 1024,
            publication_unblock_timeout_ns: 10_000_000_000,
            client_liveness_timeout_ns: 10_000_000_000,
            untethered_window_limit_timeout_ns: 5_000_000_000,
            untethered_resting_timeout_ns: 5_000_000_000,
            publication_linger_timeout_ns: 5_000_000_000,
            timer_interval_ns: 1_000_000_000,
            file_page_size: 4096,
            publication_reserved_session_id_low: 1,
            publication_reserved_session_id_high: 1000,
            command_ring_capacity: 256,
            clock: None,
        }
    }
}

impl DriverContextBuilder {
    pub fn aeron_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.aeron_dir = path.into();
        self
    }

    pub fn term_length(mut self, v: i32) -> Self {
        self.term_length = v;
        self
    }

    pub fn mtu_length(mut self, v: i32) -> Self {
        self.mtu_length = v;
        self
    }

    pub fn ipc_publication_term_window_length(mut self, v: i32) -> Self {
        self.ipc_publication_term_window_length = v;
        self
    }

    pub fn publication_unblock_timeout_ns(mut self, v: i64) -> Self {
        self.publication_unblock_timeout_ns = v;
        self
    }

    pub fn client_liveness_timeout_ns(mut self, v: i64) -> Self {
        self.client_liveness_timeout_ns = v;
        self
    }

    pub fn untethered_window_limit_timeout_ns(mut self, v: i64) -> Self {
        self.untethered_window_limit_timeout_ns = v;
        self
    }

    pub fn untethered_resting_timeout_ns(mut self, v: i64) -> Self {
        self.untethered_resting_timeout_ns = v;
        self
    }

    pub fn publication_linger_timeout_ns(mut self, v: i64) -> Self {
        self.publication_linger_timeout_ns = v;
        self
    }

    pub fn timer_interval_ns(mut self, v: i64) -> Self {
        self.timer_interval_ns = v;
        self
    }

    pub fn command_ring_capacity(mut self, v: usize) -> Self {
        self.command_ring_capacity = v;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn NanoClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<DriverContext> {
        validate_term_length(self.term_length)?;
        if self.ipc_publication_term_window_length <= 0 || self.ipc_publication_term_window_length > self.term_length {
            return Err(
                AeronError::Protocol(
                    aeron_protocol::ProtocolError::config(
                        format!(
                            "ipc_publication_term_window_length {} must be in (0, term_length {}]",
                            self.ipc_publication_term_window_length,
                            self.term_length
                        )
                    )
                )
            );
        }
        if self.publication_reserved_session_id_low > self.publication_reserved_session_id_high {
            return Err(
                AeronError::Protocol(
                    aeron_protocol::ProtocolError::config("reserved session id range is inverted".to_string())
                )
            );
        }

        Ok(DriverContext {
            aeron_dir: self.aeron_dir,
            term_length: self.term_length,
            mtu_length: self.mtu_length,
            ipc_publication_term_window_length: self.ipc_publication_term_window_length,
            publication_unblock_timeout_ns: self.publication_unblock_timeout_ns,
            client_liveness_timeout_ns: self.client_liveness_timeout_ns,
            untethered_window_limit_timeout_ns: self.untethered_window_limit_timeout_ns,
            untethered_resting_timeout_ns: self.untethered_resting_timeout_ns,
            publication_linger_timeout_ns: self.publication_linger_timeout_ns,
            timer_interval_ns: self.timer_interval_ns,
            file_page_size: self.file_page_size,
            publication_reserved_session_id_low: self.publication_reserved_session_id_low,
            publication_reserved_session_id_high: self.publication_reserved_session_id_high,
            command_ring_capacity: self.command_ring_capacity,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemNanoClock::new())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_power_of_two_term_length() {
        let err = DriverContext::builder().term_length(100).build();
        assert!(err.is_err());
    }

    #[test]
    fn rejects_window_larger_than_term() {
        let err = DriverContext::builder()
            .term_length(64 * 1024)
            .ipc_publication_term_window_length(128 * 1024)
            .build();
        assert!(err.is_err());
    }

    #[test]
    fn default_context_builds() {
        assert!(DriverContext::builder().build().is_ok());
    }
}

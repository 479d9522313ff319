//! The log metadata region: a fixed-size header colocated with the term
//! partitions, page-aligned, placed immediately after them in the mapped
//! file.
//!
//! Cache-line isolated the same way the grounding IPC ring buffer isolates
//! its producer/consumer sequences: each atomic field gets its own 64-byte
//! line so producer, conductor and every subscriber can poll their own
//! counter without bouncing a shared line between cores.

use static_assertions::const_assert;

use aeron_protocol::PaddedCounter;

pub const MAGIC: u64 = 0x4145_524f_4e5f_4c42; // "AERON_LB"
pub const VERSION: i32 = 1;

/// First cache line: written once at creation, read-only thereafter.
#[repr(C)]
pub struct LogMetadataHeader {
    pub magic: u64,
    pub correlation_id: i64,
    pub version: i32,
    pub initial_term_id: i32,
    pub term_length: i32,
    pub mtu_length: i32,
    pub page_size: i32,
    pub session_id: i32,
    pub stream_id: i32,
    _pad: [u8; 20],
}

impl LogMetadataHeader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        initial_term_id: i32,
        term_length: i32,
        mtu_length: i32,
        page_size: i32,
        correlation_id: i64,
        session_id: i32,
        stream_id: i32
    ) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            initial_term_id,
            term_length,
            mtu_length,
            page_size,
            correlation_id,
            session_id,
            stream_id,
            _pad: [0; 20],
        }
    }
}

#[repr(C)]
pub struct LogMetadata {
    pub header: LogMetadataHeader,
    /// Packed `(term_id, term_offset)` tail per partition.
    pub tail: [PaddedCounter; 3],
    /// Index of the partition currently being written to.
    pub active_index: PaddedCounter,
    /// Number of completed term rotations since `initial_term_id`.
    pub active_term_count: PaddedCounter,
    /// `i64::MAX` until the publication is drained; then the position at
    /// which the stream ended.
    pub end_of_stream_position: PaddedCounter,
    pub is_connected: PaddedCounter,
    pub active_transport_count: PaddedCounter,
}

pub const METADATA_LENGTH: usize = std::mem::size_of::<LogMetadata>();

const_assert!(std::mem::size_of::<LogMetadataHeader>() <= 64);

impl LogMetadata {
    /// # Safety
    /// `ptr` must point at a region at least `METADATA_LENGTH` bytes long
    /// that outlives the returned reference.
    pub unsafe fn from_ptr<'a>(ptr: *const u8) -> &'a LogMetadata {
        &*(ptr as *const LogMetadata)
    }

    /// # Safety
    /// Same requirements as [`from_ptr`], plus exclusive access for the
    /// duration of the borrow (not enforced - callers only use this to
    /// initialise a freshly created metadata region).
    pub unsafe fn from_ptr_mut<'a>(ptr: *mut u8) -> &'a mut LogMetadata {
        &mut *(ptr as *mut LogMetadata)
    }
}


//! Frame header layout shared by the log buffer and the wire protocol.
//!
//! ```text
//! 0                   1                   2                   3
//! 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        frame_length                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |version|   flags  |            type               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        term_offset                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        session_id                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        stream_id                             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        term_id                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        reserved_value                        |
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use bytemuck::{ Pod, Zeroable };
use static_assertions::const_assert_eq;

/// All frames (and the gaps between them) are aligned to this boundary.
pub const FRAME_ALIGNMENT: i32 = 32;

/// Size in bytes of a `FrameHeader`.
pub const HEADER_LENGTH: i32 = 32;

/// Sentinel meaning "claimed but not yet committed" - invisible to readers.
pub const UNCOMMITTED_FRAME_LENGTH: i32 = 0;

pub const BEGIN_FRAGMENT_FLAG: u8 = 0x80;
pub const END_FRAGMENT_FLAG: u8 = 0x40;
pub const UNFRAGMENTED: u8 = BEGIN_FRAGMENT_FLAG | END_FRAGMENT_FLAG;

pub const CURRENT_VERSION: u8 = 0;

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Pad = 0x00,
    Data = 0x01,
}

impl FrameType {
    pub fn from_u16(v: u16) -> Self {
        match v {
            0x00 => FrameType::Pad,
            _ => FrameType::Data,
        }
    }
}

/// Plain-old-data mirror of the on-disk/on-wire frame header.
///
/// `frame_length` is the one field readers and writers touch with
/// acquire/release atomics; the log buffer does that via raw pointer
/// arithmetic into the mapped region rather than through this struct, since
/// mutation of a single field with ordering semantics doesn't fit a normal
/// struct field access. This type exists for the other fields: building a
/// header template, and decoding a header already known to be committed.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct FrameHeader {
    pub frame_length: i32,
    pub version: u8,
    pub flags: u8,
    pub frame_type: u16,
    pub term_offset: i32,
    pub session_id: i32,
    pub stream_id: i32,
    pub term_id: i32,
    pub reserved_value: i64,
}

const_assert_eq!(std::mem::size_of::<FrameHeader>(), HEADER_LENGTH as usize);

impl FrameHeader {
    pub fn new(session_id: i32, stream_id: i32) -> Self {
        Self {
            frame_length: UNCOMMITTED_FRAME_LENGTH,
            version: CURRENT_VERSION,
            flags: UNFRAGMENTED,
            frame_type: FrameType::Data as u16,
            term_offset: 0,
            session_id,
            stream_id,
            term_id: 0,
            reserved_value: 0,
        }
    }

    pub fn is_padding(&self) -> bool {
        self.frame_length < 0 || self.frame_type == FrameType::Pad as u16
    }

    pub fn is_begin_fragment(&self) -> bool {
        self.flags & BEGIN_FRAGMENT_FLAG != 0
    }

    pub fn is_end_fragment(&self) -> bool {
        self.flags & END_FRAGMENT_FLAG != 0
    }
}

/// Round `length` up to the next multiple of [`FRAME_ALIGNMENT`].
#[inline]
pub fn align_frame_length(length: i32) -> i32 {
    (length + (FRAME_ALIGNMENT - 1)) & !(FRAME_ALIGNMENT - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_length_matches_spec() {
        assert_eq!(HEADER_LENGTH, 32);
    }

    #[test]
    fn align_frame_length_rounds_up() {
        assert_eq!(align_frame_length(1), 32);
        assert_eq!(align_frame_length(32), 32);
        assert_eq!(align_frame_length(33), 64);
        assert_eq!(align_frame_length(0), 0);
    }

    #[test]
    fn new_header_is_uncommitted_and_unfragmented() {
        let h = FrameHeader::new(7, 10);
        assert_eq!(h.frame_length, UNCOMMITTED_FRAME_LENGTH);
        assert!(h.is_begin_fragment());
        assert!(h.is_end_fragment());
        assert!(!h.is_padding());
    }
}

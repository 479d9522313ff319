//! The memory-mapped log buffer: three term partitions plus a metadata
//! region, file-backed so producer and consumers - in this process or
//! another - rendezvous purely through shared memory.
//!
//! File-backed `MAP_SHARED` mmap, magic/version validation on open, and the
//! raw-pointer claim/commit discipline below all follow the same shape as
//! the grounding repo's `SharedRingBuffer`; the three-partition rotation and
//! per-frame header commit are this crate's own addition, grounded in the
//! record/commit protocol of a real Aeron-style many-to-one ring buffer.

use std::fs::{ File, OpenOptions };
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::sync::atomic::{ AtomicI32, Ordering };

use aeron_protocol::frame::{
    align_frame_length,
    FrameHeader,
    FrameType,
    CURRENT_VERSION,
    FRAME_ALIGNMENT,
    HEADER_LENGTH,
    UNFRAGMENTED,
};
use aeron_protocol::position::{ pack_tail, unpack_tail, number_of_bits_to_shift, validate_term_length };

use crate::error::{ LogBufferError, Result };
use crate::metadata::{ LogMetadata, LogMetadataHeader, METADATA_LENGTH, MAGIC, VERSION };

/// Page size assumed for alignment of the metadata region. Real systems
/// should query `sysconf(_SC_PAGESIZE)`; a fixed 4 KiB is correct on every
/// platform this crate targets and keeps file-size arithmetic dependency-free.
const PAGE_SIZE: usize = 4096;

#[inline]
fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

fn aligned_metadata_len() -> usize {
    align_up(METADATA_LENGTH, PAGE_SIZE)
}

/// What a consumer scan found at a given `(partition, offset)`.
#[derive(Debug)]
pub enum FrameScan {
    /// `frame_length` is still zero: nothing committed there yet.
    Pending,
    /// A padding frame; the caller should skip `aligned_length` bytes and,
    /// if that reaches the term end, rotate to the next partition.
    Padding { aligned_length: i32 },
    /// A real frame.
    Data { header: FrameHeader, body_offset: i32, body_length: i32, aligned_length: i32 },
}

/// A producer's in-flight claim on a slice of a term partition. The header
/// is written and the frame published only when [`FrameClaim::commit`] is
/// called; dropping it without committing leaves the slot permanently
/// un-committed until the unblocker reclaims it - exactly the scenario
/// scenario S4 exercises.
pub struct FrameClaim<'a> {
    buffer: &'a LogBuffer,
    partition_index: usize,
    term_offset: i32,
    term_id: i32,
    data_capacity: i32,
}

impl<'a> FrameClaim<'a> {
    /// Mutable access to the claimed body bytes (excludes the frame header).
    pub fn data_mut(&mut self) -> &mut [u8] {
        let ptr = self.buffer
            .partition_ptr(self.partition_index)
            .wrapping_add((self.term_offset + HEADER_LENGTH) as usize);
        unsafe { std::slice::from_raw_parts_mut(ptr, self.data_capacity as usize) }
    }

    pub fn term_offset(&self) -> i32 {
        self.term_offset
    }

    pub fn term_id(&self) -> i32 {
        self.term_id
    }

    /// Write the remaining header fields and release-publish `frame_length`
    /// last, so a concurrent reader never observes a partially written
    /// frame as committed.
    pub fn commit(self, flags: u8, reserved_value: i64) {
        let meta = self.buffer.metadata();
        let session_id = meta.header.session_id;
        let stream_id = meta.header.stream_id;
        let header_ptr = self.buffer.partition_ptr(self.partition_index).wrapping_add(self.term_offset as usize);

        unsafe {
            std::ptr::write_unaligned(header_ptr.add(4), CURRENT_VERSION);
            std::ptr::write_unaligned(header_ptr.add(5), flags);
            std::ptr::write_unaligned(header_ptr.add(6) as *mut u16, FrameType::Data as u16);
            std::ptr::write_unaligned(header_ptr.add(8) as *mut i32, self.term_offset);
            std::ptr::write_unaligned(header_ptr.add(12) as *mut i32, session_id);
            std::ptr::write_unaligned(header_ptr.add(16) as *mut i32, stream_id);
            std::ptr::write_unaligned(header_ptr.add(20) as *mut i32, self.term_id);
            std::ptr::write_unaligned(header_ptr.add(24) as *mut i64, reserved_value);
        }

        let frame_length = HEADER_LENGTH + self.data_capacity;
        let length_cell = unsafe { &*(header_ptr as *const AtomicI32) };
        length_cell.store(frame_length, Ordering::Release);
    }
}

pub struct LogBuffer {
    mmap_ptr: *mut u8,
    mmap_len: usize,
    term_length: i32,
    bits_to_shift: u32,
    metadata_offset: usize,
    _file: File,
}

// SAFETY: every mutable access goes through atomics or raw-pointer writes
// into disjoint claimed regions; the type itself holds no interior state
// that needs `&mut self` to mutate.
unsafe impl Send for LogBuffer {}
unsafe impl Sync for LogBuffer {}

impl LogBuffer {
    /// Create a brand-new log buffer file and map it (producer / conductor
    /// side).
    pub fn create<P: AsRef<Path>>(
        path: P,
        term_length: i32,
        initial_term_id: i32,
        mtu_length: i32,
        session_id: i32,
        stream_id: i32,
        correlation_id: i64
    ) -> Result<Self> {
        validate_term_length(term_length)?;

        let partitions_len = term_length as usize * 3;
        let metadata_offset = align_up(partitions_len, PAGE_SIZE);
        let file_size = metadata_offset + aligned_metadata_len();

        let file = OpenOptions::new().read(true).write(true).create(true).truncate(true).open(&path)?;
        file.set_len(file_size as u64)?;

        let mmap_ptr = map_shared(&file, file_size)?;

        unsafe {
            std::ptr::write_bytes(mmap_ptr, 0, file_size);

            let metadata = LogMetadata::from_ptr_mut(mmap_ptr.add(metadata_offset));
            metadata.header = LogMetadataHeader::new(
                initial_term_id,
                term_length,
                mtu_length,
                PAGE_SIZE as i32,
                correlation_id,
                session_id,
                stream_id
            );
            metadata.tail[0].set_relaxed(pack_tail(initial_term_id, 0));
            metadata.tail[1].set_relaxed(pack_tail(initial_term_id.wrapping_add(1), 0));
            metadata.tail[2].set_relaxed(pack_tail(initial_term_id.wrapping_add(2), 0));
            metadata.active_index.set_relaxed(0);
            metadata.active_term_count.set_relaxed(0);
            metadata.end_of_stream_position.set_relaxed(i64::MAX);
            metadata.is_connected.set_relaxed(0);
            metadata.active_transport_count.set_relaxed(0);

            libc::msync(mmap_ptr as *mut _, file_size, libc::MS_SYNC);
        }

        Ok(Self {
            mmap_ptr,
            mmap_len: file_size,
            term_length,
            bits_to_shift: number_of_bits_to_shift(term_length),
            metadata_offset,
            _file: file,
        })
    }

    /// Attach to an existing log buffer file (subscriber / additional
    /// publisher-client side).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let file_size = file.metadata()?.len() as usize;
        let mmap_ptr = map_shared(&file, file_size)?;

        let metadata_offset = file_size.checked_sub(aligned_metadata_len()).ok_or_else(||
            LogBufferError::invalid_file("file too small to contain a metadata region")
        )?;

        let header = unsafe { &LogMetadata::from_ptr(mmap_ptr.add(metadata_offset)).header };

        if header.magic != MAGIC {
            unsafe {
                libc::munmap(mmap_ptr as *mut _, file_size);
            }
            return Err(LogBufferError::invalid_file("bad magic"));
        }
        if header.version != VERSION {
            unsafe {
                libc::munmap(mmap_ptr as *mut _, file_size);
            }
            return Err(LogBufferError::invalid_file(format!("version mismatch: {}", header.version)));
        }
        let term_length = header.term_length;
        if metadata_offset < term_length as usize * 3 {
            unsafe {
                libc::munmap(mmap_ptr as *mut _, file_size);
            }
            return Err(LogBufferError::invalid_file("metadata offset inconsistent with term length"));
        }

        Ok(Self {
            mmap_ptr,
            mmap_len: file_size,
            term_length,
            bits_to_shift: number_of_bits_to_shift(term_length),
            metadata_offset,
            _file: file,
        })
    }

    #[inline]
    pub fn metadata(&self) -> &LogMetadata {
        unsafe { LogMetadata::from_ptr(self.mmap_ptr.add(self.metadata_offset)) }
    }

    #[inline]
    pub fn term_length(&self) -> i32 {
        self.term_length
    }

    #[inline]
    pub fn bits_to_shift(&self) -> u32 {
        self.bits_to_shift
    }

    #[inline]
    pub fn initial_term_id(&self) -> i32 {
        self.metadata().header.initial_term_id
    }

    #[inline]
    pub fn mtu_length(&self) -> i32 {
        self.metadata().header.mtu_length
    }

    #[inline]
    fn partition_ptr(&self, index: usize) -> *mut u8 {
        debug_assert!(index < 3);
        self.mmap_ptr.wrapping_add(index * self.term_length as usize)
    }

    /// Read-only view of a partition's bytes, for tests and the Image read
    /// path when it needs to hand a contiguous slice to a fragment handler.
    pub fn partition_bytes(&self, index: usize) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.partition_ptr(index), self.term_length as usize) }
    }

    /// Claim `length` bytes of message body. `exclusive` selects plain
    /// fetch-style tail advancement (single-writer sessions) versus a CAS
    /// loop (shared/multi-writer sessions), mirroring §4.L.
    pub fn claim(&self, length: i32, exclusive: bool) -> Result<FrameClaim<'_>> {
        let mtu = self.mtu_length();
        if length < 0 || HEADER_LENGTH + length > mtu {
            return Err(LogBufferError::MessageTooLarge { length, mtu });
        }

        let term_length = self.term_length;
        let required = align_frame_length(HEADER_LENGTH + length);

        loop {
            let meta = self.metadata();
            let index = meta.active_index.get_relaxed() as usize;
            let raw_tail = meta.tail[index].get();
            let (term_id, term_offset) = unpack_tail(raw_tail);

            let new_offset = term_offset as i64 + required as i64;
            if new_offset > term_length as i64 {
                let padded_tail = pack_tail(term_id, term_length);
                let won = if exclusive {
                    meta.tail[index].set_ordered(padded_tail);
                    true
                } else {
                    meta.tail[index].compare_and_set(raw_tail, padded_tail)
                };
                if won && term_offset < term_length {
                    self.write_padding(index, term_offset, term_length - term_offset, term_id);
                }
                if won {
                    self.rotate(index, term_id);
                }
                continue;
            }

            let new_tail = pack_tail(term_id, new_offset as i32);
            let claimed = if exclusive {
                meta.tail[index].set_ordered(new_tail);
                true
            } else {
                meta.tail[index].compare_and_set(raw_tail, new_tail)
            };
            if !claimed {
                continue;
            }

            return Ok(FrameClaim {
                buffer: self,
                partition_index: index,
                term_offset,
                term_id,
                data_capacity: length,
            });
        }
    }

    /// Advance the active partition by one, once its predecessor's
    /// remainder has been padded out. Guarded by a CAS on `active_index` so
    /// only one of the (possibly several) threads that raced to pad the
    /// tail also performs the rotation bookkeeping.
    fn rotate(&self, index: usize, old_term_id: i32) {
        let meta = self.metadata();
        let next_index = (index + 1) % 3;
        let next_next_index = (index + 2) % 3;
        if meta.active_index.compare_and_set(index as i64, next_index as i64) {
            meta.active_term_count.fetch_add_ordered(1);
            meta.tail[next_next_index].set_ordered(pack_tail(old_term_id.wrapping_add(2), 0));
        }
    }

    pub(crate) fn write_padding(&self, index: usize, offset: i32, len: i32, term_id: i32) {
        let header_ptr = self.partition_ptr(index).wrapping_add(offset as usize);
        unsafe {
            std::ptr::write_unaligned(header_ptr.add(4), CURRENT_VERSION);
            std::ptr::write_unaligned(header_ptr.add(5), UNFRAGMENTED);
            std::ptr::write_unaligned(header_ptr.add(6) as *mut u16, FrameType::Pad as u16);
            std::ptr::write_unaligned(header_ptr.add(8) as *mut i32, offset);
            std::ptr::write_unaligned(header_ptr.add(12) as *mut i32, 0);
            std::ptr::write_unaligned(header_ptr.add(16) as *mut i32, 0);
            std::ptr::write_unaligned(header_ptr.add(20) as *mut i32, term_id);
            std::ptr::write_unaligned(header_ptr.add(24) as *mut i64, 0);
        }
        let length_cell = unsafe { &*(header_ptr as *const AtomicI32) };
        length_cell.store(-len, Ordering::Release);
    }

    /// Inspect the frame at `(partition_index, offset)` without consuming
    /// it. Used by `Image::poll`, the conductor's unblocker, and tests.
    pub fn scan(&self, partition_index: usize, offset: i32) -> FrameScan {
        let header_ptr = self.partition_ptr(partition_index).wrapping_add(offset as usize);
        let length_cell = unsafe { &*(header_ptr as *const AtomicI32) };
        let frame_length = length_cell.load(Ordering::Acquire);

        if frame_length == 0 {
            return FrameScan::Pending;
        }
        if frame_length < 0 {
            return FrameScan::Padding { aligned_length: align_frame_length(-frame_length) };
        }

        let header: FrameHeader = unsafe { std::ptr::read_unaligned(header_ptr as *const FrameHeader) };
        FrameScan::Data {
            header,
            body_offset: offset + HEADER_LENGTH,
            body_length: frame_length - HEADER_LENGTH,
            aligned_length: align_frame_length(frame_length),
        }
    }

    pub fn body_slice(&self, partition_index: usize, body_offset: i32, body_length: i32) -> &[u8] {
        unsafe {
            std::slice::from_raw_parts(
                self.partition_ptr(partition_index).wrapping_add(body_offset as usize),
                body_length as usize
            )
        }
    }

    /// Zero an entire partition, sentinel-last, so a producer reusing it is
    /// never able to observe stale non-zero frame lengths. Callers must
    /// only invoke this once every subscriber has moved past the partition
    /// (see the conductor's `update_publisher_limit`, §4.P), since cleaning
    /// is not safe to race against an in-flight reader.
    pub fn clean_partition(&self, index: usize) {
        let ptr = self.partition_ptr(index);
        let len = self.term_length as usize;
        if len > 4 {
            unsafe {
                std::ptr::write_bytes(ptr.add(4), 0, len - 4);
            }
        }
        let first_length = unsafe { &*(ptr as *const AtomicI32) };
        first_length.store(0, Ordering::Release);
    }

    /// Pad over a claimed-but-never-committed frame so a stalled consumer
    /// can advance past it. Returns `true` if a padding frame was written.
    ///
    /// Only pads up to the next frame header a concurrent claimant already
    /// committed, not all the way to the current tail - the stuck claim is
    /// one frame's worth of the gap, and anything committed past it (by a
    /// different session racing the same partition) must survive untouched.
    pub fn unblock(&self, partition_index: usize, term_offset: i32) -> bool {
        let meta = self.metadata();
        let raw_tail = meta.tail[partition_index].get();
        let (term_id, tail_offset) = unpack_tail(raw_tail);
        if tail_offset <= term_offset {
            return false;
        }

        let length_at = |offset: i32| -> &AtomicI32 {
            let ptr = self.partition_ptr(partition_index).wrapping_add(offset as usize);
            unsafe { &*(ptr as *const AtomicI32) }
        };

        if length_at(term_offset).load(Ordering::Acquire) != 0 {
            return false;
        }

        let mut scan_offset = term_offset + FRAME_ALIGNMENT;
        while scan_offset < tail_offset && length_at(scan_offset).load(Ordering::Acquire) == 0 {
            scan_offset += FRAME_ALIGNMENT;
        }
        let gap = scan_offset.min(tail_offset) - term_offset;

        self.write_padding(partition_index, term_offset, gap, term_id);
        true
    }
}

fn map_shared(file: &File, len: usize) -> io::Result<*mut u8> {
    let ptr = unsafe {
        libc::mmap(std::ptr::null_mut(), len, libc::PROT_READ | libc::PROT_WRITE, libc::MAP_SHARED, file.as_raw_fd(), 0)
    };
    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    Ok(ptr as *mut u8)
}

impl Drop for LogBuffer {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.mmap_ptr as *mut _, self.mmap_len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("aeron-log-buffer-test-{name}-{}", std::process::id()))
    }

    #[test]
    fn create_then_open_sees_same_metadata() {
        let path = temp_path("create-open");
        let _ = std::fs::remove_file(&path);

        let created = LogBuffer::create(&path, 64 * 1024, 7, 1408, 42, 10, 999).unwrap();
        assert_eq!(created.term_length(), 64 * 1024);
        assert_eq!(created.initial_term_id(), 7);

        let opened = LogBuffer::open(&path).unwrap();
        assert_eq!(opened.term_length(), 64 * 1024);
        assert_eq!(opened.initial_term_id(), 7);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn claim_commit_scan_round_trip() {
        let path = temp_path("claim-commit");
        let _ = std::fs::remove_file(&path);
        let buf = LogBuffer::create(&path, 64 * 1024, 0, 1408, 1, 1, 1).unwrap();

        let mut claim = buf.claim(12, true).unwrap();
        claim.data_mut().copy_from_slice(b"hello world!");
        claim.commit(UNFRAGMENTED, 0);

        match buf.scan(0, 0) {
            FrameScan::Data { body_length, body_offset, .. } => {
                assert_eq!(body_length, 12);
                assert_eq!(buf.body_slice(0, body_offset, body_length), b"hello world!");
            }
            other => panic!("expected data frame, got {other:?}"),
        }

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn claim_that_would_cross_term_end_pads_and_rotates() {
        let path = temp_path("rotate");
        let _ = std::fs::remove_file(&path);
        let term_length = 64 * 1024;
        let buf = LogBuffer::create(&path, term_length, 0, 1408, 1, 1, 1).unwrap();

        // Fill the first partition almost to the end with 1 KiB messages.
        loop {
            let meta = buf.metadata();
            let (_, offset) = unpack_tail(meta.tail[0].get());
            if term_length - offset < 1056 {
                break;
            }
            let mut claim = buf.claim(1024, true).unwrap();
            claim.data_mut().fill(0xAB);
            claim.commit(UNFRAGMENTED, 0);
        }

        assert_eq!(buf.metadata().active_term_count.get(), 0);
        let mut claim = buf.claim(1024, true).unwrap();
        claim.data_mut().fill(0xCD);
        claim.commit(UNFRAGMENTED, 0);

        assert_eq!(buf.metadata().active_term_count.get(), 1);
        assert_eq!(buf.metadata().active_index.get(), 1);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn unblock_pads_over_a_never_committed_claim() {
        let path = temp_path("unblock");
        let _ = std::fs::remove_file(&path);
        let buf = LogBuffer::create(&path, 64 * 1024, 0, 1408, 1, 1, 1).unwrap();

        let claim = buf.claim(64, true).unwrap();
        let stuck_offset = claim.term_offset();
        drop(claim); // never committed - simulates a crashed producer

        assert!(matches!(buf.scan(0, stuck_offset), FrameScan::Pending));
        assert!(buf.unblock(0, stuck_offset));
        assert!(matches!(buf.scan(0, stuck_offset), FrameScan::Padding { .. }));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn unblock_does_not_clobber_a_frame_committed_past_the_stuck_slot() {
        let path = temp_path("unblock-past-commit");
        let _ = std::fs::remove_file(&path);
        let buf = LogBuffer::create(&path, 64 * 1024, 0, 1408, 1, 1, 1).unwrap();

        let stuck = buf.claim(64, true).unwrap();
        let stuck_offset = stuck.term_offset();
        std::mem::drop(stuck); // never committed

        let mut later = buf.claim(32, true).unwrap();
        let later_offset = later.term_offset();
        later.data_mut().fill(0xEE);
        later.commit(UNFRAGMENTED, 0);
        assert!(later_offset > stuck_offset);

        assert!(buf.unblock(0, stuck_offset));
        assert!(
            matches!(
                buf.scan(0, stuck_offset),
                FrameScan::Padding { aligned_length } if aligned_length == later_offset - stuck_offset
            )
        );

        match buf.scan(0, later_offset) {
            FrameScan::Data { body_length, body_offset, .. } => {
                assert_eq!(body_length, 32);
                assert_eq!(buf.body_slice(0, body_offset, body_length), [0xEEu8; 32]);
            }
            other => panic!("unblock must not clobber the frame committed past the stuck slot, got {other:?}"),
        }

        let _ = std::fs::remove_file(&path);
    }

    proptest::proptest! {
        #[test]
        fn claimed_body_is_read_back_unchanged_for_any_length_and_content(
            body in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..1024)
        ) {
            let path = temp_path(&format!("proptest-{}", body.len()));
            let _ = std::fs::remove_file(&path);
            let buf = LogBuffer::create(&path, 64 * 1024, 0, 1408, 1, 1, 1).unwrap();

            let mut claim = buf.claim(body.len() as i32, true).unwrap();
            claim.data_mut().copy_from_slice(&body);
            claim.commit(UNFRAGMENTED, 0);

            match buf.scan(0, 0) {
                FrameScan::Data { body_length, body_offset, .. } => {
                    proptest::prop_assert_eq!(body_length as usize, body.len());
                    proptest::prop_assert_eq!(buf.body_slice(0, body_offset, body_length), body.as_slice());
                }
                other => proptest::prop_assert!(false, "expected data frame, got {other:?}"),
            }

            let _ = std::fs::remove_file(&path);
        }
    }
}

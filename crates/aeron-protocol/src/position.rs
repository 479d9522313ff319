//! Position algebra: translating a monotone 64-bit stream position into
//! `(term_id, term_offset, partition_index)` and back.
//!
//! Mirrors the claim/commit bookkeeping the log buffer needs on every
//! publish and every poll, so it is kept dependency-free and allocation-free.

use crate::error::{ ProtocolError, Result };

/// Number of term partitions a log buffer rotates through.
pub const PARTITION_COUNT: usize = 3;

/// `term_length` must be a power of two within this range.
pub const MIN_TERM_LENGTH: i32 = 64 * 1024;
pub const MAX_TERM_LENGTH: i32 = 1024 * 1024 * 1024;

pub fn validate_term_length(term_length: i32) -> Result<()> {
    if term_length < MIN_TERM_LENGTH || term_length > MAX_TERM_LENGTH {
        return Err(
            ProtocolError::config(
                format!("term length {term_length} outside [{MIN_TERM_LENGTH}, {MAX_TERM_LENGTH}]")
            )
        );
    }
    if !term_length.is_power_of_two() {
        return Err(ProtocolError::config(format!("term length {term_length} is not a power of two")));
    }
    Ok(())
}

/// `log2(term_length)`, used to shift a position into term id / offset.
#[inline]
pub fn number_of_bits_to_shift(term_length: i32) -> u32 {
    debug_assert!(term_length.is_power_of_two());
    term_length.trailing_zeros()
}

#[inline]
pub fn term_id(initial_term_id: i32, position: i64, bits_to_shift: u32) -> i32 {
    initial_term_id.wrapping_add((position >> bits_to_shift) as i32)
}

#[inline]
pub fn term_offset(position: i64, term_length: i32) -> i32 {
    (position & ((term_length as i64) - 1)) as i32
}

#[inline]
pub fn partition_index(initial_term_id: i32, active_term_id: i32) -> usize {
    let term_count = active_term_id.wrapping_sub(initial_term_id);
    (term_count.rem_euclid(PARTITION_COUNT as i32)) as usize
}

/// Index of the partition that holds `position`.
#[inline]
pub fn index_by_position(position: i64, bits_to_shift: u32) -> usize {
    ((position >> bits_to_shift) as i64).rem_euclid(PARTITION_COUNT as i64) as usize
}

/// Reassemble a 64-bit position from a term id and offset within it.
#[inline]
pub fn compute_position(
    active_term_id: i32,
    term_offset: i32,
    bits_to_shift: u32,
    initial_term_id: i32
) -> i64 {
    let term_count = (active_term_id.wrapping_sub(initial_term_id)) as i64;
    (term_count << bits_to_shift) + (term_offset as i64)
}

/// The position at which `term_id` begins.
#[inline]
pub fn compute_term_begin_position(term_id: i32, bits_to_shift: u32, initial_term_id: i32) -> i64 {
    compute_position(term_id, 0, bits_to_shift, initial_term_id)
}

/// Pack `(term_id, term_offset)` into the 64-bit value stored as a
/// partition's raw tail counter (see `LogMetadata`).
#[inline]
pub fn pack_tail(term_id: i32, term_offset: i32) -> i64 {
    ((term_id as i64) << 32) | (term_offset as i64 & 0xFFFF_FFFF)
}

#[inline]
pub fn unpack_tail(raw: i64) -> (i32, i32) {
    ((raw >> 32) as i32, raw as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn round_trip_small() {
        let bits = number_of_bits_to_shift(65536);
        let initial = 7;
        let position = 65536 * 2 + 123;
        let tid = term_id(initial, position, bits);
        let off = term_offset(position, 65536);
        assert_eq!(tid, initial + 2);
        assert_eq!(off, 123);
        assert_eq!(compute_position(tid, off, bits, initial), position);
    }

    #[test]
    fn partition_rotates_through_three() {
        assert_eq!(partition_index(0, 0), 0);
        assert_eq!(partition_index(0, 1), 1);
        assert_eq!(partition_index(0, 2), 2);
        assert_eq!(partition_index(0, 3), 0);
    }

    #[test]
    fn tail_pack_round_trip() {
        let (t, o) = unpack_tail(pack_tail(42, 1000));
        assert_eq!(t, 42);
        assert_eq!(o, 1000);
    }

    proptest! {
        #[test]
        fn position_round_trips_for_any_term_length(
            term_length_shift in 16u32..30,
            initial_term_id in -1000i32..1000,
            term_delta in 0i32..64,
            offset in 0i32..(1i32 << 16)
        ) {
            let term_length = 1i32 << term_length_shift;
            let bits = number_of_bits_to_shift(term_length);
            let offset = offset % term_length;
            let active_term = initial_term_id.wrapping_add(term_delta);
            let position = compute_position(active_term, offset, bits, initial_term_id);
            prop_assert_eq!(term_id(initial_term_id, position, bits), active_term);
            prop_assert_eq!(term_offset(position, term_length), offset);
        }
    }
}

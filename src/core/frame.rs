//! Purpose: Define the 32-byte data frame header layout plus sizing/alignment helpers.
//! Exports: field offsets, frame type/flag constants, `align_frame_length`,
//! Exports: length/type/flag accessors used by the appender and claim handles.
//! Invariants: Header fields are little-endian on the wire; frame-length is the
//! Invariants: visibility gate and is only published with an ordered store.
//! Invariants: Every frame occupies `align(length, FRAME_ALIGNMENT)` bytes.
use crate::core::buffer::AtomicBuffer;

pub const HEADER_LENGTH: usize = 32;
pub const FRAME_ALIGNMENT: usize = 32;

pub const LENGTH_FIELD_OFFSET: usize = 0;
pub const VERSION_FIELD_OFFSET: usize = 4;
pub const FLAGS_FIELD_OFFSET: usize = 5;
pub const TYPE_FIELD_OFFSET: usize = 6;
pub const TERM_OFFSET_FIELD_OFFSET: usize = 8;
pub const SESSION_ID_FIELD_OFFSET: usize = 12;
pub const STREAM_ID_FIELD_OFFSET: usize = 16;
pub const TERM_ID_FIELD_OFFSET: usize = 20;
pub const RESERVED_VALUE_FIELD_OFFSET: usize = 24;

pub const HDR_TYPE_PAD: u16 = 0x00;
pub const HDR_TYPE_DATA: u16 = 0x01;

pub const BEGIN_FRAG: u8 = 0x80;
pub const END_FRAG: u8 = 0x40;
pub const UNFRAGMENTED: u8 = BEGIN_FRAG | END_FRAG;

pub const CURRENT_VERSION: u8 = 0;

/// Upper bound on a single message regardless of term length.
pub const MAX_MESSAGE_LENGTH_CAP: usize = 16 * 1024 * 1024;

/// Round `length` up to the frame alignment boundary.
pub fn align_frame_length(length: usize) -> usize {
    (length + (FRAME_ALIGNMENT - 1)) & !(FRAME_ALIGNMENT - 1)
}

pub fn compute_max_message_length(term_length: usize) -> usize {
    (term_length / 8).min(MAX_MESSAGE_LENGTH_CAP)
}

pub fn compute_max_payload_length(mtu_length: usize) -> usize {
    mtu_length - HEADER_LENGTH
}

/// Publish a frame, making header and payload visible to readers.
pub fn frame_length_ordered(term: &AtomicBuffer, frame_offset: usize, length: usize) {
    term.put_i32_ordered(frame_offset + LENGTH_FIELD_OFFSET, length as i32);
}

pub fn frame_length_volatile(term: &AtomicBuffer, frame_offset: usize) -> i32 {
    term.get_i32_volatile(frame_offset + LENGTH_FIELD_OFFSET)
}

pub fn frame_type(term: &AtomicBuffer, frame_offset: usize) -> u16 {
    term.get_u16(frame_offset + TYPE_FIELD_OFFSET)
}

pub fn set_frame_type(term: &AtomicBuffer, frame_offset: usize, frame_type: u16) {
    term.put_u16(frame_offset + TYPE_FIELD_OFFSET, frame_type);
}

pub fn is_padding(term: &AtomicBuffer, frame_offset: usize) -> bool {
    frame_type(term, frame_offset) == HDR_TYPE_PAD
}

pub fn frame_flags(term: &AtomicBuffer, frame_offset: usize) -> u8 {
    term.get_u8(frame_offset + FLAGS_FIELD_OFFSET)
}

pub fn set_frame_flags(term: &AtomicBuffer, frame_offset: usize, flags: u8) {
    term.put_u8(frame_offset + FLAGS_FIELD_OFFSET, flags);
}

pub fn frame_term_offset(term: &AtomicBuffer, frame_offset: usize) -> i32 {
    term.get_i32(frame_offset + TERM_OFFSET_FIELD_OFFSET)
}

pub fn frame_term_id(term: &AtomicBuffer, frame_offset: usize) -> i32 {
    term.get_i32(frame_offset + TERM_ID_FIELD_OFFSET)
}

pub fn frame_session_id(term: &AtomicBuffer, frame_offset: usize) -> i32 {
    term.get_i32(frame_offset + SESSION_ID_FIELD_OFFSET)
}

pub fn frame_stream_id(term: &AtomicBuffer, frame_offset: usize) -> i32 {
    term.get_i32(frame_offset + STREAM_ID_FIELD_OFFSET)
}

pub fn reserved_value(term: &AtomicBuffer, frame_offset: usize) -> i64 {
    term.get_i64(frame_offset + RESERVED_VALUE_FIELD_OFFSET)
}

pub fn set_reserved_value(term: &AtomicBuffer, frame_offset: usize, value: i64) {
    term.put_i64(frame_offset + RESERVED_VALUE_FIELD_OFFSET, value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::buffer::testing::AlignedStorage;

    #[test]
    fn alignment_rounds_up_to_32() {
        assert_eq!(align_frame_length(0), 0);
        assert_eq!(align_frame_length(1), 32);
        assert_eq!(align_frame_length(32), 32);
        assert_eq!(align_frame_length(33), 64);
        assert_eq!(align_frame_length(HEADER_LENGTH + 200), 232);
    }

    #[test]
    fn max_message_length_is_term_fraction_with_cap() {
        assert_eq!(compute_max_message_length(64 * 1024), 8 * 1024);
        assert_eq!(compute_max_message_length(1024 * 1024 * 1024), MAX_MESSAGE_LENGTH_CAP);
    }

    #[test]
    fn max_payload_excludes_header() {
        assert_eq!(compute_max_payload_length(4096), 4064);
    }

    #[test]
    fn header_field_accessors_round_trip() {
        let mut storage = AlignedStorage::<64>::new();
        let term = storage.buffer();

        set_frame_type(&term, 0, HDR_TYPE_DATA);
        set_frame_flags(&term, 0, UNFRAGMENTED);
        set_reserved_value(&term, 0, 0xDEAD_BEEF_CAFEi64);

        assert_eq!(frame_type(&term, 0), HDR_TYPE_DATA);
        assert!(!is_padding(&term, 0));
        assert_eq!(frame_flags(&term, 0), UNFRAGMENTED);
        assert_eq!(reserved_value(&term, 0), 0xDEAD_BEEF_CAFEi64);

        set_frame_type(&term, 0, HDR_TYPE_PAD);
        assert!(is_padding(&term, 0));
    }

    #[test]
    fn reserved_value_is_little_endian_at_offset_24() {
        let mut storage = AlignedStorage::<64>::new();
        let term = storage.buffer();

        set_reserved_value(&term, 0, 0x0102_0304_0506_0708);
        assert_eq!(
            term.bytes_at(RESERVED_VALUE_FIELD_OFFSET, 8),
            [0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]
        );
    }

    #[test]
    fn frame_length_publish_is_visible() {
        let mut storage = AlignedStorage::<64>::new();
        let term = storage.buffer();

        assert_eq!(frame_length_volatile(&term, 0), 0);
        frame_length_ordered(&term, 0, 48);
        assert_eq!(frame_length_volatile(&term, 0), 48);
    }
}

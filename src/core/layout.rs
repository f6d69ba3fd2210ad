//! Purpose: Define the shared log layout, tail-counter codec, and position arithmetic.
//! Exports: partition/metadata constants, `pack_tail`/`term_id`/`term_offset`,
//! Exports: `compute_position` and inverses, `LogMetaData`.
//! Role: Layout contract between publishers and the driver; no I/O here.
//! Invariants: Term length is a power of two in [TERM_MIN_LENGTH, TERM_MAX_LENGTH].
//! Invariants: Tail counters and the active partition index are the only
//! Invariants: publisher-written metadata fields; everything else is immutable
//! Invariants: after creation or owned by the driver.
use crate::core::buffer::AtomicBuffer;
use crate::core::error::{Error, ErrorKind};
use crate::core::frame;

pub const PARTITION_COUNT: usize = 3;

pub const TERM_MIN_LENGTH: usize = 64 * 1024;
pub const TERM_MAX_LENGTH: usize = 1024 * 1024 * 1024;

pub const CACHE_LINE_LENGTH: usize = 64;

/// The metadata section sits after the three term partitions.
pub const LOG_META_DATA_SECTION_INDEX: usize = PARTITION_COUNT;

/*
 * Log metadata layout (offsets within the metadata section):
 *
 *  +----------------------------+ 0
 *  |   Tail Counter 0..2 (8×3)  |
 *  +----------------------------+ 24
 *  |   Active Partition Index   |
 *  +----------------------------+ 64
 *  |   Time of Last SM (8)      |
 *  +----------------------------+ 72
 *  |   Is Connected (4)         |
 *  +----------------------------+ 128
 *  |   Initial Term Id (4)      |
 *  |   Term Length (4)          |
 *  |   MTU Length (4)           |
 *  +----------------------------+ 192
 *  |   Default Frame Header     |
 *  +----------------------------+ 240 (section length 256)
 */
pub const TERM_TAIL_COUNTERS_OFFSET: usize = 0;
pub const LOG_ACTIVE_PARTITION_INDEX_OFFSET: usize = 24;
pub const LOG_TIME_OF_LAST_SM_OFFSET: usize = CACHE_LINE_LENGTH;
pub const LOG_IS_CONNECTED_OFFSET: usize = CACHE_LINE_LENGTH + 8;
pub const LOG_INITIAL_TERM_ID_OFFSET: usize = 2 * CACHE_LINE_LENGTH;
pub const LOG_TERM_LENGTH_OFFSET: usize = 2 * CACHE_LINE_LENGTH + 4;
pub const LOG_MTU_LENGTH_OFFSET: usize = 2 * CACHE_LINE_LENGTH + 8;
pub const LOG_DEFAULT_FRAME_HEADER_OFFSET: usize = 3 * CACHE_LINE_LENGTH;
pub const LOG_DEFAULT_FRAME_HEADER_MAX_LENGTH: usize = 48;
pub const LOG_META_DATA_LENGTH: usize = 4 * CACHE_LINE_LENGTH;

pub fn compute_log_length(term_length: usize) -> usize {
    (term_length * PARTITION_COUNT) + LOG_META_DATA_LENGTH
}

pub fn check_term_length(term_length: usize) -> Result<(), Error> {
    if term_length < TERM_MIN_LENGTH || term_length > TERM_MAX_LENGTH {
        return Err(Error::new(ErrorKind::Usage).with_message(format!(
            "term length {term_length} outside [{TERM_MIN_LENGTH}, {TERM_MAX_LENGTH}]"
        )));
    }
    if !term_length.is_power_of_two() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("term length {term_length} not a power of two")));
    }
    Ok(())
}

pub fn check_mtu_length(mtu_length: usize, term_length: usize) -> Result<(), Error> {
    if mtu_length % frame::FRAME_ALIGNMENT != 0 {
        return Err(Error::new(ErrorKind::Usage).with_message(format!(
            "mtu length {mtu_length} not a multiple of {}",
            frame::FRAME_ALIGNMENT
        )));
    }
    if mtu_length <= frame::HEADER_LENGTH || mtu_length > term_length {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("mtu length {mtu_length} outside (header, term length]")));
    }
    Ok(())
}

pub fn position_bits_to_shift(term_length: usize) -> u32 {
    term_length.trailing_zeros()
}

/// Pack `(term_id, term_offset)` into a raw tail counter value.
pub fn pack_tail(term_id: i32, term_offset: i32) -> i64 {
    ((term_id as i64) << 32) | (term_offset as u32 as i64)
}

pub fn term_id(raw_tail: i64) -> i32 {
    (raw_tail >> 32) as i32
}

/// Tail offset within the term, clamped to the term length once tripped.
pub fn term_offset(raw_tail: i64, term_length: usize) -> i32 {
    let tail = raw_tail & 0xFFFF_FFFF;
    tail.min(term_length as i64) as i32
}

pub fn index_by_term(initial_term_id: i32, active_term_id: i32) -> usize {
    (active_term_id.wrapping_sub(initial_term_id) as u32 as usize) % PARTITION_COUNT
}

pub fn next_partition_index(current_index: usize) -> usize {
    (current_index + 1) % PARTITION_COUNT
}

pub fn compute_position(
    active_term_id: i32,
    term_offset: i32,
    position_bits_to_shift: u32,
    initial_term_id: i32,
) -> i64 {
    compute_term_begin_position(active_term_id, position_bits_to_shift, initial_term_id)
        + term_offset as i64
}

pub fn compute_term_begin_position(
    active_term_id: i32,
    position_bits_to_shift: u32,
    initial_term_id: i32,
) -> i64 {
    // Wrapping subtraction keeps the term count positive when term ids wrap
    // past i32::MAX on the way to the maximum position.
    let term_count = active_term_id.wrapping_sub(initial_term_id) as i64;
    term_count << position_bits_to_shift
}

pub fn compute_term_id_from_position(
    position: i64,
    position_bits_to_shift: u32,
    initial_term_id: i32,
) -> i32 {
    ((position >> position_bits_to_shift) + initial_term_id as i64) as i32
}

pub fn compute_term_offset_from_position(position: i64, position_bits_to_shift: u32) -> i32 {
    let mask = (1i64 << position_bits_to_shift) - 1;
    (position & mask) as i32
}

/// Typed accessors over the metadata section shared with the driver.
#[derive(Clone, Copy, Debug)]
pub struct LogMetaData {
    buffer: AtomicBuffer,
}

impl LogMetaData {
    pub fn new(buffer: AtomicBuffer) -> Result<Self, Error> {
        if buffer.capacity() < LOG_META_DATA_LENGTH {
            return Err(Error::new(ErrorKind::Corrupt).with_message(format!(
                "metadata section too small: {} < {LOG_META_DATA_LENGTH}",
                buffer.capacity()
            )));
        }
        Ok(Self { buffer })
    }

    pub fn initial_term_id(&self) -> i32 {
        self.buffer.get_i32(LOG_INITIAL_TERM_ID_OFFSET)
    }

    pub fn set_initial_term_id(&self, value: i32) {
        self.buffer.put_i32(LOG_INITIAL_TERM_ID_OFFSET, value);
    }

    pub fn term_length(&self) -> usize {
        self.buffer.get_i32(LOG_TERM_LENGTH_OFFSET) as usize
    }

    pub fn set_term_length(&self, value: usize) {
        self.buffer.put_i32(LOG_TERM_LENGTH_OFFSET, value as i32);
    }

    pub fn mtu_length(&self) -> usize {
        self.buffer.get_i32(LOG_MTU_LENGTH_OFFSET) as usize
    }

    pub fn set_mtu_length(&self, value: usize) {
        self.buffer.put_i32(LOG_MTU_LENGTH_OFFSET, value as i32);
    }

    pub fn active_partition_index_volatile(&self) -> usize {
        self.buffer.get_i32_volatile(LOG_ACTIVE_PARTITION_INDEX_OFFSET) as usize
    }

    pub fn set_active_partition_index_ordered(&self, index: usize) {
        self.buffer
            .put_i32_ordered(LOG_ACTIVE_PARTITION_INDEX_OFFSET, index as i32);
    }

    /// Publish the rotated partition index, but only over the index this
    /// rotator observed so a stale rotator can never move the log backwards.
    pub fn cas_active_partition_index(&self, expected: usize, update: usize) -> bool {
        self.buffer.compare_and_set_i32(
            LOG_ACTIVE_PARTITION_INDEX_OFFSET,
            expected as i32,
            update as i32,
        )
    }

    pub fn raw_tail_volatile(&self, partition_index: usize) -> i64 {
        self.buffer
            .get_i64_volatile(tail_counter_offset(partition_index))
    }

    /// Reserve `aligned_length` bytes; returns the raw tail before the add.
    pub fn get_and_add_raw_tail(&self, partition_index: usize, aligned_length: usize) -> i64 {
        self.buffer
            .get_and_add_i64(tail_counter_offset(partition_index), aligned_length as i64)
    }

    pub fn cas_raw_tail(&self, partition_index: usize, expected: i64, update: i64) -> bool {
        self.buffer
            .compare_and_set_i64(tail_counter_offset(partition_index), expected, update)
    }

    /// Setup-time store, before the log is shared.
    pub fn set_raw_tail(&self, partition_index: usize, raw_tail: i64) {
        self.buffer.put_i64(tail_counter_offset(partition_index), raw_tail);
    }

    pub fn time_of_last_status_message_volatile(&self) -> i64 {
        self.buffer.get_i64_volatile(LOG_TIME_OF_LAST_SM_OFFSET)
    }

    pub fn set_time_of_last_status_message_ordered(&self, time_ms: i64) {
        self.buffer.put_i64_ordered(LOG_TIME_OF_LAST_SM_OFFSET, time_ms);
    }

    pub fn is_connected_volatile(&self) -> bool {
        self.buffer.get_i32_volatile(LOG_IS_CONNECTED_OFFSET) == 1
    }

    pub fn set_is_connected_ordered(&self, is_connected: bool) {
        self.buffer
            .put_i32_ordered(LOG_IS_CONNECTED_OFFSET, i32::from(is_connected));
    }

    pub fn default_frame_header(&self) -> AtomicBuffer {
        self.buffer
            .view(LOG_DEFAULT_FRAME_HEADER_OFFSET, frame::HEADER_LENGTH)
    }
}

fn tail_counter_offset(partition_index: usize) -> usize {
    debug_assert!(partition_index < PARTITION_COUNT);
    TERM_TAIL_COUNTERS_OFFSET + (partition_index * 8)
}

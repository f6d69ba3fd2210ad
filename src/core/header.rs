//! Purpose: Stamp per-frame headers from the driver-supplied default template.
//! Exports: `HeaderWriter`.
//! Role: Shared by the appender's offer, claim, and pad paths.
//! Invariants: The frame-length field stays zero after a stamp; publishing it
//! Invariants: is the caller's job and carries the release barrier.
use crate::core::buffer::AtomicBuffer;
use crate::core::frame;

/// Caches the default frame header template so the hot path is a fixed copy
/// plus two field overwrites.
#[derive(Clone, Copy, Debug)]
pub struct HeaderWriter {
    template: [u8; frame::HEADER_LENGTH],
}

impl HeaderWriter {
    pub fn new(default_header: &AtomicBuffer) -> Self {
        let mut template = [0u8; frame::HEADER_LENGTH];
        default_header.get_bytes(0, &mut template);
        // The template travels with length zero so a stamped frame stays
        // invisible until explicitly published.
        template[frame::LENGTH_FIELD_OFFSET..frame::LENGTH_FIELD_OFFSET + 4].fill(0);
        Self { template }
    }

    /// Stamp a header at `term_offset`, overwriting term-offset and term-id.
    pub fn write(&self, term: &AtomicBuffer, term_offset: usize, term_id: i32) {
        term.put_bytes(term_offset, &self.template);
        term.put_i32(
            term_offset + frame::TERM_OFFSET_FIELD_OFFSET,
            term_offset as i32,
        );
        term.put_i32(term_offset + frame::TERM_ID_FIELD_OFFSET, term_id);
    }
}

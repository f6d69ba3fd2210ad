//! Purpose: Reserve space in one term partition and publish frames or padding.
//! Exports: `TermAppender`, `AppendResult`, `ReservedValueSupplier`.
//! Role: The multi-producer append path; producers are linearised by the
//! Role: fetch-add on this partition's tail counter.
//! Invariants: One tail reservation per call, fragmented or not.
//! Invariants: A reservation crossing the term end becomes a pad frame when the
//! Invariants: claim point is still inside the term, otherwise the call fails
//! Invariants: and the publication rotates.
use crate::core::buffer::AtomicBuffer;
use crate::core::claim::{BufferClaim, ClaimMode};
use crate::core::frame;
use crate::core::header::HeaderWriter;
use crate::core::layout::{self, LogMetaData};

/// Computed from `(term_buffer, term_offset, frame_length)` immediately before
/// each frame-length publish.
pub type ReservedValueSupplier<'a> = &'a dyn Fn(&AtomicBuffer, i32, usize) -> i64;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AppendResult {
    /// Reservation landed; `resulting_offset` is the tail after this frame.
    Appended { term_id: i32, resulting_offset: i32 },
    /// This producer hit the term end and published the pad; rotate and retry.
    Tripped { term_id: i32 },
    /// Another producer already tripped the term; rotate and retry.
    Failed { term_id: i32 },
}

pub struct TermAppender {
    term: AtomicBuffer,
    meta: LogMetaData,
    partition_index: usize,
}

impl TermAppender {
    pub fn new(term: AtomicBuffer, meta: LogMetaData, partition_index: usize) -> Self {
        Self {
            term,
            meta,
            partition_index,
        }
    }

    pub fn raw_tail_volatile(&self) -> i64 {
        self.meta.raw_tail_volatile(self.partition_index)
    }

    /// Reserve a frame and hand it to `claim` with the length unpublished.
    pub fn claim(
        &self,
        header: &HeaderWriter,
        length: usize,
        claim: &mut BufferClaim,
        mode: ClaimMode,
    ) -> AppendResult {
        let frame_length = frame::HEADER_LENGTH + length;
        let aligned_length = frame::align_frame_length(frame_length);
        let (term_id, term_offset) = self.reserve(aligned_length);
        let term_length = self.term.capacity();

        if term_offset + aligned_length as i64 > term_length as i64 {
            return self.handle_end_of_log(header, term_offset, term_id);
        }

        let offset = term_offset as usize;
        header.write(&self.term, offset, term_id);
        claim.wrap(&self.term, offset, frame_length, mode);

        AppendResult::Appended {
            term_id,
            resulting_offset: (term_offset + aligned_length as i64) as i32,
        }
    }

    /// Copy `message` in as a single frame and publish it.
    pub fn append_unfragmented(
        &self,
        header: &HeaderWriter,
        message: &[u8],
        reserved_value_supplier: Option<ReservedValueSupplier<'_>>,
    ) -> AppendResult {
        let frame_length = frame::HEADER_LENGTH + message.len();
        let aligned_length = frame::align_frame_length(frame_length);
        let (term_id, term_offset) = self.reserve(aligned_length);
        let term_length = self.term.capacity();

        if term_offset + aligned_length as i64 > term_length as i64 {
            return self.handle_end_of_log(header, term_offset, term_id);
        }

        let offset = term_offset as usize;
        header.write(&self.term, offset, term_id);
        self.term.put_bytes(offset + frame::HEADER_LENGTH, message);

        if let Some(supplier) = reserved_value_supplier {
            let value = supplier(&self.term, offset as i32, frame_length);
            frame::set_reserved_value(&self.term, offset, value);
        }
        frame::frame_length_ordered(&self.term, offset, frame_length);

        AppendResult::Appended {
            term_id,
            resulting_offset: (term_offset + aligned_length as i64) as i32,
        }
    }

    /// Copy `message` in as a BEGIN / MID* / END chain. One tail reservation
    /// covers the whole chain, so all fragments land in this term or none do.
    pub fn append_fragmented(
        &self,
        header: &HeaderWriter,
        message: &[u8],
        max_payload_length: usize,
        reserved_value_supplier: Option<ReservedValueSupplier<'_>>,
    ) -> AppendResult {
        let num_max_payloads = message.len() / max_payload_length;
        let remaining_payload = message.len() % max_payload_length;
        let last_frame_length = if remaining_payload > 0 {
            frame::align_frame_length(remaining_payload + frame::HEADER_LENGTH)
        } else {
            0
        };
        let required_length =
            num_max_payloads * (max_payload_length + frame::HEADER_LENGTH) + last_frame_length;

        let (term_id, term_offset) = self.reserve(required_length);
        let term_length = self.term.capacity();

        if term_offset + required_length as i64 > term_length as i64 {
            return self.handle_end_of_log(header, term_offset, term_id);
        }

        let mut flags = frame::BEGIN_FRAG;
        let mut remaining = message.len();
        let mut offset = term_offset as usize;

        loop {
            let bytes_to_write = remaining.min(max_payload_length);
            let frame_length = bytes_to_write + frame::HEADER_LENGTH;
            let aligned_length = frame::align_frame_length(frame_length);

            header.write(&self.term, offset, term_id);
            let written = message.len() - remaining;
            self.term.put_bytes(
                offset + frame::HEADER_LENGTH,
                &message[written..written + bytes_to_write],
            );

            if remaining <= max_payload_length {
                flags |= frame::END_FRAG;
            }
            frame::set_frame_flags(&self.term, offset, flags);

            if let Some(supplier) = reserved_value_supplier {
                let value = supplier(&self.term, offset as i32, frame_length);
                frame::set_reserved_value(&self.term, offset, value);
            }
            frame::frame_length_ordered(&self.term, offset, frame_length);

            flags = 0;
            offset += aligned_length;
            remaining -= bytes_to_write;
            if remaining == 0 {
                break;
            }
        }

        AppendResult::Appended {
            term_id,
            resulting_offset: (term_offset + required_length as i64) as i32,
        }
    }

    fn reserve(&self, aligned_length: usize) -> (i32, i64) {
        let raw_tail = self
            .meta
            .get_and_add_raw_tail(self.partition_index, aligned_length);
        (layout::term_id(raw_tail), raw_tail & 0xFFFF_FFFF)
    }

    fn handle_end_of_log(
        &self,
        header: &HeaderWriter,
        term_offset: i64,
        term_id: i32,
    ) -> AppendResult {
        let term_length = self.term.capacity();
        if term_offset < term_length as i64 {
            // Offsets and the term length are both frame-aligned, so at least
            // one header's worth of space remains for the pad.
            let offset = term_offset as usize;
            let padding_length = term_length - offset;
            header.write(&self.term, offset, term_id);
            frame::set_frame_type(&self.term, offset, frame::HDR_TYPE_PAD);
            frame::frame_length_ordered(&self.term, offset, padding_length);

            AppendResult::Tripped { term_id }
        } else {
            AppendResult::Failed { term_id }
        }
    }
}

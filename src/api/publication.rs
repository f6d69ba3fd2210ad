//! Purpose: Publisher-facing handle over one stream's log: offer, claim, rotate.
//! Exports: `Publication`, `LogInfo`, the sentinel return codes.
//! Role: Picks the active partition, enforces the publication limit, and maps
//! Role: appender outcomes onto the stable sentinel contract.
//! Invariants: Safe for any number of concurrent producer threads; the only
//! Invariants: cross-thread state is in the shared log and the closed flag.
//! Invariants: Sentinels are dynamic states; precondition violations surface
//! Invariants: as `Usage` errors and never as sentinels.
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use crate::api::conductor::{ClientCommand, ConductorHandle};
use crate::core::appender::{AppendResult, ReservedValueSupplier, TermAppender};
use crate::core::buffer::AtomicBuffer;
use crate::core::claim::{BufferClaim, ClaimMode};
use crate::core::counters::ReadablePosition;
use crate::core::error::{Error, ErrorKind};
use crate::core::frame;
use crate::core::header::HeaderWriter;
use crate::core::layout::{self, LogMetaData};
use crate::core::log::LogBuffers;

/// The driver has not reported a connected subscriber.
pub const NOT_CONNECTED: i64 = -1;
/// The offered position has reached the publication limit; retry later.
pub const BACK_PRESSURED: i64 = -2;
/// An administrative action (term rotation) occurred; retry immediately.
pub const ADMIN_ACTION: i64 = -3;
/// The publication is closed and will accept nothing further.
pub const PUBLICATION_CLOSED: i64 = -4;
/// The stream has consumed the maximum position it can ever reach.
pub const MAX_POSITION_EXCEEDED: i64 = -5;

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct LogInfo {
    pub channel: String,
    pub registration_id: i64,
    pub stream_id: i32,
    pub session_id: i32,
    pub initial_term_id: i32,
    pub term_length: usize,
    pub mtu_length: usize,
}

pub struct Publication {
    conductor: ConductorHandle,
    channel: String,
    registration_id: i64,
    stream_id: i32,
    session_id: i32,
    initial_term_id: i32,
    position_bits_to_shift: u32,
    max_message_length: usize,
    max_payload_length: usize,
    max_possible_position: i64,
    publication_limit: ReadablePosition,
    header_writer: HeaderWriter,
    meta: LogMetaData,
    appenders: [TermAppender; layout::PARTITION_COUNT],
    is_closed: AtomicBool,
    // Field order keeps the mapping alive until every view above is gone.
    log: LogBuffers,
}

impl Publication {
    pub fn new(
        conductor: ConductorHandle,
        channel: impl Into<String>,
        registration_id: i64,
        publication_limit: ReadablePosition,
        log: LogBuffers,
    ) -> Self {
        let meta = log.meta_data();
        let template = meta.default_frame_header();
        let term_length = log.term_length();

        let appenders =
            std::array::from_fn(|index| TermAppender::new(log.term_buffer(index), meta, index));

        Self {
            conductor,
            channel: channel.into(),
            registration_id,
            stream_id: template.get_i32(frame::STREAM_ID_FIELD_OFFSET),
            session_id: template.get_i32(frame::SESSION_ID_FIELD_OFFSET),
            initial_term_id: meta.initial_term_id(),
            position_bits_to_shift: layout::position_bits_to_shift(term_length),
            max_message_length: frame::compute_max_message_length(term_length),
            max_payload_length: frame::compute_max_payload_length(meta.mtu_length()),
            max_possible_position: (term_length as i64) << 31,
            publication_limit,
            header_writer: HeaderWriter::new(&template),
            meta,
            appenders,
            is_closed: AtomicBool::new(false),
            log,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn registration_id(&self) -> i64 {
        self.registration_id
    }

    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }

    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    pub fn initial_term_id(&self) -> i32 {
        self.initial_term_id
    }

    pub fn term_buffer_length(&self) -> usize {
        self.log.term_length()
    }

    pub fn max_message_length(&self) -> usize {
        self.max_message_length
    }

    pub fn max_payload_length(&self) -> usize {
        self.max_payload_length
    }

    pub fn info(&self) -> LogInfo {
        LogInfo {
            channel: self.channel.clone(),
            registration_id: self.registration_id,
            stream_id: self.stream_id,
            session_id: self.session_id,
            initial_term_id: self.initial_term_id,
            term_length: self.log.term_length(),
            mtu_length: self.meta.mtu_length(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        self.is_closed.store(true, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.conductor
            .is_publication_connected(self.meta.time_of_last_status_message_volatile())
    }

    pub fn publication_limit(&self) -> i64 {
        self.publication_limit.get_volatile()
    }

    /// Ask the driver to add a destination for this publication's stream.
    pub fn add_destination(&self, endpoint: impl Into<String>) -> Result<(), Error> {
        self.destination_command(endpoint.into(), true)
    }

    /// Ask the driver to remove a destination for this publication's stream.
    pub fn remove_destination(&self, endpoint: impl Into<String>) -> Result<(), Error> {
        self.destination_command(endpoint.into(), false)
    }

    fn destination_command(&self, endpoint: String, add: bool) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("destination change on a closed publication"));
        }
        let registration_id = self.registration_id;
        let command = if add {
            ClientCommand::AddDestination {
                registration_id,
                endpoint,
            }
        } else {
            ClientCommand::RemoveDestination {
                registration_id,
                endpoint,
            }
        };
        self.conductor.offer_command(command)
    }

    /// Current stream position, or `PUBLICATION_CLOSED`.
    pub fn position(&self) -> i64 {
        if self.is_closed() {
            return PUBLICATION_CLOSED;
        }
        let partition_index = self.meta.active_partition_index_volatile();
        let raw_tail = self.appenders[partition_index].raw_tail_volatile();
        let term_id = layout::term_id(raw_tail);
        let term_offset = layout::term_offset(raw_tail, self.log.term_length());
        layout::compute_position(
            term_id,
            term_offset,
            self.position_bits_to_shift,
            self.initial_term_id,
        )
    }

    /// Copy `message` into the stream. Returns the new position or a sentinel.
    pub fn offer(&self, message: &[u8]) -> Result<i64, Error> {
        self.offer_inner(message, None)
    }

    /// As `offer`, with a reserved value computed just before publication.
    pub fn offer_with_reserved<F>(&self, message: &[u8], supplier: F) -> Result<i64, Error>
    where
        F: Fn(&AtomicBuffer, i32, usize) -> i64,
    {
        self.offer_inner(message, Some(&supplier))
    }

    /// Reserve a frame for zero-copy writing. On success the claim must see
    /// exactly one commit or abort.
    pub fn try_claim(&self, length: usize, claim: &mut BufferClaim) -> Result<i64, Error> {
        self.try_claim_with_mode(length, claim, ClaimMode::Standard)
    }

    /// Claim flavour for in-process system publishers that stamp their own
    /// flags and frame type.
    pub fn try_claim_privileged(
        &self,
        length: usize,
        claim: &mut BufferClaim,
    ) -> Result<i64, Error> {
        self.try_claim_with_mode(length, claim, ClaimMode::Privileged)
    }

    fn offer_inner(
        &self,
        message: &[u8],
        supplier: Option<ReservedValueSupplier<'_>>,
    ) -> Result<i64, Error> {
        if message.len() > self.max_message_length {
            return Err(Error::new(ErrorKind::Usage).with_message(format!(
                "message length {} exceeds max message length {}",
                message.len(),
                self.max_message_length
            )));
        }

        Ok(self.append(|appender| {
            if message.len() <= self.max_payload_length {
                appender.append_unfragmented(&self.header_writer, message, supplier)
            } else {
                appender.append_fragmented(
                    &self.header_writer,
                    message,
                    self.max_payload_length,
                    supplier,
                )
            }
        }))
    }

    fn try_claim_with_mode(
        &self,
        length: usize,
        claim: &mut BufferClaim,
        mode: ClaimMode,
    ) -> Result<i64, Error> {
        if length > self.max_payload_length {
            return Err(Error::new(ErrorKind::Usage).with_message(format!(
                "claim length {length} exceeds max payload length {}",
                self.max_payload_length
            )));
        }

        Ok(self.append(|appender| appender.claim(&self.header_writer, length, claim, mode)))
    }

    fn append(&self, action: impl FnOnce(&TermAppender) -> AppendResult) -> i64 {
        if self.is_closed() {
            return PUBLICATION_CLOSED;
        }

        let limit = self.publication_limit.get_volatile();
        let partition_index = self.meta.active_partition_index_volatile();
        let appender = &self.appenders[partition_index];
        let raw_tail = appender.raw_tail_volatile();
        let term_id = layout::term_id(raw_tail);
        let term_offset = layout::term_offset(raw_tail, self.log.term_length());
        let position = layout::compute_position(
            term_id,
            term_offset,
            self.position_bits_to_shift,
            self.initial_term_id,
        );

        if position >= self.max_possible_position {
            return MAX_POSITION_EXCEEDED;
        }
        if position >= limit {
            return self.back_pressure_status();
        }

        match action(appender) {
            AppendResult::Appended {
                term_id,
                resulting_offset,
            } => layout::compute_position(
                term_id,
                resulting_offset,
                self.position_bits_to_shift,
                self.initial_term_id,
            ),
            AppendResult::Tripped { term_id } | AppendResult::Failed { term_id } => {
                self.rotate_term(partition_index, term_id);
                ADMIN_ACTION
            }
        }
    }

    /// Move the log to the next term. Losing either CAS is benign: some other
    /// producer completed the same transition.
    fn rotate_term(&self, current_index: usize, current_term_id: i32) {
        let next_index = layout::next_partition_index(current_index);
        let next_term_id = current_term_id.wrapping_add(1);
        let observed = self.meta.raw_tail_volatile(next_index);

        if layout::term_id(observed) != next_term_id {
            self.meta
                .cas_raw_tail(next_index, observed, layout::pack_tail(next_term_id, 0));
        }
        self.meta.cas_active_partition_index(current_index, next_index);
    }

    fn back_pressure_status(&self) -> i64 {
        if self.meta.is_connected_volatile() {
            BACK_PRESSURED
        } else {
            NOT_CONNECTED
        }
    }
}

impl Drop for Publication {
    fn drop(&mut self) {
        self.close();
        self.conductor.release_publication(self.registration_id);
    }
}

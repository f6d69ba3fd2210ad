//! Purpose: Define the stable public Rust API boundary for termlog.
//! Exports: Publication surface, claim handles, conductor seam, log lifecycle.
//! Role: Public, additive-only surface; the `core` modules behind it carry no
//! Role: stability promise.
//! Invariants: Sentinel values re-exported here are a stable integer contract.

mod conductor;
mod publication;

pub use crate::core::appender::{AppendResult, ReservedValueSupplier};
pub use crate::core::buffer::AtomicBuffer;
pub use crate::core::claim::{BufferClaim, ClaimMode};
pub use crate::core::counters::{CountersFile, OwnedPosition, ReadablePosition, COUNTER_LENGTH};
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::log::{LogBuffers, LogOptions};
pub use conductor::{ClientCommand, Conductor, ConductorHandle, COMMAND_QUEUE_CAPACITY};
pub use publication::{
    LogInfo, Publication, ADMIN_ACTION, BACK_PRESSURED, MAX_POSITION_EXCEEDED, NOT_CONNECTED,
    PUBLICATION_CLOSED,
};

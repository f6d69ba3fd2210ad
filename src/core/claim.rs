//! Purpose: Zero-copy reservation handle over a claimed term region.
//! Exports: `BufferClaim`, `ClaimMode`.
//! Role: Returned by `try_claim`; the caller fills the payload then commits or aborts.
//! Invariants: Exactly one of commit/abort consumes a wrapped claim; both are
//! Invariants: `Usage` faults on an unwrapped or already consumed handle.
//! Invariants: Until the claim is consumed the frame-length slot stays zero and
//! Invariants: readers treat the region as not yet visible.
use crate::core::buffer::AtomicBuffer;
use crate::core::error::{Error, ErrorKind};
use crate::core::frame;
#[cfg(debug_assertions)]
use crate::notice;

/// Standard claims may only touch payload and reserved-value; privileged
/// claims (driver-internal publishers) may also rewrite flags and frame type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClaimMode {
    Standard,
    Privileged,
}

#[derive(Debug)]
struct ClaimedFrame {
    buffer: AtomicBuffer,
    privileged: bool,
}

#[derive(Debug, Default)]
pub struct BufferClaim {
    frame: Option<ClaimedFrame>,
}

impl BufferClaim {
    pub fn new() -> Self {
        Self { frame: None }
    }

    /// Bind this handle to a stamped frame region spanning header + payload.
    #[doc(hidden)]
    pub fn wrap(
        &mut self,
        term: &AtomicBuffer,
        frame_offset: usize,
        frame_length: usize,
        mode: ClaimMode,
    ) {
        self.frame = Some(ClaimedFrame {
            buffer: term.view(frame_offset, frame_length),
            privileged: mode == ClaimMode::Privileged,
        });
    }

    pub fn is_claimed(&self) -> bool {
        self.frame.is_some()
    }

    /// Payload offset within the claimed frame.
    pub fn offset(&self) -> usize {
        frame::HEADER_LENGTH
    }

    /// Payload length of the claimed frame; zero when unwrapped.
    pub fn length(&self) -> usize {
        self.frame
            .as_ref()
            .map_or(0, |claimed| claimed.buffer.capacity() - frame::HEADER_LENGTH)
    }

    /// The writable payload range; empty when unwrapped.
    pub fn data(&mut self) -> &mut [u8] {
        match &self.frame {
            Some(claimed) => claimed.buffer.bytes_at_mut(
                frame::HEADER_LENGTH,
                claimed.buffer.capacity() - frame::HEADER_LENGTH,
            ),
            None => &mut [],
        }
    }

    pub fn reserved_value(&self) -> i64 {
        self.frame
            .as_ref()
            .map_or(0, |claimed| frame::reserved_value(&claimed.buffer, 0))
    }

    pub fn set_reserved_value(&mut self, value: i64) -> Result<(), Error> {
        let claimed = self.claimed_frame()?;
        frame::set_reserved_value(&claimed.buffer, 0, value);
        Ok(())
    }

    /// Rewrite the header flags; privileged claims only.
    pub fn set_flags(&mut self, flags: u8) -> Result<(), Error> {
        let claimed = self.privileged_frame()?;
        frame::set_frame_flags(&claimed.buffer, 0, flags);
        Ok(())
    }

    /// Rewrite the header type; privileged claims only.
    pub fn set_header_type(&mut self, header_type: u16) -> Result<(), Error> {
        let claimed = self.privileged_frame()?;
        frame::set_frame_type(&claimed.buffer, 0, header_type);
        Ok(())
    }

    /// Publish the frame so readers may consume it. Consumes the claim.
    pub fn commit(&mut self) -> Result<(), Error> {
        let claimed = self.take_frame("commit")?;
        frame::frame_length_ordered(&claimed.buffer, 0, claimed.buffer.capacity());
        Ok(())
    }

    /// Publish the region as padding so readers skip it. Consumes the claim.
    pub fn abort(&mut self) -> Result<(), Error> {
        let claimed = self.take_frame("abort")?;
        frame::set_frame_type(&claimed.buffer, 0, frame::HDR_TYPE_PAD);
        frame::frame_length_ordered(&claimed.buffer, 0, claimed.buffer.capacity());
        Ok(())
    }

    fn claimed_frame(&self) -> Result<&ClaimedFrame, Error> {
        self.frame.as_ref().ok_or_else(|| {
            Error::new(ErrorKind::Usage).with_message("claim is not bound to a frame")
        })
    }

    fn privileged_frame(&self) -> Result<&ClaimedFrame, Error> {
        let claimed = self.claimed_frame()?;
        if !claimed.privileged {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("header mutation requires a privileged claim"));
        }
        Ok(claimed)
    }

    fn take_frame(&mut self, op: &str) -> Result<ClaimedFrame, Error> {
        self.frame.take().ok_or_else(|| {
            Error::new(ErrorKind::Usage).with_message(format!("{op} on an unclaimed handle"))
        })
    }
}

// A claim abandoned without commit/abort leaves a zero-length slot that stalls
// readers at this offset. Production treats it as undefined; debug builds
// surface it.
#[cfg(debug_assertions)]
impl Drop for BufferClaim {
    fn drop(&mut self) {
        if let Some(claimed) = &self.frame {
            notice::emit(&notice::Notice::claim_leak(
                frame::frame_term_id(&claimed.buffer, 0),
                frame::frame_term_offset(&claimed.buffer, 0),
                claimed.buffer.capacity(),
            ));
        }
    }
}

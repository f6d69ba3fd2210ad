//! Purpose: Client conductor seam: connection liveness and driver-bound commands.
//! Exports: `Conductor`, `ConductorHandle`, `ClientCommand`.
//! Role: Publications hold a plain handle; commands travel over a bounded
//! Role: queue so there is no ownership cycle back into the conductor.
//! Invariants: Liveness is judged against the driver's time-of-last-status
//! Invariants: field; the window is driver-configured and opaque to the core.
//! Invariants: Posting never blocks the caller.
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TryRecvError, TrySendError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::json;

use crate::core::error::{Error, ErrorKind};
use crate::notice;

pub const COMMAND_QUEUE_CAPACITY: usize = 128;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ClientCommand {
    ReleasePublication {
        registration_id: i64,
    },
    AddDestination {
        registration_id: i64,
        endpoint: String,
    },
    RemoveDestination {
        registration_id: i64,
        endpoint: String,
    },
}

pub struct Conductor {
    liveness_window_ms: i64,
    clock: fn() -> i64,
    command_tx: SyncSender<ClientCommand>,
    command_rx: Receiver<ClientCommand>,
}

impl Conductor {
    pub fn new(liveness_window: Duration) -> Self {
        let (command_tx, command_rx) = sync_channel(COMMAND_QUEUE_CAPACITY);
        Self {
            liveness_window_ms: liveness_window.as_millis() as i64,
            clock: system_epoch_ms,
            command_tx,
            command_rx,
        }
    }

    /// Substitute the epoch-millis clock; liveness tests drive time directly.
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    pub fn handle(&self) -> ConductorHandle {
        ConductorHandle {
            liveness_window_ms: self.liveness_window_ms,
            clock: self.clock,
            command_tx: self.command_tx.clone(),
        }
    }

    /// Drain queued commands; called from the conductor's duty cycle.
    pub fn drain_commands(&self) -> Vec<ClientCommand> {
        let mut commands = Vec::new();
        loop {
            match self.command_rx.try_recv() {
                Ok(command) => commands.push(command),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        commands
    }
}

#[derive(Clone)]
pub struct ConductorHandle {
    liveness_window_ms: i64,
    clock: fn() -> i64,
    command_tx: SyncSender<ClientCommand>,
}

impl ConductorHandle {
    pub fn is_publication_connected(&self, time_of_last_status_ms: i64) -> bool {
        (self.clock)() <= time_of_last_status_ms + self.liveness_window_ms
    }

    /// Post a destination change for the identified publication.
    pub fn offer_command(&self, command: ClientCommand) -> Result<(), Error> {
        self.command_tx.try_send(command).map_err(|err| match err {
            TrySendError::Full(_) => {
                Error::new(ErrorKind::Busy).with_message("conductor command queue is full")
            }
            TrySendError::Disconnected(_) => {
                Error::new(ErrorKind::Internal).with_message("conductor command queue is gone")
            }
        })
    }

    /// Post a release for the identified publication. A full or disconnected
    /// queue drops the message and surfaces a notice instead of blocking.
    pub fn release_publication(&self, registration_id: i64) {
        let command = ClientCommand::ReleasePublication { registration_id };
        if self.offer_command(command).is_err() {
            notice::emit(
                &notice::Notice::new("release-drop", "publication release message dropped")
                    .with_detail("registration_id", json!(registration_id)),
            );
        }
    }
}

fn system_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

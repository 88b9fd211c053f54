use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::types::{ConversationCommand, ConversationEvent};

/// Receiving end of the runtime's event fan-out.
pub type EventStream = broadcast::Receiver<ConversationEvent>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversationChannelError {
    /// The runtime has stopped.
    #[error("command channel is closed")]
    CommandChannelClosed,
    /// The runtime is behind; the command was not queued.
    #[error("command channel is full")]
    CommandChannelFull,
}

/// Command queue into the runtime plus event fan-out to views.
#[derive(Clone, Debug)]
pub struct ConversationChannels {
    command_tx: mpsc::Sender<ConversationCommand>,
    event_tx: broadcast::Sender<ConversationEvent>,
}

impl ConversationChannels {
    /// Returns the channel set and the receiver the runtime drains.
    pub fn new(
        command_buffer: usize,
        event_buffer: usize,
    ) -> (Self, mpsc::Receiver<ConversationCommand>) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));
        (
            Self {
                command_tx,
                event_tx,
            },
            command_rx,
        )
    }

    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Queue a command, waiting for buffer space.
    pub async fn send_command(
        &self,
        command: ConversationCommand,
    ) -> Result<(), ConversationChannelError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| ConversationChannelError::CommandChannelClosed)
    }

    /// Queue a command without waiting. Meant for high-rate input such as
    /// pointer movement, where dropping under load is acceptable.
    pub fn try_send_command(
        &self,
        command: ConversationCommand,
    ) -> Result<(), ConversationChannelError> {
        self.command_tx.try_send(command).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => ConversationChannelError::CommandChannelFull,
            mpsc::error::TrySendError::Closed(_) => ConversationChannelError::CommandChannelClosed,
        })
    }

    /// Emit one event. Dropped when nobody is subscribed.
    pub fn emit(&self, event: ConversationEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Emit events in order. Subscribers observe them back to back, so a
    /// settle/notice/frame group is never interleaved with another group.
    pub fn emit_all(&self, events: impl IntoIterator<Item = ConversationEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}

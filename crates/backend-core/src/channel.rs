use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

/// Broadcast event stream type used by presentation-layer subscribers.
pub type EventStream<E> = broadcast::Receiver<E>;

/// Errors returned by backend channel operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendChannelError {
    /// The command receiver side is closed.
    #[error("command channel is closed")]
    CommandChannelClosed,
}

/// Command/event channel pair connecting a runtime actor to its handles.
///
/// Commands have a single consumer (the actor); events fan out to every
/// subscriber.
#[derive(Debug)]
pub struct BackendChannels<C, E> {
    command_tx: mpsc::Sender<C>,
    event_tx: broadcast::Sender<E>,
}

impl<C, E> Clone for BackendChannels<C, E> {
    fn clone(&self) -> Self {
        Self {
            command_tx: self.command_tx.clone(),
            event_tx: self.event_tx.clone(),
        }
    }
}

impl<C, E: Clone> BackendChannels<C, E> {
    /// Create a new channel set and return it with the command receiver.
    pub fn new(command_buffer: usize, event_buffer: usize) -> (Self, mpsc::Receiver<C>) {
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

    /// Subscribe to emitted events.
    pub fn subscribe(&self) -> EventStream<E> {
        self.event_tx.subscribe()
    }

    /// Send one command to the runtime.
    pub async fn send_command(&self, command: C) -> Result<(), BackendChannelError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| BackendChannelError::CommandChannelClosed)
    }

    /// Emit an event to all subscribers.
    ///
    /// Emission is best-effort; lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, event: E) {
        let _ = self.event_tx.send(event);
    }
}

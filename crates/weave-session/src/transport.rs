//! The boundary between a session and its remote renderer.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use weave_core::{Patch, WidgetNode};

use crate::error::SessionError;

/// Messages pushed from a session to its client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// The full tree; sent after the first render.
    Refresh { tree: WidgetNode },
    /// Patches to apply, in order, to the last tree the client holds.
    Update { patches: Vec<Patch> },
    Error { message: String },
}

pub trait ClientSink: Send + Sync {
    fn send(&self, message: ClientMessage) -> Result<(), SessionError>;
}

/// Sink backed by a tokio channel. The receiving half is typically drained
/// by a websocket writer task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<ClientMessage>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClientMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ClientSink for ChannelSink {
    fn send(&self, message: ClientMessage) -> Result<(), SessionError> {
        self.sender
            .send(message)
            .map_err(|_| SessionError::Transport("client channel closed".to_string()))
    }
}

//! WebSocket message protocol definitions.
//!
//! All messages are JSON-encoded and use snake_case for field names.

use roster_engine::{ChangeEvent, Generation, Record, Section};
use serde::{Deserialize, Serialize};

/// Messages sent from client to server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask for the current list, e.g. after missing batches.
    Snapshot,

    /// Keep-alive ping.
    Ping,
}

/// One event of a batch with the player it concerns.
#[derive(Debug, Clone, Serialize)]
pub struct BatchEvent {
    #[serde(flatten)]
    pub event: ChangeEvent,
    /// Old version for deletions, new version otherwise, absent for sections
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player: Option<Record>,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The whole list at one generation. Sent on connect and on request.
    Snapshot {
        generation: Generation,
        sections: Vec<Section>,
    },

    /// Changes of one commit (or query change), to apply in order.
    Batch {
        generation: Generation,
        events: Vec<BatchEvent>,
    },

    /// Response to ping.
    Pong,

    /// Error message.
    Error {
        /// Error description
        message: String,
    },
}

impl ServerMessage {
    /// Create an error message.
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

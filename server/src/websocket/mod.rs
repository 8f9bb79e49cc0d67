//! WebSocket support for the live player list.
//!
//! Clients connect via WebSocket, receive the current list, then one message
//! per delivered batch. Applying the batches in order keeps their copy equal
//! to the server's.

mod broadcast;
mod manager;
mod protocol;

pub use broadcast::BatchBroadcaster;
pub use manager::ConnectionManager;
pub use protocol::*;

//! Request handlers for the player list.

mod players;
mod websocket;
mod workload;

pub use players::*;
pub use websocket::handle_websocket_connection;
pub use workload::*;

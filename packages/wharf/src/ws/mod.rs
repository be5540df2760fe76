//! The multiplexed WebSocket gateway: protocol types, command dispatch,
//! and the per-connection handler.

mod dispatch;
mod handler;
mod protocol;

pub use dispatch::dispatch;
pub use handler::ws_handler;
pub use protocol::{encode, ClientCommand, Envelope, ServerMessage};

//! WebSocket server module
//!
//! Handles WebSocket connections from dashboard clients, routes their
//! requests and forwards session events to them.

mod discovery;
mod handler;
mod protocol;
mod websocket;

pub use discovery::*;
pub use handler::*;
pub use protocol::*;
pub use websocket::*;

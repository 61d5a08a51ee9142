//! WebSocket server module
//!
//! Accepts WebSocket connections from editor clients and answers their
//! completion requests.

mod handler;
mod protocol;
mod websocket;

pub use websocket::*;

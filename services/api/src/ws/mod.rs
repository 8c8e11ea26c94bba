//! WebSocket Session Management
//!
//! - `protocol`: the JSON message format between browser and server.
//! - `engines`: capture and playback engines backed by the browser.
//! - `session`: the connection lifecycle, bridging the socket and the
//!   session orchestrator.

pub mod engines;
pub mod protocol;
pub mod session;

pub use session::ws_handler;

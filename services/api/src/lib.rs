//! Charla API Library Crate
//!
//! Hosts voice conversation sessions over WebSockets. The browser owns the
//! microphone and the speech synthesizer; this service runs the session
//! orchestrator for each connection and talks to the language model. The
//! `api` binary is a thin wrapper around this library.

pub mod config;
pub mod handlers;
pub mod router;
pub mod state;
pub mod ws;

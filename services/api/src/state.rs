//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the clonable
//! resources every connection needs.

use crate::config::Config;
use charla_core::completion::CompletionService;
use charla_core::session::SessionConfig;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub completion: Arc<dyn CompletionService>,
    /// Template for the per-connection session settings.
    pub session_config: Arc<SessionConfig>,
    pub config: Arc<Config>,
}

//! Conversational session state machine.
//!
//! - `config`: timing and retry knobs for one session.
//! - `orchestrator`: the [`SessionOrchestrator`] that owns the state, the
//!   current [`Turn`] and the capture/playback components.
//!
//! Everything reaches the orchestrator through one inbox of
//! [`SessionInput`] values, and everything it wants the UI to know leaves
//! through a broadcast channel of [`SessionEvent`] values.

mod config;
mod orchestrator;

pub use config::SessionConfig;
pub use orchestrator::SessionOrchestrator;

use crate::engine::CaptureEvent;
use crate::error::{ModelError, PlaybackError, RetryError, SessionError};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::debug;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Whose turn it is. Only the orchestrator changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Listening,
    AwaitingModel,
    Speaking,
    Stopped,
    Recovering,
}

/// One user-input-to-spoken-reply cycle.
#[derive(Debug, Clone)]
pub struct Turn {
    pub id: u64,
    pub user_text: String,
    pub model_text: Option<String>,
    pub started_at: Instant,
    /// The earlier reply this turn continues, if it is a continuation.
    pub continues: Option<String>,
}

/// Notifications for the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    TurnStarted { turn_id: u64, user_text: String },
    /// The reply that is about to be spoken.
    Reply { turn_id: u64, text: String },
    TurnEnded { turn_id: u64 },
    Error(SessionError),
    Advisory(String),
}

/// Everything the orchestrator reacts to.
#[derive(Debug)]
pub enum SessionInput {
    Start,
    Stop,
    Resume,
    Continue { previous: String },
    Replay,
    Capture(CaptureEvent),
    CaptureRestartDue { ticket: u64 },
    ModelReply {
        turn_id: u64,
        result: Result<String, ModelError>,
    },
    PlaybackFinished {
        turn_id: u64,
        result: Result<(), RetryError<PlaybackError>>,
    },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("the session is no longer running")]
pub struct SessionClosed;

/// A cloneable handle for commanding a running session and observing it.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inbox: mpsc::UnboundedSender<SessionInput>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    /// Creates a handle together with the inbox the orchestrator will drain.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionInput>) {
        let (inbox, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        (Self { inbox, events }, rx)
    }

    pub fn send(&self, input: SessionInput) -> Result<(), SessionClosed> {
        self.inbox.send(input).map_err(|e| {
            debug!(input = ?e.0, "dropping input for a closed session");
            SessionClosed
        })
    }

    pub fn start(&self) -> Result<(), SessionClosed> {
        self.send(SessionInput::Start)
    }

    pub fn stop(&self) -> Result<(), SessionClosed> {
        self.send(SessionInput::Stop)
    }

    pub fn resume(&self) -> Result<(), SessionClosed> {
        self.send(SessionInput::Resume)
    }

    pub fn request_continuation(&self, previous: impl Into<String>) -> Result<(), SessionClosed> {
        self.send(SessionInput::Continue {
            previous: previous.into(),
        })
    }

    pub fn replay(&self) -> Result<(), SessionClosed> {
        self.send(SessionInput::Replay)
    }

    /// Forwards an event reported by the capture engine.
    pub fn capture_event(&self, event: CaptureEvent) -> Result<(), SessionClosed> {
        self.send(SessionInput::Capture(event))
    }

    pub fn shutdown(&self) -> Result<(), SessionClosed> {
        self.send(SessionInput::Shutdown)
    }

    /// Registers a new UI observer.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        // No subscribers is not an error; the UI may not be attached yet.
        let _ = self.events.send(event);
    }
}

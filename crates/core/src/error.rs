//! Error taxonomy for the session core.
//!
//! Capture and playback errors are retried locally by the watchdog and the
//! playback controller and only travel further once their retries are
//! exhausted. Model errors always reach the orchestrator, which recovers the
//! session instead of retrying. [`SessionError`] is what the UI layer sees.

use crate::session::SessionState;
use std::time::Duration;

/// Failures reported by (or while commanding) the speech-capture engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("no speech detected")]
    NoSpeech,
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("no microphone available: {0}")]
    DeviceUnavailable(String),
    #[error("speech recognition connection problem: {0}")]
    Transient(String),
    #[error("speech recognition failed: {0}")]
    Unknown(String),
}

impl CaptureError {
    /// Fatal errors end the listening phase; restarting would not help.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CaptureError::PermissionDenied | CaptureError::DeviceUnavailable(_)
        )
    }
}

/// Failures of a single playback attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    #[error("speech synthesis failed: {0}")]
    SynthesisFailed(String),
    #[error("speech synthesis did not start within {0:?}")]
    Timeout(Duration),
}

/// Failures at the completion-service boundary. Never fatal to a session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("could not reach the language model: {0}")]
    NetworkFailure(String),
    #[error("the language model service returned an error: {0}")]
    ServerError(String),
    #[error("the language model returned an unusable response: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    /// Whether a caller-side retry has a chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ModelError::InvalidResponse(_))
    }
}

/// The final failure of a retried operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("gave up after {attempts} attempt(s): {last}")]
pub struct RetryError<E> {
    /// How many times the action was invoked.
    pub attempts: u32,
    /// The error returned by the last invocation.
    pub last: E,
}

/// Errors surfaced to the UI layer. The `Display` output is the message shown
/// to the user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("{0}")]
    Capture(CaptureError),
    #[error("could not play the reply after {attempts} attempt(s): {source}")]
    Playback {
        attempts: u32,
        source: PlaybackError,
    },
    #[error("{0}")]
    Model(ModelError),
}

impl SessionError {
    /// A short, stable name for the error family.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Capture(_) => "capture",
            SessionError::Playback { .. } => "playback",
            SessionError::Model(_) => "model",
        }
    }
}

impl From<CaptureError> for SessionError {
    fn from(err: CaptureError) -> Self {
        SessionError::Capture(err)
    }
}

impl From<ModelError> for SessionError {
    fn from(err: ModelError) -> Self {
        SessionError::Model(err)
    }
}

impl From<RetryError<PlaybackError>> for SessionError {
    fn from(err: RetryError<PlaybackError>) -> Self {
        SessionError::Playback {
            attempts: err.attempts,
            source: err.last,
        }
    }
}

/// A session operation was called in a state that does not allow it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("`{operation}` is not valid while the session is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
    #[error("a turn is already in progress")]
    TurnInProgress,
    #[error("there is no unplayed reply to replay")]
    NothingToReplay,
}

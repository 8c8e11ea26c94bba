//! Platform engine boundary.
//!
//! The speech-capture and speech-playback engines live outside the core (in
//! the browser, in practice). The core only issues commands through these
//! traits and consumes the events the engines report back. Every command
//! carries an id that the engine must echo in its events, so events from a
//! superseded session or utterance can be recognised and dropped.

use crate::error::{CaptureError, PlaybackError};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Identifies one capture session started by the watchdog.
pub type CaptureSessionId = u64;
/// Identifies one utterance handed to the playback engine.
pub type UtteranceId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CaptureEventKind {
    Started,
    /// A final recognition result.
    Result { text: String },
    /// A platform error code such as `no-speech` or `not-allowed`.
    Error { code: String },
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureEvent {
    pub session: CaptureSessionId,
    pub kind: CaptureEventKind,
}

impl CaptureEvent {
    pub fn new(session: CaptureSessionId, kind: CaptureEventKind) -> Self {
        Self { session, kind }
    }
}

/// Speech-to-text engine commands.
pub trait CaptureEngine: Send + Sync {
    /// Begins a capture session. Events for it must carry `session`.
    fn start(&self, session: CaptureSessionId) -> Result<(), CaptureError>;
    /// Stops any running session. Must be safe to call at any time.
    fn stop(&self);
}

/// Voice parameters for a single utterance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceParams {
    pub volume: f32,
    pub rate: f32,
    pub pitch: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlaybackEventKind {
    Started,
    Ended,
    Error { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackEvent {
    pub utterance: UtteranceId,
    pub kind: PlaybackEventKind,
}

impl PlaybackEvent {
    pub fn new(utterance: UtteranceId, kind: PlaybackEventKind) -> Self {
        Self { utterance, kind }
    }
}

/// Where a playback engine reports its events.
pub type PlaybackEventSender = mpsc::UnboundedSender<PlaybackEvent>;
pub type PlaybackEventReceiver = mpsc::UnboundedReceiver<PlaybackEvent>;

/// Text-to-speech engine commands.
pub trait PlaybackEngine: Send + Sync {
    /// Queues `text` for playback. Events for it must carry `utterance`.
    fn speak(&self, utterance: UtteranceId, text: &str, voice: &VoiceParams)
    -> Result<(), PlaybackError>;
    /// Cancels whatever is playing. Must be safe to call at any time.
    fn cancel(&self);
    /// Whether the engine believes it is currently producing audio.
    fn is_speaking(&self) -> bool;
}

/// Creates the channel a playback engine reports through.
pub fn playback_channel() -> (PlaybackEventSender, PlaybackEventReceiver) {
    mpsc::unbounded_channel()
}

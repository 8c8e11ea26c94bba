//! Defines the WebSocket message protocol between the browser client and the API server.
//!
//! The browser runs the speech engines, so besides user commands the client
//! reports capture and playback events, and the server sends engine commands
//! along with the session notifications.

use charla_core::engine::{CaptureEventKind, CaptureSessionId, PlaybackEventKind, UtteranceId};
use charla_core::session::SessionEvent;
use serde::{Deserialize, Serialize};

/// Messages sent from the client (browser) to the server.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Begin listening.
    Start,
    Stop,
    Resume,
    /// Ask the agent to carry on from an earlier reply.
    Continue { previous: String },
    /// Speak the last reply that could not be played.
    Replay,
    /// An event from the speech recognizer, tagged with the session it belongs to.
    Capture {
        session: CaptureSessionId,
        event: CaptureEventKind,
    },
    /// An event from the speech synthesizer, tagged with the utterance it belongs to.
    Playback {
        utterance: UtteranceId,
        event: PlaybackEventKind,
    },
}

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Start the recognizer; its events must carry `session`.
    StartCapture { session: CaptureSessionId },
    StopCapture,
    /// Speak `text`; its events must carry `utterance`.
    Speak {
        utterance: UtteranceId,
        text: String,
        volume: f32,
        rate: f32,
        pitch: f32,
    },
    CancelSpeech,
    TurnStarted { turn_id: u64, user_text: String },
    Reply { turn_id: u64, text: String },
    TurnEnded { turn_id: u64 },
    /// A user-facing error. `kind` is `capture`, `playback` or `model`.
    Error { kind: String, message: String },
    Advisory { message: String },
}

impl From<SessionEvent> for ServerMessage {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::TurnStarted { turn_id, user_text } => {
                ServerMessage::TurnStarted { turn_id, user_text }
            }
            SessionEvent::Reply { turn_id, text } => ServerMessage::Reply { turn_id, text },
            SessionEvent::TurnEnded { turn_id } => ServerMessage::TurnEnded { turn_id },
            SessionEvent::Error(err) => ServerMessage::Error {
                kind: err.kind().to_string(),
                message: err.to_string(),
            },
            SessionEvent::Advisory(message) => ServerMessage::Advisory { message },
        }
    }
}

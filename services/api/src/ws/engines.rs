//! Speech engines that live on the other end of the WebSocket.
//!
//! Commands are queued as [`ServerMessage`]s for the socket writer. Engine
//! events come back as client messages and are fed in by the session loop.

use super::protocol::ServerMessage;
use charla_core::engine::{
    CaptureEngine, CaptureSessionId, PlaybackEngine, PlaybackEvent, PlaybackEventKind,
    PlaybackEventSender, UtteranceId, VoiceParams,
};
use charla_core::error::{CaptureError, PlaybackError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

const DISCONNECTED: &str = "client disconnected";

pub struct RemoteCaptureEngine {
    outbox: Outbox,
}

impl RemoteCaptureEngine {
    pub fn new(outbox: Outbox) -> Self {
        Self { outbox }
    }
}

impl CaptureEngine for RemoteCaptureEngine {
    fn start(&self, session: CaptureSessionId) -> Result<(), CaptureError> {
        self.outbox
            .send(ServerMessage::StartCapture { session })
            .map_err(|_| CaptureError::DeviceUnavailable(DISCONNECTED.to_string()))
    }

    fn stop(&self) {
        let _ = self.outbox.send(ServerMessage::StopCapture);
    }
}

pub struct RemotePlaybackEngine {
    outbox: Outbox,
    events: PlaybackEventSender,
    speaking: AtomicBool,
    /// The utterance the browser was last asked to speak.
    current: AtomicU64,
}

impl RemotePlaybackEngine {
    pub fn new(outbox: Outbox, events: PlaybackEventSender) -> Self {
        Self {
            outbox,
            events,
            speaking: AtomicBool::new(false),
            current: AtomicU64::new(0),
        }
    }

    /// Records an event reported by the browser and hands it to the playback
    /// controller. Only the current utterance moves the speaking flag.
    pub fn report(&self, event: PlaybackEvent) {
        if event.utterance == self.current.load(Ordering::SeqCst) {
            match event.kind {
                PlaybackEventKind::Started => self.speaking.store(true, Ordering::SeqCst),
                PlaybackEventKind::Ended | PlaybackEventKind::Error { .. } => {
                    self.speaking.store(false, Ordering::SeqCst)
                }
            }
        } else {
            debug!(utterance = event.utterance, "stale playback report");
        }
        if self.events.send(event).is_err() {
            debug!("Playback event arrived after the session ended");
        }
    }
}

impl PlaybackEngine for RemotePlaybackEngine {
    fn speak(
        &self,
        utterance: UtteranceId,
        text: &str,
        voice: &VoiceParams,
    ) -> Result<(), PlaybackError> {
        self.current.store(utterance, Ordering::SeqCst);
        self.outbox
            .send(ServerMessage::Speak {
                utterance,
                text: text.to_string(),
                volume: voice.volume,
                rate: voice.rate,
                pitch: voice.pitch,
            })
            .map_err(|_| PlaybackError::SynthesisFailed(DISCONNECTED.to_string()))
    }

    fn cancel(&self) {
        self.speaking.store(false, Ordering::SeqCst);
        let _ = self.outbox.send(ServerMessage::CancelSpeech);
    }

    fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }
}

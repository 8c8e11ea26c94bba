#![allow(dead_code)]

use async_trait::async_trait;
use charla_core::completion::CompletionService;
use charla_core::engine::{
    CaptureEngine, CaptureEvent, CaptureEventKind, CaptureSessionId, PlaybackEngine,
    PlaybackEvent, PlaybackEventKind, PlaybackEventSender, UtteranceId, VoiceParams,
    playback_channel,
};
use charla_core::error::{CaptureError, ModelError, PlaybackError};
use charla_core::session::{
    SessionConfig, SessionEvent, SessionHandle, SessionInput, SessionOrchestrator,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

#[derive(Default)]
pub struct FakeCapture {
    pub starts: Mutex<Vec<CaptureSessionId>>,
    pub stops: AtomicU32,
    pub start_errors: Mutex<Vec<CaptureError>>,
}

impl FakeCapture {
    pub fn start_count(&self) -> usize {
        self.starts.lock().unwrap().len()
    }

    pub fn stop_count(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn last_session(&self) -> CaptureSessionId {
        self.starts.lock().unwrap().last().copied().unwrap_or(0)
    }
}

impl CaptureEngine for FakeCapture {
    fn start(&self, session: CaptureSessionId) -> Result<(), CaptureError> {
        if let Some(err) = self.start_errors.lock().unwrap().pop() {
            return Err(err);
        }
        self.starts.lock().unwrap().push(session);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    /// Start and end immediately.
    Complete,
    /// Refuse every utterance.
    Fail,
    /// Start, then wait for [`FakePlayback::finish`].
    Hold,
}

pub struct FakePlayback {
    events: PlaybackEventSender,
    mode: Mutex<PlaybackMode>,
    pub spoken: Mutex<Vec<(UtteranceId, String)>>,
    pub cancels: AtomicU32,
    speaking: AtomicBool,
}

impl FakePlayback {
    fn new(events: PlaybackEventSender) -> Self {
        Self {
            events,
            mode: Mutex::new(PlaybackMode::Complete),
            spoken: Mutex::new(Vec::new()),
            cancels: AtomicU32::new(0),
            speaking: AtomicBool::new(false),
        }
    }

    pub fn set_mode(&self, mode: PlaybackMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn spoken_texts(&self) -> Vec<String> {
        self.spoken
            .lock()
            .unwrap()
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }

    /// Ends the utterance that is currently held.
    pub fn finish(&self) {
        let Some((utterance, _)) = self.spoken.lock().unwrap().last().cloned() else {
            return;
        };
        self.speaking.store(false, Ordering::SeqCst);
        let _ = self
            .events
            .send(PlaybackEvent::new(utterance, PlaybackEventKind::Ended));
    }

    fn send(&self, utterance: UtteranceId, kind: PlaybackEventKind) {
        let _ = self.events.send(PlaybackEvent::new(utterance, kind));
    }
}

impl PlaybackEngine for FakePlayback {
    fn speak(
        &self,
        utterance: UtteranceId,
        text: &str,
        _voice: &VoiceParams,
    ) -> Result<(), PlaybackError> {
        self.spoken
            .lock()
            .unwrap()
            .push((utterance, text.to_string()));
        match *self.mode.lock().unwrap() {
            PlaybackMode::Complete => {
                self.send(utterance, PlaybackEventKind::Started);
                self.send(utterance, PlaybackEventKind::Ended);
            }
            PlaybackMode::Fail => {
                return Err(PlaybackError::SynthesisFailed("synthesis-failed".into()));
            }
            PlaybackMode::Hold => {
                self.speaking.store(true, Ordering::SeqCst);
                self.send(utterance, PlaybackEventKind::Started);
            }
        }
        Ok(())
    }

    fn cancel(&self) {
        self.speaking.store(false, Ordering::SeqCst);
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }
}

/// Answers prompts from a queue; an empty queue echoes the prompt.
#[derive(Default)]
pub struct FakeCompletion {
    pub replies: Mutex<VecDeque<Result<String, ModelError>>>,
    pub prompts: Mutex<Vec<String>>,
    /// Never answer, like a request stuck on a dead connection.
    pub hang: AtomicBool,
}

impl FakeCompletion {
    pub fn reply_with(&self, reply: Result<String, ModelError>) {
        self.replies.lock().unwrap().push_back(reply);
    }
}

#[async_trait]
impl CompletionService for FakeCompletion {
    async fn get_response(&self, text: &str) -> Result<String, ModelError> {
        self.prompts.lock().unwrap().push(text.to_string());
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("¡Guau! {text}")))
    }

    async fn check_connection(&self) -> Result<(), ModelError> {
        Ok(())
    }
}

/// An orchestrator wired to fakes, driven one input at a time.
pub struct Harness {
    pub orchestrator: SessionOrchestrator,
    pub handle: SessionHandle,
    pub inbox: mpsc::UnboundedReceiver<SessionInput>,
    pub events: broadcast::Receiver<SessionEvent>,
    pub capture: Arc<FakeCapture>,
    pub playback: Arc<FakePlayback>,
    pub completion: Arc<FakeCompletion>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        let (handle, inbox) = SessionHandle::new();
        let events = handle.subscribe();
        let (playback_tx, playback_rx) = playback_channel();
        let capture = Arc::new(FakeCapture::default());
        let playback = Arc::new(FakePlayback::new(playback_tx));
        let completion = Arc::new(FakeCompletion::default());
        let orchestrator = SessionOrchestrator::new(
            config,
            capture.clone(),
            playback.clone(),
            playback_rx,
            completion.clone(),
            &handle,
        );
        Self {
            orchestrator,
            handle,
            inbox,
            events,
            capture,
            playback,
            completion,
        }
    }

    pub fn handle(&mut self, input: SessionInput) {
        self.orchestrator.handle(input);
        self.assert_exclusive();
    }

    /// Delivers a recognition result for the running capture session.
    pub fn hear(&mut self, text: &str) {
        let session = self.capture.last_session();
        self.capture_event(session, CaptureEventKind::Result { text: text.into() });
    }

    pub fn capture_event(&mut self, session: CaptureSessionId, kind: CaptureEventKind) {
        self.handle(SessionInput::Capture(CaptureEvent::new(session, kind)));
    }

    /// Processes inputs posted by spawned tasks until nothing arrives for a
    /// while.
    pub async fn settle(&mut self) {
        while let Ok(Some(input)) = timeout(Duration::from_secs(10), self.inbox.recv()).await {
            self.handle(input);
        }
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => events.push(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return events,
            }
        }
    }

    pub fn assert_exclusive(&self) {
        assert!(
            !(self.orchestrator.capture_armed() && self.orchestrator.playback_active()),
            "capture and playback armed together in {:?}",
            self.orchestrator.state()
        );
    }
}

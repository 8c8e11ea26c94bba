use super::{SessionConfig, SessionEvent, SessionHandle, SessionInput, SessionState, Turn};
use crate::capture::{CaptureOutcome, CaptureWatchdog};
use crate::completion::CompletionService;
use crate::engine::{CaptureEngine, PlaybackEngine, PlaybackEventReceiver};
use crate::error::{
    CaptureError, ModelError, PlaybackError, RetryError, SessionError, TransitionError,
};
use crate::playback::PlaybackController;
use crate::relevance::RelevanceScorer;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

const NOT_UNDERSTOOD_NOTICE: &str = "I can't understand you. Please try speaking again.";
const OFF_TOPIC_NOTICE: &str = "The continuation may have drifted away from the previous answer.";

/// Owns the session state and sequences capture, the model call and
/// playback so that only one of them is ever active.
///
/// Operations are plain methods that complete synchronously; anything slow
/// (the completion request, playback, capture restart timers) runs in a
/// spawned task that reports back through the session inbox. [`Self::run`]
/// processes one input at a time, so no handler ever observes another one
/// half-way through a transition.
pub struct SessionOrchestrator {
    config: SessionConfig,
    state: SessionState,
    turn: Option<Turn>,
    turns_created: u64,
    capture: CaptureWatchdog,
    playback: PlaybackController,
    completion: Arc<dyn CompletionService>,
    scorer: RelevanceScorer,
    handle: SessionHandle,
    model_task: Option<JoinHandle<()>>,
    playback_task: Option<JoinHandle<()>>,
    /// A reply whose playback failed, kept for a manual replay.
    unplayed: Option<String>,
}

impl SessionOrchestrator {
    pub fn new(
        config: SessionConfig,
        capture_engine: Arc<dyn CaptureEngine>,
        playback_engine: Arc<dyn PlaybackEngine>,
        playback_events: PlaybackEventReceiver,
        completion: Arc<dyn CompletionService>,
        handle: &SessionHandle,
    ) -> Self {
        let capture = CaptureWatchdog::new(capture_engine, handle.clone(), &config);
        let playback = PlaybackController::new(playback_engine, playback_events, &config);
        let scorer = RelevanceScorer::default().with_stop_words([config.persona_name.as_str()]);
        Self {
            config,
            state: SessionState::Idle,
            turn: None,
            turns_created: 0,
            capture,
            playback,
            completion,
            scorer,
            handle: handle.clone(),
            model_task: None,
            playback_task: None,
            unplayed: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn current_turn(&self) -> Option<&Turn> {
        self.turn.as_ref()
    }

    /// How many turns this session has opened so far.
    pub fn turns_created(&self) -> u64 {
        self.turns_created
    }

    pub fn capture_armed(&self) -> bool {
        self.capture.is_armed()
    }

    pub fn playback_active(&self) -> bool {
        self.playback_task.is_some()
    }

    /// Drains the inbox until a shutdown request, then stops the session.
    pub async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<SessionInput>) {
        info!("session started");
        while let Some(input) = inbox.recv().await {
            if matches!(input, SessionInput::Shutdown) {
                break;
            }
            self.handle(input);
        }
        self.stop();
        info!("session finished");
    }

    /// Processes a single input to completion.
    pub fn handle(&mut self, input: SessionInput) {
        let result = match input {
            SessionInput::Start => self.start(),
            SessionInput::Stop => {
                self.stop();
                Ok(())
            }
            SessionInput::Resume => self.resume(),
            SessionInput::Continue { previous } => self.request_continuation(&previous),
            SessionInput::Replay => self.replay(),
            SessionInput::Capture(event) => {
                let listening = self.state == SessionState::Listening;
                let outcome = self.capture.handle_event(event, listening);
                self.apply_capture_outcome(outcome)
            }
            SessionInput::CaptureRestartDue { ticket } => {
                let listening = self.state == SessionState::Listening;
                let outcome = self.capture.on_restart_due(ticket, listening);
                self.apply_capture_outcome(outcome)
            }
            SessionInput::ModelReply { turn_id, result } => {
                if !self.is_current(turn_id, SessionState::AwaitingModel) {
                    debug!(turn_id, state = ?self.state, "discarding stale model reply");
                    return;
                }
                match result {
                    Ok(text) => self.on_model_response(&text),
                    Err(err) => self.on_model_error(err),
                }
            }
            SessionInput::PlaybackFinished { turn_id, result } => {
                if !self.is_current(turn_id, SessionState::Speaking) {
                    debug!(turn_id, state = ?self.state, "discarding stale playback outcome");
                    return;
                }
                match result {
                    Ok(()) => self.on_playback_end(),
                    Err(err) => self.on_playback_failed(err),
                }
            }
            SessionInput::Shutdown => {
                self.stop();
                Ok(())
            }
        };
        if let Err(err) = result {
            warn!(error = %err, "rejected session input");
        }
    }

    /// Begins listening. Calling it on an active session does nothing.
    pub fn start(&mut self) -> Result<(), TransitionError> {
        match self.state {
            SessionState::Idle | SessionState::Stopped => {
                info!(from = ?self.state, "starting session");
                self.enter_listening();
                Ok(())
            }
            state => {
                debug!(?state, "session already active");
                Ok(())
            }
        }
    }

    /// Leaves `Stopped` and listens again.
    pub fn resume(&mut self) -> Result<(), TransitionError> {
        self.expect_state("resume", &[SessionState::Stopped])?;
        info!("resuming session");
        self.enter_listening();
        Ok(())
    }

    /// Cancels everything in flight and parks the session in `Stopped`.
    /// Safe to call in any state, any number of times.
    pub fn stop(&mut self) {
        self.abort_model();
        self.abort_playback();
        self.capture.disarm();
        self.close_turn();
        if self.state != SessionState::Stopped {
            info!(from = ?self.state, "session stopped");
            self.state = SessionState::Stopped;
        }
    }

    /// Accepts a recognition result. Noise keeps the session listening.
    pub fn on_capture_result(&mut self, text: &str) -> Result<(), TransitionError> {
        self.expect_state("on_capture_result", &[SessionState::Listening])?;
        let text = text.trim();
        if is_noise(text) {
            debug!(text, "discarding noise");
            let outcome = self.capture.rearm();
            return self.apply_capture_outcome(outcome);
        }

        self.ensure_no_turn()?;
        self.capture.disarm();
        let turn_id = self.open_turn(text.to_string(), None, None);
        self.request_model(turn_id, text.to_string());
        Ok(())
    }

    pub fn on_model_response(&mut self, text: &str) -> Result<(), TransitionError> {
        self.expect_state("on_model_response", &[SessionState::AwaitingModel])?;
        let state = self.state;
        let Some(turn) = self.turn.as_mut() else {
            return Err(TransitionError::InvalidState {
                operation: "on_model_response",
                state,
            });
        };
        if let Some(task) = self.model_task.take() {
            task.abort();
        }

        if let Some(previous) = turn.continues.as_deref() {
            let relevance = self.scorer.score(previous, text);
            debug!(
                turn_id = turn.id,
                matches = relevance.match_count,
                threshold = relevance.threshold,
                "continuation relevance"
            );
            if !relevance.related {
                info!(turn_id = turn.id, "continuation looks unrelated to the previous reply");
                self.handle.emit(SessionEvent::Advisory(OFF_TOPIC_NOTICE.to_string()));
            }
        }

        turn.model_text = Some(text.to_string());
        let turn_id = turn.id;
        self.speak(turn_id, text.to_string());
        Ok(())
    }

    /// Reports a failed model call. The session always returns to listening.
    pub fn on_model_error(&mut self, err: ModelError) -> Result<(), TransitionError> {
        self.expect_state("on_model_error", &[SessionState::AwaitingModel])?;
        self.abort_model();
        self.state = SessionState::Recovering;
        warn!(error = %err, "model request failed, recovering");
        self.handle.emit(SessionEvent::Error(SessionError::from(err)));
        self.close_turn();
        self.enter_listening();
        Ok(())
    }

    pub fn on_playback_end(&mut self) -> Result<(), TransitionError> {
        self.expect_state("on_playback_end", &[SessionState::Speaking])?;
        self.abort_playback();
        self.unplayed = None;
        self.close_turn();
        self.enter_listening();
        Ok(())
    }

    /// Reports that every playback attempt failed. The reply is kept so the
    /// user can ask for it again with [`Self::replay`].
    pub fn on_playback_failed(
        &mut self,
        err: RetryError<PlaybackError>,
    ) -> Result<(), TransitionError> {
        self.expect_state("on_playback_failed", &[SessionState::Speaking])?;
        self.abort_playback();
        warn!(attempts = err.attempts, error = %err.last, "playback exhausted");
        self.unplayed = self.turn.as_ref().and_then(|turn| turn.model_text.clone());
        self.handle.emit(SessionEvent::Error(SessionError::from(err)));
        self.close_turn();
        self.enter_listening();
        Ok(())
    }

    /// Asks the model to carry on from `previous_model_text`.
    pub fn request_continuation(&mut self, previous_model_text: &str) -> Result<(), TransitionError> {
        self.expect_state(
            "request_continuation",
            &[SessionState::Idle, SessionState::Listening],
        )?;
        self.ensure_no_turn()?;
        self.capture.disarm();
        let prompt = self.config.continuation_for(previous_model_text);
        let turn_id = self.open_turn(prompt.clone(), None, Some(previous_model_text.to_string()));
        self.request_model(turn_id, prompt);
        Ok(())
    }

    /// Plays the last reply whose playback failed.
    pub fn replay(&mut self) -> Result<(), TransitionError> {
        self.expect_state("replay", &[SessionState::Idle, SessionState::Listening])?;
        self.ensure_no_turn()?;
        let Some(text) = self.unplayed.take() else {
            return Err(TransitionError::NothingToReplay);
        };
        self.capture.disarm();
        let turn_id = self.open_turn(String::new(), Some(text.clone()), None);
        self.speak(turn_id, text);
        Ok(())
    }

    fn apply_capture_outcome(&mut self, outcome: CaptureOutcome) -> Result<(), TransitionError> {
        match outcome {
            CaptureOutcome::Ignored | CaptureOutcome::Restarting => Ok(()),
            CaptureOutcome::Heard(text) => self.on_capture_result(&text),
            CaptureOutcome::NotUnderstood => {
                self.handle
                    .emit(SessionEvent::Advisory(NOT_UNDERSTOOD_NOTICE.to_string()));
                Ok(())
            }
            CaptureOutcome::Failed(err) => {
                self.fail_capture(err);
                Ok(())
            }
        }
    }

    fn enter_listening(&mut self) {
        debug_assert!(self.playback_task.is_none(), "listening while playback is active");
        self.state = SessionState::Listening;
        if let Err(err) = self.capture.arm() {
            self.fail_capture(err);
        }
    }

    /// Ends the listening phase after an error that retrying cannot fix.
    fn fail_capture(&mut self, err: CaptureError) {
        warn!(error = %err, "capture unavailable, session is idle");
        self.capture.disarm();
        if matches!(self.state, SessionState::Listening | SessionState::Recovering) {
            self.state = SessionState::Idle;
        }
        self.handle.emit(SessionEvent::Error(SessionError::from(err)));
    }

    fn open_turn(
        &mut self,
        user_text: String,
        model_text: Option<String>,
        continues: Option<String>,
    ) -> u64 {
        self.turns_created += 1;
        let id = self.turns_created;
        info!(turn_id = id, continuation = continues.is_some(), "turn started");
        self.handle.emit(SessionEvent::TurnStarted {
            turn_id: id,
            user_text: user_text.clone(),
        });
        self.turn = Some(Turn {
            id,
            user_text,
            model_text,
            started_at: Instant::now(),
            continues,
        });
        id
    }

    fn close_turn(&mut self) {
        if let Some(turn) = self.turn.take() {
            info!(
                turn_id = turn.id,
                elapsed_ms = turn.started_at.elapsed().as_millis() as u64,
                "turn ended"
            );
            self.handle.emit(SessionEvent::TurnEnded { turn_id: turn.id });
        }
    }

    fn request_model(&mut self, turn_id: u64, prompt: String) {
        self.state = SessionState::AwaitingModel;
        let completion = Arc::clone(&self.completion);
        let handle = self.handle.clone();
        let limit = self.config.model_timeout;
        self.model_task = Some(tokio::spawn(async move {
            let result = match timeout(limit, completion.get_response(&prompt)).await {
                Ok(result) => result,
                Err(_) => Err(ModelError::NetworkFailure(format!(
                    "no response within {}s",
                    limit.as_secs()
                ))),
            };
            let _ = handle.send(SessionInput::ModelReply { turn_id, result });
        }));
    }

    fn speak(&mut self, turn_id: u64, text: String) {
        debug_assert!(!self.capture.is_armed(), "speaking while capture is armed");
        self.state = SessionState::Speaking;
        self.handle.emit(SessionEvent::Reply {
            turn_id,
            text: text.clone(),
        });
        let playback = self.playback.clone();
        let options = self.config.speak;
        let handle = self.handle.clone();
        self.playback_task = Some(tokio::spawn(async move {
            let result = playback.speak(&text, options).await;
            let _ = handle.send(SessionInput::PlaybackFinished { turn_id, result });
        }));
    }

    fn abort_model(&mut self) {
        if let Some(task) = self.model_task.take() {
            task.abort();
        }
    }

    /// Tears down the playback task, which holds the engine's event stream
    /// until it is dropped, and silences the engine.
    fn abort_playback(&mut self) {
        if let Some(task) = self.playback_task.take() {
            task.abort();
        }
        self.playback.cancel();
    }

    fn is_current(&self, turn_id: u64, expected: SessionState) -> bool {
        self.state == expected && self.turn.as_ref().is_some_and(|turn| turn.id == turn_id)
    }

    fn ensure_no_turn(&self) -> Result<(), TransitionError> {
        match self.turn {
            Some(_) => Err(TransitionError::TurnInProgress),
            None => Ok(()),
        }
    }

    fn expect_state(
        &self,
        operation: &'static str,
        allowed: &[SessionState],
    ) -> Result<(), TransitionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(self.invalid(operation))
        }
    }

    fn invalid(&self, operation: &'static str) -> TransitionError {
        TransitionError::InvalidState {
            operation,
            state: self.state,
        }
    }
}

impl Drop for SessionOrchestrator {
    fn drop(&mut self) {
        if let Some(task) = self.model_task.take() {
            task.abort();
        }
        if let Some(task) = self.playback_task.take() {
            task.abort();
        }
    }
}

/// Empty text, text without a single letter or digit, or a lone character.
pub fn is_noise(text: &str) -> bool {
    let text = text.trim();
    text.chars().count() < 2 || !text.chars().any(char::is_alphanumeric)
}

//! Capture watchdog.
//!
//! Platform speech recognition stops on its own all the time: after a result,
//! after a few seconds of silence, after a network hiccup. The watchdog keeps
//! exactly one capture session alive while the orchestrator is listening and
//! none otherwise, restarting the engine on a timer and classifying engine
//! errors into [`CaptureError`].

use crate::engine::{CaptureEngine, CaptureEvent, CaptureEventKind, CaptureSessionId};
use crate::error::CaptureError;
use crate::retry::RetryPolicy;
use crate::session::{SessionConfig, SessionHandle, SessionInput};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// What the orchestrator should do after the watchdog processed something.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Ignored,
    /// A recognition result for the orchestrator to judge.
    Heard(String),
    /// The engine stopped and a restart is scheduled.
    Restarting,
    /// The empty-result budget ran out; the user should be told. Capture
    /// keeps restarting.
    NotUnderstood,
    /// Capture cannot continue without user action.
    Failed(CaptureError),
}

/// Maps a platform error code onto the capture taxonomy. `None` means the
/// code is a side effect of our own `stop()` and carries no information.
pub fn classify_error(code: &str) -> Option<CaptureError> {
    match code {
        "aborted" => None,
        "no-speech" => Some(CaptureError::NoSpeech),
        "not-allowed" | "service-not-allowed" => Some(CaptureError::PermissionDenied),
        "audio-capture" => Some(CaptureError::DeviceUnavailable(code.to_string())),
        "network" => Some(CaptureError::Transient(code.to_string())),
        other => Some(CaptureError::Unknown(other.to_string())),
    }
}

pub struct CaptureWatchdog {
    engine: Arc<dyn CaptureEngine>,
    handle: SessionHandle,
    /// Restarts after sessions that produced nothing usable.
    empty_restarts: RetryPolicy,
    /// Restarts after transient engine errors.
    transient_restarts: RetryPolicy,
    armed: bool,
    running: bool,
    session: CaptureSessionId,
    /// Error reported for the current session, acted on once it ends.
    pending_error: Option<CaptureError>,
    empty_count: u32,
    transient_count: u32,
    unknown_count: u32,
    restart_ticket: u64,
    restart_timer: Option<JoinHandle<()>>,
}

impl CaptureWatchdog {
    pub fn new(
        engine: Arc<dyn CaptureEngine>,
        handle: SessionHandle,
        config: &SessionConfig,
    ) -> Self {
        Self {
            engine,
            handle,
            empty_restarts: RetryPolicy::constant(config.max_speech_retries, config.restart_delay),
            transient_restarts: RetryPolicy::linear(
                config.capture_error_retries,
                config.capture_error_delay,
            ),
            armed: false,
            running: false,
            session: 0,
            pending_error: None,
            empty_count: 0,
            transient_count: 0,
            unknown_count: 0,
            restart_ticket: 0,
            restart_timer: None,
        }
    }

    /// Whether the watchdog is keeping capture alive.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Whether an engine session is believed to be running.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// The id of the most recent capture session.
    pub fn session(&self) -> CaptureSessionId {
        self.session
    }

    /// Starts capture. A no-op when already armed, so a second caller can
    /// never produce a duplicate engine session.
    pub fn arm(&mut self) -> Result<(), CaptureError> {
        if self.armed {
            debug!(session = self.session, "capture already armed");
            return Ok(());
        }
        self.armed = true;
        match self.launch() {
            CaptureOutcome::Failed(err) => Err(err),
            _ => Ok(()),
        }
    }

    /// Stops capture and forgets all retry bookkeeping. Idempotent.
    pub fn disarm(&mut self) {
        self.cancel_restart();
        if self.running {
            self.engine.stop();
            self.running = false;
        }
        if self.armed {
            debug!(session = self.session, "capture disarmed");
        }
        self.armed = false;
        self.pending_error = None;
        self.empty_count = 0;
        self.transient_count = 0;
        self.unknown_count = 0;
    }

    /// Throws away the current session and starts a fresh one. Counts as an
    /// empty-result restart.
    pub fn rearm(&mut self) -> CaptureOutcome {
        if !self.armed {
            return match self.arm() {
                Ok(()) => CaptureOutcome::Ignored,
                Err(err) => CaptureOutcome::Failed(err),
            };
        }
        self.cancel_restart();
        if self.running {
            self.engine.stop();
            self.running = false;
        }
        let budget_spent = self.count_empty_restart();
        match self.launch() {
            CaptureOutcome::Ignored if budget_spent => CaptureOutcome::NotUnderstood,
            outcome => outcome,
        }
    }

    /// Processes an event from the capture engine. `listening` tells whether
    /// the orchestrator still wants capture.
    pub fn handle_event(&mut self, event: CaptureEvent, listening: bool) -> CaptureOutcome {
        if event.session != self.session {
            trace!(session = event.session, current = self.session, "stale capture event");
            return CaptureOutcome::Ignored;
        }
        match event.kind {
            CaptureEventKind::Started => {
                self.running = true;
                CaptureOutcome::Ignored
            }
            CaptureEventKind::Result { text } => {
                if !self.armed {
                    return CaptureOutcome::Ignored;
                }
                self.transient_count = 0;
                self.unknown_count = 0;
                CaptureOutcome::Heard(text)
            }
            CaptureEventKind::Error { code } => {
                let Some(err) = classify_error(&code) else {
                    return CaptureOutcome::Ignored;
                };
                if !self.armed {
                    return CaptureOutcome::Ignored;
                }
                if err.is_fatal() {
                    warn!(session = self.session, error = %err, "capture failed");
                    self.disarm();
                    return CaptureOutcome::Failed(err);
                }
                debug!(session = self.session, error = %err, "capture error, waiting for end");
                self.pending_error = Some(err);
                CaptureOutcome::Ignored
            }
            CaptureEventKind::Ended => {
                self.running = false;
                if !self.armed || !listening {
                    return CaptureOutcome::Ignored;
                }
                let err = self.pending_error.take();
                self.recover(err)
            }
        }
    }

    /// Called when a restart timer fires.
    pub fn on_restart_due(&mut self, ticket: u64, listening: bool) -> CaptureOutcome {
        if ticket != self.restart_ticket || self.restart_timer.is_none() {
            trace!(ticket, "stale restart timer");
            return CaptureOutcome::Ignored;
        }
        self.restart_timer = None;
        if !self.armed || self.running || !listening {
            return CaptureOutcome::Ignored;
        }
        self.launch()
    }

    fn launch(&mut self) -> CaptureOutcome {
        self.session += 1;
        self.pending_error = None;
        match self.engine.start(self.session) {
            Ok(()) => {
                debug!(session = self.session, "capture started");
                self.running = true;
                CaptureOutcome::Ignored
            }
            Err(err) if err.is_fatal() => {
                warn!(session = self.session, error = %err, "capture could not start");
                self.disarm();
                CaptureOutcome::Failed(err)
            }
            Err(err) => {
                warn!(session = self.session, error = %err, "capture start failed");
                self.recover(Some(err))
            }
        }
    }

    /// Decides how to continue after a session ended without a usable result.
    fn recover(&mut self, err: Option<CaptureError>) -> CaptureOutcome {
        match err {
            None | Some(CaptureError::NoSpeech) => {
                let budget_spent = self.count_empty_restart();
                self.schedule_restart(self.empty_restarts.backoff().delay(1));
                if budget_spent {
                    CaptureOutcome::NotUnderstood
                } else {
                    CaptureOutcome::Restarting
                }
            }
            Some(CaptureError::Transient(reason)) => {
                self.transient_count += 1;
                match self.transient_restarts.attempt(self.transient_count) {
                    Some(attempt) => {
                        info!(attempt = attempt.attempt_number, %reason, "restarting capture after transient error");
                        self.schedule_restart(attempt.delay);
                        CaptureOutcome::Restarting
                    }
                    None => {
                        self.disarm();
                        CaptureOutcome::Failed(CaptureError::Transient(reason))
                    }
                }
            }
            Some(CaptureError::Unknown(reason)) => {
                self.unknown_count += 1;
                if self.unknown_count > 1 {
                    self.disarm();
                    CaptureOutcome::Failed(CaptureError::Unknown(reason))
                } else {
                    self.schedule_restart(self.empty_restarts.backoff().delay(1));
                    CaptureOutcome::Restarting
                }
            }
            Some(fatal) => {
                self.disarm();
                CaptureOutcome::Failed(fatal)
            }
        }
    }

    /// Returns true when this restart used up the empty-result budget, which
    /// also resets it.
    fn count_empty_restart(&mut self) -> bool {
        self.empty_count += 1;
        if self.empty_restarts.attempt(self.empty_count + 1).is_none() {
            debug!(restarts = self.empty_count, "empty-result budget spent");
            self.empty_count = 0;
            return true;
        }
        false
    }

    fn schedule_restart(&mut self, delay: Duration) {
        self.cancel_restart();
        self.restart_ticket += 1;
        let ticket = self.restart_ticket;
        let handle = self.handle.clone();
        trace!(ticket, delay_ms = delay.as_millis() as u64, "capture restart scheduled");
        self.restart_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = handle.send(SessionInput::CaptureRestartDue { ticket });
        }));
    }

    fn cancel_restart(&mut self) {
        if let Some(timer) = self.restart_timer.take() {
            timer.abort();
        }
    }
}

impl Drop for CaptureWatchdog {
    fn drop(&mut self) {
        self.cancel_restart();
    }
}

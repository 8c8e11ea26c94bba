//! Playback controller.
//!
//! Speaks one text at a time through a [`PlaybackEngine`], retrying when the
//! engine reports a synthesis error, silently fails to start or never reports
//! the end of an utterance. Each retry slows the voice down a little, which
//! helps intelligibility when the first attempt was cut off.

use crate::engine::{
    PlaybackEngine, PlaybackEventKind, PlaybackEventReceiver, UtteranceId, VoiceParams,
};
use crate::error::{PlaybackError, RetryError};
use crate::retry::RetryPolicy;
use crate::session::SessionConfig;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const RATE_STEP: f32 = 0.1;
const MIN_RATE: f32 = 0.1;
/// Speaking time budgeted per character at rate 1.0.
const TIME_PER_CHAR: Duration = Duration::from_millis(80);

/// Voice options for [`PlaybackController::speak`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeakOptions {
    /// 0.0 to 1.0.
    pub volume: f32,
    /// Rate of the first attempt; later attempts are slower.
    pub rate: f32,
    pub pitch: f32,
}

impl Default for SpeakOptions {
    fn default() -> Self {
        Self {
            volume: 1.0,
            rate: 0.9,
            pitch: 1.0,
        }
    }
}

impl SpeakOptions {
    /// The voice used for the given 1-based attempt.
    pub fn voice_for(&self, attempt: u32) -> VoiceParams {
        let slowdown = RATE_STEP * attempt.saturating_sub(1) as f32;
        VoiceParams {
            volume: self.volume.clamp(0.0, 1.0),
            rate: (self.rate - slowdown).max(MIN_RATE),
            pitch: self.pitch,
        }
    }
}

#[derive(Clone)]
pub struct PlaybackController {
    engine: Arc<dyn PlaybackEngine>,
    events: Arc<Mutex<PlaybackEventReceiver>>,
    policy: RetryPolicy,
    start_timeout: Duration,
    end_grace: Duration,
    next_utterance: Arc<AtomicU64>,
}

impl PlaybackController {
    pub fn new(
        engine: Arc<dyn PlaybackEngine>,
        events: PlaybackEventReceiver,
        config: &SessionConfig,
    ) -> Self {
        Self {
            engine,
            events: Arc::new(Mutex::new(events)),
            policy: RetryPolicy::linear(config.playback_attempts, config.playback_retry_delay),
            start_timeout: config.playback_start_timeout,
            end_grace: config.playback_end_grace,
            next_utterance: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Speaks `text`, resolving once playback has finished. Fails only after
    /// every attempt failed.
    pub async fn speak(
        &self,
        text: &str,
        options: SpeakOptions,
    ) -> Result<(), RetryError<PlaybackError>> {
        self.policy
            .execute(|attempt| {
                let voice = options.voice_for(attempt.attempt_number);
                self.utter(text, voice)
            })
            .await
    }

    /// Stops whatever is playing. Safe to call at any time.
    pub fn cancel(&self) {
        self.engine.cancel();
    }

    async fn utter(&self, text: &str, voice: VoiceParams) -> Result<(), PlaybackError> {
        let mut events = self.events.lock().await;
        while events.try_recv().is_ok() {}

        self.engine.cancel();
        let utterance = self.next_utterance.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(utterance, rate = voice.rate, "speaking");
        self.engine.speak(utterance, text, &voice)?;

        match timeout(self.start_timeout, next_event(&mut events, utterance)).await {
            Ok(kind) => match kind? {
                PlaybackEventKind::Started => {}
                PlaybackEventKind::Ended => return Ok(()),
                PlaybackEventKind::Error { reason } => {
                    return Err(PlaybackError::SynthesisFailed(reason));
                }
            },
            Err(_) if self.engine.is_speaking() => {
                info!(utterance, "no start event, but the engine is speaking");
            }
            Err(_) => {
                warn!(utterance, "speech did not start");
                self.engine.cancel();
                return Err(PlaybackError::Timeout(self.start_timeout));
            }
        }

        let deadline = self.end_deadline(text, voice.rate);
        match timeout(deadline, wait_for_end(&mut events, utterance)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(utterance, deadline_ms = deadline.as_millis() as u64, "speech never ended");
                self.engine.cancel();
                Err(PlaybackError::Timeout(deadline))
            }
        }
    }

    /// How long a started utterance may run before it counts as lost.
    fn end_deadline(&self, text: &str, rate: f32) -> Duration {
        let chars = text.chars().count() as f32;
        self.end_grace + TIME_PER_CHAR.mul_f32(chars / rate.max(MIN_RATE))
    }
}

async fn wait_for_end(
    events: &mut PlaybackEventReceiver,
    utterance: UtteranceId,
) -> Result<(), PlaybackError> {
    loop {
        match next_event(events, utterance).await? {
            PlaybackEventKind::Started => continue,
            PlaybackEventKind::Ended => return Ok(()),
            PlaybackEventKind::Error { reason } => {
                return Err(PlaybackError::SynthesisFailed(reason));
            }
        }
    }
}

/// Waits for the next event belonging to `utterance`.
async fn next_event(
    events: &mut PlaybackEventReceiver,
    utterance: UtteranceId,
) -> Result<PlaybackEventKind, PlaybackError> {
    loop {
        match events.recv().await {
            Some(event) if event.utterance == utterance => return Ok(event.kind),
            Some(_) => continue,
            None => {
                return Err(PlaybackError::SynthesisFailed(
                    "playback engine disconnected".to_string(),
                ));
            }
        }
    }
}

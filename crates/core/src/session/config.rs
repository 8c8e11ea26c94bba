use crate::playback::SpeakOptions;
use std::time::Duration;

/// Knobs for a single conversational session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// The agent's name. Added to the relevance stop words.
    pub persona_name: String,
    /// Wait before restarting capture after it ended on its own.
    pub restart_delay: Duration,
    /// Consecutive empty-result restarts before the "can't understand you" notice.
    pub max_speech_retries: u32,
    /// Restarts allowed after transient capture errors.
    pub capture_error_retries: u32,
    /// Linear backoff step for transient capture errors.
    pub capture_error_delay: Duration,
    pub playback_attempts: u32,
    /// Linear backoff step between playback attempts.
    pub playback_retry_delay: Duration,
    /// How long a `speak` may stay silent before the attempt counts as failed.
    pub playback_start_timeout: Duration,
    /// Fixed part of the wait for an end event once speech has started. The
    /// controller adds time proportional to the text length.
    pub playback_end_grace: Duration,
    /// Upper bound on a single completion request, retries included.
    pub model_timeout: Duration,
    pub speak: SpeakOptions,
    /// Prompt used for "continue" requests. `{previous}` is replaced with the
    /// reply being continued.
    pub continuation_prompt: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            persona_name: "Charla".to_string(),
            restart_delay: Duration::from_millis(300),
            max_speech_retries: 3,
            capture_error_retries: 3,
            capture_error_delay: Duration::from_millis(500),
            playback_attempts: 3,
            playback_retry_delay: Duration::from_millis(500),
            playback_start_timeout: Duration::from_millis(500),
            playback_end_grace: Duration::from_secs(15),
            model_timeout: Duration::from_secs(30),
            speak: SpeakOptions::default(),
            continuation_prompt: "Continúa tu respuesta anterior desde donde la dejaste, \
                                  sin repetirla: «{previous}»"
                .to_string(),
        }
    }
}

impl SessionConfig {
    pub fn continuation_for(&self, previous: &str) -> String {
        self.continuation_prompt.replace("{previous}", previous)
    }
}

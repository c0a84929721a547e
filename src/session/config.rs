use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;
use crate::error::SessionError;

/// Longest accepted session id.
const MAX_SESSION_ID_LEN: usize = 128;

/// Session ids name the recording file, so they must be a single plain
/// file stem: no separators, no leading dot, no control characters.
pub fn is_valid_session_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && !session_id.starts_with('.')
        && !session_id
            .chars()
            .any(|c| c == '/' || c == '\\' || c == ':' || c.is_control())
}

/// Configuration for a recording session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Unique session identifier (e.g., "lecture-2025-03-04-bio101")
    pub session_id: String,

    /// Length of each transcription chunk
    /// Default: 120 seconds
    pub chunk_duration: Duration,

    /// Sample rate for audio processing (Whisper expects 16kHz)
    pub sample_rate: u32,

    /// Number of audio channels (1 = mono, 2 = stereo)
    pub channels: u16,

    /// Frame length delivered by the backend, in milliseconds
    pub frame_duration_ms: u64,

    /// Directory receiving the whole-session recording
    pub recordings_path: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: format!("lecture-{}", uuid::Uuid::new_v4()),
            chunk_duration: Duration::from_secs(120), // 2 minutes
            sample_rate: 16000,                       // Whisper expects 16kHz
            channels: 1,                              // Mono
            frame_duration_ms: 100,
            recordings_path: PathBuf::from("recordings"),
        }
    }
}

impl SessionConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_duration: Duration::from_secs(config.audio.chunk_duration_secs),
            sample_rate: config.audio.sample_rate,
            channels: config.audio.channels,
            frame_duration_ms: config.audio.frame_duration_ms,
            recordings_path: PathBuf::from(&config.audio.recordings_path),
            ..Self::default()
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if !is_valid_session_id(&self.session_id) {
            return Err(SessionError::InvalidConfig(format!(
                "invalid session id {:?}",
                self.session_id
            )));
        }
        if self.chunk_duration.is_zero() {
            return Err(SessionError::InvalidConfig(
                "chunk duration must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_must_be_plain_file_stems() {
        assert!(is_valid_session_id("lecture-2025-03-04-bio101"));
        assert!(is_valid_session_id("bio_101.week3"));
        assert!(!is_valid_session_id(""));
        assert!(!is_valid_session_id(".."));
        assert!(!is_valid_session_id("../escaped"));
        assert!(!is_valid_session_id("/etc/passwd"));
        assert!(!is_valid_session_id("a\\b"));
        assert!(!is_valid_session_id("C:evil"));
        assert!(!is_valid_session_id(&"x".repeat(200)));
    }

    #[test]
    fn validate_rejects_zero_chunk_duration() {
        let config = SessionConfig {
            chunk_duration: Duration::ZERO,
            ..SessionConfig::default()
        };
        assert!(matches!(config.validate(), Err(SessionError::InvalidConfig(_))));
        assert!(SessionConfig::default().validate().is_ok());
    }
}

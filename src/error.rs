//! Error taxonomy for the capture pipeline.
//!
//! Device, network and service failures are surfaced to callers; storage
//! failures never leave the offline cache (they are logged and treated as a
//! miss).

use thiserror::Error;

use crate::session::{FinalizedRecording, SessionState};

/// The audio source could not be acquired or stopped delivering audio.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("audio source unavailable: {0}")]
    Unavailable(String),

    #[error("audio source already started")]
    AlreadyStarted,

    #[error("failed to open encoder output: {0}")]
    Encoder(String),
}

/// Failure to turn one chunk into text.
#[derive(Debug, Error)]
pub enum TranscribeError {
    /// Transient transport failure. The caller may retry by hand.
    #[error("transcription request failed: {0}")]
    Network(String),

    /// The backend rejected the audio or answered with something unusable.
    #[error("transcription service rejected chunk: {0}")]
    Service(String),
}

impl TranscribeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TranscribeError::Network(_))
    }
}

impl From<reqwest::Error> for TranscribeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            TranscribeError::Service(e.to_string())
        } else {
            TranscribeError::Network(e.to_string())
        }
    }
}

/// Any offline-cache tier read or write failure.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("blob store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("no permission for local folder")]
    NotGranted,
}

impl From<sled::Error> for StorageError {
    fn from(e: sled::Error) -> Self {
        StorageError::Store(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Store(e.to_string())
    }
}

/// Errors surfaced by [`crate::session::RecordingSession`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot {action} a session in state {from}")]
    InvalidState {
        from: SessionState,
        action: &'static str,
    },

    #[error("whole-session artifact could not be produced: {0}")]
    Artifact(String),

    #[error("capture task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A failed save hands the recording back so it can be retried without
/// re-recording.
#[derive(Debug, Error)]
#[error("failed to save recording: {reason}")]
pub struct SaveError {
    pub reason: String,
    pub recording: Box<FinalizedRecording>,
}

impl SaveError {
    pub fn into_recording(self) -> FinalizedRecording {
        *self.recording
    }
}
